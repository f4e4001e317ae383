use anyhow::{Context, Result};
use log::{error, info, warn};
use pylonbms_lib::alarm::AlarmSummary;
use pylonbms_lib::analog::{PackSnapshot, SensorShape};
use pylonbms_lib::coordinator::{Availability, CycleOutcome, PollCoordinator};
use pylonbms_lib::protocol::Variant;
use pylonbms_lib::transport::TcpConnector;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::{commandline, mqtt};

/// Pack data in engineering units, as published.
#[derive(Debug, Serialize)]
struct PackReport {
    voltage: f32,
    current: f32,
    power: f32,
    soc: u8,
    remaining_capacity: f32,
    total_capacity: f32,
    cycles: u16,
    cell_voltages: Vec<f32>,
    cell_voltage_min: Option<f32>,
    cell_voltage_max: Option<f32>,
    cell_voltage_delta: Option<u16>,
    temperatures: Vec<f32>,
    average_temperature: Option<f32>,
}

impl PackReport {
    fn new(snapshot: &PackSnapshot) -> Self {
        let range = snapshot.cell_voltage_range();
        Self {
            voltage: snapshot.pack_voltage_v(),
            current: snapshot.pack_current_a(),
            power: snapshot.power_w(),
            soc: snapshot.state_of_charge,
            remaining_capacity: snapshot.remaining_capacity_ah(),
            total_capacity: snapshot.total_capacity_ah(),
            cycles: snapshot.cycle_count,
            cell_voltages: snapshot.cells.iter().map(|c| c.volts()).collect(),
            cell_voltage_min: range.map(|(min, _)| f32::from(min) / 1000.0),
            cell_voltage_max: range.map(|(_, max)| f32::from(max) / 1000.0),
            cell_voltage_delta: snapshot.cell_voltage_delta(),
            temperatures: snapshot.temps.iter().map(|t| t.celsius()).collect(),
            average_temperature: snapshot.average_temperature(),
        }
    }
}

fn availability_name(availability: Availability) -> &'static str {
    match availability {
        Availability::Pending => "pending",
        Availability::Fresh => "fresh",
        Availability::Stale => "stale",
    }
}

fn publish_simple_format(publisher: &mqtt::MqttPublisher, topic: &str, val: &serde_json::Value) {
    match val {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                publish_simple_format(publisher, &format!("{topic}/{k}"), v);
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, v) in arr.iter().enumerate() {
                publish_simple_format(publisher, &format!("{topic}/{}", i + 1), v);
            }
        }
        serde_json::Value::String(s) => {
            if let Err(e) = publisher.publish(topic, s) {
                error!("Failed to publish message to topic {topic}: {e}");
            }
        }
        serde_json::Value::Number(n) => {
            if let Err(e) = publisher.publish(topic, &n.to_string()) {
                error!("Failed to publish message to topic {topic}: {e}");
            }
        }
        serde_json::Value::Bool(b) => {
            if let Err(e) = publisher.publish(topic, &b.to_string()) {
                error!("Failed to publish message to topic {topic}: {e}");
            }
        }
        serde_json::Value::Null => {
            // Do not publish null values
        }
    }
}

fn print_console(coordinator: &PollCoordinator<TcpConnector>, outcome: &CycleOutcome) {
    println!(
        "--- Pack {} at {} ({}) ---",
        coordinator.pack(),
        chrono::Local::now().to_rfc3339(),
        availability_name(coordinator.availability())
    );
    if let CycleOutcome::Failed(err) = outcome {
        println!("Poll failed: {err}");
    }
    if let Some(snapshot) = coordinator.current_snapshot() {
        println!("{:?}", PackReport::new(&snapshot));
    }
    if let Some(alarms) = coordinator.alarms() {
        println!("Alarms: {}", alarms.summary());
    }
    println!("--------------------------");
}

fn report_value(coordinator: &PollCoordinator<TcpConnector>) -> Result<serde_json::Value> {
    let mut data = serde_json::Map::new();
    data.insert(
        "timestamp".to_string(),
        json!(chrono::Utc::now().to_rfc3339()),
    );
    data.insert(
        "availability".to_string(),
        json!(availability_name(coordinator.availability())),
    );
    if let Some(reason) = coordinator.last_failure() {
        data.insert("last_failure".to_string(), json!(reason));
    }
    if let Some(shape) = coordinator.sensor_shape() {
        data.insert("shape".to_string(), shape_value(&shape));
    }
    if let Some(snapshot) = coordinator.current_snapshot() {
        data.insert(
            "analog".to_string(),
            serde_json::to_value(PackReport::new(&snapshot))?,
        );
    }
    if let Some(alarms) = coordinator.alarms() {
        let summary: AlarmSummary = alarms.summary();
        data.insert("alarms".to_string(), serde_json::to_value(summary)?);
    }
    Ok(serde_json::Value::Object(data))
}

fn shape_value(shape: &SensorShape) -> serde_json::Value {
    json!({
        "cells": shape.cells,
        "temperatures": shape.temperatures,
        "cell_unit": SensorShape::CELL_UNIT,
        "temperature_unit": SensorShape::TEMPERATURE_UNIT,
        "temperature_labels": (0..shape.temperatures)
            .map(SensorShape::temperature_label)
            .collect::<Vec<_>>(),
    })
}

fn publish_mqtt(
    coordinator: &PollCoordinator<TcpConnector>,
    publisher: &mqtt::MqttPublisher,
    format: &commandline::MqttFormat,
) {
    let value = match report_value(coordinator) {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to serialize pack {}: {e}", coordinator.pack());
            return;
        }
    };
    let topic = format!("{}/pack{}", publisher.topic(), coordinator.pack());
    match format {
        commandline::MqttFormat::Json => match serde_json::to_string(&value) {
            Ok(json_payload) => {
                if let Err(e) = publisher.publish(&topic, &json_payload) {
                    error!("Failed to publish data to MQTT: {e:?}");
                }
            }
            Err(e) => error!("Failed to serialize data to JSON string: {e}"),
        },
        commandline::MqttFormat::Simple => publish_simple_format(publisher, &topic, &value),
    }
}

pub async fn run(
    connector: TcpConnector,
    variant: Variant,
    packs: Vec<u8>,
    output: commandline::DaemonOutput,
    interval: std::time::Duration,
    fetch_alarms: bool,
) -> Result<()> {
    info!(
        "Starting daemon mode: output={output:?}, interval={interval:?}, packs={packs:?}, alarms={fetch_alarms}"
    );

    let mut mqtt_publisher: Option<Arc<mqtt::MqttPublisher>> = None;
    if let commandline::DaemonOutput::Mqtt { config_file, .. } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        let publisher =
            mqtt::MqttPublisher::new(config).with_context(|| "Failed to create MQTT publisher")?;
        mqtt_publisher = Some(Arc::new(publisher));
    }

    let mut tasks = tokio::task::JoinSet::new();
    for pack in packs {
        let mut coordinator = PollCoordinator::new(connector.clone(), pack, variant);
        coordinator.set_fetch_alarms(fetch_alarms);
        let output = output.clone();
        let publisher = mqtt_publisher.clone();
        tasks.spawn(async move {
            coordinator
                .run(interval, |coordinator, outcome| match &output {
                    commandline::DaemonOutput::Console => print_console(coordinator, outcome),
                    commandline::DaemonOutput::Mqtt { format, .. } => match &publisher {
                        Some(publisher) => publish_mqtt(coordinator, publisher, format),
                        None => warn!(
                            "MQTT output selected, but publisher is not initialized. Skipping publish."
                        ),
                    },
                })
                .await
        });
    }

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Cannot listen for ctrl-c")?;
    info!("Stopping daemon");
    tasks.abort_all();
    Ok(())
}
