use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pylonbms_lib::analog::{PackSnapshot, SensorShape};
use pylonbms_lib::client::PylonBms;
use pylonbms_lib::transport::TcpConnector;
use pylonbms_lib::Error;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands, PackSelection};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_snapshot(snapshot: &PackSnapshot) {
    println!(
        "Pack: {:.3} V, {:.2} A, {:.1} W, SOC {}%, {:.2}/{:.2} Ah, {} cycles",
        snapshot.pack_voltage_v(),
        snapshot.pack_current_a(),
        snapshot.power_w(),
        snapshot.state_of_charge,
        snapshot.remaining_capacity_ah(),
        snapshot.total_capacity_ah(),
        snapshot.cycle_count
    );
    for cell in &snapshot.cells {
        println!(
            "  {:<12} {:>5} {}",
            SensorShape::cell_label(cell.index),
            cell.millivolts,
            SensorShape::CELL_UNIT
        );
    }
    if let Some((min, max)) = snapshot.cell_voltage_range() {
        println!("  min {min} mV, max {max} mV, delta {} mV", max - min);
    }
    for temperature in &snapshot.temps {
        println!(
            "  {:<12} {:>5.1} °C",
            SensorShape::temperature_label(temperature.index),
            temperature.celsius()
        );
    }
}

macro_rules! print_device_info {
    ($bms:expr) => {
        println!("Device info: {:?}", $bms.get_device_info().await)
    };
}
macro_rules! print_pack_count {
    ($bms:expr) => {
        println!(
            "Pack count: {}",
            $bms.get_pack_count()
                .await
                .with_context(|| "Cannot get pack count")?
        )
    };
}
macro_rules! print_analog {
    ($bms:expr, $pack:expr) => {
        match $bms.get_analog_values($pack).await {
            Ok(snapshot) => print_snapshot(&snapshot),
            Err(Error::StructuralAmbiguity(ambiguity)) => {
                warn!("No confident layout, values below are provisional: {ambiguity}");
                print_snapshot(&ambiguity.provisional);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Cannot get analog values of pack {}", $pack))
            }
        }
    };
}
macro_rules! print_alarms {
    ($bms:expr, $pack:expr) => {
        match $bms
            .get_alarm_info($pack)
            .await
            .with_context(|| format!("Cannot get alarm info of pack {}", $pack))?
        {
            Some(alarms) => println!("Alarms: {}", alarms.summary()),
            None => println!("Alarms: not supported by this BMS"),
        }
    };
}

async fn execute(args: CliArgs) -> Result<()> {
    let mut connector = TcpConnector::new(args.host.as_str(), args.port);
    connector.set_connect_timeout(args.connect_timeout);
    connector.set_read_timeout(args.timeout);
    let bms = PylonBms::new(connector.clone(), args.variant.into());

    match args.command {
        CliCommands::Info => print_device_info!(bms),
        CliCommands::PackCount => print_pack_count!(bms),
        CliCommands::Analog => print_analog!(bms, args.pack),
        CliCommands::Alarms => print_alarms!(bms, args.pack),
        CliCommands::All => {
            print_device_info!(bms);
            print_analog!(bms, args.pack);
            print_alarms!(bms, args.pack);
        }
        CliCommands::Console { command } => {
            let command = command.join(" ");
            for line in bms
                .console(&command)
                .await
                .with_context(|| format!("Console command {command:?} failed"))?
            {
                println!("{line}");
            }
        }
        CliCommands::Daemon {
            output,
            interval,
            packs,
            alarms,
        } => {
            let packs = match packs {
                PackSelection::All => {
                    let pack_count = bms.get_pack_count().await.unwrap_or_else(|err| {
                        warn!("Cannot get pack count, assuming 1: {err}");
                        1
                    });
                    packs.resolve(pack_count)
                }
                PackSelection::List(packs) => packs,
            };
            daemon::run(
                connector,
                args.variant.into(),
                packs,
                output,
                interval,
                alarms,
            )
            .await?
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| "Cannot create tokio runtime")?;
    runtime.block_on(execute(args))
}
