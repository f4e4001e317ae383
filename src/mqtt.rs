use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MqttConfig {
    host: String,
    #[serde(default = "MqttConfig::default_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: u8,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(default)]
    retain: bool,
    #[serde(
        default = "MqttConfig::default_keep_alive_interval",
        with = "humantime_serde"
    )]
    keep_alive_interval: Duration,
    #[serde(
        default = "MqttConfig::default_reconnect_interval",
        with = "humantime_serde"
    )]
    reconnect_interval: Duration,
}

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_topic() -> String {
        "pylonbms".into()
    }

    fn default_qos() -> u8 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distr::Alphanumeric;
        use rand::Rng;

        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("pylonbms-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_reconnect_interval() -> Duration {
        Duration::from_secs(5)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        config.qos()?;
        Ok(config)
    }

    fn qos(&self) -> Result<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => bail!("Invalid MQTT QoS {other}, expected 0, 1 or 2"),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(self.keep_alive_interval)
            .set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Publishes to the broker; the connection is driven by a background task that reconnects.
pub struct MqttPublisher {
    client: AsyncClient,
    config: MqttConfig,
    qos: QoS,
}

impl MqttPublisher {
    /// Must be called from within a tokio runtime.
    pub fn new(config: MqttConfig) -> Result<Self> {
        let qos = config.qos()?;
        log::info!(
            "Connecting to MQTT broker: {}:{} with client_id: {}",
            config.host,
            config.port,
            config.client_id
        );
        let (client, mut eventloop) = AsyncClient::new(config.options(), 64);
        let reconnect_interval = config.reconnect_interval;
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        log::info!("Connected to MQTT broker.")
                    }
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("MQTT connection error: {err}, retrying in {reconnect_interval:?}");
                        tokio::time::sleep(reconnect_interval).await;
                    }
                }
            }
        });
        Ok(Self {
            client,
            config,
            qos,
        })
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Queues a message without waiting; fails if the outgoing queue is full.
    pub fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        log::debug!(
            "Publishing to MQTT: Topic='{}', Payload='{payload}', QoS={}",
            topic,
            self.config.qos
        );
        self.client
            .try_publish(topic, self.qos, self.config.retain, payload.as_bytes().to_vec())
            .with_context(|| format!("Failed to publish message to MQTT topic: {topic}"))?;
        Ok(())
    }
}
