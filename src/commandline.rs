use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use pylonbms_lib::protocol;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show manufacturer, firmware version, barcode and number of packs
    Info,
    /// Show the number of packs behind the gateway
    PackCount,
    /// Show cell voltages, temperatures, pack voltage/current, SOC, capacity and cycles of a pack
    Analog,
    /// Show protection, system, fault and alarm status of a pack
    Alarms,
    /// Show all available BMS information by running all read commands
    All,
    /// Run a command on the text console (e.g. "pwr", "bat 1", "info")
    Console {
        /// The console command and its arguments
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Run in daemon mode, periodically polling the packs and outputting their data
    Daemon {
        /// Output destination for pack data
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between poll cycles (e.g., "30s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "30s")]
        interval: Duration,
        /// Packs to poll, "all" or a comma-separated list of pack numbers (e.g. "1,2")
        #[clap(long, short, value_parser = parse_packs, default_value = "all")]
        packs: PackSelection,
        /// Also poll the alarm information of every pack
        #[clap(long, short, action)]
        alarms: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PackSelection {
    /// Every pack reported by the pack count query.
    All,
    List(Vec<u8>),
}

impl PackSelection {
    pub fn resolve(&self, pack_count: u8) -> Vec<u8> {
        match self {
            PackSelection::All => (1..=pack_count.max(1)).collect(),
            PackSelection::List(packs) => packs.clone(),
        }
    }
}

fn parse_packs(value: &str) -> Result<PackSelection, String> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(PackSelection::All);
    }
    let mut packs = Vec::new();
    for item in value.split(',') {
        let pack = item
            .trim()
            .parse::<u8>()
            .map_err(|err| format!("invalid pack number {item:?}: {err}"))?;
        if pack == 0 {
            return Err("pack numbers start at 1".into());
        }
        if !packs.contains(&pack) {
            packs.push(pack);
        }
    }
    Ok(PackSelection::List(packs))
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum VariantArg {
    /// Pylontech and compatible packs (VER 0x20)
    Standard,
    /// SOK packs (VER 0x25)
    Sok,
}

impl From<VariantArg> for protocol::Variant {
    fn from(value: VariantArg) -> Self {
        match value {
            VariantArg::Standard => protocol::Variant::Standard,
            VariantArg::Sok => protocol::Variant::Sok,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously poll and print the pack data to the standard output (console).
    Console,
    /// Continuously poll and publish the pack data to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "pylontech / sok bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Host name or IP address of the serial-to-TCP gateway
    #[arg(long)]
    pub host: String,

    /// TCP port of the gateway (SOK gateways often use 8234)
    #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
    pub port: u16,

    /// Hardware variant of the BMS
    #[arg(long, value_enum, default_value_t = VariantArg::Standard)]
    pub variant: VariantArg,

    /// Pack number used by the analog and alarms commands
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..))]
    pub pack: u8,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for establishing the TCP connection (e.g., "5s", "500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "5s")]
    pub connect_timeout: Duration,

    /// Timeout for each read from the gateway (e.g., "5s", "10s")
    /// (SOK packs may take longer to send the first byte)
    #[arg(value_parser = humantime::parse_duration, long, default_value = "5s")]
    pub timeout: Duration,
}
