//! Asynchronous one-shot client for Pylontech / SOK battery management systems reached through a
//! TCP gateway.
//!
//! Every request opens its own connection, which is closed again before the call returns.
//! No retries are done here; callers polling on a fixed cadence simply try again next time.
//!
//! # Example
//!
//! ```no_run
//! use pylonbms_lib::client::PylonBms;
//! use pylonbms_lib::protocol::Variant;
//! use pylonbms_lib::transport::TcpConnector;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), pylonbms_lib::Error> {
//!     let bms = PylonBms::new(TcpConnector::new("192.168.1.50", 8234), Variant::Sok);
//!
//!     let info = bms.get_device_info().await;
//!     println!("{} {} ({} packs)", info.manufacturer, info.barcode, info.pack_count);
//!
//!     let snapshot = bms.get_analog_values(1).await?;
//!     println!("SOC: {}%", snapshot.state_of_charge);
//!     Ok(())
//! }
//! ```

use crate::alarm::AlarmStatus;
use crate::analog::{decode_analog, PackSnapshot};
use crate::protocol::*;
use crate::transport::{console_exec, Connection, Connector, TcpConnector, Terminator};
use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

type Result<T> = std::result::Result<T, Error>;

/// Static information about the BMS.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub barcode: String,
    pub firmware_version: String,
    pub variant: Variant,
    pub pack_count: u8,
}

/// Sends one binary request on `connection` and returns the validated response frame.
///
/// # Arguments
///
/// * `connection`: An open connection to the BMS.
/// * `request`: The encoded request frame.
/// * `command`: The command of the request, used for error reporting.
/// * `variant`: The configured hardware variant.
///
/// # Returns
///
/// The decoded frame, or an `Error` if the exchange fails, the envelope is invalid or the BMS
/// answered with an error return code.
pub async fn transact<T: Connection + ?Sized>(
    connection: &mut T,
    request: &[u8],
    command: Command,
    variant: Variant,
) -> Result<Frame> {
    let raw = connection.exchange(request, Terminator::FRAME).await?;
    let frame = Frame::decode(&raw)?;
    check_response(&frame, command, variant)?;
    Ok(frame)
}

/// The main struct for interacting with one BMS.
#[derive(Debug, Clone)]
pub struct PylonBms<C: Connector = TcpConnector> {
    connector: C,
    variant: Variant,
}

impl<C: Connector> PylonBms<C> {
    /// Creates a client using `connector` for every request.
    ///
    /// # Arguments
    ///
    /// * `connector`: Opens the connections, usually a [`TcpConnector`].
    /// * `variant`: The hardware variant the BMS is expected to be.
    pub fn new(connector: C, variant: Variant) -> Self {
        Self { connector, variant }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    async fn request(&self, request: &[u8], command: Command) -> Result<Frame> {
        let mut connection = self.connector.connect().await?;
        transact(&mut connection, request, command, self.variant).await
    }

    /// Retrieves the number of packs behind the gateway.
    pub async fn get_pack_count(&self) -> Result<u8> {
        log::trace!("get pack count");
        PackCount::decode(&self.request(&PackCount::request(), Command::PackCount).await?)
    }

    /// Retrieves the firmware version string of `pack`.
    pub async fn get_version_info(&self, pack: u8) -> Result<String> {
        log::trace!("get version info pack={pack}");
        let frame = self
            .request(&VersionInfo::request(pack), Command::VersionInfo)
            .await?;
        VersionInfo::decode(&frame, self.variant)
    }

    /// Retrieves the barcode (serial number) of `pack`.
    pub async fn get_barcode(&self, pack: u8) -> Result<String> {
        log::trace!("get barcode pack={pack}");
        Barcode::decode(&self.request(&Barcode::request(pack), Command::Barcode).await?)
    }

    /// Retrieves and decodes the analog values of `pack`.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `PackSnapshot`, or an `Error`. A payload whose layout can not be
    /// recovered fails with `Error::StructuralAmbiguity` carrying a provisional snapshot.
    pub async fn get_analog_values(&self, pack: u8) -> Result<PackSnapshot> {
        log::trace!("get analog values pack={pack}");
        let frame = self
            .request(&AnalogValues::request(pack), Command::AnalogValues)
            .await?;
        decode_analog(AnalogValues::payload(frame)?.window())
    }

    /// Retrieves the alarm information of `pack`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the BMS does not implement the command.
    pub async fn get_alarm_info(&self, pack: u8) -> Result<Option<AlarmStatus>> {
        log::trace!("get alarm info pack={pack}");
        AlarmInfo::decode(&self.request(&AlarmInfo::request(pack), Command::AlarmInfo).await?)
    }

    /// Collects device information, falling back to placeholders for values the BMS does not
    /// provide. SOK packs answer neither version nor barcode queries on some firmware.
    pub async fn get_device_info(&self) -> DeviceInfo {
        let pack_count = self.get_pack_count().await.unwrap_or_else(|err| {
            log::debug!("Could not retrieve pack count, assuming 1: {err}");
            1
        });
        let firmware_version = self.get_version_info(1).await.unwrap_or_else(|err| {
            log::warn!("Could not retrieve version info: {err}");
            "Unknown".to_string()
        });
        let barcode = self.get_barcode(1).await.unwrap_or_else(|err| {
            log::warn!("Could not retrieve barcode: {err}");
            format!("{}_BMS", self.variant.to_string().to_uppercase())
        });
        DeviceInfo {
            manufacturer: self.variant.manufacturer().to_string(),
            model: format!("BMS ({})", self.variant),
            barcode,
            firmware_version,
            variant: self.variant,
            pack_count,
        }
    }

    /// Runs a console command and returns the output lines.
    pub async fn console(&self, command: &str) -> Result<Vec<String>> {
        log::trace!("console command {command:?}");
        let mut connection = self.connector.connect().await?;
        console_exec(&mut connection, command).await
    }
}
