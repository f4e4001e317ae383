use crate::analog::AnalogPayload;
use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// Frame layout: ~ VER ADR CID1 CID2 LENGTH INFO CHKSUM \r, everything between the markers ASCII hex
pub const START_BYTE: u8 = b'~';
pub const END_BYTE: u8 = b'\r';
pub const CID1_BATTERY: u8 = 0x46;
pub const VERSION_STANDARD: u8 = 0x20;
pub const VERSION_SOK: u8 = 0x25;
/// Broadcast address used for pack count, version and barcode queries.
pub const ADDRESS_BROADCAST: u8 = 0x00;

pub const DEFAULT_PORT: u16 = 1234;
/// Port used by SOK / RS485 TCP gateways that expose the binary protocol separately.
pub const ALTERNATE_BINARY_PORT: u16 = 8234;

const HEADER_CHARS: usize = 12;
const CHECKSUM_CHARS: usize = 4;
pub const MIN_FRAME_LENGTH: usize = 1 + HEADER_CHARS + CHECKSUM_CHARS + 1;
const LENID_MASK: u16 = 0x0FFF;
/// Largest INFO field in bytes the 12-bit LENID can describe.
pub const MAX_INFO_LENGTH: usize = LENID_MASK as usize / 2;

/// Number of bytes in front of the cell table of an analog response (info flag, pack id).
pub const ANALOG_PREFIX_LENGTH: usize = 2;
/// Number of bytes in front of the alarm data (pack id echo).
pub const ALARM_PREFIX_LENGTH: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    AnalogValues = 0x42,
    AlarmInfo = 0x44,
    PackCount = 0x90,
    VersionInfo = 0xC1,
    Barcode = 0xC2,
}

/// Hardware family, distinguished by the VER byte of responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Variant {
    #[default]
    Standard,
    Sok,
}

impl Variant {
    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            VERSION_STANDARD => Some(Variant::Standard),
            VERSION_SOK => Some(Variant::Sok),
            _ => None,
        }
    }

    pub fn manufacturer(&self) -> &'static str {
        match self {
            Variant::Standard => "Pylontech",
            Variant::Sok => "SOK",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Variant::Standard => write!(f, "standard"),
            Variant::Sok => write!(f, "sok"),
        }
    }
}

/// Return code carried in the CID2 field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Normal,
    VersionError,
    ChecksumError,
    LengthChecksumError,
    InvalidCommand,
    CommandFormatError,
    InvalidData,
    AddressError,
    CommunicationError,
    Other(u8),
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ResponseCode::Normal,
            0x01 => ResponseCode::VersionError,
            0x02 => ResponseCode::ChecksumError,
            0x03 => ResponseCode::LengthChecksumError,
            0x04 => ResponseCode::InvalidCommand,
            0x05 => ResponseCode::CommandFormatError,
            0x06 => ResponseCode::InvalidData,
            0x90 => ResponseCode::AddressError,
            0x91 => ResponseCode::CommunicationError,
            other => ResponseCode::Other(other),
        }
    }
}

impl ResponseCode {
    pub fn is_error(&self) -> bool {
        !matches!(self, ResponseCode::Normal | ResponseCode::Other(_))
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseCode::Normal => write!(f, "normal"),
            ResponseCode::VersionError => write!(f, "VER error"),
            ResponseCode::ChecksumError => write!(f, "CHKSUM error"),
            ResponseCode::LengthChecksumError => write!(f, "LCHKSUM error"),
            ResponseCode::InvalidCommand => write!(f, "CID2 invalid"),
            ResponseCode::CommandFormatError => write!(f, "command format error"),
            ResponseCode::InvalidData => write!(f, "invalid data"),
            ResponseCode::AddressError => write!(f, "ADR error"),
            ResponseCode::CommunicationError => write!(f, "internal communication error"),
            ResponseCode::Other(code) => write!(f, "unknown code {code:#04x}"),
        }
    }
}

/// Checksum over the ASCII body: two's complement of the byte sum, modulo 65536.
pub fn calc_checksum(body: &[u8]) -> u16 {
    let sum = body
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    (!sum).wrapping_add(1)
}

fn length_checksum(lenid: u16) -> u16 {
    if lenid == 0 {
        return 0;
    }
    let sum = (lenid & 0xF) + ((lenid >> 4) & 0xF) + ((lenid >> 8) & 0xF);
    (!sum).wrapping_add(1) & 0xF
}

/// Builds the LENGTH word: LCHKSUM in the high nibble, number of INFO characters below.
/// Only the low 12 bits of `info_chars` fit, [`Frame::new`] rejects longer payloads.
pub fn encode_length(info_chars: usize) -> u16 {
    let lenid = (info_chars as u16) & LENID_MASK;
    (length_checksum(lenid) << 12) | lenid
}

/// Decodes the LENGTH word. SOK packs send a plain length without LCHKSUM, which is tolerated.
pub fn decode_length(word: u16) -> usize {
    let lenid = word & LENID_MASK;
    if word >> 12 == length_checksum(lenid) {
        return usize::from(lenid);
    }
    log::trace!("Length checksum mismatch in {word:04X}, using plain length");
    if word <= LENID_MASK {
        usize::from(word)
    } else {
        usize::from(word & 0xFF)
    }
}

fn validate_len(buffer: &[u8], required: usize) -> std::result::Result<(), Error> {
    if buffer.len() < required {
        log::warn!(
            "Invalid buffer size - required={} received={}",
            required,
            buffer.len()
        );
        return Err(Error::Truncated {
            required,
            received: buffer.len(),
        });
    }
    Ok(())
}

/// The checksum characters must match the calculated value in the letter case of the body,
/// upper case unless the body itself is written in lower case.
fn validate_checksum(body: &[u8], checksum_chars: &[u8]) -> std::result::Result<u16, Error> {
    let calculated = calc_checksum(body);
    let expected = if body.iter().any(u8::is_ascii_lowercase) {
        format!("{calculated:04x}")
    } else {
        format!("{calculated:04X}")
    };
    if checksum_chars == expected.as_bytes() {
        return Ok(calculated);
    }
    let received = String::from_utf8_lossy(checksum_chars).into_owned();
    log::warn!(
        "Invalid checksum - calculated={:04X} received={} body={:02X?}",
        calculated,
        received,
        body
    );
    Err(Error::ChecksumMismatch {
        calculated,
        received,
    })
}

fn decode_hex(chars: &[u8], field: &str) -> std::result::Result<Vec<u8>, Error> {
    hex::decode(chars).map_err(|err| {
        Error::Malformed(format!(
            "{field} is not valid hex ({err}): {}",
            String::from_utf8_lossy(chars)
        ))
    })
}

/// One protocol frame. `address` is the device id, `command` the CID2 byte
/// (a return code in responses) and `payload` the hex-decoded INFO field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub address: u8,
    pub cid1: u8,
    pub command: u8,
    pub payload: Vec<u8>,
    pub checksum: u16,
}

impl Frame {
    /// Fails with [`Error::Oversized`] when the payload exceeds [`MAX_INFO_LENGTH`].
    pub fn new(
        version: u8,
        address: u8,
        cid1: u8,
        command: u8,
        payload: Vec<u8>,
    ) -> std::result::Result<Self, Error> {
        if payload.len() > MAX_INFO_LENGTH {
            log::warn!(
                "Info field too long - length={} max={}",
                payload.len(),
                MAX_INFO_LENGTH
            );
            return Err(Error::Oversized {
                limit: MAX_INFO_LENGTH,
            });
        }
        Ok(Self::build(version, address, cid1, command, payload))
    }

    fn build(version: u8, address: u8, cid1: u8, command: u8, payload: Vec<u8>) -> Self {
        let checksum = calc_checksum(&Self::ascii_body(version, address, cid1, command, &payload));
        Self {
            version,
            address,
            cid1,
            command,
            payload,
            checksum,
        }
    }

    /// Request frame as sent to the BMS. Requests always use VER 0x20, SOK packs included, and
    /// carry at most the pack id as INFO.
    pub fn request(address: u8, command: Command, pack: Option<u8>) -> Self {
        Self::build(
            VERSION_STANDARD,
            address,
            CID1_BATTERY,
            command as u8,
            pack.into_iter().collect(),
        )
    }

    fn ascii_body(version: u8, address: u8, cid1: u8, command: u8, payload: &[u8]) -> Vec<u8> {
        let info = hex::encode_upper(payload);
        let mut body = format!(
            "{version:02X}{address:02X}{cid1:02X}{command:02X}{:04X}",
            encode_length(info.len())
        )
        .into_bytes();
        body.extend_from_slice(info.as_bytes());
        body
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = Self::ascii_body(
            self.version,
            self.address,
            self.cid1,
            self.command,
            &self.payload,
        );
        let mut tx_buffer = Vec::with_capacity(body.len() + CHECKSUM_CHARS + 2);
        tx_buffer.push(START_BYTE);
        tx_buffer.extend_from_slice(&body);
        tx_buffer.extend_from_slice(format!("{:04X}", self.checksum).as_bytes());
        tx_buffer.push(END_BYTE);
        tx_buffer
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, Error> {
        validate_len(rx_buffer, MIN_FRAME_LENGTH)?;
        let last = rx_buffer.len() - 1;
        if rx_buffer[0] != START_BYTE {
            return Err(Error::Malformed(format!(
                "invalid start marker {:#04x}",
                rx_buffer[0]
            )));
        }
        if rx_buffer[last] != END_BYTE {
            return Err(Error::Malformed(format!(
                "invalid end marker {:#04x}",
                rx_buffer[last]
            )));
        }

        let content = &rx_buffer[1..last];
        let (body, checksum_chars) = content.split_at(content.len() - CHECKSUM_CHARS);
        let checksum = validate_checksum(body, checksum_chars)?;

        let header = decode_hex(&body[..HEADER_CHARS], "header")?;
        let info_chars = &body[HEADER_CHARS..];
        let declared = decode_length(u16::from_be_bytes([header[4], header[5]]));
        if declared != info_chars.len() {
            log::debug!(
                "Info length mismatch - declared={} received={}",
                declared,
                info_chars.len()
            );
        }
        let payload = decode_hex(info_chars, "info")?;
        log::trace!("Decoded frame payload: {}", hex::encode(&payload));

        Ok(Self {
            version: header[0],
            address: header[1],
            cid1: header[2],
            command: header[3],
            payload,
            checksum,
        })
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from(self.command)
    }
}

/// Checks the return code of a response, naming a variant mismatch when the VER byte gives one away.
pub fn check_response(
    frame: &Frame,
    command: Command,
    configured: Variant,
) -> std::result::Result<(), Error> {
    let code = frame.response_code();
    if code.is_error() {
        if let Some(reported) = Variant::from_version(frame.version) {
            if reported != configured {
                return Err(Error::VariantMismatch {
                    configured,
                    reported,
                    version: frame.version,
                });
            }
        }
        return Err(Error::Rejected {
            command: command as u8,
            code,
            version: frame.version,
        });
    }
    if let ResponseCode::Other(value) = code {
        log::debug!("Unknown return code {value:#04x} for command {command:?}, accepting");
    }
    Ok(())
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

pub struct PackCount;

impl PackCount {
    pub fn request() -> Vec<u8> {
        Frame::request(ADDRESS_BROADCAST, Command::PackCount, None).encode()
    }

    pub fn decode(frame: &Frame) -> std::result::Result<u8, Error> {
        frame.payload.first().copied().ok_or(Error::BoundsFailure {
            offset: 0,
            len: 1,
            available: 0,
        })
    }
}

pub struct VersionInfo;

impl VersionInfo {
    const SOK_LENGTH: usize = 20;

    pub fn request(pack: u8) -> Vec<u8> {
        Frame::request(ADDRESS_BROADCAST, Command::VersionInfo, Some(pack)).encode()
    }

    pub fn decode(frame: &Frame, variant: Variant) -> std::result::Result<String, Error> {
        if frame.payload.is_empty() {
            return Err(Error::Malformed("empty version info".into()));
        }
        let raw = match variant {
            Variant::Sok => &frame.payload[..frame.payload.len().min(Self::SOK_LENGTH)],
            Variant::Standard => match frame.payload.iter().position(|b| *b == 0) {
                Some(end) => &frame.payload[..end],
                None => &frame.payload[..],
            },
        };
        Ok(ascii_field(raw))
    }
}

pub struct Barcode;

impl Barcode {
    const LENGTH: usize = 15;

    pub fn request(pack: u8) -> Vec<u8> {
        Frame::request(ADDRESS_BROADCAST, Command::Barcode, Some(pack)).encode()
    }

    pub fn decode(frame: &Frame) -> std::result::Result<String, Error> {
        if frame.payload.is_empty() {
            return Err(Error::Malformed("empty barcode".into()));
        }
        Ok(ascii_field(
            &frame.payload[..frame.payload.len().min(Self::LENGTH)],
        ))
    }
}

pub struct AnalogValues;

impl AnalogValues {
    pub fn request(pack: u8) -> Vec<u8> {
        Frame::request(pack, Command::AnalogValues, Some(pack)).encode()
    }

    /// Hands the INFO field to the analog decoder, past the info flag and pack id.
    pub fn payload(frame: Frame) -> std::result::Result<AnalogPayload, Error> {
        log::debug!(
            "Raw analog response ({} bytes): {}",
            frame.payload.len(),
            hex::encode(&frame.payload)
        );
        AnalogPayload::new(frame.payload, ANALOG_PREFIX_LENGTH)
    }
}

pub struct AlarmInfo;

impl AlarmInfo {
    /// Responses shorter than this come from packs that do not implement the command.
    pub const MIN_RESPONSE_LENGTH: usize = 22;

    pub fn request(pack: u8) -> Vec<u8> {
        Frame::request(pack, Command::AlarmInfo, Some(pack)).encode()
    }

    pub fn decode(
        frame: &Frame,
    ) -> std::result::Result<Option<crate::alarm::AlarmStatus>, Error> {
        if frame.payload.len() < Self::MIN_RESPONSE_LENGTH {
            log::debug!(
                "Alarm info response too short - required={} received={}, command may not be supported",
                Self::MIN_RESPONSE_LENGTH,
                frame.payload.len()
            );
            return Ok(None);
        }
        crate::alarm::AlarmStatus::decode(&frame.payload[ALARM_PREFIX_LENGTH..]).map(Some)
    }
}
