//! Builders for synthetic analog payloads and response frames.
#![allow(dead_code)]

use pylonbms_lib::protocol::{Frame, CID1_BATTERY, VERSION_STANDARD};

pub const VOLTAGE_SCENARIO: [u16; 16] = [
    3291, 3290, 3290, 3290, 3291, 3290, 3290, 3289, 3290, 3290, 3291, 3290, 3290, 3290, 3290, 3291,
];
pub const TEMPERATURES: [u16; 6] = [2981, 2981, 2991, 2981, 2971, 2961];

#[derive(Debug, Clone, Copy)]
pub struct Scalars {
    pub current: i16,
    pub voltage: u16,
    pub remaining: u16,
    pub cycles: u8,
    pub total: u16,
}

impl Default for Scalars {
    fn default() -> Self {
        Self {
            current: -215,
            voltage: 52640,
            remaining: 7400,
            cycles: 42,
            total: 10000,
        }
    }
}

impl Scalars {
    pub fn bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(self.current.to_le_bytes());
        data.extend(self.voltage.to_le_bytes());
        data.extend(self.remaining.to_le_bytes());
        data.extend([0xFF, 0xFF, 0x00, 0x00]);
        data.push(self.cycles);
        data.extend(self.total.to_le_bytes());
        data
    }
}

pub fn readings(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Count byte followed by the readings.
pub fn table(values: &[u16]) -> Vec<u8> {
    let mut data = vec![values.len() as u8];
    data.extend(readings(values));
    data
}

/// Decoder window: `header` bytes, cell table, temperature table, scalars.
pub fn window(header: &[u8], cells: &[u16], temps: &[u16], scalars: Scalars) -> Vec<u8> {
    let mut data = header.to_vec();
    data.extend(table(cells));
    data.extend(table(temps));
    data.extend(scalars.bytes());
    data
}

pub fn scenario_window() -> Vec<u8> {
    window(&[], &VOLTAGE_SCENARIO, &TEMPERATURES, Scalars::default())
}

/// Encoded analog response of `pack` carrying `window` behind the info flag and pack id.
pub fn analog_response(pack: u8, window: &[u8]) -> Vec<u8> {
    let mut info = vec![0x00, pack];
    info.extend_from_slice(window);
    Frame::new(VERSION_STANDARD, pack, CID1_BATTERY, 0x00, info).unwrap().encode()
}

pub fn response(code: u8, info: Vec<u8>) -> Vec<u8> {
    Frame::new(VERSION_STANDARD, 0x01, CID1_BATTERY, code, info).unwrap().encode()
}

/// Alarm info of pack 1 with 16 cells, both MOS on and nothing else set.
pub fn alarm_info() -> Vec<u8> {
    // pack id, modules, cell count, cell states, temperature states, status bytes, unused, alarm
    let mut info = vec![0x01, 0x01, 0x10];
    info.extend([0x00; 16]);
    info.extend([0x00; 6]);
    info.extend([0x00, 0x00, 0x00, 0x00, 0x03, 0x00]);
    info.extend([0x00; 2]);
    info.extend([0x00; 2]);
    info
}
