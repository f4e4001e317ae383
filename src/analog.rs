//! Decoder for the analog values response (command 0x42).
//!
//! The payload is a cell table, a temperature table and a block of pack scalars:
//!
//! ```text
//! [status bytes?] cells:u8 mV:u16le * cells  temps:u8 dK:u16le * temps  scalars
//! ```
//!
//! Firmware revisions differ in how many status bytes precede the cell table, and the count
//! bytes can not be trusted on their own (a pack reporting 217 cells has been observed). The
//! tables are therefore located by physical plausibility: a hypothesis is only accepted when
//! the readings it implies are valid voltages or temperatures. See [`TableSpec::search`].
//!
//! # Example
//!
//! ```
//! use pylonbms_lib::analog::decode_analog;
//!
//! let mut payload = vec![8u8];
//! for _ in 0..8 {
//!     payload.extend_from_slice(&3300u16.to_le_bytes());
//! }
//! payload.push(2);
//! payload.extend_from_slice(&2981u16.to_le_bytes());
//! payload.extend_from_slice(&2991u16.to_le_bytes());
//! payload.extend_from_slice(&(-150i16).to_le_bytes()); // current, 10 mA
//! payload.extend_from_slice(&26400u16.to_le_bytes()); // pack voltage, mV
//! payload.extend_from_slice(&5000u16.to_le_bytes()); // remaining, 10 mAh
//! payload.extend_from_slice(&[0, 0, 0, 0]);
//! payload.push(42); // cycles
//! payload.extend_from_slice(&10000u16.to_le_bytes()); // total, 10 mAh
//!
//! let snapshot = decode_analog(&payload).unwrap();
//! assert_eq!(snapshot.cells.len(), 8);
//! assert_eq!(snapshot.temps.len(), 2);
//! assert_eq!(snapshot.state_of_charge, 50);
//! assert_eq!(snapshot.cycle_count, 42);
//! ```

use crate::Error;
use std::borrow::Cow;
use std::fmt;
use std::ops::RangeInclusive;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of leading bytes the structure search considers as count byte.
pub const SEARCH_WINDOW: usize = 10;

/// Reserved bytes between remaining capacity and cycle count.
const RESERVED_LENGTH: usize = 4;

/// Calibrated constants describing one reading table. They are tuned against captures of real
/// packs, not taken from a protocol document.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: &'static str,
    /// Count byte values considered plausible.
    pub counts: RangeInclusive<u8>,
    /// Raw reading values considered physically valid.
    pub valid: RangeInclusive<u16>,
    /// Shortest run of valid readings the fallback accepts.
    pub min_run: usize,
    pub default_offset: usize,
    pub default_count: usize,
}

pub const CELL_TABLE: TableSpec = TableSpec {
    name: "cell",
    counts: 8..=24,
    valid: 2000..=4500,
    min_run: 8,
    default_offset: 1,
    default_count: 16,
};

pub const TEMPERATURE_TABLE: TableSpec = TableSpec {
    name: "temperature",
    counts: 1..=32,
    valid: 2530..=3530,
    min_run: 1,
    default_offset: 1,
    default_count: 6,
};

/// Outcome of a table search. Offsets point at the first reading, relative to the searched region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TableMatch {
    /// A count byte whose readings all validated.
    Matched { offset: usize, count: usize },
    /// No count byte validated; longest run of valid readings.
    BestEffort { offset: usize, count: usize },
    /// Nothing validated; the table's default layout is assumed.
    Default,
}

impl TableMatch {
    pub fn layout(&self, spec: &TableSpec) -> (usize, usize) {
        match *self {
            TableMatch::Matched { offset, count } | TableMatch::BestEffort { offset, count } => {
                (offset, count)
            }
            TableMatch::Default => (spec.default_offset, spec.default_count),
        }
    }

    pub fn is_confident(&self) -> bool {
        !matches!(self, TableMatch::Default)
    }
}

fn read_u16_le(region: &[u8], at: usize) -> Option<u16> {
    region
        .get(at..at + 2)
        .map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]))
}

impl TableSpec {
    fn valid_at(&self, region: &[u8], at: usize) -> bool {
        read_u16_le(region, at).is_some_and(|value| self.valid.contains(&value))
    }

    /// Locates the table at the start of `region`.
    ///
    /// 1. Structure search: every byte within [`SEARCH_WINDOW`] holding a plausible count is
    ///    tried as count byte; the first one whose readings all validate wins.
    /// 2. Fallback: the start offset `1..=SEARCH_WINDOW` with the longest run of valid readings,
    ///    earliest offset on ties, if the run reaches `min_run`.
    /// 3. [`TableMatch::Default`] otherwise.
    ///
    /// With `expected` set, the structure search first tries only that count.
    pub fn search(&self, region: &[u8], expected: Option<usize>) -> TableMatch {
        self.search_traced(region, expected).0
    }

    /// [`search`](Self::search) that also reports the hypotheses it rejected on the way.
    pub fn search_traced(&self, region: &[u8], expected: Option<usize>) -> (TableMatch, SearchTrace) {
        if let Some(expected) = expected {
            if let Some(found) =
                self.structure_search(region, |count| count == expected, &mut Vec::new())
            {
                return (found, SearchTrace::default());
            }
            log::debug!("{} table: expected count {expected} not found", self.name);
        }
        let mut trace = SearchTrace::default();
        if let Some(found) = self.structure_search(region, |_| true, &mut trace.rejected) {
            return (found, trace);
        }
        trace.best_run = self.longest_run(region);
        let found = match trace.best_run {
            Some((offset, count)) if count >= self.min_run => {
                log::warn!(
                    "{} table count byte unreliable, using longest valid run offset={} count={}",
                    self.name,
                    offset,
                    count
                );
                TableMatch::BestEffort { offset, count }
            }
            _ => TableMatch::Default,
        };
        (found, trace)
    }

    fn structure_search(
        &self,
        region: &[u8],
        accept: impl Fn(usize) -> bool,
        rejected: &mut Vec<Rejected>,
    ) -> Option<TableMatch> {
        for (position, &candidate) in region.iter().take(SEARCH_WINDOW).enumerate() {
            let count = usize::from(candidate);
            if !accept(count) {
                continue;
            }
            let reason = if !self.counts.contains(&candidate) {
                RejectReason::ImplausibleCount
            } else {
                let offset = position + 1;
                match (0..count).find(|n| !self.valid_at(region, offset + 2 * n)) {
                    None => return Some(TableMatch::Matched { offset, count }),
                    Some(index) => RejectReason::InvalidReading { index },
                }
            };
            let hypothesis = Rejected {
                position,
                count,
                reason,
            };
            log::debug!("{} table: rejected {hypothesis}", self.name);
            rejected.push(hypothesis);
        }
        None
    }

    fn run_length(&self, region: &[u8], offset: usize) -> usize {
        (0..usize::from(*self.counts.end()))
            .take_while(|n| self.valid_at(region, offset + 2 * n))
            .count()
    }

    /// Longest run of valid readings as `(offset, length)`, `None` without any valid reading.
    fn longest_run(&self, region: &[u8]) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for offset in 1..=SEARCH_WINDOW {
            let run = self.run_length(region, offset);
            if run > best.map_or(0, |(_, longest)| longest) {
                best = Some((offset, run));
            }
        }
        best
    }
}

/// Why a count byte hypothesis was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RejectReason {
    /// The byte lies outside the table's plausible counts.
    ImplausibleCount,
    /// Reading `index` of the implied table is missing or out of range.
    InvalidReading { index: usize },
}

/// A count byte tried by the structure search and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rejected {
    pub position: usize,
    pub count: usize,
    pub reason: RejectReason,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "position={} count={}", self.position, self.count)?;
        match self.reason {
            RejectReason::ImplausibleCount => write!(f, " (implausible count)"),
            RejectReason::InvalidReading { index } => write!(f, " (reading {index} invalid)"),
        }
    }
}

/// What a table search tried before settling on its result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchTrace {
    pub rejected: Vec<Rejected>,
    /// Longest run of valid readings as `(offset, length)`, also when below `min_run`.
    pub best_run: Option<(usize, usize)>,
}

impl fmt::Display for SearchTrace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rejected=[")?;
        for (n, rejected) in self.rejected.iter().enumerate() {
            if n > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{rejected}")?;
        }
        write!(f, "]")?;
        match self.best_run {
            Some((offset, run)) => write!(f, " best_run=offset {offset} length {run}"),
            None => write!(f, " best_run=none"),
        }
    }
}

/// Bounds-checked little-endian reader over one payload.
struct Cursor<'a> {
    buf: &'a [u8],
    idx: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, idx: 0 }
    }

    fn position(&self) -> usize {
        self.idx
    }

    fn seek(&mut self, idx: usize) {
        self.idx = idx;
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.idx.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let bytes = &self.buf[self.idx..end];
                self.idx = end;
                Ok(bytes)
            }
            None => Err(Error::BoundsFailure {
                offset: self.idx,
                len,
                available: self.buf.len(),
            }),
        }
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16, Error> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn i16_le(&mut self) -> Result<i16, Error> {
        let bytes = self.take(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn rest(&self) -> &'a [u8] {
        self.buf.get(self.idx..).unwrap_or(&[])
    }
}

/// INFO field of an analog response plus the offset where the decodable window starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalogPayload {
    info: Vec<u8>,
    offset: usize,
}

impl AnalogPayload {
    pub fn new(info: Vec<u8>, offset: usize) -> Result<Self, Error> {
        if info.len() < offset {
            return Err(Error::BoundsFailure {
                offset: 0,
                len: offset,
                available: info.len(),
            });
        }
        Ok(Self { info, offset })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn window(&self) -> &[u8] {
        &self.info[self.offset..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellReading {
    pub index: usize,
    pub millivolts: u16,
}

impl CellReading {
    pub fn volts(&self) -> f32 {
        f32::from(self.millivolts) / 1000.0
    }

    pub fn is_valid(&self) -> bool {
        CELL_TABLE.valid.contains(&self.millivolts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TemperatureReading {
    pub index: usize,
    pub decikelvin: u16,
}

impl TemperatureReading {
    pub fn celsius(&self) -> f32 {
        f32::from(self.decikelvin) / 10.0 - 273.15
    }

    pub fn is_valid(&self) -> bool {
        TEMPERATURE_TABLE.valid.contains(&self.decikelvin)
    }
}

/// One decoded analog response. Raw integer units keep re-decoding bit-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PackSnapshot {
    pub cells: Vec<CellReading>,
    pub temps: Vec<TemperatureReading>,
    /// mV
    pub pack_voltage: u16,
    /// 10 mA, negative while discharging
    pub pack_current: i16,
    /// 10 mAh
    pub remaining_capacity: u16,
    /// 10 mAh
    pub total_capacity: u16,
    /// percent, 0..=100
    pub state_of_charge: u8,
    pub cycle_count: u16,
}

impl PackSnapshot {
    pub fn pack_voltage_v(&self) -> f32 {
        f32::from(self.pack_voltage) / 1000.0
    }

    pub fn pack_current_a(&self) -> f32 {
        f32::from(self.pack_current) / 100.0
    }

    pub fn remaining_capacity_ah(&self) -> f32 {
        f32::from(self.remaining_capacity) / 100.0
    }

    pub fn total_capacity_ah(&self) -> f32 {
        f32::from(self.total_capacity) / 100.0
    }

    pub fn power_w(&self) -> f32 {
        self.pack_voltage_v() * self.pack_current_a()
    }

    /// Lowest and highest cell voltage in mV.
    pub fn cell_voltage_range(&self) -> Option<(u16, u16)> {
        let min = self.cells.iter().map(|c| c.millivolts).min()?;
        let max = self.cells.iter().map(|c| c.millivolts).max()?;
        Some((min, max))
    }

    pub fn cell_voltage_delta(&self) -> Option<u16> {
        self.cell_voltage_range().map(|(min, max)| max - min)
    }

    pub fn average_temperature(&self) -> Option<f32> {
        if self.temps.is_empty() {
            return None;
        }
        let sum: f32 = self.temps.iter().map(TemperatureReading::celsius).sum();
        Some(sum / self.temps.len() as f32)
    }

    pub fn shape(&self) -> SensorShape {
        SensorShape {
            cells: self.cells.len(),
            temperatures: self.temps.len(),
        }
    }
}

/// Sensor layout of one pack, the stable descriptor presentation layers build their entities from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorShape {
    pub cells: usize,
    pub temperatures: usize,
}

impl SensorShape {
    pub const CELL_UNIT: &'static str = "mV";
    pub const TEMPERATURE_UNIT: &'static str = "dK";

    pub fn cell_label(index: usize) -> String {
        format!("cell {}", index + 1)
    }

    /// The first six sensors have fixed positions on Pylontech / SOK boards.
    pub fn temperature_label(index: usize) -> Cow<'static, str> {
        match index {
            0 => "cells 1-4".into(),
            1 => "cells 5-8".into(),
            2 => "cells 9-12".into(),
            3 => "cells 13-16".into(),
            4 => "MOS".into(),
            5 => "environment".into(),
            n => format!("sensor {n}").into(),
        }
    }
}

impl fmt::Display for SensorShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} cells, {} temperature sensors",
            self.cells, self.temperatures
        )
    }
}

/// Diagnostic of a decode that found no confident layout, with a provisional snapshot read
/// from the default layout. The provisional snapshot must not be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    pub raw: Vec<u8>,
    pub cells: TableMatch,
    pub cell_search: SearchTrace,
    pub temperatures: TableMatch,
    pub temperature_search: SearchTrace,
    pub provisional: PackSnapshot,
}

impl Ambiguity {
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

impl fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cells={:?} {} temperatures={:?} {} raw={}",
            self.cells,
            self.cell_search,
            self.temperatures,
            self.temperature_search,
            self.raw_hex()
        )
    }
}

/// Successful decode together with how each table was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub snapshot: PackSnapshot,
    pub cells: TableMatch,
    pub temperatures: TableMatch,
}

impl Decoded {
    pub fn is_best_effort(&self) -> bool {
        matches!(self.cells, TableMatch::BestEffort { .. })
            || matches!(self.temperatures, TableMatch::BestEffort { .. })
    }
}

fn state_of_charge(remaining: u16, total: u16) -> u8 {
    if total == 0 {
        return 0;
    }
    (u32::from(remaining) * 100 / u32::from(total)).min(100) as u8
}

#[derive(Debug, Clone, Default)]
pub struct AnalogDecoder {
    expected: Option<SensorShape>,
}

impl AnalogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that tries a previously discovered shape before the full search.
    pub fn with_expected(shape: SensorShape) -> Self {
        Self {
            expected: Some(shape),
        }
    }

    pub fn decode(&self, window: &[u8]) -> Result<Decoded, Error> {
        let mut cursor = Cursor::new(window);

        let (cells, cell_search) =
            CELL_TABLE.search_traced(window, self.expected.map(|s| s.cells));
        let (offset, count) = cells.layout(&CELL_TABLE);
        log::debug!("Cell table {cells:?} -> offset={offset} count={count}");
        cursor.seek(offset);
        let cell_readings = (0..count)
            .map(|index| {
                Ok(CellReading {
                    index,
                    millivolts: cursor.u16_le()?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let region_start = cursor.position();
        let (temperatures, temperature_search) =
            TEMPERATURE_TABLE.search_traced(cursor.rest(), self.expected.map(|s| s.temperatures));
        let (offset, count) = temperatures.layout(&TEMPERATURE_TABLE);
        log::debug!(
            "Temperature table {temperatures:?} -> offset={} count={count}",
            region_start + offset
        );
        cursor.seek(region_start + offset);
        let temp_readings = (0..count)
            .map(|index| {
                Ok(TemperatureReading {
                    index,
                    decikelvin: cursor.u16_le()?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let pack_current = cursor.i16_le()?;
        let pack_voltage = cursor.u16_le()?;
        let remaining_capacity = cursor.u16_le()?;
        cursor.take(RESERVED_LENGTH)?;
        let cycle_count = u16::from(cursor.u8()?);
        let total_capacity = cursor.u16_le()?;
        if !cursor.rest().is_empty() {
            log::trace!(
                "{} trailing bytes: {}",
                cursor.rest().len(),
                hex::encode(cursor.rest())
            );
        }

        let snapshot = PackSnapshot {
            cells: cell_readings,
            temps: temp_readings,
            pack_voltage,
            pack_current,
            remaining_capacity,
            total_capacity,
            state_of_charge: state_of_charge(remaining_capacity, total_capacity),
            cycle_count,
        };

        if !cells.is_confident() || !temperatures.is_confident() {
            let ambiguity = Ambiguity {
                raw: window.to_vec(),
                cells,
                cell_search,
                temperatures,
                temperature_search,
                provisional: snapshot,
            };
            log::warn!("No confident analog layout: {ambiguity}");
            return Err(Error::StructuralAmbiguity(Box::new(ambiguity)));
        }

        log::debug!(
            "Decoded analog data - cells={} temps={} voltage={}mV current={}0mA soc={}% cycles={}",
            snapshot.cells.len(),
            snapshot.temps.len(),
            snapshot.pack_voltage,
            snapshot.pack_current,
            snapshot.state_of_charge,
            snapshot.cycle_count
        );
        Ok(Decoded {
            snapshot,
            cells,
            temperatures,
        })
    }
}

/// Decodes an analog window with the full heuristic search.
pub fn decode_analog(payload: &[u8]) -> Result<PackSnapshot, Error> {
    AnalogDecoder::new()
        .decode(payload)
        .map(|decoded| decoded.snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voltages(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn structure_search_skips_implausible_count() {
        let mut region = vec![0x00, 0xff, 0x08];
        region.extend(voltages(&[3300; 8]));
        assert_eq!(
            CELL_TABLE.search(&region, None),
            TableMatch::Matched {
                offset: 3,
                count: 8
            }
        );
    }

    #[test]
    fn structure_search_needs_every_reading_valid() {
        let mut region = vec![0x09];
        region.extend(voltages(&[3300; 8]));
        region.extend(voltages(&[1500]));
        assert_eq!(
            CELL_TABLE.search(&region, None),
            TableMatch::BestEffort {
                offset: 1,
                count: 8
            }
        );
    }

    #[test]
    fn expected_count_is_tried_first() {
        // 0x08 at position 0 validates as well (0x0900 reads as 2304 mV)
        let mut region = vec![0x08, 0x00, 0x09];
        region.extend(voltages(&[3300; 9]));
        assert_eq!(
            CELL_TABLE.search(&region, None),
            TableMatch::Matched {
                offset: 1,
                count: 8
            }
        );
        assert_eq!(
            CELL_TABLE.search(&region, Some(9)),
            TableMatch::Matched {
                offset: 3,
                count: 9
            }
        );
    }

    #[test]
    fn short_run_falls_back_to_default() {
        let mut region = vec![0xd9];
        region.extend(voltages(&[3291, 3290]));
        region.extend([0xff; 40]);
        assert_eq!(CELL_TABLE.search(&region, None), TableMatch::Default);
        assert_eq!(TableMatch::Default.layout(&CELL_TABLE), (1, 16));
    }

    #[test]
    fn search_trace_keeps_rejected_hypotheses() {
        let mut region = vec![0xd9];
        region.extend(voltages(&[3291, 3290]));
        region.extend([0xff; 40]);
        let (found, trace) = CELL_TABLE.search_traced(&region, None);
        assert_eq!(found, TableMatch::Default);
        assert_eq!(trace.rejected.len(), SEARCH_WINDOW);
        assert_eq!(
            trace.rejected[0],
            Rejected {
                position: 0,
                count: 217,
                reason: RejectReason::ImplausibleCount
            }
        );
        // 0x0c at position 2 implies 12 cells starting at 3290 mV
        assert_eq!(
            trace.rejected[2],
            Rejected {
                position: 2,
                count: 12,
                reason: RejectReason::InvalidReading { index: 1 }
            }
        );
        assert_eq!(trace.best_run, Some((1, 2)));
        assert_eq!(
            trace.to_string().split("; ").next(),
            Some("rejected=[position=0 count=217 (implausible count)")
        );
        assert!(trace.to_string().ends_with("best_run=offset 1 length 2"));
    }

    #[test]
    fn matched_search_keeps_earlier_rejections() {
        let mut region = vec![0x00, 0xff, 0x08];
        region.extend(voltages(&[3300; 8]));
        let (found, trace) = CELL_TABLE.search_traced(&region, None);
        assert!(found.is_confident());
        assert_eq!(trace.rejected.len(), 2);
        assert!(trace.best_run.is_none());
    }

    #[test]
    fn single_temperature_is_enough() {
        let mut region = vec![0xee];
        region.extend(voltages(&[2981]));
        region.push(0xee);
        assert_eq!(
            TEMPERATURE_TABLE.search(&region, None),
            TableMatch::BestEffort {
                offset: 1,
                count: 1
            }
        );
    }

    #[test]
    fn state_of_charge_is_clamped() {
        assert_eq!(state_of_charge(5000, 10000), 50);
        assert_eq!(state_of_charge(9999, 10000), 99);
        assert_eq!(state_of_charge(12000, 10000), 100);
        assert_eq!(state_of_charge(100, 0), 0);
    }

    #[test]
    fn cursor_reports_bounds() {
        let mut cursor = Cursor::new(&[1, 2, 3]);
        assert_eq!(cursor.u16_le().unwrap(), 0x0201);
        assert!(matches!(
            cursor.u16_le(),
            Err(Error::BoundsFailure {
                offset: 2,
                len: 2,
                available: 3
            })
        ));
        cursor.seek(10);
        assert!(cursor.rest().is_empty());
        assert!(matches!(
            cursor.u8(),
            Err(Error::BoundsFailure { offset: 10, .. })
        ));
    }

    #[test]
    fn payload_window_skips_prefix() {
        let payload = AnalogPayload::new(vec![0x11, 0x02, 0x10], 2).unwrap();
        assert_eq!(payload.window(), &[0x10]);
        assert!(matches!(
            AnalogPayload::new(vec![0x11], 2),
            Err(Error::BoundsFailure { .. })
        ));
    }

    #[test]
    fn temperature_labels() {
        assert_eq!(SensorShape::temperature_label(0), "cells 1-4");
        assert_eq!(SensorShape::temperature_label(5), "environment");
        assert_eq!(SensorShape::temperature_label(7), "sensor 7");
        assert_eq!(SensorShape::cell_label(0), "cell 1");
    }
}
