//! Poll coordinator: one decode cycle per tick against one pack.
//!
//! Each cycle opens its own connection, requests the analog values (and optionally the alarm
//! information) and closes the connection again before decoding. The last good snapshot is
//! kept when a cycle fails, so consumers see stale data plus a failure reason rather than none.
//!
//! ```text
//! Idle -> Connecting -> AwaitingResponse -> Decoding -> Published
//!           \________________\___________________\----> Failed
//! ```
//!
//! `Published` and `Failed` stay visible between ticks. Every tick returns to `Idle` first.

use crate::alarm::AlarmStatus;
use crate::analog::{Ambiguity, AnalogDecoder, Decoded, PackSnapshot, SensorShape, TableMatch};
use crate::client::transact;
use crate::protocol::{AlarmInfo, AnalogValues, Command, Variant};
use crate::transport::{Connection, Connector};
use crate::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Connecting,
    AwaitingResponse,
    Decoding,
    Published,
    Failed,
}

impl PollState {
    /// A cycle is between its first and last transition.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PollState::Connecting | PollState::AwaitingResponse | PollState::Decoding
        )
    }
}

/// What consumers should make of the cached snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Nothing published yet.
    Pending,
    Fresh,
    /// Last cycle failed, the snapshot is from an earlier one.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub expected: SensorShape,
    pub actual: SensorShape,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected {} but decoded {}", self.expected, self.actual)
    }
}

/// Details kept for operators extending the heuristics to new hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Ambiguity(Box<Ambiguity>),
    /// Decoded, but a table was only found by the longest run fallback.
    Fallback {
        cells: TableMatch,
        temperatures: TableMatch,
        raw_hex: String,
    },
    ShapeMismatch(ShapeMismatch),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Diagnostic::Ambiguity(ambiguity) => write!(f, "structural ambiguity: {ambiguity}"),
            Diagnostic::Fallback {
                cells,
                temperatures,
                raw_hex,
            } => write!(
                f,
                "fallback layout: cells={cells:?} temperatures={temperatures:?} raw={raw_hex}"
            ),
            Diagnostic::ShapeMismatch(mismatch) => write!(f, "sensor shape mismatch: {mismatch}"),
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Published {
        cells: TableMatch,
        temperatures: TableMatch,
        shape_mismatch: Option<ShapeMismatch>,
    },
    Failed(Error),
    /// A previous cycle never completed; the coordinator was reset instead.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub published: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Drives the poll cycles of one pack and owns everything the cycles produce.
#[derive(Debug)]
pub struct PollCoordinator<C: Connector> {
    connector: C,
    pack: u8,
    variant: Variant,
    fetch_alarms: bool,
    state: PollState,
    snapshot: Option<Arc<PackSnapshot>>,
    shape: Option<SensorShape>,
    alarms: Option<Arc<AlarmStatus>>,
    last_failure: Option<String>,
    last_diagnostic: Option<Diagnostic>,
    stale: bool,
    stats: PollStats,
}

impl<C: Connector> PollCoordinator<C> {
    pub fn new(connector: C, pack: u8, variant: Variant) -> Self {
        Self {
            connector,
            pack,
            variant,
            fetch_alarms: false,
            state: PollState::Idle,
            snapshot: None,
            shape: None,
            alarms: None,
            last_failure: None,
            last_diagnostic: None,
            stale: false,
            stats: PollStats::default(),
        }
    }

    /// Also request the alarm information on the same connection every cycle.
    pub fn set_fetch_alarms(&mut self, enabled: bool) {
        self.fetch_alarms = enabled;
    }

    pub fn pack(&self) -> u8 {
        self.pack
    }

    pub fn peer(&self) -> String {
        self.connector.peer()
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn current_snapshot(&self) -> Option<Arc<PackSnapshot>> {
        self.snapshot.clone()
    }

    pub fn sensor_shape(&self) -> Option<SensorShape> {
        self.shape
    }

    pub fn alarms(&self) -> Option<Arc<AlarmStatus>> {
        self.alarms.clone()
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.last_diagnostic.as_ref()
    }

    pub fn availability(&self) -> Availability {
        match (&self.snapshot, self.stale) {
            (None, _) => Availability::Pending,
            (Some(_), false) => Availability::Fresh,
            (Some(_), true) => Availability::Stale,
        }
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Runs one poll cycle.
    pub async fn tick(&mut self) -> CycleOutcome {
        if let Some(skipped) = self.begin() {
            return skipped;
        }
        match self.cycle().await {
            Ok(decoded) => self.publish(decoded),
            Err(err) => self.fail(err),
        }
    }

    /// Returns to `Idle` from the resting state of the previous cycle. A cycle still in flight
    /// was abandoned, the tick is then skipped.
    fn begin(&mut self) -> Option<CycleOutcome> {
        let previous = std::mem::replace(&mut self.state, PollState::Idle);
        if previous.is_in_flight() {
            log::warn!(
                "pack={} previous cycle did not complete state={:?}, skipping tick",
                self.pack,
                previous
            );
            self.stats.skipped += 1;
            return Some(CycleOutcome::Skipped);
        }
        self.stats.cycles += 1;
        None
    }

    async fn cycle(&mut self) -> Result<Decoded, Error> {
        self.state = PollState::Connecting;
        let mut connection = self.connector.connect().await?;

        self.state = PollState::AwaitingResponse;
        let frame = transact(
            &mut connection,
            &AnalogValues::request(self.pack),
            Command::AnalogValues,
            self.variant,
        )
        .await?;
        if self.fetch_alarms {
            self.alarms = self.request_alarms(&mut connection).await.map(Arc::new);
        }
        drop(connection);

        self.state = PollState::Decoding;
        let payload = AnalogValues::payload(frame)?;
        let decoder = match self.shape {
            Some(shape) => AnalogDecoder::with_expected(shape),
            None => AnalogDecoder::new(),
        };
        let decoded = decoder.decode(payload.window())?;
        if decoded.is_best_effort() {
            self.last_diagnostic = Some(Diagnostic::Fallback {
                cells: decoded.cells,
                temperatures: decoded.temperatures,
                raw_hex: hex::encode(payload.window()),
            });
        }
        Ok(decoded)
    }

    /// Alarm failures never fail the cycle.
    async fn request_alarms(&self, connection: &mut C::Connection) -> Option<AlarmStatus> {
        let result = transact(
            connection,
            &AlarmInfo::request(self.pack),
            Command::AlarmInfo,
            self.variant,
        )
        .await
        .and_then(|frame| AlarmInfo::decode(&frame));
        match result {
            Ok(status) => status,
            Err(err) => {
                log::warn!(
                    "pack={} alarm info failed kind={} reason={err}",
                    self.pack,
                    err.kind()
                );
                None
            }
        }
    }

    fn publish(&mut self, decoded: Decoded) -> CycleOutcome {
        let actual = decoded.snapshot.shape();
        let shape_mismatch = match self.shape {
            None => {
                log::info!("pack={} discovered sensor shape: {actual}", self.pack);
                self.shape = Some(actual);
                None
            }
            Some(expected) if expected != actual => {
                let mismatch = ShapeMismatch { expected, actual };
                log::warn!("pack={} sensor shape mismatch: {mismatch}", self.pack);
                self.last_diagnostic = Some(Diagnostic::ShapeMismatch(mismatch));
                Some(mismatch)
            }
            Some(_) => None,
        };
        self.snapshot = Some(Arc::new(decoded.snapshot));
        self.stale = false;
        self.state = PollState::Published;
        self.stats.published += 1;
        CycleOutcome::Published {
            cells: decoded.cells,
            temperatures: decoded.temperatures,
            shape_mismatch,
        }
    }

    fn fail(&mut self, err: Error) -> CycleOutcome {
        log::warn!(
            "pack={} peer={} poll failed kind={} reason={err}",
            self.pack,
            self.connector.peer(),
            err.kind()
        );
        if let Error::StructuralAmbiguity(ambiguity) = &err {
            self.last_diagnostic = Some(Diagnostic::Ambiguity(ambiguity.clone()));
        }
        self.last_failure = Some(format!("{}: {err}", err.kind()));
        self.stale = true;
        self.state = PollState::Failed;
        self.stats.failed += 1;
        CycleOutcome::Failed(err)
    }

    /// Ticks every `period` forever, handing each outcome to `observer`.
    ///
    /// Ticks missed while a cycle runs long are dropped, cycles never overlap.
    pub async fn run<F>(&mut self, period: Duration, mut observer: F)
    where
        F: FnMut(&Self, &CycleOutcome),
    {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let outcome = self.tick().await;
            observer(self, &outcome);
        }
    }
}
