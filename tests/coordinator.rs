mod common;

use async_trait::async_trait;
use common::{Scalars, TEMPERATURES, VOLTAGE_SCENARIO};
use pylonbms_lib::analog::{SensorShape, TableMatch};
use pylonbms_lib::coordinator::{
    Availability, CycleOutcome, Diagnostic, PollCoordinator, PollState,
};
use pylonbms_lib::protocol::Variant;
use pylonbms_lib::transport::{Connection, Connector, Terminator};
use pylonbms_lib::Error;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = Arc<Mutex<VecDeque<Result<Vec<u8>, Error>>>>;

/// Plays back scripted responses, a read timeout once the script is exhausted.
struct MockConnection {
    script: Script,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn exchange(&mut self, request: &[u8], _until: Terminator) -> Result<Vec<u8>, Error> {
        self.requests.lock().unwrap().push(request.to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(Error::ReadTimeout(Duration::from_secs(5))))
    }
}

#[derive(Default)]
struct MockConnector {
    script: Script,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    connects: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    refuse: bool,
}

impl MockConnector {
    fn new(responses: Vec<Result<Vec<u8>, Error>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(Error::ConnectionFailure {
                peer: self.peer(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }
        Ok(MockConnection {
            script: self.script.clone(),
            requests: self.requests.clone(),
            closed: self.closed.clone(),
        })
    }

    fn peer(&self) -> String {
        "mock:1234".into()
    }
}

fn scenario() -> Result<Vec<u8>, Error> {
    Ok(common::analog_response(1, &common::scenario_window()))
}

fn fifteen_cells() -> Result<Vec<u8>, Error> {
    let window = common::window(&[], &[3300; 15], &TEMPERATURES, Scalars::default());
    Ok(common::analog_response(1, &window))
}

fn ambiguous() -> Result<Vec<u8>, Error> {
    let mut window = vec![0xd9];
    window.extend([0xFF; 32]);
    window.extend(common::table(&TEMPERATURES));
    window.extend(Scalars::default().bytes());
    Ok(common::analog_response(1, &window))
}

fn fallback() -> Result<Vec<u8>, Error> {
    let mut window = vec![0xd9];
    window.extend(common::readings(&[3200; 10]));
    window.extend(common::table(&TEMPERATURES));
    window.extend(Scalars::default().bytes());
    Ok(common::analog_response(1, &window))
}

#[tokio::test]
async fn first_success_publishes_and_sets_shape() {
    let mut poller = PollCoordinator::new(MockConnector::new(vec![scenario()]), 1, Variant::Standard);
    assert_eq!(poller.availability(), Availability::Pending);
    assert!(poller.current_snapshot().is_none());
    assert!(poller.sensor_shape().is_none());

    let outcome = poller.tick().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Published {
            cells: TableMatch::Matched {
                offset: 1,
                count: 16
            },
            shape_mismatch: None,
            ..
        }
    ));
    assert_eq!(poller.state(), PollState::Published);
    assert_eq!(poller.availability(), Availability::Fresh);
    assert_eq!(
        poller.sensor_shape(),
        Some(SensorShape {
            cells: 16,
            temperatures: 6
        })
    );
    let snapshot = poller.current_snapshot().unwrap();
    let millivolts: Vec<u16> = snapshot.cells.iter().map(|c| c.millivolts).collect();
    assert_eq!(millivolts, VOLTAGE_SCENARIO.to_vec());
    assert!(poller.last_failure().is_none());
    assert!(poller.last_diagnostic().is_none());
}

#[tokio::test]
async fn shape_change_is_flagged_but_published() {
    let connector = MockConnector::new(vec![scenario(), fifteen_cells()]);
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    poller.tick().await;
    let first = poller.current_snapshot().unwrap();

    match poller.tick().await {
        CycleOutcome::Published {
            shape_mismatch: Some(mismatch),
            ..
        } => {
            assert_eq!(mismatch.expected.cells, 16);
            assert_eq!(mismatch.actual.cells, 15);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let second = poller.current_snapshot().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.cells.len(), 15);
    // the discovered shape stays
    assert_eq!(poller.sensor_shape().unwrap().cells, 16);
    assert!(matches!(
        poller.last_diagnostic(),
        Some(Diagnostic::ShapeMismatch(_))
    ));
    assert_eq!(poller.availability(), Availability::Fresh);
}

#[tokio::test]
async fn ambiguity_keeps_previous_snapshot() {
    let connector = MockConnector::new(vec![scenario(), ambiguous()]);
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    poller.tick().await;
    let first = poller.current_snapshot().unwrap();

    assert!(matches!(
        poller.tick().await,
        CycleOutcome::Failed(Error::StructuralAmbiguity(_))
    ));
    assert_eq!(poller.state(), PollState::Failed);
    assert_eq!(poller.availability(), Availability::Stale);
    assert!(Arc::ptr_eq(&first, &poller.current_snapshot().unwrap()));
    assert!(poller
        .last_failure()
        .unwrap()
        .starts_with("structural_ambiguity"));
    match poller.last_diagnostic() {
        Some(Diagnostic::Ambiguity(ambiguity)) => {
            assert_eq!(ambiguity.cells, TableMatch::Default);
            assert!(ambiguity.raw_hex().starts_with("d9ffff"));
        }
        other => panic!("unexpected diagnostic {other:?}"),
    }
}

#[tokio::test]
async fn fallback_layout_is_published_with_diagnostic() {
    let mut poller =
        PollCoordinator::new(MockConnector::new(vec![fallback()]), 1, Variant::Standard);
    assert!(matches!(
        poller.tick().await,
        CycleOutcome::Published {
            cells: TableMatch::BestEffort {
                offset: 1,
                count: 10
            },
            ..
        }
    ));
    assert!(matches!(
        poller.last_diagnostic(),
        Some(Diagnostic::Fallback { .. })
    ));
    assert_eq!(poller.current_snapshot().unwrap().cells.len(), 10);
}

#[tokio::test]
async fn failure_before_first_success_stays_pending() {
    let rejected = Ok(common::response(0x04, vec![]));
    let mut poller = PollCoordinator::new(MockConnector::new(vec![rejected]), 1, Variant::Standard);
    assert!(matches!(
        poller.tick().await,
        CycleOutcome::Failed(Error::Rejected { .. })
    ));
    assert_eq!(poller.availability(), Availability::Pending);
    assert!(poller.last_failure().unwrap().starts_with("rejected"));
    assert!(poller.current_snapshot().is_none());
}

#[tokio::test]
async fn connection_failure_fails_cycle() {
    let connector = MockConnector {
        refuse: true,
        ..MockConnector::default()
    };
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    assert!(matches!(
        poller.tick().await,
        CycleOutcome::Failed(Error::ConnectionFailure { .. })
    ));
    assert_eq!(poller.state(), PollState::Failed);
    assert!(poller
        .last_failure()
        .unwrap()
        .starts_with("connection_failure"));
    assert_eq!(poller.peer(), "mock:1234");
}

#[tokio::test]
async fn alarms_share_the_analog_connection() {
    let connector = MockConnector::new(vec![
        scenario(),
        Ok(common::response(0x00, common::alarm_info())),
    ]);
    let connects = connector.connects.clone();
    let requests = connector.requests.clone();
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    poller.set_fetch_alarms(true);

    assert!(matches!(
        poller.tick().await,
        CycleOutcome::Published { .. }
    ));
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    let requests = requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(&requests[0][5..9], b"4642");
    assert_eq!(&requests[1][5..9], b"4644");
    let alarms = poller.alarms().unwrap();
    assert_eq!(alarms.summary().system, "Charge_MOS, Discharge_MOS");
}

#[tokio::test]
async fn connection_is_closed_after_every_cycle() {
    let connector = MockConnector::new(vec![
        scenario(),
        Ok(common::response(0x00, common::alarm_info())),
        ambiguous(),
        Err(Error::ReadTimeout(Duration::from_secs(5))),
        Ok(common::response(0x04, vec![])),
        Ok(b"~200146000000garbage\r".to_vec()),
    ]);
    let connects = connector.connects.clone();
    let closed = connector.closed.clone();
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    poller.set_fetch_alarms(true);

    assert!(matches!(poller.tick().await, CycleOutcome::Published { .. }));
    assert_eq!(closed.load(Ordering::SeqCst), connects.load(Ordering::SeqCst));

    poller.set_fetch_alarms(false);
    for expected in ["structural_ambiguity", "read_timeout", "rejected", "checksum_mismatch"] {
        let outcome = poller.tick().await;
        assert!(
            matches!(&outcome, CycleOutcome::Failed(err) if err.kind() == expected),
            "unexpected outcome {outcome:?}"
        );
        assert_eq!(closed.load(Ordering::SeqCst), connects.load(Ordering::SeqCst));
    }
    assert_eq!(connects.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn alarm_failure_does_not_fail_cycle() {
    // the alarm request runs into the scripted read timeout
    let connector = MockConnector::new(vec![scenario()]);
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    poller.set_fetch_alarms(true);
    assert!(matches!(
        poller.tick().await,
        CycleOutcome::Published { .. }
    ));
    assert!(poller.alarms().is_none());
    assert_eq!(poller.availability(), Availability::Fresh);
}

#[tokio::test]
async fn recovery_after_failure_is_fresh_again() {
    let connector = MockConnector::new(vec![
        scenario(),
        Err(Error::ReadTimeout(Duration::from_secs(5))),
    ]);
    let script = connector.script.clone();
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    poller.tick().await;
    poller.tick().await;
    assert_eq!(poller.availability(), Availability::Stale);
    let stale = poller.current_snapshot().unwrap();

    script.lock().unwrap().push_back(scenario());
    assert!(matches!(
        poller.tick().await,
        CycleOutcome::Published { .. }
    ));
    assert_eq!(poller.availability(), Availability::Fresh);
    assert!(!Arc::ptr_eq(&stale, &poller.current_snapshot().unwrap()));
    let stats = poller.stats();
    assert_eq!((stats.cycles, stats.published, stats.failed), (3, 2, 1));
}

#[tokio::test]
async fn run_reports_every_cycle() {
    let connector = MockConnector::new(vec![scenario()]);
    let mut poller = PollCoordinator::new(connector, 1, Variant::Standard);
    let mut outcomes = Vec::new();
    let _ = tokio::time::timeout(
        Duration::from_millis(250),
        poller.run(Duration::from_millis(50), |coordinator, outcome| {
            outcomes.push((
                matches!(outcome, CycleOutcome::Published { .. }),
                coordinator.availability(),
            ));
        }),
    )
    .await;
    assert!(outcomes.len() >= 2, "outcomes={outcomes:?}");
    assert_eq!(outcomes[0], (true, Availability::Fresh));
    assert_eq!(outcomes[1], (false, Availability::Stale));
    assert_eq!(poller.stats().cycles as usize, outcomes.len());
}
