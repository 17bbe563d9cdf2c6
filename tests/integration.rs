//! Integration tests for the attendant supervisor.
//!
//! These tests drive the public API end to end:
//! - Retry budgets and the budget boundary
//! - Recovery and permanent failure
//! - Dropped overlapping ticks
//! - Presence voting
//! - Status snapshots and events

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use attendant::{
    DetectionMethod, DriverError, DriverResult, Monitor, PanelState, ParticipantPanel,
    PresenceDetector, Result, StageAction, StageContext, StageOutcome, Supervisor,
    SupervisorEvent, SystemStatus, TickOutcome, WorkflowState,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Step {
    A,
    B,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::A => f.write_str("A"),
            Step::B => f.write_str("B"),
        }
    }
}

/// Plays back a fixed sequence of pass/fail results, repeating the last.
#[derive(Debug)]
struct Script {
    results: Mutex<Vec<bool>>,
    calls: Arc<AtomicU32>,
}

impl Script {
    fn new(results: &[bool]) -> Self {
        Self {
            results: Mutex::new(results.to_vec()),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl StageAction<Step> for Script {
    async fn execute(&self, ctx: &mut StageContext<Step>) -> Result<StageOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pass = {
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.remove(0)
            } else {
                results[0]
            }
        };
        if pass {
            ctx.advance();
            Ok(StageOutcome::Complete)
        } else {
            Ok(StageOutcome::failed("element not found"))
        }
    }
}

#[tokio::test]
async fn test_repeated_failure_is_permanent() {
    init_tracing();

    let a = Script::new(&[false]);
    let a_calls = Arc::clone(&a.calls);
    let supervisor = Supervisor::builder()
        .stage(Step::A, 2, a)
        .stage(Step::B, 2, Script::new(&[true]))
        .build()
        .unwrap();

    assert_eq!(supervisor.tick().await, TickOutcome::Ran(SystemStatus::Failed));
    let record = supervisor.record(Step::A).await.unwrap();
    assert_eq!(record.current_retries(), 1);
    assert_eq!(supervisor.current_stage().await, WorkflowState::Stage(Step::A));

    supervisor.tick().await;
    assert_eq!(supervisor.record(Step::A).await.unwrap().current_retries(), 2);
    assert_eq!(supervisor.current_stage().await, WorkflowState::Failed);

    assert_eq!(supervisor.tick().await, TickOutcome::Ran(SystemStatus::Failed));
    for _ in 0..5 {
        supervisor.tick().await;
    }
    assert_eq!(supervisor.current_stage().await, WorkflowState::Failed);
    assert_eq!(supervisor.status().await, SystemStatus::Failed);
    assert_eq!(a_calls.load(Ordering::SeqCst), 2);

    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.current_stage, "FAILED");
    assert_eq!(
        snapshot.stage("A").unwrap().record.last_error(),
        Some("A: element not found")
    );
}

#[tokio::test]
async fn test_retry_then_success_is_degraded() {
    init_tracing();

    let supervisor = Supervisor::builder()
        .stage(Step::A, 2, Script::new(&[false, true]))
        .stage(Step::B, 2, Script::new(&[false]))
        .build()
        .unwrap();

    supervisor.tick().await;
    // One of two stages complete; the terminal check has not passed yet.
    assert_eq!(supervisor.tick().await, TickOutcome::Ran(SystemStatus::Degraded));

    let a = supervisor.record(Step::A).await.unwrap();
    assert!(a.succeeded());
    assert_eq!(a.current_retries(), 0);
    assert!(a.last_error().is_none());
    assert_eq!(supervisor.current_stage().await, WorkflowState::Stage(Step::B));
}

/// A pipeline with a stage between the first and the terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Three {
    A,
    B,
    C,
}

impl fmt::Display for Three {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
struct Flip(Mutex<Vec<bool>>);

#[async_trait]
impl StageAction<Three> for Flip {
    async fn execute(&self, ctx: &mut StageContext<Three>) -> Result<StageOutcome> {
        let pass = {
            let mut results = self.0.lock().unwrap();
            if results.len() > 1 {
                results.remove(0)
            } else {
                results[0]
            }
        };
        if pass {
            ctx.advance();
            Ok(StageOutcome::Complete)
        } else {
            Ok(StageOutcome::failed("no"))
        }
    }
}

#[tokio::test]
async fn test_partial_progress_is_degraded() {
    let supervisor = Supervisor::builder()
        .stage(Three::A, 2, Flip(Mutex::new(vec![false, true])))
        .stage(Three::B, 2, Flip(Mutex::new(vec![false])))
        .stage(Three::C, 2, Flip(Mutex::new(vec![true])))
        .build()
        .unwrap();

    assert_eq!(supervisor.tick().await, TickOutcome::Ran(SystemStatus::Failed));
    // One of three stages complete, not on the terminal stage.
    assert_eq!(supervisor.tick().await, TickOutcome::Ran(SystemStatus::Degraded));
    assert_eq!(supervisor.current_stage().await, WorkflowState::Stage(Three::B));
}

#[tokio::test]
async fn test_status_changes_are_broadcast() {
    let supervisor = Supervisor::builder()
        .stage(Three::A, 2, Flip(Mutex::new(vec![true])))
        .stage(Three::B, 2, Flip(Mutex::new(vec![true])))
        .stage(Three::C, 2, Flip(Mutex::new(vec![true])))
        .build()
        .unwrap();
    let mut events = supervisor.subscribe();

    for _ in 0..4 {
        supervisor.tick().await;
    }

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::StatusChanged { from, to } = event {
            changes.push((from, to));
        }
    }
    assert_eq!(
        changes,
        vec![
            (SystemStatus::Failed, SystemStatus::Degraded),
            (SystemStatus::Degraded, SystemStatus::Healthy),
        ]
    );
}

/// Stays inside the action until told to finish.
#[derive(Debug)]
struct Gate {
    entered: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl StageAction<Step> for Gate {
    async fn execute(&self, _ctx: &mut StageContext<Step>) -> Result<StageOutcome> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(StageOutcome::Complete)
    }
}

#[tokio::test]
async fn test_overlapping_tick_leaves_records_untouched() {
    let entered = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    let supervisor = Arc::new(
        Supervisor::builder()
            .stage(
                Step::A,
                3,
                Gate {
                    entered: Arc::clone(&entered),
                    release: Arc::clone(&release),
                },
            )
            .build()
            .unwrap(),
    );

    let running = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.tick().await })
    };
    entered.notified().await;

    let before = supervisor.snapshot().await;
    for _ in 0..3 {
        assert_eq!(supervisor.tick().await, TickOutcome::Skipped);
    }
    let after = supervisor.snapshot().await;
    assert_eq!(before.stages, after.stages);
    assert_eq!(after.execution_count, 1);

    release.notify_one();
    running.await.unwrap();
    assert!(supervisor.record(Step::A).await.unwrap().succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_drives_workflow_to_terminal_stage() {
    init_tracing();

    let supervisor = Arc::new(
        Supervisor::builder()
            .name("room-1")
            .stage(Step::A, 3, Script::new(&[false, true]))
            .stage(Step::B, 3, Script::new(&[true]))
            .build()
            .unwrap(),
    );

    let handle = Monitor::new(Arc::clone(&supervisor), Duration::from_secs(10)).spawn();
    tokio::time::sleep(Duration::from_secs(25)).await;
    handle.stop().await;

    assert_eq!(supervisor.execution_count(), 3);
    assert_eq!(supervisor.current_stage().await, WorkflowState::Stage(Step::B));
    assert_eq!(supervisor.status().await, SystemStatus::Healthy);
}

#[derive(Debug)]
struct Signal(DriverResult<bool>);

#[async_trait]
impl DetectionMethod for Signal {
    fn name(&self) -> &str {
        "signal"
    }

    async fn detect(&self) -> DriverResult<bool> {
        self.0.clone()
    }
}

#[derive(Debug)]
struct OpenPanel;

#[async_trait]
impl ParticipantPanel for OpenPanel {
    async fn open(&self) -> DriverResult<PanelState> {
        Ok(PanelState::Opened)
    }

    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

fn vote(signals: Vec<DriverResult<bool>>) -> PresenceDetector {
    signals
        .into_iter()
        .fold(PresenceDetector::new(OpenPanel), |detector, signal| {
            detector.with_method(Signal(signal))
        })
}

#[tokio::test]
async fn test_presence_votes() {
    assert!(vote(vec![Ok(true), Ok(false), Ok(false)]).check().await.present);
    assert!(!vote(vec![Ok(false), Ok(false), Ok(false)]).check().await.present);

    let unreachable = || Err(DriverError::Operation("detached".to_string()));
    assert!(!vote(vec![unreachable(), unreachable(), unreachable()]).check().await.present);
}
