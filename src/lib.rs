//! # Attendant
//!
//! A self-healing stage supervisor, with a fault-tolerant presence detector,
//! for keeping an automated participant in a live online class.
//!
//! Attendant runs a linear workflow of named stages on a fixed cadence.
//! Every stage has a retry budget. A stage that keeps failing marks the
//! workflow failed. Recovery then looks at the blocking stage, the earliest
//! one that has not succeeded: if it still has budget the workflow rewinds
//! to its predecessor, otherwise the failure is permanent. Three properties
//! hold throughout:
//!
//! - At most one monitor tick runs at a time; overlapping ticks are
//!   dropped, never queued
//! - Action failures are recorded on the stage and never escape a tick
//! - The derived [`SystemStatus`] is recomputed after every tick
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use attendant::{AttendantConfig, ClassroomSession};
//!
//! let config = AttendantConfig::from_file("attendant.toml")?;
//! let session = ClassroomSession::new(&config, browser)?;
//!
//! let monitor = session.monitor().spawn();
//! // ... serve session.supervisor().snapshot() somewhere ...
//! monitor.stop().await;
//! ```
//!
//! `cargo run --example classroom_session` walks through a full session
//! against a simulated browser.
//!
//! ## Building blocks
//!
//! - [`Supervisor`] owns one workflow: a [`StageTopology`], the current
//!   [`WorkflowState`] and a [`StageAction`] per stage
//! - [`Monitor`] ticks a supervisor periodically
//! - [`PresenceDetector`] votes across unreliable signals
//! - [`Driver`] is the browser capability; [`TimedDriver`] bounds every call
//! - [`classroom`] wires all of the above into the attendance workflow

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

pub mod classroom;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod lock;
pub mod monitor;
pub mod presence;
pub mod recovery;
pub mod stage;
pub mod status;
pub mod supervisor;
pub mod topology;

pub use classroom::{AttendanceStage, ClassroomSession, DiagnosticCapture, Diagnostics};
pub use config::{AttendantConfig, RetryBudgets, Selectors, SiteProfile};
pub use driver::{Driver, DriverResult, ElementHandle, TimedDriver};
pub use error::{AttendantError, DriverError, Result};
pub use event::SupervisorEvent;
pub use lock::{LockGuard, NonBlockingMutex};
pub use monitor::{Monitor, MonitorHandle};
pub use presence::{
    DetectionMethod, PanelState, ParticipantPanel, PresenceDetector, PresenceReport,
    PresenceVote, UnverifiablePolicy, VerdictBasis, FAULT_TOLERANCE_THRESHOLD,
    UNVERIFIABLE_PANEL_POLICY,
};
pub use recovery::Recovery;
pub use stage::{StageAction, StageContext, StageKey, StageOutcome, StageRecord, WorkflowState};
pub use status::{aggregate, StageSnapshot, StatusSnapshot, SystemStatus};
pub use supervisor::{Supervisor, SupervisorBuilder, TickOutcome};
pub use topology::{StageTopology, TopologyBuilder};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_returns_valid_semver() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }

    #[test]
    fn test_supervisor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Supervisor<AttendanceStage>>();
        assert_send_sync::<ClassroomSession>();
    }
}
