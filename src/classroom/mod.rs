//! Keeping a participant in a live online class.
//!
//! [`ClassroomSession`] wires a [`Driver`] and an [`AttendantConfig`] into a
//! four-stage [`Supervisor`]:
//!
//! ```text
//! login → open_class → join_session → attending
//! ```
//!
//! `attending` is terminal. It keeps re-checking presence on every tick and
//! sends the workflow back to `join_session` when the participant drops
//! out. Each stage rolls back to the one declared before it.

mod actions;
mod detection;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{AttendantConfig, SiteProfile};
use crate::lock::NonBlockingMutex;
use crate::{
    Driver, Monitor, Result, StageAction, StageContext, StageOutcome, Supervisor, TimedDriver,
};

use actions::{Attending, JoinSession, Login, OpenClass};

/// Stages of the attendance workflow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceStage {
    /// Sign in to the school portal.
    Login,
    /// Open the class page.
    OpenClass,
    /// Join the live session.
    JoinSession,
    /// Stay in the session.
    Attending,
}

impl AttendanceStage {
    /// Every stage, in workflow order.
    pub const ALL: [Self; 4] = [Self::Login, Self::OpenClass, Self::JoinSession, Self::Attending];

    /// The stage name used in logs, events and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::OpenClass => "open_class",
            Self::JoinSession => "join_session",
            Self::Attending => "attending",
        }
    }
}

impl fmt::Display for AttendanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A screenshot taken when a stage action failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticCapture {
    /// The stage whose action failed.
    pub stage: AttendanceStage,
    /// When the screenshot was taken.
    pub taken_at: DateTime<Utc>,
    /// The encoded image.
    pub bytes: Vec<u8>,
}

/// Diagnostics gathered while the workflow runs.
#[derive(Debug, Default)]
pub struct Diagnostics {
    latest: Mutex<Option<DiagnosticCapture>>,
    session_drops: AtomicU64,
}

impl Diagnostics {
    /// The most recent failure screenshot, if any.
    pub async fn latest_capture(&self) -> Option<DiagnosticCapture> {
        self.latest.lock().await.clone()
    }

    /// How many times the participant was found outside the session.
    pub fn session_drops(&self) -> u64 {
        self.session_drops.load(Ordering::SeqCst)
    }

    pub(crate) async fn store(&self, capture: DiagnosticCapture) {
        *self.latest.lock().await = Some(capture);
    }

    pub(crate) fn record_drop(&self) {
        self.session_drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// State shared by the classroom actions.
#[derive(Debug)]
pub(crate) struct Classroom {
    driver: Arc<dyn Driver>,
    site: SiteProfile,
    diagnostics: Arc<Diagnostics>,
    join_lock: NonBlockingMutex,
}

/// One participant's supervised attendance.
///
/// Build one per participant; sessions share nothing.
#[derive(Debug)]
pub struct ClassroomSession {
    supervisor: Arc<Supervisor<AttendanceStage>>,
    join: Arc<JoinSession>,
    diagnostics: Arc<Diagnostics>,
    interval: Duration,
}

impl ClassroomSession {
    /// Builds the workflow from `config` on top of `driver`.
    ///
    /// Every driver call is bounded by the configured driver timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AttendantError::InvalidConfig`](crate::AttendantError::InvalidConfig)
    /// if the configuration does not validate.
    pub fn new(config: &AttendantConfig, driver: Arc<dyn Driver>) -> Result<Self> {
        config.validate()?;

        let driver: Arc<dyn Driver> = Arc::new(TimedDriver::new(driver, config.driver_timeout()));
        let diagnostics = Arc::new(Diagnostics::default());
        let classroom = Arc::new(Classroom {
            driver: Arc::clone(&driver),
            site: config.site.clone(),
            diagnostics: Arc::clone(&diagnostics),
            join_lock: NonBlockingMutex::new(),
        });

        let join = Arc::new(JoinSession(Arc::clone(&classroom)));
        let join_action: Arc<dyn StageAction<AttendanceStage>> = join.clone();
        let detector = detection::presence_detector(&driver, &config.site);
        let budgets = config.retries;

        let supervisor = Supervisor::builder()
            .name(config.name.clone())
            .stage(AttendanceStage::Login, budgets.login, Login(Arc::clone(&classroom)))
            .stage(
                AttendanceStage::OpenClass,
                budgets.open_class,
                OpenClass(Arc::clone(&classroom)),
            )
            .shared_stage(AttendanceStage::JoinSession, budgets.join_session, join_action)
            .stage(
                AttendanceStage::Attending,
                budgets.attending,
                Attending {
                    classroom,
                    detector,
                },
            )
            .build()?;

        info!(
            supervisor = %config.name,
            participant = %config.site.participant_name,
            "classroom session ready"
        );

        Ok(Self {
            supervisor: Arc::new(supervisor),
            join,
            diagnostics,
            interval: config.monitor_interval(),
        })
    }

    /// The supervisor driving this session.
    pub fn supervisor(&self) -> Arc<Supervisor<AttendanceStage>> {
        Arc::clone(&self.supervisor)
    }

    /// Failure screenshots and session-drop counts.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// A monitor that ticks this session at the configured interval.
    pub fn monitor(&self) -> Monitor<AttendanceStage> {
        Monitor::new(self.supervisor(), self.interval)
    }

    /// Runs the join action now, outside the monitor cadence.
    ///
    /// Shares the join lock with the `join_session` stage, so it never
    /// races a tick's join. The supervisor's records are not touched.
    ///
    /// # Errors
    ///
    /// Returns driver errors raised while joining.
    pub async fn rejoin(&self) -> Result<StageOutcome> {
        let record = self.supervisor.record(AttendanceStage::JoinSession).await?;
        let mut ctx = StageContext::new(
            AttendanceStage::JoinSession,
            record,
            Some(AttendanceStage::Attending),
        );
        self.join.execute(&mut ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = AttendanceStage::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["login", "open_class", "join_session", "attending"]);
    }

    #[tokio::test]
    async fn test_diagnostics_keep_latest_capture() {
        let diagnostics = Diagnostics::default();
        assert!(diagnostics.latest_capture().await.is_none());

        for stage in [AttendanceStage::Login, AttendanceStage::JoinSession] {
            diagnostics
                .store(DiagnosticCapture {
                    stage,
                    taken_at: Utc::now(),
                    bytes: vec![1, 2, 3],
                })
                .await;
        }
        let latest = diagnostics.latest_capture().await.unwrap();
        assert_eq!(latest.stage, AttendanceStage::JoinSession);

        diagnostics.record_drop();
        diagnostics.record_drop();
        assert_eq!(diagnostics.session_drops(), 2);
    }
}
