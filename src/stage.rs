//! Stage types for the attendant supervisor.
//!
//! This module defines the per-stage retry record, the workflow position
//! ([`WorkflowState`]), and the [`StageAction`] trait that binds behavior to
//! a stage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;

use crate::Result;

/// Identifier of a workflow stage.
///
/// Implemented automatically for any small closed enum that is `Copy`,
/// hashable and printable. The `Display` form is the stage name shown in
/// status snapshots and error messages.
pub trait StageKey: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> StageKey for T where T: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Where the workflow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState<S> {
    /// A named stage is current and will be attempted on the next tick.
    Stage(S),

    /// A stage exhausted its retry budget. The next tick runs recovery.
    Failed,
}

impl<S: StageKey> WorkflowState<S> {
    /// Returns the current stage, or `None` when failed.
    pub fn stage(&self) -> Option<S> {
        match self {
            Self::Stage(stage) => Some(*stage),
            Self::Failed => None,
        }
    }

    /// Returns true if the workflow is in the failed state.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl<S: StageKey> Display for WorkflowState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(stage) => write!(f, "{stage}"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Retry bookkeeping for one stage.
///
/// `max_retries` is fixed when the record is created. `current_retries`
/// counts consecutive failures and is reset by a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    max_retries: u32,
    current_retries: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    succeeded: bool,
    last_success_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    /// Creates a fresh record with the given retry budget.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            current_retries: 0,
            last_attempt_at: None,
            last_error: None,
            succeeded: false,
            last_success_at: None,
        }
    }

    /// The retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Consecutive failed attempts.
    pub fn current_retries(&self) -> u32 {
        self.current_retries
    }

    /// When the stage was last attempted.
    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    /// The most recent failure message, prefixed with the stage name.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the latest attempt succeeded.
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// When the stage last succeeded.
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    /// Returns true once `current_retries` has reached the budget.
    pub fn is_exhausted(&self) -> bool {
        self.current_retries >= self.max_retries
    }

    /// Returns true if the stage has not succeeded and still has budget.
    pub fn is_retriable(&self) -> bool {
        !self.succeeded && self.current_retries < self.max_retries
    }

    /// Stamps the attempt time.
    pub fn mark_attempt(&mut self) {
        self.last_attempt_at = Some(Utc::now());
    }

    /// Records a successful attempt.
    pub fn mark_succeeded(&mut self) {
        self.succeeded = true;
        self.last_success_at = Some(Utc::now());
        self.last_error = None;
        self.current_retries = 0;
    }

    /// Records a failed attempt, spending one unit of budget.
    ///
    /// The count saturates at `max_retries`.
    pub fn mark_failed(&mut self, error: String) {
        self.succeeded = false;
        self.last_error = Some(error);
        if self.current_retries < self.max_retries {
            self.current_retries += 1;
        }
    }
}

/// The outcome of one stage action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The action succeeded.
    Complete,

    /// The action ran but did not achieve its goal.
    Failed {
        /// Why the action failed.
        reason: String,
    },
}

impl StageOutcome {
    /// Convenience constructor for a failed outcome.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Context handed to a stage action.
///
/// Actions decide the next stage themselves: the executor only applies the
/// advance the action requested, and only when the action succeeds.
#[derive(Debug, Clone)]
pub struct StageContext<S> {
    /// The stage being attempted.
    pub stage: S,

    /// Snapshot of the stage's record before this attempt.
    pub record: StageRecord,

    /// The stage that follows this one in topology order.
    ///
    /// `None` for the terminal stage.
    pub natural_next: Option<S>,

    next: Option<S>,
}

impl<S: StageKey> StageContext<S> {
    /// Creates a new stage context.
    pub fn new(stage: S, record: StageRecord, natural_next: Option<S>) -> Self {
        Self {
            stage,
            record,
            natural_next,
            next: None,
        }
    }

    /// Requests an advance to the next stage in topology order.
    ///
    /// A no-op on the terminal stage.
    pub fn advance(&mut self) {
        self.next = self.natural_next;
    }

    /// Requests an advance to a specific stage.
    pub fn advance_to(&mut self, stage: S) {
        self.next = Some(stage);
    }

    /// The advance requested so far, if any.
    pub fn requested_next(&self) -> Option<S> {
        self.next
    }
}

/// Behavior bound to one stage.
///
/// # Examples
///
/// ```
/// use attendant::{Result, StageAction, StageContext, StageOutcome};
/// use async_trait::async_trait;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Step { Fetch, Done }
///
/// impl std::fmt::Display for Step {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{:?}", self)
///     }
/// }
///
/// #[derive(Debug)]
/// struct Fetch;
///
/// #[async_trait]
/// impl StageAction<Step> for Fetch {
///     async fn execute(&self, ctx: &mut StageContext<Step>) -> Result<StageOutcome> {
///         ctx.advance();
///         Ok(StageOutcome::Complete)
///     }
/// }
/// ```
#[async_trait]
pub trait StageAction<S: StageKey>: Debug + Send + Sync {
    /// Runs the stage.
    ///
    /// Both `Err` and [`StageOutcome::Failed`] count against the retry
    /// budget; neither is propagated past the executor.
    async fn execute(&self, ctx: &mut StageContext<S>) -> Result<StageOutcome>;
}
