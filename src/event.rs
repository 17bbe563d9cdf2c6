//! Supervisor events.
//!
//! This module provides [`SupervisorEvent`] for observing the monitor loop.
//! Events are broadcast through a channel that can be subscribed to for
//! logging, alerting, or feeding a status UI.

use crate::SystemStatus;

/// An event emitted by a supervisor.
///
/// Stage names are carried as `String` so events are easy to log or ship
/// elsewhere regardless of the stage key type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SupervisorEvent {
    /// A tick fired while another was still running and was dropped.
    TickSkipped,

    /// A stage action is about to run.
    StageStarted {
        /// The stage name.
        stage: String,
    },

    /// A stage action succeeded.
    StageSucceeded {
        /// The stage name.
        stage: String,
        /// The stage the workflow moved to, if the action advanced it.
        next: Option<String>,
    },

    /// A stage action failed or errored.
    StageFailed {
        /// The stage name.
        stage: String,
        /// The recorded error message.
        error: String,
        /// Failed attempts so far.
        retries: u32,
    },

    /// A stage ran out of retry budget; the workflow is now failed.
    BudgetExhausted {
        /// The stage name.
        stage: String,
    },

    /// Recovery rewound the workflow.
    Rewound {
        /// The stage that blocked the workflow.
        failed: String,
        /// The predecessor the workflow moved to.
        to: String,
    },

    /// Recovery found no stage with budget left.
    RecoveryExhausted {
        /// The stage that blocked the workflow.
        failed: Option<String>,
    },

    /// The derived system status changed.
    StatusChanged {
        /// The previous status.
        from: SystemStatus,
        /// The new status.
        to: SystemStatus,
    },
}

impl SupervisorEvent {
    /// Returns the stage name for this event, if applicable.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageStarted { stage }
            | Self::StageSucceeded { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::BudgetExhausted { stage } => Some(stage),
            Self::Rewound { failed, .. } => Some(failed),
            Self::RecoveryExhausted { failed } => failed.as_deref(),
            Self::TickSkipped | Self::StatusChanged { .. } => None,
        }
    }

    /// Returns true if this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::StageFailed { .. } | Self::BudgetExhausted { .. } | Self::RecoveryExhausted { .. }
        )
    }
}
