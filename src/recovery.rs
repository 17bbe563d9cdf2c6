//! Recovery from an exhausted retry budget.
//!
//! When a stage runs out of budget the workflow becomes
//! [`WorkflowState::Failed`]. The next tick locates the stage that blocked
//! the workflow and, while that stage still has budget, rewinds to its
//! configured predecessor. Otherwise the failure is permanent.

use tracing::{error, info, info_span, Instrument};

use crate::{Result, StageKey, StageTopology, Supervisor, SupervisorEvent, WorkflowState};

/// What a recovery pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery<S> {
    /// The workflow was rewound to the failed stage's predecessor.
    Rewound {
        /// The stage that blocked the workflow.
        failed: S,
        /// Where the workflow now stands.
        to: S,
    },

    /// Every stage had succeeded; the workflow restarted from the top.
    Restarted {
        /// The initial stage.
        to: S,
    },

    /// The blocking stage has no budget left. The workflow stays failed.
    Exhausted {
        /// The stage that blocked the workflow.
        failed: S,
    },

    /// The workflow was not failed, so there was nothing to do.
    NotFailed,
}

impl<S: StageKey> StageTopology<S> {
    /// Returns the first stage, in topology order, whose latest attempt did
    /// not succeed.
    ///
    /// Stages only run once their predecessors in order have succeeded, so
    /// this names the stage that is blocking the workflow.
    pub fn find_failed_stage(&self) -> Option<S> {
        self.iter()
            .find(|(_, record)| !record.succeeded())
            .map(|(stage, _)| stage)
    }

    /// Returns true if the stage blocking the workflow still has retry
    /// budget.
    ///
    /// Stages after the blocking one are never reached, so their budget
    /// does not count.
    pub fn has_retriable_stage(&self) -> bool {
        self.iter()
            .find(|(_, record)| !record.succeeded())
            .is_some_and(|(_, record)| record.is_retriable())
    }
}

impl<S: StageKey> Supervisor<S> {
    /// Rewinds the workflow to the configured predecessor of `failed`.
    ///
    /// Returns the stage the workflow now stands on.
    ///
    /// # Errors
    ///
    /// Returns [`AttendantError::StageNotFound`](crate::AttendantError::StageNotFound)
    /// if `failed` is not part of the topology.
    pub async fn recover(&self, failed: S) -> Result<S> {
        let mut state = self.state.write().await;
        let to = state.topology.predecessor(failed)?;
        state.current = WorkflowState::Stage(to);
        Ok(to)
    }

    /// Runs one recovery pass. Only acts while the workflow is failed.
    pub(crate) async fn run_recovery(&self) -> Result<Recovery<S>> {
        let span = info_span!("recovery");

        async {
            let (current, failed, retriable, initial) = {
                let state = self.state.read().await;
                (
                    state.current,
                    state.topology.find_failed_stage(),
                    state.topology.has_retriable_stage(),
                    state.topology.initial(),
                )
            };

            if !current.is_failed() {
                return Ok(Recovery::NotFailed);
            }

            let Some(failed) = failed else {
                info!(to = %initial, "no failed stage found; restarting workflow");
                self.state.write().await.current = WorkflowState::Stage(initial);
                return Ok(Recovery::Restarted { to: initial });
            };

            if !retriable {
                error!(
                    failed = %failed,
                    "blocking stage has no retry budget left; workflow failed"
                );
                self.emit(SupervisorEvent::RecoveryExhausted {
                    failed: Some(failed.to_string()),
                });
                return Ok(Recovery::Exhausted { failed });
            }

            let to = self.recover(failed).await?;
            info!(failed = %failed, to = %to, "rewound to predecessor");
            self.emit(SupervisorEvent::Rewound {
                failed: failed.to_string(),
                to: to.to_string(),
            });
            Ok(Recovery::Rewound { failed, to })
        }
        .instrument(span)
        .await
    }
}
