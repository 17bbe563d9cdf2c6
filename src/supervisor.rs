//! The self-healing stage supervisor.
//!
//! A [`Supervisor`] owns one workflow: its [`StageTopology`], its current
//! [`WorkflowState`], and the actions bound to each stage. Each call to
//! [`Supervisor::tick`] advances the workflow by at most one stage action,
//! or runs recovery when the workflow is failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::lock::NonBlockingMutex;
use crate::status::{aggregate, StatusSnapshot};
use crate::topology::TopologyBuilder;
use crate::{
    AttendantError, Result, StageAction, StageContext, StageKey, StageOutcome, StageRecord,
    StageTopology, SupervisorEvent, SystemStatus, WorkflowState,
};

/// Default channel capacity for supervisor events.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Mutable state of one supervised workflow.
pub(crate) struct SupervisorState<S> {
    pub(crate) topology: StageTopology<S>,
    pub(crate) current: WorkflowState<S>,
    pub(crate) status: SystemStatus,
}

/// What a call to [`Supervisor::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick held the lock; nothing was touched.
    Skipped,

    /// The tick ran and left the supervisor in this status.
    Ran(SystemStatus),
}

/// Supervises a staged workflow with retry budgets and rollback.
///
/// # Construction
///
/// ```
/// use attendant::{Result, StageAction, StageContext, StageOutcome, Supervisor};
/// use async_trait::async_trait;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Step { Connect, Watch }
///
/// impl std::fmt::Display for Step {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{:?}", self)
///     }
/// }
///
/// #[derive(Debug)]
/// struct Connect;
///
/// #[async_trait]
/// impl StageAction<Step> for Connect {
///     async fn execute(&self, ctx: &mut StageContext<Step>) -> Result<StageOutcome> {
///         ctx.advance();
///         Ok(StageOutcome::Complete)
///     }
/// }
///
/// #[derive(Debug)]
/// struct Watch;
///
/// #[async_trait]
/// impl StageAction<Step> for Watch {
///     async fn execute(&self, _ctx: &mut StageContext<Step>) -> Result<StageOutcome> {
///         Ok(StageOutcome::Complete)
///     }
/// }
///
/// let supervisor = Supervisor::builder()
///     .stage(Step::Connect, 3, Connect)
///     .stage(Step::Watch, 5, Watch)
///     .build()?;
/// # Ok::<(), attendant::AttendantError>(())
/// ```
///
/// # Thread Safety
///
/// `Supervisor` is `Send + Sync`; share it behind an `Arc` with a
/// [`Monitor`](crate::Monitor) and whatever serves its snapshots.
pub struct Supervisor<S: StageKey> {
    name: String,
    pub(crate) state: RwLock<SupervisorState<S>>,
    actions: HashMap<S, Arc<dyn StageAction<S>>>,
    tick_lock: NonBlockingMutex,
    execution_count: AtomicU64,
    started_at: DateTime<Utc>,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl<S: StageKey> Supervisor<S> {
    /// Creates a new supervisor builder.
    pub fn builder() -> SupervisorBuilder<S> {
        SupervisorBuilder::new()
    }

    /// The supervisor's name, used to tell tenants apart in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to supervisor events.
    ///
    /// Events are not persisted; a slow receiver may miss some.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }

    /// Emits an event to all subscribers, ignoring send errors.
    pub(crate) fn emit(&self, event: SupervisorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the current workflow position.
    pub async fn current_stage(&self) -> WorkflowState<S> {
        self.state.read().await.current
    }

    /// Returns the status computed by the latest tick.
    pub async fn status(&self) -> SystemStatus {
        self.state.read().await.status
    }

    /// Returns a copy of a stage's record.
    ///
    /// # Errors
    ///
    /// Returns [`AttendantError::StageNotFound`] for an unknown stage.
    pub async fn record(&self, stage: S) -> Result<StageRecord> {
        self.state.read().await.topology.record(stage).cloned()
    }

    /// Number of ticks that acquired the lock and ran.
    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::SeqCst)
    }

    /// When this supervisor was built.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns true while a tick is running.
    pub fn is_ticking(&self) -> bool {
        self.tick_lock.is_locked()
    }

    /// Returns a read-only snapshot for status reporting.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.read().await;
        StatusSnapshot::capture(
            state.current,
            &state.topology,
            state.status,
            self.execution_count(),
            self.started_at,
        )
    }

    /// Runs one monitor cycle.
    ///
    /// If another tick is still running this one is dropped without
    /// touching any state. Otherwise the current stage is attempted (or
    /// recovery runs, when failed) and the status is recomputed. An
    /// internal error marks the cycle degraded; nothing escapes.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = self.tick_lock.try_acquire() else {
            debug!(supervisor = %self.name, "previous tick still running; skipping");
            self.emit(SupervisorEvent::TickSkipped);
            return TickOutcome::Skipped;
        };

        let tick = self.execution_count.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("tick", supervisor = %self.name, tick = tick);

        async {
            let current = self.current_stage().await;
            debug!(current = %current, "dispatching");

            let result = match current {
                WorkflowState::Stage(stage) => self.attempt_stage(stage).await.map(|_| ()),
                WorkflowState::Failed => self.run_recovery().await.map(|_| ()),
            };

            let mut state = self.state.write().await;
            let status = match result {
                Ok(()) => aggregate(state.current, &state.topology),
                Err(e) => {
                    error!(error = %e, "tick failed");
                    SystemStatus::Degraded
                }
            };
            let previous = std::mem::replace(&mut state.status, status);
            drop(state);

            if previous != status {
                info!(from = %previous, to = %status, "status changed");
                self.emit(SupervisorEvent::StatusChanged {
                    from: previous,
                    to: status,
                });
            }

            TickOutcome::Ran(status)
        }
        .instrument(span)
        .await
    }

    /// Attempts one stage.
    ///
    /// Returns `Ok(true)` if the stage's action succeeded and `Ok(false)`
    /// if it failed, errored, or was not run because the stage is out of
    /// budget. Action errors are recorded on the stage, never returned.
    ///
    /// # Errors
    ///
    /// - [`AttendantError::StageNotFound`] if `stage` (or the stage the
    ///   action advanced to) is not in the topology
    /// - [`AttendantError::MissingAction`] if no action is bound to `stage`
    pub async fn attempt_stage(&self, stage: S) -> Result<bool> {
        let span = info_span!("stage", stage = %stage);

        async {
            let action = self
                .actions
                .get(&stage)
                .cloned()
                .ok_or_else(|| AttendantError::MissingAction(stage.to_string()))?;

            let mut ctx = {
                let mut state = self.state.write().await;
                let SupervisorState {
                    topology, current, ..
                } = &mut *state;
                let natural_next = topology.next_after(stage);
                let record = topology.record_mut(stage)?;

                if record.is_exhausted() {
                    warn!(
                        retries = record.current_retries(),
                        max_retries = record.max_retries(),
                        "retry budget exhausted; not attempting"
                    );
                    *current = WorkflowState::Failed;
                    drop(state);
                    self.emit(SupervisorEvent::BudgetExhausted {
                        stage: stage.to_string(),
                    });
                    return Ok(false);
                }

                record.mark_attempt();
                StageContext::new(stage, record.clone(), natural_next)
            };

            info!(attempt = ctx.record.current_retries() + 1, "attempting stage");
            self.emit(SupervisorEvent::StageStarted {
                stage: stage.to_string(),
            });

            let failure = match action.execute(&mut ctx).await {
                Ok(StageOutcome::Complete) => None,
                Ok(StageOutcome::Failed { reason }) => Some(reason),
                Err(e) => Some(e.to_string()),
            };

            let mut state = self.state.write().await;
            let SupervisorState {
                topology, current, ..
            } = &mut *state;

            match failure {
                None => {
                    let next = ctx.requested_next();
                    if let Some(next) = next {
                        if !topology.contains(next) {
                            return Err(AttendantError::StageNotFound(next.to_string()));
                        }
                    }

                    topology.record_mut(stage)?.mark_succeeded();
                    if let Some(next) = next {
                        *current = WorkflowState::Stage(next);
                    }
                    drop(state);

                    info!(next = ?next.map(|s| s.to_string()), "stage succeeded");
                    self.emit(SupervisorEvent::StageSucceeded {
                        stage: stage.to_string(),
                        next: next.map(|s| s.to_string()),
                    });
                    Ok(true)
                }
                Some(message) => {
                    let error = format!("{stage}: {message}");
                    let record = topology.record_mut(stage)?;
                    record.mark_failed(error.clone());
                    let retries = record.current_retries();
                    let exhausted = record.is_exhausted();
                    if exhausted {
                        *current = WorkflowState::Failed;
                    }
                    drop(state);

                    warn!(error = %error, retries = retries, "stage failed");
                    self.emit(SupervisorEvent::StageFailed {
                        stage: stage.to_string(),
                        error,
                        retries,
                    });
                    if exhausted {
                        warn!("retry budget exhausted; workflow failed");
                        self.emit(SupervisorEvent::BudgetExhausted {
                            stage: stage.to_string(),
                        });
                    }
                    Ok(false)
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl<S: StageKey> fmt::Debug for Supervisor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.name)
            .field("stages", &self.actions.len())
            .field("execution_count", &self.execution_count())
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Builder for [`Supervisor`] instances.
///
/// Stages are attempted in declaration order. Each stage needs exactly one
/// action; by default it rolls back to the stage declared before it.
pub struct SupervisorBuilder<S: StageKey> {
    name: String,
    topology: TopologyBuilder<S>,
    actions: HashMap<S, Arc<dyn StageAction<S>>>,
    event_capacity: usize,
}

impl<S: StageKey> SupervisorBuilder<S> {
    fn new() -> Self {
        Self {
            name: "default".to_string(),
            topology: StageTopology::builder(),
            actions: HashMap::new(),
            event_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Names the supervisor (for example after the tenant it serves).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a stage with its retry budget and action.
    pub fn stage(
        mut self,
        stage: S,
        max_retries: u32,
        action: impl StageAction<S> + 'static,
    ) -> Self {
        self.topology = self.topology.stage(stage, max_retries);
        self.actions.insert(stage, Arc::new(action));
        self
    }

    /// Appends a stage whose action is already shared.
    pub fn shared_stage(
        mut self,
        stage: S,
        max_retries: u32,
        action: Arc<dyn StageAction<S>>,
    ) -> Self {
        self.topology = self.topology.stage(stage, max_retries);
        self.actions.insert(stage, action);
        self
    }

    /// Overrides the rollback target of `stage`.
    pub fn predecessor(mut self, stage: S, predecessor: S) -> Self {
        self.topology = self.topology.predecessor(stage, predecessor);
        self
    }

    /// Sets the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Builds the supervisor, positioned on the first stage.
    ///
    /// # Errors
    ///
    /// Returns the topology's validation errors (see
    /// [`TopologyBuilder::build`]).
    pub fn build(self) -> Result<Supervisor<S>> {
        let topology = self.topology.build()?;
        let current = WorkflowState::Stage(topology.initial());
        let status = aggregate(current, &topology);
        let (event_tx, _) = broadcast::channel(self.event_capacity);

        debug!(supervisor = %self.name, stages = topology.len(), "supervisor built");

        Ok(Supervisor {
            name: self.name,
            state: RwLock::new(SupervisorState {
                topology,
                current,
                status,
            }),
            actions: self.actions,
            tick_lock: NonBlockingMutex::new(),
            execution_count: AtomicU64::new(0),
            started_at: Utc::now(),
            event_tx,
        })
    }
}
