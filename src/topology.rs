//! The ordered stage topology.
//!
//! A [`StageTopology`] is built once at startup and never grows afterward:
//! every configured stage has exactly one [`StageRecord`] and exactly one
//! predecessor, so rollback lookups are total.

use std::collections::HashMap;
use std::fmt;

use crate::{AttendantError, Result, StageKey, StageRecord};

/// One stage slot in the topology.
#[derive(Debug, Clone)]
struct TopologyEntry<S> {
    stage: S,
    record: StageRecord,
    predecessor: S,
}

/// Ordered mapping from stage to retry record, with rollback targets.
///
/// Iteration order is the declaration order. The first declared stage is
/// the initial stage; the last is the terminal stage.
///
/// ```
/// use attendant::StageTopology;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Step { Login, Join, Watch }
///
/// impl std::fmt::Display for Step {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{:?}", self)
///     }
/// }
///
/// let topology = StageTopology::builder()
///     .stage(Step::Login, 3)
///     .stage(Step::Join, 3)
///     .stage(Step::Watch, 5)
///     .predecessor(Step::Watch, Step::Login)
///     .build()?;
///
/// assert_eq!(topology.initial(), Step::Login);
/// assert_eq!(topology.terminal(), Step::Watch);
/// assert_eq!(topology.predecessor(Step::Join)?, Step::Login);
/// assert_eq!(topology.predecessor(Step::Watch)?, Step::Login);
/// # Ok::<(), attendant::AttendantError>(())
/// ```
#[derive(Clone)]
pub struct StageTopology<S> {
    entries: Vec<TopologyEntry<S>>,
    index: HashMap<S, usize>,
}

impl<S: StageKey> StageTopology<S> {
    /// Creates a new topology builder.
    pub fn builder() -> TopologyBuilder<S> {
        TopologyBuilder::new()
    }

    /// Returns the stages in topology order.
    pub fn stages(&self) -> impl Iterator<Item = S> + '_ {
        self.entries.iter().map(|e| e.stage)
    }

    /// Returns `(stage, record)` pairs in topology order.
    pub fn iter(&self) -> impl Iterator<Item = (S, &StageRecord)> + '_ {
        self.entries.iter().map(|e| (e.stage, &e.record))
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: a built topology has at least one stage.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the stage is part of this topology.
    pub fn contains(&self, stage: S) -> bool {
        self.index.contains_key(&stage)
    }

    /// The first stage, where the workflow starts.
    pub fn initial(&self) -> S {
        self.entries[0].stage
    }

    /// The last stage. Reaching it means the workflow is fully up.
    pub fn terminal(&self) -> S {
        self.entries[self.entries.len() - 1].stage
    }

    /// Returns the record for a stage.
    ///
    /// # Errors
    ///
    /// Returns [`AttendantError::StageNotFound`] if the stage isn't part of
    /// the topology.
    pub fn record(&self, stage: S) -> Result<&StageRecord> {
        self.position(stage).map(|idx| &self.entries[idx].record)
    }

    pub(crate) fn record_mut(&mut self, stage: S) -> Result<&mut StageRecord> {
        let idx = self.position(stage)?;
        Ok(&mut self.entries[idx].record)
    }

    /// Returns the stage to roll back to when `stage` is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`AttendantError::StageNotFound`] if the stage isn't part of
    /// the topology.
    pub fn predecessor(&self, stage: S) -> Result<S> {
        self.position(stage).map(|idx| self.entries[idx].predecessor)
    }

    /// Returns the stage declared after `stage`, if any.
    pub fn next_after(&self, stage: S) -> Option<S> {
        let idx = *self.index.get(&stage)?;
        self.entries.get(idx + 1).map(|e| e.stage)
    }

    /// Number of stages whose latest attempt succeeded.
    pub fn completed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.record.succeeded()).count()
    }

    fn position(&self, stage: S) -> Result<usize> {
        self.index
            .get(&stage)
            .copied()
            .ok_or_else(|| AttendantError::StageNotFound(stage.to_string()))
    }
}

impl<S: StageKey> fmt::Debug for StageTopology<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.stage, &e.record)))
            .finish()
    }
}

/// A deferred predecessor override.
#[derive(Debug, Clone)]
struct DeferredPredecessor<S> {
    stage: S,
    predecessor: S,
}

/// Builder for [`StageTopology`].
///
/// Unless overridden with [`predecessor`](Self::predecessor), each stage
/// rolls back to the stage declared before it, and the first stage rolls
/// back to itself.
#[derive(Debug, Clone)]
pub struct TopologyBuilder<S> {
    stages: Vec<(S, u32)>,
    deferred: Vec<DeferredPredecessor<S>>,
}

impl<S: StageKey> TopologyBuilder<S> {
    fn new() -> Self {
        Self {
            stages: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Appends a stage with its retry budget.
    pub fn stage(mut self, stage: S, max_retries: u32) -> Self {
        self.stages.push((stage, max_retries));
        self
    }

    /// Sets the rollback target of `stage`. Validated at build time.
    pub fn predecessor(mut self, stage: S, predecessor: S) -> Self {
        self.deferred.push(DeferredPredecessor { stage, predecessor });
        self
    }

    /// Builds the topology.
    ///
    /// # Errors
    ///
    /// - [`AttendantError::InvalidTopology`] if no stage was declared
    /// - [`AttendantError::DuplicateStage`] if a stage is declared twice
    /// - [`AttendantError::StageNotFound`] if a predecessor override names
    ///   an undeclared stage
    pub fn build(self) -> Result<StageTopology<S>> {
        if self.stages.is_empty() {
            return Err(AttendantError::InvalidTopology(
                "at least one stage is required".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(self.stages.len());
        let mut entries: Vec<TopologyEntry<S>> = Vec::with_capacity(self.stages.len());
        let mut previous = None;

        for (position, (stage, max_retries)) in self.stages.into_iter().enumerate() {
            if index.insert(stage, position).is_some() {
                return Err(AttendantError::DuplicateStage(stage.to_string()));
            }
            entries.push(TopologyEntry {
                stage,
                record: StageRecord::new(max_retries),
                predecessor: previous.unwrap_or(stage),
            });
            previous = Some(stage);
        }

        for deferred in self.deferred {
            let idx = *index
                .get(&deferred.stage)
                .ok_or_else(|| AttendantError::StageNotFound(deferred.stage.to_string()))?;
            if !index.contains_key(&deferred.predecessor) {
                return Err(AttendantError::StageNotFound(
                    deferred.predecessor.to_string(),
                ));
            }
            entries[idx].predecessor = deferred.predecessor;
        }

        Ok(StageTopology { entries, index })
    }
}

impl<S: StageKey> Default for TopologyBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
