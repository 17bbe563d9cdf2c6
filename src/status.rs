//! Health aggregation and status snapshots.
//!
//! [`aggregate`] derives the three-level [`SystemStatus`] from the workflow
//! position and the topology. [`StatusSnapshot`] is the read-only view an
//! HTTP layer serves.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{StageKey, StageRecord, StageTopology, WorkflowState};

/// Overall health of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    /// Every stage is up, or the workflow sits on its terminal stage.
    Healthy,

    /// Partially up, or failed with budget left somewhere.
    Degraded,

    /// Nothing is up, or every unfinished stage is out of budget.
    Failed,
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded => f.write_str("degraded"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Derives the system status from the workflow position and topology.
///
/// A failed workflow is degraded while the stage blocking it still has
/// budget (see [`StageTopology::has_retriable_stage`]), and failed once it
/// does not. Sitting on the terminal stage is healthy once that stage's
/// own check has passed; until then completion is counted like anywhere
/// else.
pub fn aggregate<S: StageKey>(
    current: WorkflowState<S>,
    topology: &StageTopology<S>,
) -> SystemStatus {
    match current {
        WorkflowState::Failed => {
            if topology.has_retriable_stage() {
                SystemStatus::Degraded
            } else {
                SystemStatus::Failed
            }
        }
        WorkflowState::Stage(stage)
            if stage == topology.terminal()
                && topology.record(stage).is_ok_and(|record| record.succeeded()) =>
        {
            SystemStatus::Healthy
        }
        WorkflowState::Stage(_) => {
            let completed = topology.completed_count();
            let total = topology.len();
            if completed == total {
                SystemStatus::Healthy
            } else if completed == 0 {
                SystemStatus::Failed
            } else {
                SystemStatus::Degraded
            }
        }
    }
}

/// One stage in a [`StatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// The stage name.
    pub name: String,
    /// The stage's retry record.
    #[serde(flatten)]
    pub record: StageRecord,
}

impl StageSnapshot {
    /// Returns a status indicator character.
    pub fn status_char(&self) -> char {
        if self.record.succeeded() {
            '✅'
        } else if self.record.is_exhausted() {
            '❌'
        } else if self.record.current_retries() > 0 {
            '🔄'
        } else {
            '⏳'
        }
    }
}

/// Read-only projection of a supervisor's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// The current stage name, or `FAILED`.
    pub current_stage: String,
    /// Every stage in topology order.
    pub stages: Vec<StageSnapshot>,
    /// Derived health.
    pub status: SystemStatus,
    /// Number of monitor ticks that ran (skipped ticks are not counted).
    pub execution_count: u64,
    /// When the supervisor was created.
    pub started_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Builds a snapshot from live state.
    pub fn capture<S: StageKey>(
        current: WorkflowState<S>,
        topology: &StageTopology<S>,
        status: SystemStatus,
        execution_count: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let stages = topology
            .iter()
            .map(|(stage, record)| StageSnapshot {
                name: stage.to_string(),
                record: record.clone(),
            })
            .collect();

        Self {
            current_stage: current.to_string(),
            stages,
            status,
            execution_count,
            started_at,
        }
    }

    /// Looks up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&StageSnapshot> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the names of stages whose latest attempt failed.
    pub fn failing_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.record.last_error().is_some())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Serializes the snapshot as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Supervisor {} at stage \"{}\" (ticks: {}, up since {})",
            self.status,
            self.current_stage,
            self.execution_count,
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f)?;

        for stage in &self.stages {
            let time_str = stage
                .record
                .last_attempt_at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());

            write!(
                f,
                "  {} {:<15} {}/{:<5} {}",
                stage.status_char(),
                stage.name,
                stage.record.current_retries(),
                stage.record.max_retries(),
                time_str
            )?;

            if let Some(error) = stage.record.last_error() {
                write!(f, "  Error: {}", error)?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Step {
        A,
        B,
        C,
    }

    impl fmt::Display for Step {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn topology() -> StageTopology<Step> {
        StageTopology::builder()
            .stage(Step::A, 2)
            .stage(Step::B, 2)
            .stage(Step::C, 2)
            .build()
            .unwrap()
    }

    fn exhaust(topology: &mut StageTopology<Step>, stage: Step) {
        let record = topology.record_mut(stage).unwrap();
        while !record.is_exhausted() {
            record.mark_failed(format!("{stage}: down"));
        }
    }

    #[test]
    fn test_fresh_topology_is_failed() {
        let topology = topology();
        assert_eq!(
            aggregate(WorkflowState::Stage(Step::A), &topology),
            SystemStatus::Failed
        );
    }

    #[test]
    fn test_partial_completion_is_degraded() {
        let mut topology = topology();
        topology.record_mut(Step::A).unwrap().mark_succeeded();
        assert_eq!(
            aggregate(WorkflowState::Stage(Step::B), &topology),
            SystemStatus::Degraded
        );
    }

    #[test]
    fn test_all_complete_is_healthy() {
        let mut topology = topology();
        for stage in [Step::A, Step::B, Step::C] {
            topology.record_mut(stage).unwrap().mark_succeeded();
        }
        assert_eq!(
            aggregate(WorkflowState::Stage(Step::A), &topology),
            SystemStatus::Healthy
        );
    }

    #[test]
    fn test_verified_terminal_stage_is_healthy() {
        let mut topology = topology();
        topology.record_mut(Step::A).unwrap().mark_succeeded();
        topology.record_mut(Step::C).unwrap().mark_succeeded();
        // B was skipped, but the terminal check passes.
        assert_eq!(
            aggregate(WorkflowState::Stage(Step::C), &topology),
            SystemStatus::Healthy
        );
    }

    #[test]
    fn test_unverified_terminal_stage_counts_completion() {
        let mut topology = topology();
        topology.record_mut(Step::A).unwrap().mark_succeeded();
        topology.record_mut(Step::B).unwrap().mark_succeeded();
        assert_eq!(
            aggregate(WorkflowState::Stage(Step::C), &topology),
            SystemStatus::Degraded
        );

        topology.record_mut(Step::C).unwrap().mark_failed("C: gone".to_string());
        assert_eq!(
            aggregate(WorkflowState::Stage(Step::C), &topology),
            SystemStatus::Degraded
        );
    }

    #[test]
    fn test_failed_with_budget_is_degraded() {
        let mut topology = topology();
        topology.record_mut(Step::A).unwrap().mark_succeeded();
        exhaust(&mut topology, Step::C);
        // B was skipped and still has budget.
        assert_eq!(aggregate(WorkflowState::Failed, &topology), SystemStatus::Degraded);
    }

    #[test]
    fn test_unreached_stages_do_not_count_as_budget() {
        let mut topology = topology();
        exhaust(&mut topology, Step::A);
        // B and C still have budget, but nothing gets past A.
        assert_eq!(aggregate(WorkflowState::Failed, &topology), SystemStatus::Failed);
    }

    #[test]
    fn test_failed_without_budget_is_failed() {
        let mut topology = topology();
        topology.record_mut(Step::A).unwrap().mark_succeeded();
        exhaust(&mut topology, Step::B);
        exhaust(&mut topology, Step::C);
        assert_eq!(aggregate(WorkflowState::Failed, &topology), SystemStatus::Failed);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SystemStatus::Degraded).unwrap(),
            r#""degraded""#
        );
        assert_eq!(SystemStatus::Healthy.to_string(), "healthy");
    }

    #[test]
    fn test_snapshot_capture() {
        let mut topology = topology();
        topology.record_mut(Step::A).unwrap().mark_succeeded();
        topology.record_mut(Step::B).unwrap().mark_failed("B: timeout".to_string());

        let snapshot = StatusSnapshot::capture(
            WorkflowState::Stage(Step::B),
            &topology,
            SystemStatus::Degraded,
            7,
            Utc::now(),
        );

        assert_eq!(snapshot.current_stage, "B");
        assert_eq!(snapshot.stages.len(), 3);
        assert_eq!(snapshot.stages[0].name, "A");
        assert_eq!(snapshot.execution_count, 7);
        assert_eq!(snapshot.failing_stages(), vec!["B"]);
        assert_eq!(snapshot.stage("B").unwrap().record.current_retries(), 1);
        assert!(snapshot.stage("Z").is_none());
    }

    #[test]
    fn test_snapshot_json_flattens_records() {
        let snapshot = StatusSnapshot::capture(
            WorkflowState::<Step>::Failed,
            &topology(),
            SystemStatus::Degraded,
            0,
            Utc::now(),
        );
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["current_stage"], "FAILED");
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["stages"][1]["name"], "B");
        assert_eq!(json["stages"][1]["max_retries"], 2);
    }

    #[test]
    fn test_snapshot_display() {
        let mut topology = topology();
        topology.record_mut(Step::A).unwrap().mark_succeeded();
        topology.record_mut(Step::B).unwrap().mark_failed("B: no join button".to_string());

        let snapshot = StatusSnapshot::capture(
            WorkflowState::Stage(Step::B),
            &topology,
            SystemStatus::Degraded,
            3,
            Utc::now(),
        );
        let display = snapshot.to_string();
        assert!(display.contains("degraded"));
        assert!(display.contains("Error: B: no join button"));
        assert!(display.contains("1/2"));
    }

    #[test]
    fn test_stage_status_chars() {
        let mut record = StageRecord::new(1);
        let pending = StageSnapshot {
            name: "a".to_string(),
            record: record.clone(),
        };
        assert_eq!(pending.status_char(), '⏳');

        record.mark_failed("a: x".to_string());
        let failed = StageSnapshot {
            name: "a".to_string(),
            record: record.clone(),
        };
        assert_eq!(failed.status_char(), '❌');

        record.mark_succeeded();
        let done = StageSnapshot {
            name: "a".to_string(),
            record,
        };
        assert_eq!(done.status_char(), '✅');
    }
}
