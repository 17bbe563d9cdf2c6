//! Fault-tolerant presence detection.
//!
//! Decides from several unreliable signals whether a participant is still
//! in a live session. A cheap marker scan runs first; if it is
//! inconclusive the participant panel is opened and every
//! [`DetectionMethod`] votes. Methods that error abstain, and the verdict
//! is "present" when at least [`FAULT_TOLERANCE_THRESHOLD`] of the methods
//! that did run agree.

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::driver::DriverResult;

/// Minimum fraction of executed methods that must report "present".
pub const FAULT_TOLERANCE_THRESHOLD: f64 = 1.0 / 3.0;

/// Verdict when the participant panel cannot even be opened.
pub const UNVERIFIABLE_PANEL_POLICY: UnverifiablePolicy = UnverifiablePolicy::AssumePresent;

/// What to conclude when presence cannot be verified at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnverifiablePolicy {
    /// Fail open: report present rather than invent a departure.
    AssumePresent,

    /// Fail safe: report absent.
    AssumeAbsent,
}

impl UnverifiablePolicy {
    fn verdict(self) -> bool {
        matches!(self, Self::AssumePresent)
    }
}

/// One independent way of spotting the participant.
#[async_trait]
pub trait DetectionMethod: fmt::Debug + Send + Sync {
    /// Short name used in votes and logs.
    fn name(&self) -> &str;

    /// Returns whether the participant was seen. An error means the method
    /// could not run and abstains.
    async fn detect(&self) -> DriverResult<bool>;
}

/// Result of trying to open the participant panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    /// The panel is open and methods can inspect it.
    Opened,

    /// The control that opens the panel is not on the page.
    ToggleMissing,
}

/// The richer view that detection methods inspect.
#[async_trait]
pub trait ParticipantPanel: fmt::Debug + Send + Sync {
    /// Opens the panel.
    async fn open(&self) -> DriverResult<PanelState>;

    /// Closes the panel again.
    async fn close(&self) -> DriverResult<()>;
}

/// One method's contribution to a single presence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceVote {
    /// The method ran.
    Cast {
        /// The method name.
        method: String,
        /// Whether it saw the participant.
        present: bool,
    },

    /// The method errored and neither confirms nor denies.
    Abstained {
        /// The method name.
        method: String,
        /// Why it could not run.
        error: String,
    },
}

impl PresenceVote {
    /// The method that produced this vote.
    pub fn method(&self) -> &str {
        match self {
            Self::Cast { method, .. } | Self::Abstained { method, .. } => method,
        }
    }

    /// Whether the method ran.
    pub fn executed(&self) -> bool {
        matches!(self, Self::Cast { .. })
    }

    /// The method's answer, if it ran.
    pub fn present(&self) -> Option<bool> {
        match self {
            Self::Cast { present, .. } => Some(*present),
            Self::Abstained { .. } => None,
        }
    }
}

/// How a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictBasis {
    /// The quick marker scan was positive.
    QuickCheck,

    /// The panel could not be opened; the unverifiable policy decided.
    Unverifiable,

    /// The executed methods voted.
    Vote {
        /// Methods that reported present.
        successful: usize,
        /// Methods that ran at all.
        executed: usize,
    },

    /// No method could run.
    NoDetectors,
}

impl fmt::Display for VerdictBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuickCheck => f.write_str("quick check"),
            Self::Unverifiable => f.write_str("panel unavailable"),
            Self::Vote {
                successful,
                executed,
            } => write!(f, "{successful}/{executed} methods agreed"),
            Self::NoDetectors => f.write_str("no detector could run"),
        }
    }
}

/// Outcome of one presence check.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceReport {
    /// The verdict.
    pub present: bool,
    /// How the verdict was reached.
    pub basis: VerdictBasis,
    /// Individual votes, empty when no vote was held.
    pub votes: Vec<PresenceVote>,
}

/// Combines votes into a verdict.
///
/// With no executed method the verdict is absent; this is checked before
/// any ratio is computed.
pub fn tally(votes: &[PresenceVote], threshold: f64) -> (bool, VerdictBasis) {
    let executed = votes.iter().filter(|v| v.executed()).count();
    let successful = votes.iter().filter(|v| v.present() == Some(true)).count();

    if executed == 0 {
        return (false, VerdictBasis::NoDetectors);
    }

    let success_rate = successful as f64 / executed as f64;
    (
        success_rate >= threshold,
        VerdictBasis::Vote {
            successful,
            executed,
        },
    )
}

/// Multi-signal presence detector.
#[derive(Debug)]
pub struct PresenceDetector {
    quick_check: Option<Box<dyn DetectionMethod>>,
    panel: Box<dyn ParticipantPanel>,
    methods: Vec<Box<dyn DetectionMethod>>,
    threshold: f64,
    unverifiable_policy: UnverifiablePolicy,
}

impl PresenceDetector {
    /// Creates a detector around the given panel, with no methods yet.
    pub fn new(panel: impl ParticipantPanel + 'static) -> Self {
        Self {
            quick_check: None,
            panel: Box::new(panel),
            methods: Vec::new(),
            threshold: FAULT_TOLERANCE_THRESHOLD,
            unverifiable_policy: UNVERIFIABLE_PANEL_POLICY,
        }
    }

    /// Sets the cheap single-shot check that runs before the panel opens.
    pub fn with_quick_check(mut self, method: impl DetectionMethod + 'static) -> Self {
        self.quick_check = Some(Box::new(method));
        self
    }

    /// Adds a voting method.
    pub fn with_method(mut self, method: impl DetectionMethod + 'static) -> Self {
        self.methods.push(Box::new(method));
        self
    }

    /// Overrides the fault-tolerance threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Overrides what an unopenable panel means.
    pub fn with_unverifiable_policy(mut self, policy: UnverifiablePolicy) -> Self {
        self.unverifiable_policy = policy;
        self
    }

    /// Number of voting methods.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Runs one presence check.
    pub async fn check(&self) -> PresenceReport {
        let span = info_span!("presence", methods = self.methods.len());

        async {
            if let Some(quick) = &self.quick_check {
                match quick.detect().await {
                    Ok(true) => {
                        debug!(method = quick.name(), "quick check positive");
                        return PresenceReport {
                            present: true,
                            basis: VerdictBasis::QuickCheck,
                            votes: Vec::new(),
                        };
                    }
                    Ok(false) => debug!(method = quick.name(), "quick check inconclusive"),
                    Err(e) => debug!(method = quick.name(), error = %e, "quick check errored"),
                }
            }

            match self.panel.open().await {
                Ok(PanelState::Opened) => {}
                Ok(PanelState::ToggleMissing) => {
                    let present = self.unverifiable_policy.verdict();
                    warn!(present, "participant panel toggle not found; applying policy");
                    return Self::unverifiable(present);
                }
                Err(e) => {
                    let present = self.unverifiable_policy.verdict();
                    warn!(
                        present,
                        error = %e,
                        "failed to open participant panel; applying policy"
                    );
                    return Self::unverifiable(present);
                }
            }

            let mut votes = Vec::with_capacity(self.methods.len());
            for method in &self.methods {
                let vote = match method.detect().await {
                    Ok(present) => PresenceVote::Cast {
                        method: method.name().to_string(),
                        present,
                    },
                    Err(e) => {
                        debug!(method = method.name(), error = %e, "detection method abstained");
                        PresenceVote::Abstained {
                            method: method.name().to_string(),
                            error: e.to_string(),
                        }
                    }
                };
                votes.push(vote);
            }

            let (present, basis) = tally(&votes, self.threshold);

            if let Err(e) = self.panel.close().await {
                debug!(error = %e, "failed to close participant panel");
            }

            info!(present, basis = %basis, "presence verdict");
            PresenceReport {
                present,
                basis,
                votes,
            }
        }
        .instrument(span)
        .await
    }

    fn unverifiable(present: bool) -> PresenceReport {
        PresenceReport {
            present,
            basis: VerdictBasis::Unverifiable,
            votes: Vec::new(),
        }
    }
}
