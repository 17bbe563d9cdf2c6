//! Configuration for an attendance supervisor.
//!
//! Loaded from TOML. Everything except the [`SiteProfile`] has a default,
//! so a minimal file only names the classroom URLs, the participant and
//! the page selectors.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AttendantError, Result};

/// Shortest allowed monitor interval.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Longest allowed monitor interval.
pub const MAX_MONITOR_INTERVAL: Duration = Duration::from_secs(300);

/// Default monitor interval.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Default per-call driver timeout.
pub const DEFAULT_DRIVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendantConfig {
    /// Name used to tell supervisors apart in logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// Seconds between monitor ticks.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Seconds before any single driver call is abandoned.
    #[serde(default = "default_driver_timeout_secs")]
    pub driver_timeout_secs: u64,

    /// Retry budget per stage.
    #[serde(default)]
    pub retries: RetryBudgets,

    /// Where the classroom lives and how to recognise it.
    pub site: SiteProfile,
}

fn default_name() -> String {
    "attendant".to_string()
}

fn default_monitor_interval_secs() -> u64 {
    DEFAULT_MONITOR_INTERVAL.as_secs()
}

fn default_driver_timeout_secs() -> u64 {
    DEFAULT_DRIVER_TIMEOUT.as_secs()
}

/// Maximum consecutive failures per stage before the workflow fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudgets {
    /// Budget for signing in.
    pub login: u32,
    /// Budget for opening the class page.
    pub open_class: u32,
    /// Budget for joining the live session.
    pub join_session: u32,
    /// Budget for the attendance check.
    pub attending: u32,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            login: 3,
            open_class: 3,
            join_session: 3,
            attending: 5,
        }
    }
}

/// Classroom URLs, participant identity and page selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Page that shows the sign-in state.
    pub login_url: String,
    /// The class page with the join control.
    pub class_url: String,
    /// Display name of the participant being kept in the session.
    pub participant_name: String,
    /// CSS selectors.
    pub selectors: Selectors,
}

/// CSS selectors used by the classroom actions and presence detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors {
    /// Present only when signed in.
    pub logged_in_marker: String,
    /// The sign-in control.
    pub sign_in_button: String,
    /// Present while the class view is shown.
    pub class_marker: String,
    /// The control that joins the live session.
    pub join_button: String,
    /// Present once the live session is joined.
    pub joined_marker: String,
    /// Element whose text the quick presence scan reads.
    #[serde(default = "default_page_body")]
    pub page_body: String,
    /// The control that opens and closes the participant panel.
    pub participants_toggle: String,
    /// Attribute on participant entries that carries the display name.
    pub participant_attribute: String,
    /// One participant entry.
    pub participant_item: String,
    /// The whole participant list.
    pub participants_container: String,
}

fn default_page_body() -> String {
    "body".to_string()
}

impl AttendantConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`AttendantError::ConfigParse`] for malformed TOML and
    /// [`AttendantError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// As [`from_toml_str`](Self::from_toml_str), plus
    /// [`AttendantError::Io`] if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// Checks value ranges and required fields.
    ///
    /// # Errors
    ///
    /// Returns [`AttendantError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let interval = self.monitor_interval();
        if interval < MIN_MONITOR_INTERVAL {
            return Err(AttendantError::InvalidConfig(format!(
                "monitor_interval_secs too short: {interval:?} < {MIN_MONITOR_INTERVAL:?}"
            )));
        }
        if interval > MAX_MONITOR_INTERVAL {
            return Err(AttendantError::InvalidConfig(format!(
                "monitor_interval_secs too long: {interval:?} > {MAX_MONITOR_INTERVAL:?}"
            )));
        }
        if self.driver_timeout_secs == 0 {
            return Err(AttendantError::InvalidConfig(
                "driver_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let site = &self.site;
        let selectors = &site.selectors;
        let required = [
            ("site.login_url", &site.login_url),
            ("site.class_url", &site.class_url),
            ("site.participant_name", &site.participant_name),
            ("selectors.logged_in_marker", &selectors.logged_in_marker),
            ("selectors.sign_in_button", &selectors.sign_in_button),
            ("selectors.class_marker", &selectors.class_marker),
            ("selectors.join_button", &selectors.join_button),
            ("selectors.joined_marker", &selectors.joined_marker),
            ("selectors.page_body", &selectors.page_body),
            ("selectors.participants_toggle", &selectors.participants_toggle),
            ("selectors.participant_attribute", &selectors.participant_attribute),
            ("selectors.participant_item", &selectors.participant_item),
            ("selectors.participants_container", &selectors.participants_container),
        ];
        if let Some((field, _)) = required
            .iter()
            .find(|(_, value)| value.trim().is_empty())
        {
            return Err(AttendantError::InvalidConfig(format!("{field} must not be empty")));
        }

        Ok(())
    }

    /// Time between monitor ticks.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// Per-call driver timeout.
    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_timeout_secs)
    }
}
