//! Driver-backed presence signals.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SiteProfile;
use crate::driver::DriverResult;
use crate::presence::{DetectionMethod, PanelState, ParticipantPanel, PresenceDetector};
use crate::Driver;

/// Builds the detector used by the attending stage.
pub(crate) fn presence_detector(driver: &Arc<dyn Driver>, site: &SiteProfile) -> PresenceDetector {
    let name = site.participant_name.clone();
    let selectors = &site.selectors;

    PresenceDetector::new(DriverPanel {
        driver: Arc::clone(driver),
        toggle: selectors.participants_toggle.clone(),
    })
    .with_quick_check(TextScan {
        label: "body_marker",
        driver: Arc::clone(driver),
        selector: selectors.page_body.clone(),
        name: name.clone(),
    })
    .with_method(AttributeMatch {
        driver: Arc::clone(driver),
        selector: attribute_selector(&selectors.participant_attribute, &name),
    })
    .with_method(TextScan {
        label: "participant_item",
        driver: Arc::clone(driver),
        selector: selectors.participant_item.clone(),
        name: name.clone(),
    })
    .with_method(TextScan {
        label: "participant_container",
        driver: Arc::clone(driver),
        selector: selectors.participants_container.clone(),
        name,
    })
}

/// `[attr*="name"]`, with quotes and backslashes in the name escaped.
pub(crate) fn attribute_selector(attribute: &str, name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[{attribute}*=\"{escaped}\"]")
}

fn mentions(text: &str, name: &str) -> bool {
    text.to_lowercase().contains(&name.to_lowercase())
}

/// Present if an element carries the name in the configured attribute.
#[derive(Debug)]
struct AttributeMatch {
    driver: Arc<dyn Driver>,
    selector: String,
}

#[async_trait]
impl DetectionMethod for AttributeMatch {
    fn name(&self) -> &str {
        "attribute_match"
    }

    async fn detect(&self) -> DriverResult<bool> {
        self.driver.exists(&self.selector).await
    }
}

/// Present if the first element matching `selector` mentions the name.
///
/// A missing element is a negative answer, not an error.
#[derive(Debug)]
struct TextScan {
    label: &'static str,
    driver: Arc<dyn Driver>,
    selector: String,
    name: String,
}

#[async_trait]
impl DetectionMethod for TextScan {
    fn name(&self) -> &str {
        self.label
    }

    async fn detect(&self) -> DriverResult<bool> {
        Ok(self
            .driver
            .text_of(&self.selector)
            .await?
            .is_some_and(|text| mentions(&text, &self.name)))
    }
}

/// Opens and closes the participant panel by clicking its toggle.
#[derive(Debug)]
struct DriverPanel {
    driver: Arc<dyn Driver>,
    toggle: String,
}

#[async_trait]
impl ParticipantPanel for DriverPanel {
    async fn open(&self) -> DriverResult<PanelState> {
        match self.driver.query_selector(&self.toggle).await? {
            Some(toggle) => {
                self.driver.click(&toggle).await?;
                Ok(PanelState::Opened)
            }
            None => Ok(PanelState::ToggleMissing),
        }
    }

    async fn close(&self) -> DriverResult<()> {
        if let Some(toggle) = self.driver.query_selector(&self.toggle).await? {
            self.driver.click(&toggle).await?;
        }
        Ok(())
    }
}
