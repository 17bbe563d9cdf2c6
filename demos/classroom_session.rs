//! Classroom attendance walkthrough.
//!
//! This example demonstrates:
//! - Loading a session configuration from TOML
//! - Driving the attendance workflow against a simulated browser
//! - Rejoining after the participant drops out of the session
//! - Running the periodic monitor and printing the status snapshot
//! - Observing supervisor events
//!
//! Run with: `cargo run --example classroom_session`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attendant::{
    AttendantConfig, ClassroomSession, Driver, DriverError, DriverResult, ElementHandle, Result,
    SupervisorEvent,
};
use tokio::sync::Mutex;

const CONFIG: &str = r##"
name = "history-101"
monitor_interval_secs = 1
driver_timeout_secs = 5

[site]
login_url = "https://school.example/login"
class_url = "https://school.example/class/101"
participant_name = "Ada Lovelace"

[site.selectors]
logged_in_marker = ".avatar"
sign_in_button = "#sign-in"
class_marker = ".class-header"
join_button = "button.join"
joined_marker = ".session-live"
participants_toggle = "#participants"
participant_attribute = "data-name"
participant_item = ".participant"
participants_container = ".participant-list"
"##;

/// A simulated browser: selectors map to element text, and clicking a
/// control reveals whatever it leads to.
#[derive(Debug, Default)]
struct SimulatedBrowser {
    elements: Mutex<HashMap<String, String>>,
    reveals: HashMap<String, (String, String)>,
}

impl SimulatedBrowser {
    fn new() -> Self {
        let mut reveals = HashMap::new();
        reveals.insert(
            "#sign-in".to_string(),
            (".avatar".to_string(), "AL".to_string()),
        );
        reveals.insert(
            "button.join".to_string(),
            (".session-live".to_string(), "Live".to_string()),
        );

        let elements = [
            ("#sign-in", "Sign in"),
            (".class-header", "History of Computing"),
            ("button.join", "Join session"),
            ("body", "History of Computing - Ada Lovelace"),
        ]
        .into_iter()
        .map(|(selector, text)| (selector.to_string(), text.to_string()))
        .collect();

        Self {
            elements: Mutex::new(elements),
            reveals,
        }
    }

    async fn show(&self, selector: &str, text: &str) {
        self.elements
            .lock()
            .await
            .insert(selector.to_string(), text.to_string());
    }

    async fn hide(&self, selector: &str) {
        self.elements.lock().await.remove(selector);
    }
}

#[async_trait]
impl Driver for SimulatedBrowser {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        println!("     🌐 navigate {url}");
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<ElementHandle>> {
        let elements = self.elements.lock().await;
        Ok(elements
            .contains_key(selector)
            .then(|| ElementHandle::new(selector)))
    }

    async fn read_text(&self, handle: &ElementHandle) -> DriverResult<String> {
        let elements = self.elements.lock().await;
        elements
            .get(handle.id())
            .cloned()
            .ok_or_else(|| DriverError::Detached(handle.id().to_string()))
    }

    async fn click(&self, handle: &ElementHandle) -> DriverResult<()> {
        println!("     🖱️  click {}", handle.id());
        if let Some((selector, text)) = self.reveals.get(handle.id()) {
            self.show(selector, text).await;
        }
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Ok(b"\x89PNG".to_vec())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("\n🏫 Attendant Classroom Session Example\n");

    let config = AttendantConfig::from_toml_str(CONFIG)?;
    let browser = Arc::new(SimulatedBrowser::new());
    let driver: Arc<dyn Driver> = browser.clone();
    let session = ClassroomSession::new(&config, driver)?;
    let supervisor = session.supervisor();

    // Subscribe to events (in background)
    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SupervisorEvent::StageSucceeded { stage, next } => {
                    let next = next.unwrap_or_else(|| "-".to_string());
                    println!("   [Event] '{stage}' succeeded, next '{next}'");
                }
                SupervisorEvent::StageFailed { stage, error, .. } => {
                    println!("   [Event] '{stage}' failed: {error}");
                }
                SupervisorEvent::StatusChanged { from, to } => {
                    println!("   [Event] status {from} -> {to}");
                }
                _ => {}
            }
        }
    });

    println!("▶️  Manual ticks: sign in, open the class, join");
    println!("─────────────────────────────────────────");
    for _ in 0..4 {
        supervisor.tick().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\n📊 Status after joining:");
    println!("─────────────────────────────────────────");
    println!("{}", supervisor.snapshot().await);

    println!("🚪 The participant gets dropped from the session");
    println!("─────────────────────────────────────────");
    browser.hide(".session-live").await;
    browser.show("body", "History of Computing").await;
    browser.show("#participants", "Participants").await;
    browser.show(".participant-list", "Charles Babbage").await;
    supervisor.tick().await;
    println!("   Drops so far: {}", session.diagnostics().session_drops());

    // The rejoin restores the participant in the list.
    browser.show(".participant-list", "Charles Babbage, Ada Lovelace").await;

    println!("\n⏱️  Monitor running for three seconds");
    println!("─────────────────────────────────────────");
    let handle = session.monitor().spawn();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let ticks = handle.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("   Monitor ran {ticks} ticks");

    println!("\n📊 Final Status:");
    println!("─────────────────────────────────────────");
    let snapshot = supervisor.snapshot().await;
    println!("{snapshot}");
    println!("{}", snapshot.to_json()?);

    Ok(())
}
