//! The browser driver capability.
//!
//! The supervisor never touches a DOM directly. Stage actions and presence
//! detection methods go through [`Driver`], and [`TimedDriver`] puts one
//! uniform timeout around every call so a hung page cannot stall a tick
//! forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::DriverError;

/// Result type for driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Opaque reference to an element found by [`Driver::query_selector`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    /// Wraps a driver-specific element identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The driver-specific element identifier.
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Page automation primitives supplied by a browser backend.
///
/// Every call may suspend and may fail.
#[async_trait]
pub trait Driver: std::fmt::Debug + Send + Sync {
    /// Loads `url` in the current page.
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Finds the first element matching `selector`.
    async fn query_selector(&self, selector: &str) -> DriverResult<Option<ElementHandle>>;

    /// Reads the visible text of an element.
    async fn read_text(&self, handle: &ElementHandle) -> DriverResult<String>;

    /// Clicks an element.
    async fn click(&self, handle: &ElementHandle) -> DriverResult<()>;

    /// Captures the current page as an image.
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// Returns the text of the first element matching `selector`, if any.
    async fn text_of(&self, selector: &str) -> DriverResult<Option<String>> {
        match self.query_selector(selector).await? {
            Some(handle) => self.read_text(&handle).await.map(Some),
            None => Ok(None),
        }
    }

    /// Returns true if an element matches `selector`.
    async fn exists(&self, selector: &str) -> DriverResult<bool> {
        Ok(self.query_selector(selector).await?.is_some())
    }
}

/// Applies one timeout to every call of an inner driver.
#[derive(Debug, Clone)]
pub struct TimedDriver {
    inner: Arc<dyn Driver>,
    timeout: Duration,
}

impl TimedDriver {
    /// Wraps `inner`, bounding every call by `timeout`.
    pub fn new(inner: Arc<dyn Driver>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> DriverResult<T>
    where
        F: Future<Output = DriverResult<T>> + Send,
        T: Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.timeout, "driver call timed out");
                Err(DriverError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl Driver for TimedDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.bounded("navigate", self.inner.navigate(url)).await
    }

    async fn query_selector(&self, selector: &str) -> DriverResult<Option<ElementHandle>> {
        self.bounded("query_selector", self.inner.query_selector(selector))
            .await
    }

    async fn read_text(&self, handle: &ElementHandle) -> DriverResult<String> {
        self.bounded("read_text", self.inner.read_text(handle)).await
    }

    async fn click(&self, handle: &ElementHandle) -> DriverResult<()> {
        self.bounded("click", self.inner.click(handle)).await
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.bounded("screenshot", self.inner.screenshot()).await
    }
}
