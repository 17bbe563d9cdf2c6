//! Stage actions of the attendance workflow.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::{AttendanceStage, Classroom, DiagnosticCapture};
use crate::presence::PresenceDetector;
use crate::{Result, StageAction, StageContext, StageOutcome};

impl Classroom {
    /// Keeps a screenshot of the page if the action did not succeed.
    async fn capture_on_failure(&self, stage: AttendanceStage, result: &Result<StageOutcome>) {
        if matches!(result, Ok(StageOutcome::Complete)) {
            return;
        }

        match self.driver.screenshot().await {
            Ok(bytes) => {
                debug!(stage = %stage, bytes = bytes.len(), "captured failure screenshot");
                self.diagnostics
                    .store(DiagnosticCapture {
                        stage,
                        taken_at: Utc::now(),
                        bytes,
                    })
                    .await;
            }
            Err(e) => debug!(stage = %stage, error = %e, "failure screenshot unavailable"),
        }
    }
}

/// Signs in, relying on credentials held by the browser profile.
#[derive(Debug)]
pub(crate) struct Login(pub(crate) Arc<Classroom>);

impl Login {
    async fn run(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let driver = &self.0.driver;
        let selectors = &self.0.site.selectors;

        driver.navigate(&self.0.site.login_url).await?;
        if driver.exists(&selectors.logged_in_marker).await? {
            debug!("already signed in");
            ctx.advance();
            return Ok(StageOutcome::Complete);
        }

        let Some(sign_in) = driver.query_selector(&selectors.sign_in_button).await? else {
            return Ok(StageOutcome::failed("sign-in control not found"));
        };
        driver.click(&sign_in).await?;

        if driver.exists(&selectors.logged_in_marker).await? {
            info!("signed in");
            ctx.advance();
            Ok(StageOutcome::Complete)
        } else {
            Ok(StageOutcome::failed("still signed out after sign-in"))
        }
    }
}

#[async_trait]
impl StageAction<AttendanceStage> for Login {
    async fn execute(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let result = self.run(ctx).await;
        self.0.capture_on_failure(ctx.stage, &result).await;
        result
    }
}

/// Loads the class page.
#[derive(Debug)]
pub(crate) struct OpenClass(pub(crate) Arc<Classroom>);

impl OpenClass {
    async fn run(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let driver = &self.0.driver;

        driver.navigate(&self.0.site.class_url).await?;
        if driver.exists(&self.0.site.selectors.class_marker).await? {
            ctx.advance();
            Ok(StageOutcome::Complete)
        } else {
            Ok(StageOutcome::failed("class page did not load"))
        }
    }
}

#[async_trait]
impl StageAction<AttendanceStage> for OpenClass {
    async fn execute(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let result = self.run(ctx).await;
        self.0.capture_on_failure(ctx.stage, &result).await;
        result
    }
}

/// Joins the live session.
///
/// Only one join runs at a time. A join attempted while another is in
/// flight reports success without advancing; the running join decides
/// where the workflow goes.
#[derive(Debug)]
pub(crate) struct JoinSession(pub(crate) Arc<Classroom>);

impl JoinSession {
    async fn run(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let Some(_guard) = self.0.join_lock.try_acquire() else {
            debug!("join already in progress");
            return Ok(StageOutcome::Complete);
        };

        let driver = &self.0.driver;
        let selectors = &self.0.site.selectors;

        if driver.exists(&selectors.joined_marker).await? {
            debug!("already in session");
            ctx.advance();
            return Ok(StageOutcome::Complete);
        }

        let Some(join) = driver.query_selector(&selectors.join_button).await? else {
            return Ok(StageOutcome::failed("join control not found"));
        };
        driver.click(&join).await?;

        if driver.exists(&selectors.joined_marker).await? {
            info!("joined session");
            ctx.advance();
            Ok(StageOutcome::Complete)
        } else {
            Ok(StageOutcome::failed("session not joined"))
        }
    }
}

#[async_trait]
impl StageAction<AttendanceStage> for JoinSession {
    async fn execute(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let result = self.run(ctx).await;
        self.0.capture_on_failure(ctx.stage, &result).await;
        result
    }
}

/// Terminal stage: verifies the participant is still in the session.
///
/// Staying present is a no-op success. A participant who dropped out is
/// sent back to [`AttendanceStage::JoinSession`].
#[derive(Debug)]
pub(crate) struct Attending {
    pub(crate) classroom: Arc<Classroom>,
    pub(crate) detector: PresenceDetector,
}

impl Attending {
    async fn run(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let driver = &self.classroom.driver;

        if !driver.exists(&self.classroom.site.selectors.class_marker).await? {
            return Ok(StageOutcome::failed("classroom view lost"));
        }

        let report = self.detector.check().await;
        if report.present {
            return Ok(StageOutcome::Complete);
        }

        warn!(basis = %report.basis, "participant no longer present; rejoining");
        self.classroom.diagnostics.record_drop();
        ctx.advance_to(AttendanceStage::JoinSession);
        Ok(StageOutcome::Complete)
    }
}

#[async_trait]
impl StageAction<AttendanceStage> for Attending {
    async fn execute(&self, ctx: &mut StageContext<AttendanceStage>) -> Result<StageOutcome> {
        let result = self.run(ctx).await;
        self.classroom.capture_on_failure(ctx.stage, &result).await;
        result
    }
}
