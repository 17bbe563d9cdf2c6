//! The periodic monitor loop.
//!
//! A [`Monitor`] drives [`Supervisor::tick`] on a fixed cadence. Every tick
//! runs as its own task, so a tick that outlives the interval makes the
//! next one skip rather than queue up behind it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::MIN_MONITOR_INTERVAL;
use crate::{StageKey, Supervisor, TickOutcome};

/// Periodically ticks one supervisor.
#[derive(Debug)]
pub struct Monitor<S: StageKey> {
    supervisor: Arc<Supervisor<S>>,
    interval: Duration,
}

impl<S: StageKey> Monitor<S> {
    /// Creates a monitor that ticks `supervisor` every `interval`.
    ///
    /// Intervals shorter than [`MIN_MONITOR_INTERVAL`] are raised to it.
    pub fn new(supervisor: Arc<Supervisor<S>>, interval: Duration) -> Self {
        if interval < MIN_MONITOR_INTERVAL {
            warn!(
                requested = ?interval,
                minimum = ?MIN_MONITOR_INTERVAL,
                "monitor interval too short; clamping"
            );
        }
        Self {
            supervisor,
            interval: interval.max(MIN_MONITOR_INTERVAL),
        }
    }

    /// The tick cadence.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts the loop on the current runtime. The first tick fires
    /// immediately.
    ///
    /// Dropping the returned handle also stops the loop, but only
    /// [`MonitorHandle::stop`] waits for in-flight ticks.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(self.supervisor, self.interval, shutdown_rx));
        MonitorHandle { shutdown_tx, task }
    }
}

/// Handle to a running [`Monitor`].
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl MonitorHandle {
    /// Stops the loop.
    ///
    /// No tick starts after this is called. Ticks already running are
    /// awaited, not aborted. Returns the number of ticks the loop started.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(started) => started,
            Err(e) => {
                error!(error = %e, "monitor task failed");
                0
            }
        }
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run<S: StageKey>(
    supervisor: Arc<Supervisor<S>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    info!(supervisor = supervisor.name(), interval = ?interval, "monitor started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: JoinSet<TickOutcome> = JoinSet::new();
    let mut started = 0u64;

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let supervisor = Arc::clone(&supervisor);
                in_flight.spawn(async move { supervisor.tick().await });
                started += 1;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                reap(joined);
            }
        }
    }

    debug!(in_flight = in_flight.len(), "monitor stopping; draining ticks");
    while let Some(joined) = in_flight.join_next().await {
        reap(joined);
    }

    info!(supervisor = supervisor.name(), ticks = started, "monitor stopped");
    started
}

fn reap(joined: std::result::Result<TickOutcome, JoinError>) {
    match joined {
        Ok(outcome) => debug!(outcome = ?outcome, "tick finished"),
        Err(e) => error!(error = %e, "tick task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Result, StageAction, StageContext, StageOutcome, SupervisorEvent};
    use async_trait::async_trait;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct Watch;

    impl fmt::Display for Watch {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("watch")
        }
    }

    /// Takes `work` to finish each call.
    #[derive(Debug)]
    struct Slow {
        work: Duration,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StageAction<Watch> for Slow {
        async fn execute(&self, _ctx: &mut StageContext<Watch>) -> Result<StageOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            Ok(StageOutcome::Complete)
        }
    }

    fn supervisor(work: Duration) -> (Arc<Supervisor<Watch>>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let supervisor = Supervisor::builder()
            .stage(
                Watch,
                3,
                Slow {
                    work,
                    calls: Arc::clone(&calls),
                },
            )
            .build()
            .unwrap();
        (Arc::new(supervisor), calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let (supervisor, calls) = supervisor(Duration::ZERO);
        let monitor = Monitor::new(Arc::clone(&supervisor), Duration::from_secs(10));
        assert_eq!(monitor.interval(), Duration::from_secs(10));

        let handle = monitor.spawn();
        tokio::time::sleep(Duration::from_secs(35)).await;
        let started = handle.stop().await;

        // Ticks at 0s, 10s, 20s and 30s.
        assert_eq!(started, 4);
        assert_eq!(supervisor.execution_count(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let (supervisor, _calls) = supervisor(Duration::ZERO);
        let monitor = Monitor::new(Arc::clone(&supervisor), Duration::ZERO);
        assert_eq!(monitor.interval(), MIN_MONITOR_INTERVAL);

        let handle = monitor.spawn();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!handle.is_finished());
        let started = handle.stop().await;

        // Ticks at 0s, 1s and 2s.
        assert_eq!(started, 3);
        assert_eq!(supervisor.execution_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_drops_overlapping_ticks() {
        let (supervisor, calls) = supervisor(Duration::from_secs(25));
        let mut events = supervisor.subscribe();

        let handle = Monitor::new(Arc::clone(&supervisor), Duration::from_secs(10)).spawn();
        tokio::time::sleep(Duration::from_secs(35)).await;
        let started = handle.stop().await;

        // 0s runs until 25s, 10s and 20s are dropped, 30s runs until 55s.
        assert_eq!(started, 4);
        assert_eq!(supervisor.execution_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let mut skipped = 0;
        while let Ok(event) = events.try_recv() {
            if event == SupervisorEvent::TickSkipped {
                skipped += 1;
            }
        }
        assert_eq!(skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_tick() {
        let (supervisor, _calls) = supervisor(Duration::from_secs(60));

        let handle = Monitor::new(Arc::clone(&supervisor), Duration::from_secs(10)).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(supervisor.is_ticking());

        handle.stop().await;
        assert!(!supervisor.is_ticking());
        assert!(supervisor.record(Watch).await.unwrap().succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let (supervisor, _calls) = supervisor(Duration::ZERO);

        let handle = Monitor::new(Arc::clone(&supervisor), Duration::from_secs(10)).spawn();
        tokio::time::sleep(Duration::from_secs(15)).await;
        handle.stop().await;

        let count = supervisor.execution_count();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(supervisor.execution_count(), count);
    }
}
