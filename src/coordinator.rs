//! Periodic refresh of the latest snapshot.
//!
//! A single background task drives poll cycles on a fixed interval. Each cycle
//! runs on the blocking pool while holding the bus lock; the result is published
//! through a [watch] channel, so any number of readers see the latest complete
//! snapshot without waiting on the serial line.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bus::BusGuard;
use crate::config::{DEFAULT_STALE_AFTER_FAILURES, MonitorConfig};
use crate::error::{Error, Result};
use crate::metrics::SensorTable;
use crate::poller;
use crate::registers::CIRCUIT_COUNT;
use crate::serial::{SerialConnector, SerialSession};
use crate::session::Transport;
use crate::snapshot::Snapshot;

/// What the coordinator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the next tick with a fresh (or no) snapshot.
    Idle,
    Connecting,
    Polling,
    /// Waiting for the next tick; the cached snapshot is outdated.
    Stale,
    Stopped,
}

/// The value published to readers: the latest snapshot plus the staleness flag.
#[derive(Debug, Clone)]
pub struct Reading<const N: usize = CIRCUIT_COUNT> {
    pub snapshot: Arc<Snapshot<N>>,
    pub stale: bool,
}

impl<const N: usize> Default for Reading<N> {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(Snapshot::default()),
            stale: false,
        }
    }
}

/// Cycle counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub skipped_cycles: u64,
    pub register_faults: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was published.
    Updated,
    /// The cycle failed; the previous snapshot is still served.
    Failed,
    /// Another cycle held the bus, or the coordinator is stopped.
    Skipped,
}

struct Shared<T, const N: usize> {
    bus: BusGuard<T>,
    device_id: u8,
    interval: Duration,
    stale_after: u32,
    reading: watch::Sender<Reading<N>>,
    state: watch::Sender<CoordinatorState>,
    stats: Mutex<PollStats>,
}

impl<T: Transport, const N: usize> Shared<T, N> {
    fn stats(&self) -> std::sync::MutexGuard<'_, PollStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(&self) -> Result<()> {
        let mut session = self.bus.acquire();
        self.state.send_replace(CoordinatorState::Connecting);
        let result = session.connect();
        self.state.send_replace(CoordinatorState::Idle);
        if let Err(err) = &result {
            error!(error = %err, "Failed to connect to branch power monitor");
        }
        result
    }

    /// One blocking refresh; never waits for a cycle already in flight.
    fn cycle(&self) -> RefreshOutcome {
        let Some(mut session) = self.bus.try_acquire() else {
            debug!("Poll cycle already running, skipping");
            self.stats().skipped_cycles += 1;
            return RefreshOutcome::Skipped;
        };
        if *self.state.borrow() == CoordinatorState::Stopped {
            return RefreshOutcome::Skipped;
        }

        if !session.is_connected() {
            self.state.send_replace(CoordinatorState::Connecting);
            if let Err(err) = session.connect() {
                drop(session);
                return self.record_failure(err);
            }
        }

        self.state.send_replace(CoordinatorState::Polling);
        let result = poller::read_cycle::<T, N>(&mut *session, self.device_id);
        drop(session);

        match result {
            Ok(snapshot) => self.record_success(snapshot),
            Err(err) => self.record_failure(err),
        }
    }

    fn record_success(&self, snapshot: Snapshot<N>) -> RefreshOutcome {
        {
            let mut stats = self.stats();
            stats.total_cycles += 1;
            stats.successful_cycles += 1;
            stats.register_faults += snapshot.register_faults() as u64;
            stats.consecutive_failures = 0;
            stats.last_success = snapshot.captured_at();
        }
        self.reading.send_replace(Reading {
            snapshot: Arc::new(snapshot),
            stale: false,
        });
        self.state.send_replace(CoordinatorState::Idle);
        RefreshOutcome::Updated
    }

    fn record_failure(&self, err: Error) -> RefreshOutcome {
        let consecutive_failures = {
            let mut stats = self.stats();
            stats.total_cycles += 1;
            stats.failed_cycles += 1;
            stats.consecutive_failures += 1;
            stats.last_error = Some(err.to_string());
            stats.consecutive_failures
        };
        let stale = consecutive_failures >= self.stale_after;
        warn!(
            error = %err,
            consecutive_failures,
            stale,
            "Failed to fetch power data, keeping previous snapshot"
        );

        self.reading.send_if_modified(|reading| {
            let changed = reading.stale != stale;
            reading.stale = stale;
            changed
        });
        self.state.send_replace(if stale {
            CoordinatorState::Stale
        } else {
            CoordinatorState::Idle
        });
        RefreshOutcome::Failed
    }
}

async fn refresh_on<T, const N: usize>(shared: Arc<Shared<T, N>>) -> RefreshOutcome
where
    T: Transport + Send + 'static,
{
    match task::spawn_blocking(move || shared.cycle()).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "Poll cycle task failed");
            RefreshOutcome::Failed
        }
    }
}

async fn run<T, const N: usize>(shared: Arc<Shared<T, N>>, mut stop_rx: watch::Receiver<bool>)
where
    T: Transport + Send + 'static,
{
    let period = shared.interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    // A tick that fires while a slow cycle is running is dropped, not queued.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                // Awaited outside the select so a stop never cuts a cycle short.
                refresh_on(shared.clone()).await;
            }
        }
    }
    debug!("Refresh loop exited");
}

/// Owns the device session and keeps the latest snapshot fresh.
pub struct RefreshCoordinator<T, const N: usize = CIRCUIT_COUNT> {
    shared: Arc<Shared<T, N>>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl RefreshCoordinator<SerialSession> {
    /// Build a coordinator for real hardware. Nothing is opened until [Self::start].
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        config.validate()?;
        let session = SerialSession::new(SerialConnector, config.connection_parameters());
        Self::new(session, config.slave_id, config.scan_interval())
            .with_stale_after(config.stale_after_failures)
    }
}

impl<T, const N: usize> RefreshCoordinator<T, N>
where
    T: Transport + Send + 'static,
{
    pub fn new(session: T, device_id: u8, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus: BusGuard::new(session),
                device_id,
                interval,
                stale_after: DEFAULT_STALE_AFTER_FAILURES,
                reading: watch::Sender::new(Reading::default()),
                state: watch::Sender::new(CoordinatorState::Idle),
                stats: Mutex::new(PollStats::default()),
            }),
            stop_tx: None,
            task: None,
        }
    }

    /// Flag readings as stale after this many consecutive failed cycles.
    ///
    /// The threshold is fixed once [Self::start] has run.
    pub fn with_stale_after(mut self, failures: u32) -> Result<Self> {
        if failures == 0 {
            return Err(Error::InvalidConfig(
                "stale threshold must be at least one cycle".into(),
            ));
        }
        let shared = match (&self.task, Arc::get_mut(&mut self.shared)) {
            (None, Some(shared)) => shared,
            _ => {
                return Err(Error::InvalidConfig(
                    "stale threshold cannot change after start".into(),
                ));
            }
        };
        shared.stale_after = failures;
        Ok(self)
    }

    /// Connect, poll once, then keep polling every interval.
    ///
    /// The first snapshot is available when this returns. A connection failure
    /// is returned as [Error::ConnectionFailure] so the host can retry setup
    /// later; a failed first cycle is not an error.
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        task::spawn_blocking(move || shared.connect())
            .await
            .map_err(|err| Error::TaskFailed(err.to_string()))??;

        refresh_on(self.shared.clone()).await;

        let (stop_tx, stop_rx) = watch::channel(false);
        self.task = Some(tokio::spawn(run(self.shared.clone(), stop_rx)));
        self.stop_tx = Some(stop_tx);
        info!(
            interval_secs = self.shared.interval.as_secs_f64(),
            "Refresh coordinator started"
        );
        Ok(())
    }

    /// Poll now, unless a cycle is already running.
    pub async fn refresh(&self) -> RefreshOutcome {
        refresh_on(self.shared.clone()).await
    }

    /// Cancel future ticks, let an in-flight cycle finish, then close the session.
    ///
    /// The last snapshot keeps being served.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            stop_tx.send_replace(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Refresh loop ended abnormally");
            }
        }

        let shared = self.shared.clone();
        let closed = task::spawn_blocking(move || {
            let mut session = shared.bus.acquire();
            session.close();
            shared.state.send_replace(CoordinatorState::Stopped);
        })
        .await;
        if let Err(err) = closed {
            error!(error = %err, "Failed to close session");
        }
        info!("Refresh coordinator stopped");
    }

    /// The most recent successful snapshot, or all zeros before the first one.
    pub fn latest(&self) -> Arc<Snapshot<N>> {
        self.shared.reading.borrow().snapshot.clone()
    }

    pub fn reading(&self) -> Reading<N> {
        self.shared.reading.borrow().clone()
    }

    pub fn is_stale(&self) -> bool {
        self.shared.reading.borrow().stale
    }

    /// Notified whenever a new snapshot is published or the stale flag flips.
    pub fn subscribe(&self) -> watch::Receiver<Reading<N>> {
        self.shared.reading.subscribe()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.shared.state.borrow()
    }

    pub fn stats(&self) -> PollStats {
        self.shared.stats().clone()
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Presentation values of the latest snapshot.
    pub fn sensor_table(&self) -> SensorTable {
        let reading = self.reading();
        SensorTable::from_snapshot(&reading.snapshot, self.shared.interval, reading.stale)
    }
}
