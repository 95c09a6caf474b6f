//! Cron driven task scheduling with a random start delay and graceful shutdown.
//!
//! Every cron firing waits a random delay in `[0, random_delay)` seconds before the task
//! runs. A shutdown cancels pending waits, stops further firings and then waits for a
//! task already running to finish. A firing that would start while the previous run is
//! still going is skipped.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

static DISABLED: &str = "none";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// Run a single time right away
    Once,
    Cron(String),
}

fn expand_descriptor(expr: &str) -> Option<&'static str> {
    match expr.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case(DISABLED) {
            return Ok(Schedule::Once);
        }

        let expr = expand_descriptor(s).unwrap_or(s);
        cron_parser::parse(expr, &Utc::now()).map_err(|e| Error::InvalidCron {
            expr: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Schedule::Cron(expr.to_string()))
    }
}

impl Display for Schedule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Once => f.write_str(DISABLED),
            Schedule::Cron(expr) => f.write_str(expr),
        }
    }
}

impl Schedule {
    /// First firing strictly after `after`, `None` for [`Schedule::Once`].
    pub fn next_after(&self, after: &DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            Schedule::Once => Ok(None),
            Schedule::Cron(expr) => cron_parser::parse(expr, after)
                .map(Some)
                .map_err(|e| Error::InvalidCron {
                    expr: expr.clone(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// Random delays are drawn from `[0, bound)`, so the bound is at least one second.
pub fn jitter_bound(configured: i64) -> u64 {
    if configured <= 0 {
        warn!("Random delay must be at least 1 second, got {configured}, using 1");
        1
    } else {
        configured as u64
    }
}

pub fn draw_delay(bound: u64) -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(0..bound.max(1)))
}

#[derive(Debug, Default)]
struct GateState {
    cancelled: bool,
    running: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Skip {
    Cancelled,
    Overrun,
}

/// Decides under one lock whether a waiting firing may start running.
#[derive(Debug, Default)]
pub struct TaskGate {
    state: Mutex<GateState>,
}

pub struct RunningGuard {
    gate: Arc<TaskGate>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.gate.lock().running = false;
    }
}

impl TaskGate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_enter(self: &Arc<Self>) -> std::result::Result<RunningGuard, Skip> {
        let mut state = self.lock();
        if state.cancelled {
            return Err(Skip::Cancelled);
        }
        if state.running {
            return Err(Skip::Overrun);
        }
        state.running = true;
        Ok(RunningGuard { gate: self.clone() })
    }

    pub fn cancel(&self) {
        self.lock().cancelled = true;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }
}

pub struct Scheduler {
    schedule: Schedule,
    random_delay: u64,
    delay_fn: fn(u64) -> Duration,
}

impl Scheduler {
    pub fn new(schedule: Schedule, random_delay: i64) -> Self {
        Self {
            schedule,
            random_delay: jitter_bound(random_delay),
            delay_fn: draw_delay,
        }
    }

    #[cfg(test)]
    fn with_delay_fn(mut self, delay_fn: fn(u64) -> Duration) -> Self {
        self.delay_fn = delay_fn;
        self
    }

    /// Runs `task` per the schedule until `shutdown` completes.
    ///
    /// [`Schedule::Once`] runs the task right away and returns its result. Otherwise task
    /// failures are logged and the scheduler keeps going; only a broken schedule ends it
    /// with an error.
    pub async fn run<F, S>(&self, task: F, shutdown: S) -> Result<()>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
        S: Future<Output = ()>,
    {
        let task = Arc::new(task);
        let Schedule::Cron(_) = &self.schedule else {
            info!("No schedule, running once");
            return tokio::task::spawn_blocking(move || (*task)()).await?;
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let gate = Arc::new(TaskGate::default());
        let mut in_flight = JoinSet::new();
        let mut last_fire = Utc::now();
        tokio::pin!(shutdown);

        loop {
            let now = Utc::now();
            let Some(fire_at) = self.schedule.next_after(&now.max(last_fire))? else {
                break;
            };
            info!("Next run at {fire_at}");
            let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(wait) => {}
            }
            last_fire = fire_at;

            let delay = (self.delay_fn)(self.random_delay);
            in_flight.spawn(fire(task.clone(), gate.clone(), cancel_rx.clone(), delay));
            while let Some(res) = in_flight.try_join_next() {
                if let Err(e) = res {
                    error!("Scheduled run aborted: {e}");
                }
            }
        }

        info!("Shutting down scheduler");
        gate.cancel();
        let _ = cancel_tx.send(true);
        if gate.is_running() {
            info!("Waiting for the running task to finish");
        }
        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                error!("Scheduled run aborted: {e}");
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }
}

async fn cancelled(mut cancel: watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            break;
        }
    }
}

async fn fire<F>(task: Arc<F>, gate: Arc<TaskGate>, cancel: watch::Receiver<bool>, delay: Duration)
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    if !delay.is_zero() {
        info!("Waiting {}s before running", delay.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancelled(cancel) => {
                info!("Shutdown while waiting, skipping run");
                return;
            }
        }
    }

    let _guard = match gate.try_enter() {
        Ok(guard) => guard,
        Err(Skip::Cancelled) => {
            info!("Shutdown before start, skipping run");
            return;
        }
        Err(Skip::Overrun) => {
            warn!("Previous run still in progress, skipping this one");
            return;
        }
    };

    match tokio::task::spawn_blocking(move || (*task)()).await {
        Ok(Ok(())) => info!("Scheduled run finished"),
        Ok(Err(e)) => error!("Scheduled run failed: {e}"),
        Err(e) => error!("Scheduled run panicked: {e}"),
    }
}

/// Completes on the first SIGINT or SIGTERM. A second one while the scheduler drains
/// ends the process right away with exit code 1.
pub async fn shutdown_signal() {
    wait_for_signal().await;
    tokio::spawn(exit_on(wait_for_signal(), force_exit));
}

fn force_exit() {
    std::process::exit(1)
}

async fn exit_on<S, E>(signal: S, exit: E)
where
    S: Future<Output = ()>,
    E: FnOnce(),
{
    signal.await;
    warn!("Second shutdown signal, exiting without waiting for the running task");
    exit();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            error!("Cannot install signal handlers: {e}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(windows)]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!("Cannot install Ctrl+C handler: {e}");
            std::future::pending().await
        }
    }
}
