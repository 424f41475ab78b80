//! Generic fixed-period callback engine.
//!
//! A [`PeriodicScheduler`] owns one worker task that fires a registered
//! [`PeriodicTask`] every `period` until cancelled. The same engine
//! drives cache refresh, heartbeats and any other fixed-rate job;
//! trajectory execution has its own loop in [`crate::executor`].

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    select,
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, warn};

/// How each timer expiry runs the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run the task on the scheduler's own worker. Context writes are
    /// visible to the next invocation, and no invocation begins after
    /// `stop()` has returned.
    Inline,
    /// Spawn a fire-and-forget tokio task per expiry. The number of
    /// spawned invocations is unbounded; their bodies serialize on the
    /// task and context locks, and `stop()` gives no completion
    /// guarantee for invocations already spawned.
    Detached,
}

/// A job invoked on every timer expiry with the cross-invocation
/// context.
///
/// Errors inside `run` are the task's own concern (log them or record
/// them in its own state); the scheduler does not intercept them.
pub trait PeriodicTask<C>: Send + 'static {
    fn run(&mut self, ctx: &mut C) -> impl Future<Output = ()> + Send;
}

pub struct PeriodicScheduler<C, T>
where
    C: Send + 'static,
    T: PeriodicTask<C>,
{
    period: Duration,
    dispatch: DispatchMode,
    task: Arc<Mutex<T>>,
    context: Arc<Mutex<C>>,
    worker: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl<C, T> PeriodicScheduler<C, T>
where
    C: Send + 'static,
    T: PeriodicTask<C>,
{
    pub fn new(period: Duration, task: T, context: C, dispatch: DispatchMode) -> Self {
        Self {
            period,
            dispatch,
            task: Arc::new(Mutex::new(task)),
            context: Arc::new(Mutex::new(context)),
            worker: None,
        }
    }

    /// Handle to the context carried across invocations. In inline mode
    /// the worker is the only writer while the scheduler runs.
    pub fn context(&self) -> Arc<Mutex<C>> {
        self.context.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawns the worker. Returns `false` without effect if already
    /// running. The first expiry fires one full period after this call.
    pub fn start(&mut self) -> bool {
        if self.worker.is_some() {
            return false;
        }
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let period = self.period;
        let dispatch = self.dispatch;
        let task = self.task.clone();
        let context = self.context.clone();
        let handle = tokio::spawn(async move {
            // arm like a periodic timerfd: first expiry at start + period,
            // missed expiries coalesce instead of bursting
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                select! {
                    _ = &mut stop_rx => {
                        debug!("periodic worker received stop signal");
                        break;
                    }
                    _ = interval.tick() => match dispatch {
                        DispatchMode::Inline => {
                            let mut task = task.lock().await;
                            let mut ctx = context.lock().await;
                            task.run(&mut ctx).await;
                        }
                        DispatchMode::Detached => {
                            let task = task.clone();
                            let context = context.clone();
                            tokio::spawn(async move {
                                let mut task = task.lock().await;
                                let mut ctx = context.lock().await;
                                task.run(&mut ctx).await;
                            });
                        }
                    },
                }
            }
        });
        self.worker = Some((stop_tx, handle));
        true
    }

    /// Signals the worker and waits for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            if handle.await.is_err() {
                warn!("periodic worker panicked before join");
            }
        }
    }
}
