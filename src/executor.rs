//! Trajectory execution.
//!
//! Publishes a solved trajectory to the control bus one setpoint at a
//! time, on its own worker task. The controller is armed once at start
//! (switched into the mode expected for trajectory following), then each
//! step writes the desired position and velocity as a single batched
//! update.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use nalgebra::DMatrix;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::{bus::ControlBus, IgnoreMutexErr};

#[derive(Debug, Error, PartialEq)]
pub enum ExecutorError {
    #[error("step time must be positive, got {0}")]
    NonPositiveStepTime(f64),
    #[error("positions span {positions} dimensions but velocities span {velocities}")]
    MismatchedDimensions { positions: usize, velocities: usize },
    #[error(
        "times ({times}), positions ({positions}) and velocities ({velocities}) disagree on sample count"
    )]
    MismatchedSampleCounts {
        times: usize,
        positions: usize,
        velocities: usize,
    },
}

pub struct TrajectoryExecutor<B: ControlBus + Send + 'static> {
    bus: Arc<Mutex<B>>,
    arm_key: String,
    arm_value: Value,
    position_key: String,
    velocity_key: String,
    running: Arc<AtomicBool>,
    last_error: Arc<StdMutex<Option<B::Error>>>,
    worker: Option<JoinHandle<()>>,
}

impl<B: ControlBus + Send + 'static> TrajectoryExecutor<B> {
    pub fn new(
        bus: B,
        arm_key: impl Into<String>,
        arm_value: Value,
        position_key: impl Into<String>,
        velocity_key: impl Into<String>,
    ) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            arm_key: arm_key.into(),
            arm_value,
            position_key: position_key.into(),
            velocity_key: velocity_key.into(),
            running: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(StdMutex::new(None)),
            worker: None,
        }
    }

    /// Launches the execution loop on its own worker. Returns `Ok(false)`
    /// without effect if a trajectory is already running.
    ///
    /// The arrays must agree: positions and velocities m x N with one
    /// column per entry of `times`.
    pub fn start(
        &mut self,
        times: Vec<f64>,
        positions: DMatrix<f64>,
        velocities: DMatrix<f64>,
        step_time: f64,
    ) -> Result<bool, ExecutorError> {
        if !(step_time > 0.0) {
            return Err(ExecutorError::NonPositiveStepTime(step_time));
        }
        if positions.nrows() != velocities.nrows() {
            return Err(ExecutorError::MismatchedDimensions {
                positions: positions.nrows(),
                velocities: velocities.nrows(),
            });
        }
        if times.len() != positions.ncols() || times.len() != velocities.ncols() {
            return Err(ExecutorError::MismatchedSampleCounts {
                times: times.len(),
                positions: positions.ncols(),
                velocities: velocities.ncols(),
            });
        }
        if self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        // reap the handle of a previous, self-terminated run
        self.worker.take();

        let total = times.len();
        let step = Duration::from_secs_f64(step_time);
        let bus = self.bus.clone();
        let running = self.running.clone();
        let last_error = self.last_error.clone();
        let arm_key = self.arm_key.clone();
        let arm_value = self.arm_value.clone();
        let position_key = self.position_key.clone();
        let velocity_key = self.velocity_key.clone();

        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            // switch the controller into trajectory following before the
            // first setpoint
            if let Err(e) = bus.lock().await.set(&arm_key, arm_value).await {
                warn!("arm write failed, aborting trajectory: {e:?}");
                *last_error.lock().unwrap_ignore_poison() = Some(e);
                running.store(false, Ordering::SeqCst);
                return;
            }

            let mut segment = 0usize;
            while running.load(Ordering::SeqCst) && segment < total {
                let pos: Vec<f64> = positions.column(segment).iter().copied().collect();
                let vel: Vec<f64> = velocities.column(segment).iter().copied().collect();
                let entries = [
                    (position_key.clone(), json!(pos)),
                    (velocity_key.clone(), json!(vel)),
                ];
                if let Err(e) = bus.lock().await.set_many(&entries).await {
                    warn!("setpoint publish failed at segment {segment}: {e:?}");
                    *last_error.lock().unwrap_ignore_poison() = Some(e);
                    break;
                }
                segment += 1;
                // TODO: relative sleeps accumulate scheduling jitter over
                // long trajectories, anchor publishes to absolute deadlines
                sleep(step).await;
            }

            running.store(false, Ordering::SeqCst);
            debug!("trajectory worker exited after {segment} of {total} segments");
        });
        self.worker = Some(handle);
        Ok(true)
    }

    /// Clears the running flag and joins the worker, bounded by one
    /// in-flight step sleep. Idempotent.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.await.is_err() {
                warn!("trajectory worker panicked before join");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Last bus error observed by the worker, if any. Worker-side errors
    /// cannot propagate to the caller of `start()`, so they are retained
    /// here instead.
    pub fn take_last_error(&self) -> Option<B::Error> {
        self.last_error.lock().unwrap_ignore_poison().take()
    }
}
