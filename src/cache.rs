//! Periodically refreshed snapshot of control bus keys.
//!
//! A [`BusCache`] keeps a local copy of selected bus keys so readers can
//! poll values without touching the bus on their own. Values are pulled
//! on a fixed cadence by a [`PeriodicScheduler`] in inline mode; the key
//! list itself is rebuilt from the configured patterns only on the first
//! run, on an explicit [`BusCache::refresh`] request, or every
//! `key_refresh_cycles` ticks, since pattern scans are the expensive
//! part.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    bus::ControlBus,
    scheduler::{DispatchMode, PeriodicScheduler, PeriodicTask},
    IgnoreMutexErr,
};

/// Cross-invocation state of the refresh task.
struct RefreshContext {
    first_run: bool,
    refresh_counter: u32,
    key_list: Vec<String>,
}

/// The periodic job that pulls bus values into the snapshot.
struct CacheRefresh<B: ControlBus + Send + 'static> {
    bus: Arc<Mutex<B>>,
    snapshot: Arc<StdMutex<HashMap<String, Value>>>,
    refresh_requested: Arc<AtomicBool>,
    last_error: Arc<StdMutex<Option<B::Error>>>,
    keys: Vec<String>,
    key_patterns: Vec<String>,
    key_refresh_cycles: u32,
}

impl<B: ControlBus + Send + 'static> PeriodicTask<RefreshContext> for CacheRefresh<B> {
    fn run(&mut self, ctx: &mut RefreshContext) -> impl Future<Output = ()> + Send {
        async move {
            let mut bus = self.bus.lock().await;

            ctx.refresh_counter += 1;
            if ctx.first_run
                || self.refresh_requested.load(Ordering::SeqCst)
                || ctx.refresh_counter > self.key_refresh_cycles
            {
                let mut list = self.keys.clone();
                for pattern in &self.key_patterns {
                    match bus.keys(pattern).await {
                        Ok(mut found) => list.append(&mut found),
                        Err(e) => {
                            warn!("key scan failed for pattern {pattern}: {e:?}");
                            *self.last_error.lock().unwrap_ignore_poison() = Some(e);
                            return;
                        }
                    }
                }
                ctx.key_list = list;
                ctx.first_run = false;
                self.refresh_requested.store(false, Ordering::SeqCst);
                ctx.refresh_counter = 0;
            }

            match bus.batch_get(&ctx.key_list).await {
                Ok(values) => {
                    let mut snapshot = self.snapshot.lock().unwrap_ignore_poison();
                    for (key, value) in ctx.key_list.iter().zip(values) {
                        if let Some(value) = value {
                            snapshot.insert(key.clone(), value);
                        }
                    }
                }
                Err(e) => {
                    warn!("cache refresh failed: {e:?}");
                    *self.last_error.lock().unwrap_ignore_poison() = Some(e);
                }
            }
        }
    }
}

pub struct BusCache<B: ControlBus + Send + 'static> {
    snapshot: Arc<StdMutex<HashMap<String, Value>>>,
    refresh_requested: Arc<AtomicBool>,
    last_error: Arc<StdMutex<Option<B::Error>>>,
    scheduler: PeriodicScheduler<RefreshContext, CacheRefresh<B>>,
}

impl<B: ControlBus + Send + 'static> BusCache<B> {
    /// Watches the explicit `keys` plus every key matching `key_patterns`.
    /// When given neither, everything on the bus (`"*"`) is watched.
    pub fn new(
        bus: B,
        refresh_rate: Duration,
        keys: Vec<String>,
        mut key_patterns: Vec<String>,
        key_refresh_cycles: u32,
    ) -> Self {
        if keys.is_empty() && key_patterns.is_empty() {
            key_patterns.push("*".to_string());
        }

        let snapshot = Arc::new(StdMutex::new(HashMap::new()));
        let refresh_requested = Arc::new(AtomicBool::new(false));
        let last_error: Arc<StdMutex<Option<B::Error>>> = Arc::new(StdMutex::new(None));

        let task = CacheRefresh {
            bus: Arc::new(Mutex::new(bus)),
            snapshot: snapshot.clone(),
            refresh_requested: refresh_requested.clone(),
            last_error: last_error.clone(),
            keys,
            key_patterns,
            key_refresh_cycles,
        };
        let context = RefreshContext {
            first_run: true,
            refresh_counter: 0,
            key_list: Vec::new(),
        };
        let scheduler = PeriodicScheduler::new(refresh_rate, task, context, DispatchMode::Inline);

        Self {
            snapshot,
            refresh_requested,
            last_error,
            scheduler,
        }
    }

    /// Starts the refresh worker. Returns `false` if already running.
    pub fn start(&mut self) -> bool {
        self.scheduler.start()
    }

    /// Stops the refresh worker. Idempotent.
    pub async fn stop(&mut self) {
        self.scheduler.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Cached value of `key`, if a refresh has seen it.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.snapshot.lock().unwrap_ignore_poison().get(key).cloned()
    }

    /// Forces the key list to be rebuilt on the next tick, picking up
    /// keys created since the last pattern scan.
    pub fn refresh(&self) {
        self.refresh_requested.store(true, Ordering::SeqCst);
    }

    /// Last bus error observed during a refresh, if any.
    pub fn take_last_error(&self) -> Option<B::Error> {
        self.last_error.lock().unwrap_ignore_poison().take()
    }
}
