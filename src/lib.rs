#![deny(clippy::unwrap_used)]
#![allow(async_fn_in_trait)]
pub mod bus;
pub mod cache;
pub mod executor;
pub mod scheduler;
pub mod spline;

use std::sync::LockResult;

use tracing::warn;

pub trait IgnoreMutexErr<T> {
    fn unwrap_ignore_poison(self) -> T;
}

impl<T> IgnoreMutexErr<T> for LockResult<T> {
    fn unwrap_ignore_poison(self) -> T {
        match self {
            Ok(r) => r,
            Err(poisoned) => {
                // Handle mutex poisoning
                let guard = poisoned.into_inner();
                warn!("mutex was poisoned, recovering from mutex poisoning");
                guard
            }
        }
    }
}
