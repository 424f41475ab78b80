//! Control bus seam.
//!
//! The key/value interface through which setpoints are published and
//! robot state is read back. The store itself lives elsewhere (typically
//! a networked key/value server); this crate only consumes it. Values
//! are JSON-compatible scalars or ordered sequences of scalars.

use std::{fmt::Debug, future::Future};

use serde_json::Value;

pub mod memory;

pub trait ControlBus {
    type Error: Debug + Send + 'static;

    fn get(&mut self, key: &str) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send;

    fn set(&mut self, key: &str, value: Value)
        -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Writes the batch as one logical unit. No transactional semantics
    /// beyond the atomic batch itself.
    fn set_many(
        &mut self,
        entries: &[(String, Value)],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Values come back in request order, `None` for absent keys.
    fn batch_get(
        &mut self,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<Option<Value>>, Self::Error>> + Send;

    /// Lists the keys matching a `*`/`?` wildcard pattern.
    fn keys(&mut self, pattern: &str)
        -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send;
}
