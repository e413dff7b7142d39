//! Configuration provider interface and the keys the server recognizes.
//!
//! Providers return zero/false for absent keys; callers layer their own
//! hard-coded defaults on top.

use std::collections::HashMap;

use serde_json::Value;

/// Keys read by the server when assembling its transport and interceptor chain.
pub mod keys {
    /// Keep-alive ping interval, in seconds.
    pub const KEEPALIVE_TIME: &str = "server_keepalive_time";
    /// Keep-alive ping acknowledgement timeout, in seconds.
    pub const KEEPALIVE_TIMEOUT: &str = "server_keepalive_timeout";
    /// Connection establishment timeout, in seconds.
    pub const CONNECTION_TIMEOUT: &str = "server_connection_timeout";
    pub const ENABLE_TRACING: &str = "server_enable_tracing";
    pub const ENABLE_METRICS: &str = "server_enable_metrics";
    pub const ENABLE_SLOW_DETECTION: &str = "server_enable_slow_detection";
    /// Slow-call threshold in milliseconds; 0 disables the check.
    pub const SLOW_THRESHOLD_MS: &str = "server_slow_threshold_ms";
    pub const ENABLE_DEBUG: &str = "server_enable_debug";
}

/// Named settings lookup.
pub trait ConfigProvider: Send + Sync {
    /// Returns the integer at `key`, or 0 when absent.
    fn get_int(&self, key: &str) -> i32;

    /// Returns the 64-bit integer at `key`, or 0 when absent.
    fn get_i64(&self, key: &str) -> i64;

    /// Returns the boolean at `key`, or `false` when absent.
    fn get_bool(&self, key: &str) -> bool;
}

/// Provider with no settings at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConfig;

impl ConfigProvider for NullConfig {
    fn get_int(&self, _key: &str) -> i32 {
        0
    }

    fn get_i64(&self, _key: &str) -> i64 {
        0
    }

    fn get_bool(&self, _key: &str) -> bool {
        false
    }
}

/// In-memory provider backed by JSON values.
///
/// Values of the wrong type read as zero/false, the same as absent keys.
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, Value>,
}

impl MapConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigProvider for MapConfig {
    fn get_int(&self, key: &str) -> i32 {
        self.values
            .get(key)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(0)
    }

    fn get_i64(&self, key: &str) -> i64 {
        self.values.get(key).and_then(Value::as_i64).unwrap_or(0)
    }

    fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}
