//! # Runtime configuration.
//!
//! [`RuntimeConfig`] holds the knobs of one runtime. Sentinel values are resolved by
//! accessors so call sites never compare against `0` themselves:
//! - `injector_timeout = 0s` → do not wait for the injector on start
//! - `bus_capacity = 0` → clamped to 1
//! - `error_capacity = 0` → clamped to 1

use std::time::Duration;

/// Configuration of one runtime (one container).
///
/// ## Field semantics
/// - `name`: runtime id, used as the container op identity and in logs
/// - `injector_timeout`: bound on waiting for the injector in `Runtime::start`
/// - `bus_capacity`: event bus ring buffer size
/// - `error_capacity`: number of error strings kept; the oldest are evicted
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Runtime id.
    pub name: String,

    /// Maximum time [`Runtime::start`](crate::Runtime::start) waits for the injector.
    ///
    /// When it elapses, start fails with `RuntimeError::InjectorTimeout` and nothing
    /// is opened.
    pub injector_timeout: Duration,

    /// Capacity of the event bus broadcast channel.
    ///
    /// Receivers lagging more than this skip the oldest events.
    pub bus_capacity: usize,

    /// Maximum number of retained error messages.
    pub error_capacity: usize,
}

impl RuntimeConfig {
    /// Returns the injector wait as an `Option`.
    ///
    /// - `None` → do not wait
    /// - `Some(d)` → wait up to `d`
    #[inline]
    pub fn injector_wait(&self) -> Option<Duration> {
        if self.injector_timeout.is_zero() {
            None
        } else {
            Some(self.injector_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns an error capacity clamped to a minimum of 1.
    #[inline]
    pub fn error_capacity_clamped(&self) -> usize {
        self.error_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// Default configuration:
    ///
    /// - `name = "scrim"`
    /// - `injector_timeout = 30s`
    /// - `bus_capacity = 1024`
    /// - `error_capacity = 256`
    fn default() -> Self {
        Self {
            name: "scrim".to_string(),
            injector_timeout: Duration::from_secs(30),
            bus_capacity: 1024,
            error_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_means_no_wait() {
        let cfg = RuntimeConfig {
            injector_timeout: Duration::ZERO,
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.injector_wait(), None);
        assert_eq!(RuntimeConfig::default().injector_wait(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn capacities_are_clamped() {
        let cfg = RuntimeConfig {
            bus_capacity: 0,
            error_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.error_capacity_clamped(), 1);
    }
}
