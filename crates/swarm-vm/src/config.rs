//! VM configuration.
//!
//! Every knob has a CLI flag and a `SWARM_*` environment fallback; the
//! environment is consulted by [`VmConfig::from_env`].

use std::env;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Worker threads servicing the queue. Zero runs queued jobs inline on
    /// the draining thread.
    pub max_threads: usize,
    /// Sleep between worker queue polls, in microseconds.
    pub queue_sleep_us: u64,
    /// Lock-acquisition attempts before `AcquireLockMaxAttemptsExceeded`.
    pub lock_max_retries: usize,
    /// Cooperative yield between lock attempts, in microseconds.
    pub lock_sleep_us: u64,
    /// Keep position annotations and verbose tracing.
    pub debug: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_threads: 4,
            queue_sleep_us: 100,
            lock_max_retries: 10_000,
            lock_sleep_us: 50,
            debug: false,
        }
    }
}

impl VmConfig {
    /// Defaults overridden by `SWARM_MAX_THREADS`, `SWARM_QUEUE_SLEEP_US`,
    /// `SWARM_LOCK_MAX_RETRIES`, and `SWARM_DEBUG` (any truthy value).
    pub fn from_env() -> Self {
        let mut config = VmConfig::default();
        if let Some(n) = read_env("SWARM_MAX_THREADS") {
            config.max_threads = n as usize;
        }
        if let Some(n) = read_env("SWARM_QUEUE_SLEEP_US") {
            config.queue_sleep_us = n;
        }
        if let Some(n) = read_env("SWARM_LOCK_MAX_RETRIES") {
            config.lock_max_retries = n as usize;
        }
        if let Ok(v) = env::var("SWARM_DEBUG") {
            config.debug = is_truthy(&v);
        }
        config
    }
}

fn read_env(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn is_truthy(v: &str) -> bool {
    !matches!(v.trim(), "" | "0" | "false" | "no" | "off")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(is_truthy("1"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }
}
