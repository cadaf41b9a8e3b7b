//! The background memory-limiter thread (spec.md §5, §7 `MemLimit`).
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SCITECO_MEM_LIMIT` | `0` (disabled) | Byte budget for the undo log plus sampled RSS |
//! | `SCITECO_MEM_POLL_MS` | `100` | How often the background thread samples RSS |
//!
//! ## Design
//!
//! The only parallel actor the engine ever runs (spec.md §5): a thread
//! that samples the process's resident-set size into an atomic integer.
//! The parser consults the atomic after every step; it never talks to
//! the thread directly. The thread is started lazily, the first time a
//! limit is configured, and is never stopped for the lifetime of the
//! process -- disabling the limit just makes the parser stop checking
//! the atomic, matching spec.md §5 ("stopped when the limit is
//! disabled", approximated here as "ceases to matter").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

static LIMITER_INIT: Once = Once::new();
static SAMPLED_RSS_BYTES: AtomicU64 = AtomicU64::new(0);
static LIMIT_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Memory-limiter configuration, loaded from the environment the first
/// time the limiter is installed.
#[derive(Debug, Clone, Copy)]
pub struct MemLimitConfig {
    pub limit_bytes: usize,
    pub poll_interval: Duration,
}

impl MemLimitConfig {
    pub fn from_env() -> Self {
        let limit_bytes = std::env::var("SCITECO_MEM_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let poll_ms = std::env::var("SCITECO_MEM_POLL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v: &u64| v > 0)
            .unwrap_or(100);
        MemLimitConfig {
            limit_bytes,
            poll_interval: Duration::from_millis(poll_ms),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit_bytes > 0
    }
}

/// Install the limiter if `SCITECO_MEM_LIMIT` is set, spawning the
/// sampling thread. Safe to call multiple times (idempotent via `Once`).
pub fn install() {
    LIMITER_INIT.call_once(|| {
        let config = MemLimitConfig::from_env();
        if !config.is_enabled() {
            return;
        }
        LIMIT_BYTES.store(config.limit_bytes, Ordering::Relaxed);
        eprintln!(
            "[memlimit] enabled: limit={} bytes, poll={:?}",
            config.limit_bytes, config.poll_interval
        );
        if let Err(e) = std::thread::Builder::new()
            .name("sciteco-memlimit".to_string())
            .spawn(move || sampling_loop(config))
        {
            eprintln!("[memlimit] WARNING: failed to start sampling thread: {e}");
        }
    });
}

fn sampling_loop(config: MemLimitConfig) {
    loop {
        if let Some(rss) = sample_rss_bytes() {
            SAMPLED_RSS_BYTES.store(rss, Ordering::Relaxed);
        }
        std::thread::sleep(config.poll_interval);
    }
}

/// Read the process's current resident-set size. Linux-only via
/// `/proc/self/status`; other platforms report `None` (the limiter then
/// degrades to tracking only the undo log's own byte counter).
fn sample_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                return Some(kb * 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// The configured limit, or `0` if the limiter was never installed /
/// disabled.
pub fn limit_bytes() -> usize {
    LIMIT_BYTES.load(Ordering::Relaxed)
}

/// Most recently sampled RSS, in bytes (`0` before the first sample or
/// if RSS sampling isn't supported on this platform).
pub fn sampled_rss_bytes() -> u64 {
    SAMPLED_RSS_BYTES.load(Ordering::Relaxed)
}

/// Would `undo_log_bytes` (the engine's own undo-log running total) push
/// the combined footprint over budget? Returns `false` whenever the
/// limiter was never enabled.
pub fn would_exceed(undo_log_bytes: usize) -> bool {
    let limit = limit_bytes();
    limit > 0 && (sampled_rss_bytes() as usize).saturating_add(undo_log_bytes) > limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default_never_exceeds() {
        assert!(!would_exceed(usize::MAX / 2));
    }

    #[test]
    fn config_defaults() {
        // SAFETY: test-local, no concurrent access to this var within
        // the test binary's single-threaded test harness invocation.
        unsafe {
            std::env::remove_var("SCITECO_MEM_LIMIT");
        }
        let config = MemLimitConfig::from_env();
        assert_eq!(config.limit_bytes, 0);
        assert!(!config.is_enabled());
    }
}
