//! Process memory-pressure monitor (`spec.md` §4.2 "Batching", §5 "Memory
//! monitor (one): samples process RSS every few seconds"). Samples RSS via
//! `sysinfo`, records [`PerformanceAlert`]s when thresholds are crossed, and
//! triggers light or aggressive cleanup callbacks.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::task::JoinHandle;

use crate::model::{AlertSeverity, PerformanceAlert, now_ms};

/// Cleanup urgency signaled by a memory sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupLevel {
    /// No cleanup required.
    None,
    /// RSS exceeded `memory_threshold_mb`; run light cleanup between batches.
    Light,
    /// RSS exceeded `memory_critical_threshold_mb`; run aggressive cleanup.
    Aggressive,
}

/// Tracks the most recent RSS sample and exposes it for health reporting.
pub struct MemoryMonitor {
    last_rss_mb: AtomicU64,
    threshold_mb: u64,
    critical_threshold_mb: u64,
}

impl MemoryMonitor {
    /// Construct a monitor with the configured thresholds.
    pub fn new(threshold_mb: u64, critical_threshold_mb: u64) -> Self {
        Self {
            last_rss_mb: AtomicU64::new(0),
            threshold_mb,
            critical_threshold_mb,
        }
    }

    /// Most recently observed RSS, in megabytes.
    pub fn last_rss_mb(&self) -> u64 {
        self.last_rss_mb.load(Ordering::Relaxed)
    }

    /// Classify the most recently sampled RSS against the configured
    /// thresholds, without taking a fresh sample.
    pub fn cleanup_level(&self) -> CleanupLevel {
        let rss_mb = self.last_rss_mb();
        if rss_mb >= self.critical_threshold_mb {
            CleanupLevel::Aggressive
        } else if rss_mb >= self.threshold_mb {
            CleanupLevel::Light
        } else {
            CleanupLevel::None
        }
    }

    /// Sample current process RSS and classify the resulting cleanup level.
    pub fn sample(&self, system: &mut System) -> (u64, CleanupLevel) {
        let pid = Pid::from_u32(std::process::id());
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        let rss_mb = system
            .process(pid)
            .map(|process| process.memory() / (1024 * 1024))
            .unwrap_or(0);
        self.last_rss_mb.store(rss_mb, Ordering::Relaxed);

        let level = if rss_mb >= self.critical_threshold_mb {
            CleanupLevel::Aggressive
        } else if rss_mb >= self.threshold_mb {
            CleanupLevel::Light
        } else {
            CleanupLevel::None
        };
        (rss_mb, level)
    }

    /// Spawn the background sampling loop, invoking `on_alert` whenever a
    /// threshold is crossed and `on_cleanup` for every non-`None` level.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        on_alert: impl Fn(PerformanceAlert) + Send + Sync + 'static,
        on_cleanup: impl Fn(CleanupLevel) + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut system = System::new();
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let (rss_mb, level) = self.sample(&mut system);
                match level {
                    CleanupLevel::Light => {
                        on_alert(PerformanceAlert {
                            kind: "memory_pressure".to_string(),
                            severity: AlertSeverity::Medium,
                            message: format!("RSS {rss_mb} MB exceeds threshold {}", self.threshold_mb),
                            timestamp: now_ms(),
                            metrics: [("rss_mb".to_string(), rss_mb as f64)].into(),
                        });
                        on_cleanup(level);
                    }
                    CleanupLevel::Aggressive => {
                        on_alert(PerformanceAlert {
                            kind: "memory_pressure".to_string(),
                            severity: AlertSeverity::High,
                            message: format!(
                                "RSS {rss_mb} MB exceeds critical threshold {}",
                                self.critical_threshold_mb
                            ),
                            timestamp: now_ms(),
                            metrics: [("rss_mb".to_string(), rss_mb as f64)].into(),
                        });
                        on_cleanup(level);
                    }
                    CleanupLevel::None => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_thresholds() {
        let monitor = MemoryMonitor::new(100, 200);
        let mut system = System::new();
        let (_, level) = monitor.sample(&mut system);
        // The current process is very unlikely to exceed either threshold in CI;
        // this just exercises the sampling path end-to-end.
        assert!(matches!(level, CleanupLevel::None | CleanupLevel::Light | CleanupLevel::Aggressive));
    }

    #[test]
    fn cleanup_level_reflects_last_sample_without_resampling() {
        let monitor = MemoryMonitor::new(100, 200);
        assert_eq!(monitor.cleanup_level(), CleanupLevel::None);

        monitor.last_rss_mb.store(150, Ordering::Relaxed);
        assert_eq!(monitor.cleanup_level(), CleanupLevel::Light);

        monitor.last_rss_mb.store(250, Ordering::Relaxed);
        assert_eq!(monitor.cleanup_level(), CleanupLevel::Aggressive);
    }
}
