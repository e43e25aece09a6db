//! Request/response counters surfaced via `GET /metrics` (`spec.md` §6.1).
//!
//! Counters are plain atomics, cheap to update from any request handler, plus
//! a bounded ring buffer of recent [`PerformanceAlert`]s reported by the
//! memory monitor and vector store failover.
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::model::PerformanceAlert;

const ALERT_HISTORY_CAP: usize = 128;

struct ServiceCounters {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Default for ServiceCounters {
    fn default() -> Self {
        Self { total_requests: AtomicU64::new(0), failed_requests: AtomicU64::new(0) }
    }
}

/// Process-lifetime request counters, broken down per named service
/// (`documents`, `query`, ...) plus an aggregate total.
pub struct ServiceMetrics {
    total: ServiceCounters,
    per_service: Mutex<HashMap<String, ServiceCounters>>,
    alerts: Mutex<Vec<PerformanceAlert>>,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Construct an empty metrics accumulator.
    pub fn new() -> Self {
        Self { total: ServiceCounters::default(), per_service: Mutex::new(HashMap::new()), alerts: Mutex::new(Vec::new()) }
    }

    /// Record one completed request against `service`, successful or not.
    pub fn record_request(&self, service: &str, success: bool) {
        self.total.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.total.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        let mut per_service = self.per_service.lock().expect("metrics lock poisoned");
        let counters = per_service.entry(service.to_string()).or_default();
        counters.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            counters.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Append a health/performance alert, discarding the oldest once the
    /// bounded history fills.
    pub fn record_alert(&self, alert: PerformanceAlert) {
        let mut alerts = self.alerts.lock().expect("metrics lock poisoned");
        alerts.push(alert);
        if alerts.len() > ALERT_HISTORY_CAP {
            let overflow = alerts.len() - ALERT_HISTORY_CAP;
            alerts.drain(0..overflow);
        }
    }

    /// Discard alert history down to the `keep` most recent entries, freeing
    /// the rest under memory pressure (`spec.md` §4.2 "cleanup").
    pub fn truncate_alert_history(&self, keep: usize) {
        let mut alerts = self.alerts.lock().expect("metrics lock poisoned");
        if alerts.len() > keep {
            let overflow = alerts.len() - keep;
            alerts.drain(0..overflow);
        }
    }

    /// Snapshot every counter and the recent alert history.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let per_service = self
            .per_service
            .lock()
            .expect("metrics lock poisoned")
            .iter()
            .map(|(name, counters)| (name.clone(), counters.snapshot()))
            .collect();
        MetricsSnapshot {
            total_requests: self.total.total_requests.load(Ordering::Relaxed),
            failed_requests: self.total.failed_requests.load(Ordering::Relaxed),
            success_rate: success_rate(&self.total),
            per_service,
            recent_alerts: self.alerts.lock().expect("metrics lock poisoned").clone(),
        }
    }
}

impl ServiceCounters {
    fn snapshot(&self) -> ServiceCounterSnapshot {
        ServiceCounterSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            success_rate: success_rate(self),
        }
    }
}

fn success_rate(counters: &ServiceCounters) -> f64 {
    let total = counters.total_requests.load(Ordering::Relaxed);
    if total == 0 {
        return 1.0;
    }
    let failed = counters.failed_requests.load(Ordering::Relaxed);
    (total - failed) as f64 / total as f64
}

/// Per-service request counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServiceCounterSnapshot {
    /// Requests handled by this service since startup.
    pub total_requests: u64,
    /// Of those, how many returned an error response.
    pub failed_requests: u64,
    /// `(total - failed) / total`, or `1.0` when no requests have been made.
    pub success_rate: f64,
}

/// Immutable view returned by `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Requests handled across every service since startup.
    pub total_requests: u64,
    /// Of those, how many returned an error response.
    pub failed_requests: u64,
    /// `(total - failed) / total`, or `1.0` when no requests have been made.
    pub success_rate: f64,
    /// Counters broken down by service name.
    pub per_service: HashMap<String, ServiceCounterSnapshot>,
    /// Bounded history of recent health/performance alerts.
    pub recent_alerts: Vec<PerformanceAlert>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertSeverity, now_ms};

    #[test]
    fn records_requests_and_computes_success_rate() {
        let metrics = ServiceMetrics::new();
        metrics.record_request("query", true);
        metrics.record_request("query", false);
        metrics.record_request("documents", true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.per_service["documents"].total_requests, 1);
        assert_eq!(snapshot.per_service["query"].failed_requests, 1);
    }

    #[test]
    fn success_rate_defaults_to_one_with_no_traffic() {
        let metrics = ServiceMetrics::new();
        assert_eq!(metrics.snapshot().success_rate, 1.0);
    }

    #[test]
    fn alert_history_is_capped() {
        let metrics = ServiceMetrics::new();
        for i in 0..(ALERT_HISTORY_CAP + 10) {
            metrics.record_alert(PerformanceAlert {
                kind: "test".to_string(),
                severity: AlertSeverity::Low,
                message: format!("alert {i}"),
                timestamp: now_ms(),
                metrics: HashMap::new(),
            });
        }
        assert_eq!(metrics.snapshot().recent_alerts.len(), ALERT_HISTORY_CAP);
    }
}
