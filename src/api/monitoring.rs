//! Counters and the Prometheus text exposition endpoint

use super::server::AppState;
use axum::extract::State;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide counters, incremented from the handlers.
pub struct MetricsRegistry {
    pub http_requests_total: AtomicU64,
    pub errors_total: AtomicU64,
    pub purchases_total: AtomicU64,
    pub plays_total: AtomicU64,
    pub wins_total: AtomicU64,
    pub deposits_total: AtomicU64,
    pub webhooks_total: AtomicU64,
    started_at: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            http_requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            purchases_total: AtomicU64::new(0),
            plays_total: AtomicU64::new(0),
            wins_total: AtomicU64::new(0),
            deposits_total: AtomicU64::new(0),
            webhooks_total: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    let m = &state.metrics;
    let (cache_hits, cache_misses) = state.sessions.cache_stats();
    let mut out = String::with_capacity(1024);

    let counters = [
        ("raspa_http_requests_total", &m.http_requests_total),
        ("raspa_errors_total", &m.errors_total),
        ("raspa_purchases_total", &m.purchases_total),
        ("raspa_plays_total", &m.plays_total),
        ("raspa_wins_total", &m.wins_total),
        ("raspa_deposits_total", &m.deposits_total),
        ("raspa_webhooks_total", &m.webhooks_total),
    ];
    for (name, counter) in counters {
        out.push_str(&format!(
            "# TYPE {name} counter\n{name} {}\n",
            counter.load(Ordering::Relaxed)
        ));
    }
    out.push_str(&format!(
        "# TYPE raspa_session_cache_hits_total counter\nraspa_session_cache_hits_total {cache_hits}\n"
    ));
    out.push_str(&format!(
        "# TYPE raspa_session_cache_misses_total counter\nraspa_session_cache_misses_total {cache_misses}\n"
    ));
    out.push_str(&format!(
        "# TYPE raspa_uptime_seconds gauge\nraspa_uptime_seconds {}\n",
        m.uptime_seconds()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero_and_increment() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.plays_total.load(Ordering::Relaxed), 0);
        MetricsRegistry::incr(&registry.plays_total);
        MetricsRegistry::incr(&registry.plays_total);
        assert_eq!(registry.plays_total.load(Ordering::Relaxed), 2);
    }
}
