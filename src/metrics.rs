//! Lock-free counters and running statistics shared by the pool and every
//! session it owns (C3).

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A sum/count running statistic with compare-and-set min/max tracking.
///
/// `min` starts at `u64::MAX` (a "+infinity" sentinel) and `max` starts at
/// 0; an empty statistic reports average 0.
#[derive(Debug, Default)]
pub struct RunningStat {
    count: AtomicU64,
    sum_millis: AtomicU64,
    min_millis: AtomicU64,
    max_millis: AtomicU64,
}

/// A read-only snapshot of a [`RunningStat`], safe to log or serialize.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RunningStatSnapshot {
    pub count: u64,
    pub average_millis: f64,
    pub min_millis: f64,
    pub max_millis: f64,
}

impl RunningStat {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_millis: AtomicU64::new(0),
            min_millis: AtomicU64::new(u64::MAX),
            max_millis: AtomicU64::new(0),
        }
    }

    /// Record one observation, in milliseconds.
    pub fn record(&self, value_millis: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_millis.fetch_add(value_millis, Ordering::Relaxed);

        let _ = self
            .min_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (value_millis < current).then_some(value_millis)
            });
        let _ = self
            .max_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (value_millis > current).then_some(value_millis)
            });
    }

    pub fn snapshot(&self) -> RunningStatSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum_millis.load(Ordering::Relaxed);
        let min = self.min_millis.load(Ordering::Relaxed);
        let max = self.max_millis.load(Ordering::Relaxed);

        RunningStatSnapshot {
            count,
            average_millis: if count == 0 {
                0.0
            } else {
                sum as f64 / count as f64
            },
            min_millis: if min == u64::MAX {
                f64::INFINITY
            } else {
                min as f64
            },
            max_millis: max as f64,
        }
    }
}

/// Gauges, monotonic counters, and running statistics for one pool.
///
/// All fields are plain atomics shared via `Arc` between the [`crate::pool::Pool`]
/// and every [`crate::pooled_session::PooledSession`] it owns — no locking.
#[derive(Debug, Default)]
pub struct Metrics {
    active_connections: AtomicI64,
    idle_connections: AtomicI64,

    total_connections_created: AtomicU64,
    total_connections_acquired: AtomicU64,
    total_acquisition_timeouts: AtomicU64,
    total_connection_errors: AtomicU64,
    total_keep_alives_sent: AtomicU64,
    total_timeout_closures: AtomicU64,

    time_to_first_transcript: RunningStat,
    acquisition_time: RunningStat,
    usage_time: RunningStat,
}

/// A serializable snapshot of [`Metrics`], safe to log or export.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub active_connections: i64,
    pub idle_connections: i64,
    pub pool_utilization: f64,
    pub total_connections_created: u64,
    pub total_connections_acquired: u64,
    pub total_acquisition_timeouts: u64,
    pub total_connection_errors: u64,
    pub total_keep_alives_sent: u64,
    pub total_timeout_closures: u64,
    pub time_to_first_transcript: RunningStatSnapshot,
    pub acquisition_time: RunningStatSnapshot,
    pub usage_time: RunningStatSnapshot,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_create_connection(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquire(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.idle_connections.fetch_sub(1, Ordering::Relaxed);
        self.total_connections_acquired
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.idle_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session closing. Prefers decrementing `active` if it is
    /// positive, else `idle`, and never underflows either gauge.
    pub fn record_close(&self) {
        loop {
            let active = self.active_connections.load(Ordering::SeqCst);
            if active > 0 {
                if self
                    .active_connections
                    .compare_exchange(active, active - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            let idle = self.idle_connections.load(Ordering::SeqCst);
            if idle > 0
                && self
                    .idle_connections
                    .compare_exchange(idle, idle - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return;
            }
            if idle <= 0 {
                return;
            }
        }
    }

    pub fn record_acquisition_timeout(&self) {
        self.total_acquisition_timeouts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_error(&self) {
        self.total_connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keep_alive_sent(&self) {
        self.total_keep_alives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout_closure(&self) {
        self.total_timeout_closures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_time_to_first_transcript(&self, millis: u64) {
        self.time_to_first_transcript.record(millis);
    }

    pub fn record_acquisition_time(&self, millis: u64) {
        self.acquisition_time.record(millis);
    }

    pub fn record_usage_time(&self, millis: u64) {
        self.usage_time.record(millis);
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn idle_connections(&self) -> i64 {
        self.idle_connections.load(Ordering::Relaxed)
    }

    /// Set the idle gauge directly. Used once at pool construction time to
    /// seed the gauge with `initial_size` pre-warmed sessions.
    pub fn seed_idle(&self, count: i64) {
        self.idle_connections.fetch_add(count, Ordering::Relaxed);
    }

    pub fn pool_utilization(&self) -> f64 {
        let active = self.active_connections() as f64;
        let idle = self.idle_connections() as f64;
        if active + idle == 0.0 {
            0.0
        } else {
            100.0 * active / (active + idle)
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections(),
            idle_connections: self.idle_connections(),
            pool_utilization: self.pool_utilization(),
            total_connections_created: self.total_connections_created.load(Ordering::Relaxed),
            total_connections_acquired: self.total_connections_acquired.load(Ordering::Relaxed),
            total_acquisition_timeouts: self.total_acquisition_timeouts.load(Ordering::Relaxed),
            total_connection_errors: self.total_connection_errors.load(Ordering::Relaxed),
            total_keep_alives_sent: self.total_keep_alives_sent.load(Ordering::Relaxed),
            total_timeout_closures: self.total_timeout_closures.load(Ordering::Relaxed),
            time_to_first_transcript: self.time_to_first_transcript.snapshot(),
            acquisition_time: self.acquisition_time.snapshot(),
            usage_time: self.usage_time.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stat_reports_zero_average_and_infinite_min() {
        let stat = RunningStat::new();
        let snap = stat.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.average_millis, 0.0);
        assert!(snap.min_millis.is_infinite());
        assert_eq!(snap.max_millis, 0.0);
    }

    #[test]
    fn time_to_first_transcript_averaging() {
        let stat = RunningStat::new();
        for v in [100, 50, 200] {
            stat.record(v);
        }
        let snap = stat.snapshot();
        assert_eq!(snap.min_millis, 50.0);
        assert_eq!(snap.max_millis, 200.0);
        assert!((snap.average_millis - 116.666_666_666).abs() < 1e-6);
    }

    #[test]
    fn min_le_average_le_max_when_nonempty() {
        let stat = RunningStat::new();
        for v in [7, 3, 42, 15] {
            stat.record(v);
        }
        let snap = stat.snapshot();
        assert!(snap.min_millis <= snap.average_millis);
        assert!(snap.average_millis <= snap.max_millis);
    }

    #[test]
    fn gauges_round_trip_acquire_release() {
        let metrics = Metrics::new();
        metrics.seed_idle(5);
        for _ in 0..3 {
            metrics.record_acquire();
        }
        for _ in 0..3 {
            metrics.record_release();
        }
        assert_eq!(metrics.active_connections(), 0);
        assert_eq!(metrics.idle_connections(), 5);
    }

    #[test]
    fn pool_utilization_zero_when_empty() {
        let metrics = Metrics::new();
        assert_eq!(metrics.pool_utilization(), 0.0);
    }

    #[test]
    fn pool_utilization_computed_from_active_and_idle() {
        let metrics = Metrics::new();
        metrics.seed_idle(3);
        metrics.record_acquire();
        // active=1, idle=2 -> 100 * 1/3
        assert!((metrics.pool_utilization() - 33.333_333_333).abs() < 1e-6);
    }

    #[test]
    fn record_close_prefers_active_then_idle() {
        let metrics = Metrics::new();
        metrics.record_create_connection(); // active = 1
        metrics.record_close();
        assert_eq!(metrics.active_connections(), 0);

        metrics.seed_idle(1);
        metrics.record_close();
        assert_eq!(metrics.idle_connections(), 0);

        // closing with nothing to decrement is a no-op, not a panic/underflow.
        metrics.record_close();
        assert_eq!(metrics.idle_connections(), 0);
    }
}
