//! Runtime cost-time estimator.
//!
//! Tracks two things per application: an EWMA of request service time
//! (Assign return → Idle) and a rolling window of Assign start timestamps
//! approximating the number of requests currently in flight. The two live
//! under independent mutexes; neither lock is ever held across an await or
//! while the other is taken.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Service-time tracking: when each request started being served, and the
/// smoothed cost estimate.
struct CostTracker {
    started_at: HashMap<String, Instant>,
    request_cost_time: Duration,
    rct_rate: f64,
}

/// In-flight window: Assign start timestamps younger than the current cost
/// estimate, plus the concurrency high-watermark.
struct InflightWindow {
    starts: VecDeque<Instant>,
    max_request_num: i64,
}

/// Read-only view of the estimator for stats endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeSnapshot {
    pub request_cost_ms: u64,
    pub current_request_num: i64,
    pub max_request_num: i64,
}

pub struct RuntimeStatus {
    cost: Mutex<CostTracker>,
    inflight: Mutex<InflightWindow>,
}

impl RuntimeStatus {
    /// `rct_rate` is the EWMA weight on history, in (0, 1).
    pub fn new(rct_rate: f64) -> Self {
        Self {
            cost: Mutex::new(CostTracker {
                started_at: HashMap::new(),
                request_cost_time: Duration::ZERO,
                rct_rate,
            }),
            inflight: Mutex::new(InflightWindow {
                starts: VecDeque::new(),
                max_request_num: 0,
            }),
        }
    }

    /// Record an Assign entering the scaler.
    ///
    /// Entries older than the current cost estimate are pruned before the
    /// new timestamp is pushed, so the new entry itself is never a pruning
    /// candidate.
    pub async fn assign_start(&self, timestamp: Instant) {
        let cost = self.request_cost_time().await;
        let mut inflight = self.inflight.lock().await;
        inflight.starts.retain(|start| start.elapsed() <= cost);
        inflight.starts.push_back(timestamp);
        let request_num = inflight.starts.len() as i64;
        if request_num > inflight.max_request_num {
            inflight.max_request_num = request_num;
        }
    }

    /// Record the moment Assign returned to the caller; the request is now
    /// being served by its instance.
    pub async fn assign_return(&self, request_id: &str) {
        let mut cost = self.cost.lock().await;
        cost.started_at.insert(request_id.to_string(), Instant::now());
    }

    /// Record an Idle for `request_id` and fold the observed service time
    /// into the EWMA. Unknown request ids are ignored.
    pub async fn idle_start(&self, request_id: &str) {
        let mut cost = self.cost.lock().await;
        let Some(started_at) = cost.started_at.remove(request_id) else {
            return;
        };
        let duration = started_at.elapsed();
        if cost.request_cost_time == Duration::ZERO {
            cost.request_cost_time = duration;
        } else {
            let rate = cost.rct_rate;
            cost.request_cost_time =
                cost.request_cost_time.mul_f64(rate) + duration.mul_f64(1.0 - rate);
        }
    }

    /// The smoothed service-time estimate. Zero until the first request
    /// completes.
    pub async fn request_cost_time(&self) -> Duration {
        self.cost.lock().await.request_cost_time
    }

    /// Number of requests whose Assign started within the last cost-time
    /// window.
    pub async fn current_request_num(&self) -> i64 {
        let cost = self.request_cost_time().await;
        let mut inflight = self.inflight.lock().await;
        inflight.starts.retain(|start| start.elapsed() <= cost);
        let request_num = inflight.starts.len() as i64;
        if request_num > inflight.max_request_num {
            inflight.max_request_num = request_num;
        }
        request_num
    }

    /// Highest concurrency ever observed.
    pub async fn max_request_num(&self) -> i64 {
        self.inflight.lock().await.max_request_num
    }

    pub async fn snapshot(&self) -> RuntimeSnapshot {
        let current_request_num = self.current_request_num().await;
        RuntimeSnapshot {
            request_cost_ms: self.request_cost_time().await.as_millis() as u64,
            current_request_num,
            max_request_num: self.max_request_num().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn first_completed_request_sets_cost_time() {
        let status = RuntimeStatus::new(0.9);
        assert_eq!(status.request_cost_time().await, Duration::ZERO);

        status.assign_return("r1").await;
        advance(Duration::from_millis(100)).await;
        status.idle_start("r1").await;

        assert_eq!(status.request_cost_time().await, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn cost_time_is_ewma_over_history() {
        let status = RuntimeStatus::new(0.9);

        status.assign_return("r1").await;
        advance(Duration::from_millis(100)).await;
        status.idle_start("r1").await;

        status.assign_return("r2").await;
        advance(Duration::from_millis(200)).await;
        status.idle_start("r2").await;

        // 0.9 * 100ms + 0.1 * 200ms = 110ms (modulo float rounding).
        let cost_ms = status.request_cost_time().await.as_millis();
        assert!((109..=111).contains(&cost_ms), "cost {cost_ms}ms");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_request_id_leaves_estimate_untouched() {
        let status = RuntimeStatus::new(0.9);
        status.idle_start("never-assigned").await;
        assert_eq!(status.request_cost_time().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn inflight_window_counts_concurrent_requests() {
        let status = RuntimeStatus::new(0.9);

        // Establish a 100ms cost estimate first.
        status.assign_return("warm").await;
        advance(Duration::from_millis(100)).await;
        status.idle_start("warm").await;

        status.assign_start(Instant::now()).await;
        advance(Duration::from_millis(10)).await;
        status.assign_start(Instant::now()).await;
        advance(Duration::from_millis(10)).await;
        status.assign_start(Instant::now()).await;

        assert_eq!(status.current_request_num().await, 3);
        assert_eq!(status.max_request_num().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn inflight_window_prunes_expired_starts() {
        let status = RuntimeStatus::new(0.9);

        status.assign_return("warm").await;
        advance(Duration::from_millis(100)).await;
        status.idle_start("warm").await;

        status.assign_start(Instant::now()).await;
        status.assign_start(Instant::now()).await;
        assert_eq!(status.current_request_num().await, 2);

        // Both starts fall out of the 100ms window.
        advance(Duration::from_millis(150)).await;
        assert_eq!(status.current_request_num().await, 0);

        // The high-watermark never shrinks.
        assert_eq!(status.max_request_num().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cost_estimate_keeps_only_fresh_starts() {
        let status = RuntimeStatus::new(0.9);

        // No completed request yet: the window holds only starts from the
        // current instant.
        status.assign_start(Instant::now()).await;
        advance(Duration::from_millis(1)).await;
        status.assign_start(Instant::now()).await;

        assert_eq!(status.current_request_num().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reflects_all_three_figures() {
        let status = RuntimeStatus::new(0.9);

        status.assign_return("r1").await;
        advance(Duration::from_millis(50)).await;
        status.idle_start("r1").await;
        status.assign_start(Instant::now()).await;

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.request_cost_ms, 50);
        assert_eq!(snapshot.current_request_num, 1);
        assert!(snapshot.max_request_num >= 1);
    }
}
