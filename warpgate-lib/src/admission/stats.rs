use serde::Serialize;

use super::config::{AccountTier, TierLimits};
use super::ticket::{RequestMeta, TicketId};

/// Utilization above which the concurrency budget is considered under pressure
const CONCURRENCY_PRESSURE: f64 = 0.8;

/// Utilization above which the wait queue is considered under pressure
const QUEUE_PRESSURE: f64 = 0.6;

/// Share of rejected over admitted requests considered excessive
const REJECTION_PRESSURE: f64 = 0.1;

/// Running counters of an [`AdmissionController`](crate::AdmissionController)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    /// Tickets that were granted a permit
    pub total_requests: u64,
    /// Released tickets that reported success
    pub successful_requests: u64,
    /// Released tickets that reported failure
    pub failed_requests: u64,
    /// Rejections of any kind
    pub rejected_requests: u64,
    /// Rejections because the token bucket was empty
    pub rate_limited_requests: u64,
    /// Rejections because the wait queue was full
    pub queue_full_requests: u64,
    /// Tickets removed after exceeding their deadline
    pub timeout_requests: u64,
    /// Tickets that had to wait in the queue
    pub queued_requests: u64,
    /// Highest number of simultaneously running tickets
    pub peak_concurrent: usize,
    /// Highest observed queue length
    pub peak_queue_size: usize,
}

impl AdmissionStats {
    pub(crate) fn record_started(&mut self, active: usize) {
        self.total_requests += 1;
        self.peak_concurrent = self.peak_concurrent.max(active);
    }

    pub(crate) fn record_queued(&mut self, queued: usize) {
        self.queued_requests += 1;
        self.peak_queue_size = self.peak_queue_size.max(queued);
    }

    pub(crate) const fn record_rate_limited(&mut self) {
        self.rejected_requests += 1;
        self.rate_limited_requests += 1;
    }

    pub(crate) const fn record_queue_full(&mut self) {
        self.rejected_requests += 1;
        self.queue_full_requests += 1;
    }

    pub(crate) const fn record_finished(&mut self, success: bool) {
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }

    pub(crate) const fn record_timeouts(&mut self, count: u64) {
        self.timeout_requests += count;
    }

    /// Ratio of rejected to admitted requests
    #[must_use]
    pub fn rejection_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            return if self.rejected_requests == 0 { 0.0 } else { 1.0 };
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.rejected_requests as f64 / self.total_requests as f64;
        ratio
    }
}

/// Configured ceilings, as reported by [`AdmissionStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimitsStatus {
    /// Tier preset in use
    pub account_tier: AccountTier,
    /// Size of the concurrency budget
    pub max_concurrent: usize,
    /// Concurrent requests per connector
    pub max_per_connector: usize,
    /// Connector count
    pub connectors: usize,
    /// Token refill rate
    pub rate_limit_per_second: f64,
    /// Token bucket capacity
    pub burst_limit: u32,
    /// Wait queue bound
    pub max_queue_size: usize,
}

impl LimitsStatus {
    pub(crate) const fn new(tier: AccountTier, limits: &TierLimits, max_queue_size: usize) -> Self {
        Self {
            account_tier: tier,
            max_concurrent: limits.total_permits(),
            max_per_connector: limits.per_connector_limit,
            connectors: limits.connectors,
            rate_limit_per_second: limits.rate_per_second,
            burst_limit: limits.burst_limit,
            max_queue_size,
        }
    }
}

/// Momentary utilization, as reported by [`AdmissionStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurrentStatus {
    /// Tickets holding a permit
    pub active_requests: usize,
    /// Tickets waiting for a permit
    pub queued_requests: usize,
    /// Tokens in the bucket, rounded to two decimals
    pub available_tokens: f64,
    /// `active / max_concurrent`
    pub concurrent_utilization: f64,
    /// `queued / max_queue_size`
    pub queue_utilization: f64,
    /// Mean time queued tickets have been waiting, in seconds
    pub avg_queue_wait_secs: f64,
}

/// A queued ticket, as reported by [`AdmissionStatus`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedTicket {
    /// Ticket identity
    pub id: TicketId,
    /// Ticket priority
    pub priority: i32,
    /// Seconds spent in the queue so far
    pub wait_secs: f64,
    /// Caller metadata
    pub meta: RequestMeta,
}

/// Snapshot returned by
/// [`AdmissionController::status`](crate::AdmissionController::status)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionStatus {
    /// Configured ceilings
    pub limits: LimitsStatus,
    /// Momentary utilization
    pub current: CurrentStatus,
    /// Counters since construction
    pub statistics: AdmissionStats,
    /// The first few tickets of the wait queue
    pub queue_details: Vec<QueuedTicket>,
    /// Advisory notes derived from the numbers above
    pub recommendations: Vec<String>,
}

impl AdmissionStatus {
    /// Derive advisory notes from utilization and counters
    pub(crate) fn recommendations(current: &CurrentStatus, stats: &AdmissionStats) -> Vec<String> {
        let mut notes = Vec::new();
        if current.concurrent_utilization > CONCURRENCY_PRESSURE {
            notes.push(
                "Concurrency budget is nearly exhausted; consider a larger tier or fewer requests"
                    .to_string(),
            );
        }
        if current.queue_utilization > QUEUE_PRESSURE {
            notes.push("Wait queue is under pressure; callers may see long waits".to_string());
        }
        if stats.rejection_ratio() > REJECTION_PRESSURE {
            notes.push(
                "Rejection rate is high; lower the request rate or raise the queue size"
                    .to_string(),
            );
        }
        if current.available_tokens < 1.0 {
            notes.push("Rate limit is in effect; new requests are being rejected".to_string());
        }
        notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current(concurrent: f64, queue: f64, tokens: f64) -> CurrentStatus {
        CurrentStatus {
            active_requests: 0,
            queued_requests: 0,
            available_tokens: tokens,
            concurrent_utilization: concurrent,
            queue_utilization: queue,
            avg_queue_wait_secs: 0.0,
        }
    }

    #[test]
    fn test_peaks_are_tracked() {
        let mut stats = AdmissionStats::default();
        stats.record_started(3);
        stats.record_started(1);
        stats.record_queued(4);
        stats.record_queued(2);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.peak_concurrent, 3);
        assert_eq!(stats.queued_requests, 2);
        assert_eq!(stats.peak_queue_size, 4);
    }

    #[test]
    fn test_rejections_are_split() {
        let mut stats = AdmissionStats::default();
        stats.record_rate_limited();
        stats.record_queue_full();
        stats.record_queue_full();
        assert_eq!(stats.rejected_requests, 3);
        assert_eq!(stats.rate_limited_requests, 1);
        assert_eq!(stats.queue_full_requests, 2);
        assert!((stats.rejection_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_recommendations_when_idle() {
        let notes = AdmissionStatus::recommendations(
            &current(0.1, 0.0, 8.0),
            &AdmissionStats::default(),
        );
        assert!(notes.is_empty());
    }

    #[test]
    fn test_recommendations_under_pressure() {
        let mut stats = AdmissionStats::default();
        stats.record_started(1);
        stats.record_rate_limited();
        let notes = AdmissionStatus::recommendations(&current(0.9, 0.7, 0.2), &stats);
        assert_eq!(notes.len(), 4);
    }
}
