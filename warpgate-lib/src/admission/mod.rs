//! Admission control in front of a rate-capped extraction backend.
//!
//! Every request first asks for admission. It is either started right
//! away, parked in a priority queue until a permit frees up, or rejected
//! outright when the rate limit or the queue bound is hit.
//!
//! # Architecture
//!
//! - [`TokenBucket`]: lazily refilled bucket bounding the admission rate
//! - [`Ticket`]: a single request, identified by a [`TicketId`]
//! - [`AdmissionController`]: permit budget, wait queue and bucket behind one lock
//! - [`AdmissionConfig`]: tier preset plus queue and timeout settings
//! - [`AdmissionStatus`]: read-only utilization snapshot

mod bucket;
mod config;
mod controller;
mod stats;
mod ticket;

pub use bucket::TokenBucket;
pub use config::{
    AccountTier, AdmissionConfig, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT, TierLimits,
};
pub use controller::{Admission, AdmissionController};
pub use stats::{AdmissionStats, AdmissionStatus, CurrentStatus, LimitsStatus, QueuedTicket};
pub use ticket::{RequestMeta, Ticket, TicketId};

use log::{debug, info};
use std::sync::Arc;

use crate::task::BackgroundTask;

impl AdmissionController {
    /// Run [`cleanup_expired`](Self::cleanup_expired) every
    /// `cleanup_interval` until the returned task is shut down.
    #[must_use]
    pub fn spawn_cleanup(self: &Arc<Self>) -> BackgroundTask {
        let controller = Arc::clone(self);
        let interval = controller.config().cleanup_interval;
        info!("Starting expired-ticket sweep every {interval:?}");

        BackgroundTask::spawn("admission-cleanup", interval, interval, move || {
            let controller = Arc::clone(&controller);
            async move {
                let removed = controller.cleanup_expired();
                if removed > 0 {
                    debug!("Expired-ticket sweep removed {removed} tickets");
                }
            }
        })
    }
}
