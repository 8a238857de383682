use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use super::bucket::TokenBucket;
use super::config::{AdmissionConfig, TierLimits};
use super::stats::{AdmissionStats, AdmissionStatus, CurrentStatus, LimitsStatus, QueuedTicket};
use super::ticket::{RequestMeta, Ticket, TicketId, WaitQueue};
use crate::{ErrorKind, Result};

/// Rough time a queued caller waits per position ahead of it
const ESTIMATED_WAIT_PER_POSITION: Duration = Duration::from_secs(5);

/// Number of queued tickets listed in [`AdmissionStatus::queue_details`]
const QUEUE_DETAILS_LEN: usize = 5;

/// Outcome of a successful [`AdmissionController::try_acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A permit was granted immediately
    Running(TicketId),
    /// The budget is exhausted; the ticket waits in the queue
    Queued {
        /// Ticket to pass to [`AdmissionController::await_slot`]
        id: TicketId,
        /// 1-based position in the wait queue at enqueue time
        position: usize,
        /// Rough estimate of the time until a permit is granted
        estimated_wait: Duration,
    },
}

impl Admission {
    /// The ticket this admission refers to
    #[must_use]
    pub const fn id(&self) -> TicketId {
        match self {
            Admission::Running(id) | Admission::Queued { id, .. } => *id,
        }
    }

    /// Returns `true` if the ticket is already running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Admission::Running(_))
    }
}

/// A running ticket together with the permit it holds.
/// Dropping the entry returns the permit to the budget.
#[derive(Debug)]
struct ActiveTicket {
    ticket: Ticket,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct State {
    active: HashMap<TicketId, ActiveTicket>,
    queue: WaitQueue,
    bucket: TokenBucket,
    stats: AdmissionStats,
}

/// Where a ticket stands when its waiter checks in
enum Standing {
    Running,
    Queued(usize),
    Unknown,
}

/// Gate in front of the extraction backend.
///
/// The controller owns three things:
///
/// - a concurrency budget of `connectors × per_connector_limit` permits,
///   each held by exactly one running ticket
/// - a wait queue ordered by priority (descending), then arrival
/// - a [`TokenBucket`] bounding the admission rate
///
/// All state sits behind a single lock that is never held across an
/// `.await`. The only suspending operation is
/// [`await_slot`](Self::await_slot).
///
/// # Examples
///
/// ```
/// use warpgate_lib::{AdmissionConfig, AdmissionController, RequestMeta};
///
/// # #[tokio::main]
/// # async fn main() -> warpgate_lib::Result<()> {
/// let controller = AdmissionController::new(AdmissionConfig::default());
/// let admission = controller.try_acquire(RequestMeta::for_target("dQw4w9WgXcQ"), 0)?;
/// controller.await_slot(admission.id(), None).await?;
/// // ... perform the request ...
/// controller.release(admission.id(), true);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    limits: TierLimits,
    semaphore: Arc<Semaphore>,
    state: Mutex<State>,
    notify: Notify,
}

impl AdmissionController {
    /// Create a controller with a full token bucket and an idle budget
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        let limits = config.effective_limits();
        info!(
            "Admission controller ready: max concurrency={}, rate={}/s, burst={}, tier={}",
            limits.total_permits(),
            limits.rate_per_second,
            limits.burst_limit,
            config.tier
        );

        Self {
            semaphore: Arc::new(Semaphore::new(limits.total_permits())),
            state: Mutex::new(State {
                active: HashMap::new(),
                queue: WaitQueue::default(),
                bucket: TokenBucket::new(limits.burst_limit, limits.rate_per_second),
                stats: AdmissionStats::default(),
            }),
            notify: Notify::new(),
            limits,
            config,
        }
    }

    /// Ask for admission.
    ///
    /// The token bucket is checked first, then the queue bound. A token is
    /// only taken once the request is accepted, and a queued ticket does
    /// not take another one while it waits.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::RateLimited`] if the token bucket is empty
    /// - [`ErrorKind::QueueFull`] if the wait queue is at its maximum length
    pub fn try_acquire(&self, meta: RequestMeta, priority: i32) -> Result<Admission> {
        let now = Instant::now();
        let mut state = self.lock();

        if !state.bucket.has_token(now) {
            state.stats.record_rate_limited();
            warn!("Request rejected by rate limit: {meta}");
            return Err(ErrorKind::RateLimited);
        }

        if state.queue.len() >= self.config.max_queue_size {
            state.stats.record_queue_full();
            warn!("Request rejected, queue is full: {meta}");
            return Err(ErrorKind::QueueFull(self.config.max_queue_size));
        }

        state.bucket.try_consume(now);
        let mut ticket = Ticket::new(priority, meta, now);
        let id = ticket.id;

        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            ticket.started_at = Some(now);
            state.active.insert(
                id,
                ActiveTicket {
                    ticket,
                    _permit: permit,
                },
            );
            let active = state.active.len();
            state.stats.record_started(active);
            info!("Ticket {id} running immediately (active: {active})");
            return Ok(Admission::Running(id));
        }

        let position = state.queue.push(ticket);
        let queued = state.queue.len();
        state.stats.record_queued(queued);
        let estimated_wait = ESTIMATED_WAIT_PER_POSITION * u32::try_from(position).unwrap_or(u32::MAX);
        info!(
            "Ticket {id} queued at position {position} (estimated wait: {}s)",
            estimated_wait.as_secs()
        );
        Ok(Admission::Queued {
            id,
            position,
            estimated_wait,
        })
    }

    /// Suspend until the ticket holds a permit.
    ///
    /// The ticket is re-checked whenever a permit is released and at least
    /// every `poll_interval`. A queued ticket at the head of the queue
    /// takes a free permit itself. `timeout` defaults to the configured
    /// request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AdmissionTimeout`] if no permit was granted in
    /// time, or if the ticket is no longer known (already expired or
    /// released). On timeout the ticket is removed from wherever it is and
    /// any permit it held is returned.
    pub async fn await_slot(&self, id: TicketId, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking so a release in between is not missed
            let notified = self.notify.notified();

            match self.check_in(id) {
                Standing::Running => return Ok(()),
                Standing::Queued(position) => {
                    debug!("Ticket {id} waiting at queue position {position}");
                }
                Standing::Unknown => {
                    warn!("Ticket {id} is no longer known, it has expired or been released");
                    return Err(ErrorKind::AdmissionTimeout(timeout));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.config.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, notified).await;
        }

        if self.expire(id) {
            warn!("Ticket {id} timed out after {timeout:?}");
        }
        Err(ErrorKind::AdmissionTimeout(timeout))
    }

    /// Ask for admission and wait for a permit in one go.
    ///
    /// # Errors
    ///
    /// Any error of [`try_acquire`](Self::try_acquire) or
    /// [`await_slot`](Self::await_slot).
    pub async fn acquire(&self, meta: RequestMeta, priority: i32) -> Result<TicketId> {
        let admission = self.try_acquire(meta, priority)?;
        if let Admission::Queued { id, .. } = admission {
            self.await_slot(id, None).await?;
        }
        Ok(admission.id())
    }

    /// Release a ticket, returning its permit and recording the outcome.
    ///
    /// Releasing a queued ticket cancels it. Releasing an unknown or
    /// already-released ticket does nothing. Returns `true` if the ticket
    /// was found.
    pub fn release(&self, id: TicketId, success: bool) -> bool {
        let mut state = self.lock();

        if let Some(entry) = state.active.remove(&id) {
            state.stats.record_finished(success);
            let started = entry.ticket.started_at.unwrap_or(entry.ticket.created_at);
            info!(
                "Ticket {id} finished after {:.1}s (success: {success})",
                started.elapsed().as_secs_f64()
            );
            drop(entry);
            self.promote_waiting(&mut state);
            drop(state);
            self.notify.notify_waiters();
            return true;
        }

        if state.queue.remove(id).is_some() {
            debug!("Ticket {id} cancelled while queued");
            return true;
        }

        debug!("Ticket {id} already released");
        false
    }

    /// Remove every ticket older than the request timeout, returning the
    /// number of tickets removed.
    ///
    /// Meant to be called periodically; it is what reclaims permits from
    /// callers that never released them.
    pub fn cleanup_expired(&self) -> usize {
        let timeout = self.config.request_timeout;
        let mut state = self.lock();

        let expired: Vec<TicketId> = state
            .active
            .values()
            .filter(|entry| entry.ticket.created_at.elapsed() > timeout)
            .map(|entry| entry.ticket.id)
            .collect();
        for id in &expired {
            warn!("Reclaiming permit of expired ticket {id}");
            state.active.remove(id);
        }

        let expired_queued = state
            .queue
            .remove_where(|ticket| ticket.created_at.elapsed() > timeout);
        if expired_queued > 0 {
            warn!("Dropped {expired_queued} expired queued tickets");
        }

        let removed = expired.len() + expired_queued;
        if removed > 0 {
            state.stats.record_timeouts(removed as u64);
            self.promote_waiting(&mut state);
            drop(state);
            self.notify.notify_waiters();
        }
        removed
    }

    /// Current utilization, counters and advice. Pure read.
    #[must_use]
    pub fn status(&self) -> AdmissionStatus {
        let now = Instant::now();
        let state = self.lock();

        let max_concurrent = self.limits.total_permits();
        let active = state.active.len();
        let queued = state.queue.len();

        let waits: Vec<f64> = state
            .queue
            .iter()
            .map(|ticket| now.saturating_duration_since(ticket.created_at).as_secs_f64())
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let avg_queue_wait_secs = if waits.is_empty() {
            0.0
        } else {
            waits.iter().sum::<f64>() / waits.len() as f64
        };

        let current = CurrentStatus {
            active_requests: active,
            queued_requests: queued,
            available_tokens: round2(state.bucket.available(now)),
            concurrent_utilization: ratio(active, max_concurrent),
            queue_utilization: ratio(queued, self.config.max_queue_size),
            avg_queue_wait_secs: round2(avg_queue_wait_secs),
        };

        let queue_details = state
            .queue
            .iter()
            .take(QUEUE_DETAILS_LEN)
            .map(|ticket| QueuedTicket {
                id: ticket.id,
                priority: ticket.priority,
                wait_secs: round2(now.saturating_duration_since(ticket.created_at).as_secs_f64()),
                meta: ticket.meta.clone(),
            })
            .collect();

        AdmissionStatus {
            limits: LimitsStatus::new(self.config.tier, &self.limits, self.config.max_queue_size),
            recommendations: AdmissionStatus::recommendations(&current, &state.stats),
            current,
            statistics: state.stats,
            queue_details,
        }
    }

    /// Number of tickets currently holding a permit
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Number of tickets waiting for a permit
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of permits not held by any ticket
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 1-based queue position of a waiting ticket
    #[must_use]
    pub fn queue_position(&self, id: TicketId) -> Option<usize> {
        self.lock().queue.position(id)
    }

    /// Whether the ticket currently holds a permit
    #[must_use]
    pub fn is_running(&self, id: TicketId) -> bool {
        self.lock().active.contains_key(&id)
    }

    /// The configuration this controller was built with
    #[must_use]
    pub const fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// The ceilings in effect
    #[must_use]
    pub const fn limits(&self) -> &TierLimits {
        &self.limits
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_in(&self, id: TicketId) -> Standing {
        let mut state = self.lock();

        if state.active.contains_key(&id) {
            return Standing::Running;
        }
        if !state.queue.contains(id) {
            return Standing::Unknown;
        }

        let at_head = state.queue.head().is_some_and(|ticket| ticket.id == id);
        if at_head && let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            self.start_head(&mut state, permit);
            return Standing::Running;
        }

        Standing::Queued(state.queue.position(id).unwrap_or(0))
    }

    /// Hand free permits to the head of the queue until either runs out
    fn promote_waiting(&self, state: &mut State) {
        while !state.queue.is_empty() {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            self.start_head(state, permit);
        }
    }

    fn start_head(&self, state: &mut State, permit: OwnedSemaphorePermit) {
        let Some(mut ticket) = state.queue.pop_head() else {
            return;
        };
        let now = Instant::now();
        ticket.started_at = Some(now);
        let id = ticket.id;
        let waited = now.saturating_duration_since(ticket.created_at);
        state.active.insert(
            id,
            ActiveTicket {
                ticket,
                _permit: permit,
            },
        );
        let active = state.active.len();
        state.stats.record_started(active);
        info!(
            "Ticket {id} promoted from queue after {:.1}s (active: {active}, budget: {})",
            waited.as_secs_f64(),
            self.limits.total_permits()
        );
    }

    /// Remove a ticket wherever it is, returning any held permit.
    /// Returns `true` if the ticket was still present.
    fn expire(&self, id: TicketId) -> bool {
        let mut state = self.lock();
        let held_permit = state.active.remove(&id).is_some();
        let was_queued = state.queue.remove(id).is_some();
        if !held_permit && !was_queued {
            return false;
        }

        state.stats.record_timeouts(1);
        if held_permit {
            self.promote_waiting(&mut state);
            drop(state);
            self.notify.notify_waiters();
        }
        true
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = part as f64 / whole as f64;
    ratio
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
