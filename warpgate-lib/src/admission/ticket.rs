use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

static NEXT_TICKET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an admission ticket.
///
/// Ids are handed out in strictly increasing order, so they double as the
/// arrival sequence used to break ties within a priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TicketId(u64);

impl TicketId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TICKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque caller metadata carried by a ticket, only used for logging and
/// status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestMeta {
    /// What the request is about, e.g. a video id or target URL
    pub target: Option<String>,
    /// Who asked, e.g. a client address
    pub client: Option<String>,
}

impl RequestMeta {
    /// Metadata naming only a target
    #[must_use]
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            client: None,
        }
    }
}

impl fmt::Display for RequestMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target={}, client={}",
            self.target.as_deref().unwrap_or("-"),
            self.client.as_deref().unwrap_or("-")
        )
    }
}

/// A single admission request, owned by the controller from
/// `try_acquire` until release or expiry.
#[derive(Debug, Clone)]
pub struct Ticket {
    /// Identity
    pub id: TicketId,
    /// Higher is more urgent
    pub priority: i32,
    /// When the ticket was issued
    pub created_at: Instant,
    /// When the ticket was granted a permit
    pub started_at: Option<Instant>,
    /// Caller metadata
    pub meta: RequestMeta,
}

impl Ticket {
    pub(crate) fn new(priority: i32, meta: RequestMeta, now: Instant) -> Self {
        Self {
            id: TicketId::next(),
            priority,
            created_at: now,
            started_at: None,
            meta,
        }
    }

    /// Whether the ticket has been granted a permit
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    fn queue_key(&self) -> QueueKey {
        QueueKey {
            priority: Reverse(self.priority),
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Sort key of the wait queue: priority descending, then creation time,
/// then arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    created_at: Instant,
    id: TicketId,
}

/// Tickets waiting for a permit, kept in admission order.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    ordered: BTreeMap<QueueKey, Ticket>,
    keys: HashMap<TicketId, QueueKey>,
}

impl WaitQueue {
    pub(crate) fn len(&self) -> usize {
        self.ordered.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub(crate) fn contains(&self, id: TicketId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Insert a ticket and return its 1-based position
    pub(crate) fn push(&mut self, ticket: Ticket) -> usize {
        let key = ticket.queue_key();
        self.keys.insert(ticket.id, key);
        self.ordered.insert(key, ticket);
        self.ordered.range(..key).count() + 1
    }

    /// 1-based position of a queued ticket
    pub(crate) fn position(&self, id: TicketId) -> Option<usize> {
        let key = self.keys.get(&id)?;
        Some(self.ordered.range(..*key).count() + 1)
    }

    pub(crate) fn head(&self) -> Option<&Ticket> {
        self.ordered.values().next()
    }

    pub(crate) fn pop_head(&mut self) -> Option<Ticket> {
        let (_, ticket) = self.ordered.pop_first()?;
        self.keys.remove(&ticket.id);
        Some(ticket)
    }

    pub(crate) fn remove(&mut self, id: TicketId) -> Option<Ticket> {
        let key = self.keys.remove(&id)?;
        self.ordered.remove(&key)
    }

    /// Remove every ticket matching `pred`, returning how many were removed
    pub(crate) fn remove_where(&mut self, mut pred: impl FnMut(&Ticket) -> bool) -> usize {
        let doomed: Vec<TicketId> = self
            .ordered
            .values()
            .filter(|ticket| pred(ticket))
            .map(|ticket| ticket.id)
            .collect();
        for id in &doomed {
            self.remove(*id);
        }
        doomed.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Ticket> {
        self.ordered.values()
    }
}
