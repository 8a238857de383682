use tokio::time::Instant;

/// Lazily refilled token bucket.
///
/// Tokens accumulate at `refill_rate` per second up to `capacity` and are
/// only topped up when the bucket is looked at. The bucket starts full.
///
/// The bucket itself is not synchronized; the
/// [`AdmissionController`](crate::AdmissionController) keeps it behind its
/// state lock.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket holding `capacity` tokens, refilled at
    /// `refill_rate` tokens per second.
    #[must_use]
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: refill_rate.max(0.0),
            last_refill: Instant::now(),
        }
    }

    /// Top up the bucket for the time elapsed since the last refill.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = self.projected(elapsed.as_secs_f64());
        self.last_refill = now;
    }

    /// Whether at least one whole token is available, after refilling.
    pub fn has_token(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    /// Take one token if available. Returns `false` without modifying the
    /// token count otherwise.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        if self.has_token(now) {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens that would be available at `now`, without touching the bucket
    #[must_use]
    pub fn available(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.projected(elapsed.as_secs_f64())
    }

    /// Maximum number of tokens
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second
    #[must_use]
    pub const fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn projected(&self, elapsed_secs: f64) -> f64 {
        (self.tokens + elapsed_secs * self.refill_rate).min(self.capacity)
    }
}
