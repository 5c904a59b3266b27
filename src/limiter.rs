//! Per-client admission control using the token bucket algorithm
//!
//! Each client identity gets its own bucket, created lazily on first sight
//! with the configured default capacity and refill rate. Buckets refill
//! continuously: elapsed time is converted to tokens at `refill_rate`
//! tokens per second, with sub-token residue carried across refills so no
//! credit is lost between irregularly spaced calls.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

/// A single client's token bucket
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens the bucket can hold
    capacity: u64,
    /// Tokens currently present in the bucket
    tokens: u64,
    /// Tokens added to the bucket every second
    refill_rate: u64,
    /// Accumulated fractional tokens, always in [0, 1)
    fractional: f64,
    /// Timestamp of the last refill
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    #[must_use]
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            fractional: 0.0,
            last_refill: Instant::now(),
        }
    }

    /// Refill the bucket based on the elapsed time since the last refill.
    ///
    /// Idempotent at zero elapsed time: if no time has passed, no state
    /// mutates, so calling this in rapid succession is equivalent to one
    /// call.
    pub fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let refill_amount = elapsed * self.refill_rate as f64;

        // Split the refill amount into whole and fractional parts
        let mut whole_tokens = refill_amount as u64;
        self.fractional += refill_amount - whole_tokens as f64;

        // Carry once the residue accumulates to a whole token
        if self.fractional >= 1.0 {
            whole_tokens += 1;
            self.fractional -= 1.0;
        }

        if refill_amount > 0.0 {
            self.tokens = self.capacity.min(self.tokens + whole_tokens);
            self.last_refill = now;
        }
    }

    /// Attempt to take a token from the bucket
    pub fn try_take(&mut self) -> bool {
        self.refill();

        if self.tokens == 0 {
            return false;
        }

        self.tokens -= 1;
        true
    }

    /// Tokens currently available
    #[must_use]
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Maximum tokens the bucket can hold
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Pretend the last refill happened `d` earlier than it did.
    #[cfg(test)]
    fn rewind_last_refill(&mut self, d: std::time::Duration) {
        self.last_refill -= d;
    }
}

/// Rate limiter mapping client identities to token buckets
///
/// The whole map-and-bucket operation runs under one mutex. Serialization
/// is deliberately coarse: the critical section is O(1) hashing plus
/// integer arithmetic, and it guarantees no torn bucket creation and no
/// lost tokens under concurrent admission from the same client.
#[derive(Debug)]
pub struct RateLimiter {
    /// Default capacity for newly created buckets
    bucket_capacity: u64,
    /// Default refill rate for newly created buckets
    bucket_refill_rate: u64,
    /// Client ID to bucket map; populated lazily, never evicted
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// Create a rate limiter with the given default bucket parameters
    #[must_use]
    pub fn new(bucket_capacity: u64, bucket_refill_rate: u64) -> Self {
        Self {
            bucket_capacity,
            bucket_refill_rate,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether the client may make a connection.
    ///
    /// Creates the client's bucket on first sight. Returns false when the
    /// bucket is empty.
    pub fn allow(&self, client_id: &str) -> bool {
        let mut buckets = self.buckets.lock();

        let bucket = buckets.entry(client_id.to_string()).or_insert_with(|| {
            debug!("Creating token bucket for client {}", client_id);
            TokenBucket::new(self.bucket_capacity, self.bucket_refill_rate)
        });

        bucket.try_take()
    }

    /// Number of client buckets currently tracked
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}
