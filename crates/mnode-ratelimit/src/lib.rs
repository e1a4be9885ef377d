//! Token-bucket admission filter for the mnode storage server.
//!
//! Two independent tables gate traffic: one keyed by the requesting master
//! node's legacy pubkey, one keyed by client IPv4 address. The node table
//! is unbounded (bounded in practice by the swarm size); the client table
//! is capped and evicts the least-recently-seen address when full, so a
//! newly observed client always admits its first request.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;

use mnode_types::LegacyPubkey;

/// Maximum burst per identifier; each admitted request spends one token.
pub const BUCKET_SIZE: u32 = 25;
/// Steady-state refill, tokens per second.
pub const TOKEN_RATE: u32 = 3;
/// Upper bound on the client IP table.
pub const MAX_CLIENTS: usize = 10_000;

/// An admission identifier: a peer master node or a direct client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKey {
    Mnode(LegacyPubkey),
    Client(u32),
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn full(now: Instant) -> Self {
        Self {
            tokens: BUCKET_SIZE as f64,
            last: now,
        }
    }

    /// Refill from elapsed time, then try to spend one token. Returns
    /// true when the request must be throttled.
    fn consume(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * TOKEN_RATE as f64).min(BUCKET_SIZE as f64);
        self.last = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            false
        } else {
            true
        }
    }
}

/// Thread-safe dual token-bucket rate limiter.
pub struct RateLimiter {
    mnode_buckets: Mutex<HashMap<LegacyPubkey, TokenBucket>>,
    client_buckets: Mutex<LruCache<u32, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_max_clients(MAX_CLIENTS)
    }

    /// Build with a custom client-table bound; used by tests exercising
    /// eviction.
    pub fn with_max_clients(max_clients: usize) -> Self {
        Self {
            mnode_buckets: Mutex::new(HashMap::new()),
            client_buckets: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_clients).expect("client table bound must be nonzero"),
            )),
        }
    }

    /// Admission check for either identifier space. Returns true when the
    /// request must be throttled.
    pub fn should_limit(&self, key: RateLimitKey, now: Instant) -> bool {
        match key {
            RateLimitKey::Mnode(pubkey) => self.should_rate_limit(&pubkey, now),
            RateLimitKey::Client(ip) => self.should_rate_limit_client(ip, now),
        }
    }

    /// Admission check for a peer master node.
    pub fn should_rate_limit(&self, pubkey: &LegacyPubkey, now: Instant) -> bool {
        let mut buckets = self.mnode_buckets.lock();
        buckets
            .entry(*pubkey)
            .or_insert_with(|| TokenBucket::full(now))
            .consume(now)
    }

    /// Admission check for a client IPv4 address. Inserting into a full
    /// table evicts the least-recently-observed bucket, not the emptiest
    /// one.
    pub fn should_rate_limit_client(&self, ip: u32, now: Instant) -> bool {
        let mut buckets = self.client_buckets.lock();
        if let Some(bucket) = buckets.get_mut(&ip) {
            bucket.consume(now)
        } else {
            let mut bucket = TokenBucket::full(now);
            let limited = bucket.consume(now);
            buckets.push(ip, bucket);
            limited
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
