use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::{GeocoderConfig, MAX_REQUESTS_PER_SECOND, MIN_REQUESTS_PER_SECOND};

// Absorbs float drift so a bucket refilled for exactly the computed wait counts as full.
const TOKEN_EPSILON: f64 = 1e-9;
const MAX_WAIT: Duration = Duration::from_secs(3600);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every outbound request in the process. The lock
/// never spans the sleep.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    /// Starts full. `refill_rate` is tokens per second, clamped to at least
    /// `MIN_REQUESTS_PER_SECOND`.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        let refill_rate = if !(refill_rate.is_finite() && refill_rate > 0.0) {
            warn!("Unusable refill rate {refill_rate}, using {MAX_REQUESTS_PER_SECOND}");
            MAX_REQUESTS_PER_SECOND
        } else if refill_rate < MIN_REQUESTS_PER_SECOND {
            warn!("Refill rate {refill_rate} too small, using {MIN_REQUESTS_PER_SECOND}");
            MIN_REQUESTS_PER_SECOND
        } else {
            refill_rate
        };
        debug!("RateLimiter initialized: {refill_rate} req/sec, capacity {capacity}");
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    pub fn from_config(config: &GeocoderConfig) -> Self {
        Self::new(config.rate_limit_capacity, config.max_requests_per_second)
    }

    /// Takes one token. Without `blocking`, fails straight away when the
    /// bucket is empty. With it, sleeps once for the projected refill time and
    /// tries again; a second miss is reported as `false`, never looped on.
    pub async fn acquire(&self, blocking: bool) -> bool {
        let wait = {
            let mut bucket = self.lock();
            self.refill(&mut bucket);

            if Self::take(&mut bucket) {
                debug!("Token acquired. Remaining: {:.2}", bucket.tokens);
                return true;
            }

            if !blocking {
                debug!("Token not available");
                return false;
            }

            let deficit = (1.0 - bucket.tokens).max(0.0);
            Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(MAX_WAIT)
        };

        debug!("Rate limit reached. Waiting {:.2}s", wait.as_secs_f64());
        tokio::time::sleep(wait).await;

        let mut bucket = self.lock();
        self.refill(&mut bucket);
        if Self::take(&mut bucket) {
            debug!("Token acquired after wait");
            true
        } else {
            warn!("Token still not available after wait");
            false
        }
    }

    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;
    }

    fn take(bucket: &mut Bucket) -> bool {
        if bucket.tokens + TOKEN_EPSILON >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
