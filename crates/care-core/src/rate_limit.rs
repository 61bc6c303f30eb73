//! Outbound rate limiting
//!
//! Token buckets guarding calls to the WhatsApp Graph API and the CARE API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Bucket for WhatsApp message sends
pub const WHATSAPP_SEND: &str = "whatsapp_send";
/// Bucket for WhatsApp read receipts
pub const WHATSAPP_READ: &str = "whatsapp_read";
/// Bucket for CARE API requests
pub const CARE_API: &str = "care_api";

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter
///
/// Refills `refill_rate` tokens per second up to `bucket_size`; starts full.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    refill_rate: f64,
    bucket_size: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(refill_rate: f64, bucket_size: u32) -> Self {
        Self {
            refill_rate,
            bucket_size: f64::from(bucket_size),
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: f64::from(bucket_size),
                last_refill: Instant::now(),
            })),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.bucket_size);
        bucket.last_refill = now;
    }

    /// Take `tokens` if available, without waiting
    pub async fn try_consume(&self, tokens: u32) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        let wanted = f64::from(tokens);
        if wanted <= bucket.tokens {
            bucket.tokens -= wanted;
            true
        } else {
            false
        }
    }

    /// Take `tokens`, sleeping until the bucket can cover them
    ///
    /// Returns how long the caller waited.
    pub async fn acquire(&self, tokens: u32) -> Duration {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        let wanted = f64::from(tokens);
        if wanted <= bucket.tokens {
            bucket.tokens -= wanted;
            return Duration::ZERO;
        }

        let wait = Duration::from_secs_f64((wanted - bucket.tokens) / self.refill_rate);
        debug!("Rate limit reached. Waiting for {:.2} seconds", wait.as_secs_f64());

        // Holding the lock while sleeping queues later callers behind this one.
        tokio::time::sleep(wait).await;

        bucket.tokens = 0.0;
        bucket.last_refill = Instant::now();
        wait
    }

    /// Tokens currently available (after refill)
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }
}

/// Named rate limiters shared by the API clients
#[derive(Debug, Clone)]
pub struct RateLimiters {
    limiters: Arc<HashMap<String, RateLimiter>>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::from_limits([
            (WHATSAPP_SEND, RateLimiter::new(5.0, 10)),
            (WHATSAPP_READ, RateLimiter::new(10.0, 20)),
            (CARE_API, RateLimiter::new(2.0, 5)),
        ])
    }
}

impl RateLimiters {
    pub fn from_limits<I, K>(limits: I) -> Self
    where
        I: IntoIterator<Item = (K, RateLimiter)>,
        K: Into<String>,
    {
        Self {
            limiters: Arc::new(limits.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Registry without any limits (every key passes immediately)
    pub fn unlimited() -> Self {
        Self::from_limits(std::iter::empty::<(String, RateLimiter)>())
    }

    pub fn get(&self, key: &str) -> Option<&RateLimiter> {
        self.limiters.get(key)
    }

    /// Wait on the named bucket; unknown keys are not limited
    pub async fn acquire(&self, key: &str) -> Duration {
        match self.limiters.get(key) {
            Some(limiter) => {
                let waited = limiter.acquire(1).await;
                if !waited.is_zero() {
                    info!("Rate limited {} for {:.2} seconds", key, waited.as_secs_f64());
                }
                waited
            }
            None => {
                warn!("No rate limiter found for key: {}", key);
                Duration::ZERO
            }
        }
    }
}
