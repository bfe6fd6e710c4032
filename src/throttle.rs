use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::error::TransferError;

/// Global bytes-per-second cap shared by all segment workers.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    burst: NonZeroU32,
}

impl Throttle {
    pub fn per_second(bytes: NonZeroU32) -> Self {
        let quota = Quota::per_second(bytes);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            burst: bytes,
        }
    }

    pub fn bytes_per_second(&self) -> u32 {
        self.burst.get()
    }

    /// Waits until `len` bytes may pass.
    ///
    /// Requests larger than the burst size are split, since the limiter
    /// rejects cells it could never grant at once.
    pub async fn acquire(&self, len: usize) -> Result<(), TransferError> {
        let mut left = len as u64;
        while left > 0 {
            let step = left.min(u64::from(self.burst.get())) as u32;
            if let Some(n) = NonZeroU32::new(step) {
                self.limiter
                    .until_n_ready(n)
                    .await
                    .map_err(|_| TransferError::RateLimit(step))?;
            }
            left -= u64::from(step);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("bytes_per_second", &self.burst)
            .finish()
    }
}
