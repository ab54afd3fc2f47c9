//! Rate-limited judge wrapper.
//!
//! Wraps any [`JudgeModel`] with a `governor` quota so a provider's request
//! limit is respected on top of the per-job in-flight bound.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

use crate::error::JudgeResult;
use crate::traits::judge::{JudgeModel, JudgeRequest};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A judge that waits for a rate-limit permit before every call.
pub struct RateLimitedJudge<J: JudgeModel> {
    inner: J,
    limiter: Arc<DirectRateLimiter>,
}

impl<J: JudgeModel> RateLimitedJudge<J> {
    /// Allow `requests_per_minute` calls per minute. Zero is treated as one.
    pub fn per_minute(judge: J, requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(1u32));
        Self::with_quota(judge, Quota::per_minute(rpm))
    }

    /// Sustained rate per second with a burst allowance.
    pub fn with_burst(judge: J, requests_per_second: u32, burst: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(burst).unwrap_or(nonzero!(1u32));
        Self::with_quota(judge, Quota::per_second(rps).allow_burst(burst))
    }

    pub fn with_quota(judge: J, quota: Quota) -> Self {
        Self {
            inner: judge,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn inner(&self) -> &J {
        &self.inner
    }
}

#[async_trait]
impl<J: JudgeModel> JudgeModel for RateLimitedJudge<J> {
    async fn judge(&self, request: &JudgeRequest) -> JudgeResult<String> {
        if self.limiter.check().is_err() {
            debug!(judge = self.inner.name(), "Waiting for rate-limit permit");
            self.limiter.until_ready().await;
        }
        self.inner.judge(request).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
