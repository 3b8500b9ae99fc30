use std::time::Duration;

use async_trait::async_trait;
use core_types::{
    ApiResult, CheckIn, DiaryMutations, Entry, EntryId, NewCheckIn, NewEntry, PageGateway,
    PageRequest, Record, RetryPolicy,
};
use rand::Rng;
use tracing::warn;

/// Retries page reads that fail with a retriable error.
///
/// Mutations are forwarded once: a favorite toggle replayed after a lost
/// response would flip the flag back.
#[derive(Debug, Clone)]
pub struct Retrying<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> Retrying<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn backoff(&self, failed_attempts: u32) -> Duration {
        let delay = self.policy.delay_for_attempt(failed_attempts);
        if !self.policy.jitter || delay.is_zero() {
            return delay;
        }
        let max_cut = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
        let cut = rand::thread_rng().gen_range(0..=max_cut);
        delay.saturating_sub(Duration::from_millis(cut))
    }
}

#[async_trait]
impl<T, G> PageGateway<T> for Retrying<G>
where
    T: Record,
    G: PageGateway<T>,
{
    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Vec<T>> {
        let attempts = self.policy.attempts();
        let mut failed = 0;
        loop {
            match self.inner.fetch_page(request).await {
                Ok(items) => return Ok(items),
                Err(err) => {
                    failed += 1;
                    if !err.is_retriable() || failed >= attempts {
                        return Err(err);
                    }
                    let delay = self.backoff(failed);
                    warn!(
                        collection = %T::COLLECTION,
                        offset = request.offset,
                        attempt = failed,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "page fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl<G: DiaryMutations> DiaryMutations for Retrying<G> {
    async fn create_entry(&self, draft: &NewEntry) -> ApiResult<Entry> {
        self.inner.create_entry(draft).await
    }

    async fn toggle_favorite(&self, id: EntryId) -> ApiResult<Entry> {
        self.inner.toggle_favorite(id).await
    }

    async fn create_check_in(&self, draft: &NewCheckIn) -> ApiResult<CheckIn> {
        self.inner.create_check_in(draft).await
    }
}
