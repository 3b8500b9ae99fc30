use std::num::NonZeroU32;
use std::sync::Arc;

use core_types::{ApiError, ApiResult, Page, PageGateway, QueryKey, Record};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::PageCache;
use crate::cursor::CursorEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Appended {
        offset: u64,
        len: usize,
        has_more: bool,
    },
    /// Another fetch for this query is still running; nothing was sent.
    InFlight,
    /// The last page was short; nothing was sent.
    Exhausted,
    /// The query was reset while the request was out; its result was dropped.
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T> {
    pub key: QueryKey,
    pub items: Vec<T>,
    pub has_more: bool,
    pub is_fetching: bool,
    pub pages_fetched: u32,
    pub next_offset: u64,
    pub error: Option<ApiError>,
}

struct QueryState<T> {
    cursor: CursorEngine,
    cache: PageCache<T>,
    // Bumped by every reset; results tagged with an older value are stale.
    generation: u64,
}

/// Client-held state of one paginated query: the cursor, the cached pages,
/// and the single-flight bookkeeping that ties them together.
///
/// Callers only issue intents (`fetch_next_page`, `refresh`) and read
/// snapshots; pages are never mutated from outside.
pub struct PaginatedQuery<T: Record> {
    key: QueryKey,
    gateway: Arc<dyn PageGateway<T>>,
    state: Mutex<QueryState<T>>,
    revision: watch::Sender<u64>,
}

impl<T: Record> PaginatedQuery<T> {
    pub fn new(limit: NonZeroU32, gateway: Arc<dyn PageGateway<T>>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            key: QueryKey::of::<T>(limit),
            gateway,
            state: Mutex::new(QueryState {
                cursor: CursorEngine::new(limit),
                cache: PageCache::new(),
                generation: 0,
            }),
            revision,
        }
    }

    pub fn key(&self) -> QueryKey {
        self.key
    }

    pub async fn fetch_next_page(&self) -> ApiResult<FetchOutcome> {
        let (request, generation) = {
            let mut state = self.state.lock();
            if state.cursor.is_fetching() {
                debug!(key = %self.key, "fetch already in flight");
                return Ok(FetchOutcome::InFlight);
            }
            let Some(request) = state.cursor.begin() else {
                return Ok(FetchOutcome::Exhausted);
            };
            (request, state.generation)
        };
        self.bump();

        let mut in_flight = InFlight {
            query: self,
            generation,
            settled: false,
        };
        debug!(key = %self.key, offset = request.offset, "fetching page");
        let result = self.gateway.fetch_page(request).await;
        in_flight.settled = true;

        let outcome = {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(
                    key = %self.key,
                    offset = request.offset,
                    "dropping page that arrived after reset"
                );
                return Ok(FetchOutcome::Discarded);
            }
            match result {
                Ok(items) => {
                    let len = items.len();
                    state.cursor.complete(len);
                    state.cache.append_page(Page::new(request.offset, items));
                    Ok(FetchOutcome::Appended {
                        offset: request.offset,
                        len,
                        has_more: state.cursor.has_more(),
                    })
                }
                Err(err) => {
                    debug!(
                        key = %self.key,
                        offset = request.offset,
                        error = %err,
                        "page fetch failed"
                    );
                    state.cursor.fail(err.clone());
                    Err(err)
                }
            }
        };
        self.bump();
        outcome
    }

    /// Drops every page and fetches the first one again.
    pub async fn refresh(&self) -> ApiResult<FetchOutcome> {
        self.reset();
        self.fetch_next_page().await
    }

    /// Drops every page and returns the cursor to idle. A fetch still in
    /// flight will have its result discarded.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.cursor.reset();
            state.cache.reset();
        }
        debug!(key = %self.key, "query reset");
        self.bump();
    }

    pub fn replace_entry(&self, id: T::Id, updated: T) -> bool {
        let replaced = self.state.lock().cache.replace_entry(id, updated);
        if replaced {
            self.bump();
        }
        replaced
    }

    pub fn snapshot(&self) -> QuerySnapshot<T> {
        let state = self.state.lock();
        QuerySnapshot {
            key: self.key,
            items: state.cache.to_vec(),
            has_more: state.cursor.has_more(),
            is_fetching: state.cursor.is_fetching(),
            pages_fetched: state.cursor.pages_fetched(),
            next_offset: state.cursor.next_offset(),
            error: state.cursor.last_error().cloned(),
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.state.lock().cache.to_vec()
    }

    pub fn has_more(&self) -> bool {
        self.state.lock().cursor.has_more()
    }

    pub fn is_fetching(&self) -> bool {
        self.state.lock().cursor.is_fetching()
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().cache.page_count()
    }

    pub fn next_offset(&self) -> u64 {
        self.state.lock().cursor.next_offset()
    }

    /// Revision counter, bumped on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

// Releases the in-flight slot if the fetch future is dropped before the
// gateway answers.
struct InFlight<'a, T: Record> {
    query: &'a PaginatedQuery<T>,
    generation: u64,
    settled: bool,
}

impl<T: Record> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let abandoned = {
            let mut state = self.query.state.lock();
            state.generation == self.generation && state.cursor.abandon()
        };
        if abandoned {
            debug!(key = %self.query.key, "fetch cancelled before completion");
            self.query.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use core_types::Entry;

    use super::*;
    use crate::testing::{FakePages, entry, ids, offline};

    fn limit(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[tokio::test]
    async fn pages_until_short_page_then_refresh_restarts_at_zero() {
        let pages = Arc::new(FakePages::new(vec![
            Ok(vec![entry(10), entry(9)]),
            Ok(vec![entry(8)]),
            Ok(vec![entry(10), entry(9)]),
        ]));
        let query = PaginatedQuery::<Entry>::new(limit(2), pages.clone());

        assert_eq!(
            query.fetch_next_page().await,
            Ok(FetchOutcome::Appended {
                offset: 0,
                len: 2,
                has_more: true
            })
        );
        assert_eq!(
            query.fetch_next_page().await,
            Ok(FetchOutcome::Appended {
                offset: 2,
                len: 1,
                has_more: false
            })
        );
        assert_eq!(ids(&query.items()), vec![10, 9, 8]);
        assert!(!query.has_more());

        assert_eq!(query.fetch_next_page().await, Ok(FetchOutcome::Exhausted));
        assert_eq!(pages.offsets(), vec![0, 2]);

        let mut revisions = query.subscribe();
        let _ = revisions.borrow_and_update();
        assert_eq!(
            query.refresh().await,
            Ok(FetchOutcome::Appended {
                offset: 0,
                len: 2,
                has_more: true
            })
        );
        assert!(revisions.has_changed().expect("sender alive"));
        assert_eq!(pages.offsets(), vec![0, 2, 0]);
        assert_eq!(query.page_count(), 1);
        assert_eq!(ids(&query.items()), vec![10, 9]);
        assert_eq!(query.next_offset(), 2);
    }

    #[tokio::test]
    async fn reset_clears_pages_and_rewinds_cursor() {
        let pages = Arc::new(FakePages::new(vec![Ok(vec![entry(2), entry(1)])]));
        let query = PaginatedQuery::<Entry>::new(limit(2), pages.clone());
        query.fetch_next_page().await.expect("first");

        query.reset();

        let snapshot = query.snapshot();
        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.next_offset, 0);
        assert_eq!(snapshot.pages_fetched, 0);
        assert!(snapshot.has_more);
    }

    #[tokio::test]
    async fn refresh_discards_the_page_in_flight() {
        let (pages, gate) = FakePages::gated(vec![
            Ok(vec![entry(5), entry(4)]),
            Ok(vec![entry(6), entry(5)]),
        ]);
        let pages = Arc::new(pages);
        let query = Arc::new(PaginatedQuery::<Entry>::new(limit(2), pages.clone()));

        let stale = tokio::spawn({
            let query = query.clone();
            async move { query.fetch_next_page().await }
        });
        pages.wait_started().await;

        let fresh = tokio::spawn({
            let query = query.clone();
            async move { query.refresh().await }
        });
        pages.wait_started().await;
        assert_eq!(pages.offsets(), vec![0, 0]);

        gate.add_permits(1);
        assert_eq!(stale.await.expect("join"), Ok(FetchOutcome::Discarded));
        assert_eq!(query.page_count(), 0);

        gate.add_permits(1);
        assert_eq!(
            fresh.await.expect("join"),
            Ok(FetchOutcome::Appended {
                offset: 0,
                len: 2,
                has_more: true
            })
        );
        assert_eq!(query.page_count(), 1);
        assert_eq!(ids(&query.items()), vec![6, 5]);
    }

    #[tokio::test]
    async fn second_trigger_while_fetching_does_not_hit_the_gateway() {
        let (pages, gate) = FakePages::gated(vec![Ok(vec![entry(1), entry(2)])]);
        let pages = Arc::new(pages);
        let query = Arc::new(PaginatedQuery::<Entry>::new(limit(2), pages.clone()));

        let first = tokio::spawn({
            let query = query.clone();
            async move { query.fetch_next_page().await }
        });
        pages.wait_started().await;

        assert!(query.is_fetching());
        assert_eq!(query.fetch_next_page().await, Ok(FetchOutcome::InFlight));
        assert_eq!(query.fetch_next_page().await, Ok(FetchOutcome::InFlight));

        gate.add_permits(1);
        let outcome = first.await.expect("join").expect("fetch");
        assert!(matches!(outcome, FetchOutcome::Appended { len: 2, .. }));
        assert_eq!(pages.requests().len(), 1);
    }

    #[tokio::test]
    async fn page_arriving_after_reset_is_discarded() {
        let (pages, gate) = FakePages::gated(vec![
            Ok(vec![entry(5), entry(4)]),
            Ok(vec![entry(6), entry(5)]),
        ]);
        let pages = Arc::new(pages);
        let query = Arc::new(PaginatedQuery::<Entry>::new(limit(2), pages.clone()));

        let stale = tokio::spawn({
            let query = query.clone();
            async move { query.fetch_next_page().await }
        });
        pages.wait_started().await;

        query.reset();
        gate.add_permits(1);
        assert_eq!(stale.await.expect("join"), Ok(FetchOutcome::Discarded));
        assert_eq!(query.page_count(), 0);
        assert!(query.items().is_empty());
        assert!(!query.is_fetching());

        gate.add_permits(1);
        query.fetch_next_page().await.expect("fresh");
        assert_eq!(ids(&query.items()), vec![6, 5]);
        assert_eq!(pages.offsets(), vec![0, 0]);
    }

    #[tokio::test]
    async fn stale_error_after_reset_is_dropped() {
        let (pages, gate) =
            FakePages::<Entry>::gated(vec![Err(offline("/api/diary-entries"))]);
        let pages = Arc::new(pages);
        let query = Arc::new(PaginatedQuery::<Entry>::new(limit(2), pages.clone()));

        let stale = tokio::spawn({
            let query = query.clone();
            async move { query.fetch_next_page().await }
        });
        pages.wait_started().await;
        query.reset();
        gate.add_permits(1);

        assert_eq!(stale.await.expect("join"), Ok(FetchOutcome::Discarded));
        assert_eq!(query.snapshot().error, None);
    }

    #[tokio::test]
    async fn failure_is_reported_and_same_offset_is_retried() {
        let pages = Arc::new(FakePages::new(vec![
            Ok(vec![entry(3), entry(2)]),
            Err(offline("/api/diary-entries")),
            Ok(vec![entry(1)]),
        ]));
        let query = PaginatedQuery::<Entry>::new(limit(2), pages.clone());

        query.fetch_next_page().await.expect("first");
        let err = query.fetch_next_page().await.expect_err("offline");
        assert!(matches!(err, ApiError::FetchFailed { .. }));

        let snapshot = query.snapshot();
        assert_eq!(snapshot.error, Some(err));
        assert!(snapshot.has_more);
        assert_eq!(snapshot.pages_fetched, 1);
        assert_eq!(ids(&snapshot.items), vec![3, 2]);

        query.fetch_next_page().await.expect("retry");
        assert_eq!(pages.offsets(), vec![0, 2, 2]);
        assert_eq!(ids(&query.items()), vec![3, 2, 1]);
        assert_eq!(query.snapshot().error, None);
    }

    #[tokio::test]
    async fn cancelled_fetch_frees_the_in_flight_slot() {
        let (pages, gate) = FakePages::gated(vec![Ok(vec![entry(1)]), Ok(vec![entry(1)])]);
        let pages = Arc::new(pages);
        let query = PaginatedQuery::<Entry>::new(limit(2), pages.clone());

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), query.fetch_next_page()).await;
        assert!(timed_out.is_err());
        assert!(!query.is_fetching());

        gate.add_permits(1);
        assert!(matches!(
            query.fetch_next_page().await,
            Ok(FetchOutcome::Appended { offset: 0, .. })
        ));
    }

    #[tokio::test]
    async fn subscribers_see_revisions() {
        let pages = Arc::new(FakePages::new(vec![Ok(vec![entry(1)])]));
        let query = PaginatedQuery::<Entry>::new(limit(2), pages);
        let mut revisions = query.subscribe();
        let start = *revisions.borrow_and_update();

        query.fetch_next_page().await.expect("fetch");
        assert!(revisions.has_changed().expect("sender alive"));
        assert!(*revisions.borrow_and_update() > start);

        assert!(!query.replace_entry(42, entry(42)));
        assert!(!revisions.has_changed().expect("sender alive"));
    }
}
