use std::num::NonZeroU32;
use std::sync::{Arc, Weak};

use core_types::{CheckIn, DiaryMutations, Entry, PageGateway, QueryKey, Record};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::query::PaginatedQuery;

pub(crate) struct QueryRegistry<T: Record> {
    gateway: Arc<dyn PageGateway<T>>,
    queries: Mutex<IndexMap<NonZeroU32, Weak<PaginatedQuery<T>>>>,
}

impl<T: Record> QueryRegistry<T> {
    fn new(gateway: Arc<dyn PageGateway<T>>) -> Self {
        Self {
            gateway,
            queries: Mutex::new(IndexMap::new()),
        }
    }

    fn query(&self, limit: NonZeroU32) -> Arc<PaginatedQuery<T>> {
        let mut queries = self.queries.lock();
        if let Some(query) = queries.get(&limit).and_then(Weak::upgrade) {
            return query;
        }
        let query = Arc::new(PaginatedQuery::new(limit, self.gateway.clone()));
        queries.insert(limit, Arc::downgrade(&query));
        debug!(key = %QueryKey::of::<T>(limit), "query created");
        query
    }

    /// Queries that still have an observer, in creation order.
    pub(crate) fn live(&self) -> Vec<Arc<PaginatedQuery<T>>> {
        let mut queries = self.queries.lock();
        queries.retain(|_, query| query.strong_count() > 0);
        queries.values().filter_map(Weak::upgrade).collect()
    }

    fn clear(&self) -> Vec<Arc<PaginatedQuery<T>>> {
        self.queries
            .lock()
            .drain(..)
            .filter_map(|(_, query)| query.upgrade())
            .collect()
    }
}

/// Owner of every paginated query plus the mutation gateway.
///
/// Built once with its gateways and shared by `Arc`. Queries are handed out
/// per `(collection, limit)`; the client keeps only weak references, so a
/// query disappears once its last holder drops it.
pub struct QueryClient {
    pub(crate) entries: QueryRegistry<Entry>,
    pub(crate) check_ins: QueryRegistry<CheckIn>,
    pub(crate) mutations: Arc<dyn DiaryMutations>,
}

impl QueryClient {
    pub fn new(
        entry_pages: Arc<dyn PageGateway<Entry>>,
        check_in_pages: Arc<dyn PageGateway<CheckIn>>,
        mutations: Arc<dyn DiaryMutations>,
    ) -> Self {
        Self {
            entries: QueryRegistry::new(entry_pages),
            check_ins: QueryRegistry::new(check_in_pages),
            mutations,
        }
    }

    pub fn from_gateway<G>(gateway: Arc<G>) -> Self
    where
        G: PageGateway<Entry> + PageGateway<CheckIn> + DiaryMutations + 'static,
    {
        Self::new(gateway.clone(), gateway.clone(), gateway)
    }

    pub fn entries(&self, limit: NonZeroU32) -> Arc<PaginatedQuery<Entry>> {
        self.entries.query(limit)
    }

    pub fn check_ins(&self, limit: NonZeroU32) -> Arc<PaginatedQuery<CheckIn>> {
        self.check_ins.query(limit)
    }

    pub fn live_queries(&self) -> Vec<QueryKey> {
        let entries = self.entries.live().into_iter().map(|query| query.key());
        let check_ins = self.check_ins.live().into_iter().map(|query| query.key());
        entries.chain(check_ins).collect()
    }

    /// Resets every live query, so pages still in flight are discarded, and
    /// forgets them. Handles held elsewhere keep working but are detached.
    pub fn dispose(&self) {
        let entries = self.entries.clear();
        let check_ins = self.check_ins.clear();
        for query in &entries {
            query.reset();
        }
        for query in &check_ins {
            query.reset();
        }
        info!(
            entries = entries.len(),
            check_ins = check_ins.len(),
            "query client disposed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FetchOutcome;
    use crate::testing::{FakeMutations, FakePages, check_in, entry};

    fn limit(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn build_client(
        entry_pages: Arc<FakePages<Entry>>,
        check_in_pages: Arc<FakePages<CheckIn>>,
    ) -> QueryClient {
        QueryClient::new(
            entry_pages,
            check_in_pages,
            Arc::new(FakeMutations::default()),
        )
    }

    fn idle_client() -> QueryClient {
        build_client(
            Arc::new(FakePages::new(vec![])),
            Arc::new(FakePages::new(vec![])),
        )
    }

    #[test]
    fn same_identity_shares_one_query() {
        let client = idle_client();
        let a = client.entries(limit(10));
        let b = client.entries(limit(10));
        let c = client.entries(limit(5));
        let d = client.check_ins(limit(10));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_ne!(a.key(), d.key());
        assert_eq!(client.live_queries().len(), 3);
    }

    #[test]
    fn query_without_observers_is_destroyed() {
        let client = idle_client();
        let kept = client.entries(limit(10));
        drop(client.entries(limit(20)));

        assert_eq!(client.live_queries(), vec![kept.key()]);
    }

    #[tokio::test]
    async fn dispose_discards_in_flight_pages_and_forgets_queries() {
        let (pages, gate) = FakePages::gated(vec![Ok(vec![entry(1)])]);
        let pages = Arc::new(pages);
        let check_in_pages = Arc::new(FakePages::new(vec![Ok(vec![check_in(1)])]));
        let client = build_client(pages.clone(), check_in_pages);

        let query = client.entries(limit(10));
        let check_ins = client.check_ins(limit(10));
        check_ins.fetch_next_page().await.expect("check-ins");

        let pending = tokio::spawn({
            let query = query.clone();
            async move { query.fetch_next_page().await }
        });
        pages.wait_started().await;

        client.dispose();
        gate.add_permits(1);

        assert_eq!(pending.await.expect("join"), Ok(FetchOutcome::Discarded));
        assert!(query.items().is_empty());
        assert!(check_ins.items().is_empty());
        assert!(client.live_queries().is_empty());
        assert!(!Arc::ptr_eq(&query, &client.entries(limit(10))));
    }
}
