use std::sync::Arc;

use core_types::{ApiResult, CheckIn, Entry, EntryId, NewCheckIn, NewEntry, Record};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::QueryClient;
use crate::query::PaginatedQuery;

impl QueryClient {
    /// Toggles `isFavorite` on the server, then patches the confirmed entry
    /// into every live entries query. Nothing is refetched, and nothing is
    /// touched when the server call fails.
    pub async fn toggle_favorite(&self, id: EntryId) -> ApiResult<Entry> {
        let updated = self.mutations.toggle_favorite(id).await?;

        let replaced = self
            .entries
            .live()
            .iter()
            .filter(|query| query.replace_entry(id, updated.clone()))
            .count();
        if replaced == 0 {
            debug!(entry_id = id, "toggled entry is not in any cached page");
        }
        Ok(updated)
    }

    /// Creates an entry, then invalidates every live entries query.
    ///
    /// A new entry lands at the head of the newest-first order and shifts
    /// every later page window, so the pages are dropped rather than spliced.
    pub async fn create_entry(&self, draft: &NewEntry) -> ApiResult<Entry> {
        let entry = self.mutations.create_entry(draft).await?;
        let invalidated = self.invalidate_entries().await;
        info!(entry_id = entry.id, invalidated, "entry created");
        Ok(entry)
    }

    pub async fn create_check_in(&self, draft: &NewCheckIn) -> ApiResult<CheckIn> {
        let check_in = self.mutations.create_check_in(draft).await?;
        let invalidated = self.invalidate_check_ins().await;
        info!(check_in_id = check_in.id, invalidated, "check-in created");
        Ok(check_in)
    }

    pub async fn invalidate_entries(&self) -> usize {
        invalidate(self.entries.live()).await
    }

    pub async fn invalidate_check_ins(&self) -> usize {
        invalidate(self.check_ins.live()).await
    }
}

// Every query is reset before any refetch starts, so a page still in flight
// for any of them is already stale when it lands.
async fn invalidate<T: Record>(queries: Vec<Arc<PaginatedQuery<T>>>) -> usize {
    for query in &queries {
        query.reset();
    }

    let results = join_all(queries.iter().map(|query| query.fetch_next_page())).await;
    for (query, result) in queries.iter().zip(results) {
        if let Err(err) = result {
            warn!(key = %query.key(), error = %err, "refetch after invalidation failed");
        }
    }
    queries.len()
}
