pub mod check_in;
pub mod entry;
pub mod error;
pub mod transport;

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU32;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use check_in::{CheckIn, CheckInId, MOOD_INTENSITY_RANGE, NewCheckIn};
pub use entry::{Entry, EntryId, NewEntry};
pub use error::{ApiError, ApiResult};
pub use transport::{ApiConfig, DEFAULT_TIMEOUT_MS, RetryPolicy};

/// A server collection that can be paged with `limit`/`offset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    DiaryEntries,
    CheckIns,
}

impl Collection {
    pub const fn path(self) -> &'static str {
        match self {
            Self::DiaryEntries => "/api/diary-entries",
            Self::CheckIns => "/api/check-ins",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Anything the page cache can hold: it has a stable server id and lives in
/// exactly one collection.
pub trait Record: Clone + Send + Sync + 'static {
    type Id: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    const COLLECTION: Collection;

    fn id(&self) -> Self::Id;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct PageRequest {
    pub limit: NonZeroU32,
    pub offset: u64,
}

impl PageRequest {
    pub fn new(limit: NonZeroU32, offset: u64) -> Self {
        Self { limit, offset }
    }

    pub fn first(limit: NonZeroU32) -> Self {
        Self::new(limit, 0)
    }

    pub fn query_pairs(&self) -> [(&'static str, String); 2] {
        [
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ]
    }
}

/// One fetched batch, in server order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub offset: u64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(offset: u64, items: Vec<T>) -> Self {
        Self { offset, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Identity of one independently paginated stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct QueryKey {
    pub collection: Collection,
    pub limit: NonZeroU32,
}

impl QueryKey {
    pub fn new(collection: Collection, limit: NonZeroU32) -> Self {
        Self { collection, limit }
    }

    pub fn of<T: Record>(limit: NonZeroU32) -> Self {
        Self::new(T::COLLECTION, limit)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?limit={}", self.collection, self.limit)
    }
}

/// Reads one page of a collection. Implementations do not retry.
#[async_trait]
pub trait PageGateway<T: Record>: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Vec<T>>;
}

#[async_trait]
pub trait DiaryMutations: Send + Sync {
    async fn create_entry(&self, draft: &NewEntry) -> ApiResult<Entry>;

    /// Pure toggle: the server flips `isFavorite` and returns the entry.
    async fn toggle_favorite(&self, id: EntryId) -> ApiResult<Entry>;

    async fn create_check_in(&self, draft: &NewCheckIn) -> ApiResult<CheckIn>;
}
