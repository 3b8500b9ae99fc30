mod cache;
mod client;
mod cursor;
mod mutations;
mod query;
#[cfg(test)]
mod testing;

pub use cache::PageCache;
pub use client::QueryClient;
pub use cursor::{CursorEngine, CursorState};
pub use query::{FetchOutcome, PaginatedQuery, QuerySnapshot};
