use std::num::NonZeroU32;

use core_types::{ApiError, PageRequest};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    Idle,
    Fetching { offset: u64 },
    Loaded,
    Exhausted,
    Failed(ApiError),
}

/// Pagination progress for one query identity.
///
/// Offsets are page-aligned (`pages_fetched * limit`), and "has more" is
/// decided only by whether the last page came back full. When the remaining
/// count is an exact multiple of `limit` this costs one extra, empty fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorEngine {
    limit: NonZeroU32,
    pages_fetched: u32,
    has_more: bool,
    state: CursorState,
}

impl CursorEngine {
    pub fn new(limit: NonZeroU32) -> Self {
        Self {
            limit,
            pages_fetched: 0,
            has_more: true,
            state: CursorState::Idle,
        }
    }

    pub fn limit(&self) -> NonZeroU32 {
        self.limit
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.state, CursorState::Fetching { .. })
    }

    pub fn last_error(&self) -> Option<&ApiError> {
        match &self.state {
            CursorState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn next_offset(&self) -> u64 {
        u64::from(self.pages_fetched) * u64::from(self.limit.get())
    }

    /// Moves to `Fetching` and returns the request to send, or `None` when a
    /// fetch is already in flight or the stream is exhausted.
    pub fn begin(&mut self) -> Option<PageRequest> {
        if self.is_fetching() || !self.has_more {
            return None;
        }
        let offset = self.next_offset();
        self.state = CursorState::Fetching { offset };
        Some(PageRequest::new(self.limit, offset))
    }

    /// Records a successful fetch of `page_len` items. Ignored unless fetching.
    pub fn complete(&mut self, page_len: usize) -> bool {
        if !self.is_fetching() {
            debug!(page_len, "completion without a fetch in flight ignored");
            return false;
        }
        self.has_more = page_len == self.limit.get() as usize;
        self.pages_fetched += 1;
        self.state = if self.has_more {
            CursorState::Loaded
        } else {
            CursorState::Exhausted
        };
        true
    }

    /// Records a failed fetch; `has_more` and the page count are unchanged.
    pub fn fail(&mut self, error: ApiError) -> bool {
        if !self.is_fetching() {
            return false;
        }
        self.state = CursorState::Failed(error);
        true
    }

    /// Leaves `Fetching` without a result, e.g. when the caller stopped waiting.
    pub fn abandon(&mut self) -> bool {
        if !self.is_fetching() {
            return false;
        }
        self.state = if self.pages_fetched == 0 {
            CursorState::Idle
        } else {
            CursorState::Loaded
        };
        true
    }

    pub fn reset(&mut self) {
        self.pages_fetched = 0;
        self.has_more = true;
        self.state = CursorState::Idle;
    }
}
