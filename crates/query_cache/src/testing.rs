use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use core_types::{
    ApiError, ApiResult, CheckIn, DiaryMutations, Entry, EntryId, NewCheckIn, NewEntry,
    PageGateway, PageRequest, Record,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

pub(crate) fn entry(id: i64) -> Entry {
    Entry {
        id,
        user_id: Some(1),
        content: format!("entry {id}"),
        title: None,
        mood: None,
        emotions: None,
        image_url: None,
        is_favorite: false,
        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

pub(crate) fn favorite(id: i64) -> Entry {
    Entry {
        is_favorite: true,
        ..entry(id)
    }
}

pub(crate) fn check_in(id: i64) -> CheckIn {
    CheckIn {
        id,
        user_id: Some(1),
        mood: "calm".to_string(),
        mood_causes: vec!["sleep".to_string()],
        mood_intensity: 5,
        notes: None,
        companions: Vec::new(),
        location: None,
        custom_location_details: None,
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

pub(crate) fn ids(items: &[Entry]) -> Vec<i64> {
    items.iter().map(|e| e.id).collect()
}

pub(crate) fn offline(endpoint: &str) -> ApiError {
    ApiError::fetch_failed(endpoint, "connection refused")
}

/// Replays scripted pages and records every request. When gated, each call
/// parks until the test adds a permit.
pub(crate) struct FakePages<T> {
    replies: Mutex<VecDeque<ApiResult<Vec<T>>>>,
    requests: Mutex<Vec<PageRequest>>,
    gate: Option<Arc<Semaphore>>,
    started: Notify,
}

impl<T> FakePages<T> {
    pub(crate) fn new(replies: Vec<ApiResult<Vec<T>>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            gate: None,
            started: Notify::new(),
        }
    }

    pub(crate) fn gated(replies: Vec<ApiResult<Vec<T>>>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fake = Self {
            gate: Some(gate.clone()),
            ..Self::new(replies)
        };
        (fake, gate)
    }

    pub(crate) fn push_reply(&self, reply: ApiResult<Vec<T>>) {
        self.replies.lock().push_back(reply);
    }

    pub(crate) fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn offsets(&self) -> Vec<u64> {
        self.requests.lock().iter().map(|r| r.offset).collect()
    }

    pub(crate) async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl<T: Record> PageGateway<T> for FakePages<T> {
    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Vec<T>> {
        self.requests.lock().push(request);
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Default)]
pub(crate) struct FakeMutations {
    pub(crate) toggles: Mutex<VecDeque<ApiResult<Entry>>>,
    pub(crate) creates: Mutex<VecDeque<ApiResult<Entry>>>,
    pub(crate) check_ins: Mutex<VecDeque<ApiResult<CheckIn>>>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl FakeMutations {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DiaryMutations for FakeMutations {
    async fn create_entry(&self, draft: &NewEntry) -> ApiResult<Entry> {
        self.calls.lock().push(format!("create:{}", draft.content));
        self.creates
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(offline("/api/diary-entries")))
    }

    async fn toggle_favorite(&self, id: EntryId) -> ApiResult<Entry> {
        self.calls.lock().push(format!("favorite:{id}"));
        self.toggles
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(offline("/api/diary-entries/favorite")))
    }

    async fn create_check_in(&self, draft: &NewCheckIn) -> ApiResult<CheckIn> {
        self.calls.lock().push(format!("check-in:{}", draft.mood));
        self.check_ins
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(offline("/api/check-ins")))
    }
}
