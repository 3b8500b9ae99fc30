use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiError, ApiResult, Collection, Record};

pub type EntryId = i64;

/// One journal entry as served by `/api/diary-entries`.
///
/// `title`, `mood`, `emotions` and `image_url` are filled in by the backend
/// after creation, so a freshly created entry usually has them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    /// JSON-encoded array of emotion labels.
    #[serde(default)]
    pub emotions: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    /// Author-local logical day, independent of `created_at`.
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn emotion_list(&self) -> Vec<String> {
        self.emotions
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
    }
}

impl Record for Entry {
    type Id = EntryId;
    const COLLECTION: Collection = Collection::DiaryEntries;

    fn id(&self) -> EntryId {
        self.id
    }
}

/// Body of `POST /api/diary-entries`.
///
/// The client token is minted once per draft and travels as the
/// `Idempotency-Key` header, so re-sending the same draft reuses it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntry {
    pub content: String,
    pub date: NaiveDate,
    #[serde(skip)]
    client_token: Uuid,
}

impl NewEntry {
    pub fn new(content: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            content: content.into(),
            date,
            client_token: Uuid::new_v4(),
        }
    }

    pub fn client_token(&self) -> Uuid {
        self.client_token
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.content.trim().is_empty() {
            return Err(ApiError::InvalidRequest(
                "entry content must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
