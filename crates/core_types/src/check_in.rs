use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiError, ApiResult, Collection, Record};

pub type CheckInId = i64;

pub const MOOD_INTENSITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub id: CheckInId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub mood: String,
    #[serde(default)]
    pub mood_causes: Vec<String>,
    pub mood_intensity: u8,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub companions: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub custom_location_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for CheckIn {
    type Id = CheckInId;
    const COLLECTION: Collection = Collection::CheckIns;

    fn id(&self) -> CheckInId {
        self.id
    }
}

/// Body of `POST /api/check-ins`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCheckIn {
    pub mood: String,
    pub mood_causes: Vec<String>,
    pub mood_intensity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub companions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_location_details: Option<String>,
    #[serde(skip)]
    client_token: Uuid,
}

impl NewCheckIn {
    pub fn new(mood: impl Into<String>, mood_intensity: u8) -> Self {
        Self {
            mood: mood.into(),
            mood_causes: Vec::new(),
            mood_intensity,
            notes: None,
            companions: Vec::new(),
            location: None,
            custom_location_details: None,
            client_token: Uuid::new_v4(),
        }
    }

    pub fn with_causes(mut self, causes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.mood_causes = causes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_companions(mut self, people: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.companions = people.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>, details: Option<String>) -> Self {
        self.location = Some(location.into());
        self.custom_location_details = details;
        self
    }

    pub fn client_token(&self) -> Uuid {
        self.client_token
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.mood.trim().is_empty() {
            return Err(ApiError::InvalidRequest("mood must not be empty".to_string()));
        }
        if !MOOD_INTENSITY_RANGE.contains(&self.mood_intensity) {
            return Err(ApiError::InvalidRequest(format!(
                "mood intensity {} is outside {}..={}",
                self.mood_intensity,
                MOOD_INTENSITY_RANGE.start(),
                MOOD_INTENSITY_RANGE.end()
            )));
        }
        Ok(())
    }
}
