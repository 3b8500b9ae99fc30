mod retry;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use core_types::{
    ApiConfig, ApiError, ApiResult, CheckIn, Collection, DiaryMutations, Entry, EntryId,
    NewCheckIn, NewEntry, PageGateway, PageRequest, Record,
};
use reqwest::RequestBuilder;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

pub use retry::Retrying;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// REST gateway for the diary backend.
#[derive(Debug, Clone)]
pub struct HttpDiaryGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDiaryGateway {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = config
            .bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("invalid authorization header")?,
            );
        }
        apply_extra_headers(&mut headers, &config.extra_headers)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        collection: Collection,
        request: PageRequest,
    ) -> ApiResult<Vec<T>> {
        let endpoint = collection.path();
        debug!(
            %collection,
            limit = request.limit.get(),
            offset = request.offset,
            "fetching page"
        );
        let builder = self
            .client
            .get(self.url(endpoint))
            .query(&request.query_pairs());
        send_json(builder, endpoint).await
    }
}

#[async_trait]
impl PageGateway<Entry> for HttpDiaryGateway {
    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Vec<Entry>> {
        self.get_page(Entry::COLLECTION, request).await
    }
}

#[async_trait]
impl PageGateway<CheckIn> for HttpDiaryGateway {
    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Vec<CheckIn>> {
        self.get_page(CheckIn::COLLECTION, request).await
    }
}

#[async_trait]
impl DiaryMutations for HttpDiaryGateway {
    async fn create_entry(&self, draft: &NewEntry) -> ApiResult<Entry> {
        draft.validate()?;
        let endpoint = Entry::COLLECTION.path();
        let builder = self
            .client
            .post(self.url(endpoint))
            .header(IDEMPOTENCY_KEY_HEADER, draft.client_token().to_string())
            .json(draft);
        let entry: Entry = send_json(builder, endpoint).await?;
        info!(entry_id = entry.id, date = %entry.date, "entry created");
        Ok(entry)
    }

    async fn toggle_favorite(&self, id: EntryId) -> ApiResult<Entry> {
        let endpoint = format!("{}/{id}/favorite", Entry::COLLECTION.path());
        let builder = self.client.patch(self.url(&endpoint));
        let entry: Entry = send_json(builder, &endpoint).await?;
        debug!(entry_id = id, is_favorite = entry.is_favorite, "favorite toggled");
        Ok(entry)
    }

    async fn create_check_in(&self, draft: &NewCheckIn) -> ApiResult<CheckIn> {
        draft.validate()?;
        let endpoint = CheckIn::COLLECTION.path();
        let builder = self
            .client
            .post(self.url(endpoint))
            .header(IDEMPOTENCY_KEY_HEADER, draft.client_token().to_string())
            .json(draft);
        let check_in: CheckIn = send_json(builder, endpoint).await?;
        info!(check_in_id = check_in.id, mood = %check_in.mood, "check-in created");
        Ok(check_in)
    }
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder, endpoint: &str) -> ApiResult<T> {
    let response = builder
        .send()
        .await
        .map_err(|err| ApiError::fetch_failed(endpoint, err))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(endpoint, status = status.as_u16(), "request rejected");
        return Err(ApiError::RequestRejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|err| ApiError::fetch_failed(endpoint, err))?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::MalformedResponse {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })
}

fn apply_extra_headers(headers: &mut HeaderMap, extra_headers: &[(String, String)]) -> Result<()> {
    for (key, value) in extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| anyhow!("invalid header name: {key}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| anyhow!("invalid header value for {key}"))?;
        headers.insert(name, value);
    }
    Ok(())
}
