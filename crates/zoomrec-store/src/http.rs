//! REST client backend talking to a remote event service.

use crate::{EventStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use zoomrec_schedule::validate_event;
use zoomrec_types::{Event, EventDraft, Filter};

/// Connection settings for [`HttpEventStore`].
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// Service root, e.g. `https://events.example.com/api`. `/event` is appended.
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Decodes a `GET /event` body, which holds either a list or a single record.
///
/// Records this client cannot read are logged and skipped so that one bad row
/// does not hide the rest of the batch.
fn decode_events(body: &[u8]) -> StoreResult<Vec<Event>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let items = match serde_json::from_slice::<Value>(body)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        item => vec![item],
    };
    let mut events = Vec::with_capacity(items.len());
    for item in items {
        let key = item
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match serde_json::from_value::<Event>(item) {
            Ok(event) => events.push(event),
            Err(error) => {
                tracing::warn!(event_key = %key, %error, "skipping undecodable event");
            }
        }
    }
    Ok(events)
}

/// `EventStore` backed by the event service's `/event` resource.
///
/// Key assignment, timestamps and the authoritative validation happen on the
/// server; drafts are validated locally as well so obvious mistakes fail fast.
#[derive(Debug, Clone)]
pub struct HttpEventStore {
    http: reqwest::Client,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpEventStore {
    pub fn new(config: HttpStoreConfig) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout.max(Duration::from_millis(1)))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/event", config.base_url.trim_end_matches('/')),
            username: config
                .username
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            password: config.password,
        })
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url);
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    fn event_url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key)
    }
}

/// Encodes filters as `Filter.N.Name` / `Filter.N.Operator` / `Filter.N.Value`
/// query pairs, numbered from 1.
pub(crate) fn filter_query(filters: &[Filter]) -> Vec<(String, String)> {
    let mut query = Vec::with_capacity(filters.len() * 3);
    for (index, filter) in filters.iter().enumerate() {
        let position = index + 1;
        query.push((
            format!("Filter.{position}.Name"),
            filter.field.as_str().to_string(),
        ));
        query.push((
            format!("Filter.{position}.Operator"),
            filter.op.as_str().to_string(),
        ));
        query.push((
            format!("Filter.{position}.Value"),
            filter.value.to_query_value(),
        ));
    }
    query
}

async fn error_from_response(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Http { status, body }
}

#[async_trait]
impl EventStore for HttpEventStore {
    async fn get(&self, key: Option<&str>, filters: &[Filter]) -> StoreResult<Vec<Event>> {
        let url = match key {
            Some(key) => self.event_url(key),
            None => self.endpoint.clone(),
        };
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&filter_query(filters))
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            StatusCode::NOT_FOUND if key.is_some() => Ok(Vec::new()),
            status if status.is_success() => {
                let body = response.bytes().await?;
                let mut events = decode_events(&body)?;
                if !filters.is_empty() {
                    events.retain(|event| filters.iter().all(|filter| filter.matches(event)));
                }
                Ok(events)
            }
            _ => Err(error_from_response(response).await),
        }
    }

    async fn create(&self, draft: EventDraft) -> StoreResult<Event> {
        let candidate = draft.clone().into_event("pending", Utc::now())?;
        validate_event(&candidate)?;

        let response = self
            .request(reqwest::Method::POST, self.endpoint.clone())
            .json(&draft)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let created: Event = response.json().await?;
        tracing::debug!(event_key = %created.key, "event created remotely");
        Ok(created)
    }

    async fn update(&self, event: Event) -> StoreResult<Event> {
        let response = self
            .request(reqwest::Method::PUT, self.event_url(&event.key))
            .json(&event)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(event.key)),
            status if status.is_success() => {
                let body = response.text().await?;
                if body.trim().is_empty() {
                    return Ok(event);
                }
                Ok(serde_json::from_str(&body)?)
            }
            _ => Err(error_from_response(response).await),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let response = self
            .request(reqwest::Method::DELETE, self.event_url(key))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(error_from_response(response).await),
        }
    }
}
