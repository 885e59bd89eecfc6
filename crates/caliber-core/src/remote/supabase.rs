//! Supabase PostgREST implementation of `RemoteBackend`.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{RemoteBackend, RemoteError, RemoteRecord};
use crate::config::RemoteConfig;
use crate::util::compact_text;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP client for `{supabase_url}/rest/v1/{table}`.
#[derive(Clone)]
pub struct SupabaseBackend {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for SupabaseBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SupabaseBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SupabaseBackend {
    pub fn new(config: RemoteConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|error| {
                crate::Error::InvalidInput(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self { config, client })
    }

    /// Check that the REST endpoint answers at all.
    pub async fn probe(&self) -> Result<(), RemoteError> {
        let url = format!("{}/rest/v1/", self.config.supabase_url);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(send_error)?;
        if response.status().is_server_error() {
            return Err(RemoteError::Transient(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// Fetch the current row for an entity, if it exists.
    pub async fn fetch(
        &self,
        entity_kind: &str,
        id: &str,
    ) -> Result<Option<RemoteRecord>, RemoteError> {
        let url = format!("{}&select=*", self.row_url(entity_kind, id)?);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(send_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Ok(parse_rows(&body)?
            .into_iter()
            .next()
            .map(|row| RemoteRecord::from_row(row, id)))
    }

    /// Fetch every row of a table visible to the current session.
    pub async fn list(&self, entity_kind: &str) -> Result<Vec<RemoteRecord>, RemoteError> {
        let url = format!("{}?select=*", self.table_url(entity_kind)?);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(send_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Ok(parse_rows(&body)?
            .into_iter()
            .filter_map(|row| {
                let id = crate::models::payload_entity_id(&row)?;
                Some(RemoteRecord::from_row(row, &id))
            })
            .collect())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.config.supabase_anon_key)
            .bearer_auth(self.config.bearer_token())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn table_url(&self, entity_kind: &str) -> Result<String, RemoteError> {
        validate_table(entity_kind)?;
        Ok(format!("{}/rest/v1/{entity_kind}", self.config.supabase_url))
    }

    fn row_url(&self, entity_kind: &str, id: &str) -> Result<String, RemoteError> {
        Ok(format!(
            "{}?id=eq.{}",
            self.table_url(entity_kind)?,
            urlencoding::encode(id)
        ))
    }

    /// Fail with `Conflict` when the server row moved past `base_updated_at`.
    async fn ensure_unchanged(
        &self,
        entity_kind: &str,
        id: &str,
        base_updated_at: Option<i64>,
    ) -> Result<(), RemoteError> {
        let Some(base) = base_updated_at else {
            return Ok(());
        };
        match self.fetch(entity_kind, id).await? {
            Some(current) if current.updated_at.is_some_and(|remote| remote > base) => {
                Err(RemoteError::Conflict { current })
            }
            _ => Ok(()),
        }
    }

    /// Turn a 409 into a `Conflict` carrying the current row.
    async fn conflict_or_rejected(&self, entity_kind: &str, id: &str, body: &str) -> RemoteError {
        match self.fetch(entity_kind, id).await {
            Ok(Some(current)) => RemoteError::Conflict { current },
            Ok(None) => RemoteError::Rejected(api_message(StatusCode::CONFLICT, body)),
            Err(error) => error,
        }
    }

    async fn write(
        &self,
        method: Method,
        url: &str,
        payload: Option<&serde_json::Value>,
        entity_kind: &str,
        id: &str,
    ) -> Result<Vec<serde_json::Value>, RemoteError> {
        let mut request = self
            .request(method, url)
            .header("Prefer", "return=representation");
        if let Some(payload) = payload {
            request = request.json(payload);
        }
        let response = request.send().await.map_err(send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(send_error)?;
        if status == StatusCode::CONFLICT {
            return Err(self.conflict_or_rejected(entity_kind, id, &body).await);
        }
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        parse_rows(&body)
    }
}

impl RemoteBackend for SupabaseBackend {
    async fn create(
        &self,
        entity_kind: &str,
        payload: &serde_json::Value,
    ) -> Result<RemoteRecord, RemoteError> {
        let id = crate::models::payload_entity_id(payload).unwrap_or_default();
        let url = self.table_url(entity_kind)?;
        let rows = self
            .write(Method::POST, &url, Some(payload), entity_kind, &id)
            .await?;
        Ok(rows.into_iter().next().map_or_else(
            || RemoteRecord {
                id: id.clone(),
                data: payload.clone(),
                updated_at: None,
            },
            |row| RemoteRecord::from_row(row, &id),
        ))
    }

    async fn update(
        &self,
        entity_kind: &str,
        id: &str,
        payload: &serde_json::Value,
        base_updated_at: Option<i64>,
    ) -> Result<RemoteRecord, RemoteError> {
        self.ensure_unchanged(entity_kind, id, base_updated_at)
            .await?;
        let url = self.row_url(entity_kind, id)?;
        let rows = self
            .write(Method::PATCH, &url, Some(payload), entity_kind, id)
            .await?;
        rows.into_iter()
            .next()
            .map(|row| RemoteRecord::from_row(row, id))
            .ok_or_else(|| RemoteError::Rejected(format!("{entity_kind}/{id} does not exist")))
    }

    async fn delete(
        &self,
        entity_kind: &str,
        id: &str,
        base_updated_at: Option<i64>,
    ) -> Result<(), RemoteError> {
        self.ensure_unchanged(entity_kind, id, base_updated_at)
            .await?;
        let url = self.row_url(entity_kind, id)?;
        // Deleting a row that is already gone succeeds with an empty representation.
        self.write(Method::DELETE, &url, None, entity_kind, id)
            .await?;
        Ok(())
    }
}

fn validate_table(entity_kind: &str) -> Result<(), RemoteError> {
    let valid = !entity_kind.is_empty()
        && entity_kind
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(RemoteError::Rejected(format!(
            "invalid entity kind '{entity_kind}'"
        )))
    }
}

fn parse_rows(body: &str) -> Result<Vec<serde_json::Value>, RemoteError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Array(rows)) => Ok(rows),
        Ok(row @ serde_json::Value::Object(_)) => Ok(vec![row]),
        Ok(_) => Ok(Vec::new()),
        Err(error) => Err(RemoteError::Transient(format!(
            "unreadable response body: {error}"
        ))),
    }
}

fn send_error(error: reqwest::Error) -> RemoteError {
    if error.is_builder() {
        RemoteError::Rejected(format!("invalid request: {error}"))
    } else {
        RemoteError::Transient(error.to_string())
    }
}

/// Map a non-success, non-409 status to transient or terminal.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = api_message(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Rejected(message)
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

fn api_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.details {
                Some(details) => format!(
                    "{} ({}): {}",
                    message.trim(),
                    status.as_u16(),
                    compact_text(&details)
                ),
                None => format!("{} ({})", message.trim(), status.as_u16()),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}
