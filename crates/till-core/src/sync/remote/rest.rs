//! PostgREST-style HTTP remote store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::config::SyncConfig;
use crate::util::{compact_text, is_http_url, normalize_text_option};

const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct RestRemoteStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestRemoteStore")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl RestRemoteStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url,
            api_key: normalize_text_option(api_key),
            client,
        })
    }

    /// Build a store from a configured [`SyncConfig`].
    pub fn from_config(config: &SyncConfig) -> RemoteResult<Self> {
        let url = config.remote_url.clone().ok_or_else(|| {
            RemoteError::InvalidConfiguration("remote URL is not configured".to_string())
        })?;
        Self::new(url, config.remote_key.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Api(parse_api_error(status, &body)))
        }
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn upsert(&self, table: &str, row: &Value) -> RemoteResult<()> {
        if row.get("id").and_then(Value::as_str).is_none() {
            return Err(RemoteError::InvalidPayload(format!(
                "{table} row has no string id"
            )));
        }

        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))]);
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_page(
        &self,
        table: &str,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Vec<Value>> {
        let request = self.client.get(self.table_url(table)).query(&[
            ("select", "*".to_string()),
            ("order", "id.asc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        let response = self.send(request).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RemoteErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.details {
                Some(details) => format!(
                    "{}: {} ({})",
                    message.trim(),
                    details.trim(),
                    status.as_u16()
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

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("remote URL must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("pos.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://pos.example.com/rest/v1/ ".to_string()).unwrap(),
            "https://pos.example.com/rest/v1"
        );
    }

    #[test]
    fn table_url_appends_table_name() {
        let store = RestRemoteStore::new("https://pos.example.com/rest/v1", None).unwrap();
        assert_eq!(
            store.table_url("product_sale_logs"),
            "https://pos.example.com/rest/v1/product_sale_logs"
        );
    }

    #[test]
    fn debug_redacts_api_key() {
        let store =
            RestRemoteStore::new("https://pos.example.com", Some("secret".to_string())).unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(
            StatusCode::CONFLICT,
            r#"{"message":"duplicate key","details":"id exists"}"#,
        );
        assert_eq!(message, "duplicate key: id exists (409)");
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  "),
            "HTTP 502"
        );
    }

    #[test]
    fn from_config_requires_url() {
        assert!(RestRemoteStore::from_config(&SyncConfig::default()).is_err());
    }
}
