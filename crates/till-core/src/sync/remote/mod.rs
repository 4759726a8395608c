//! Remote relational store seam.
//!
//! The sync engine only needs three calls against a remote table: upsert a
//! row by `id`, delete a row by `id`, and read a page of rows.

mod memory;
mod rest;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::{InMemoryRemoteStore, RemoteCall};
pub use rest::RestRemoteStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or replace the row whose `id` matches `row["id"]`.
    async fn upsert(&self, table: &str, row: &Value) -> RemoteResult<()>;

    /// Delete the row with `id`. Deleting a missing row succeeds.
    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()>;

    /// Read up to `limit` rows starting at `offset`, in a stable order.
    async fn fetch_page(&self, table: &str, offset: usize, limit: usize)
        -> RemoteResult<Vec<Value>>;
}
