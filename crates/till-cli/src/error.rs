use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] till_core::Error),
    #[error(transparent)]
    Remote(#[from] till_core::sync::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("This command needs an operator: pass --pin or set TILL_PIN")]
    PinRequired,
    #[error("Invalid sale line '{0}'; expected PRODUCT_ID or PRODUCT_ID:QTY")]
    InvalidSaleLine(String),
    #[error("No {kind} found for id/prefix: {query}")]
    NotFound { kind: &'static str, query: String },
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Pass a {0} id or --all")]
    MissingTarget(&'static str),
    #[error("Nothing to change; pass at least one field")]
    NothingToChange,
    #[error(
        "Sync is not configured. Set TILL_REMOTE_URL (and TILL_REMOTE_KEY), or pass --offline-demo."
    )]
    SyncNotConfigured,
}
