//! Local-to-remote synchronization engine.
//!
//! Domain writes append entries to the sync queue inside their own
//! transaction. [`SyncProcessor`] drains the queue through the
//! [`UpsertGateway`], retrying failures and dead-lettering entries that keep
//! failing. [`Reconciler`] merges remote and local collections at startup and
//! on demand.

mod dead_letter;
mod gateway;
mod merge;
mod processor;
pub mod remote;

pub use dead_letter::{DeadLetterQueue, RetryAllReport};
pub use gateway::{route, PushOutcome, RemoteOp, UpsertGateway};
pub use merge::{
    merge_records, CollectionReport, Conflict, MergeOutcome, ReconcileReport, Reconciler,
};
pub use processor::{PassOutcome, PassReport, SyncProcessor};
pub use remote::{
    InMemoryRemoteStore, RemoteCall, RemoteError, RemoteResult, RemoteStore, RestRemoteStore,
};

#[cfg(test)]
mod tests;
