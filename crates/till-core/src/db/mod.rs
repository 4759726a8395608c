//! Database layer for Till

mod conflict_repository;
mod connection;
mod migrations;
mod queue_repository;
mod store;

pub use conflict_repository::ConflictRepository;
pub use connection::Database;
pub use queue_repository::{DeadLetterRepository, SyncQueueRepository};
pub use store::CollectionStore;
