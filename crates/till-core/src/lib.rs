//! till-core - Core library for Till
//!
//! This crate contains the shared models, local store, sync engine and
//! domain services used by every Till interface.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use services::{DatabaseService, TillApp, TillService};
