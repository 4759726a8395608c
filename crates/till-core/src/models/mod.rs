//! Data models for Till

mod audit_log;
mod entity;
mod product;
mod product_sale_log;
mod request;
mod sale;
mod settings;
mod shift;
mod sync_conflict;
mod sync_queue;
mod user;

pub use audit_log::AuditLog;
pub use entity::{compare_freshness, is_newer, Collection, Syncable, Versioned};
pub use product::{Product, ProductDraft};
pub use product_sale_log::{collapse_duplicates, sale_log_id, CollapsedLogs, ProductSaleLog};
pub use request::{RequestStatus, StockChangeRequest, VoidRequest};
pub use sale::{Sale, SaleItem, SaleLineInput, SaleRequest, SaleStatus};
pub use settings::BusinessSettings;
pub use shift::{Shift, ShiftStatus};
pub use sync_conflict::{ConflictWinner, SyncConflict, VERSION_LWW_STRATEGY};
pub use sync_queue::{FailedSyncQueueItem, SyncAction, SyncQueueItem};
pub use user::{permissions, Role, User, UserDraft};
