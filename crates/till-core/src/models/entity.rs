//! Traits shared by every entity that travels through the sync pipeline.

use std::cmp::Ordering;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use super::SyncAction;
use crate::util::parse_iso;

/// Named local collection. Each maps to one local table and one remote table
/// of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Products,
    Users,
    Sales,
    Shifts,
    AuditLogs,
    VoidRequests,
    StockChangeRequests,
    ProductSaleLogs,
    BusinessSettings,
}

impl Collection {
    /// Every syncable collection, in reconciliation order.
    pub const ALL: [Self; 9] = [
        Self::Products,
        Self::Users,
        Self::Sales,
        Self::Shifts,
        Self::AuditLogs,
        Self::VoidRequests,
        Self::StockChangeRequests,
        Self::ProductSaleLogs,
        Self::BusinessSettings,
    ];

    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Users => "users",
            Self::Sales => "sales",
            Self::Shifts => "shifts",
            Self::AuditLogs => "audit_logs",
            Self::VoidRequests => "void_requests",
            Self::StockChangeRequests => "stock_change_requests",
            Self::ProductSaleLogs => "product_sale_logs",
            Self::BusinessSettings => "business_settings",
        }
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.table_name())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.table_name())
    }
}

/// Conflict-resolution key of an entity: a monotonic version plus an
/// RFC 3339 `updatedAt`.
pub trait Versioned {
    fn version(&self) -> Option<u64>;

    fn updated_at(&self) -> Option<&str>;

    /// Bump the version and stamp `updatedAt`; called on every local mutation.
    fn touch(&mut self);

    /// Order two copies of the same entity by freshness.
    fn compare_freshness(&self, other: &Self) -> Ordering
    where
        Self: Sized,
    {
        compare_freshness(self, other)
    }
}

/// `Greater` when `a` is newer than `b`.
///
/// Versions decide when both sides carry one and they differ. Otherwise the
/// later `updatedAt` wins; a missing or unparseable timestamp is the oldest.
pub fn compare_freshness<A, B>(a: &A, b: &B) -> Ordering
where
    A: Versioned + ?Sized,
    B: Versioned + ?Sized,
{
    if let (Some(left), Some(right)) = (a.version(), b.version()) {
        if left != right {
            return left.cmp(&right);
        }
    }

    let left = a.updated_at().and_then(parse_iso);
    let right = b.updated_at().and_then(parse_iso);
    left.cmp(&right)
}

/// Whether `candidate` strictly supersedes `current`.
pub fn is_newer<T: Versioned + ?Sized>(candidate: &T, current: &T) -> bool {
    compare_freshness(candidate, current) == Ordering::Greater
}

/// An entity stored in a local collection and mirrored to the remote store.
pub trait Syncable:
    Versioned + Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
    const COLLECTION: Collection;

    /// Queue action used to upsert a snapshot of this entity.
    const UPSERT_ACTION: SyncAction;

    fn id(&self) -> &str;

    /// Secondary reconciliation pass over merged records.
    ///
    /// Returns the records to keep and the ids removed as duplicates.
    fn collapse(records: Vec<Self>) -> (Vec<Self>, Vec<String>) {
        (records, Vec::new())
    }
}

/// Implements [`Versioned`] for entities with `version: Option<u64>` and
/// `updated_at: Option<String>` fields.
macro_rules! impl_versioned {
    ($($entity:ty),+ $(,)?) => {
        $(
            impl $crate::models::Versioned for $entity {
                fn version(&self) -> Option<u64> {
                    self.version
                }

                fn updated_at(&self) -> Option<&str> {
                    self.updated_at.as_deref()
                }

                fn touch(&mut self) {
                    self.version = Some(self.version.unwrap_or(0) + 1);
                    self.updated_at = Some($crate::util::now_iso());
                }
            }
        )+
    };
}

pub(crate) use impl_versioned;
