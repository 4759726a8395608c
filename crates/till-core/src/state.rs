//! Shared application state types.

use std::collections::BTreeMap;

use libsql::Connection;
use serde::Serialize;

use crate::db::CollectionStore;
use crate::error::Result;
use crate::models::{
    AuditLog, BusinessSettings, Product, ProductSaleLog, Sale, Shift, StockChangeRequest,
    Syncable, User, VoidRequest,
};

/// Sync state shown to operators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Offline,
    Syncing,
    Synced,
    Error,
}

/// Snapshot of the processor's progress.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Entries waiting in the live queue after the last pass
    pub pending: usize,
    /// Entries parked in the dead-letter queue
    pub dead_letters: usize,
    /// End of the last completed pass (Unix ms)
    pub last_pass_at: Option<i64>,
    pub last_error: Option<String>,
}

/// In-memory mirror of the local collections plus the active session.
///
/// Refreshed from the local store at init and after every committed mutation.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    pub products: BTreeMap<String, Product>,
    pub users: BTreeMap<String, User>,
    pub sales: BTreeMap<String, Sale>,
    pub shifts: BTreeMap<String, Shift>,
    pub audit_logs: BTreeMap<String, AuditLog>,
    pub void_requests: BTreeMap<String, VoidRequest>,
    pub stock_change_requests: BTreeMap<String, StockChangeRequest>,
    pub product_sale_logs: BTreeMap<String, ProductSaleLog>,
    pub business_settings: BTreeMap<String, BusinessSettings>,
    /// Logged-in user, if any
    pub session: Option<User>,
}

/// Entities that have a slot in [`AppState`].
pub trait StateEntity: Syncable {
    fn slot(state: &mut AppState) -> &mut BTreeMap<String, Self>;

    /// Hook run after the entity is stored in memory.
    fn after_upsert(&self, _state: &mut AppState) {}
}

macro_rules! impl_state_entity {
    ($($entity:ty => $field:ident),+ $(,)?) => {
        $(
            impl StateEntity for $entity {
                fn slot(state: &mut AppState) -> &mut BTreeMap<String, Self> {
                    &mut state.$field
                }
            }
        )+
    };
}

impl_state_entity!(
    Product => products,
    Sale => sales,
    Shift => shifts,
    AuditLog => audit_logs,
    VoidRequest => void_requests,
    StockChangeRequest => stock_change_requests,
    ProductSaleLog => product_sale_logs,
    BusinessSettings => business_settings,
);

impl StateEntity for User {
    fn slot(state: &mut AppState) -> &mut BTreeMap<String, Self> {
        &mut state.users
    }

    fn after_upsert(&self, state: &mut AppState) {
        if state.session.as_ref().is_some_and(|s| s.id == self.id) {
            state.session = Some(self.clone());
        }
    }
}

impl AppState {
    /// Load every collection from the local store.
    pub async fn load(conn: &Connection) -> Result<Self> {
        let mut state = Self::default();
        state.reload(conn).await?;
        Ok(state)
    }

    /// Replace the in-memory collections with the stored ones. The session
    /// survives unless its user no longer exists.
    pub async fn reload(&mut self, conn: &Connection) -> Result<()> {
        self.reload_collection::<Product>(conn).await?;
        self.reload_collection::<User>(conn).await?;
        self.reload_collection::<Sale>(conn).await?;
        self.reload_collection::<Shift>(conn).await?;
        self.reload_collection::<AuditLog>(conn).await?;
        self.reload_collection::<VoidRequest>(conn).await?;
        self.reload_collection::<StockChangeRequest>(conn).await?;
        self.reload_collection::<ProductSaleLog>(conn).await?;
        self.reload_collection::<BusinessSettings>(conn).await?;

        if let Some(session_id) = self.session.as_ref().map(|user| user.id.clone()) {
            self.session = self.users.get(&session_id).cloned();
        }
        Ok(())
    }

    pub async fn reload_collection<T: StateEntity>(&mut self, conn: &Connection) -> Result<()> {
        let records: Vec<T> = CollectionStore::new(conn).get_all().await?;
        self.replace_all(records);
        Ok(())
    }

    pub fn replace_all<T: StateEntity>(&mut self, records: Vec<T>) {
        *T::slot(self) = records
            .into_iter()
            .map(|record| (record.id().to_string(), record))
            .collect();
    }

    pub fn upsert<T: StateEntity>(&mut self, entity: T) {
        entity.after_upsert(self);
        T::slot(self).insert(entity.id().to_string(), entity);
    }

    pub fn remove<T: StateEntity>(&mut self, id: &str) -> Option<T> {
        T::slot(self).remove(id)
    }

    /// Current settings, or defaults when none were saved yet.
    pub fn settings(&self) -> BusinessSettings {
        self.business_settings
            .get(BusinessSettings::ID)
            .cloned()
            .unwrap_or_default()
    }

    /// Open shift of the logged-in user.
    pub fn active_shift(&self) -> Option<&Shift> {
        let user_id = &self.session.as_ref()?.id;
        self.shifts
            .values()
            .find(|shift| shift.is_open() && &shift.user_id == user_id)
    }

    /// Drop everything held in memory, including the session.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
