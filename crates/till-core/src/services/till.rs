//! Domain mutation layer.
//!
//! Every mutation validates first, then writes the touched collections and
//! their sync queue entries in one local transaction. The in-memory state is
//! refreshed only after the commit, and an audit entry follows through the
//! same queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libsql::{Connection, Transaction};
use tokio::sync::{RwLock, RwLockReadGuard};

use super::database::DatabaseService;
use super::integrity::{check_integrity, IntegrityReport};
use crate::db::{CollectionStore, SyncQueueRepository};
use crate::error::{Error, Result};
use crate::models::{
    permissions, AuditLog, BusinessSettings, Product, ProductDraft, ProductSaleLog,
    RequestStatus, Role, Sale, SaleItem, SaleLineInput, SaleRequest, SaleStatus, Shift,
    ShiftStatus, StockChangeRequest, SyncAction, Syncable, User, UserDraft, Versioned,
    VoidRequest,
};
use crate::state::AppState;
use crate::util::{generate_id, normalize_text_option, now_iso};

/// Largest adjustment a single stock change request may carry.
const MAX_STOCK_CHANGE: u64 = 1_000_000_000;

/// Commit on success, roll back on error.
async fn finish<T>(tx: Transaction, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            tx.rollback().await.ok();
            Err(error)
        }
    }
}

/// Entity writes paired with their queue entries, bound to one transaction.
struct Outbox<'a> {
    store: CollectionStore<'a>,
    queue: SyncQueueRepository<'a>,
}

impl<'a> Outbox<'a> {
    const fn new(conn: &'a Connection) -> Self {
        Self {
            store: CollectionStore::new(conn),
            queue: SyncQueueRepository::new(conn),
        }
    }

    async fn save<T: Syncable>(&self, entity: &T) -> Result<()> {
        self.store.put(entity).await?;
        self.queue.enqueue_action(T::UPSERT_ACTION, entity).await?;
        Ok(())
    }

    /// Delete locally, drop queued upserts for the id and queue the remote
    /// delete.
    async fn remove<T: Syncable>(&self, id: &str, action: SyncAction) -> Result<()> {
        self.store.delete(T::COLLECTION, id).await?;
        self.queue
            .delete_upserts(T::UPSERT_ACTION.as_str(), id)
            .await?;
        self.queue.enqueue_delete(action, id).await?;
        Ok(())
    }
}

/// Single-flight flag for sale processing.
struct SaleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SaleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SaleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

enum SaleWrite {
    Replayed(Sale),
    Recorded {
        sale: Sale,
        products: Vec<Product>,
        logs: Vec<ProductSaleLog>,
    },
}

struct VoidResolution {
    request: VoidRequest,
    sale: Option<Sale>,
    products: Vec<Product>,
    removed_logs: Vec<String>,
}

/// Till operations over the local store and the in-memory state.
#[derive(Clone)]
pub struct TillService {
    db: DatabaseService,
    state: Arc<RwLock<AppState>>,
    sale_lock: Arc<AtomicBool>,
}

impl TillService {
    pub fn new(db: DatabaseService, state: AppState) -> Self {
        Self {
            db,
            state: Arc::new(RwLock::new(state)),
            sale_lock: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load the state from the store and wrap it.
    pub async fn open(db: DatabaseService) -> Result<Self> {
        let state = db.load_state().await?;
        Ok(Self::new(db, state))
    }

    pub fn database(&self) -> &DatabaseService {
        &self.db
    }

    /// Read access to the in-memory state.
    pub async fn state(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().await
    }

    /// Refresh the in-memory collections from the store, keeping the session.
    pub async fn reload(&self) -> Result<()> {
        let db = self.db.lock().await;
        let mut state = self.state.write().await;
        state.reload(db.connection()).await
    }

    /// Drop the in-memory state, including the session.
    pub async fn clear(&self) {
        self.state.write().await.clear();
    }

    // Session

    pub async fn login(&self, pin: &str) -> Result<User> {
        let pin = pin.trim();
        let user = {
            let state = self.state.read().await;
            state.users.values().find(|user| user.pin == pin).cloned()
        };
        let user = user.ok_or(Error::InvalidPin)?;

        self.state.write().await.session = Some(user.clone());
        tracing::info!("User {} logged in", user.id);
        self.audit(Some(&user), "LOGIN", Some(&user.id), format!("{} logged in", user.name))
            .await;
        Ok(user)
    }

    pub async fn logout(&self) {
        let previous = self.state.write().await.session.take();
        if let Some(user) = previous {
            tracing::info!("User {} logged out", user.id);
            self.audit(Some(&user), "LOGOUT", Some(&user.id), format!("{} logged out", user.name))
                .await;
        }
    }

    pub async fn current_user(&self) -> Option<User> {
        self.state.read().await.session.clone()
    }

    // Products

    pub async fn save_product(&self, draft: ProductDraft) -> Result<Product> {
        let actor = self.require(permissions::PRODUCT_MANAGE).await?;
        let draft = validate_product_draft(draft)?;

        let mut product = Product::from_draft(draft);
        product.touch();
        {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = Outbox::new(&tx).save(&product).await;
            finish(tx, result).await?;
        }

        self.state.write().await.upsert(product.clone());
        self.audit(
            Some(&actor),
            "PRODUCT_CREATED",
            Some(&product.id),
            product.display_name(),
        )
        .await;
        Ok(product)
    }

    /// Replace a product's editable fields.
    ///
    /// `expected_version` is the version the caller last read; a stored copy
    /// that moved on since raises [`Error::VersionConflict`].
    pub async fn update_product(&self, product: Product, expected_version: u64) -> Result<Product> {
        let actor = self.require(permissions::PRODUCT_MANAGE).await?;
        validate_product_fields(&product.name, product.price, product.cost_price, product.stock)?;

        let updated = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = update_product_in(&tx, product, expected_version).await;
            finish(tx, result).await?
        };

        self.state.write().await.upsert(updated.clone());
        self.audit(
            Some(&actor),
            "PRODUCT_UPDATED",
            Some(&updated.id),
            format!("{} v{}", updated.display_name(), updated.version.unwrap_or(0)),
        )
        .await;
        Ok(updated)
    }

    /// Delete a product. Recorded sales keep their line snapshots.
    pub async fn delete_product(&self, id: &str) -> Result<()> {
        let actor = self.require(permissions::PRODUCT_MANAGE).await?;

        let removed = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = delete_entity_in::<Product>(&tx, id, SyncAction::DeleteProduct).await;
            finish(tx, result).await?
        };

        self.state.write().await.remove::<Product>(id);
        self.audit(Some(&actor), "PRODUCT_DELETED", Some(id), removed.display_name())
            .await;
        Ok(())
    }

    // Users

    /// Create a user. With no users stored yet, no session is needed and the
    /// new user becomes the bootstrap admin.
    pub async fn create_user(&self, draft: UserDraft) -> Result<User> {
        let bootstrap = self.state.read().await.users.is_empty();
        let actor = if bootstrap {
            None
        } else {
            Some(self.require(permissions::USER_MANAGE).await?)
        };

        let mut draft = validate_user_draft(draft)?;
        if bootstrap {
            draft.role = Role::Admin;
        }

        let mut user = User::from_draft(draft);
        user.touch();
        {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = create_user_in(&tx, &user).await;
            finish(tx, result).await?;
        }

        if bootstrap {
            tracing::info!("Created bootstrap admin {}", user.id);
        }
        self.state.write().await.upsert(user.clone());
        self.audit(actor.as_ref(), "USER_CREATED", Some(&user.id), user.name.clone())
            .await;
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        let actor = self.require(permissions::USER_MANAGE).await?;
        if actor.id == id {
            return Err(Error::InvalidInput(
                "cannot delete the logged-in user".to_string(),
            ));
        }

        let removed = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = delete_entity_in::<User>(&tx, id, SyncAction::DeleteUser).await;
            finish(tx, result).await?
        };

        self.state.write().await.remove::<User>(id);
        self.audit(Some(&actor), "USER_DELETED", Some(id), removed.name)
            .await;
        Ok(())
    }

    // Shifts

    pub async fn open_shift(&self, opening_cash: f64) -> Result<Shift> {
        let actor = self.session_user().await?;
        if !opening_cash.is_finite() || opening_cash < 0.0 {
            return Err(Error::InvalidInput(
                "opening cash must be zero or more".to_string(),
            ));
        }

        let mut shift = Shift {
            id: generate_id(),
            user_id: actor.id.clone(),
            opened_at: now_iso(),
            closed_at: None,
            opening_cash,
            closing_cash: None,
            status: ShiftStatus::Open,
            version: None,
            updated_at: None,
        };
        shift.touch();
        {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = open_shift_in(&tx, &shift).await;
            finish(tx, result).await?;
        }

        self.state.write().await.upsert(shift.clone());
        self.audit(
            Some(&actor),
            "SHIFT_OPENED",
            Some(&shift.id),
            format!("opening cash {opening_cash:.2}"),
        )
        .await;
        Ok(shift)
    }

    pub async fn close_shift(&self, closing_cash: f64) -> Result<Shift> {
        let actor = self.session_user().await?;
        if !closing_cash.is_finite() || closing_cash < 0.0 {
            return Err(Error::InvalidInput(
                "closing cash must be zero or more".to_string(),
            ));
        }

        let shift = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = close_shift_in(&tx, &actor.id, closing_cash).await;
            finish(tx, result).await?
        };

        self.state.write().await.upsert(shift.clone());
        self.audit(
            Some(&actor),
            "SHIFT_CLOSED",
            Some(&shift.id),
            format!("closing cash {closing_cash:.2}"),
        )
        .await;
        Ok(shift)
    }

    // Settings

    pub async fn update_settings(&self, settings: BusinessSettings) -> Result<BusinessSettings> {
        let actor = self.require(permissions::SETTINGS_MANAGE).await?;
        let settings = validate_settings(settings)?;

        let saved = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = update_settings_in(&tx, settings).await;
            finish(tx, result).await?
        };

        self.state.write().await.upsert(saved.clone());
        self.audit(
            Some(&actor),
            "SETTINGS_UPDATED",
            Some(&saved.id),
            saved.business_name.clone(),
        )
        .await;
        Ok(saved)
    }

    // Sales

    /// Record a sale: decrement stock, store the sale and one log per line.
    ///
    /// A request carrying the id of an already recorded sale returns that
    /// sale without writing. A second sale started while one is in flight
    /// fails with [`Error::Busy`].
    pub async fn process_sale(&self, request: SaleRequest) -> Result<Sale> {
        let _guard = SaleGuard::acquire(&self.sale_lock).ok_or(Error::Busy)?;

        let (cashier, shift_id) = {
            let state = self.state.read().await;
            let cashier = state.session.clone().ok_or(Error::NotAuthenticated)?;
            let shift_id = state.active_shift().map(|shift| shift.id.clone());
            (cashier, shift_id)
        };
        let lines = coalesce_lines(request.items)?;
        let sale_id = normalize_text_option(request.sale_id).unwrap_or_else(generate_id);
        let payment_method = normalize_text_option(Some(request.payment_method))
            .unwrap_or_else(|| "CASH".to_string());

        let draft = Sale {
            id: sale_id,
            items: Vec::new(),
            total_amount: 0.0,
            total_cost: 0.0,
            payment_method,
            cashier_id: Some(cashier.id.clone()),
            shift_id,
            status: SaleStatus::Completed,
            created_at: now_iso(),
            voided_at: None,
            version: None,
            updated_at: None,
        };

        let written = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = record_sale_in(&tx, draft, &lines).await;
            finish(tx, result).await?
        };

        match written {
            SaleWrite::Replayed(sale) => {
                tracing::info!("Sale {} already recorded; returning stored copy", sale.id);
                Ok(sale)
            }
            SaleWrite::Recorded {
                sale,
                products,
                logs,
            } => {
                {
                    let mut state = self.state.write().await;
                    for product in products {
                        state.upsert(product);
                    }
                    for log in logs {
                        state.upsert(log);
                    }
                    state.upsert(sale.clone());
                }
                tracing::info!(
                    "Recorded sale {} ({} lines, total {:.2})",
                    sale.id,
                    sale.items.len(),
                    sale.total_amount
                );
                self.audit(
                    Some(&cashier),
                    "SALE_COMPLETED",
                    Some(&sale.id),
                    format!("total {:.2}", sale.total_amount),
                )
                .await;
                Ok(sale)
            }
        }
    }

    // Voids

    pub async fn request_void(&self, sale_id: &str, reason: &str) -> Result<VoidRequest> {
        let actor = self.session_user().await?;
        let reason = required_reason(reason)?;

        let mut request = VoidRequest {
            id: generate_id(),
            sale_id: sale_id.to_string(),
            reason,
            requested_by: actor.id.clone(),
            status: RequestStatus::Pending,
            resolved_by: None,
            resolved_at: None,
            created_at: now_iso(),
            version: None,
            updated_at: None,
        };
        request.touch();
        {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = request_void_in(&tx, &request).await;
            finish(tx, result).await?;
        }

        self.state.write().await.upsert(request.clone());
        self.audit(Some(&actor), "VOID_REQUESTED", Some(sale_id), request.reason.clone())
            .await;
        Ok(request)
    }

    /// Approve or reject a pending void. Approval voids the sale, restores
    /// stock for products that still exist and deletes the sale's logs.
    pub async fn resolve_void(&self, id: &str, approve: bool) -> Result<VoidRequest> {
        let actor = self.require(permissions::VOID_APPROVE).await?;

        let resolution = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = resolve_void_in(&tx, id, approve, &actor.id).await;
            finish(tx, result).await?
        };

        let VoidResolution {
            request,
            sale,
            products,
            removed_logs,
        } = resolution;
        {
            let mut state = self.state.write().await;
            state.upsert(request.clone());
            if let Some(sale) = sale {
                state.upsert(sale);
            }
            for product in products {
                state.upsert(product);
            }
            for log_id in &removed_logs {
                state.remove::<ProductSaleLog>(log_id);
            }
        }

        let action = if approve { "VOID_APPROVED" } else { "VOID_REJECTED" };
        self.audit(Some(&actor), action, Some(&request.sale_id), request.reason.clone())
            .await;
        Ok(request)
    }

    // Stock changes

    pub async fn request_stock_change(
        &self,
        product_id: &str,
        quantity_change: i64,
        reason: &str,
    ) -> Result<StockChangeRequest> {
        let actor = self.session_user().await?;
        if quantity_change == 0 {
            return Err(Error::InvalidInput(
                "stock change must not be zero".to_string(),
            ));
        }
        if quantity_change.unsigned_abs() > MAX_STOCK_CHANGE {
            return Err(Error::InvalidInput(format!(
                "stock change must be within ±{MAX_STOCK_CHANGE}"
            )));
        }
        let reason = required_reason(reason)?;

        let mut request = StockChangeRequest {
            id: generate_id(),
            product_id: product_id.to_string(),
            quantity_change,
            reason,
            requested_by: actor.id.clone(),
            status: RequestStatus::Pending,
            resolved_by: None,
            resolved_at: None,
            created_at: now_iso(),
            version: None,
            updated_at: None,
        };
        request.touch();
        {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = request_stock_change_in(&tx, &request).await;
            finish(tx, result).await?;
        }

        self.state.write().await.upsert(request.clone());
        self.audit(
            Some(&actor),
            "STOCK_CHANGE_REQUESTED",
            Some(product_id),
            format!("{quantity_change:+} ({})", request.reason),
        )
        .await;
        Ok(request)
    }

    /// Approve or reject a pending stock change. Approval that would take
    /// stock below zero fails with [`Error::InsufficientStock`].
    pub async fn resolve_stock_change(&self, id: &str, approve: bool) -> Result<StockChangeRequest> {
        let actor = self.require(permissions::STOCK_APPROVE).await?;

        let (request, product) = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let result = resolve_stock_change_in(&tx, id, approve, &actor.id).await;
            finish(tx, result).await?
        };

        {
            let mut state = self.state.write().await;
            state.upsert(request.clone());
            if let Some(product) = product {
                state.upsert(product);
            }
        }

        let action = if approve {
            "STOCK_CHANGE_APPROVED"
        } else {
            "STOCK_CHANGE_REJECTED"
        };
        self.audit(
            Some(&actor),
            action,
            Some(&request.product_id),
            format!("{:+}", request.quantity_change),
        )
        .await;
        Ok(request)
    }

    // Integrity

    /// Compare recorded sales against their product sale logs.
    pub async fn check_integrity(&self) -> Result<IntegrityReport> {
        let db = self.db.lock().await;
        let store = CollectionStore::new(db.connection());
        let sales: Vec<Sale> = store.get_all().await?;
        let logs: Vec<ProductSaleLog> = store.get_all().await?;
        Ok(check_integrity(&sales, &logs))
    }

    // Reads

    pub async fn products(&self) -> Vec<Product> {
        self.state.read().await.products.values().cloned().collect()
    }

    pub async fn product(&self, id: &str) -> Option<Product> {
        self.state.read().await.products.get(id).cloned()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.read().await.users.values().cloned().collect()
    }

    pub async fn sales(&self) -> Vec<Sale> {
        self.state.read().await.sales.values().cloned().collect()
    }

    pub async fn sale(&self, id: &str) -> Option<Sale> {
        self.state.read().await.sales.get(id).cloned()
    }

    pub async fn settings(&self) -> BusinessSettings {
        self.state.read().await.settings()
    }

    pub async fn active_shift(&self) -> Option<Shift> {
        self.state.read().await.active_shift().cloned()
    }

    pub async fn void_requests(&self) -> Vec<VoidRequest> {
        self.state
            .read()
            .await
            .void_requests
            .values()
            .cloned()
            .collect()
    }

    pub async fn stock_change_requests(&self) -> Vec<StockChangeRequest> {
        self.state
            .read()
            .await
            .stock_change_requests
            .values()
            .cloned()
            .collect()
    }

    /// Audit entries, newest first.
    pub async fn audit_logs(&self) -> Vec<AuditLog> {
        let mut logs: Vec<AuditLog> = self
            .state
            .read()
            .await
            .audit_logs
            .values()
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs
    }

    async fn session_user(&self) -> Result<User> {
        self.state
            .read()
            .await
            .session
            .clone()
            .ok_or(Error::NotAuthenticated)
    }

    async fn require(&self, permission: &str) -> Result<User> {
        let user = self.session_user().await?;
        if user.has_permission(permission) {
            Ok(user)
        } else {
            Err(Error::PermissionDenied(permission.to_string()))
        }
    }

    /// Append an audit entry after a committed mutation. Failures are logged
    /// and never undo the mutation.
    async fn audit(
        &self,
        actor: Option<&User>,
        action: &str,
        entity_id: Option<&str>,
        details: impl Into<String>,
    ) {
        let entry = AuditLog::new(
            action,
            actor.map(|user| user.id.clone()),
            entity_id.map(str::to_string),
            details,
        );

        match self.write_audit(&entry).await {
            Ok(()) => self.state.write().await.upsert(entry),
            Err(error) => tracing::warn!("Failed to record audit entry {action}: {error}"),
        }
    }

    async fn write_audit(&self, entry: &AuditLog) -> Result<()> {
        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        let result = Outbox::new(&tx).save(entry).await;
        finish(tx, result).await
    }
}

fn validate_product_fields(name: &str, price: f64, cost_price: f64, stock: i64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("product name is required".to_string()));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(Error::InvalidInput("price must be zero or more".to_string()));
    }
    if !cost_price.is_finite() || cost_price < 0.0 {
        return Err(Error::InvalidInput(
            "cost price must be zero or more".to_string(),
        ));
    }
    if stock < 0 {
        return Err(Error::InvalidInput("stock must be zero or more".to_string()));
    }
    Ok(())
}

fn validate_product_draft(mut draft: ProductDraft) -> Result<ProductDraft> {
    validate_product_fields(&draft.name, draft.price, draft.cost_price, draft.stock)?;
    draft.name = draft.name.trim().to_string();
    draft.size = normalize_text_option(draft.size);
    draft.category = normalize_text_option(draft.category);
    Ok(draft)
}

fn validate_user_draft(mut draft: UserDraft) -> Result<UserDraft> {
    draft.name = draft.name.trim().to_string();
    draft.pin = draft.pin.trim().to_string();
    if draft.name.is_empty() {
        return Err(Error::InvalidInput("user name is required".to_string()));
    }
    if draft.pin.len() < 4 || !draft.pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidInput(
            "PIN must be at least 4 digits".to_string(),
        ));
    }
    Ok(draft)
}

fn validate_settings(mut settings: BusinessSettings) -> Result<BusinessSettings> {
    settings.id = BusinessSettings::ID.to_string();
    settings.business_name = settings.business_name.trim().to_string();
    settings.currency = settings.currency.trim().to_ascii_uppercase();
    settings.receipt_footer = normalize_text_option(settings.receipt_footer);

    if settings.business_name.is_empty() {
        return Err(Error::InvalidInput("business name is required".to_string()));
    }
    if settings.currency.len() != 3 || !settings.currency.chars().all(|c| c.is_ascii_alphabetic())
    {
        return Err(Error::InvalidInput(format!(
            "invalid currency code: {}",
            settings.currency
        )));
    }
    if !(0.0..=1.0).contains(&settings.tax_rate) {
        return Err(Error::InvalidInput(
            "tax rate must be between 0 and 1".to_string(),
        ));
    }
    Ok(settings)
}

fn required_reason(reason: &str) -> Result<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(Error::InvalidInput("a reason is required".to_string()));
    }
    Ok(reason.to_string())
}

/// Validate sale lines and merge repeated products into one line.
fn coalesce_lines(items: Vec<SaleLineInput>) -> Result<Vec<SaleLineInput>> {
    if items.is_empty() {
        return Err(Error::InvalidInput("a sale needs at least one item".to_string()));
    }

    let mut lines: Vec<SaleLineInput> = Vec::with_capacity(items.len());
    for mut item in items {
        item.product_id = item.product_id.trim().to_string();
        if item.product_id.is_empty() {
            return Err(Error::InvalidInput("sale line without product".to_string()));
        }
        if item.quantity <= 0 {
            return Err(Error::InvalidInput(format!(
                "quantity for {} must be positive",
                item.product_id
            )));
        }

        match lines
            .iter_mut()
            .find(|line| line.product_id == item.product_id)
        {
            Some(line) => {
                line.quantity = checked_quantity(line.quantity, item.quantity, &item.product_id)?;
            }
            None => lines.push(item),
        }
    }
    Ok(lines)
}

fn checked_quantity(current: i64, change: i64, product_id: &str) -> Result<i64> {
    current.checked_add(change).ok_or_else(|| {
        Error::InvalidInput(format!("quantity for {product_id} is out of range"))
    })
}

fn missing(kind: &str, id: &str) -> Error {
    Error::NotFound(format!("{kind} {id}"))
}

async fn update_product_in(
    conn: &Connection,
    mut product: Product,
    expected_version: u64,
) -> Result<Product> {
    let stored: Product = CollectionStore::new(conn)
        .get(&product.id)
        .await?
        .ok_or_else(|| missing("product", &product.id))?;

    let actual = stored.version.unwrap_or(0);
    if actual != expected_version {
        return Err(Error::VersionConflict {
            id: product.id,
            expected: expected_version,
            actual,
        });
    }

    product.name = product.name.trim().to_string();
    product.size = normalize_text_option(product.size);
    product.category = normalize_text_option(product.category);
    product.created_at = stored.created_at;
    product.version = stored.version;
    product.touch();

    Outbox::new(conn).save(&product).await?;
    Ok(product)
}

async fn delete_entity_in<T: Syncable>(conn: &Connection, id: &str, action: SyncAction) -> Result<T> {
    let stored: T = CollectionStore::new(conn)
        .get(id)
        .await?
        .ok_or_else(|| missing(T::COLLECTION.table_name(), id))?;
    Outbox::new(conn).remove::<T>(id, action).await?;
    Ok(stored)
}

async fn create_user_in(conn: &Connection, user: &User) -> Result<()> {
    let users: Vec<User> = CollectionStore::new(conn).get_all().await?;
    if users.iter().any(|existing| existing.pin == user.pin) {
        return Err(Error::InvalidInput("PIN already in use".to_string()));
    }
    Outbox::new(conn).save(user).await
}

async fn find_open_shift(conn: &Connection, user_id: &str) -> Result<Option<Shift>> {
    let shifts: Vec<Shift> = CollectionStore::new(conn).get_all().await?;
    Ok(shifts
        .into_iter()
        .find(|shift| shift.is_open() && shift.user_id == user_id))
}

async fn open_shift_in(conn: &Connection, shift: &Shift) -> Result<()> {
    if let Some(open) = find_open_shift(conn, &shift.user_id).await? {
        return Err(Error::InvalidState {
            id: open.id,
            expected: "CLOSED".to_string(),
            actual: "OPEN".to_string(),
        });
    }
    Outbox::new(conn).save(shift).await
}

async fn close_shift_in(conn: &Connection, user_id: &str, closing_cash: f64) -> Result<Shift> {
    let mut shift = find_open_shift(conn, user_id)
        .await?
        .ok_or_else(|| missing("open shift for user", user_id))?;

    shift.status = ShiftStatus::Closed;
    shift.closed_at = Some(now_iso());
    shift.closing_cash = Some(closing_cash);
    shift.touch();

    Outbox::new(conn).save(&shift).await?;
    Ok(shift)
}

async fn update_settings_in(
    conn: &Connection,
    mut settings: BusinessSettings,
) -> Result<BusinessSettings> {
    let stored: Option<BusinessSettings> = CollectionStore::new(conn)
        .get(BusinessSettings::ID)
        .await?;
    settings.version = stored.and_then(|stored| stored.version);
    settings.touch();

    Outbox::new(conn).save(&settings).await?;
    Ok(settings)
}

async fn record_sale_in(
    conn: &Connection,
    mut sale: Sale,
    lines: &[SaleLineInput],
) -> Result<SaleWrite> {
    let store = CollectionStore::new(conn);
    if let Some(existing) = store.get::<Sale>(&sale.id).await? {
        return Ok(SaleWrite::Replayed(existing));
    }

    // Every check runs before the first write.
    let mut products = Vec::with_capacity(lines.len());
    for line in lines {
        let mut product: Product = store
            .get(&line.product_id)
            .await?
            .ok_or_else(|| missing("product", &line.product_id))?;

        let cost = line.cost_at_sale.unwrap_or(product.cost_price);
        if !cost.is_finite() || cost <= 0.0 {
            return Err(Error::MissingCostPrice(product.id));
        }
        let price = line.price_at_sale.unwrap_or(product.price);
        if !price.is_finite() || price < 0.0 {
            return Err(Error::InvalidInput(format!(
                "invalid price for product {}",
                product.id
            )));
        }
        if product.stock < line.quantity {
            return Err(Error::InsufficientStock {
                product_id: product.id,
                available: product.stock,
                requested: line.quantity,
            });
        }

        product.stock -= line.quantity;
        product.touch();
        sale.items.push(SaleItem {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            size: product.size.clone(),
            quantity: line.quantity,
            price_at_sale: price,
            cost_at_sale: cost,
        });
        products.push(product);
    }

    sale.total_amount = sale.items.iter().map(SaleItem::line_total).sum();
    sale.total_cost = sale.items.iter().map(SaleItem::line_cost).sum();
    sale.touch();

    let outbox = Outbox::new(conn);
    for product in &products {
        outbox.save(product).await?;
    }
    outbox.save(&sale).await?;

    let mut logs: Vec<ProductSaleLog> = Vec::with_capacity(sale.items.len());
    for item in &sale.items {
        let mut log = ProductSaleLog::for_line(&sale, item);
        if logs.iter().any(|written| written.id == log.id)
            || store.get::<ProductSaleLog>(&log.id).await?.is_some()
        {
            tracing::debug!("Sale log {} already exists; skipping", log.id);
            continue;
        }
        log.touch();
        outbox.save(&log).await?;
        logs.push(log);
    }

    Ok(SaleWrite::Recorded {
        sale,
        products,
        logs,
    })
}

async fn request_void_in(conn: &Connection, request: &VoidRequest) -> Result<()> {
    let store = CollectionStore::new(conn);
    let sale: Sale = store
        .get(&request.sale_id)
        .await?
        .ok_or_else(|| missing("sale", &request.sale_id))?;
    if sale.is_voided() {
        return Err(Error::InvalidState {
            id: sale.id,
            expected: "COMPLETED".to_string(),
            actual: "VOIDED".to_string(),
        });
    }

    let requests: Vec<VoidRequest> = store.get_all().await?;
    if let Some(pending) = requests
        .into_iter()
        .find(|existing| existing.sale_id == sale.id && existing.status == RequestStatus::Pending)
    {
        return Err(Error::InvalidInput(format!(
            "void request {} is already pending for sale {}",
            pending.id, sale.id
        )));
    }

    Outbox::new(conn).save(request).await
}

fn ensure_pending(id: &str, status: RequestStatus) -> Result<()> {
    if status == RequestStatus::Pending {
        Ok(())
    } else {
        Err(Error::InvalidState {
            id: id.to_string(),
            expected: RequestStatus::Pending.to_string(),
            actual: status.to_string(),
        })
    }
}

fn resolution_status(approve: bool) -> RequestStatus {
    if approve {
        RequestStatus::Approved
    } else {
        RequestStatus::Rejected
    }
}

async fn resolve_void_in(
    conn: &Connection,
    id: &str,
    approve: bool,
    resolver_id: &str,
) -> Result<VoidResolution> {
    let store = CollectionStore::new(conn);
    let mut request: VoidRequest = store
        .get(id)
        .await?
        .ok_or_else(|| missing("void request", id))?;
    ensure_pending(&request.id, request.status)?;

    let outbox = Outbox::new(conn);
    let mut voided = None;
    let mut products = Vec::new();
    let mut removed_logs = Vec::new();

    if approve {
        let mut sale: Sale = store
            .get(&request.sale_id)
            .await?
            .ok_or_else(|| missing("sale", &request.sale_id))?;
        if sale.is_voided() {
            return Err(Error::InvalidState {
                id: sale.id,
                expected: "COMPLETED".to_string(),
                actual: "VOIDED".to_string(),
            });
        }

        // Restock products that still exist; deleted ones are skipped.
        let mut restocked: HashMap<String, Product> = HashMap::new();
        for item in &sale.items {
            if let Some(product) = restocked.get_mut(&item.product_id) {
                product.stock = checked_quantity(product.stock, item.quantity, &product.id)?;
                continue;
            }
            match store.get::<Product>(&item.product_id).await? {
                Some(mut product) => {
                    product.stock = checked_quantity(product.stock, item.quantity, &product.id)?;
                    restocked.insert(product.id.clone(), product);
                }
                None => tracing::debug!(
                    "Product {} no longer exists; not restocking",
                    item.product_id
                ),
            }
        }

        sale.status = SaleStatus::Voided;
        sale.voided_at = Some(now_iso());
        sale.touch();
        outbox.save(&sale).await?;

        for mut product in restocked.into_values() {
            product.touch();
            outbox.save(&product).await?;
            products.push(product);
        }

        let logs: Vec<ProductSaleLog> = store.get_all().await?;
        for log in logs.into_iter().filter(|log| log.sale_id == sale.id) {
            outbox
                .remove::<ProductSaleLog>(&log.id, SyncAction::DeleteProductSaleLog)
                .await?;
            removed_logs.push(log.id);
        }
        voided = Some(sale);
    }

    request.status = resolution_status(approve);
    request.resolved_by = Some(resolver_id.to_string());
    request.resolved_at = Some(now_iso());
    request.touch();
    outbox.save(&request).await?;

    Ok(VoidResolution {
        request,
        sale: voided,
        products,
        removed_logs,
    })
}

async fn request_stock_change_in(conn: &Connection, request: &StockChangeRequest) -> Result<()> {
    CollectionStore::new(conn)
        .get::<Product>(&request.product_id)
        .await?
        .ok_or_else(|| missing("product", &request.product_id))?;
    Outbox::new(conn).save(request).await
}

async fn resolve_stock_change_in(
    conn: &Connection,
    id: &str,
    approve: bool,
    resolver_id: &str,
) -> Result<(StockChangeRequest, Option<Product>)> {
    let store = CollectionStore::new(conn);
    let mut request: StockChangeRequest = store
        .get(id)
        .await?
        .ok_or_else(|| missing("stock change request", id))?;
    ensure_pending(&request.id, request.status)?;

    let product = if approve {
        let mut product: Product = store
            .get(&request.product_id)
            .await?
            .ok_or_else(|| missing("product", &request.product_id))?;
        let stock = checked_quantity(product.stock, request.quantity_change, &product.id)?;
        if stock < 0 {
            return Err(Error::InsufficientStock {
                product_id: product.id,
                available: product.stock,
                requested: request.quantity_change.saturating_neg(),
            });
        }
        product.stock = stock;
        product.touch();
        Some(product)
    } else {
        None
    };

    let outbox = Outbox::new(conn);
    if let Some(product) = &product {
        outbox.save(product).await?;
    }

    request.status = resolution_status(approve);
    request.resolved_by = Some(resolver_id.to_string());
    request.resolved_at = Some(now_iso());
    request.touch();
    outbox.save(&request).await?;

    Ok((request, product))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sale_in_flight_makes_second_sale_busy() {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let service = TillService::open(db).await.unwrap();

        let held = SaleGuard::acquire(&service.sale_lock).unwrap();
        let request = SaleRequest::new(vec![SaleLineInput {
            product_id: "P1".to_string(),
            quantity: 1,
            price_at_sale: None,
            cost_at_sale: None,
        }]);
        assert!(matches!(
            service.process_sale(request.clone()).await,
            Err(Error::Busy)
        ));

        drop(held);
        assert!(matches!(
            service.process_sale(request).await,
            Err(Error::NotAuthenticated)
        ));
    }

    #[test]
    fn test_coalesce_lines_rejects_bad_quantities() {
        let line = |quantity| SaleLineInput {
            product_id: "P1".to_string(),
            quantity,
            price_at_sale: None,
            cost_at_sale: None,
        };
        assert!(coalesce_lines(Vec::new()).is_err());
        assert!(coalesce_lines(vec![line(0)]).is_err());
        assert_eq!(coalesce_lines(vec![line(1), line(4)]).unwrap()[0].quantity, 5);
    }

    #[test]
    fn test_coalesce_lines_rejects_overflowing_total() {
        let line = |quantity| SaleLineInput {
            product_id: "P1".to_string(),
            quantity,
            price_at_sale: None,
            cost_at_sale: None,
        };
        assert!(matches!(
            coalesce_lines(vec![line(i64::MAX), line(1)]),
            Err(Error::InvalidInput(_))
        ));
    }
}
