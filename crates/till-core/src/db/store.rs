//! Collection store: JSON documents keyed by id, one table per collection.

use libsql::Connection;

use crate::error::Result;
use crate::models::{Collection, Syncable};

/// Object-store style access to the entity collections.
///
/// Borrowing a `Connection` lets the same store run inside an open
/// transaction (`&Transaction` derefs to `&Connection`).
pub struct CollectionStore<'a> {
    conn: &'a Connection,
}

impl<'a> CollectionStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Fetch one entity by id.
    pub async fn get<T: Syncable>(&self, id: &str) -> Result<Option<T>> {
        let sql = format!(
            "SELECT body FROM {} WHERE id = ?",
            T::COLLECTION.table_name()
        );
        let mut rows = self.conn.query(&sql, [id]).await?;

        if let Some(row) = rows.next().await? {
            let body: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&body)?))
        } else {
            Ok(None)
        }
    }

    /// Insert or replace an entity snapshot.
    pub async fn put<T: Syncable>(&self, entity: &T) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, body) VALUES (?, ?)",
            T::COLLECTION.table_name()
        );
        let body = serde_json::to_string(entity)?;
        self.conn.execute(&sql, [entity.id(), body.as_str()]).await?;
        Ok(())
    }

    /// Delete by id. Returns whether a row was removed.
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.table_name());
        let removed = self.conn.execute(&sql, [id]).await?;
        Ok(removed > 0)
    }

    /// Every entity of a collection, ordered by id.
    pub async fn get_all<T: Syncable>(&self) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT body FROM {} ORDER BY id",
            T::COLLECTION.table_name()
        );
        let mut rows = self.conn.query(&sql, ()).await?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            let body: String = row.get(0)?;
            entities.push(serde_json::from_str(&body)?);
        }
        Ok(entities)
    }

    /// Every id of a collection, ordered.
    pub async fn get_all_keys(&self, collection: Collection) -> Result<Vec<String>> {
        let sql = format!("SELECT id FROM {} ORDER BY id", collection.table_name());
        let mut rows = self.conn.query(&sql, ()).await?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get::<String>(0)?);
        }
        Ok(keys)
    }

    pub async fn count(&self, collection: Collection) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table_name());
        let mut rows = self.conn.query(&sql, ()).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Product, ProductDraft, Versioned};

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn product(name: &str) -> Product {
        let mut product = Product::from_draft(ProductDraft {
            name: name.to_string(),
            size: None,
            price: 4.0,
            cost_price: 2.0,
            stock: 10,
            category: None,
        });
        product.touch();
        product
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get() {
        let db = setup().await;
        let store = CollectionStore::new(db.connection());

        let tea = product("Tea");
        store.put(&tea).await.unwrap();

        let fetched: Product = store.get(&tea.id).await.unwrap().unwrap();
        assert_eq!(fetched, tea);
        assert!(store.get::<Product>("missing").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_replaces_existing() {
        let db = setup().await;
        let store = CollectionStore::new(db.connection());

        let mut tea = product("Tea");
        store.put(&tea).await.unwrap();
        tea.stock = 3;
        tea.touch();
        store.put(&tea).await.unwrap();

        let all: Vec<Product> = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stock, 3);
        assert_eq!(all[0].version, Some(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_and_keys() {
        let db = setup().await;
        let store = CollectionStore::new(db.connection());

        let tea = product("Tea");
        let coffee = product("Coffee");
        store.put(&tea).await.unwrap();
        store.put(&coffee).await.unwrap();

        let mut expected = vec![tea.id.clone(), coffee.id.clone()];
        expected.sort();
        assert_eq!(
            store.get_all_keys(Collection::Products).await.unwrap(),
            expected
        );

        assert!(store.delete(Collection::Products, &tea.id).await.unwrap());
        assert!(!store.delete(Collection::Products, &tea.id).await.unwrap());
        assert_eq!(store.count(Collection::Products).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rolled_back_transaction_leaves_no_trace() {
        let db = setup().await;
        let tea = product("Tea");

        let tx = db.connection().transaction().await.unwrap();
        CollectionStore::new(&tx).put(&tea).await.unwrap();
        tx.rollback().await.unwrap();

        let store = CollectionStore::new(db.connection());
        assert_eq!(store.count(Collection::Products).await.unwrap(), 0);
    }
}
