//! Merge conflict log

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::{ConflictWinner, SyncConflict};

pub struct ConflictRepository<'a> {
    conn: &'a Connection,
}

fn version_param(version: Option<u64>) -> Option<i64> {
    version.and_then(|value| i64::try_from(value).ok())
}

impl<'a> ConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, conflict: &SyncConflict) -> Result<i64> {
        let discarded = serde_json::to_string(&conflict.discarded_payload)?;
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    collection, entity_id, winner, local_version, remote_version,
                    discarded_payload, resolved_at, strategy
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    conflict.collection.as_str(),
                    conflict.entity_id.as_str(),
                    conflict.winner.as_str(),
                    version_param(conflict.local_version),
                    version_param(conflict.remote_version),
                    discarded,
                    conflict.resolved_at,
                    conflict.strategy.as_str()
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent conflicts first.
    pub async fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, collection, entity_id, winner, local_version, remote_version,
                        discarded_payload, resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                [limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    pub async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, collection, entity_id, winner, local_version, remote_version,
                        discarded_payload, resolved_at, strategy
                 FROM sync_conflicts
                 WHERE entity_id = ?
                 ORDER BY resolved_at DESC, id DESC",
                [entity_id],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    fn parse_conflict(row: &Row) -> Result<SyncConflict> {
        let winner: String = row.get(3)?;
        let discarded: String = row.get(6)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            collection: row.get(1)?,
            entity_id: row.get(2)?,
            winner: ConflictWinner::parse(&winner),
            local_version: row
                .get::<Option<i64>>(4)?
                .and_then(|v| u64::try_from(v).ok()),
            remote_version: row
                .get::<Option<i64>>(5)?
                .and_then(|v| u64::try_from(v).ok()),
            discarded_payload: serde_json::from_str(&discarded)?,
            resolved_at: row.get(7)?,
            strategy: row.get(8)?,
        })
    }
}
