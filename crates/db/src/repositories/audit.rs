use sqlx::Row;

use stagegate_core::audit::{AuditAction, AuditLogEntry};
use stagegate_core::domain::user::UserId;
use stagegate_core::domain::EntityKind;

use super::{parse_timestamp, AuditLogRepository, RepositoryError};
use crate::DbPool;

const SELECT_ENTRY: &str =
    "SELECT entry_id, entity_kind, entity_id, seq, action, actor_id, content_hash, prev_hash,
            entry_hash, signature, occurred_at
     FROM audit_log";

pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditLogEntry, RepositoryError> {
    let entry_id: String =
        row.try_get("entry_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entity_kind_str: String =
        row.try_get("entity_kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entity_id: String =
        row.try_get("entity_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let seq: i64 = row.try_get("seq").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action: String =
        row.try_get("action").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let actor_id: String =
        row.try_get("actor_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let content_hash: String =
        row.try_get("content_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let prev_hash: Option<String> =
        row.try_get("prev_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entry_hash: String =
        row.try_get("entry_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let signature: String =
        row.try_get("signature").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at: String =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let entity_kind = EntityKind::parse(&entity_kind_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown entity kind: {entity_kind_str}"))
    })?;
    let seq = u32::try_from(seq)
        .map_err(|_| RepositoryError::Decode(format!("sequence out of range: {seq}")))?;

    Ok(AuditLogEntry {
        entry_id,
        entity_kind,
        entity_id,
        seq,
        action: AuditAction::parse(&action),
        actor_id: UserId(actor_id),
        content_hash,
        prev_hash,
        entry_hash,
        signature,
        occurred_at: parse_timestamp("occurred_at", &occurred_at)?,
    })
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        // Append only. The unique (entity_kind, entity_id, seq) index makes a
        // duplicate sequence number fail instead of silently forking a chain.
        sqlx::query(
            "INSERT INTO audit_log (entry_id, entity_kind, entity_id, seq, action, actor_id,
                                    content_hash, prev_hash, entry_hash, signature, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entry_id)
        .bind(entry.entity_kind.as_str())
        .bind(&entry.entity_id)
        .bind(i64::from(entry.seq))
        .bind(entry.action.as_key())
        .bind(&entry.actor_id.0)
        .bind(&entry.content_hash)
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .bind(&entry.signature)
        .bind(entry.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_for_entity(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<AuditLogEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_ENTRY} WHERE entity_kind = ? AND entity_id = ? ORDER BY seq DESC LIMIT 1"
        ))
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_entry(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_entity(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_ENTRY} WHERE entity_kind = ? AND entity_id = ? ORDER BY seq ASC"
        ))
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()
    }
}
