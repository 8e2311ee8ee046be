use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use stagegate_core::audit::{AuditAction, AuditChain};
use stagegate_core::domain::user::UserId;
use stagegate_core::domain::EntityKind;
use stagegate_db::repositories::AuditLogRepository;

/// Appends hash-chained audit entries for lifecycle events. Recording is
/// deliberately infallible from the caller's perspective: a committed
/// decision must never be rolled back because the audit write failed, so
/// failures are logged and swallowed here.
#[derive(Clone)]
pub struct AuditRecorder {
    repository: Arc<dyn AuditLogRepository>,
    chain: AuditChain,
}

impl AuditRecorder {
    pub fn new(repository: Arc<dyn AuditLogRepository>, chain: AuditChain) -> Self {
        Self { repository, chain }
    }

    pub async fn record<T: Serialize + Sync>(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        action: AuditAction,
        actor_id: &UserId,
        snapshot: &T,
    ) {
        let prev = match self.repository.latest_for_entity(entity_kind, entity_id).await {
            Ok(prev) => prev,
            Err(error) => {
                warn!(
                    event_name = "audit.chain_lookup_failed",
                    entity_kind = entity_kind.as_str(),
                    entity_id,
                    error = %error,
                    "could not load chain head, skipping audit entry"
                );
                return;
            }
        };

        let entry = self.chain.entry(
            prev.as_ref(),
            entity_kind,
            entity_id,
            action,
            actor_id.clone(),
            snapshot,
            Utc::now(),
        );

        if let Err(error) = self.repository.append(&entry).await {
            warn!(
                event_name = "audit.append_failed",
                entity_kind = entity_kind.as_str(),
                entity_id,
                seq = entry.seq,
                error = %error,
                "audit entry was not persisted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stagegate_core::audit::{AuditAction, AuditChain};
    use stagegate_core::domain::user::UserId;
    use stagegate_core::domain::EntityKind;
    use stagegate_db::repositories::{AuditLogRepository, InMemoryStore};

    use super::AuditRecorder;

    #[tokio::test]
    async fn consecutive_records_extend_a_verifiable_chain() {
        let store = InMemoryStore::new();
        let chain = AuditChain::new("test-signing-key");
        let recorder = AuditRecorder::new(Arc::new(store.clone()), chain.clone());
        let actor = UserId("pm-ana".to_string());

        recorder
            .record(EntityKind::Approval, "APR-001", AuditAction::Create, &actor, &"pending")
            .await;
        recorder
            .record(EntityKind::Approval, "APR-001", AuditAction::Approve, &actor, &"approved")
            .await;

        let entries = store
            .list_for_entity(EntityKind::Approval, "APR-001")
            .await
            .expect("list entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert_eq!(entries[1].prev_hash, Some(entries[0].entry_hash.clone()));

        let verification = chain.verify(EntityKind::Approval, "APR-001", &entries);
        assert!(verification.valid);
    }

    #[tokio::test]
    async fn chains_are_scoped_per_entity() {
        let store = InMemoryStore::new();
        let recorder =
            AuditRecorder::new(Arc::new(store.clone()), AuditChain::new("test-signing-key"));
        let actor = UserId("pm-ana".to_string());

        recorder
            .record(EntityKind::Approval, "APR-001", AuditAction::Create, &actor, &"a")
            .await;
        recorder
            .record(EntityKind::StageTransition, "TRN-001", AuditAction::Create, &actor, &"b")
            .await;

        let transition_entries = store
            .list_for_entity(EntityKind::StageTransition, "TRN-001")
            .await
            .expect("list entries");
        assert_eq!(transition_entries.len(), 1);
        assert_eq!(transition_entries[0].seq, 1);
        assert_eq!(transition_entries[0].prev_hash, None);
    }
}
