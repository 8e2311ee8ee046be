use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::user::UserId;
use crate::domain::EntityKind;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Approve,
    Reject,
    PhaseAdvance,
    PhaseRollback,
    Custom(String),
}

impl AuditAction {
    pub fn as_key(&self) -> String {
        match self {
            Self::Create => "create".to_string(),
            Self::Approve => "approve".to_string(),
            Self::Reject => "reject".to_string(),
            Self::PhaseAdvance => "phase_advance".to_string(),
            Self::PhaseRollback => "phase_rollback".to_string(),
            Self::Custom(value) => value.to_ascii_lowercase(),
        }
    }

    /// Inverse of [`AuditAction::as_key`]. Unknown keys round-trip as `Custom`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Self::Create,
            "approve" => Self::Approve,
            "reject" => Self::Reject,
            "phase_advance" => Self::PhaseAdvance,
            "phase_rollback" => Self::PhaseRollback,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// One append-only audit record. Entries for the same entity form a hash
/// chain: each carries the previous entry's hash, a hash over its own
/// material and an HMAC signature, so after-the-fact edits are detectable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub entry_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub seq: u32,
    pub action: AuditAction,
    pub actor_id: UserId,
    pub content_hash: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub signature: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Builds and verifies audit chains. Unlike the entries themselves this
/// holds no state; storage keeps the chain, this only computes hashes over
/// it with the configured signing key.
#[derive(Clone, Debug)]
pub struct AuditChain {
    signing_key: Vec<u8>,
}

impl AuditChain {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec() }
    }

    /// Produces the next entry after `prev` for the given entity. The
    /// caller supplies the entity snapshot so the content hash covers the
    /// state the action produced.
    pub fn entry<T: Serialize>(
        &self,
        prev: Option<&AuditLogEntry>,
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        action: AuditAction,
        actor_id: UserId,
        snapshot: &T,
        occurred_at: DateTime<Utc>,
    ) -> AuditLogEntry {
        let entity_id = entity_id.into();
        let seq = prev.map(|entry| entry.seq.saturating_add(1)).unwrap_or(1);
        let prev_hash = prev.map(|entry| entry.entry_hash.clone());
        let content_hash = content_hash(&entity_id, snapshot);
        let entry_hash = hash_entry_material(
            entity_kind,
            &entity_id,
            seq,
            &content_hash,
            prev_hash.as_deref(),
            occurred_at,
            &actor_id,
            &action,
        );
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        AuditLogEntry {
            entry_id: Uuid::new_v4().to_string(),
            entity_kind,
            entity_id,
            seq,
            action,
            actor_id,
            content_hash,
            prev_hash,
            entry_hash,
            signature,
            occurred_at,
        }
    }

    /// Walks `entries` in order and checks sequence numbers, hash links,
    /// recomputed entry hashes and signatures.
    pub fn verify(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        entries: &[AuditLogEntry],
    ) -> ChainVerification {
        if entries.is_empty() {
            return ChainVerification {
                entity_kind,
                entity_id: entity_id.to_string(),
                valid: false,
                verified_entries: 0,
                latest_hash: None,
                failure_reason: Some("no audit entries found for entity".to_string()),
            };
        }

        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let expected_seq = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.seq != expected_seq {
                return self.failure(
                    entity_kind,
                    entity_id,
                    index,
                    previous_hash,
                    format!(
                        "sequence mismatch at entry {}: expected {}, found {}",
                        entry.entry_id, expected_seq, entry.seq
                    ),
                );
            }

            if entry.prev_hash != previous_hash {
                return self.failure(
                    entity_kind,
                    entity_id,
                    index,
                    previous_hash,
                    format!("previous hash mismatch at entry {}", entry.entry_id),
                );
            }

            let computed = hash_entry_material(
                entry.entity_kind,
                &entry.entity_id,
                entry.seq,
                &entry.content_hash,
                entry.prev_hash.as_deref(),
                entry.occurred_at,
                &entry.actor_id,
                &entry.action,
            );
            if computed != entry.entry_hash {
                return self.failure(
                    entity_kind,
                    entity_id,
                    index,
                    previous_hash,
                    format!("entry hash mismatch at entry {}", entry.entry_id),
                );
            }

            let expected_signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
            if expected_signature != entry.signature {
                return self.failure(
                    entity_kind,
                    entity_id,
                    index,
                    previous_hash,
                    format!("signature mismatch at entry {}", entry.entry_id),
                );
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        ChainVerification {
            entity_kind,
            entity_id: entity_id.to_string(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }

    fn failure(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        verified: usize,
        latest_hash: Option<String>,
        reason: String,
    ) -> ChainVerification {
        ChainVerification {
            entity_kind,
            entity_id: entity_id.to_string(),
            valid: false,
            verified_entries: verified,
            latest_hash,
            failure_reason: Some(reason),
        }
    }
}

fn content_hash<T: Serialize>(entity_id: &str, snapshot: &T) -> String {
    let canonical_payload = match serde_json::to_vec(snapshot) {
        Ok(payload) => payload,
        Err(_) => entity_id.as_bytes().to_vec(),
    };
    sha256_hex(&canonical_payload)
}

#[allow(clippy::too_many_arguments)]
fn hash_entry_material(
    entity_kind: EntityKind,
    entity_id: &str,
    seq: u32,
    content_hash: &str,
    prev_hash: Option<&str>,
    occurred_at: DateTime<Utc>,
    actor_id: &UserId,
    action: &AuditAction,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        entity_kind.as_str(),
        entity_id,
        seq,
        content_hash,
        prev_hash.unwrap_or(""),
        occurred_at.to_rfc3339(),
        actor_id.as_str(),
        action.as_key(),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
