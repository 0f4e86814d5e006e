//! Participant records and roster materialization.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::store::{Document, DocumentWrite, StoreError};
use crate::room::ParticipantId;

pub const JOINED_AT_FIELD: &str = "joinedAt";
pub const DEFAULT_DISPLAY_NAME: &str = "Guest";

/// Static avatar asset ids a participant may be assigned at join time.
pub const AVATAR_CATALOG: &[&str] = &["user1", "user2", "user3", "user4", "user5", "user6"];

pub fn pick_avatar<R: Rng + ?Sized>(rng: &mut R) -> String {
    AVATAR_CATALOG
        .choose(rng)
        .copied()
        .unwrap_or(AVATAR_CATALOG[0])
        .to_string()
}

/// Presence entry for one client in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub display_name: String,
    pub avatar_ref: String,
    pub is_muted: bool,
    /// Reserved; nothing computes it yet.
    #[serde(default)]
    pub is_speaking: bool,
    /// Store-assigned write stamp. `None` until the store resolves it.
    #[serde(default)]
    pub joined_at: Option<u64>,
}

impl ParticipantRecord {
    pub fn new(
        id: ParticipantId,
        display_name: Option<String>,
        avatar_ref: String,
        is_muted: bool,
    ) -> Self {
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        Self {
            id,
            display_name,
            avatar_ref,
            is_muted,
            is_speaking: false,
            joined_at: None,
        }
    }

    /// Full-document write for joining; `joinedAt` is stamped by the store.
    pub fn join_write(&self) -> Result<DocumentWrite, StoreError> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Serialization(format!(
                    "participant record serialized to {other}"
                )))
            }
        };
        fields.remove(JOINED_AT_FIELD);
        Ok(DocumentWrite {
            fields,
            server_timestamps: vec![JOINED_AT_FIELD.to_string()],
        })
    }

    fn sort_key(&self) -> (u64, &ParticipantId) {
        (self.joined_at.unwrap_or(0), &self.id)
    }
}

/// Fields a client may change on its own record after joining.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_speaking: Option<bool>,
}

impl ParticipantUpdate {
    pub fn muted(is_muted: bool) -> Self {
        Self {
            is_muted: Some(is_muted),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.is_muted.is_none() && self.is_speaking.is_none()
    }

    pub fn merge_write(&self) -> Result<DocumentWrite, StoreError> {
        match serde_json::to_value(self)? {
            Value::Object(fields) => Ok(DocumentWrite {
                fields,
                server_timestamps: Vec::new(),
            }),
            other => Err(StoreError::Serialization(format!(
                "participant update serialized to {other}"
            ))),
        }
    }
}

/// Decode a collection snapshot into the ordered roster.
///
/// Order is ascending `joinedAt`, unresolved stamps counting as 0, with the
/// participant id as tie-breaker so every client converges on the same order.
pub fn materialize_roster(docs: &[Document]) -> Vec<ParticipantRecord> {
    let mut roster: Vec<ParticipantRecord> = docs
        .iter()
        .filter_map(|doc| {
            match serde_json::from_value::<ParticipantRecord>(Value::Object(doc.fields.clone())) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed participant record {}: {}", doc.id, e);
                    None
                }
            }
        })
        .collect();
    roster.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    roster
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn record(id: &str, joined_at: Option<u64>) -> ParticipantRecord {
        ParticipantRecord {
            joined_at,
            ..ParticipantRecord::new(ParticipantId::new(id), None, "user1".to_string(), true)
        }
    }

    fn doc(record: &ParticipantRecord) -> Document {
        Document {
            id: record.id.to_string(),
            fields: serde_json::to_value(record)
                .unwrap()
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn test_record_serializes_with_camel_case_fields() {
        let value = serde_json::to_value(record("user-1", Some(3))).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "user-1",
                "displayName": "Guest",
                "avatarRef": "user1",
                "isMuted": true,
                "isSpeaking": false,
                "joinedAt": 3
            })
        );
    }

    #[test]
    fn test_join_write_leaves_joined_at_to_store() {
        let write = record("user-1", Some(9)).join_write().unwrap();
        assert!(!write.fields.contains_key(JOINED_AT_FIELD));
        assert_eq!(write.server_timestamps, vec![JOINED_AT_FIELD.to_string()]);
    }

    #[test]
    fn test_update_only_carries_set_fields() {
        let write = ParticipantUpdate::muted(false).merge_write().unwrap();
        assert_eq!(write.fields.len(), 1);
        assert_eq!(write.fields["isMuted"], json!(false));
        assert!(ParticipantUpdate::default().is_empty());
    }

    #[test]
    fn test_roster_orders_by_joined_at_for_any_arrival_order() {
        let records: Vec<ParticipantRecord> = (1..=6)
            .map(|i| record(&format!("user-{}", 100 - i), Some(i * 10)))
            .collect();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let mut docs: Vec<Document> = records.iter().map(doc).collect();
            docs.shuffle(&mut rng);
            assert_eq!(materialize_roster(&docs), records);
        }
    }

    #[test]
    fn test_unresolved_timestamp_sorts_first() {
        let docs = vec![doc(&record("user-a", Some(5))), doc(&record("user-b", None))];
        let roster = materialize_roster(&docs);
        assert_eq!(roster[0].id.as_str(), "user-b");
        assert_eq!(roster[1].id.as_str(), "user-a");
    }

    #[test]
    fn test_malformed_documents_are_skipped() {
        let docs = vec![
            Document {
                id: "junk".to_string(),
                fields: json!({"foo": 1}).as_object().cloned().unwrap(),
            },
            doc(&record("user-a", Some(1))),
        ];
        assert_eq!(materialize_roster(&docs).len(), 1);
    }

    #[test]
    fn test_pick_avatar_comes_from_catalog() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            assert!(AVATAR_CATALOG.contains(&pick_avatar(&mut rng).as_str()));
        }
    }
}
