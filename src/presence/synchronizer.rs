//! Room presence over the document store.
//!
//! Each client owns exactly one record per room at
//! `rooms/{room}/participants/{id}` and never touches anyone else's.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::record::{materialize_roster, ParticipantRecord, ParticipantUpdate};
use super::store::{CollectionPath, DocumentPath, DocumentStore, StoreError, WriteMode};
use crate::room::{ParticipantId, RoomId};

/// Handle for a roster subscription. Dropping it cancels delivery.
pub struct RosterSubscription {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RosterSubscription {
    /// Stop delivery. No callback starts after this returns.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

impl Drop for RosterSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct PresenceSynchronizer {
    store: Arc<dyn DocumentStore>,
    joined: Option<DocumentPath>,
}

impl PresenceSynchronizer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            joined: None,
        }
    }

    fn record_path(room: &RoomId, local_id: &ParticipantId) -> DocumentPath {
        CollectionPath::participants(room).doc(local_id.as_str())
    }

    pub fn joined_path(&self) -> Option<&DocumentPath> {
        self.joined.as_ref()
    }

    /// Write our record into `room`.
    ///
    /// The record counts as joined before the store confirms, so a later
    /// `leave` still cleans up after a failed write. Joining a different room
    /// removes the record left in the previous one first.
    pub async fn join(
        &mut self,
        room: &RoomId,
        local_id: &ParticipantId,
        record: &ParticipantRecord,
    ) -> Result<(), StoreError> {
        let path = Self::record_path(room, local_id);

        if let Some(previous) = self.joined.take() {
            if previous != path {
                info!("Room changed, removing stale record {}", previous);
                if let Err(e) = self.store.delete(&previous).await {
                    warn!("Failed to remove stale record {}: {}", previous, e);
                }
            }
        }

        let write = record.join_write()?;
        self.joined = Some(path.clone());
        self.store.set(&path, write, WriteMode::Overwrite).await?;
        info!("Joined room {} as {}", room, local_id);
        Ok(())
    }

    /// Deliver the full ordered roster of `room` to `on_change` on every change.
    ///
    /// The current roster is delivered first. Bursts may coalesce, so each
    /// delivery replaces whatever the consumer held before.
    pub fn subscribe<F>(&self, room: &RoomId, mut on_change: F) -> Result<RosterSubscription, StoreError>
    where
        F: FnMut(Vec<ParticipantRecord>) + Send + 'static,
    {
        let mut rx = self.store.watch(&CollectionPath::participants(room))?;
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let room = room.clone();

        let task = tokio::spawn(async move {
            loop {
                let docs = rx.borrow_and_update().clone();
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                on_change(materialize_roster(&docs));
                if rx.changed().await.is_err() {
                    debug!("Roster feed for {} closed", room);
                    break;
                }
            }
        });

        Ok(RosterSubscription { active, task })
    }

    /// Merge-write `update` into our own record. Ignored unless joined to `room`.
    pub async fn update_self(
        &self,
        room: &RoomId,
        local_id: &ParticipantId,
        update: &ParticipantUpdate,
    ) -> Result<(), StoreError> {
        let path = Self::record_path(room, local_id);
        if self.joined.as_ref() != Some(&path) {
            debug!("Not joined to {}, skipping presence update", room);
            return Ok(());
        }
        if update.is_empty() {
            return Ok(());
        }
        self.store
            .set(&path, update.merge_write()?, WriteMode::Merge)
            .await
    }

    /// Delete our record. Repeated calls, or calls for a room never joined,
    /// do nothing. A failed delete keeps the record tracked so it can be retried.
    pub async fn leave(&mut self, room: &RoomId, local_id: &ParticipantId) -> Result<(), StoreError> {
        let path = Self::record_path(room, local_id);
        if self.joined.as_ref() != Some(&path) {
            debug!("Not joined to {}, nothing to leave", room);
            return Ok(());
        }
        self.store.delete(&path).await?;
        self.joined = None;
        info!("Left room {}", room);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::memory::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn room() -> RoomId {
        RoomId::trusted("123-456-789")
    }

    fn record(id: &str) -> ParticipantRecord {
        ParticipantRecord::new(ParticipantId::new(id), None, "user1".to_string(), true)
    }

    async fn next_roster(rx: &mut mpsc::UnboundedReceiver<Vec<ParticipantRecord>>) -> Vec<ParticipantRecord> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("roster delivery timed out")
            .expect("roster channel closed")
    }

    #[tokio::test]
    async fn test_join_then_leave_removes_record() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let id = ParticipantId::new("user-1");

        sync.join(&room(), &id, &record("user-1")).await.unwrap();
        let path = CollectionPath::participants(&room()).doc("user-1");
        assert!(store.get(&path).unwrap()["joinedAt"].is_u64());

        sync.leave(&room(), &id).await.unwrap();
        assert!(store.get(&path).is_none());
    }

    #[tokio::test]
    async fn test_leave_is_idempotent_with_single_delete() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let id = ParticipantId::new("user-1");

        sync.leave(&room(), &id).await.unwrap();
        sync.join(&room(), &id, &record("user-1")).await.unwrap();
        for _ in 0..5 {
            sync.leave(&room(), &id).await.unwrap();
        }
        assert_eq!(store.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_rejoin_elsewhere_removes_old_record() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let id = ParticipantId::new("user-1");
        let other = RoomId::trusted("999-999-999");

        sync.join(&room(), &id, &record("user-1")).await.unwrap();
        sync.join(&other, &id, &record("user-1")).await.unwrap();

        assert!(store
            .get(&CollectionPath::participants(&room()).doc("user-1"))
            .is_none());
        assert!(store
            .get(&CollectionPath::participants(&other).doc("user-1"))
            .is_some());
    }

    #[tokio::test]
    async fn test_update_self_merges_without_touching_joined_at() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let id = ParticipantId::new("user-1");
        sync.join(&room(), &id, &record("user-1")).await.unwrap();
        let path = CollectionPath::participants(&room()).doc("user-1");
        let joined_at = store.get(&path).unwrap()["joinedAt"].clone();

        sync.update_self(&room(), &id, &ParticipantUpdate::muted(false))
            .await
            .unwrap();

        let doc = store.get(&path).unwrap();
        assert_eq!(doc["isMuted"], json!(false));
        assert_eq!(doc["joinedAt"], joined_at);
        assert_eq!(doc["displayName"], json!("Guest"));
    }

    #[tokio::test]
    async fn test_update_self_before_join_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let sync = PresenceSynchronizer::new(store.clone());
        sync.update_self(&room(), &ParticipantId::new("user-1"), &ParticipantUpdate::muted(true))
            .await
            .unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_delivers_full_roster() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = sync
            .subscribe(&room(), move |roster| {
                let _ = tx.send(roster);
            })
            .unwrap();

        assert!(next_roster(&mut rx).await.is_empty());
        sync.join(&room(), &ParticipantId::new("user-1"), &record("user-1"))
            .await
            .unwrap();
        let roster = next_roster(&mut rx).await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id.as_str(), "user-1");
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_delivery_but_keeps_record() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = sync
            .subscribe(&room(), move |roster| {
                let _ = tx.send(roster);
            })
            .unwrap();
        next_roster(&mut rx).await;

        sub.cancel();
        assert!(!sub.is_active());
        let id = ParticipantId::new("user-1");
        sync.join(&room(), &id, &record("user-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        drop(sub);

        assert!(store
            .get(&CollectionPath::participants(&room()).doc("user-1"))
            .is_some());
    }

    #[tokio::test]
    async fn test_failed_join_still_allows_leave() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let id = ParticipantId::new("user-1");

        store.set_online(false);
        assert!(sync.join(&room(), &id, &record("user-1")).await.is_err());
        store.set_online(true);

        sync.leave(&room(), &id).await.unwrap();
        assert_eq!(store.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_leave_can_be_retried() {
        let store = Arc::new(MemoryStore::new());
        let mut sync = PresenceSynchronizer::new(store.clone());
        let id = ParticipantId::new("user-1");
        let path = CollectionPath::participants(&room()).doc("user-1");
        sync.join(&room(), &id, &record("user-1")).await.unwrap();
        assert_eq!(sync.joined_path(), Some(&path));

        store.set_online(false);
        assert!(sync.leave(&room(), &id).await.is_err());
        assert_eq!(sync.joined_path(), Some(&path));
        store.set_online(true);

        sync.leave(&room(), &id).await.unwrap();
        assert!(store.get(&path).is_none());
        assert!(sync.joined_path().is_none());

        sync.leave(&room(), &id).await.unwrap();
        assert_eq!(store.delete_count(), 1);
    }
}
