//! In-process document store.
//!
//! Stamps server-timestamp fields from a monotonic counter. With deferred
//! timestamps the fields stay `null` until `resolve_pending_timestamps` runs,
//! which mimics a write observed locally before the server acknowledged it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

use super::store::{
    CollectionPath, Document, DocumentPath, DocumentStore, DocumentWrite, Fields, StoreError,
    WriteMode,
};

struct Collection {
    docs: BTreeMap<String, Fields>,
    tx: watch::Sender<Vec<Document>>,
}

impl Collection {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            docs: BTreeMap::new(),
            tx,
        }
    }

    fn publish(&self) {
        let snapshot = self
            .docs
            .iter()
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();
        self.tx.send_replace(snapshot);
    }
}

#[derive(Default)]
struct Inner {
    collections: HashMap<CollectionPath, Collection>,
    pending: Vec<(DocumentPath, String)>,
}

impl Inner {
    fn collection(&mut self, path: &CollectionPath) -> &mut Collection {
        self.collections
            .entry(path.clone())
            .or_insert_with(Collection::new)
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: AtomicU64,
    defer_timestamps: bool,
    online: AtomicBool,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock: AtomicU64::new(0),
            defer_timestamps: false,
            online: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Leave server timestamps unresolved until `resolve_pending_timestamps`.
    pub fn with_deferred_timestamps() -> Self {
        Self {
            defer_timestamps: true,
            ..Self::new()
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of write calls that reached the store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of delete calls that reached the store.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn get(&self, path: &DocumentPath) -> Option<Fields> {
        let inner = self.lock().ok()?;
        inner
            .collections
            .get(path.collection())
            .and_then(|c| c.docs.get(path.id()).cloned())
    }

    /// Stamp every pending server-timestamp field in write order and notify.
    pub fn resolve_pending_timestamps(&self) -> usize {
        let Ok(mut inner) = self.lock() else {
            return 0;
        };
        let pending = std::mem::take(&mut inner.pending);
        let mut touched: Vec<CollectionPath> = Vec::new();
        let mut resolved = 0;

        for (path, field) in pending {
            let stamp = self.tick();
            let collection = inner.collection(path.collection());
            if let Some(doc) = collection.docs.get_mut(path.id()) {
                if doc.get(&field).map_or(true, Value::is_null) {
                    doc.insert(field, Value::from(stamp));
                    resolved += 1;
                    if !touched.contains(path.collection()) {
                        touched.push(path.collection().clone());
                    }
                }
            }
        }

        for path in touched {
            inner.collection(&path).publish();
        }
        debug!("Resolved {} pending server timestamp(s)", resolved);
        resolved
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store state poisoned".to_string()))
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store offline".to_string()))
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn set(
        &self,
        path: &DocumentPath,
        write: DocumentWrite,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.lock()?;
        let mut fields = write.fields;
        for field in &write.server_timestamps {
            if self.defer_timestamps {
                fields.insert(field.clone(), Value::Null);
            } else {
                fields.insert(field.clone(), Value::from(self.tick()));
            }
        }
        if self.defer_timestamps {
            for field in write.server_timestamps {
                inner.pending.push((path.clone(), field));
            }
        }

        let collection = inner.collection(path.collection());
        match mode {
            WriteMode::Overwrite => {
                collection.docs.insert(path.id().to_string(), fields);
            }
            WriteMode::Merge => {
                let doc = collection.docs.entry(path.id().to_string()).or_default();
                doc.extend(fields);
            }
        }
        collection.publish();
        debug!("Stored {} ({:?})", path, mode);
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.lock()?;
        let collection = inner.collection(path.collection());
        if collection.docs.remove(path.id()).is_some() {
            collection.publish();
            debug!("Deleted {}", path);
        }
        Ok(())
    }

    fn watch(
        &self,
        collection: &CollectionPath,
    ) -> Result<watch::Receiver<Vec<Document>>, StoreError> {
        self.ensure_online()?;
        let mut inner = self.lock()?;
        Ok(inner.collection(collection).tx.subscribe())
    }
}
