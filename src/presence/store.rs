//! Abstract document store with change notifications.
//!
//! Documents live in collections addressed by slash-separated paths. Writes
//! may ask the store to stamp fields with its own monotonic write timestamp.
//! A collection watch yields full snapshots, and rapid changes may coalesce.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

use crate::room::RoomId;

pub type Fields = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document store unavailable: {0}")]
    Unavailable(String),
    #[error("Document serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// `rooms/{room}/participants`
    pub fn participants(room: &RoomId) -> Self {
        Self(format!("rooms/{}/participants", room))
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// Field values to write plus the names of fields the store must stamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    pub fields: Fields,
    pub server_timestamps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole document.
    Overwrite,
    /// Update only the given fields, creating the document if absent.
    Merge,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn set(
        &self,
        path: &DocumentPath,
        write: DocumentWrite,
        mode: WriteMode,
    ) -> Result<(), StoreError>;

    /// Deleting a missing document is not an error.
    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError>;

    /// Watch a collection. The receiver always holds the latest full snapshot.
    fn watch(&self, collection: &CollectionPath)
        -> Result<watch::Receiver<Vec<Document>>, StoreError>;
}
