//! Room presence: who is in a room, synchronized through a document store.

pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;
pub mod synchronizer;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use record::{
    materialize_roster, pick_avatar, ParticipantRecord, ParticipantUpdate, AVATAR_CATALOG,
    DEFAULT_DISPLAY_NAME,
};
pub use store::{
    CollectionPath, Document, DocumentPath, DocumentStore, DocumentWrite, StoreError, WriteMode,
};
pub use synchronizer::{PresenceSynchronizer, RosterSubscription};
