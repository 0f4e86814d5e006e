//! Document store in a SQLite file shared by every client on the machine.
//!
//! Each process opens the same database. Server timestamps come from a
//! counter row bumped inside the write transaction, so they are ordered
//! across processes. Watches poll the collection and publish only when the
//! snapshot actually changed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::store::{
    CollectionPath, Document, DocumentPath, DocumentStore, DocumentWrite, Fields, StoreError,
    WriteMode,
};

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteStore {
    pub fn open(db_path: &Path, poll_interval: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create presence directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open presence database")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        migrate(&conn)?;

        info!("Presence database at {:?}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    /// Run `f` on the connection off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("presence connection poisoned".to_string()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            fields TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )",
        [],
    )
    .context("Failed to create documents table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS write_clock (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            value INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create write_clock table")?;

    conn.execute(
        "INSERT OR IGNORE INTO write_clock (id, value) VALUES (0, 0)",
        [],
    )
    .context("Failed to seed write_clock")?;

    Ok(())
}

fn next_stamp(conn: &Connection) -> Result<u64, StoreError> {
    conn.execute("UPDATE write_clock SET value = value + 1 WHERE id = 0", [])?;
    let value: i64 = conn.query_row("SELECT value FROM write_clock WHERE id = 0", [], |row| {
        row.get(0)
    })?;
    Ok(value as u64)
}

fn load_collection(conn: &Connection, collection: &str) -> Result<Vec<Document>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, fields FROM documents WHERE collection = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut docs = Vec::with_capacity(rows.len());
    for (id, raw) in rows {
        match serde_json::from_str::<Fields>(&raw) {
            Ok(fields) => docs.push(Document { id, fields }),
            Err(e) => warn!("Skipping unreadable document {}/{}: {}", collection, id, e),
        }
    }
    Ok(docs)
}

fn write_document(
    conn: &mut Connection,
    collection: &str,
    id: &str,
    write: DocumentWrite,
    mode: WriteMode,
) -> Result<(), StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut fields = match mode {
        WriteMode::Overwrite => Fields::new(),
        WriteMode::Merge => {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Fields::new(),
            }
        }
    };
    fields.extend(write.fields);
    for field in write.server_timestamps {
        fields.insert(field, Value::from(next_stamp(&tx)?));
    }

    tx.execute(
        "INSERT OR REPLACE INTO documents (collection, id, fields) VALUES (?1, ?2, ?3)",
        params![collection, id, serde_json::to_string(&fields)?],
    )?;
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn set(
        &self,
        path: &DocumentPath,
        write: DocumentWrite,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let collection = path.collection().as_str().to_string();
        let id = path.id().to_string();
        self.with_conn(move |conn| write_document(conn, &collection, &id, write, mode))
            .await?;
        debug!("Stored {} ({:?})", path, mode);
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        let collection = path.collection().as_str().to_string();
        let id = path.id().to_string();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                )?)
            })
            .await?;
        if removed > 0 {
            debug!("Deleted {}", path);
        }
        Ok(())
    }

    /// Must be called from within a tokio runtime: the poller is spawned here.
    fn watch(
        &self,
        collection: &CollectionPath,
    ) -> Result<watch::Receiver<Vec<Document>>, StoreError> {
        let initial = {
            let conn = self
                .conn
                .lock()
                .map_err(|_| StoreError::Unavailable("presence connection poisoned".to_string()))?;
            load_collection(&conn, collection.as_str())?
        };
        let (tx, rx) = watch::channel(initial);

        let conn = Arc::clone(&self.conn);
        let name = collection.as_str().to_string();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if tx.is_closed() {
                    debug!("No watchers left for {}, stopping poller", name);
                    break;
                }

                let conn = Arc::clone(&conn);
                let target = name.clone();
                let loaded = tokio::task::spawn_blocking(move || {
                    let conn = conn.lock().map_err(|_| {
                        StoreError::Unavailable("presence connection poisoned".to_string())
                    })?;
                    load_collection(&conn, &target)
                })
                .await;

                match loaded {
                    Ok(Ok(snapshot)) => {
                        tx.send_if_modified(|current| {
                            if *current == snapshot {
                                false
                            } else {
                                *current = snapshot;
                                true
                            }
                        });
                    }
                    Ok(Err(e)) => warn!("Polling {} failed: {}", name, e),
                    Err(e) => warn!("Polling task for {} failed: {}", name, e),
                }
            }
        });

        Ok(rx)
    }
}
