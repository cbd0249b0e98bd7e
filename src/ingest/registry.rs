//! Relational bookkeeping for ingested files and their original element contents.

use crate::document::{Element, ElementKind};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS elements (
    file_id TEXT NOT NULL,
    element_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    text TEXT,
    data BLOB,
    PRIMARY KEY (file_id, element_id)
);

CREATE INDEX IF NOT EXISTS idx_elements_kind ON elements(kind);
"#;

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// SQLite reported an error.
    #[error("Registry database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Creating the database directory failed.
    #[error("Registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection mutex was poisoned.
    #[error("Registry lock poisoned: {0}")]
    Lock(String),
    /// A stored row could not be turned back into an element.
    #[error("Corrupt registry row for {element_id}: {reason}")]
    Corrupt {
        /// Offending element id.
        element_id: String,
        /// What was wrong.
        reason: String,
    },
}

/// SQLite registry keyed by `(file, element id)`.
pub struct Registry {
    conn: Mutex<Connection>,
}

impl Registry {
    /// Open (or create) the registry at `path`.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened registry");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Registry that lives only as long as the process (useful for testing).
    pub fn in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|err| RegistryError::Lock(err.to_string()))
    }

    /// Whether `file_id` has been fully ingested.
    pub fn file_exists(&self, file_id: &str) -> Result<bool, RegistryError> {
        let conn = self.lock()?;
        let found = conn
            .query_row("SELECT 1 FROM files WHERE id = ?1", params![file_id], |_| {
                Ok(())
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Record `file_id` as ingested.
    pub fn register_file(&self, file_id: &str) -> Result<(), RegistryError> {
        let registered_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO files (id, registered_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET registered_at = excluded.registered_at",
            params![file_id, registered_at],
        )?;
        Ok(())
    }

    /// Store an element's original content; an existing row is left untouched.
    ///
    /// Returns `true` when a new row was written.
    pub fn store_element(
        &self,
        file_id: &str,
        element_id: &str,
        element: &Element,
    ) -> Result<bool, RegistryError> {
        let (text, data): (Option<&str>, Option<&[u8]>) = match element.kind() {
            ElementKind::Image => (None, Some(element.content().as_bytes())),
            ElementKind::Text | ElementKind::Table => (Some(element.content()), None),
        };
        let conn = self.lock()?;
        let written = conn.execute(
            "INSERT OR IGNORE INTO elements (file_id, element_id, kind, text, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![file_id, element_id, element.kind().as_str(), text, data],
        )?;
        Ok(written > 0)
    }

    /// Look up an original by kind, element id and file.
    pub fn get_element(
        &self,
        kind: ElementKind,
        element_id: &str,
        file_id: &str,
    ) -> Result<Option<Element>, RegistryError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT text, data FROM elements
                 WHERE kind = ?1 AND element_id = ?2 AND file_id = ?3",
                params![kind.as_str(), element_id, file_id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<Vec<u8>>>(1)?)),
            )
            .optional()?;

        let Some((text, data)) = row else {
            return Ok(None);
        };
        let content = match (text, data) {
            (Some(text), _) => text,
            (None, Some(bytes)) => {
                String::from_utf8(bytes).map_err(|err| RegistryError::Corrupt {
                    element_id: element_id.to_string(),
                    reason: err.to_string(),
                })?
            }
            (None, None) => {
                return Err(RegistryError::Corrupt {
                    element_id: element_id.to_string(),
                    reason: "row has neither text nor data".into(),
                });
            }
        };
        Ok(Some(Element::new(kind, Some(element_id.to_string()), content)))
    }

    /// Number of stored elements for `file_id`.
    pub fn element_count(&self, file_id: &str) -> Result<usize, RegistryError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM elements WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
