//! Resume state persisted in SQLite.
//!
//! Only one row is kept: the file that most recently started playing. On
//! restart the playlist resumes at that file if it is still in the library.
//!
//! rusqlite is synchronous, so every access goes through `spawn_blocking`.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
}

impl ResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load_last(&self) -> Result<Option<PathBuf>, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<PathBuf>, StoreError> {
            let conn = Connection::open(path)?;
            Ok(db_load_last(&conn)?)
        })
        .await?
    }

    pub async fn save_last(&self, media: &Path) -> Result<(), StoreError> {
        let path = self.path.clone();
        let media = media.to_string_lossy().to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = Connection::open(path)?;
            db_save_last(&mut conn, &media)?;
            Ok(())
        })
        .await?
    }
}

fn db_init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS resume_state (
            id          INTEGER PRIMARY KEY CHECK (id = 1),
            path        TEXT NOT NULL,
            updated_at  INTEGER NOT NULL
        );
        "#,
    )
}

fn db_load_last(conn: &Connection) -> rusqlite::Result<Option<PathBuf>> {
    db_init(conn)?;
    let path: Option<String> = conn
        .query_row("SELECT path FROM resume_state WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    Ok(path.map(PathBuf::from))
}

fn db_save_last(conn: &mut Connection, media: &str) -> rusqlite::Result<()> {
    db_init(conn)?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    conn.execute(
        "INSERT INTO resume_state (id, path, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET path = excluded.path, updated_at = excluded.updated_at",
        params![media, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remembers_the_latest_item() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResumeStore::new(dir.path().join("playout.db"));

        assert_eq!(store.load_last().await.unwrap(), None);

        store.save_last(Path::new("/v/a.mkv")).await.unwrap();
        store.save_last(Path::new("/v/b.mkv")).await.unwrap();
        assert_eq!(store.load_last().await.unwrap(), Some(PathBuf::from("/v/b.mkv")));

        let reopened = ResumeStore::new(store.path());
        assert_eq!(reopened.load_last().await.unwrap(), Some(PathBuf::from("/v/b.mkv")));
    }
}
