use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Last-known-good endpoint of one server
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEndpoint {
    pub server_id: String,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

pub struct CacheDb {
    conn: Connection,
}

impl CacheDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS endpoints (
                server_id   TEXT PRIMARY KEY,
                url         TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Record `url` as the last-known-good endpoint. Returns true if it changed.
    pub fn set_endpoint(&self, server_id: &str, url: &str) -> Result<bool> {
        let existing = self.get_endpoint(server_id)?;
        let changed = existing.as_ref().map(|e| e.url != url).unwrap_or(true);

        self.conn
            .execute(
                r#"
                INSERT INTO endpoints (server_id, url, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(server_id) DO UPDATE SET
                    url = excluded.url,
                    updated_at = excluded.updated_at
                "#,
                params![server_id, url, Utc::now().to_rfc3339()],
            )
            .context("Failed to store endpoint")?;

        Ok(changed)
    }

    pub fn get_endpoint(&self, server_id: &str) -> Result<Option<CachedEndpoint>> {
        self.conn
            .query_row(
                "SELECT server_id, url, updated_at FROM endpoints WHERE server_id = ?1",
                params![server_id],
                Self::row_to_endpoint,
            )
            .optional()
            .context("Failed to query endpoint")
    }

    pub fn get_all_endpoints(&self) -> Result<Vec<CachedEndpoint>> {
        let mut stmt = self
            .conn
            .prepare("SELECT server_id, url, updated_at FROM endpoints ORDER BY server_id")
            .context("Failed to prepare query")?;

        let endpoints = stmt
            .query_map([], Self::row_to_endpoint)
            .context("Failed to query endpoints")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect endpoints")?;

        Ok(endpoints)
    }

    /// Forget a server's endpoint, e.g. after the server disappeared from the account
    pub fn remove_endpoint(&self, server_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM endpoints WHERE server_id = ?1", params![server_id])
            .context("Failed to remove endpoint")?;
        Ok(())
    }

    fn row_to_endpoint(row: &rusqlite::Row) -> Result<CachedEndpoint, rusqlite::Error> {
        let updated_at_str: String = row.get(2)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(CachedEndpoint {
            server_id: row.get(0)?,
            url: row.get(1)?,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let db = CacheDb::open(":memory:").unwrap();
        assert!(db.get_endpoint("srv").unwrap().is_none());

        let changed = db.set_endpoint("srv", "http://192.168.1.10:32400").unwrap();
        assert!(changed, "First insert should report change");

        let stored = db.get_endpoint("srv").unwrap().unwrap();
        assert_eq!(stored.url, "http://192.168.1.10:32400");
    }

    #[test]
    fn test_set_detects_changes() {
        let db = CacheDb::open(":memory:").unwrap();
        db.set_endpoint("srv", "http://a:1").unwrap();

        assert!(!db.set_endpoint("srv", "http://a:1").unwrap());
        assert!(db.set_endpoint("srv", "https://b:2").unwrap());
        assert_eq!(db.get_endpoint("srv").unwrap().unwrap().url, "https://b:2");
    }

    #[test]
    fn test_remove_and_list() {
        let db = CacheDb::open(":memory:").unwrap();
        db.set_endpoint("b", "http://b:1").unwrap();
        db.set_endpoint("a", "http://a:1").unwrap();

        let all = db.get_all_endpoints().unwrap();
        assert_eq!(all.iter().map(|e| e.server_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        db.remove_endpoint("a").unwrap();
        assert!(db.get_endpoint("a").unwrap().is_none());
        assert_eq!(db.get_all_endpoints().unwrap().len(), 1);
    }

    #[test]
    fn test_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("endpoints.db");

        CacheDb::open(&path).unwrap().set_endpoint("srv", "http://a:1").unwrap();
        let reopened = CacheDb::open(&path).unwrap();
        assert_eq!(reopened.get_endpoint("srv").unwrap().unwrap().url, "http://a:1");
    }
}
