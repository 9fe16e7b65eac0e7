use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub const TOKEN_KEY: &str = "token";
pub const DEVICE_ID_KEY: &str = "deviceId";
pub const INITIAL_PIN_KEY: &str = "initialPin";

const UPSERT_SQL: &str = "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";

/// Credentials persisted after a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub device_id: String,
    pub initial_pin: String,
}

/// Local key/value storage backing the session, one row per key.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create session directory")?;
            }
        }

        let conn = Connection::open(db_path).context("Failed to open session database")?;
        let store = Self::with_connection(conn)?;

        log::info!("Session store opened at: {}", db_path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory session database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS local_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(Self { conn })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(UPSERT_SQL, params![key, value])?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM local_storage WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Writes all three keys or none of them.
    pub fn save(&self, session: &Session) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in [
            (DEVICE_ID_KEY, &session.device_id),
            (INITIAL_PIN_KEY, &session.initial_pin),
            (TOKEN_KEY, &session.token),
        ] {
            tx.execute(UPSERT_SQL, params![key, value])?;
        }
        tx.commit().context("Failed to commit session")?;

        log::debug!("Stored session for device {}", session.device_id);
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.get(TOKEN_KEY)
    }

    /// The stored session, present whenever a token is.
    pub fn load(&self) -> Result<Option<Session>> {
        let Some(token) = self.token()? else {
            return Ok(None);
        };

        Ok(Some(Session {
            token,
            device_id: self.get(DEVICE_ID_KEY)?.unwrap_or_default(),
            initial_pin: self.get(INITIAL_PIN_KEY)?.unwrap_or_default(),
        }))
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM local_storage WHERE key IN (?1, ?2, ?3)",
            params![TOKEN_KEY, DEVICE_ID_KEY, INITIAL_PIN_KEY],
        )?;

        log::debug!("Cleared stored session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session {
            token: "jwt-token".into(),
            device_id: "1100000571".into(),
            initial_pin: "0000".into(),
        }
    }

    #[test]
    fn empty_store_has_no_session() {
        let store = SessionStore::open_in_memory().unwrap();
        assert_eq!(store.token().unwrap(), None);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save_then_load() {
        let store = SessionStore::open_in_memory().unwrap();
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
        assert_eq!(store.get(DEVICE_ID_KEY).unwrap().as_deref(), Some("1100000571"));
    }

    #[test]
    fn save_overwrites_previous_values() {
        let store = SessionStore::open_in_memory().unwrap();
        store.save(&sample()).unwrap();
        let replacement = Session { token: "second".into(), ..sample() };
        store.save(&replacement).unwrap();
        assert_eq!(store.token().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn clear_removes_all_keys() {
        let store = SessionStore::open_in_memory().unwrap();
        store.save(&sample()).unwrap();
        store.clear().unwrap();
        for key in [TOKEN_KEY, DEVICE_ID_KEY, INITIAL_PIN_KEY] {
            assert_eq!(store.get(key).unwrap(), None);
        }
    }

    #[test]
    fn failed_save_leaves_no_partial_session() {
        let store = SessionStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_pin BEFORE INSERT ON local_storage
                 WHEN NEW.key = 'initialPin'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        assert!(store.save(&sample()).is_err());
        assert_eq!(store.token().unwrap(), None);
        assert_eq!(store.get(DEVICE_ID_KEY).unwrap(), None);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn session_requires_token() {
        let store = SessionStore::open_in_memory().unwrap();
        store.set(DEVICE_ID_KEY, "1100000571").unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!("water-session-{}.db", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        SessionStore::open(&path).unwrap().save(&sample()).unwrap();
        let reopened = SessionStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), Some(sample()));

        let _ = std::fs::remove_file(&path);
    }
}
