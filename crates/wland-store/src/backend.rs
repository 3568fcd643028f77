use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use wland_core::{KeyValueStore, runtime_dir};
use wland_errors::ChatError;

/// Tab-lifetime storage: gone when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> anyhow::Error {
    ChatError::Storage("memory store lock poisoned".to_string()).into()
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

/// Named storage area inside the shared SQLite file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Survives a navigation, cleared by `clear`.
    Tab,
    /// Long-lived visitor flags.
    Local,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Tab => "tab",
            Scope::Local => "local",
        }
    }
}

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS kv_entries (
        scope TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (scope, key)
     );",
)];

/// File-backed [`KeyValueStore`] so state outlives a single CLI invocation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
    scope: Scope,
}

impl SqliteStore {
    /// Opens `<workspace>/.wland-chat/storage.sqlite`.
    pub fn for_workspace(workspace: &Path, scope: Scope) -> Result<Self> {
        let root = runtime_dir(workspace);
        fs::create_dir_all(&root)?;
        Self::open(&root.join("storage.sqlite"), scope)
    }

    pub fn open(db_path: &Path, scope: Scope) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
            scope,
        };
        store.init_db()?;
        Ok(store)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn db(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Drops every key of this scope.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.db()?;
        let removed = conn.execute(
            "DELETE FROM kv_entries WHERE scope = ?1",
            [self.scope.as_str()],
        )?;
        Ok(removed)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.db()?;
        let mut stmt =
            conn.prepare("SELECT key FROM kv_entries WHERE scope = ?1 ORDER BY key ASC")?;
        let rows = stmt.query_map([self.scope.as_str()], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
             );",
        )?;
        for (version, sql) in MIGRATIONS {
            let already: i64 = conn.query_row(
                "SELECT COUNT(1) FROM schema_migrations WHERE version = ?1",
                [*version],
                |r| r.get(0),
            )?;
            if already == 0 {
                conn.execute_batch(sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, Utc::now().to_rfc3339()],
                )?;
            }
        }
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE scope = ?1 AND key = ?2",
                params![self.scope.as_str(), key],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (scope, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![self.scope.as_str(), key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.db()?;
        conn.execute(
            "DELETE FROM kv_entries WHERE scope = ?1 AND key = ?2",
            params![self.scope.as_str(), key],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_overwrites_and_removes() {
        let store = MemoryStore::new();
        store.set("k", "one").expect("set");
        store.set("k", "two").expect("set");
        assert_eq!(store.get("k").expect("get").as_deref(), Some("two"));
        store.remove("k").expect("remove");
        assert!(store.get("k").expect("get").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn sqlite_scopes_do_not_leak_into_each_other() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let tab = SqliteStore::for_workspace(workspace.path(), Scope::Tab).expect("tab");
        let local = SqliteStore::for_workspace(workspace.path(), Scope::Local).expect("local");

        tab.set("flag", "true").expect("set tab");
        assert!(local.get("flag").expect("get local").is_none());
        local.set("flag", "false").expect("set local");
        assert_eq!(tab.get("flag").expect("get").as_deref(), Some("true"));

        assert_eq!(tab.clear().expect("clear"), 1);
        assert!(tab.get("flag").expect("get").is_none());
        assert_eq!(local.keys().expect("keys"), vec!["flag".to_string()]);
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let workspace = tempfile::tempdir().expect("tempdir");
        {
            let store = SqliteStore::for_workspace(workspace.path(), Scope::Tab).expect("open");
            store.set("wland_chat_redirect_pending", "true").expect("set");
        }
        let reopened = SqliteStore::for_workspace(workspace.path(), Scope::Tab).expect("reopen");
        assert_eq!(
            reopened
                .get("wland_chat_redirect_pending")
                .expect("get")
                .as_deref(),
            Some("true")
        );
    }
}
