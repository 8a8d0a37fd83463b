use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tags (
    resource_id TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (resource_id, resource_type, key)
);

CREATE INDEX IF NOT EXISTS idx_tags_type ON tags(resource_type);
CREATE INDEX IF NOT EXISTS idx_tags_key ON tags(key);
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTag {
    pub resource_id: String,
    pub resource_type: String,
    pub key: String,
    pub value: String,
}

/// Conditions for [`TagDatabase::describe`]. Empty lists match everything;
/// values within one list are OR-ed, lists are AND-ed.
#[derive(Debug, Clone, Default)]
pub struct TagQuery {
    pub resource_ids: Vec<String>,
    pub resource_types: Vec<String>,
    pub keys: Vec<String>,
    pub values: Vec<String>,
}

/// Resource tags in SQLite, in memory unless a file is configured.
#[derive(Clone)]
pub struct TagDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for TagDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagDatabase").finish_non_exhaustive()
    }
}

impl TagDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Add or overwrite tags on one resource.
    pub fn set_tags(
        &self,
        resource_id: &str,
        resource_type: &str,
        tags: &[(String, String)],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tags (resource_id, resource_type, key, value, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (resource_id, resource_type, key) DO UPDATE SET value = excluded.value",
            )?;
            let now = chrono::Utc::now().timestamp();
            for (key, value) in tags {
                stmt.execute(params![resource_id, resource_type, key, value, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove tags by key. A `Some` value only removes the tag when the
    /// stored value matches.
    pub fn delete_tags(&self, resource_id: &str, keys: &[(String, Option<String>)]) -> Result<()> {
        let conn = self.conn.lock();
        for (key, value) in keys {
            match value {
                Some(value) => conn.execute(
                    "DELETE FROM tags WHERE resource_id = ?1 AND key = ?2 AND value = ?3",
                    params![resource_id, key, value],
                )?,
                None => conn.execute(
                    "DELETE FROM tags WHERE resource_id = ?1 AND key = ?2",
                    params![resource_id, key],
                )?,
            };
        }
        Ok(())
    }

    /// Drop every tag of a resource that no longer exists.
    pub fn delete_all(&self, resource_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tags WHERE resource_id = ?1", [resource_id])?;
        Ok(())
    }

    /// Tags of one resource as `(key, value)`, ordered by key.
    pub fn tags_for(&self, resource_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key, value FROM tags WHERE resource_id = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map([resource_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn describe(&self, query: &TagQuery) -> Result<Vec<ResourceTag>> {
        let mut sql = String::from("SELECT resource_id, resource_type, key, value FROM tags");
        let mut args: Vec<&str> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        for (column, values) in [
            ("resource_id", &query.resource_ids),
            ("resource_type", &query.resource_types),
            ("key", &query.keys),
            ("value", &query.values),
        ] {
            if values.is_empty() {
                continue;
            }
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| {
                    args.push(v.as_str());
                    format!("?{}", args.len())
                })
                .collect();
            clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY resource_id, key");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok(ResourceTag {
                    resource_id: row.get(0)?,
                    resource_type: row.get(1)?,
                    key: row.get(2)?,
                    value: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tag(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn test_set_and_overwrite() {
        let db = TagDatabase::in_memory().unwrap();
        db.set_tags("i-1", "instance", &[tag("Name", "web"), tag("env", "dev")])
            .unwrap();
        db.set_tags("i-1", "instance", &[tag("env", "prod")]).unwrap();

        assert_eq!(
            db.tags_for("i-1").unwrap(),
            vec![tag("Name", "web"), tag("env", "prod")]
        );
    }

    #[test]
    fn test_delete_with_value_match() {
        let db = TagDatabase::in_memory().unwrap();
        db.set_tags("vol-1", "volume", &[tag("a", "1"), tag("b", "2")])
            .unwrap();

        db.delete_tags(
            "vol-1",
            &[
                ("a".to_string(), Some("wrong".to_string())),
                ("b".to_string(), None),
            ],
        )
        .unwrap();
        assert_eq!(db.tags_for("vol-1").unwrap(), vec![tag("a", "1")]);

        db.delete_all("vol-1").unwrap();
        assert!(db.tags_for("vol-1").unwrap().is_empty());
    }

    #[test]
    fn test_describe_filters() {
        let db = TagDatabase::in_memory().unwrap();
        db.set_tags("i-1", "instance", &[tag("Name", "web")]).unwrap();
        db.set_tags("i-2", "instance", &[tag("Name", "db")]).unwrap();
        db.set_tags("vol-1", "volume", &[tag("Name", "data")]).unwrap();

        let all = db.describe(&TagQuery::default()).unwrap();
        assert_eq!(all.len(), 3);

        let instances = db
            .describe(&TagQuery {
                resource_types: vec!["instance".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(instances.len(), 2);

        let web_or_data = db
            .describe(&TagQuery {
                keys: vec!["Name".to_string()],
                values: vec!["web".to_string(), "data".to_string()],
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<_> = web_or_data.iter().map(|t| t.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["i-1", "vol-1"]);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tags.db");

        {
            let db = TagDatabase::open(&path).unwrap();
            db.set_tags("i-1", "instance", &[tag("k", "v")]).unwrap();
        }

        let db = TagDatabase::open(&path).unwrap();
        assert_eq!(db.tags_for("i-1").unwrap(), vec![tag("k", "v")]);
    }
}
