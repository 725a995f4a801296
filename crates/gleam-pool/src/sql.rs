//! SQLite backend: connection manager setup and the `SqlBackend` interface.
//!
//! Every new connection runs the pragma block (WAL, busy timeout, foreign
//! keys). Without a path the pool shares one named in-memory database, so
//! all pooled connections see the same tables.

use std::path::PathBuf;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use uuid::Uuid;

use gleam_settings::DatabaseSettings;

use crate::errors::Result;

/// A SQL parameter or column value.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    /// `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Double.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// Rows returned by [`SqlBackend::query`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Row values, one `Vec` per row, aligned with `columns`.
    pub rows: Vec<Vec<SqlValue>>,
}

/// Statement execution against a leased SQL connection.
pub trait SqlBackend {
    /// Run a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize>;
    /// Run a query and collect every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;
}

impl SqlBackend for Connection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        let mut stmt = self.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let mut stmt = self.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(SqlValue::from(row.get_ref(i)?));
            }
            rows.push(values);
        }
        Ok(QueryResult { columns, rows })
    }
}

/// How to open SQLite connections.
#[derive(Clone, Debug)]
pub struct SqliteOptions {
    /// Database file; `None` for a pool-private shared in-memory database.
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Page cache size in KiB.
    pub cache_size_kib: i64,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
            cache_size_kib: 8192,
        }
    }
}

impl From<&DatabaseSettings> for SqliteOptions {
    fn from(s: &DatabaseSettings) -> Self {
        Self {
            path: s.path.as_ref().map(PathBuf::from),
            busy_timeout_ms: s.busy_timeout_ms,
            ..Self::default()
        }
    }
}

/// Build an r2d2 manager whose connections run the pragma block on open.
pub fn sqlite_manager(options: &SqliteOptions) -> SqliteConnectionManager {
    let manager = match &options.path {
        Some(path) => SqliteConnectionManager::file(path),
        None => SqliteConnectionManager::file(format!(
            "file:gleam-{}?mode=memory&cache=shared",
            Uuid::now_v7().simple()
        )),
    };
    let pragmas = format!(
        "PRAGMA journal_mode = WAL;\
         PRAGMA busy_timeout = {};\
         PRAGMA foreign_keys = ON;\
         PRAGMA cache_size = -{};\
         PRAGMA synchronous = NORMAL;",
        options.busy_timeout_ms, options.cache_size_kib
    );
    manager.with_init(move |conn| conn.execute_batch(&pragmas))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PoolError;
    use assert_matches::assert_matches;
    use r2d2::ManageConnection;

    fn open(options: &SqliteOptions) -> Connection {
        sqlite_manager(options).connect().unwrap()
    }

    #[test]
    fn execute_and_query() {
        let mut conn = open(&SqliteOptions::default());
        conn.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER, b BLOB)")
            .unwrap();
        let n = SqlBackend::execute(
            &mut conn,
            "INSERT INTO kv VALUES (?1, ?2, ?3), (?4, ?5, NULL)",
            &["a".into(), 1.into(), SqlValue::Blob(vec![1, 2]), "b".into(), 2.into()],
        )
        .unwrap();
        assert_eq!(n, 2);

        let result = conn
            .query("SELECT k, v, b FROM kv ORDER BY k", &[])
            .unwrap();
        assert_eq!(result.columns, vec!["k", "v", "b"]);
        assert_eq!(
            result.rows,
            vec![
                vec![SqlValue::Text("a".into()), SqlValue::Integer(1), SqlValue::Blob(vec![1, 2])],
                vec![SqlValue::Text("b".into()), SqlValue::Integer(2), SqlValue::Null],
            ]
        );
    }

    #[test]
    fn query_with_params_filters() {
        let mut conn = open(&SqliteOptions::default());
        conn.execute_batch("CREATE TABLE t (x REAL); INSERT INTO t VALUES (1.5), (2.5);")
            .unwrap();
        let result = conn
            .query("SELECT x FROM t WHERE x > ?1", &[SqlValue::Real(2.0)])
            .unwrap();
        assert_eq!(result.rows, vec![vec![SqlValue::Real(2.5)]]);
    }

    #[test]
    fn bad_sql_is_sql_error() {
        let mut conn = open(&SqliteOptions::default());
        assert_matches!(conn.query("SELEC nonsense", &[]), Err(PoolError::Sql(_)));
    }

    #[test]
    fn in_memory_connections_share_one_database() {
        let manager = sqlite_manager(&SqliteOptions::default());
        let mut a = manager.connect().unwrap();
        let mut b = manager.connect().unwrap();
        let _ = SqlBackend::execute(&mut a, "CREATE TABLE shared (x INTEGER)", &[]).unwrap();
        let _ = SqlBackend::execute(&mut a, "INSERT INTO shared VALUES (7)", &[]).unwrap();
        let result = b.query("SELECT x FROM shared", &[]).unwrap();
        assert_eq!(result.rows, vec![vec![SqlValue::Integer(7)]]);
    }

    #[test]
    fn separate_managers_are_isolated() {
        let mut a = open(&SqliteOptions::default());
        let mut b = open(&SqliteOptions::default());
        let _ = SqlBackend::execute(&mut a, "CREATE TABLE only_a (x INTEGER)", &[]).unwrap();
        assert_matches!(b.query("SELECT x FROM only_a", &[]), Err(PoolError::Sql(_)));
    }

    #[test]
    fn file_database_uses_wal_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteOptions {
            path: Some(dir.path().join("gleam.db")),
            ..SqliteOptions::default()
        };
        let conn = open(&options);
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        assert_eq!(fk, 1);
    }

    #[test]
    fn options_from_settings() {
        let settings = DatabaseSettings {
            path: Some("/tmp/x.db".into()),
            busy_timeout_ms: 123,
            ..DatabaseSettings::default()
        };
        let options = SqliteOptions::from(&settings);
        assert_eq!(options.path, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(options.busy_timeout_ms, 123);
    }
}
