// Embedded single-file backend (rusqlite)

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::time::Duration;

use crate::config::{BackendKind, SqliteTarget};
use crate::db::connection::{Driver, Row, Session, Value};
use crate::{Result, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Int(i) => ToSqlOutput::from(*i),
        })
    }
}

pub struct SqliteDriver {
    target: SqliteTarget,
}

impl SqliteDriver {
    pub fn new(target: SqliteTarget) -> Self {
        Self { target }
    }
}

impl Driver for SqliteDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn connect(&self) -> Result<Box<dyn Session>> {
        let opened = match &self.target {
            SqliteTarget::Memory => Connection::open_in_memory(),
            SqliteTarget::File(path) => Connection::open(path),
        };
        let conn = opened.map_err(|e| StoreError::Unavailable {
            reason: format!("cannot open sqlite database {:?}: {}", self.target, e),
        })?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets readers proceed while a batch is being written.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        Ok(Box::new(SqliteSession { conn }))
    }

    fn insert_or_replace(&self, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    }
}

pub struct SqliteSession {
    conn: Connection,
}

impl Session for SqliteSession {
    fn is_stale(&mut self) -> bool {
        false
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                values.push(read_value(row.get_ref(idx)?)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn execute_batch(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<u64> {
        // Dropping an uncommitted transaction rolls it back.
        let tx = self.conn.transaction()?;
        let mut changed = 0u64;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for params in batch {
                changed += stmt.execute(params_from_iter(params.iter()))? as u64;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn apply_schema(&mut self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            self.conn.execute_batch(statement)?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}

fn read_value(value: ValueRef<'_>) -> Result<Value> {
    match value {
        ValueRef::Integer(i) => Ok(Value::Int(i)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|e| StoreError::CorruptRow {
                table: "sqlite result",
                reason: e.to_string(),
            }),
        other => Err(StoreError::CorruptRow {
            table: "sqlite result",
            reason: format!("unsupported column type {:?}", other.data_type()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_or_replace_shape() {
        let driver = SqliteDriver::new(SqliteTarget::Memory);
        assert_eq!(
            driver.insert_or_replace("t", &["a", "b", "c"]),
            "INSERT OR REPLACE INTO t (a, b, c) VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn test_batch_rolls_back_on_failure() {
        let driver = SqliteDriver::new(SqliteTarget::Memory);
        let mut session = driver.connect().unwrap();
        session
            .apply_schema(&["CREATE TABLE t (v TEXT PRIMARY KEY)"])
            .unwrap();

        let batch = vec![
            vec![Value::from("one")],
            vec![Value::from("two")],
            vec![Value::from("one")],
        ];
        assert!(session
            .execute_batch("INSERT INTO t (v) VALUES (?)", &batch)
            .is_err());

        let rows = session.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(rows, vec![vec![Value::Int(0)]]);
    }

    #[test]
    fn test_query_reads_text_and_integers() {
        let driver = SqliteDriver::new(SqliteTarget::Memory);
        let mut session = driver.connect().unwrap();
        let rows = session
            .query("SELECT ?, ?", &[Value::from("+15550001"), Value::from(3u32)])
            .unwrap();
        assert_eq!(rows, vec![vec![Value::from("+15550001"), Value::Int(3)]]);
    }
}
