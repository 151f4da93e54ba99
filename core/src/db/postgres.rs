// Client-server backend (postgres)

use postgres::types::{ToSql, Type};
use postgres::{Client, Config, NoTls};

use crate::config::BackendKind;
use crate::db::connection::{Driver, Row, Session, Value};
use crate::{Result, StoreError};

pub struct PostgresDriver {
    config: Config,
}

impl PostgresDriver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Driver for PostgresDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn connect(&self) -> Result<Box<dyn Session>> {
        let client = self.config.connect(NoTls).map_err(|e| StoreError::Unavailable {
            reason: format!("cannot connect to postgres: {}", e),
        })?;
        Ok(Box::new(PostgresSession { client }))
    }

    // Every column is part of the key, so keeping the existing row is the
    // same as replacing it.
    fn insert_or_replace(&self, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            table,
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    }
}

pub struct PostgresSession {
    client: Client,
}

impl Session for PostgresSession {
    fn is_stale(&mut self) -> bool {
        self.client.is_closed()
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let stmt = self
            .client
            .prepare(&number_placeholders(sql))
            .map_err(map_error)?;
        let bound = bind(stmt.params(), params)?;
        let rows = self
            .client
            .query(&stmt, &param_refs(&bound))
            .map_err(map_error)?;
        rows.iter().map(read_row).collect()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let stmt = self
            .client
            .prepare(&number_placeholders(sql))
            .map_err(map_error)?;
        let bound = bind(stmt.params(), params)?;
        self.client
            .execute(&stmt, &param_refs(&bound))
            .map_err(map_error)
    }

    fn execute_batch(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<u64> {
        // Dropping an uncommitted transaction rolls it back.
        let mut tx = self.client.transaction().map_err(map_error)?;
        let stmt = tx.prepare(&number_placeholders(sql)).map_err(map_error)?;
        let mut changed = 0u64;
        for params in batch {
            let bound = bind(stmt.params(), params)?;
            changed += tx.execute(&stmt, &param_refs(&bound)).map_err(map_error)?;
        }
        tx.commit().map_err(map_error)?;
        Ok(changed)
    }

    fn apply_schema(&mut self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            self.client.batch_execute(statement).map_err(map_error)?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.client.close().map_err(map_error)
    }
}

/// Rewrite `?` placeholders to postgres' numbered `$n` form.
pub(crate) fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut next = 0usize;
    for ch in sql.chars() {
        if ch == '?' {
            next += 1;
            out.push('$');
            out.push_str(&next.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

fn map_error(e: postgres::Error) -> StoreError {
    if e.is_closed() {
        StoreError::Unavailable {
            reason: format!("postgres connection closed: {}", e),
        }
    } else {
        StoreError::Postgres(e)
    }
}

// Integer parameters are narrowed to whatever width the server inferred
// for the placeholder.
fn bind(types: &[Type], params: &[Value]) -> Result<Vec<Box<dyn ToSql + Sync>>> {
    if types.len() != params.len() {
        return Err(StoreError::InvalidInput(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }

    types
        .iter()
        .zip(params)
        .map(|(ty, value)| -> Result<Box<dyn ToSql + Sync>> {
            match value {
                Value::Text(s) => Ok(Box::new(s.clone())),
                Value::Int(i) => match *ty {
                    Type::INT2 => Ok(Box::new(narrow::<i16>(*i)?)),
                    Type::INT4 => Ok(Box::new(narrow::<i32>(*i)?)),
                    _ => Ok(Box::new(*i)),
                },
            }
        })
        .collect()
}

fn narrow<T: TryFrom<i64>>(value: i64) -> Result<T> {
    T::try_from(value)
        .map_err(|_| StoreError::InvalidInput(format!("integer {} out of column range", value)))
}

fn param_refs(bound: &[Box<dyn ToSql + Sync>]) -> Vec<&(dyn ToSql + Sync)> {
    bound.iter().map(|b| b.as_ref()).collect()
}

fn read_row(row: &postgres::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::INT2 => Value::Int(i64::from(row.try_get::<_, i16>(idx)?)),
            Type::INT4 => Value::Int(i64::from(row.try_get::<_, i32>(idx)?)),
            Type::INT8 => Value::Int(row.try_get::<_, i64>(idx)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                Value::Text(row.try_get::<_, String>(idx)?)
            }
            ref other => {
                return Err(StoreError::CorruptRow {
                    table: "postgres result",
                    reason: format!("unsupported column type {} in {}", other, column.name()),
                })
            }
        };
        values.push(value);
    }
    Ok(values)
}
