//! Query helpers over a [`Pool`]: transactions and named parameters.
//!
//! Queries use `:name` placeholders bound from the fields of any
//! `Serialize` struct or map:
//!
//! ```ignore
//! tpl.named_exec(
//!     "INSERT INTO users (email, name) VALUES (:email, :name)",
//!     &NewUser { email, name },
//! ).await?;
//! ```

use libsql::params::Params;
use libsql::{Connection, Transaction, Value};
use serde::de::DeserializeOwned;
use serde::de::value::MapDeserializer;
use serde::{Deserialize, Serialize};

use crate::db::Pool;
use crate::router::BoxFuture;
use crate::{Error, Result};

/// Runs queries and transactions on a pool.
#[derive(Debug, Clone)]
pub struct Template {
    pool: Pool,
}

impl Template {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds. When it fails the transaction is rolled
    /// back and the callback's error is returned as is.
    ///
    /// ```ignore
    /// tpl.tx_do(|tx| Box::pin(async move {
    ///     Template::tx_named_exec(tx, "DELETE FROM cards WHERE board = :id", &args).await?;
    ///     Template::tx_named_exec(tx, "DELETE FROM boards WHERE id = :id", &args).await?;
    ///     Ok(())
    /// })).await?;
    /// ```
    pub async fn tx_do<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, Result<T>>,
    {
        let conn = self.pool.get().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| Error::database(format!("Database Error - Begin Tx: {e}")))?;

        match f(&tx).await {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| Error::database(format!("Database Error - Can't Commit: {e}")))?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback().await.map_err(|e| {
                    Error::database(format!("Database Error - Can't Rollback: {e}"))
                })?;
                tracing::debug!("Transaction rolled back: {err}");
                Err(err)
            }
        }
    }

    /// Execute a statement outside a transaction. Returns the affected rows.
    pub async fn named_exec<A: Serialize>(&self, query: &str, arg: &A) -> Result<u64> {
        let conn = self.pool.get().await?;
        exec(&conn, query, arg).await
    }

    /// Execute a statement inside a transaction.
    pub async fn tx_named_exec<A: Serialize>(tx: &Transaction, query: &str, arg: &A) -> Result<u64> {
        exec(tx, query, arg).await
    }

    /// Run a query and decode every row into `T`.
    pub async fn named_query<T, A>(&self, query: &str, arg: &A) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        A: Serialize,
    {
        let conn = self.pool.get().await?;
        let mut rows = conn.query(query, named_params(query, arg)?).await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(decode_row(&row)?);
        }
        Ok(out)
    }

    /// Run a query and decode its first row. No row is [`Error::NotFound`].
    pub async fn named_get<T, A>(&self, query: &str, arg: &A) -> Result<T>
    where
        T: DeserializeOwned,
        A: Serialize,
    {
        let conn = self.pool.get().await?;
        let mut rows = conn.query(query, named_params(query, arg)?).await?;
        match rows.next().await? {
            Some(row) => decode_row(&row),
            None => Err(Error::not_found("Record not found.")),
        }
    }
}

async fn exec<A: Serialize>(conn: &Connection, query: &str, arg: &A) -> Result<u64> {
    conn.execute(query, named_params(query, arg)?)
        .await
        .map_err(|e| Error::database(format!("Database Error - NamedExec: {e}")))
}

/// Placeholder names (`:name`) in order of first appearance.
///
/// Quoted text and comments are skipped.
fn placeholders(query: &str) -> Vec<&str> {
    let bytes = query.as_bytes();
    let mut names: Vec<&str> = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == b'\'' || c == b'"' => quote = Some(c),
            None if c == b'-' && bytes.get(i + 1) == Some(&b'-') => {
                i = query[i..].find('\n').map_or(bytes.len(), |n| i + n + 1);
                continue;
            }
            None if c == b'/' && bytes.get(i + 1) == Some(&b'*') => {
                i = query[i + 2..].find("*/").map_or(bytes.len(), |n| i + n + 4);
                continue;
            }
            None if c == b':' => {
                // `::` is a cast, not a placeholder
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                if end > start {
                    let name = &query[start..end];
                    if !names.contains(&name) {
                        names.push(name);
                    }
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    names
}

/// Bind the fields of `arg` to the query's placeholders.
fn named_params<A: Serialize>(query: &str, arg: &A) -> Result<Params> {
    let names = placeholders(query);
    if names.is_empty() {
        return Ok(Params::None);
    }

    let fields = match serde_json::to_value(arg)? {
        serde_json::Value::Object(map) => map,
        _ => {
            return Err(Error::illegal_argument(
                "Named query arguments must be a struct or a map",
            ));
        }
    };

    let mut params = Vec::with_capacity(names.len());
    for name in names {
        let value = fields
            .get(name)
            .ok_or_else(|| Error::illegal_argument(format!("Missing named argument :{name}")))?;
        params.push((format!(":{name}"), to_sql_value(value)));
    }
    Ok(Params::Named(params))
}

fn to_sql_value(value: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Integer(i64::from(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Decode a row into `T` keyed by column name.
///
/// SQLite has no boolean type, so `bool` fields read 0 and 1 back.
fn decode_row<T: DeserializeOwned>(row: &libsql::Row) -> Result<T> {
    let mut columns = Vec::with_capacity(row.column_count().max(0) as usize);
    for i in 0..row.column_count() {
        let name = row.column_name(i).unwrap_or_default().to_string();
        columns.push((name, row.get_value(i)?));
    }
    let de = MapDeserializer::<_, serde::de::value::Error>::new(columns.into_iter());
    T::deserialize(de).map_err(|e| Error::database(format!("Database Error - Decode Row: {e}")))
}
