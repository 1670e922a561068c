//! Config store: one row per user table in `{prefix}tables`.

use crate::{Connection, ConnectionExt, Error, Result, TracedConn};
use indexmap::IndexMap;
use std::future::Future;
use tokio_postgres::Row;
use vhsync_schema::{StoredColumnConfig, StoredTableConfig, TableSettings};
use vhsync_sql::{ReservedPrefix, SafeIdent, advisory_lock_key, qualified};

/// Keyed persistence for [`StoredTableConfig`] records.
///
/// The transaction methods bracket a reconciliation pass. `begin_exclusive`
/// also serializes concurrent passes against the same store.
pub trait ConfigStore: Send + Sync {
    /// Create the backing table if it does not exist.
    fn ensure_schema(&self) -> impl Future<Output = Result<()>> + Send;

    /// Every stored record, ordered by name.
    fn get_all(&self) -> impl Future<Output = Result<Vec<StoredTableConfig>>> + Send;

    fn get(&self, name: &str) -> impl Future<Output = Result<Option<StoredTableConfig>>> + Send;

    /// Insert or replace the record keyed by `config.name`, atomically.
    fn upsert(&self, config: &StoredTableConfig) -> impl Future<Output = Result<()>> + Send;

    /// Delete every record whose name is not in `keep`, in one statement.
    ///
    /// Returns the number of records removed.
    fn delete_where_name_not_in(&self, keep: &[String])
    -> impl Future<Output = Result<u64>> + Send;

    fn begin_exclusive(&self) -> impl Future<Output = Result<()>> + Send;

    fn commit(&self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Statements against one config table, rendered once.
#[derive(Debug, Clone)]
struct StoreSql {
    table: String,
    lock_key: i64,
}

impl StoreSql {
    fn new(schema: &SafeIdent, prefix: &ReservedPrefix) -> Result<Self> {
        let name = prefix.table("tables")?;
        Ok(Self {
            table: qualified(schema, &name),
            lock_key: advisory_lock_key(&format!("{}.{}", schema.as_str(), name.as_str())),
        })
    }

    fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             name text PRIMARY KEY, \
             label text NOT NULL DEFAULT '', \
             description text NOT NULL DEFAULT '', \
             model jsonb NOT NULL DEFAULT '{{}}'::jsonb, \
             settings jsonb NOT NULL DEFAULT '{{}}'::jsonb, \
             updated_at timestamptz NOT NULL DEFAULT now())",
            self.table
        )
    }

    fn select_all(&self) -> String {
        format!(
            "SELECT name, label, description, model, settings FROM {} ORDER BY name",
            self.table
        )
    }

    fn select_one(&self) -> String {
        format!(
            "SELECT name, label, description, model, settings FROM {} WHERE name = $1",
            self.table
        )
    }

    fn upsert(&self) -> String {
        format!(
            "INSERT INTO {} (name, label, description, model, settings) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (name) DO UPDATE SET \
             label = EXCLUDED.label, description = EXCLUDED.description, \
             model = EXCLUDED.model, settings = EXCLUDED.settings, updated_at = now()",
            self.table
        )
    }

    fn delete_not_in(&self) -> String {
        format!("DELETE FROM {} WHERE name <> ALL($1::text[])", self.table)
    }
}

/// [`ConfigStore`] in a Postgres table.
pub struct PgConfigStore<'a, C: Connection> {
    conn: TracedConn<'a, C>,
    sql: StoreSql,
}

impl<'a, C: Connection> PgConfigStore<'a, C> {
    pub fn new(conn: &'a C, schema: &SafeIdent, prefix: &ReservedPrefix) -> Result<Self> {
        Ok(Self {
            conn: conn.traced(),
            sql: StoreSql::new(schema, prefix)?,
        })
    }

    /// The quoted, schema-qualified config table.
    pub fn table(&self) -> &str {
        &self.sql.table
    }
}

impl<C: Connection> ConfigStore for PgConfigStore<'_, C> {
    async fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute(&self.sql.create_table(), &[])
            .await
            .map_err(|e| Error::store("ensure_schema", None, e))?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredTableConfig>> {
        let rows = self
            .conn
            .query(&self.sql.select_all(), &[])
            .await
            .map_err(|e| Error::store("get_all", None, e))?;
        rows.iter().map(|row| config_from_row("get_all", row)).collect()
    }

    async fn get(&self, name: &str) -> Result<Option<StoredTableConfig>> {
        let row = self
            .conn
            .query_opt(&self.sql.select_one(), &[&name])
            .await
            .map_err(|e| Error::store("get", Some(name), e))?;
        row.as_ref().map(|row| config_from_row("get", row)).transpose()
    }

    #[tracing::instrument(skip_all, fields(table = %config.name))]
    async fn upsert(&self, config: &StoredTableConfig) -> Result<()> {
        let model = encode(&config.name, &config.model)?;
        let settings = encode(&config.name, &config.settings)?;
        self.conn
            .execute(
                &self.sql.upsert(),
                &[
                    &config.name,
                    &config.label,
                    &config.description,
                    &model,
                    &settings,
                ],
            )
            .await
            .map_err(|e| Error::store("upsert", Some(&config.name), e))?;
        tracing::debug!("upserted table config");
        Ok(())
    }

    async fn delete_where_name_not_in(&self, keep: &[String]) -> Result<u64> {
        self.conn
            .execute(&self.sql.delete_not_in(), &[&keep])
            .await
            .map_err(|e| Error::store("delete_where_name_not_in", None, e))
    }

    async fn begin_exclusive(&self) -> Result<()> {
        self.conn
            .execute("BEGIN", &[])
            .await
            .map_err(|e| Error::store("begin", None, e))?;
        if let Err(e) = self
            .conn
            .execute("SELECT pg_advisory_xact_lock($1)", &[&self.sql.lock_key])
            .await
        {
            if let Err(rollback) = self.conn.execute("ROLLBACK", &[]).await {
                tracing::warn!(error = %rollback, "rollback after failed advisory lock also failed");
            }
            return Err(Error::store("advisory_lock", None, e));
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn
            .execute("COMMIT", &[])
            .await
            .map_err(|e| Error::store("commit", None, e))?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.conn
            .execute("ROLLBACK", &[])
            .await
            .map_err(|e| Error::store("rollback", None, e))?;
        Ok(())
    }
}

fn encode<T: serde::Serialize>(table: &str, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|source| Error::MalformedConfig {
        table: table.to_string(),
        source,
    })
}

fn config_from_row(operation: &'static str, row: &Row) -> Result<StoredTableConfig> {
    let name: String = row
        .try_get("name")
        .map_err(|e| Error::store(operation, None, e))?;
    let column = |e: tokio_postgres::Error| Error::store(operation, Some(&name), e);

    let label: Option<String> = row.try_get("label").map_err(column)?;
    let description: Option<String> = row.try_get("description").map_err(column)?;
    let model: Option<serde_json::Value> = row.try_get("model").map_err(column)?;
    let settings: Option<serde_json::Value> = row.try_get("settings").map_err(column)?;

    let model = decode_or_default::<IndexMap<String, StoredColumnConfig>>(&name, model)?;
    let settings = decode_or_default::<TableSettings>(&name, settings)?;

    Ok(StoredTableConfig {
        label: label.filter(|l| !l.is_empty()).unwrap_or_else(|| name.clone()),
        description: description.unwrap_or_default(),
        model,
        settings,
        name,
    })
}

/// SQL NULL and JSON `null` both mean "nothing stored yet".
fn decode_or_default<T>(table: &str, value: Option<serde_json::Value>) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match value {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(|source| Error::MalformedConfig {
            table: table.to_string(),
            source,
        }),
    }
}
