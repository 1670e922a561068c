//! Live catalog introspection.
//!
//! Reads base tables and their columns straight from `pg_catalog`, skipping
//! dropped columns and any table owned by the engine (reserved prefix).

use crate::{Connection, ConnectionExt, Error, Result, TracedConn};
use std::future::Future;
use tokio_postgres::Row;
use vhsync_schema::{LiveColumn, LiveTable, normalize_data_type};
use vhsync_sql::{ReservedPrefix, SafeIdent};

/// Where live schema snapshots come from.
pub trait SchemaSource: Send + Sync {
    /// Base tables in the target schema, ordered by name, reserved tables excluded.
    fn list_live_tables(&self) -> impl Future<Output = Result<Vec<LiveTable>>> + Send;

    /// Columns of one table in ordinal order.
    ///
    /// An unknown or reserved table is a [`Error::CatalogQuery`].
    fn list_live_columns(
        &self,
        table: &str,
    ) -> impl Future<Output = Result<Vec<LiveColumn>>> + Send;
}

const LIST_TABLES_SQL: &str = r#"
SELECT
    c.relname::text AS name,
    obj_description(c.oid, 'pg_class') AS description,
    GREATEST(c.reltuples, 0)::bigint AS row_estimate,
    COALESCE(
        json_agg(
            json_build_object(
                'columnName', a.attname::text,
                'dataType', format_type(a.atttypid, a.atttypmod),
                'description', col_description(c.oid, a.attnum),
                'notNull', a.attnotnull,
                'defaultValue', pg_get_expr(d.adbin, d.adrelid),
                'ordinalPosition', a.attnum
            ) ORDER BY a.attnum
        ) FILTER (WHERE a.attnum IS NOT NULL),
        '[]'::json
    ) AS columns
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attribute a
    ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
LEFT JOIN pg_attrdef d
    ON d.adrelid = c.oid AND d.adnum = a.attnum
WHERE c.relkind IN ('r', 'p')
  AND n.nspname = $1::text
  AND left(c.relname::text, length($2::text)) <> $2::text
GROUP BY c.oid, c.relname
ORDER BY c.relname
"#;

const TABLE_EXISTS_SQL: &str = r#"
SELECT c.relname::text
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p')
  AND n.nspname = $1::text
  AND c.relname = $2::text
"#;

const LIST_COLUMNS_SQL: &str = r#"
SELECT
    a.attname::text AS column_name,
    format_type(a.atttypid, a.atttypmod) AS data_type,
    col_description(a.attrelid, a.attnum) AS description,
    a.attnotnull AS not_null,
    pg_get_expr(d.adbin, d.adrelid) AS default_value,
    a.attnum AS ordinal_position
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = $1::text
  AND c.relname = $2::text
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

/// [`SchemaSource`] backed by a Postgres connection.
pub struct PgIntrospector<'a, C: Connection> {
    conn: TracedConn<'a, C>,
    schema: SafeIdent,
    prefix: ReservedPrefix,
}

impl<'a, C: Connection> PgIntrospector<'a, C> {
    pub fn new(conn: &'a C, schema: SafeIdent, prefix: ReservedPrefix) -> Self {
        Self {
            conn: conn.traced(),
            schema,
            prefix,
        }
    }

    pub fn schema(&self) -> &SafeIdent {
        &self.schema
    }
}

impl<C: Connection> SchemaSource for PgIntrospector<'_, C> {
    #[tracing::instrument(skip(self), fields(schema = %self.schema.as_str()))]
    async fn list_live_tables(&self) -> Result<Vec<LiveTable>> {
        let rows = self
            .conn
            .query(LIST_TABLES_SQL, &[&self.schema.as_str(), &self.prefix.as_str()])
            .await
            .map_err(|e| Error::catalog("list_live_tables", None, e))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let table = table_from_row(row)?;
            // Reserved tables never leave this function.
            if self.prefix.matches(&table.name) {
                continue;
            }
            tables.push(table);
        }
        tracing::debug!(count = tables.len(), "listed live tables");
        Ok(tables)
    }

    #[tracing::instrument(skip(self), fields(schema = %self.schema.as_str()))]
    async fn list_live_columns(&self, table: &str) -> Result<Vec<LiveColumn>> {
        let table = SafeIdent::new(table)?;
        let name = table.as_str();

        let exists = self
            .conn
            .query_opt(TABLE_EXISTS_SQL, &[&self.schema.as_str(), &name])
            .await
            .map_err(|e| Error::catalog("list_live_columns", Some(name), e))?;
        if exists.is_none() || self.prefix.matches(name) {
            return Err(Error::CatalogQuery {
                operation: "list_live_columns",
                table: Some(name.to_string()),
                message: format!(
                    "relation {}.{} does not exist",
                    self.schema.as_str(),
                    name
                ),
                source: None,
            });
        }

        let rows = self
            .conn
            .query(LIST_COLUMNS_SQL, &[&self.schema.as_str(), &name])
            .await
            .map_err(|e| Error::catalog("list_live_columns", Some(name), e))?;

        rows.iter()
            .map(|row| {
                column_from_row(row).map_err(|e| Error::catalog("list_live_columns", Some(name), e))
            })
            .collect()
    }
}

fn table_from_row(row: &Row) -> Result<LiveTable> {
    let decode = |e: tokio_postgres::Error| Error::catalog("list_live_tables", None, e);
    let name: String = row.try_get("name").map_err(decode)?;
    let description: Option<String> = row.try_get("description").map_err(decode)?;
    let row_estimate: i64 = row.try_get("row_estimate").map_err(decode)?;
    let columns: serde_json::Value = row.try_get("columns").map_err(decode)?;

    let mut columns: Vec<LiveColumn> =
        serde_json::from_value(columns).map_err(|e| Error::CatalogQuery {
            operation: "list_live_tables",
            table: Some(name.clone()),
            message: format!("unexpected column metadata: {}", e),
            source: None,
        })?;
    for column in &mut columns {
        column.data_type = normalize_data_type(&column.data_type);
    }
    columns.sort_by_key(|c| c.ordinal_position);

    Ok(LiveTable {
        name,
        description,
        row_estimate: row_estimate.max(0) as u64,
        columns,
    })
}

fn column_from_row(row: &Row) -> std::result::Result<LiveColumn, tokio_postgres::Error> {
    let data_type: String = row.try_get("data_type")?;
    let ordinal: i16 = row.try_get("ordinal_position")?;
    Ok(LiveColumn {
        column_name: row.try_get("column_name")?,
        data_type: normalize_data_type(&data_type),
        description: row.try_get("description")?,
        not_null: row.try_get("not_null")?,
        default_value: row.try_get("default_value")?,
        ordinal_position: ordinal.max(0) as u32,
    })
}
