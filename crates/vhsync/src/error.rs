use std::time::Duration;
use thiserror::Error;
use vhsync_sql::IdentError;

/// Boxed error from a collaborator (pool, connector) we don't name.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot reach database during {operation}: {source}")]
    Connection {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("catalog query {operation} failed{}: {message}", on_table(.table))]
    CatalogQuery {
        operation: &'static str,
        table: Option<String>,
        message: String,
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    #[error("config store unavailable during {operation}{}: {source}", on_table(.table))]
    StoreUnavailable {
        operation: &'static str,
        table: Option<String>,
        #[source]
        source: BoxError,
    },

    #[error("schema change {operation} failed on table {table}: {source}")]
    SchemaMutation {
        operation: &'static str,
        table: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentError),

    #[error("stored config for table {table} is malformed: {source}")]
    MalformedConfig {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("form sync for table {table} failed: {message}")]
    FormSync { table: String, message: String },
}

fn on_table(table: &Option<String>) -> String {
    match table {
        Some(t) => format!(" on table {}", t),
        None => String::new(),
    }
}

impl Error {
    /// Classify a driver error seen while reading the live catalog.
    ///
    /// A closed connection is a connection problem, whatever query hit it.
    pub(crate) fn catalog(
        operation: &'static str,
        table: Option<&str>,
        source: tokio_postgres::Error,
    ) -> Self {
        if source.is_closed() {
            return Error::Connection {
                operation,
                source: Box::new(source),
            };
        }
        Error::CatalogQuery {
            operation,
            table: table.map(str::to_string),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Any failure on the config connection, closed or not, means the
    /// store is unavailable.
    pub(crate) fn store(
        operation: &'static str,
        table: Option<&str>,
        source: tokio_postgres::Error,
    ) -> Self {
        Error::StoreUnavailable {
            operation,
            table: table.map(str::to_string),
            source: Box::new(source),
        }
    }

    /// Re-label a failed checkout of the config database.
    pub(crate) fn config_store(self) -> Self {
        match self {
            Error::Connection { operation, source } => Error::StoreUnavailable {
                operation,
                table: None,
                source,
            },
            other => other,
        }
    }

    pub(crate) fn mutation(
        operation: &'static str,
        table: &str,
        source: tokio_postgres::Error,
    ) -> Self {
        if source.is_closed() {
            return Error::Connection {
                operation,
                source: Box::new(source),
            };
        }
        Error::SchemaMutation {
            operation,
            table: table.to_string(),
            source,
        }
    }

    /// The table this error is about, when there is one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Error::CatalogQuery { table, .. } | Error::StoreUnavailable { table, .. } => {
                table.as_deref()
            }
            Error::SchemaMutation { table, .. }
            | Error::MalformedConfig { table, .. }
            | Error::FormSync { table, .. } => Some(table),
            Error::Connection { .. }
            | Error::InvalidIdentifier(_)
            | Error::Timeout { .. } => None,
        }
    }
}
