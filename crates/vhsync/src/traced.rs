//! Connection abstraction and query tracing.
//!
//! Every engine operation is generic over [`Connection`], so the live
//! database and the config store can be the same client, two pooled objects,
//! or a test double. [`TracedConn`] wraps any of them and logs each statement.

use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::Instrument;

/// Boxed future returned by [`Connection`] methods.
pub type DbFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Statement parameters, as tokio-postgres takes them.
pub type Params<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Trait for database connections that can execute queries.
///
/// Implemented for `tokio_postgres::Client`, `deadpool_postgres::Object` and
/// [`TracedConn`].
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, u64>;

    /// Execute a query, returning all rows.
    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Vec<Row>>;

    /// Execute a query, returning at most one row.
    fn query_opt<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Option<Row>>;

    /// Execute a query, returning exactly one row.
    fn query_one<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Row>;
}

impl Connection for tokio_postgres::Client {
    fn execute<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, u64> {
        Box::pin(tokio_postgres::Client::execute(self, sql, params))
    }

    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_opt<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Option<Row>> {
        Box::pin(tokio_postgres::Client::query_opt(self, sql, params))
    }

    fn query_one<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Row> {
        Box::pin(tokio_postgres::Client::query_one(self, sql, params))
    }
}

impl Connection for deadpool_postgres::Object {
    // Deref to the underlying Client to avoid recursion
    fn execute<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, u64> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.execute(sql, params))
    }

    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Vec<Row>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.query(sql, params))
    }

    fn query_opt<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Option<Row>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.query_opt(sql, params))
    }

    fn query_one<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Row> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(client.query_one(sql, params))
    }
}

/// A wrapper around a database connection that logs all queries via tracing.
///
/// Each call runs inside a `db.execute` or `db.query` debug span that records
/// the SQL text, the parameter count and the number of rows seen. The wrapper
/// is itself a [`Connection`], so it can be handed to any engine component.
///
/// ```ignore
/// use vhsync::ConnectionExt;
///
/// let conn = pool.get().await?;
/// let traced = conn.traced();
/// traced.execute("SET search_path TO app", &[]).await?;
/// ```
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// The wrapped connection.
    pub fn inner(&self) -> &'a C {
        self.conn
    }
}

impl<C: Connection> Clone for TracedConn<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Connection> Copy for TracedConn<'_, C> {}

impl<C: Connection> Connection for TracedConn<'_, C> {
    fn execute<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, u64> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        Box::pin(async move {
            let affected = self
                .conn
                .execute(sql, params)
                .instrument(span.clone())
                .await?;
            span.record("affected", affected);
            Ok(affected)
        })
    }

    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Vec<Row>> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        Box::pin(async move {
            let rows = self
                .conn
                .query(sql, params)
                .instrument(span.clone())
                .await?;
            span.record("rows", rows.len());
            Ok(rows)
        })
    }

    fn query_opt<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Option<Row>> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        Box::pin(async move {
            let row = self
                .conn
                .query_opt(sql, params)
                .instrument(span.clone())
                .await?;
            span.record("rows", if row.is_some() { 1u64 } else { 0u64 });
            Ok(row)
        })
    }

    fn query_one<'a>(&'a self, sql: &'a str, params: Params<'a>) -> DbFuture<'a, Row> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = 1u64,
        );
        Box::pin(self.conn.query_one(sql, params).instrument(span))
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection + Sized {
    /// Wrap this connection in a `TracedConn` for query logging.
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection> ConnectionExt for C {}

/// A connection pool whose connections are meant to be used traced.
///
/// Checking out a connection is itself traced; callers wrap the returned
/// object with [`ConnectionExt::traced`].
#[derive(Clone)]
pub struct TracedPool {
    inner: deadpool_postgres::Pool,
}

impl TracedPool {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { inner: pool }
    }

    /// Check out a connection. It returns to the pool when dropped.
    pub async fn get(&self) -> crate::Result<deadpool_postgres::Object> {
        let span = tracing::debug_span!("db.pool.get");
        self.inner
            .get()
            .instrument(span)
            .await
            .map_err(|e| crate::Error::Connection {
                operation: "pool.get",
                source: Box::new(e),
            })
    }

    /// Get the inner pool (for cases where you need the raw pool).
    pub fn inner(&self) -> &deadpool_postgres::Pool {
        &self.inner
    }
}
