//! Pool construction.

use crate::{Error, Result, TracedPool};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

/// Build a connection pool for `url` holding at most `max_size` connections.
///
/// No connection is opened here; the first [`TracedPool::get`] does that.
pub fn create_pool(url: &str, max_size: usize) -> Result<TracedPool> {
    let pg_config: tokio_postgres::Config = url.parse().map_err(|e| Error::Connection {
        operation: "create_pool",
        source: Box::new(e),
    })?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);

    let pool = Pool::builder(mgr)
        .max_size(max_size)
        .build()
        .map_err(|e| Error::Connection {
            operation: "create_pool",
            source: Box::new(e),
        })?;
    Ok(TracedPool::new(pool))
}
