//! Bringing stored config in line with the live schema.

use crate::{ConfigCache, ConfigStore, Error, FormSync, NoopFormSync, Result, SchemaSource};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use vhsync_schema::{
    LiveTable, MergedColumn, StoredTableConfig, SyncResult, diff, merge_columns,
};
use vhsync_sql::ReservedPrefix;

/// Run `fut`, giving up with [`Error::Timeout`] after `after`.
pub(crate) async fn with_timeout<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { operation, after }),
    }
}

/// Drives introspection, diffing and config writes.
pub struct Reconciler<F: FormSync = NoopFormSync> {
    prefix: ReservedPrefix,
    timeout: Duration,
    form_sync: F,
}

struct Pass {
    result: SyncResult,
    upserted: usize,
    deleted: u64,
    to_sync: Vec<(String, Vec<MergedColumn>)>,
}

impl Reconciler<NoopFormSync> {
    pub fn new(prefix: ReservedPrefix, timeout: Duration) -> Self {
        Self {
            prefix,
            timeout,
            form_sync: NoopFormSync,
        }
    }
}

impl<F: FormSync> Reconciler<F> {
    pub fn with_form_sync<G: FormSync>(self, form_sync: G) -> Reconciler<G> {
        Reconciler {
            prefix: self.prefix,
            timeout: self.timeout,
            form_sync,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn form_sync(&self) -> &F {
        &self.form_sync
    }

    /// Compare live schema with stored config. Writes nothing.
    #[tracing::instrument(skip_all)]
    pub async fn reconcile<L: SchemaSource, S: ConfigStore>(
        &self,
        live: &L,
        store: &S,
    ) -> Result<SyncResult> {
        with_timeout("reconcile", self.timeout, async {
            let tables = self.live_tables(live).await?;
            let stored = store.get_all().await?;
            let differences = diff(&tables, &stored);
            info!(
                tables = tables.len(),
                stored = stored.len(),
                differences = differences.len(),
                "reconciled"
            );
            Ok(SyncResult::new(tables, differences))
        })
        .await
    }

    /// Rewrite stored config to match the live schema.
    ///
    /// Upserts every live table whose config would change, then deletes the
    /// configs of tables that are gone, all in one locked transaction. The
    /// returned differences are the ones this pass resolved. `cache` is
    /// cleared once the transaction commits; form sync runs after that and
    /// its failures are only logged.
    #[tracing::instrument(skip_all)]
    pub async fn synchronize<L: SchemaSource, S: ConfigStore>(
        &self,
        live: &L,
        store: &S,
        cache: &mut ConfigCache,
    ) -> Result<SyncResult> {
        let outcome = with_timeout("synchronize", self.timeout, async {
            store.ensure_schema().await?;
            store.begin_exclusive().await?;
            match self.apply(live, store).await {
                Ok(pass) => {
                    store.commit().await?;
                    Ok(pass)
                }
                Err(e) => {
                    if let Err(rollback) = store.rollback().await {
                        warn!(error = %rollback, "rollback after failed synchronize also failed");
                    }
                    Err(e)
                }
            }
        })
        .await;

        let pass = match outcome {
            Ok(pass) => pass,
            Err(e @ Error::Timeout { .. }) => {
                warn!("synchronize timed out, rolling back");
                match with_timeout("rollback", self.timeout, store.rollback()).await {
                    Ok(()) => {}
                    Err(rollback) => warn!(error = %rollback, "best-effort rollback failed"),
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        cache.clear();
        info!(
            upserted = pass.upserted,
            deleted = pass.deleted,
            differences = pass.result.differences.len(),
            "synchronized"
        );

        for (table, columns) in &pass.to_sync {
            if let Err(e) = self.form_sync.sync_columns_to_form(table, columns).await {
                warn!(table = %table, error = %e, "form sync failed");
            }
        }

        Ok(pass.result)
    }

    async fn apply<L: SchemaSource, S: ConfigStore>(&self, live: &L, store: &S) -> Result<Pass> {
        let tables = self.live_tables(live).await?;
        let stored = store.get_all().await?;
        let differences = diff(&tables, &stored);

        let prior: HashMap<&str, &StoredTableConfig> =
            stored.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut upserted = 0;
        let mut to_sync = Vec::new();
        for table in &tables {
            let prior = prior.get(table.name.as_str()).copied();
            let config = StoredTableConfig::reconciled(table, prior);
            if prior == Some(&config) {
                continue;
            }
            store.upsert(&config).await?;
            debug!(table = %config.name, created = prior.is_none(), "upserted config");
            upserted += 1;
            to_sync.push((
                config.name.clone(),
                merge_columns(&table.columns, &config.model),
            ));
        }

        // Only after every upsert: an interrupted pass never loses a live table.
        let keep: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        let deleted = store.delete_where_name_not_in(&keep).await?;

        Ok(Pass {
            result: SyncResult::new(tables, differences),
            upserted,
            deleted,
            to_sync,
        })
    }

    async fn live_tables<L: SchemaSource>(&self, live: &L) -> Result<Vec<LiveTable>> {
        let mut tables = live.list_live_tables().await?;
        tables.retain(|t| !self.prefix.matches(&t.name));
        Ok(tables)
    }
}
