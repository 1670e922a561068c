//! Request-level entry points.
//!
//! [`SyncService`] owns the pools and the engine configuration. Each call
//! checks out the connections it needs and returns them to the pool when it
//! finishes, whether it succeeded or not.
//!
//! ```ignore
//! let service = vhsync::SyncService::from_config(vhsync::EngineConfig::from_env()?)?;
//! let mut cache = vhsync::ConfigCache::new();
//!
//! let status = service.check().await?;
//! if status.sync_required {
//!     service.synchronize(&mut cache).await?;
//! }
//! ```

use crate::reconcile::with_timeout;
use crate::{
    AuditEntry, AuditTriggerManager, ConfigCache, ConfigStore, EngineConfig, Error, FormSync,
    NoopFormSync, PgConfigStore, PgIntrospector, Reconciler, Result, TableEditor,
    TableSettingsUpdate, TableView, TracedPool, create_pool,
};
use deadpool_postgres::Object;
use vhsync_schema::SyncResult;

pub struct SyncService<F: FormSync = NoopFormSync> {
    live_pool: TracedPool,
    /// `None` when the config store lives in the user's database.
    config_pool: Option<TracedPool>,
    config: EngineConfig,
    reconciler: Reconciler<F>,
}

impl SyncService<NoopFormSync> {
    /// Build pools for the configured databases. No connection is opened yet.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let live_pool = create_pool(&config.database_url, config.pool_size)?;
        let config_pool = if config.has_separate_config_db() {
            Some(create_pool(config.config_url(), config.pool_size)?)
        } else {
            None
        };
        Ok(Self::new(live_pool, config_pool, config))
    }

    pub fn new(live_pool: TracedPool, config_pool: Option<TracedPool>, config: EngineConfig) -> Self {
        let reconciler =
            Reconciler::new(config.reserved_prefix.clone(), config.operation_timeout);
        Self {
            live_pool,
            config_pool,
            config,
            reconciler,
        }
    }
}

impl<F: FormSync> SyncService<F> {
    pub fn with_form_sync<G: FormSync>(self, form_sync: G) -> SyncService<G> {
        SyncService {
            live_pool: self.live_pool,
            config_pool: self.config_pool,
            reconciler: self.reconciler.with_form_sync(form_sync),
            config: self.config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn checkout(&self, pool: &TracedPool) -> Result<Object> {
        with_timeout("pool.get", self.config.operation_timeout, pool.get()).await
    }

    /// A live connection, plus a config connection when the store has its own database.
    async fn connections(&self) -> Result<(Object, Option<Object>)> {
        let live = self.checkout(&self.live_pool).await?;
        let config = self.checkout_config().await?;
        Ok((live, config))
    }

    /// An unreachable config database is a store failure, not a live one.
    async fn checkout_config(&self) -> Result<Option<Object>> {
        match &self.config_pool {
            Some(pool) => self
                .checkout(pool)
                .await
                .map(Some)
                .map_err(Error::config_store),
            None => Ok(None),
        }
    }

    /// Whether stored config has drifted from the live schema.
    ///
    /// Creates the config table if it is missing; writes nothing else.
    pub async fn check(&self) -> Result<SyncResult> {
        with_timeout("check", self.config.operation_timeout, async {
            let (live, separate) = self.connections().await?;
            let config_conn = separate.as_ref().unwrap_or(&live);

            let source = self.introspector(&live);
            let store = self.store(config_conn)?;
            store.ensure_schema().await?;
            self.reconciler.reconcile(&source, &store).await
        })
        .await
    }

    /// Checkout and the reconciliation pass are each bounded by the operation timeout.
    pub async fn synchronize(&self, cache: &mut ConfigCache) -> Result<SyncResult> {
        let (live, separate) = self.connections().await?;
        let config_conn = separate.as_ref().unwrap_or(&live);

        let source = self.introspector(&live);
        let store = self.store(config_conn)?;
        self.reconciler.synchronize(&source, &store, cache).await
    }

    pub async fn table_view(&self, table: &str, cache: &mut ConfigCache) -> Result<TableView> {
        with_timeout("table_view", self.config.operation_timeout, async {
            let (live, separate) = self.connections().await?;
            let config_conn = separate.as_ref().unwrap_or(&live);

            let source = self.introspector(&live);
            let store = self.store(config_conn)?;
            let audit = self.audit(&live)?;
            let editor = TableEditor::new(&source, &store, &audit, self.reconciler.form_sync());
            editor.load_table_view(table, cache).await
        })
        .await
    }

    pub async fn save_table_settings(
        &self,
        table: &str,
        update: TableSettingsUpdate,
        cache: &mut ConfigCache,
    ) -> Result<TableView> {
        with_timeout("save_table_settings", self.config.operation_timeout, async {
            let (live, separate) = self.connections().await?;
            let config_conn = separate.as_ref().unwrap_or(&live);

            let source = self.introspector(&live);
            let store = self.store(config_conn)?;
            store.ensure_schema().await?;
            let audit = self.audit(&live)?;
            let editor = TableEditor::new(&source, &store, &audit, self.reconciler.form_sync());
            editor.save_table_settings(table, update, cache).await
        })
        .await
    }

    pub async fn recent_changes(
        &self,
        table: &str,
        record_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<AuditEntry>> {
        with_timeout("recent_changes", self.config.operation_timeout, async {
            let live = self.checkout(&self.live_pool).await?;
            let source = self.introspector(&live);
            let store = self.store(&live)?;
            let audit = self.audit(&live)?;
            let editor = TableEditor::new(&source, &store, &audit, self.reconciler.form_sync());
            editor.recent_changes(table, record_id, limit).await
        })
        .await
    }

    fn introspector<'c>(&self, conn: &'c Object) -> PgIntrospector<'c, Object> {
        PgIntrospector::new(
            conn,
            self.config.schema.clone(),
            self.config.reserved_prefix.clone(),
        )
    }

    fn store<'c>(&self, conn: &'c Object) -> Result<PgConfigStore<'c, Object>> {
        PgConfigStore::new(conn, &self.config.schema, &self.config.reserved_prefix)
    }

    fn audit<'c>(&self, conn: &'c Object) -> Result<AuditTriggerManager<'c, Object>> {
        AuditTriggerManager::new(
            conn,
            self.config.schema.clone(),
            self.config.reserved_prefix.clone(),
        )
    }
}
