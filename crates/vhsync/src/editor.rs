//! The per-table editor: merged column views, settings saves, audit history.

use crate::{
    AuditEntry, AuditTriggerManager, AuditTriggerState, ConfigCache, ConfigStore, Connection,
    FormSync, Result, SchemaSource,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use vhsync_schema::{
    FieldType, LiveColumn, LiveTable, MergedColumn, StoredTableConfig, TableSettings,
    default_column_config, merge_columns,
};
use vhsync_sql::validate_ident;

/// Audit entries returned when the caller does not ask for a count.
pub const DEFAULT_RECENT_CHANGES: i64 = 5;

/// What the editor renders for one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub table: String,
    pub label: String,
    pub description: String,
    pub columns: Vec<MergedColumn>,
    pub settings: TableSettings,
}

/// Changes submitted from the editor. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSettingsUpdate {
    pub label: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub columns: IndexMap<String, ColumnSettingsUpdate>,
    pub audit_logging_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSettingsUpdate {
    pub label: Option<String>,
    #[serde(alias = "help_text")]
    pub help_text: Option<String>,
    #[serde(alias = "external_field_type")]
    pub external_field_type: Option<FieldType>,
    #[serde(alias = "extra_options")]
    pub extra_options: Option<Map<String, Value>>,
}

pub struct TableEditor<'a, L, S, C, F>
where
    L: SchemaSource,
    S: ConfigStore,
    C: Connection,
    F: FormSync,
{
    live: &'a L,
    store: &'a S,
    audit: &'a AuditTriggerManager<'a, C>,
    form_sync: &'a F,
}

impl<'a, L, S, C, F> TableEditor<'a, L, S, C, F>
where
    L: SchemaSource,
    S: ConfigStore,
    C: Connection,
    F: FormSync,
{
    pub fn new(
        live: &'a L,
        store: &'a S,
        audit: &'a AuditTriggerManager<'a, C>,
        form_sync: &'a F,
    ) -> Self {
        Self {
            live,
            store,
            audit,
            form_sync,
        }
    }

    /// Live columns merged with whatever is stored for `table`.
    ///
    /// A table nobody has configured yet gets default settings.
    #[tracing::instrument(skip(self, cache))]
    pub async fn load_table_view(&self, table: &str, cache: &mut ConfigCache) -> Result<TableView> {
        validate_ident(table)?;
        let columns = self.live.list_live_columns(table).await?;
        let config = cache
            .get_or_load(self.store, table)
            .await?
            .unwrap_or_else(|| StoredTableConfig::new(table));
        Ok(view(&config, &columns))
    }

    /// Apply `update` to the stored config of `table`.
    ///
    /// Every live column ends up in the stored model, defaulted unless
    /// customized. Audit trigger DDL runs before the config write, so a
    /// failed trigger change leaves the stored record as it was; if the write
    /// itself fails, the trigger toggle is reverted. Column updates for
    /// columns that are not live are dropped; stored entries for such columns
    /// are kept until the next synchronize.
    #[tracing::instrument(skip(self, update, cache))]
    pub async fn save_table_settings(
        &self,
        table: &str,
        update: TableSettingsUpdate,
        cache: &mut ConfigCache,
    ) -> Result<TableView> {
        validate_ident(table)?;
        let columns = self.live.list_live_columns(table).await?;
        let mut config = match self.store.get(table).await? {
            Some(config) => config,
            None => self.first_config(table, &columns).await?,
        };
        for live in &columns {
            config
                .model
                .entry(live.column_name.clone())
                .or_insert_with(|| default_column_config(live));
        }

        if let Some(label) = update.label {
            config.label = if label.trim().is_empty() {
                table.to_string()
            } else {
                label
            };
        }
        if let Some(description) = update.description {
            config.description = description;
        }

        for (name, changes) in update.columns {
            let Some(live) = columns.iter().find(|c| c.column_name == name) else {
                warn!(column = %name, "ignoring settings for a column that is not live");
                continue;
            };
            let entry = config
                .model
                .entry(name)
                .or_insert_with(|| default_column_config(live));
            if let Some(label) = changes.label {
                entry.label = label;
            }
            if let Some(help_text) = changes.help_text {
                entry.help_text = help_text;
            }
            if let Some(field_type) = changes.external_field_type {
                entry.external_field_type = field_type;
            }
            if let Some(extra_options) = changes.extra_options {
                entry.extra_options = extra_options;
            }
            entry.data_type = Some(live.data_type.clone());
        }

        let mut toggled = None;
        if let Some(enabled) = update.audit_logging_enabled {
            let state = AuditTriggerState::from_settings(&config.settings);
            if state.enabled() != enabled {
                self.audit.apply(table, &mut config.settings, enabled).await?;
                toggled = Some(enabled);
            }
        }

        if let Err(e) = self.store.upsert(&config).await {
            if let Some(enabled) = toggled {
                self.revert_audit(table, enabled).await;
            }
            return Err(e);
        }
        cache.invalidate(table);

        let view = view(&config, &columns);
        if let Err(e) = self
            .form_sync
            .sync_columns_to_form(table, &view.columns)
            .await
        {
            warn!(error = %e, "form sync failed");
        }
        Ok(view)
    }

    /// The record a first save starts from: every live column defaulted,
    /// description taken from the catalog.
    async fn first_config(&self, table: &str, columns: &[LiveColumn]) -> Result<StoredTableConfig> {
        let description = self
            .live
            .list_live_tables()
            .await?
            .into_iter()
            .find(|t| t.name == table)
            .and_then(|t| t.description);
        let live = LiveTable {
            name: table.to_string(),
            description,
            row_estimate: 0,
            columns: columns.to_vec(),
        };
        Ok(StoredTableConfig::reconciled(&live, None))
    }

    /// Undo a trigger toggle whose settings never got stored, so the
    /// trigger matches the record again.
    async fn revert_audit(&self, table: &str, enabled: bool) {
        let reverted = if enabled {
            self.audit.disable_audit_logging(table, true).await
        } else {
            self.audit.enable_audit_logging(table, true).await.map(|_| ())
        };
        if let Err(e) = reverted {
            warn!(error = %e, "could not revert audit trigger after a failed save");
        }
    }

    /// Push the current column layout of `table` to the form provider,
    /// returning any provider error.
    pub async fn sync_form(&self, table: &str, cache: &mut ConfigCache) -> Result<()> {
        let view = self.load_table_view(table, cache).await?;
        self.form_sync
            .sync_columns_to_form(table, &view.columns)
            .await
    }

    /// Newest audit entries for one record, [`DEFAULT_RECENT_CHANGES`] by default.
    pub async fn recent_changes(
        &self,
        table: &str,
        record_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<AuditEntry>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_CHANGES).max(1);
        self.audit.recent_changes(table, record_id, limit).await
    }
}

fn view(config: &StoredTableConfig, columns: &[LiveColumn]) -> TableView {
    TableView {
        table: config.name.clone(),
        label: config.label.clone(),
        description: config.description.clone(),
        columns: merge_columns(columns, &config.model),
        settings: config.settings.clone(),
    }
}
