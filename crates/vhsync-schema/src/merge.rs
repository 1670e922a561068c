//! Column merge: live catalog metadata + stored per-column settings.

use crate::{FieldType, LiveColumn, StoredColumnConfig};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// A live column with its effective user-facing settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedColumn {
    #[serde(flatten)]
    pub column: LiveColumn,
    pub label: String,
    pub help_text: String,
    pub external_field_type: FieldType,
    pub extra_options: Map<String, Value>,
}

/// Settings for a column nobody has customized yet.
pub fn default_column_config(column: &LiveColumn) -> StoredColumnConfig {
    StoredColumnConfig {
        label: column.column_name.clone(),
        help_text: String::new(),
        external_field_type: FieldType::for_data_type(&column.data_type),
        extra_options: Map::new(),
        data_type: Some(column.data_type.clone()),
        extra: Map::new(),
    }
}

/// Project live columns through the stored model.
///
/// Columns with no stored entry get [`default_column_config`]; an empty stored
/// label falls back to the column name. Read-only: `stored_model` is never
/// touched, and stored entries for columns that are not live are ignored.
pub fn merge_columns(
    live: &[LiveColumn],
    stored_model: &IndexMap<String, StoredColumnConfig>,
) -> Vec<MergedColumn> {
    live.iter()
        .map(|column| match stored_model.get(&column.column_name) {
            Some(saved) => MergedColumn {
                column: column.clone(),
                label: if saved.label.is_empty() {
                    column.column_name.clone()
                } else {
                    saved.label.clone()
                },
                help_text: saved.help_text.clone(),
                external_field_type: saved.external_field_type,
                extra_options: saved.extra_options.clone(),
            },
            None => {
                let defaults = default_column_config(column);
                MergedColumn {
                    column: column.clone(),
                    label: defaults.label,
                    help_text: defaults.help_text,
                    external_field_type: defaults.external_field_type,
                    extra_options: defaults.extra_options,
                }
            }
        })
        .collect()
}

/// The stored model a reconciliation pass writes for these live columns.
///
/// Entries are emitted in live ordinal order. Existing entries keep their
/// customizations and get their recorded type refreshed; missing ones are
/// defaulted; entries for columns that are no longer live are dropped.
pub fn reconciled_model(
    live: &[LiveColumn],
    existing: Option<&IndexMap<String, StoredColumnConfig>>,
) -> IndexMap<String, StoredColumnConfig> {
    let mut ordered: Vec<&LiveColumn> = live.iter().collect();
    ordered.sort_by_key(|c| c.ordinal_position);

    ordered
        .into_iter()
        .map(|column| {
            let config = match existing.and_then(|m| m.get(&column.column_name)) {
                Some(saved) => StoredColumnConfig {
                    data_type: Some(column.data_type.clone()),
                    ..saved.clone()
                },
                None => default_column_config(column),
            };
            (column.column_name.clone(), config)
        })
        .collect()
}
