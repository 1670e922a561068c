//! Live-vs-stored differencing.
//!
//! [`diff`] is pure and deterministic. Output order:
//!
//! 1. walking live tables in the order given: `NewTable` for tables with no
//!    stored config, otherwise that table's column differences;
//! 2. then `DeletedTable` for every stored config with no live table, in
//!    stored order.
//!
//! Within one table, new and retyped columns follow live ordinal order, then
//! deleted columns follow stored order. A table reported as deleted gets no
//! column-level entries.

use crate::{LiveColumn, LiveTable, StoredColumnConfig, StoredTableConfig};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One way the stored configuration disagrees with the live schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    /// Live table with no stored config.
    NewTable { table_name: String },
    /// Stored config whose table is gone.
    DeletedTable { table_name: String },
    /// Live column missing from the stored model.
    NewColumn {
        table_name: String,
        column_name: String,
        data_type: String,
    },
    /// Stored column entry whose column is gone.
    DeletedColumn {
        table_name: String,
        column_name: String,
    },
    /// Column exists on both sides with different types.
    DataTypeChanged {
        table_name: String,
        column_name: String,
        /// Type recorded in the stored model, if any was recorded.
        old_type: Option<String>,
        new_type: String,
    },
}

impl Difference {
    pub fn table_name(&self) -> &str {
        match self {
            Difference::NewTable { table_name }
            | Difference::DeletedTable { table_name }
            | Difference::NewColumn { table_name, .. }
            | Difference::DeletedColumn { table_name, .. }
            | Difference::DataTypeChanged { table_name, .. } => table_name,
        }
    }

    pub fn column_name(&self) -> Option<&str> {
        match self {
            Difference::NewTable { .. } | Difference::DeletedTable { .. } => None,
            Difference::NewColumn { column_name, .. }
            | Difference::DeletedColumn { column_name, .. }
            | Difference::DataTypeChanged { column_name, .. } => Some(column_name.as_str()),
        }
    }

    /// Wire tag, e.g. `new_table`.
    pub fn kind(&self) -> &'static str {
        match self {
            Difference::NewTable { .. } => "new_table",
            Difference::DeletedTable { .. } => "deleted_table",
            Difference::NewColumn { .. } => "new_column",
            Difference::DeletedColumn { .. } => "deleted_column",
            Difference::DataTypeChanged { .. } => "data_type_change",
        }
    }

    /// Human-readable description.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difference::NewTable { table_name } => write!(
                f,
                "Table '{}' exists in the live database but is not saved in configuration.",
                table_name
            ),
            Difference::DeletedTable { table_name } => write!(
                f,
                "Table '{}' is saved in configuration but no longer exists in the live database.",
                table_name
            ),
            Difference::NewColumn {
                table_name,
                column_name,
                data_type,
            } => write!(
                f,
                "{} has a new {} column '{}'.",
                table_name, data_type, column_name
            ),
            Difference::DeletedColumn {
                table_name,
                column_name,
            } => write!(
                f,
                "Column '{}' has been removed from {}.",
                column_name, table_name
            ),
            Difference::DataTypeChanged {
                table_name,
                column_name,
                old_type,
                new_type,
            } => write!(
                f,
                "Column '{}.{}' data type changed from {} to {}.",
                table_name,
                column_name,
                old_type.as_deref().unwrap_or("unknown"),
                new_type
            ),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DifferenceRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    table_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    column_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_type: Option<&'a str>,
    message: String,
}

impl Serialize for Difference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (old_type, new_type) = match self {
            Difference::DataTypeChanged {
                old_type, new_type, ..
            } => (old_type.as_deref(), Some(new_type.as_str())),
            Difference::NewColumn { data_type, .. } => (None, Some(data_type.as_str())),
            _ => (None, None),
        };
        DifferenceRecord {
            kind: self.kind(),
            table_name: self.table_name(),
            column_name: self.column_name(),
            old_type,
            new_type,
            message: self.message(),
        }
        .serialize(serializer)
    }
}

/// Outcome of comparing live schema to stored config.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub tables: Vec<LiveTable>,
    pub differences: Vec<Difference>,
    /// Always `!differences.is_empty()`.
    pub sync_required: bool,
}

impl SyncResult {
    pub fn new(tables: Vec<LiveTable>, differences: Vec<Difference>) -> Self {
        let sync_required = !differences.is_empty();
        Self {
            tables,
            differences,
            sync_required,
        }
    }
}

/// Compare live tables against stored configs.
///
/// # Example
///
/// ```
/// use vhsync_schema::{LiveTable, StoredTableConfig, Difference, diff};
///
/// let live = vec![LiveTable {
///     name: "orders".to_string(),
///     description: None,
///     row_estimate: 0,
///     columns: vec![],
/// }];
/// let stored = vec![StoredTableConfig::new("invoices")];
///
/// let differences = diff(&live, &stored);
/// assert_eq!(differences.len(), 2);
/// assert!(matches!(&differences[0], Difference::NewTable { table_name } if table_name == "orders"));
/// assert!(matches!(&differences[1], Difference::DeletedTable { table_name } if table_name == "invoices"));
/// ```
pub fn diff(live: &[LiveTable], stored: &[StoredTableConfig]) -> Vec<Difference> {
    let mut differences = Vec::new();

    let stored_by_name: HashMap<&str, &StoredTableConfig> =
        stored.iter().map(|c| (c.name.as_str(), c)).collect();
    let live_names: HashSet<&str> = live.iter().map(|t| t.name.as_str()).collect();

    for table in live {
        match stored_by_name.get(table.name.as_str()) {
            None => differences.push(Difference::NewTable {
                table_name: table.name.clone(),
            }),
            Some(config) => {
                differences.extend(diff_columns(&table.name, &table.columns, &config.model));
            }
        }
    }

    let mut reported_deleted: HashSet<&str> = HashSet::new();
    for config in stored {
        if !live_names.contains(config.name.as_str()) && reported_deleted.insert(&config.name) {
            differences.push(Difference::DeletedTable {
                table_name: config.name.clone(),
            });
        }
    }

    differences
}

/// Column-level differences for a table present on both sides.
pub fn diff_columns(
    table_name: &str,
    live: &[LiveColumn],
    stored: &IndexMap<String, StoredColumnConfig>,
) -> Vec<Difference> {
    let mut differences = Vec::new();

    let mut live_ordered: Vec<&LiveColumn> = live.iter().collect();
    live_ordered.sort_by_key(|c| c.ordinal_position);
    let live_names: HashSet<&str> = live.iter().map(|c| c.column_name.as_str()).collect();

    for col in live_ordered {
        match stored.get(&col.column_name) {
            None => differences.push(Difference::NewColumn {
                table_name: table_name.to_string(),
                column_name: col.column_name.clone(),
                data_type: col.data_type.clone(),
            }),
            Some(saved) => {
                if saved.data_type.as_deref() != Some(col.data_type.as_str()) {
                    differences.push(Difference::DataTypeChanged {
                        table_name: table_name.to_string(),
                        column_name: col.column_name.clone(),
                        old_type: saved.data_type.clone(),
                        new_type: col.data_type.clone(),
                    });
                }
            }
        }
    }

    for column_name in stored.keys() {
        if !live_names.contains(column_name.as_str()) {
            differences.push(Difference::DeletedColumn {
                table_name: table_name.to_string(),
                column_name: column_name.clone(),
            });
        }
    }

    differences
}
