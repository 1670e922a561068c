//! Schema types for vhsync.
//!
//! Two views of the same tables live side by side:
//!
//! - **Live** ([`LiveTable`], [`LiveColumn`]): what the catalog of the
//!   connected database says right now. Recomputed on every request, never
//!   persisted.
//! - **Stored** ([`StoredTableConfig`], [`StoredColumnConfig`]): the
//!   user-facing configuration layer (labels, help text, form field types,
//!   audit settings), persisted one row per table.
//!
//! [`diff()`] compares the two, [`merge_columns`] projects them into the view
//! editors render.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

mod diff;
mod merge;

pub use diff::{Difference, SyncResult, diff, diff_columns};
pub use merge::{MergedColumn, default_column_config, merge_columns, reconciled_model};

/// A base table as seen in the live catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTable {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Planner row estimate, clamped at zero (never-analyzed tables report -1).
    #[serde(default)]
    pub row_estimate: u64,
    /// Columns in ordinal order.
    #[serde(default)]
    pub columns: Vec<LiveColumn>,
}

/// A column as seen in the live catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveColumn {
    pub column_name: String,
    /// Normalized type label, see [`normalize_data_type`].
    pub data_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    /// 1-based position, defines canonical column order.
    pub ordinal_position: u32,
}

/// Stored configuration for one table, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTableConfig {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Per-column settings keyed by column name, in stored order.
    #[serde(default)]
    pub model: IndexMap<String, StoredColumnConfig>,
    #[serde(default)]
    pub settings: TableSettings,
}

impl StoredTableConfig {
    /// A config with no customizations: label is the table name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            description: String::new(),
            model: IndexMap::new(),
            settings: TableSettings::default(),
        }
    }

    /// Build the config a reconciliation pass stores for `live`.
    ///
    /// Without a `prior` record, everything is defaulted. With one, its label,
    /// description, settings and per-column customizations are kept; columns
    /// that appeared since are defaulted and columns that vanished are dropped.
    pub fn reconciled(live: &LiveTable, prior: Option<&StoredTableConfig>) -> Self {
        let live_description = live.description.clone().unwrap_or_default();
        match prior {
            None => Self {
                name: live.name.clone(),
                label: live.name.clone(),
                description: live_description,
                model: reconciled_model(&live.columns, None),
                settings: TableSettings::default(),
            },
            Some(prior) => Self {
                name: live.name.clone(),
                label: if prior.label.is_empty() {
                    live.name.clone()
                } else {
                    prior.label.clone()
                },
                description: if prior.description.is_empty() {
                    live_description
                } else {
                    prior.description.clone()
                },
                model: reconciled_model(&live.columns, Some(&prior.model)),
                settings: prior.settings.clone(),
            },
        }
    }
}

/// Stored settings for one column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredColumnConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "description", alias = "help_text")]
    pub help_text: String,
    #[serde(default, alias = "external_field_type")]
    pub external_field_type: FieldType,
    /// Field-type specific parameters, passed through to the form provider.
    #[serde(default, alias = "extra_options")]
    pub extra_options: Map<String, Value>,
    /// Live type observed when this entry was last written.
    #[serde(default, alias = "data_type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Keys this version does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Table-level flags.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSettings {
    #[serde(default, alias = "audit_logging_enabled")]
    pub audit_logging_enabled: bool,
    #[serde(default, alias = "audit_trigger_created")]
    pub audit_trigger_created: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Field types of the external form provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    #[default]
    ShortText,
    LongText,
    Number,
    Checkbox,
    Date,
    Email,
    Url,
    Dropdown,
}

impl FieldType {
    /// Default field type for a normalized Postgres type label.
    pub fn for_data_type(data_type: &str) -> Self {
        match data_type {
            "text" | "uuid" => FieldType::ShortText,
            "integer" => FieldType::Number,
            "boolean" => FieldType::Checkbox,
            t if t.starts_with("timestamp") => FieldType::Date,
            _ => FieldType::ShortText,
        }
    }

    /// The kebab-case name used in stored config.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::ShortText => "short-text",
            FieldType::LongText => "long-text",
            FieldType::Number => "number",
            FieldType::Checkbox => "checkbox",
            FieldType::Date => "date",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Dropdown => "dropdown",
        }
    }

    /// The block type name the form provider expects.
    pub fn provider_name(&self) -> &'static str {
        match self {
            FieldType::ShortText => "INPUT_TEXT",
            FieldType::LongText => "TEXTAREA",
            FieldType::Number => "INPUT_NUMBER",
            FieldType::Checkbox => "CHECKBOX",
            FieldType::Date => "INPUT_DATE",
            FieldType::Email => "INPUT_EMAIL",
            FieldType::Url => "INPUT_LINK",
            FieldType::Dropdown => "DROPDOWN",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a `format_type()` label to its canonical short form.
///
/// ```
/// use vhsync_schema::normalize_data_type;
/// assert_eq!(normalize_data_type("timestamp with time zone"), "timestamptz");
/// assert_eq!(normalize_data_type("timestamp(3) with time zone"), "timestamptz(3)");
/// assert_eq!(normalize_data_type("character varying(255)"), "varchar(255)");
/// assert_eq!(normalize_data_type("integer"), "integer");
/// ```
pub fn normalize_data_type(raw: &str) -> String {
    let t = raw.trim();

    if let Some(base) = t.strip_suffix(" with time zone") {
        if let Some(modifier) = base.strip_prefix("timestamp") {
            return format!("timestamptz{}", modifier);
        }
        if let Some(modifier) = base.strip_prefix("time") {
            return format!("timetz{}", modifier);
        }
    }
    if let Some(base) = t.strip_suffix(" without time zone") {
        return base.to_string();
    }
    if let Some(rest) = t.strip_prefix("character varying") {
        return format!("varchar{}", rest);
    }

    t.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_data_type() {
        assert_eq!(normalize_data_type("timestamp with time zone"), "timestamptz");
        assert_eq!(normalize_data_type("timestamp without time zone"), "timestamp");
        assert_eq!(normalize_data_type("timestamp(6) without time zone"), "timestamp(6)");
        assert_eq!(normalize_data_type("time with time zone"), "timetz");
        assert_eq!(normalize_data_type("character varying"), "varchar");
        assert_eq!(normalize_data_type("  numeric(10,2) "), "numeric(10,2)");
        assert_eq!(normalize_data_type("text[]"), "text[]");
    }

    #[test]
    fn test_default_field_types() {
        assert_eq!(FieldType::for_data_type("text"), FieldType::ShortText);
        assert_eq!(FieldType::for_data_type("integer"), FieldType::Number);
        assert_eq!(FieldType::for_data_type("boolean"), FieldType::Checkbox);
        assert_eq!(FieldType::for_data_type("uuid"), FieldType::ShortText);
        assert_eq!(FieldType::for_data_type("timestamptz"), FieldType::Date);
        assert_eq!(FieldType::for_data_type("timestamp"), FieldType::Date);
        assert_eq!(FieldType::for_data_type("timestamptz(3)"), FieldType::Date);
        assert_eq!(FieldType::for_data_type("jsonb"), FieldType::ShortText);
        assert_eq!(FieldType::for_data_type("numeric"), FieldType::ShortText);
    }

    #[test]
    fn test_stored_column_config_tolerates_unknown_and_legacy_keys() {
        let raw = json!({
            "label": "Email address",
            "description": "Where we send receipts",
            "externalFieldType": "email",
            "data_type": "text",
            "placeholder": "you@example.com"
        });
        let cfg: StoredColumnConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(cfg.label, "Email address");
        assert_eq!(cfg.help_text, "Where we send receipts");
        assert_eq!(cfg.external_field_type, FieldType::Email);
        assert_eq!(cfg.data_type.as_deref(), Some("text"));
        assert_eq!(cfg.extra.get("placeholder"), Some(&json!("you@example.com")));

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["helpText"], json!("Where we send receipts"));
        assert_eq!(back["dataType"], json!("text"));
        assert_eq!(back["placeholder"], json!("you@example.com"));
    }

    #[test]
    fn test_table_settings_defaults_and_extras() {
        let settings: TableSettings = serde_json::from_value(json!({})).unwrap();
        assert!(!settings.audit_logging_enabled);
        assert!(!settings.audit_trigger_created);

        let settings: TableSettings = serde_json::from_value(json!({
            "auditLoggingEnabled": true,
            "auditTriggerCreated": true,
            "theme": "dark"
        }))
        .unwrap();
        assert!(settings.audit_logging_enabled);
        assert!(settings.audit_trigger_created);
        assert_eq!(settings.extra.get("theme"), Some(&json!("dark")));
    }

    #[test]
    fn test_field_type_wire_names() {
        assert_eq!(
            serde_json::to_value(FieldType::ShortText).unwrap(),
            json!("short-text")
        );
        assert_eq!(FieldType::Checkbox.provider_name(), "CHECKBOX");
        assert_eq!(FieldType::Date.to_string(), "date");
    }

    fn live_col(name: &str, data_type: &str, pos: u32) -> LiveColumn {
        LiveColumn {
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            description: None,
            not_null: false,
            default_value: None,
            ordinal_position: pos,
        }
    }

    #[test]
    fn test_reconciled_without_prior_defaults_everything() {
        let live = LiveTable {
            name: "customers".to_string(),
            description: Some("People who pay us".to_string()),
            row_estimate: 10,
            columns: vec![live_col("id", "uuid", 1), live_col("is_active", "boolean", 2)],
        };
        let cfg = StoredTableConfig::reconciled(&live, None);
        assert_eq!(cfg.label, "customers");
        assert_eq!(cfg.description, "People who pay us");
        assert_eq!(cfg.settings, TableSettings::default());
        assert_eq!(
            cfg.model.keys().collect::<Vec<_>>(),
            vec!["id", "is_active"]
        );
        assert_eq!(cfg.model["is_active"].external_field_type, FieldType::Checkbox);
        assert_eq!(cfg.model["is_active"].data_type.as_deref(), Some("boolean"));
    }

    #[test]
    fn test_reconciled_keeps_customizations() {
        let live = LiveTable {
            name: "customers".to_string(),
            description: None,
            row_estimate: 0,
            columns: vec![live_col("id", "uuid", 1), live_col("email", "text", 2)],
        };
        let mut prior = StoredTableConfig::new("customers");
        prior.label = "Customers".to_string();
        prior.settings.audit_logging_enabled = true;
        prior.settings.audit_trigger_created = true;
        prior.model.insert(
            "email".to_string(),
            StoredColumnConfig {
                label: "E-mail".to_string(),
                external_field_type: FieldType::Email,
                data_type: Some("varchar(255)".to_string()),
                ..Default::default()
            },
        );
        prior
            .model
            .insert("legacy".to_string(), StoredColumnConfig::default());

        let cfg = StoredTableConfig::reconciled(&live, Some(&prior));
        assert_eq!(cfg.label, "Customers");
        assert!(cfg.settings.audit_logging_enabled);
        assert!(cfg.settings.audit_trigger_created);
        assert_eq!(cfg.model.keys().collect::<Vec<_>>(), vec!["id", "email"]);
        assert_eq!(cfg.model["email"].label, "E-mail");
        assert_eq!(cfg.model["email"].external_field_type, FieldType::Email);
        // type refreshed to live so the next diff is clean
        assert_eq!(cfg.model["email"].data_type.as_deref(), Some("text"));

        // reconciling the result again changes nothing
        assert_eq!(StoredTableConfig::reconciled(&live, Some(&cfg)), cfg);
    }
}
