//! Pushing column layouts to the external form provider.
//!
//! The provider's HTTP API is not part of this crate. Implementors of
//! [`FormSync`] get the merged columns; [`FormPayload`] builds the body the
//! provider expects.

use crate::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use uuid::Uuid;
use vhsync_schema::MergedColumn;

pub trait FormSync: Send + Sync {
    fn sync_columns_to_form(
        &self,
        table: &str,
        columns: &[MergedColumn],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Does nothing. The default when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFormSync;

impl FormSync for NoopFormSync {
    async fn sync_columns_to_form(&self, table: &str, columns: &[MergedColumn]) -> Result<()> {
        tracing::debug!(table, columns = columns.len(), "form sync disabled");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormPayload {
    pub status: &'static str,
    pub blocks: Vec<FormBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormBlock {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub group_uuid: Uuid,
    pub payload: Map<String, Value>,
}

impl FormPayload {
    pub const PUBLISHED: &'static str = "PUBLISHED";

    /// One block per column, in column order, with fresh ids.
    pub fn from_columns(columns: &[MergedColumn]) -> Self {
        let blocks = columns
            .iter()
            .map(|column| {
                let mut payload = Map::new();
                payload.insert("html".to_string(), Value::String(column.label.clone()));
                payload.insert(
                    "help_text".to_string(),
                    Value::String(column.help_text.clone()),
                );
                for (key, value) in &column.extra_options {
                    payload.insert(key.clone(), value.clone());
                }
                FormBlock {
                    uuid: Uuid::new_v4(),
                    kind: column.external_field_type.provider_name(),
                    group_uuid: Uuid::new_v4(),
                    payload,
                }
            })
            .collect();
        Self {
            status: Self::PUBLISHED,
            blocks,
        }
    }
}
