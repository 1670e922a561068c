//! In-memory collaborators for engine tests.

use crate::traced::{DbFuture, Params};
use crate::{ConfigStore, Connection, Error, Result, SchemaSource};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio_postgres::Row;
use vhsync_schema::{LiveColumn, LiveTable, StoredTableConfig};

/// A real driver error, without a server.
pub fn injected_error() -> tokio_postgres::Error {
    "vhsync_injected_failure=1"
        .parse::<tokio_postgres::Config>()
        .unwrap_err()
}

/// Records every statement; never returns rows.
#[derive(Default)]
pub struct RecordingConn {
    statements: Mutex<Vec<String>>,
    fail_on: Vec<String>,
}

impl RecordingConn {
    /// Fails any statement containing `needle`.
    pub fn failing_on(needle: &str) -> Self {
        Self::default().also_failing_on(needle)
    }

    pub fn also_failing_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn take_statements(&self) -> Vec<String> {
        std::mem::take(&mut *self.statements.lock().unwrap())
    }

    fn record(&self, sql: &str) -> std::result::Result<(), tokio_postgres::Error> {
        self.statements.lock().unwrap().push(sql.to_string());
        if self.fail_on.iter().any(|needle| sql.contains(needle.as_str())) {
            return Err(injected_error());
        }
        Ok(())
    }
}

impl Connection for RecordingConn {
    fn execute<'a>(&'a self, sql: &'a str, _params: Params<'a>) -> DbFuture<'a, u64> {
        let result = self.record(sql).map(|_| 0u64);
        Box::pin(async move { result })
    }

    fn query<'a>(&'a self, sql: &'a str, _params: Params<'a>) -> DbFuture<'a, Vec<Row>> {
        let result = self.record(sql).map(|_| Vec::<Row>::new());
        Box::pin(async move { result })
    }

    fn query_opt<'a>(&'a self, sql: &'a str, _params: Params<'a>) -> DbFuture<'a, Option<Row>> {
        let result = self.record(sql).map(|_| Option::<Row>::None);
        Box::pin(async move { result })
    }

    fn query_one<'a>(&'a self, sql: &'a str, _params: Params<'a>) -> DbFuture<'a, Row> {
        let result = self.record(sql).and_then(|_| Err::<Row, _>(injected_error()));
        Box::pin(async move { result })
    }
}

/// A fixed live schema.
#[derive(Default)]
pub struct MemorySource {
    pub tables: Vec<LiveTable>,
}

impl MemorySource {
    pub fn new(tables: Vec<LiveTable>) -> Self {
        Self { tables }
    }
}

impl SchemaSource for MemorySource {
    async fn list_live_tables(&self) -> Result<Vec<LiveTable>> {
        Ok(self.tables.clone())
    }

    async fn list_live_columns(&self, table: &str) -> Result<Vec<LiveColumn>> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| Error::CatalogQuery {
                operation: "list_live_columns",
                table: Some(table.to_string()),
                message: format!("relation public.{} does not exist", table),
                source: None,
            })
    }
}

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<String, StoredTableConfig>,
    snapshot: Option<BTreeMap<String, StoredTableConfig>>,
    gets: usize,
    upserts: usize,
    deleted: u64,
    commits: usize,
    rollbacks: usize,
}

/// Config store with snapshot transactions and mutation counters.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    fail_upsert_on: Option<String>,
}

impl MemoryStore {
    pub fn with(configs: impl IntoIterator<Item = StoredTableConfig>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for config in configs {
                state.rows.insert(config.name.clone(), config);
            }
        }
        store
    }

    pub fn failing_upsert_on(mut self, table: &str) -> Self {
        self.fail_upsert_on = Some(table.to_string());
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.state.lock().unwrap().rows.keys().cloned().collect()
    }

    pub fn row(&self, name: &str) -> Option<StoredTableConfig> {
        self.state.lock().unwrap().rows.get(name).cloned()
    }

    pub fn gets(&self) -> usize {
        self.state.lock().unwrap().gets
    }

    /// Upserts and deleted rows since the last call.
    pub fn take_mutations(&self) -> (usize, u64) {
        let mut state = self.state.lock().unwrap();
        let counts = (state.upserts, state.deleted);
        state.upserts = 0;
        state.deleted = 0;
        counts
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

impl ConfigStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StoredTableConfig>> {
        Ok(self.state.lock().unwrap().rows.values().cloned().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<StoredTableConfig>> {
        let mut state = self.state.lock().unwrap();
        state.gets += 1;
        Ok(state.rows.get(name).cloned())
    }

    async fn upsert(&self, config: &StoredTableConfig) -> Result<()> {
        if self.fail_upsert_on.as_deref() == Some(config.name.as_str()) {
            return Err(Error::store("upsert", Some(&config.name), injected_error()));
        }
        let mut state = self.state.lock().unwrap();
        state.upserts += 1;
        state.rows.insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn delete_where_name_not_in(&self, keep: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|name, _| keep.contains(name));
        let deleted = (before - state.rows.len()) as u64;
        state.deleted += deleted;
        Ok(deleted)
    }

    async fn begin_exclusive(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let rows = state.rows.clone();
        state.snapshot = Some(rows);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.snapshot = None;
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(snapshot) = state.snapshot.take() {
            state.rows = snapshot;
        }
        state.rollbacks += 1;
        Ok(())
    }
}

pub fn column(name: &str, data_type: &str, pos: u32) -> LiveColumn {
    LiveColumn {
        column_name: name.to_string(),
        data_type: data_type.to_string(),
        description: None,
        not_null: false,
        default_value: None,
        ordinal_position: pos,
    }
}

pub fn table(name: &str, columns: Vec<LiveColumn>) -> LiveTable {
    LiveTable {
        name: name.to_string(),
        description: None,
        row_estimate: 0,
        columns,
    }
}
