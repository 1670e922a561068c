//! Per-table audit triggers.
//!
//! Every audited table gets one row-level trigger that calls a shared
//! procedure, `{prefix}audit_log_fn()`, which appends to `{prefix}audit_log`.
//! Trigger lifecycle:
//!
//! ```text
//! NoTrigger ──enable──▶ CreatedEnabled ◀──enable── CreatedDisabled
//!                            │                           ▲
//!                            └──────────disable──────────┘
//! ```
//!
//! Disabling from `NoTrigger` does nothing. Creation is guarded by a catalog
//! check, so repeating it never fails with a duplicate-object error.

use crate::{Connection, ConnectionExt, Error, Result, TracedConn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use vhsync_schema::TableSettings;
use vhsync_sql::{Lit, ReservedPrefix, SafeIdent, audit_trigger_name, qualified};

/// Where a table's audit trigger stands, as recorded in its settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTriggerState {
    NoTrigger,
    CreatedDisabled,
    CreatedEnabled,
}

impl AuditTriggerState {
    /// A table flagged "enabled" without a created trigger counts as
    /// `NoTrigger`: the next enable creates it.
    pub fn from_settings(settings: &TableSettings) -> Self {
        match (settings.audit_trigger_created, settings.audit_logging_enabled) {
            (false, _) => Self::NoTrigger,
            (true, false) => Self::CreatedDisabled,
            (true, true) => Self::CreatedEnabled,
        }
    }

    pub fn trigger_created(self) -> bool {
        !matches!(self, Self::NoTrigger)
    }

    pub fn enabled(self) -> bool {
        matches!(self, Self::CreatedEnabled)
    }
}

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub record_table: String,
    pub record_id: Option<String>,
    pub operation: String,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// DDL and queries for the audit machinery in one schema.
#[derive(Debug, Clone)]
struct AuditSql {
    schema: SafeIdent,
    prefix: ReservedPrefix,
    log_table: SafeIdent,
    log_fn: SafeIdent,
}

impl AuditSql {
    fn new(schema: SafeIdent, prefix: ReservedPrefix) -> Result<Self> {
        Ok(Self {
            log_table: prefix.table("audit_log")?,
            log_fn: prefix.table("audit_log_fn")?,
            schema,
            prefix,
        })
    }

    fn log_table(&self) -> String {
        qualified(&self.schema, &self.log_table)
    }

    fn create_log_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id bigserial PRIMARY KEY, \
             record_table text NOT NULL, \
             record_id text, \
             operation text NOT NULL, \
             old_data jsonb, \
             new_data jsonb, \
             created_at timestamptz NOT NULL DEFAULT now())",
            self.log_table()
        )
    }

    fn create_log_index(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS \"{}_record_idx\" ON {} (record_table, record_id, created_at DESC)",
            self.log_table.as_str(),
            self.log_table()
        )
    }

    fn create_log_fn(&self) -> String {
        let log = self.log_table();
        format!(
            r#"CREATE OR REPLACE FUNCTION {schema}.{func}() RETURNS trigger LANGUAGE plpgsql AS $vhsync$
BEGIN
    IF TG_OP = 'DELETE' THEN
        INSERT INTO {log} (record_table, record_id, operation, old_data)
        VALUES (TG_TABLE_NAME, to_jsonb(OLD) ->> 'id', TG_OP, to_jsonb(OLD));
        RETURN OLD;
    ELSIF TG_OP = 'UPDATE' THEN
        INSERT INTO {log} (record_table, record_id, operation, old_data, new_data)
        VALUES (TG_TABLE_NAME, to_jsonb(NEW) ->> 'id', TG_OP, to_jsonb(OLD), to_jsonb(NEW));
        RETURN NEW;
    ELSE
        INSERT INTO {log} (record_table, record_id, operation, new_data)
        VALUES (TG_TABLE_NAME, to_jsonb(NEW) ->> 'id', TG_OP, to_jsonb(NEW));
        RETURN NEW;
    END IF;
END
$vhsync$"#,
            schema = self.schema,
            func = self.log_fn,
        )
    }

    fn trigger_name(&self, table: &SafeIdent) -> Result<SafeIdent> {
        Ok(SafeIdent::new(audit_trigger_name(
            &self.prefix,
            table.as_str(),
        ))?)
    }

    fn create_trigger(&self, table: &SafeIdent) -> Result<String> {
        let trigger = self.trigger_name(table)?;
        let target = qualified(&self.schema, table);
        Ok(format!(
            r#"DO $vhsync$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM pg_trigger
        WHERE tgname = {name}
          AND tgrelid = {target_lit}::regclass
    ) THEN
        CREATE TRIGGER {trigger}
            AFTER INSERT OR UPDATE OR DELETE ON {target}
            FOR EACH ROW EXECUTE FUNCTION {schema}.{func}();
    END IF;
END
$vhsync$"#,
            name = Lit(trigger.as_str()),
            target_lit = Lit(&target),
            trigger = trigger,
            target = target,
            schema = self.schema,
            func = self.log_fn,
        ))
    }

    fn set_trigger(&self, table: &SafeIdent, enabled: bool) -> Result<String> {
        let trigger = self.trigger_name(table)?;
        Ok(format!(
            "ALTER TABLE {} {} TRIGGER {}",
            qualified(&self.schema, table),
            if enabled { "ENABLE" } else { "DISABLE" },
            trigger
        ))
    }

    fn recent_changes(&self) -> String {
        format!(
            "SELECT id, record_table, record_id, operation, old_data, new_data, created_at \
             FROM {} WHERE record_table = $1 AND record_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT $3",
            self.log_table()
        )
    }
}

/// Creates, enables and disables audit triggers on live tables.
pub struct AuditTriggerManager<'a, C: Connection> {
    conn: TracedConn<'a, C>,
    sql: AuditSql,
}

impl<'a, C: Connection> AuditTriggerManager<'a, C> {
    pub fn new(conn: &'a C, schema: SafeIdent, prefix: ReservedPrefix) -> Result<Self> {
        Ok(Self {
            conn: conn.traced(),
            sql: AuditSql::new(schema, prefix)?,
        })
    }

    /// Validate `table` and refuse the engine's own tables.
    fn user_table(&self, operation: &'static str, table: &str) -> Result<SafeIdent> {
        let ident = SafeIdent::new(table)?;
        if self.sql.prefix.matches(table) {
            return Err(Error::CatalogQuery {
                operation,
                table: Some(table.to_string()),
                message: format!("{} is reserved for engine storage", table),
                source: None,
            });
        }
        Ok(ident)
    }

    /// Create the audit log table and the shared trigger procedure.
    pub async fn ensure_audit_infrastructure(&self) -> Result<()> {
        let table = self.sql.log_table.as_str();
        for stmt in [
            self.sql.create_log_table(),
            self.sql.create_log_index(),
            self.sql.create_log_fn(),
        ] {
            self.conn
                .execute(&stmt, &[])
                .await
                .map_err(|e| Error::mutation("ensure_audit_infrastructure", table, e))?;
        }
        Ok(())
    }

    /// Make sure `table` is audited. Returns whether a trigger now exists,
    /// which is always `true` on success.
    #[tracing::instrument(skip(self))]
    pub async fn enable_audit_logging(
        &self,
        table: &str,
        trigger_created_before: bool,
    ) -> Result<bool> {
        let ident = self.user_table("enable_audit_logging", table)?;
        if !trigger_created_before {
            self.ensure_audit_infrastructure().await?;
            self.conn
                .execute(&self.sql.create_trigger(&ident)?, &[])
                .await
                .map_err(|e| Error::mutation("create_audit_trigger", table, e))?;
            tracing::info!("created audit trigger");
        }
        self.conn
            .execute(&self.sql.set_trigger(&ident, true)?, &[])
            .await
            .map_err(|e| Error::mutation("enable_audit_trigger", table, e))?;
        Ok(true)
    }

    /// Stop auditing `table`. Nothing happens if no trigger was ever created.
    #[tracing::instrument(skip(self))]
    pub async fn disable_audit_logging(
        &self,
        table: &str,
        trigger_created_before: bool,
    ) -> Result<()> {
        let ident = self.user_table("disable_audit_logging", table)?;
        if !trigger_created_before {
            tracing::debug!("no audit trigger to disable");
            return Ok(());
        }
        self.conn
            .execute(&self.sql.set_trigger(&ident, false)?, &[])
            .await
            .map_err(|e| Error::mutation("disable_audit_trigger", table, e))?;
        Ok(())
    }

    /// Drive the trigger to `enabled` and record the outcome in `settings`.
    ///
    /// `settings` is only touched after the DDL succeeded.
    pub async fn apply(
        &self,
        table: &str,
        settings: &mut TableSettings,
        enabled: bool,
    ) -> Result<AuditTriggerState> {
        let created = settings.audit_trigger_created;
        if enabled {
            settings.audit_trigger_created = self.enable_audit_logging(table, created).await?;
        } else {
            self.disable_audit_logging(table, created).await?;
        }
        settings.audit_logging_enabled = enabled;
        Ok(AuditTriggerState::from_settings(settings))
    }

    /// Newest audit entries for one record. Empty if nothing was ever audited.
    pub async fn recent_changes(
        &self,
        table: &str,
        record_id: &str,
        limit: i64,
    ) -> Result<Vec<AuditEntry>> {
        self.user_table("recent_changes", table)?;
        let log_table = self.sql.log_table();
        let exists = self
            .conn
            .query_one("SELECT to_regclass($1::text) IS NOT NULL", &[&log_table])
            .await
            .map_err(|e| Error::catalog("recent_changes", Some(table), e))?;
        let exists: bool = exists
            .try_get(0)
            .map_err(|e| Error::catalog("recent_changes", Some(table), e))?;
        if !exists {
            return Ok(Vec::new());
        }

        let rows = self
            .conn
            .query(&self.sql.recent_changes(), &[&table, &record_id, &limit])
            .await
            .map_err(|e| Error::catalog("recent_changes", Some(table), e))?;

        rows.iter()
            .map(|row| -> std::result::Result<AuditEntry, tokio_postgres::Error> {
                Ok(AuditEntry {
                    id: row.try_get("id")?,
                    record_table: row.try_get("record_table")?,
                    record_id: row.try_get("record_id")?,
                    operation: row.try_get("operation")?,
                    old_data: row.try_get("old_data")?,
                    new_data: row.try_get("new_data")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::catalog("recent_changes", Some(table), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConn;

    fn sql() -> AuditSql {
        AuditSql::new(SafeIdent::new("public").unwrap(), ReservedPrefix::default()).unwrap()
    }

    fn manager(conn: &RecordingConn) -> AuditTriggerManager<'_, RecordingConn> {
        AuditTriggerManager::new(
            conn,
            SafeIdent::new("public").unwrap(),
            ReservedPrefix::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_trigger_is_guarded() {
        let orders = SafeIdent::new("orders").unwrap();
        insta::assert_snapshot!(sql().create_trigger(&orders).unwrap(), @r#"
        DO $vhsync$
        BEGIN
            IF NOT EXISTS (
                SELECT 1 FROM pg_trigger
                WHERE tgname = 'vh_audit_orders'
                  AND tgrelid = '"public"."orders"'::regclass
            ) THEN
                CREATE TRIGGER "vh_audit_orders"
                    AFTER INSERT OR UPDATE OR DELETE ON "public"."orders"
                    FOR EACH ROW EXECUTE FUNCTION "public"."vh_audit_log_fn"();
            END IF;
        END
        $vhsync$
        "#);
    }

    #[test]
    fn test_toggle_statements() {
        let orders = SafeIdent::new("orders").unwrap();
        insta::assert_snapshot!(sql().set_trigger(&orders, true).unwrap(), @r#"ALTER TABLE "public"."orders" ENABLE TRIGGER "vh_audit_orders""#);
        insta::assert_snapshot!(sql().set_trigger(&orders, false).unwrap(), @r#"ALTER TABLE "public"."orders" DISABLE TRIGGER "vh_audit_orders""#);
    }

    #[test]
    fn test_log_fn_writes_to_log_table() {
        let body = sql().create_log_fn();
        assert!(body.starts_with(r#"CREATE OR REPLACE FUNCTION "public"."vh_audit_log_fn"()"#));
        assert_eq!(body.matches(r#"INSERT INTO "public"."vh_audit_log""#).count(), 3);
    }

    #[test]
    fn test_state_from_settings() {
        let mut settings = TableSettings::default();
        assert_eq!(
            AuditTriggerState::from_settings(&settings),
            AuditTriggerState::NoTrigger
        );
        settings.audit_logging_enabled = true;
        assert_eq!(
            AuditTriggerState::from_settings(&settings),
            AuditTriggerState::NoTrigger
        );
        settings.audit_trigger_created = true;
        assert_eq!(
            AuditTriggerState::from_settings(&settings),
            AuditTriggerState::CreatedEnabled
        );
        settings.audit_logging_enabled = false;
        let state = AuditTriggerState::from_settings(&settings);
        assert_eq!(state, AuditTriggerState::CreatedDisabled);
        assert!(state.trigger_created());
        assert!(!state.enabled());
    }

    #[tokio::test]
    async fn test_enable_twice_creates_once() {
        let conn = RecordingConn::default();
        let audit = manager(&conn);

        assert!(audit.enable_audit_logging("orders", false).await.unwrap());
        let first = conn.take_statements();
        assert_eq!(first.len(), 5);
        assert!(first[3].contains("CREATE TRIGGER"));
        assert!(first[4].contains("ENABLE TRIGGER"));

        assert!(audit.enable_audit_logging("orders", true).await.unwrap());
        let second = conn.take_statements();
        assert_eq!(second.len(), 1);
        assert!(!second[0].contains("CREATE"));
        assert!(second[0].contains("ENABLE TRIGGER"));
    }

    #[tokio::test]
    async fn test_disable_without_trigger_is_noop() {
        let conn = RecordingConn::default();
        let audit = manager(&conn);

        audit.disable_audit_logging("orders", false).await.unwrap();
        assert!(conn.statements().is_empty());

        audit.disable_audit_logging("orders", true).await.unwrap();
        assert_eq!(
            conn.statements(),
            vec![r#"ALTER TABLE "public"."orders" DISABLE TRIGGER "vh_audit_orders""#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_apply_walks_the_state_machine() {
        let conn = RecordingConn::default();
        let audit = manager(&conn);
        let mut settings = TableSettings::default();

        let state = audit.apply("orders", &mut settings, true).await.unwrap();
        assert_eq!(state, AuditTriggerState::CreatedEnabled);
        assert!(settings.audit_trigger_created);

        let state = audit.apply("orders", &mut settings, false).await.unwrap();
        assert_eq!(state, AuditTriggerState::CreatedDisabled);

        conn.take_statements();
        let state = audit.apply("orders", &mut settings, true).await.unwrap();
        assert_eq!(state, AuditTriggerState::CreatedEnabled);
        assert_eq!(conn.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_ddl_failure_leaves_settings_alone() {
        let conn = RecordingConn::failing_on("CREATE TRIGGER");
        let audit = manager(&conn);
        let mut settings = TableSettings::default();

        let err = audit.apply("orders", &mut settings, true).await.unwrap_err();
        assert!(matches!(err, Error::SchemaMutation { ref table, .. } if table == "orders"));
        assert_eq!(settings, TableSettings::default());
    }

    #[tokio::test]
    async fn test_reserved_tables_are_never_audited() {
        let conn = RecordingConn::default();
        let audit = manager(&conn);

        for created in [false, true] {
            let err = audit
                .enable_audit_logging("vh_audit_log", created)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::CatalogQuery { ref table, .. } if table.as_deref() == Some("vh_audit_log")));

            let err = audit
                .disable_audit_logging("vh_tables", created)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::CatalogQuery { .. }));
        }

        let mut settings = TableSettings::default();
        assert!(audit.apply("vh_tables", &mut settings, true).await.is_err());
        assert_eq!(settings, TableSettings::default());
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_table_name() {
        let conn = RecordingConn::default();
        let audit = manager(&conn);
        let err = audit
            .enable_audit_logging("orders\"; drop table x; --", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
        assert!(conn.statements().is_empty());
    }
}
