//! Live schema evolution for the users table.
//!
//! Adding a column to a populated table takes locks whose duration
//! depends on the engine, the column definition, and the row count.
//! Every entry point therefore carries a `dangerously_` prefix and
//! refuses to run until the caller sets [`MigrationOptions::confirmed`].
//!
//! PostgreSQL applies a batch inside one transaction and rolls the
//! whole batch back on failure. MySQL DDL autocommits, so columns are
//! applied one statement at a time and a mid-batch failure reports
//! which columns were already in place; nothing is rolled back.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fields::CustomFieldDefinition;
use crate::store::sql::{add_column_sql, unique_index_sql};
use crate::store::{ensure_distinct_names, AuthStore};

const DEFAULT_ROW_WARN_THRESHOLD: u64 = 100_000;

/// Knobs for a column migration run.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Explicit acknowledgement that the table may lock while the
    /// migration runs. Nothing executes without it.
    pub confirmed: bool,
    /// Treat an already-present column as done instead of failing.
    /// Keeps retries of a partially applied batch safe.
    pub skip_if_exists: bool,
    /// Row count above which a warning is logged before the DDL runs.
    pub row_warn_threshold: u64,
    /// Force batch-transactional or sequential application. `None`
    /// picks per dialect: transactional where DDL participates in
    /// transactions, sequential elsewhere.
    pub transactional: Option<bool>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            confirmed: false,
            skip_if_exists: true,
            row_warn_threshold: DEFAULT_ROW_WARN_THRESHOLD,
            transactional: None,
        }
    }
}

impl MigrationOptions {
    /// Options with the confirmation gate already passed.
    #[must_use]
    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_skip_if_exists(mut self, skip: bool) -> Self {
        self.skip_if_exists = skip;
        self
    }

    #[must_use]
    pub fn with_row_warn_threshold(mut self, rows: u64) -> Self {
        self.row_warn_threshold = rows;
        self
    }

    #[must_use]
    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = Some(transactional);
        self
    }
}

/// What a migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Columns added by this run, in application order.
    pub applied: Vec<String>,
    /// Columns found already present and left untouched.
    pub skipped: Vec<String>,
    /// Row count of the users table at the start of the run.
    pub row_count: u64,
}

/// Adds custom columns to a live users table through an [`AuthStore`].
pub struct SchemaMigrator {
    store: Arc<dyn AuthStore>,
}

impl SchemaMigrator {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Adds one column. See [`Self::dangerously_add_columns`].
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::dangerously_add_columns`].
    pub async fn dangerously_add_column(
        &self,
        def: CustomFieldDefinition,
        options: MigrationOptions,
    ) -> Result<MigrationReport> {
        self.dangerously_add_columns(std::slice::from_ref(&def), options)
            .await
    }

    /// Adds a batch of columns to the users table.
    ///
    /// Columns that already exist are skipped (or rejected, per
    /// [`MigrationOptions::skip_if_exists`]). A required column without
    /// a default is rejected while the table holds rows. Uniqueness is
    /// enforced through an index created after the column lands, using
    /// `CREATE UNIQUE INDEX CONCURRENTLY` on PostgreSQL; an inline
    /// UNIQUE clause would build its index under the ALTER's table
    /// lock. Each applied definition is registered on the store so
    /// reads and writes recognize the column immediately.
    ///
    /// # Errors
    ///
    /// [`Error::Migration`] when the run is unconfirmed, the schema was
    /// never created, a column exists with skipping disabled, a
    /// required column has no default on a populated table, or DDL
    /// fails. Sequential-mode DDL failures carry the columns applied
    /// before the failure and the column that failed.
    pub async fn dangerously_add_columns(
        &self,
        defs: &[CustomFieldDefinition],
        options: MigrationOptions,
    ) -> Result<MigrationReport> {
        if !options.confirmed {
            return Err(Error::migration(
                "not confirmed: adding columns can lock a populated table; \
                 set MigrationOptions::confirmed to proceed",
            ));
        }
        if defs.is_empty() {
            return Ok(MigrationReport::default());
        }

        for def in defs {
            def.validate()?;
        }
        ensure_distinct_names(defs)?;

        let dialect = self.store.dialect();
        let users = self.store.tables().users().to_string();
        if !self.store.table_exists(&users).await? {
            return Err(Error::migration(format!(
                "table `{users}` does not exist; run create_schema before migrating"
            )));
        }

        let mut skipped = Vec::new();
        let mut pending = Vec::new();
        for def in defs {
            if self.store.column_exists(&users, def.name()).await? {
                if options.skip_if_exists {
                    skipped.push(def.name().to_string());
                    // The column may predate this process; register so
                    // the engine can use it either way.
                    self.store.register_custom_field(def.clone())?;
                    continue;
                }
                return Err(Error::migration(format!(
                    "column `{}` already exists on `{users}`",
                    def.name()
                )));
            }
            pending.push(def.clone());
        }

        let row_count = self.store.count_rows(&users).await?;
        if row_count > options.row_warn_threshold {
            warn!(
                table = %users,
                rows = row_count,
                "users table is large; expect locking while columns are added"
            );
        }
        if pending.is_empty() {
            return Ok(MigrationReport {
                applied: Vec::new(),
                skipped,
                row_count,
            });
        }

        for def in &pending {
            if def.required() && def.default().is_none() && row_count > 0 {
                return Err(Error::migration(format!(
                    "column `{}` is required without a default; {row_count} existing \
                     rows cannot satisfy it",
                    def.name()
                )));
            }
        }

        let mut statements = Vec::with_capacity(pending.len());
        for def in &pending {
            let column = def.clone().with_unique(false);
            statements.push(add_column_sql(dialect, &users, &column)?);
        }

        let transactional = match options.transactional {
            Some(true) if !dialect.supports_transactional_ddl() => {
                warn!(
                    %dialect,
                    "DDL does not participate in transactions on this dialect; \
                     applying sequentially"
                );
                false
            }
            Some(requested) => requested,
            None => dialect.supports_transactional_ddl(),
        };

        let mut applied = Vec::new();
        if transactional {
            if let Err(err) = self.store.exec_batch(&statements).await {
                return Err(Error::Migration {
                    message: format!("column batch rolled back: {err}"),
                    applied: Vec::new(),
                    failed_column: None,
                });
            }
            for def in &pending {
                self.store.register_custom_field(def.clone())?;
                applied.push(def.name().to_string());
            }
        } else {
            for (def, statement) in pending.iter().zip(&statements) {
                if let Err(err) = self.store.raw_exec(statement).await {
                    return Err(Error::Migration {
                        message: format!(
                            "adding column `{}` failed: {err}; columns applied before \
                             the failure remain in place",
                            def.name()
                        ),
                        applied,
                        failed_column: Some(def.name().to_string()),
                    });
                }
                self.store.register_custom_field(def.clone())?;
                applied.push(def.name().to_string());
            }
        }

        // Index creation goes through raw_exec in both modes; on
        // PostgreSQL, CONCURRENTLY cannot run inside a transaction.
        for def in pending.iter().filter(|d| d.unique()) {
            let index = unique_index_sql(dialect, &users, def.name());
            if let Err(err) = self.store.raw_exec(&index.sql).await {
                return Err(Error::Migration {
                    message: format!(
                        "unique index `{}` failed: {err}; column `{}` exists without \
                         uniqueness enforcement",
                        index.name,
                        def.name()
                    ),
                    applied,
                    failed_column: Some(def.name().to_string()),
                });
            }
        }

        info!(
            table = %users,
            applied = applied.len(),
            skipped = skipped.len(),
            rows = row_count,
            "schema migration complete"
        );
        Ok(MigrationReport {
            applied,
            skipped,
            row_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use time::OffsetDateTime;

    use crate::fields::FieldValue;
    use crate::store::{
        FieldRegistry, NewUser, PurgeReport, RefreshTokenRecord, SqlDialect, TableNames,
        UserRecord, VerificationPurpose, VerificationRecord,
    };

    use super::*;

    /// Records every DDL statement instead of touching a database.
    struct DdlStore {
        dialect: SqlDialect,
        tables: TableNames,
        fields: FieldRegistry,
        schema_ready: AtomicBool,
        rows: AtomicU64,
        existing: Mutex<Vec<String>>,
        executed: Mutex<Vec<String>>,
        batches: Mutex<Vec<Vec<String>>>,
        fail_on: Mutex<Option<String>>,
    }

    impl DdlStore {
        fn new(dialect: SqlDialect) -> Arc<Self> {
            Arc::new(Self {
                dialect,
                tables: TableNames::default(),
                fields: FieldRegistry::default(),
                schema_ready: AtomicBool::new(true),
                rows: AtomicU64::new(0),
                existing: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
                batches: Mutex::new(Vec::new()),
                fail_on: Mutex::new(None),
            })
        }

        fn with_rows(self: Arc<Self>, rows: u64) -> Arc<Self> {
            self.rows.store(rows, Ordering::SeqCst);
            self
        }

        fn fail_on(&self, marker: &str) {
            *self.fail_on.lock().unwrap() = Some(marker.to_string());
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }

        fn registered(&self) -> Vec<String> {
            self.fields
                .snapshot()
                .iter()
                .map(|d| d.name().to_string())
                .collect()
        }

        fn check_failure(&self, sql: &str) -> crate::error::Result<()> {
            if let Some(marker) = self.fail_on.lock().unwrap().as_deref() {
                if sql.contains(marker) {
                    return Err(sqlx::Error::PoolTimedOut.into());
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AuthStore for DdlStore {
        fn dialect(&self) -> SqlDialect {
            self.dialect
        }

        fn tables(&self) -> &TableNames {
            &self.tables
        }

        fn custom_fields(&self) -> Vec<CustomFieldDefinition> {
            self.fields.snapshot()
        }

        fn register_custom_field(&self, def: CustomFieldDefinition) -> crate::error::Result<()> {
            self.fields.register(def)
        }

        async fn close(&self) {}

        async fn create_schema(
            &self,
            _custom: &[CustomFieldDefinition],
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn create_indexes(&self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn table_exists(&self, _table: &str) -> crate::error::Result<bool> {
            Ok(self.schema_ready.load(Ordering::SeqCst))
        }

        async fn column_exists(&self, _table: &str, column: &str) -> crate::error::Result<bool> {
            Ok(self.existing.lock().unwrap().iter().any(|c| c == column)
                || self.fields.snapshot().iter().any(|d| d.name() == column))
        }

        async fn count_rows(&self, _table: &str) -> crate::error::Result<u64> {
            Ok(self.rows.load(Ordering::SeqCst))
        }

        async fn find_user_by_email(
            &self,
            _email: &str,
        ) -> crate::error::Result<Option<UserRecord>> {
            Ok(None)
        }

        async fn find_user_by_id(&self, _id: i64) -> crate::error::Result<Option<UserRecord>> {
            Ok(None)
        }

        async fn create_user(&self, _user: NewUser) -> crate::error::Result<UserRecord> {
            Err(crate::error::Error::NotFound)
        }

        async fn update_user(
            &self,
            _id: i64,
            _changes: &BTreeMap<String, FieldValue>,
        ) -> crate::error::Result<bool> {
            Ok(false)
        }

        async fn update_password_hash(
            &self,
            _id: i64,
            _password_hash: &str,
        ) -> crate::error::Result<bool> {
            Ok(false)
        }

        async fn store_refresh_token_hash(
            &self,
            _user_id: i64,
            _token_hash: &[u8],
            _expires_at: OffsetDateTime,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn find_refresh_token(
            &self,
            _token_hash: &[u8],
        ) -> crate::error::Result<Option<RefreshTokenRecord>> {
            Ok(None)
        }

        async fn revoke_refresh_token(&self, _token_hash: &[u8]) -> crate::error::Result<bool> {
            Ok(false)
        }

        async fn revoke_all_for_user(&self, _user_id: i64) -> crate::error::Result<u64> {
            Ok(0)
        }

        async fn record_login_attempt(
            &self,
            _email: &str,
            _success: bool,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn count_recent_failures(
            &self,
            _email: &str,
            _window: Duration,
        ) -> crate::error::Result<u64> {
            Ok(0)
        }

        async fn replace_verification_code(
            &self,
            _user_id: i64,
            _purpose: VerificationPurpose,
            _code_hash: &[u8],
            _expires_at: OffsetDateTime,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn find_verification_code(
            &self,
            _code_hash: &[u8],
            _purpose: VerificationPurpose,
        ) -> crate::error::Result<Option<VerificationRecord>> {
            Ok(None)
        }

        async fn consume_code_and_mark_verified(
            &self,
            _user_id: i64,
            _code_id: i64,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn reset_password_and_revoke(
            &self,
            _user_id: i64,
            _password_hash: &str,
            _code_id: i64,
        ) -> crate::error::Result<u64> {
            Ok(0)
        }

        async fn purge_expired(
            &self,
            _now: OffsetDateTime,
            _attempt_retention: Duration,
        ) -> crate::error::Result<PurgeReport> {
            Ok(PurgeReport::default())
        }

        async fn raw_exec(&self, sql: &str) -> crate::error::Result<u64> {
            self.check_failure(sql)?;
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(0)
        }

        async fn exec_batch(&self, statements: &[String]) -> crate::error::Result<()> {
            for sql in statements {
                self.check_failure(sql)?;
            }
            self.batches.lock().unwrap().push(statements.to_vec());
            Ok(())
        }
    }

    fn text_field(name: &str) -> CustomFieldDefinition {
        CustomFieldDefinition::new(name, "text").unwrap()
    }

    #[tokio::test]
    async fn refuses_to_run_unconfirmed() {
        let store = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(store.clone());
        let err = migrator
            .dangerously_add_column(text_field("nickname"), MigrationOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("confirmed"));
        assert!(store.executed().is_empty());
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(store.clone());
        let report = migrator
            .dangerously_add_columns(&[], MigrationOptions::confirmed())
            .await
            .unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn missing_schema_is_an_explanatory_error() {
        let store = DdlStore::new(SqlDialect::Postgres);
        store.schema_ready.store(false, Ordering::SeqCst);
        let migrator = SchemaMigrator::new(store);
        let err = migrator
            .dangerously_add_column(text_field("nickname"), MigrationOptions::confirmed())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("create_schema"));
    }

    #[tokio::test]
    async fn postgres_applies_a_batch_in_one_transaction() {
        let store = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(store.clone());
        let report = migrator
            .dangerously_add_columns(
                &[text_field("nickname"), text_field("motto")],
                MigrationOptions::confirmed(),
            )
            .await
            .unwrap();

        assert_eq!(report.applied, vec!["nickname", "motto"]);
        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0][0].starts_with(r#"ALTER TABLE "users" ADD COLUMN "nickname""#));
        assert!(store.executed().is_empty());
        assert_eq!(store.registered(), vec!["nickname", "motto"]);
    }

    #[tokio::test]
    async fn mysql_applies_columns_sequentially() {
        let store = DdlStore::new(SqlDialect::MySql);
        let migrator = SchemaMigrator::new(store.clone());
        let report = migrator
            .dangerously_add_columns(
                &[text_field("nickname"), text_field("motto")],
                MigrationOptions::confirmed(),
            )
            .await
            .unwrap();

        assert_eq!(report.applied, vec!["nickname", "motto"]);
        assert!(store.batches().is_empty());
        let executed = store.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].starts_with("ALTER TABLE `users` ADD COLUMN `nickname`"));
    }

    #[tokio::test]
    async fn forcing_transactional_on_mysql_degrades_to_sequential() {
        let store = DdlStore::new(SqlDialect::MySql);
        let migrator = SchemaMigrator::new(store.clone());
        migrator
            .dangerously_add_column(
                text_field("nickname"),
                MigrationOptions::confirmed().with_transactional(true),
            )
            .await
            .unwrap();
        assert!(store.batches().is_empty());
        assert_eq!(store.executed().len(), 1);
    }

    #[tokio::test]
    async fn retry_skips_columns_that_already_landed() {
        let store = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(store.clone());
        let first = migrator
            .dangerously_add_column(text_field("nickname"), MigrationOptions::confirmed())
            .await
            .unwrap();
        assert_eq!(first.applied, vec!["nickname"]);

        let second = migrator
            .dangerously_add_column(text_field("nickname"), MigrationOptions::confirmed())
            .await
            .unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, vec!["nickname"]);
        // No further DDL was issued by the retry.
        assert_eq!(store.batches().len(), 1);
    }

    #[tokio::test]
    async fn existing_column_fails_when_skipping_is_disabled() {
        let store = DdlStore::new(SqlDialect::Postgres);
        store.existing.lock().unwrap().push("nickname".to_string());
        let migrator = SchemaMigrator::new(store.clone());
        let err = migrator
            .dangerously_add_column(
                text_field("nickname"),
                MigrationOptions::confirmed().with_skip_if_exists(false),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn required_without_default_fails_on_a_populated_table() {
        let store = DdlStore::new(SqlDialect::Postgres).with_rows(5);
        let migrator = SchemaMigrator::new(store.clone());
        let def = text_field("tenant").with_required(true);
        let err = migrator
            .dangerously_add_column(def.clone(), MigrationOptions::confirmed())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("required"));
        assert!(store.batches().is_empty());
        assert!(store.executed().is_empty());

        // Same definition is fine while the table is empty.
        let empty = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(empty.clone());
        migrator
            .dangerously_add_column(def, MigrationOptions::confirmed())
            .await
            .unwrap();
        assert_eq!(empty.batches().len(), 1);
    }

    #[tokio::test]
    async fn required_with_default_is_allowed_on_a_populated_table() {
        let store = DdlStore::new(SqlDialect::Postgres).with_rows(5);
        let migrator = SchemaMigrator::new(store.clone());
        let def = text_field("plan")
            .with_required(true)
            .with_default(json!("free"));
        let report = migrator
            .dangerously_add_column(def, MigrationOptions::confirmed())
            .await
            .unwrap();
        assert_eq!(report.applied, vec!["plan"]);
        assert_eq!(report.row_count, 5);
        let batch = &store.batches()[0][0];
        assert!(batch.contains("NOT NULL"));
        assert!(batch.contains("DEFAULT 'free'"));
    }

    #[tokio::test]
    async fn sequential_failure_reports_partial_progress() {
        let store = DdlStore::new(SqlDialect::MySql);
        store.fail_on("nickname");
        let migrator = SchemaMigrator::new(store.clone());
        let err = migrator
            .dangerously_add_columns(
                &[text_field("age"), text_field("nickname"), text_field("motto")],
                MigrationOptions::confirmed(),
            )
            .await
            .unwrap_err();

        match err {
            Error::Migration {
                applied,
                failed_column,
                ..
            } => {
                assert_eq!(applied, vec!["age"]);
                assert_eq!(failed_column.as_deref(), Some("nickname"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Columns applied before the failure stay usable.
        assert_eq!(store.registered(), vec!["age"]);
    }

    #[tokio::test]
    async fn transactional_failure_applies_nothing() {
        let store = DdlStore::new(SqlDialect::Postgres);
        store.fail_on("nickname");
        let migrator = SchemaMigrator::new(store.clone());
        let err = migrator
            .dangerously_add_columns(
                &[text_field("age"), text_field("nickname")],
                MigrationOptions::confirmed(),
            )
            .await
            .unwrap_err();

        match err {
            Error::Migration {
                applied,
                failed_column,
                ..
            } => {
                assert!(applied.is_empty());
                assert_eq!(failed_column, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.registered().is_empty());
    }

    #[tokio::test]
    async fn unique_columns_get_an_index_outside_the_transaction() {
        let store = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(store.clone());
        migrator
            .dangerously_add_column(
                text_field("handle").with_unique(true),
                MigrationOptions::confirmed(),
            )
            .await
            .unwrap();

        // The ALTER itself carries no inline UNIQUE.
        let batch = &store.batches()[0][0];
        assert!(!batch.contains("UNIQUE"));
        let executed = store.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].starts_with(
            r#"CREATE UNIQUE INDEX CONCURRENTLY IF NOT EXISTS "uniq_users_handle""#
        ));
    }

    #[tokio::test]
    async fn mysql_unique_index_is_a_blocking_create() {
        let store = DdlStore::new(SqlDialect::MySql);
        let migrator = SchemaMigrator::new(store.clone());
        migrator
            .dangerously_add_column(
                text_field("handle").with_unique(true),
                MigrationOptions::confirmed(),
            )
            .await
            .unwrap();

        let executed = store.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[1].starts_with("CREATE UNIQUE INDEX `uniq_users_handle`"));
        assert!(!executed[1].contains("CONCURRENTLY"));
    }

    #[tokio::test]
    async fn duplicate_names_in_a_batch_are_rejected() {
        let store = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(store.clone());
        let err = migrator
            .dangerously_add_columns(
                &[text_field("nickname"), text_field("nickname")],
                MigrationOptions::confirmed(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn reserved_and_malformed_names_never_reach_the_store() {
        let store = DdlStore::new(SqlDialect::Postgres);
        let migrator = SchemaMigrator::new(store.clone());
        for name in ["email", "drop table", "1nope"] {
            let def = CustomFieldDefinition::new(name, "text").unwrap();
            let err = migrator
                .dangerously_add_column(def, MigrationOptions::confirmed())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert!(store.batches().is_empty());
        assert!(store.executed().is_empty());
    }
}
