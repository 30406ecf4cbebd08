//! MySQL adapter.
//!
//! Mirrors the PostgreSQL adapter with this engine's divergences: new
//! row ids come from `last_insert_id`, duplicate keys surface as errno
//! 1062, `CREATE INDEX` has no `IF NOT EXISTS` so existence is probed
//! first, and DDL never participates in transactions.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::mysql::{
    MySqlArguments, MySqlConnectOptions, MySqlDatabaseError, MySqlPoolOptions, MySqlRow,
};
use sqlx::query::Query;
use sqlx::{MySql, MySqlPool, Row};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fields::{validate_identifier, CustomFieldDefinition, FieldType, FieldValue};
use crate::store::{
    check_new_user_columns, check_update_columns, ensure_distinct_names, sql, AuthStore,
    FieldRegistry, NewUser, PurgeReport, RefreshTokenRecord, SqlDialect, StoreConfig, TableNames,
    UserRecord, VerificationPurpose, VerificationRecord,
};

const DIALECT: SqlDialect = SqlDialect::MySql;

/// Duplicate entry for a unique key.
const ER_DUP_ENTRY: u16 = 1062;

pub struct MySqlStore {
    pool: MySqlPool,
    tables: TableNames,
    fields: FieldRegistry,
}

impl MySqlStore {
    /// Validates the configuration, then connects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Validation`] before any
    /// network attempt, [`Error::Storage`] when the connection fails.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let mut options = MySqlConnectOptions::new()
            .host(config.host())
            .username(config.user())
            .password(config.password().expose_secret())
            .database(config.database());
        if let Some(port) = config.port() {
            options = options.port(port);
        }
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size())
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            tables: config.tables().clone(),
            fields: FieldRegistry::default(),
        })
    }

    /// The native pool, for embedder queries outside the contract.
    #[must_use]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| e.number() == ER_DUP_ENTRY),
            _ => false,
        }
    }

    async fn index_exists(&self, table: &str, index: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(&sql::index_exists_sql(DIALECT))
            .bind(table)
            .bind(index)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Binds one custom field value with the concrete SQL type the
    /// declared field type maps to. NULLs are typed too.
    fn bind_value<'q>(
        query: Query<'q, MySql, MySqlArguments>,
        def: &CustomFieldDefinition,
        value: &'q FieldValue,
    ) -> Result<Query<'q, MySql, MySqlArguments>> {
        let bound = match (def.field_type(), value) {
            (FieldType::Text | FieldType::VarChar | FieldType::Enum, FieldValue::Text(s)) => {
                query.bind(s.as_str())
            }
            (FieldType::Text | FieldType::VarChar | FieldType::Enum, FieldValue::Null) => {
                query.bind(Option::<String>::None)
            }
            (FieldType::Integer, FieldValue::Int(n)) => {
                let narrow = i32::try_from(*n).map_err(|_| {
                    Error::validation(format!("field `{}` overflows integer", def.name()))
                })?;
                query.bind(narrow)
            }
            (FieldType::Integer, FieldValue::Null) => query.bind(Option::<i32>::None),
            (FieldType::BigInteger, FieldValue::Int(n)) => query.bind(*n),
            (FieldType::BigInteger, FieldValue::Null) => query.bind(Option::<i64>::None),
            (FieldType::Boolean, FieldValue::Bool(b)) => query.bind(*b),
            (FieldType::Boolean, FieldValue::Null) => query.bind(Option::<bool>::None),
            (FieldType::Decimal, FieldValue::Decimal(d)) => query.bind(*d),
            (FieldType::Decimal, FieldValue::Null) => query.bind(Option::<Decimal>::None),
            (FieldType::Double, FieldValue::Double(f)) => query.bind(*f),
            (FieldType::Double, FieldValue::Null) => query.bind(Option::<f64>::None),
            (FieldType::Timestamp, FieldValue::Timestamp(t)) => query.bind(*t),
            (FieldType::Timestamp, FieldValue::Null) => {
                query.bind(Option::<OffsetDateTime>::None)
            }
            (FieldType::Date, FieldValue::Date(d)) => query.bind(*d),
            (FieldType::Date, FieldValue::Null) => query.bind(Option::<time::Date>::None),
            (FieldType::Json, FieldValue::Json(v)) => query.bind(v.clone()),
            (FieldType::Json, FieldValue::Null) => {
                query.bind(Option::<serde_json::Value>::None)
            }
            _ => {
                return Err(Error::validation(format!(
                    "field `{}` value does not match its declared type",
                    def.name()
                )))
            }
        };
        Ok(bound)
    }

    fn user_from_row(row: &MySqlRow, custom: &[CustomFieldDefinition]) -> Result<UserRecord> {
        let mut custom_map = BTreeMap::new();
        for def in custom {
            let name = def.name();
            let value = match def.field_type() {
                FieldType::Text | FieldType::VarChar | FieldType::Enum => row
                    .try_get::<Option<String>, _>(name)?
                    .map(FieldValue::Text),
                FieldType::Integer => row
                    .try_get::<Option<i32>, _>(name)?
                    .map(|n| FieldValue::Int(n.into())),
                FieldType::BigInteger => {
                    row.try_get::<Option<i64>, _>(name)?.map(FieldValue::Int)
                }
                FieldType::Boolean => {
                    row.try_get::<Option<bool>, _>(name)?.map(FieldValue::Bool)
                }
                FieldType::Decimal => row
                    .try_get::<Option<Decimal>, _>(name)?
                    .map(FieldValue::Decimal),
                FieldType::Double => row
                    .try_get::<Option<f64>, _>(name)?
                    .map(FieldValue::Double),
                FieldType::Timestamp => row
                    .try_get::<Option<OffsetDateTime>, _>(name)?
                    .map(FieldValue::Timestamp),
                FieldType::Date => row
                    .try_get::<Option<time::Date>, _>(name)?
                    .map(FieldValue::Date),
                FieldType::Json => row
                    .try_get::<Option<serde_json::Value>, _>(name)?
                    .map(FieldValue::Json),
            };
            if let Some(value) = value {
                custom_map.insert(name.to_string(), value);
            }
        }
        Ok(UserRecord {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            is_active: row.try_get("is_active")?,
            email_verified: row.try_get("email_verified")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            custom: custom_map,
        })
    }
}

#[async_trait]
impl AuthStore for MySqlStore {
    fn dialect(&self) -> SqlDialect {
        DIALECT
    }

    fn tables(&self) -> &TableNames {
        &self.tables
    }

    fn custom_fields(&self) -> Vec<CustomFieldDefinition> {
        self.fields.snapshot()
    }

    fn register_custom_field(&self, def: CustomFieldDefinition) -> Result<()> {
        self.fields.register(def)
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn create_schema(&self, custom: &[CustomFieldDefinition]) -> Result<()> {
        ensure_distinct_names(custom)?;
        for def in custom {
            def.validate()?;
        }
        let statements = sql::create_schema_sql(DIALECT, &self.tables, custom)?;
        for statement in &statements {
            debug!(db.statement = %statement, "create schema");
            sqlx::raw_sql(statement).execute(&self.pool).await?;
        }
        for def in custom {
            self.fields.register(def.clone())?;
        }
        Ok(())
    }

    async fn create_indexes(&self) -> Result<()> {
        // No IF NOT EXISTS here; probe the catalog to stay idempotent.
        for spec in sql::index_statements(DIALECT, &self.tables) {
            if self.index_exists(&spec.table, &spec.name).await? {
                continue;
            }
            debug!(db.statement = %spec.sql, "create index");
            sqlx::raw_sql(&spec.sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(&sql::table_exists_sql(DIALECT))
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(&sql::column_exists_sql(DIALECT))
            .bind(table)
            .bind(column)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        validate_identifier(table)?;
        let count: i64 = sqlx::query_scalar(&sql::count_rows_sql(DIALECT, table))
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let custom = self.fields.snapshot();
        let statement = sql::select_user_by_email_sql(DIALECT, &self.tables, &custom);
        let row = sqlx::query(&statement)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::user_from_row(&row, &custom)).transpose()
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let custom = self.fields.snapshot();
        let statement = sql::select_user_by_id_sql(DIALECT, &self.tables, &custom);
        let row = sqlx::query(&statement)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::user_from_row(&row, &custom)).transpose()
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let custom = self.fields.snapshot();
        let columns = check_new_user_columns(&user.custom, &custom)?;
        let names: Vec<&str> = columns.iter().map(|(name, _, _)| *name).collect();
        let statement = sql::insert_user_sql(DIALECT, &self.tables, &names);
        let mut query = sqlx::query(&statement)
            .bind(user.email.as_str())
            .bind(user.password_hash.as_str());
        for (_, value, def) in &columns {
            query = Self::bind_value(query, def, value)?;
        }
        let result = match query.execute(&self.pool).await {
            Ok(result) => result,
            Err(err) if Self::is_unique_violation(&err) => return Err(Error::AlreadyExists),
            Err(err) => return Err(err.into()),
        };
        let id = i64::try_from(result.last_insert_id())
            .map_err(|_| Error::validation("inserted id out of range"))?;
        self.find_user_by_id(id).await?.ok_or(Error::NotFound)
    }

    async fn update_user(&self, id: i64, changes: &BTreeMap<String, FieldValue>) -> Result<bool> {
        let custom = self.fields.snapshot();
        let columns = check_update_columns(changes, &custom)?;
        let names: Vec<&str> = columns.iter().map(|(name, _, _)| *name).collect();
        let statement = sql::update_user_sql(DIALECT, &self.tables, &names);
        let mut query = sqlx::query(&statement);
        for (name, value, def) in &columns {
            query = match def {
                Some(def) => Self::bind_value(query, def, value)?,
                None => match value {
                    FieldValue::Bool(b) => query.bind(*b),
                    _ => {
                        return Err(Error::validation(format!(
                            "column `{name}` takes a boolean"
                        )))
                    }
                },
            };
        }
        let result = query.bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<bool> {
        let result = sqlx::query(&sql::update_password_sql(DIALECT, &self.tables))
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn store_refresh_token_hash(
        &self,
        user_id: i64,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(&sql::insert_refresh_token_sql(DIALECT, &self.tables))
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshTokenRecord>> {
        let row = sqlx::query(&sql::select_refresh_token_sql(DIALECT, &self.tables))
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(RefreshTokenRecord {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                expires_at: row.try_get("expires_at")?,
                revoked: row.try_get("revoked")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn revoke_refresh_token(&self, token_hash: &[u8]) -> Result<bool> {
        let result = sqlx::query(&sql::revoke_refresh_token_sql(DIALECT, &self.tables))
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query(&sql::revoke_all_tokens_sql(DIALECT, &self.tables))
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn record_login_attempt(&self, email: &str, success: bool) -> Result<()> {
        sqlx::query(&sql::insert_attempt_sql(DIALECT, &self.tables))
            .bind(email)
            .bind(success)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_recent_failures(&self, email: &str, window: Duration) -> Result<u64> {
        let window = time::Duration::try_from(window)
            .map_err(|_| Error::validation("lockout window out of range"))?;
        let cutoff = OffsetDateTime::now_utc() - window;
        let count: i64 = sqlx::query_scalar(&sql::count_recent_failures_sql(DIALECT, &self.tables))
            .bind(email)
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn replace_verification_code(
        &self,
        user_id: i64,
        purpose: VerificationPurpose,
        code_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::delete_codes_for_purpose_sql(DIALECT, &self.tables))
            .bind(user_id)
            .bind(purpose.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(&sql::insert_code_sql(DIALECT, &self.tables))
            .bind(user_id)
            .bind(purpose.as_str())
            .bind(code_hash)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_verification_code(
        &self,
        code_hash: &[u8],
        purpose: VerificationPurpose,
    ) -> Result<Option<VerificationRecord>> {
        let row = sqlx::query(&sql::select_code_sql(DIALECT, &self.tables))
            .bind(code_hash)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(VerificationRecord {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                purpose,
                expires_at: row.try_get("expires_at")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn consume_code_and_mark_verified(&self, user_id: i64, code_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::update_user_sql(DIALECT, &self.tables, &["email_verified"]))
            .bind(true)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&sql::delete_code_sql(DIALECT, &self.tables))
            .bind(code_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reset_password_and_revoke(
        &self,
        user_id: i64,
        password_hash: &str,
        code_id: i64,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::update_password_sql(DIALECT, &self.tables))
            .bind(password_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&sql::delete_code_sql(DIALECT, &self.tables))
            .bind(code_id)
            .execute(&mut *tx)
            .await?;
        let revoked = sqlx::query(&sql::revoke_all_tokens_sql(DIALECT, &self.tables))
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(revoked.rows_affected())
    }

    async fn purge_expired(
        &self,
        now: OffsetDateTime,
        attempt_retention: Duration,
    ) -> Result<PurgeReport> {
        let retention = time::Duration::try_from(attempt_retention)
            .map_err(|_| Error::validation("attempt retention out of range"))?;
        let tokens = sqlx::query(&sql::purge_tokens_sql(DIALECT, &self.tables))
            .bind(now)
            .execute(&self.pool)
            .await?;
        let codes = sqlx::query(&sql::purge_codes_sql(DIALECT, &self.tables))
            .bind(now)
            .execute(&self.pool)
            .await?;
        let attempts = sqlx::query(&sql::purge_attempts_sql(DIALECT, &self.tables))
            .bind(now - retention)
            .execute(&self.pool)
            .await?;
        Ok(PurgeReport {
            refresh_tokens: tokens.rows_affected(),
            login_attempts: attempts.rows_affected(),
            verification_codes: codes.rows_affected(),
        })
    }

    async fn raw_exec(&self, statement: &str) -> Result<u64> {
        debug!(db.statement = %statement, "raw exec");
        let result = sqlx::raw_sql(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn exec_batch(&self, statements: &[String]) -> Result<()> {
        // DDL commits implicitly on this engine; sequential is honest.
        for statement in statements {
            debug!(db.statement = %statement, "batch exec");
            sqlx::raw_sql(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MySqlStore;

    #[test]
    fn non_mysql_errors_are_not_unique_violations() {
        assert!(!MySqlStore::is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!MySqlStore::is_unique_violation(&sqlx::Error::PoolClosed));
    }
}
