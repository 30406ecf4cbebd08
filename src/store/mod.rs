//! Storage adapters: one async contract, two relational engines.
//!
//! [`AuthStore`] is the only surface the rest of the crate talks to.
//! [`PostgresStore`] and [`MySqlStore`] implement it over their native
//! pools; everything dialect-specific funnels through
//! [`SqlDialect`] and the synthesis helpers in `sql`. Operations that
//! must not be observable half-done (code consumption, password reset)
//! are composite methods here instead of leaked transaction handles.

use std::collections::BTreeMap;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::fields::{
    validate_identifier, CustomFieldDefinition, FieldValue, MAX_BOUND_COLUMNS,
};

pub mod dialect;
mod mysql;
mod postgres;
pub(crate) mod sql;

pub use dialect::SqlDialect;
pub use mysql::MySqlStore;
pub use postgres::PostgresStore;

pub const DEFAULT_POOL_SIZE: u32 = 10;

/// System columns the engine may update through [`AuthStore::update_user`].
const SYSTEM_UPDATABLE: &[&str] = &["is_active", "email_verified"];

/// Names of the four tables, overridable for embedders with naming
/// conventions. Every name is validated before it may reach SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    users: String,
    refresh_tokens: String,
    login_attempts: String,
    verification_codes: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            users: "users".to_string(),
            refresh_tokens: "refresh_tokens".to_string(),
            login_attempts: "login_attempts".to_string(),
            verification_codes: "verification_codes".to_string(),
        }
    }
}

impl TableNames {
    #[must_use]
    pub fn with_users(mut self, name: impl Into<String>) -> Self {
        self.users = name.into();
        self
    }

    #[must_use]
    pub fn with_refresh_tokens(mut self, name: impl Into<String>) -> Self {
        self.refresh_tokens = name.into();
        self
    }

    #[must_use]
    pub fn with_login_attempts(mut self, name: impl Into<String>) -> Self {
        self.login_attempts = name.into();
        self
    }

    #[must_use]
    pub fn with_verification_codes(mut self, name: impl Into<String>) -> Self {
        self.verification_codes = name.into();
        self
    }

    #[must_use]
    pub fn users(&self) -> &str {
        &self.users
    }

    #[must_use]
    pub fn refresh_tokens(&self) -> &str {
        &self.refresh_tokens
    }

    #[must_use]
    pub fn login_attempts(&self) -> &str {
        &self.login_attempts
    }

    #[must_use]
    pub fn verification_codes(&self) -> &str {
        &self.verification_codes
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a name is not a plain
    /// identifier or two tables share one name.
    pub fn validate(&self) -> Result<()> {
        let names = [
            &self.users,
            &self.refresh_tokens,
            &self.login_attempts,
            &self.verification_codes,
        ];
        for name in names {
            validate_identifier(name)?;
        }
        for (i, a) in names.iter().enumerate() {
            if names[i + 1..].contains(a) {
                return Err(Error::validation(format!(
                    "table name `{a}` is used more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Connection settings for either adapter. Validated before any network
/// attempt so a bad config fails fast with a [`Error::Config`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    host: String,
    port: Option<u16>,
    user: String,
    password: SecretString,
    database: String,
    pool_size: u32,
    tables: TableNames,
}

impl StoreConfig {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: user.into(),
            password: SecretString::default(),
            database: database.into(),
            pool_size: DEFAULT_POOL_SIZE,
            tables: TableNames::default(),
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = password;
        self
    }

    /// Defaults to the engine's well-known port when unset.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_tables(mut self, tables: TableNames) -> Self {
        self.tables = tables;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub const fn password(&self) -> &SecretString {
        &self.password
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub const fn pool_size(&self) -> u32 {
        self.pool_size
    }

    #[must_use]
    pub const fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] on empty endpoints and
    /// [`Error::Validation`] on bad table names.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config("database host is empty"));
        }
        if self.user.is_empty() {
            return Err(Error::config("database user is empty"));
        }
        if self.database.is_empty() {
            return Err(Error::config("database name is empty"));
        }
        if self.pool_size == 0 {
            return Err(Error::config("pool size must be at least 1"));
        }
        self.tables.validate()
    }
}

/// Input for [`AuthStore::create_user`]. The password is already hashed
/// and custom values already coerced by the time this exists.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub custom: BTreeMap<String, FieldValue>,
}

/// One user row, system columns plus declared custom fields. Custom
/// fields that are NULL in the row are omitted from the map.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub custom: BTreeMap<String, FieldValue>,
}

/// One stored session, keyed by token fingerprint.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub expires_at: OffsetDateTime,
    pub revoked: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPurpose {
    EmailVerify,
    PasswordReset,
}

impl VerificationPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerify => "email_verify",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// One outstanding verification code. The hash is not carried back out
/// of the store; lookups are already by hash.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    pub id: i64,
    pub user_id: i64,
    pub purpose: VerificationPurpose,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Rows removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub refresh_tokens: u64,
    pub login_attempts: u64,
    pub verification_codes: u64,
}

/// The storage contract. One implementation per engine; everything above
/// this trait is dialect-blind.
#[async_trait]
pub trait AuthStore: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    fn tables(&self) -> &TableNames;

    /// Snapshot of the registered custom field definitions.
    fn custom_fields(&self) -> Vec<CustomFieldDefinition>;

    /// Registers (or replaces, by name) one custom field definition so
    /// subsequent reads and writes include the column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the definition is invalid.
    fn register_custom_field(&self, def: CustomFieldDefinition) -> Result<()>;

    /// Closes the pool. Idempotent.
    async fn close(&self);

    /// Creates all four tables idempotently, embedding the given custom
    /// fields in the users table, and registers those definitions.
    async fn create_schema(&self, custom: &[CustomFieldDefinition]) -> Result<()>;

    /// Creates the supporting indexes idempotently.
    async fn create_indexes(&self) -> Result<()>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool>;

    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Email must already be normalized by the caller.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserRecord>>;

    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] when the unique email constraint
    /// fires, which is how concurrent duplicate registration is settled.
    async fn create_user(&self, user: NewUser) -> Result<UserRecord>;

    /// Updates the given columns; accepts `is_active`, `email_verified`,
    /// and registered custom fields. Returns false when the id is unknown.
    async fn update_user(
        &self,
        id: i64,
        changes: &BTreeMap<String, FieldValue>,
    ) -> Result<bool>;

    /// Returns false when the id is unknown.
    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<bool>;

    async fn store_refresh_token_hash(
        &self,
        user_id: i64,
        token_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> Result<()>;

    async fn find_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshTokenRecord>>;

    /// Marks one session revoked. Returns false when the token is unknown
    /// or was already revoked, so logout can report an honest outcome.
    async fn revoke_refresh_token(&self, token_hash: &[u8]) -> Result<bool>;

    /// Marks every live session of the user revoked; returns how many.
    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64>;

    /// Appends to the attempt ledger. Works for unknown emails too.
    async fn record_login_attempt(&self, email: &str, success: bool) -> Result<()>;

    /// Failed attempts for this email newer than `window` ago.
    async fn count_recent_failures(&self, email: &str, window: Duration) -> Result<u64>;

    /// Replaces any outstanding code for (user, purpose) with a new one,
    /// atomically, so at most one code per purpose is ever live.
    async fn replace_verification_code(
        &self,
        user_id: i64,
        purpose: VerificationPurpose,
        code_hash: &[u8],
        expires_at: OffsetDateTime,
    ) -> Result<()>;

    async fn find_verification_code(
        &self,
        code_hash: &[u8],
        purpose: VerificationPurpose,
    ) -> Result<Option<VerificationRecord>>;

    /// Deletes the code and flips `email_verified` in one transaction.
    async fn consume_code_and_mark_verified(&self, user_id: i64, code_id: i64) -> Result<()>;

    /// Sets the new password hash, deletes the consumed code, and revokes
    /// every live session, in one transaction. Returns sessions revoked.
    async fn reset_password_and_revoke(
        &self,
        user_id: i64,
        password_hash: &str,
        code_id: i64,
    ) -> Result<u64>;

    /// Removes expired sessions and codes, plus ledger entries older than
    /// `attempt_retention`.
    async fn purge_expired(
        &self,
        now: OffsetDateTime,
        attempt_retention: Duration,
    ) -> Result<PurgeReport>;

    /// Executes one caller-built statement. Intended for the migrator;
    /// nothing in this crate routes user input here.
    async fn raw_exec(&self, sql: &str) -> Result<u64>;

    /// Executes statements inside one transaction where the dialect's DDL
    /// allows it; sequentially otherwise, stopping at the first failure.
    async fn exec_batch(&self, statements: &[String]) -> Result<()>;
}

/// Registered custom field definitions, shared by the adapters.
///
/// Reads are snapshots; the lock is never held across an await.
#[derive(Debug, Default)]
pub(crate) struct FieldRegistry {
    defs: RwLock<Vec<CustomFieldDefinition>>,
}

impl FieldRegistry {
    pub(crate) fn snapshot(&self) -> Vec<CustomFieldDefinition> {
        self.defs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates and registers a definition, replacing any previous one
    /// with the same name.
    pub(crate) fn register(&self, def: CustomFieldDefinition) -> Result<()> {
        def.validate()?;
        let mut defs = self.defs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = defs.iter_mut().find(|d| d.name() == def.name()) {
            *existing = def;
        } else {
            defs.push(def);
        }
        Ok(())
    }
}

/// Rejects duplicate names in a definition batch before any DDL runs.
pub(crate) fn ensure_distinct_names(defs: &[CustomFieldDefinition]) -> Result<()> {
    for (i, def) in defs.iter().enumerate() {
        if defs[i + 1..].iter().any(|d| d.name() == def.name()) {
            return Err(Error::validation(format!(
                "field `{}` appears more than once",
                def.name()
            )));
        }
    }
    Ok(())
}

/// Checks an update set against the updatable system columns and the
/// registered custom fields, and enforces the bound-parameter ceiling.
/// Returns the columns in deterministic (sorted) order.
pub(crate) fn check_update_columns<'a>(
    changes: &'a BTreeMap<String, FieldValue>,
    custom: &'a [CustomFieldDefinition],
) -> Result<Vec<(&'a str, &'a FieldValue, Option<&'a CustomFieldDefinition>)>> {
    if changes.is_empty() {
        return Err(Error::validation("no columns to update"));
    }
    if changes.len() + 1 > MAX_BOUND_COLUMNS {
        return Err(Error::validation(format!(
            "update touches more than {MAX_BOUND_COLUMNS} columns"
        )));
    }
    let mut columns = Vec::with_capacity(changes.len());
    for (name, value) in changes {
        if SYSTEM_UPDATABLE.contains(&name.as_str()) {
            if !matches!(value, FieldValue::Bool(_)) {
                return Err(Error::validation(format!(
                    "column `{name}` takes a boolean"
                )));
            }
            columns.push((name.as_str(), value, None));
        } else if let Some(def) = custom.iter().find(|d| d.name() == name.as_str()) {
            columns.push((name.as_str(), value, Some(def)));
        } else {
            return Err(Error::validation(format!(
                "column `{name}` is not updatable"
            )));
        }
    }
    Ok(columns)
}

/// Checks a new user's custom values against the registry and the
/// bound-parameter ceiling. Returns the columns in deterministic order.
pub(crate) fn check_new_user_columns<'a>(
    custom_values: &'a BTreeMap<String, FieldValue>,
    custom: &'a [CustomFieldDefinition],
) -> Result<Vec<(&'a str, &'a FieldValue, &'a CustomFieldDefinition)>> {
    if custom_values.len() + 2 > MAX_BOUND_COLUMNS {
        return Err(Error::validation(format!(
            "insert touches more than {MAX_BOUND_COLUMNS} columns"
        )));
    }
    let mut columns = Vec::with_capacity(custom_values.len());
    for (name, value) in custom_values {
        let def = custom
            .iter()
            .find(|d| d.name() == name.as_str())
            .ok_or_else(|| {
                Error::validation(format!("unknown custom field `{name}`"))
            })?;
        columns.push((name.as_str(), value, def));
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        check_new_user_columns, check_update_columns, ensure_distinct_names, FieldRegistry,
        StoreConfig, TableNames, VerificationPurpose,
    };
    use crate::error::Error;
    use crate::fields::{CustomFieldDefinition, FieldValue};

    #[test]
    fn default_table_names_validate() {
        assert!(TableNames::default().validate().is_ok());
    }

    #[test]
    fn hostile_table_names_are_rejected() {
        let tables = TableNames::default().with_users("users; DROP TABLE users");
        assert!(matches!(tables.validate(), Err(Error::Validation(_))));
        let tables = TableNames::default().with_users("refresh_tokens");
        assert!(tables.validate().is_err());
    }

    #[test]
    fn config_validates_before_any_network_attempt() {
        assert!(StoreConfig::new("", "app", "appdb").validate().is_err());
        assert!(StoreConfig::new("db.local", "", "appdb").validate().is_err());
        assert!(StoreConfig::new("db.local", "app", "").validate().is_err());
        assert!(StoreConfig::new("db.local", "app", "appdb")
            .with_pool_size(0)
            .validate()
            .is_err());
        assert!(StoreConfig::new("db.local", "app", "appdb")
            .validate()
            .is_ok());
    }

    #[test]
    fn registry_replaces_by_name() -> anyhow::Result<()> {
        let registry = FieldRegistry::default();
        registry.register(CustomFieldDefinition::new("age", "integer")?)?;
        registry.register(CustomFieldDefinition::new("age", "bigint")?)?;
        let defs = registry.snapshot();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].field_type().as_str(), "big integer");
        Ok(())
    }

    #[test]
    fn registry_rejects_invalid_definitions() -> anyhow::Result<()> {
        let registry = FieldRegistry::default();
        let reserved = CustomFieldDefinition::new("email", "text")?;
        assert!(registry.register(reserved).is_err());
        assert!(registry.snapshot().is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_batch_names_are_rejected() -> anyhow::Result<()> {
        let defs = vec![
            CustomFieldDefinition::new("age", "integer")?,
            CustomFieldDefinition::new("age", "integer")?,
        ];
        assert!(ensure_distinct_names(&defs).is_err());
        Ok(())
    }

    #[test]
    fn update_columns_allow_system_bools_and_custom_fields() -> anyhow::Result<()> {
        let custom = vec![CustomFieldDefinition::new("nickname", "text")?];
        let mut changes = BTreeMap::new();
        changes.insert("is_active".to_string(), FieldValue::Bool(false));
        changes.insert(
            "nickname".to_string(),
            FieldValue::Text("kai".to_string()),
        );
        let columns = check_update_columns(&changes, &custom)?;
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].0, "is_active");
        assert!(columns[0].2.is_none());
        assert_eq!(columns[1].0, "nickname");
        assert!(columns[1].2.is_some());
        Ok(())
    }

    #[test]
    fn update_rejects_unknown_and_untouchable_columns() {
        let mut changes = BTreeMap::new();
        changes.insert(
            "password_hash".to_string(),
            FieldValue::Text("x".to_string()),
        );
        assert!(check_update_columns(&changes, &[]).is_err());
        let mut changes = BTreeMap::new();
        changes.insert("is_active".to_string(), FieldValue::Int(1));
        assert!(check_update_columns(&changes, &[]).is_err());
        let empty = BTreeMap::new();
        assert!(check_update_columns(&empty, &[]).is_err());
    }

    #[test]
    fn bound_column_ceiling_is_enforced() -> anyhow::Result<()> {
        let mut custom = Vec::new();
        let mut values = BTreeMap::new();
        for i in 0..99 {
            let name = format!("f{i}");
            custom.push(CustomFieldDefinition::new(&name, "integer")?);
            values.insert(name, FieldValue::Int(1));
        }
        assert!(check_new_user_columns(&values, &custom).is_err());
        assert!(check_update_columns(&values, &custom).is_ok());
        Ok(())
    }

    #[test]
    fn purpose_labels_are_stable() {
        // Stored in rows; renaming them would orphan outstanding codes.
        assert_eq!(VerificationPurpose::EmailVerify.as_str(), "email_verify");
        assert_eq!(
            VerificationPurpose::PasswordReset.as_str(),
            "password_reset"
        );
    }
}
