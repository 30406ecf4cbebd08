//! Credential and session management for SQL-backed applications.
//!
//! The crate is built from three layers. [`store`] adapts PostgreSQL
//! and MySQL behind one async [`AuthStore`] contract, synthesizing
//! dialect-correct SQL in which every value travels as a bound
//! parameter. [`engine`] runs the account lifecycle on top of any
//! store: argon2 password hashing, JWT access/refresh pairs with
//! refresh tokens hashed at rest, a login-attempt ledger with
//! time-window lockout, verification and reset codes, and an audit
//! event per state change. [`migrate`] adds custom columns to a live
//! users table, transactionally where the dialect allows it.
//!
//! Raw secrets never reach storage: passwords are stored as argon2
//! hashes, refresh tokens and one-time codes as SHA-256 digests.

pub mod audit;
pub mod engine;
pub mod error;
pub mod fields;
pub mod lockout;
pub mod migrate;
pub mod password;
pub mod store;
pub mod token;

pub use audit::{
    AuditEvent, AuditKind, AuditOutcome, AuditSink, NoopAuditSink, SinkError, TracingAuditSink,
};
pub use engine::{
    AuthConfig, AuthEngine, AuthEngineBuilder, CodeDelivery, LogoutOutcome, NoopDelivery,
    PublicUser, Session,
};
pub use error::{Error, Result};
pub use fields::{CustomFieldDefinition, FieldType, FieldValue};
pub use lockout::LockoutTracker;
pub use migrate::{MigrationOptions, MigrationReport, SchemaMigrator};
pub use password::{CredentialHasher, HasherConfig, PasswordPolicy};
pub use store::{
    AuthStore, MySqlStore, NewUser, PostgresStore, PurgeReport, RefreshTokenRecord, SqlDialect,
    StoreConfig, TableNames, UserRecord, VerificationPurpose, VerificationRecord,
};
pub use token::{AccessToken, Claims, TokenCodec, TokenKind, TokenPair};
