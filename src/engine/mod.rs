//! The credential and session engine.
//!
//! [`AuthEngine`] orchestrates hashing, token issuance, lockout, audit,
//! and storage behind one async surface. It is built once at startup
//! from an [`AuthConfig`] that is validated before anything touches the
//! network; signing secrets live only inside the codec afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::audit::{AuditEvent, AuditSink, SinkError, TracingAuditSink};
use crate::error::{Error, Result};
use crate::lockout::{LockoutTracker, DEFAULT_LOCKOUT_THRESHOLD, DEFAULT_LOCKOUT_WINDOW};
use crate::password::{CredentialHasher, HasherConfig, PasswordPolicy};
use crate::store::{AuthStore, UserRecord, VerificationPurpose};
use crate::token::{TokenCodec, TokenPair};

mod credentials;
mod password;
mod profile;
mod utils;
mod verification;


pub use credentials::LogoutOutcome;

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_ATTEMPT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const MIN_SECRET_LEN: usize = 32;

/// Scaffolding phrases refused inside production secrets, even padded
/// out to the minimum length.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "changeme", "secret", "password", "default"];

/// Engine settings. Secrets are wrapped so they never appear in logs.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    access_secret: SecretString,
    refresh_secret: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
    code_ttl: Duration,
    attempt_retention: Duration,
    hasher: HasherConfig,
    policy: PasswordPolicy,
    lockout_threshold: u32,
    lockout_window: Duration,
    production: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(access_secret: SecretString, refresh_secret: SecretString) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            code_ttl: DEFAULT_CODE_TTL,
            attempt_retention: DEFAULT_ATTEMPT_RETENTION,
            hasher: HasherConfig::default(),
            policy: PasswordPolicy::default(),
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window: DEFAULT_LOCKOUT_WINDOW,
            production: false,
        }
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Lifetime of email verification and password reset codes.
    #[must_use]
    pub fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    /// How long attempt ledger entries survive retention sweeps.
    #[must_use]
    pub fn with_attempt_retention(mut self, retention: Duration) -> Self {
        self.attempt_retention = retention;
        self
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: HasherConfig) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, threshold: u32, window: Duration) -> Self {
        self.lockout_threshold = threshold;
        self.lockout_window = window;
        self
    }

    /// Enables the stricter production checks on secrets.
    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first insecure or
    /// inconsistent setting.
    pub fn validate(&self) -> Result<()> {
        let access = self.access_secret.expose_secret();
        let refresh = self.refresh_secret.expose_secret();
        if access.len() < MIN_SECRET_LEN {
            return Err(Error::config(format!(
                "access token secret is shorter than {MIN_SECRET_LEN} bytes"
            )));
        }
        if refresh.len() < MIN_SECRET_LEN {
            return Err(Error::config(format!(
                "refresh token secret is shorter than {MIN_SECRET_LEN} bytes"
            )));
        }
        if access == refresh {
            return Err(Error::config(
                "access and refresh token secrets must differ",
            ));
        }
        if self.production {
            for secret in [access, refresh] {
                let lowered = secret.to_lowercase();
                if PLACEHOLDER_SECRETS.iter().any(|p| lowered.contains(p)) {
                    return Err(Error::config(
                        "placeholder token secret refused in production",
                    ));
                }
            }
        }
        if self.access_ttl.is_zero() {
            return Err(Error::config("access token lifetime must be positive"));
        }
        if self.refresh_ttl <= self.access_ttl {
            return Err(Error::config(
                "refresh token lifetime must exceed the access token lifetime",
            ));
        }
        if self.code_ttl.is_zero() {
            return Err(Error::config("verification code lifetime must be positive"));
        }
        if self.lockout_threshold == 0 {
            return Err(Error::config("lockout threshold must be at least 1"));
        }
        if self.lockout_window.is_zero() {
            return Err(Error::config("lockout window must be positive"));
        }
        // Sweeping ledger entries younger than the window would undo
        // lockouts early.
        if self.attempt_retention < self.lockout_window {
            return Err(Error::config(
                "attempt retention must cover the lockout window",
            ));
        }
        Ok(())
    }
}

/// Hands verification and reset secrets to the outside world, typically
/// an email sender. The raw secret exists only for the duration of this
/// call; only its hash is stored.
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    /// # Errors
    ///
    /// Any error aborts the requesting operation with
    /// [`Error::Delivery`].
    async fn deliver(
        &self,
        purpose: VerificationPurpose,
        email: &str,
        secret: &str,
    ) -> std::result::Result<(), SinkError>;
}

/// Default delivery: drops the secret and logs that it did. Real
/// deployments inject their own sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelivery;

#[async_trait]
impl CodeDelivery for NoopDelivery {
    async fn deliver(
        &self,
        purpose: VerificationPurpose,
        email: &str,
        _secret: &str,
    ) -> std::result::Result<(), SinkError> {
        debug!(purpose = purpose.as_str(), email, "verification secret issued but not delivered");
        Ok(())
    }
}

/// A user as returned to callers: everything except the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub custom: BTreeMap<String, Value>,
}

impl From<UserRecord> for PublicUser {
    fn from(user: UserRecord) -> Self {
        let custom = user
            .custom
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Self {
            id: user.id,
            email: user.email,
            is_active: user.is_active,
            email_verified: user.email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
            custom,
        }
    }
}

/// Result of a successful registration or login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user: PublicUser,
    pub tokens: TokenPair,
}

/// Builds an [`AuthEngine`], validating the configuration first.
pub struct AuthEngineBuilder {
    store: Arc<dyn AuthStore>,
    config: AuthConfig,
    sinks: Vec<Arc<dyn AuditSink>>,
    delivery: Arc<dyn CodeDelivery>,
}

impl AuthEngineBuilder {
    /// Appends an audit sink; sinks run in registration order. When none
    /// are added the engine falls back to [`TracingAuditSink`].
    #[must_use]
    pub fn add_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: Arc<dyn CodeDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is insecure or
    /// inconsistent.
    pub fn build(self) -> Result<AuthEngine> {
        self.config.validate()?;
        let hasher = CredentialHasher::new(self.config.hasher)?;
        let codec = TokenCodec::new(
            self.config.access_secret.expose_secret().as_bytes(),
            self.config.refresh_secret.expose_secret().as_bytes(),
            self.config.access_ttl,
            self.config.refresh_ttl,
        );
        let lockout = LockoutTracker::new(
            self.config.lockout_threshold,
            self.config.lockout_window,
        );
        let sinks = if self.sinks.is_empty() {
            vec![Arc::new(TracingAuditSink) as Arc<dyn AuditSink>]
        } else {
            self.sinks
        };
        Ok(AuthEngine {
            store: self.store,
            hasher,
            codec,
            lockout,
            sinks,
            delivery: self.delivery,
            policy: self.config.policy,
            code_ttl: self.config.code_ttl,
            attempt_retention: self.config.attempt_retention,
        })
    }
}

/// Credential and session lifecycle over one storage adapter.
pub struct AuthEngine {
    store: Arc<dyn AuthStore>,
    hasher: CredentialHasher,
    codec: TokenCodec,
    lockout: LockoutTracker,
    sinks: Vec<Arc<dyn AuditSink>>,
    delivery: Arc<dyn CodeDelivery>,
    policy: PasswordPolicy,
    code_ttl: Duration,
    attempt_retention: Duration,
}

impl AuthEngine {
    #[must_use]
    pub fn builder(store: Arc<dyn AuthStore>, config: AuthConfig) -> AuthEngineBuilder {
        AuthEngineBuilder {
            store,
            config,
            sinks: Vec::new(),
            delivery: Arc::new(NoopDelivery),
        }
    }

    /// The underlying store, shared with migrators and embedders.
    #[must_use]
    pub fn store(&self) -> Arc<dyn AuthStore> {
        Arc::clone(&self.store)
    }

    /// Emits one event through every sink, in order. The first sink
    /// error aborts the emitting operation.
    fn audit(&self, event: &AuditEvent) -> Result<()> {
        for sink in &self.sinks {
            sink.emit(event)
                .map_err(|err| Error::Audit(err.to_string()))?;
        }
        Ok(())
    }

    fn code_expiry(&self) -> Result<OffsetDateTime> {
        let ttl = time::Duration::try_from(self.code_ttl)
            .map_err(|_| Error::config("verification code lifetime out of range"))?;
        Ok(OffsetDateTime::now_utc() + ttl)
    }
}
