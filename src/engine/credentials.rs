//! Registration, login, token refresh, and logout.

use serde_json::{Map, Value};

use crate::audit::{AuditEvent, AuditKind};
use crate::error::{Error, Result};
use crate::store::NewUser;
use crate::token::{AccessToken, Claims, TokenCodec};

use super::utils::{coerce_attributes, ensure_required_present, is_valid_email, normalize_email};
use super::{AuthEngine, Session};

/// Outcome of a logout. Revoking an unknown or already-revoked token is
/// not an error, but the caller is told nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    LoggedOut,
    NoSession,
}

impl AuthEngine {
    /// Registers a new account and opens its first session.
    ///
    /// The database unique constraint is the authority on duplicates; the
    /// pre-check only buys a friendlier failure without a wasted hash.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a malformed email, policy-violating
    /// password, or attributes that do not match the declared fields;
    /// [`Error::AlreadyExists`] when the email is taken, including losing
    /// a concurrent race.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        attributes: &Map<String, Value>,
    ) -> Result<Session> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(Error::validation("email address is malformed"));
        }
        self.policy.check(password)?;
        let defs = self.store.custom_fields();
        let custom = coerce_attributes(&defs, attributes)?;
        ensure_required_present(&defs, &custom)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            self.audit(&AuditEvent::failure(
                AuditKind::Register,
                Some(&email),
                "email already registered",
            ))?;
            return Err(Error::AlreadyExists);
        }

        let password_hash = self.hasher.hash(password).await?;
        let user = match self
            .store
            .create_user(NewUser {
                email: email.clone(),
                password_hash,
                custom,
            })
            .await
        {
            Ok(user) => user,
            Err(Error::AlreadyExists) => {
                // Lost a race with a concurrent registration; same
                // outcome as the pre-check.
                self.audit(&AuditEvent::failure(
                    AuditKind::Register,
                    Some(&email),
                    "email already registered",
                ))?;
                return Err(Error::AlreadyExists);
            }
            Err(err) => return Err(err),
        };

        let tokens = self.codec.issue_pair(user.id, &user.email)?;
        self.store
            .store_refresh_token_hash(
                user.id,
                &TokenCodec::fingerprint(&tokens.refresh_token),
                tokens.refresh_expires_at,
            )
            .await?;
        self.audit(&AuditEvent::success(
            AuditKind::Register,
            Some(user.id),
            Some(&user.email),
        ))?;
        Ok(Session {
            user: user.into(),
            tokens,
        })
    }

    /// Authenticates and opens a session.
    ///
    /// # Errors
    ///
    /// [`Error::Locked`] while the lockout threshold is reached inside
    /// the window; otherwise [`Error::InvalidCredentials`] with one
    /// generic message whether the email is unknown, the password wrong,
    /// or the account deactivated.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let email = normalize_email(email);
        if self.lockout.is_locked(self.store.as_ref(), &email).await? {
            self.audit(&AuditEvent::failure(AuditKind::Login, Some(&email), "locked"))?;
            return Err(Error::Locked);
        }

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            self.store.record_login_attempt(&email, false).await?;
            self.audit(&AuditEvent::failure(
                AuditKind::Login,
                Some(&email),
                "unknown email",
            ))?;
            return Err(Error::InvalidCredentials);
        };

        if !self.hasher.verify(password, &user.password_hash).await? {
            self.store.record_login_attempt(&email, false).await?;
            self.audit(&AuditEvent::failure(
                AuditKind::Login,
                Some(&email),
                "wrong password",
            ))?;
            return Err(Error::InvalidCredentials);
        }

        if !user.is_active {
            // Correct password for a deactivated account: generic error,
            // no ledger entry.
            self.audit(&AuditEvent::failure(
                AuditKind::Login,
                Some(&email),
                "inactive account",
            ))?;
            return Err(Error::InvalidCredentials);
        }

        self.store.record_login_attempt(&email, true).await?;
        let tokens = self.codec.issue_pair(user.id, &user.email)?;
        self.store
            .store_refresh_token_hash(
                user.id,
                &TokenCodec::fingerprint(&tokens.refresh_token),
                tokens.refresh_expires_at,
            )
            .await?;
        self.audit(&AuditEvent::success(
            AuditKind::Login,
            Some(user.id),
            Some(&user.email),
        ))?;
        Ok(Session {
            user: user.into(),
            tokens,
        })
    }

    /// Exchanges a live refresh token for a fresh access token. The
    /// refresh token itself is not rotated; it stays valid until it
    /// expires or is revoked.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or revoked token,
    /// [`Error::Expired`] past expiry, [`Error::InvalidCredentials`] for
    /// a bad signature or kind.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessToken> {
        // Stored fingerprint first: unknown and revoked tokens are
        // rejected without paying for signature verification.
        let fingerprint = TokenCodec::fingerprint(refresh_token);
        let Some(record) = self.store.find_refresh_token(&fingerprint).await? else {
            self.audit(&AuditEvent::failure(
                AuditKind::TokenRefresh,
                None,
                "unknown token",
            ))?;
            return Err(Error::NotFound);
        };
        if record.revoked {
            self.audit(&AuditEvent::failure(
                AuditKind::TokenRefresh,
                None,
                "revoked token",
            ))?;
            return Err(Error::NotFound);
        }

        let claims = match self.codec.verify_refresh(refresh_token) {
            Ok(claims) => claims,
            Err(err) => {
                self.audit(&AuditEvent::failure(
                    AuditKind::TokenRefresh,
                    None,
                    "expired or invalid token",
                ))?;
                return Err(err);
            }
        };
        let access = self.codec.issue_access(claims.sub, &claims.email)?;
        self.audit(&AuditEvent::success(
            AuditKind::TokenRefresh,
            Some(claims.sub),
            Some(&claims.email),
        ))?;
        Ok(access)
    }

    /// Revokes the session behind a refresh token. Idempotent.
    ///
    /// # Errors
    ///
    /// Storage and audit failures only; an unknown token is reported as
    /// [`LogoutOutcome::NoSession`], not an error.
    pub async fn logout(&self, refresh_token: &str) -> Result<LogoutOutcome> {
        let fingerprint = TokenCodec::fingerprint(refresh_token);
        if self.store.revoke_refresh_token(&fingerprint).await? {
            self.audit(&AuditEvent::success(AuditKind::Logout, None, None))?;
            Ok(LogoutOutcome::LoggedOut)
        } else {
            self.audit(
                &AuditEvent::success(AuditKind::Logout, None, None)
                    .with_detail("no matching session"),
            )?;
            Ok(LogoutOutcome::NoSession)
        }
    }

    /// Revokes every live session of one user; returns how many.
    ///
    /// # Errors
    ///
    /// Storage and audit failures.
    pub async fn logout_all(&self, user_id: i64) -> Result<u64> {
        let revoked = self.store.revoke_all_for_user(user_id).await?;
        self.audit(
            &AuditEvent::success(AuditKind::LogoutAll, Some(user_id), None)
                .with_detail(format!("revoked {revoked} sessions")),
        )?;
        Ok(revoked)
    }

    /// Verifies a presented access token and returns its claims. Read
    /// only; emits no audit event.
    ///
    /// # Errors
    ///
    /// [`Error::Expired`] past expiry, [`Error::InvalidCredentials`]
    /// otherwise.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims> {
        self.codec.verify_access(token)
    }
}
