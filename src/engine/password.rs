//! Password change and reset flows.

use time::OffsetDateTime;

use crate::audit::{AuditEvent, AuditKind};
use crate::error::{Error, Result};
use crate::store::VerificationPurpose;
use crate::token::TokenCodec;

use super::utils::{generate_secret, normalize_email};
use super::AuthEngine;

impl AuthEngine {
    /// Changes the password of an authenticated user, then revokes every
    /// open session so each device must log in again. Returns how many
    /// sessions were revoked.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown user,
    /// [`Error::InvalidCredentials`] when the current password is wrong,
    /// [`Error::Validation`] when the new password is unchanged or
    /// violates the policy.
    pub async fn change_password(&self, user_id: i64, current: &str, new: &str) -> Result<u64> {
        if current == new {
            return Err(Error::validation(
                "new password must differ from the current one",
            ));
        }
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !self.hasher.verify(current, &user.password_hash).await? {
            self.audit(&AuditEvent::failure(
                AuditKind::PasswordChange,
                Some(&user.email),
                "wrong current password",
            ))?;
            return Err(Error::InvalidCredentials);
        }
        self.policy.check(new)?;

        let password_hash = self.hasher.hash(new).await?;
        if !self.store.update_password_hash(user_id, &password_hash).await? {
            return Err(Error::NotFound);
        }
        let revoked = self.store.revoke_all_for_user(user_id).await?;
        self.audit(
            &AuditEvent::success(AuditKind::PasswordChange, Some(user_id), Some(&user.email))
                .with_detail(format!("revoked {revoked} sessions")),
        )?;
        Ok(revoked)
    }

    /// Starts a password reset. The caller sees success whether or not
    /// the email exists, so the endpoint cannot be used to probe for
    /// accounts; only the audit trail records the difference.
    ///
    /// # Errors
    ///
    /// [`Error::Delivery`] when the injected sender fails, plus storage
    /// and audit failures.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            self.audit(&AuditEvent::failure(
                AuditKind::PasswordResetRequest,
                Some(&email),
                "unknown email",
            ))?;
            return Ok(());
        };
        if !user.is_active {
            self.audit(&AuditEvent::failure(
                AuditKind::PasswordResetRequest,
                Some(&email),
                "inactive account",
            ))?;
            return Ok(());
        }

        let secret = generate_secret()?;
        let expires_at = self.code_expiry()?;
        self.store
            .replace_verification_code(
                user.id,
                VerificationPurpose::PasswordReset,
                &TokenCodec::fingerprint(&secret),
                expires_at,
            )
            .await?;
        self.delivery
            .deliver(VerificationPurpose::PasswordReset, &user.email, &secret)
            .await
            .map_err(|err| Error::Delivery(err.to_string()))?;
        self.audit(&AuditEvent::success(
            AuditKind::PasswordResetRequest,
            Some(user.id),
            Some(&user.email),
        ))?;
        Ok(())
    }

    /// Completes a password reset with a delivered code. The password
    /// update, code consumption, and session revocation land in one
    /// transaction; a crash cannot leave stale sessions alive next to
    /// the new password. Returns sessions revoked.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or already-used code,
    /// [`Error::Expired`] past the code's expiry, [`Error::Validation`]
    /// when the new password violates the policy.
    pub async fn reset_password(&self, code: &str, new_password: &str) -> Result<u64> {
        let record = match self
            .store
            .find_verification_code(
                &TokenCodec::fingerprint(code),
                VerificationPurpose::PasswordReset,
            )
            .await?
        {
            Some(record) => record,
            None => {
                self.audit(&AuditEvent::failure(
                    AuditKind::PasswordReset,
                    None,
                    "unknown code",
                ))?;
                return Err(Error::NotFound);
            }
        };
        if record.expires_at <= OffsetDateTime::now_utc() {
            self.audit(&AuditEvent::failure(
                AuditKind::PasswordReset,
                None,
                "expired code",
            ))?;
            return Err(Error::Expired);
        }
        self.policy.check(new_password)?;

        let password_hash = self.hasher.hash(new_password).await?;
        let revoked = self
            .store
            .reset_password_and_revoke(record.user_id, &password_hash, record.id)
            .await?;
        self.audit(
            &AuditEvent::success(AuditKind::PasswordReset, Some(record.user_id), None)
                .with_detail(format!("revoked {revoked} sessions")),
        )?;
        Ok(revoked)
    }
}
