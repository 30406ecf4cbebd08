//! Email ownership verification.

use time::OffsetDateTime;
use tracing::debug;

use crate::audit::{AuditEvent, AuditKind};
use crate::error::{Error, Result};
use crate::store::VerificationPurpose;
use crate::token::TokenCodec;

use super::utils::generate_secret;
use super::AuthEngine;

impl AuthEngine {
    /// Issues a fresh email verification code and hands the raw secret
    /// to the delivery collaborator; only its hash is stored. Reissuing
    /// supersedes any outstanding code. Already-verified accounts are a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown user, [`Error::Delivery`] when
    /// the injected sender fails.
    pub async fn request_email_verification(&self, user_id: i64) -> Result<()> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound)?;
        if user.email_verified {
            debug!(user_id, "email already verified");
            return Ok(());
        }

        let secret = generate_secret()?;
        let expires_at = self.code_expiry()?;
        self.store
            .replace_verification_code(
                user.id,
                VerificationPurpose::EmailVerify,
                &TokenCodec::fingerprint(&secret),
                expires_at,
            )
            .await?;
        self.delivery
            .deliver(VerificationPurpose::EmailVerify, &user.email, &secret)
            .await
            .map_err(|err| Error::Delivery(err.to_string()))?;
        self.audit(&AuditEvent::success(
            AuditKind::EmailVerificationRequest,
            Some(user.id),
            Some(&user.email),
        ))?;
        Ok(())
    }

    /// Confirms email ownership with a delivered code. The code is
    /// single use: consuming it and setting the verified flag land in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or already-used code,
    /// [`Error::Expired`] past the code's expiry.
    pub async fn confirm_email(&self, code: &str) -> Result<()> {
        let record = match self
            .store
            .find_verification_code(
                &TokenCodec::fingerprint(code),
                VerificationPurpose::EmailVerify,
            )
            .await?
        {
            Some(record) => record,
            None => {
                self.audit(&AuditEvent::failure(
                    AuditKind::EmailVerified,
                    None,
                    "unknown code",
                ))?;
                return Err(Error::NotFound);
            }
        };
        if record.expires_at <= OffsetDateTime::now_utc() {
            self.audit(&AuditEvent::failure(
                AuditKind::EmailVerified,
                None,
                "expired code",
            ))?;
            return Err(Error::Expired);
        }
        self.store
            .consume_code_and_mark_verified(record.user_id, record.id)
            .await?;
        self.audit(&AuditEvent::success(
            AuditKind::EmailVerified,
            Some(record.user_id),
            None,
        ))?;
        Ok(())
    }
}
