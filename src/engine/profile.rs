//! Profile attribute updates, deactivation, and retention cleanup.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::info;

use crate::audit::{AuditEvent, AuditKind};
use crate::error::{Error, Result};
use crate::fields::FieldValue;
use crate::store::PurgeReport;

use super::utils::coerce_attributes;
use super::{AuthEngine, PublicUser};

impl AuthEngine {
    /// Updates declared custom attributes and returns the fresh record.
    /// Ids, emails, and credentials have their own flows and are not
    /// reachable from here.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for unknown attributes, type mismatches, or
    /// an empty update; [`Error::NotFound`] for an unknown user.
    pub async fn update_profile(
        &self,
        user_id: i64,
        attributes: &Map<String, Value>,
    ) -> Result<PublicUser> {
        let defs = self.store.custom_fields();
        let changes = coerce_attributes(&defs, attributes)?;
        if !self.store.update_user(user_id, &changes).await? {
            return Err(Error::NotFound);
        }
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(Error::NotFound)?;
        self.audit(&AuditEvent::success(
            AuditKind::ProfileUpdate,
            Some(user_id),
            Some(&user.email),
        ))?;
        Ok(user.into())
    }

    /// Deactivates an account and revokes every open session; the row
    /// itself is kept. Returns sessions revoked.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown user.
    pub async fn deactivate_user(&self, user_id: i64) -> Result<u64> {
        let mut changes = BTreeMap::new();
        changes.insert("is_active".to_string(), FieldValue::Bool(false));
        if !self.store.update_user(user_id, &changes).await? {
            return Err(Error::NotFound);
        }
        let revoked = self.store.revoke_all_for_user(user_id).await?;
        self.audit(
            &AuditEvent::success(AuditKind::Deactivate, Some(user_id), None)
                .with_detail(format!("revoked {revoked} sessions")),
        )?;
        Ok(revoked)
    }

    /// Retention sweep: drops expired sessions and codes, and ledger
    /// entries older than the configured retention. Meant to run
    /// periodically; the report goes to the log, not the audit stream.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn purge_expired(&self) -> Result<PurgeReport> {
        let report = self
            .store
            .purge_expired(OffsetDateTime::now_utc(), self.attempt_retention)
            .await?;
        info!(
            refresh_tokens = report.refresh_tokens,
            login_attempts = report.login_attempts,
            verification_codes = report.verification_codes,
            "retention sweep"
        );
        Ok(report)
    }
}
