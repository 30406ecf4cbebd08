//! Structured audit events for every state-changing operation.
//!
//! Sinks are registered as an ordered list and invoked synchronously in
//! registration order. A sink failure aborts the operation that emitted
//! the event; silently losing audit records is worse than failing loudly.

use std::fmt;

use serde::Serialize;
use tracing::info;

/// Boxed error returned by sink implementations.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Register,
    Login,
    TokenRefresh,
    Logout,
    LogoutAll,
    PasswordChange,
    PasswordResetRequest,
    PasswordReset,
    EmailVerificationRequest,
    EmailVerified,
    ProfileUpdate,
    Deactivate,
}

impl AuditKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::TokenRefresh => "token_refresh",
            Self::Logout => "logout",
            Self::LogoutAll => "logout_all",
            Self::PasswordChange => "password_change",
            Self::PasswordResetRequest => "password_reset_request",
            Self::PasswordReset => "password_reset",
            Self::EmailVerificationRequest => "email_verification_request",
            Self::EmailVerified => "email_verified",
            Self::ProfileUpdate => "profile_update",
            Self::Deactivate => "deactivate",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One audit record, emitted after the outcome of an operation is known.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub outcome: AuditOutcome,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub detail: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn success(kind: AuditKind, user_id: Option<i64>, email: Option<&str>) -> Self {
        Self {
            kind,
            outcome: AuditOutcome::Success,
            user_id,
            email: email.map(ToOwned::to_owned),
            detail: None,
        }
    }

    #[must_use]
    pub fn failure(kind: AuditKind, email: Option<&str>, detail: &str) -> Self {
        Self {
            kind,
            outcome: AuditOutcome::Failure,
            user_id: None,
            email: email.map(ToOwned::to_owned),
            detail: Some(detail.to_owned()),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Receives audit events. Implementations must be cheap and infallible in
/// the common case; returning an error aborts the emitting operation.
pub trait AuditSink: Send + Sync {
    /// # Errors
    ///
    /// Any error is surfaced to the caller of the emitting operation.
    fn emit(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// Default sink: one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), SinkError> {
        info!(
            kind = %event.kind,
            outcome = ?event.outcome,
            user_id = event.user_id,
            email = event.email.as_deref(),
            detail = event.detail.as_deref(),
            "audit"
        );
        Ok(())
    }
}

/// Discards every event. For tests and for embedders that wire their own
/// pipeline elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditEvent, AuditKind, AuditOutcome, AuditSink, NoopAuditSink, TracingAuditSink};

    #[test]
    fn constructors_fill_the_outcome() {
        let ok = AuditEvent::success(AuditKind::Login, Some(1), Some("a@example.com"));
        assert_eq!(ok.outcome, AuditOutcome::Success);
        assert_eq!(ok.user_id, Some(1));
        let failed = AuditEvent::failure(AuditKind::Login, Some("a@example.com"), "bad password");
        assert_eq!(failed.outcome, AuditOutcome::Failure);
        assert_eq!(failed.detail.as_deref(), Some("bad password"));
    }

    #[test]
    fn kinds_serialize_snake_case() -> anyhow::Result<()> {
        let event = AuditEvent::success(AuditKind::PasswordResetRequest, None, None);
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["kind"], "password_reset_request");
        assert_eq!(json["outcome"], "success");
        Ok(())
    }

    #[test]
    fn bundled_sinks_accept_events() {
        let event = AuditEvent::success(AuditKind::Logout, Some(2), None);
        assert!(TracingAuditSink.emit(&event).is_ok());
        assert!(NoopAuditSink.emit(&event).is_ok());
    }
}
