//! Session token issuance and verification.
//!
//! Access and refresh tokens are HS256 JWTs signed with two independent
//! secrets, so a leaked access secret can never mint refresh tokens. A
//! `kind` claim is embedded and checked on verification as a second
//! barrier against token confusion. Raw refresh tokens are never stored;
//! [`TokenCodec::fingerprint`] is the only representation that may touch
//! the database.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Discriminates the two token flavors inside the signed claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed claims carried by every issued token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub kind: TokenKind,
}

/// Access and refresh token issued together at login or registration.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Human-readable access token lifetime, e.g. `15m`.
    pub expires_in: String,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

/// A lone access token, as returned by the refresh operation.
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: String,
}

/// Signs and verifies both token flavors.
pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl TokenCodec {
    #[must_use]
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // No leeway: an expired token is expired.
        validation.leeway = 0;
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            access_ttl,
            refresh_ttl,
            validation,
        }
    }

    /// Issues a fresh access and refresh token for one user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] when signing fails.
    pub fn issue_pair(&self, user_id: i64, email: &str) -> Result<TokenPair> {
        let now = OffsetDateTime::now_utc();
        let access = self.sign(user_id, email, TokenKind::Access, now)?;
        let refresh = self.sign(user_id, email, TokenKind::Refresh, now)?;
        let refresh_secs = i64::try_from(self.refresh_ttl.as_secs()).unwrap_or(i64::MAX);
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: describe_ttl(self.access_ttl),
            refresh_expires_at: now + time::Duration::seconds(refresh_secs),
        })
    }

    /// Issues a lone access token, as the refresh operation does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] when signing fails.
    pub fn issue_access(&self, user_id: i64, email: &str) -> Result<AccessToken> {
        let token = self.sign(user_id, email, TokenKind::Access, OffsetDateTime::now_utc())?;
        Ok(AccessToken {
            token,
            expires_in: describe_ttl(self.access_ttl),
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::Expired`] for an expired token and
    /// [`Error::InvalidCredentials`] for any other verification failure,
    /// including a refresh token presented as an access token.
    pub fn verify_access(&self, token: &str) -> Result<Claims> {
        self.verify(token, TokenKind::Access)
    }

    /// # Errors
    ///
    /// Same mapping as [`verify_access`](Self::verify_access).
    pub fn verify_refresh(&self, token: &str) -> Result<Claims> {
        self.verify(token, TokenKind::Refresh)
    }

    /// SHA-256 fingerprint of a raw token, the only form stored at rest.
    #[must_use]
    pub fn fingerprint(token: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hasher.finalize().to_vec()
    }

    fn sign(
        &self,
        user_id: i64,
        email: &str,
        kind: TokenKind,
        now: OffsetDateTime,
    ) -> Result<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let iat = now.unix_timestamp();
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            iat,
            exp: iat + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            kind,
        };
        let key = match kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
        };
        Ok(encode(&Header::default(), &claims, key)?)
    }

    fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims> {
        let key = match expected {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };
        let data = decode::<Claims>(token, key, &self.validation).map_err(|err| {
            if matches!(err.kind(), ErrorKind::ExpiredSignature) {
                Error::Expired
            } else {
                Error::InvalidCredentials
            }
        })?;
        if data.claims.kind != expected {
            return Err(Error::InvalidCredentials);
        }
        Ok(data.claims)
    }
}

/// Renders a lifetime as its largest whole unit: `14d`, `36h`, `15m`, `90s`.
#[must_use]
pub fn describe_ttl(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    if secs >= 86_400 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs >= 3_600 && secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jsonwebtoken::{encode, EncodingKey, Header};
    use time::OffsetDateTime;

    use super::{describe_ttl, Claims, TokenCodec, TokenKind};
    use crate::error::Error;

    const ACCESS_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const REFRESH_SECRET: &[u8] = b"fedcba9876543210fedcba9876543210";

    fn codec() -> TokenCodec {
        TokenCodec::new(
            ACCESS_SECRET,
            REFRESH_SECRET,
            Duration::from_secs(900),
            Duration::from_secs(14 * 86_400),
        )
    }

    #[test]
    fn issue_and_verify_round_trip() -> anyhow::Result<()> {
        let codec = codec();
        let pair = codec.issue_pair(7, "user@example.com")?;
        let access = codec.verify_access(&pair.access_token)?;
        assert_eq!(access.sub, 7);
        assert_eq!(access.email, "user@example.com");
        assert_eq!(access.kind, TokenKind::Access);
        let refresh = codec.verify_refresh(&pair.refresh_token)?;
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert_eq!(refresh.exp - refresh.iat, 14 * 86_400);
        assert_eq!(pair.expires_in, "15m");
        Ok(())
    }

    #[test]
    fn token_kinds_do_not_cross() -> anyhow::Result<()> {
        let codec = codec();
        let pair = codec.issue_pair(7, "user@example.com")?;
        assert!(matches!(
            codec.verify_access(&pair.refresh_token),
            Err(Error::InvalidCredentials)
        ));
        assert!(matches!(
            codec.verify_refresh(&pair.access_token),
            Err(Error::InvalidCredentials)
        ));
        Ok(())
    }

    #[test]
    fn kind_claim_is_checked_even_under_the_right_key() -> anyhow::Result<()> {
        // Sign an access-kind claim with the refresh secret; the signature
        // verifies, the kind must still fail.
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: 7,
            email: "user@example.com".to_string(),
            iat: now,
            exp: now + 600,
            kind: TokenKind::Access,
        };
        let forged = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(REFRESH_SECRET),
        )?;
        assert!(matches!(
            codec().verify_refresh(&forged),
            Err(Error::InvalidCredentials)
        ));
        Ok(())
    }

    #[test]
    fn expired_token_maps_to_expired() -> anyhow::Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: 7,
            email: "user@example.com".to_string(),
            iat: now - 600,
            exp: now - 60,
            kind: TokenKind::Refresh,
        };
        let stale = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(REFRESH_SECRET),
        )?;
        assert!(matches!(codec().verify_refresh(&stale), Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn foreign_signature_is_rejected() -> anyhow::Result<()> {
        let other = TokenCodec::new(
            b"another-secret-another-secret-32",
            REFRESH_SECRET,
            Duration::from_secs(900),
            Duration::from_secs(86_400),
        );
        let pair = other.issue_pair(7, "user@example.com")?;
        assert!(matches!(
            codec().verify_access(&pair.access_token),
            Err(Error::InvalidCredentials)
        ));
        Ok(())
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            codec().verify_access("not.a.jwt"),
            Err(Error::InvalidCredentials)
        ));
    }

    #[test]
    fn fingerprint_is_stable_and_token_specific() {
        let a = TokenCodec::fingerprint("token-a");
        let b = TokenCodec::fingerprint("token-a");
        let c = TokenCodec::fingerprint("token-b");
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ttl_descriptions_pick_the_largest_whole_unit() {
        assert_eq!(describe_ttl(Duration::from_secs(14 * 86_400)), "14d");
        assert_eq!(describe_ttl(Duration::from_secs(36 * 3_600)), "36h");
        assert_eq!(describe_ttl(Duration::from_secs(900)), "15m");
        assert_eq!(describe_ttl(Duration::from_secs(90)), "90s");
        assert_eq!(describe_ttl(Duration::from_secs(0)), "0s");
    }
}
