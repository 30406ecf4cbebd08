//! Password hashing, verification, and the account password policy.
//!
//! Hashes use argon2id with configurable cost parameters and a random
//! per-password salt. Hashing runs on the blocking thread pool so the
//! async runtime is never stalled by a deliberately slow KDF. Costs are
//! stored inside the PHC string, so verification keeps working after a
//! cost upgrade.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use tokio::task;

use crate::error::{Error, Result};

/// OWASP baseline memory cost, in KiB.
pub const DEFAULT_M_COST_KIB: u32 = 19_456;
pub const DEFAULT_T_COST: u32 = 2;
pub const DEFAULT_P_COST: u32 = 1;

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 12;
/// Ceiling applied before hashing; argon2 input must stay bounded.
pub const MAX_PASSWORD_LEN: usize = 512;
/// Longest permitted run of one repeated character.
pub const DEFAULT_MAX_REPEAT_RUN: usize = 4;

/// Everyday passwords rejected outright, compared case-insensitively.
const WEAK_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "password1234",
    "12345678",
    "123456789",
    "1234567890",
    "qwerty123",
    "letmein123",
    "iloveyou1",
    "admin123",
    "welcome123",
    "changeme123",
];

/// Tunable argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasherConfig {
    m_cost_kib: u32,
    t_cost: u32,
    p_cost: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            m_cost_kib: DEFAULT_M_COST_KIB,
            t_cost: DEFAULT_T_COST,
            p_cost: DEFAULT_P_COST,
        }
    }
}

impl HasherConfig {
    #[must_use]
    pub fn with_m_cost_kib(mut self, m_cost_kib: u32) -> Self {
        self.m_cost_kib = m_cost_kib;
        self
    }

    #[must_use]
    pub fn with_t_cost(mut self, t_cost: u32) -> Self {
        self.t_cost = t_cost;
        self
    }

    #[must_use]
    pub fn with_p_cost(mut self, p_cost: u32) -> Self {
        self.p_cost = p_cost;
        self
    }

    fn params(self) -> Result<Params> {
        Params::new(self.m_cost_kib, self.t_cost, self.p_cost, None)
            .map_err(|err| Error::config(format!("invalid argon2 parameters: {err}")))
    }
}

/// Account password requirements, checked before any hashing happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    min_length: usize,
    require_letter: bool,
    require_digit: bool,
    max_repeat_run: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_PASSWORD_LEN,
            require_letter: true,
            require_digit: true,
            max_repeat_run: DEFAULT_MAX_REPEAT_RUN,
        }
    }
}

impl PasswordPolicy {
    #[must_use]
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    #[must_use]
    pub fn with_require_letter(mut self, require_letter: bool) -> Self {
        self.require_letter = require_letter;
        self
    }

    #[must_use]
    pub fn with_require_digit(mut self, require_digit: bool) -> Self {
        self.require_digit = require_digit;
        self
    }

    /// Zero disables the repeated-character check.
    #[must_use]
    pub fn with_max_repeat_run(mut self, max_repeat_run: usize) -> Self {
        self.max_repeat_run = max_repeat_run;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the password violates the policy.
    pub fn check(&self, password: &str) -> Result<()> {
        let chars = password.chars().count();
        if chars < self.min_length {
            return Err(Error::validation(format!(
                "password must be at least {} characters",
                self.min_length
            )));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "password must not exceed {MAX_PASSWORD_LEN} bytes"
            )));
        }
        if WEAK_PASSWORDS.contains(&password.to_lowercase().as_str()) {
            return Err(Error::validation("password is too common"));
        }
        if self.max_repeat_run > 0 && longest_run(password) > self.max_repeat_run {
            return Err(Error::validation(format!(
                "password must not repeat one character more than {} times in a row",
                self.max_repeat_run
            )));
        }
        if self.require_letter && !password.chars().any(char::is_alphabetic) {
            return Err(Error::validation("password must contain a letter"));
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(Error::validation("password must contain a digit"));
        }
        Ok(())
    }
}

fn longest_run(password: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut prev = None;
    for c in password.chars() {
        run = if prev == Some(c) { run + 1 } else { 1 };
        longest = longest.max(run);
        prev = Some(c);
    }
    longest
}

/// Hashes and verifies account passwords with argon2id.
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    config: HasherConfig,
}

impl CredentialHasher {
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the cost parameters are out of range.
    pub fn new(config: HasherConfig) -> Result<Self> {
        config.params()?;
        Ok(Self { config })
    }

    /// Hashes a password with a fresh random salt, off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hash`] when hashing fails.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let config = self.config;
        let password = password.to_owned();
        task::spawn_blocking(move || {
            let params = config.params()?;
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| Error::Hash(err.to_string()))
        })
        .await
        .map_err(|_| Error::Hash("hashing task failed".to_string()))?
    }

    /// Verifies a password against a stored PHC string, off the async
    /// runtime. Cost parameters embedded in the stored hash take
    /// precedence over the configured ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hash`] when the stored hash cannot be parsed.
    /// A wrong password is `Ok(false)`, not an error.
    pub async fn verify(&self, password: &str, stored: &str) -> Result<bool> {
        let password = password.to_owned();
        let stored = stored.to_owned();
        task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&stored)
                .map_err(|err| Error::Hash(format!("stored hash is malformed: {err}")))?;
            match Argon2::default().verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(password_hash::Error::Password) => Ok(false),
                Err(err) => Err(Error::Hash(err.to_string())),
            }
        })
        .await
        .map_err(|_| Error::Hash("verification task failed".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::{CredentialHasher, HasherConfig, PasswordPolicy};
    use crate::error::Error;

    fn fast_hasher() -> CredentialHasher {
        // Minimal costs; production defaults are far too slow for tests.
        let config = HasherConfig::default()
            .with_m_cost_kib(64)
            .with_t_cost(1)
            .with_p_cost(1);
        CredentialHasher::new(config).expect("test params are in range")
    }

    #[tokio::test]
    async fn hash_then_verify() -> anyhow::Result<()> {
        let hasher = fast_hasher();
        let hash = hasher.hash("correct horse battery 1").await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse battery 1", &hash).await?);
        assert!(!hasher.verify("wrong password 2", &hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn salts_differ_between_hashes() -> anyhow::Result<()> {
        let hasher = fast_hasher();
        let first = hasher.hash("same password 9").await?;
        let second = hasher.hash("same password 9").await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn configured_costs_end_up_in_the_hash() -> anyhow::Result<()> {
        let hasher = fast_hasher();
        let hash = hasher.hash("tuning check 3").await?;
        assert!(hash.contains("m=64,t=1,p=1"));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_stored_hash_is_an_error_not_a_mismatch() {
        let hasher = fast_hasher();
        let result = hasher.verify("anything 1", "not-a-phc-string").await;
        assert!(matches!(result, Err(Error::Hash(_))));
    }

    #[test]
    fn rejects_out_of_range_params() {
        let config = HasherConfig::default().with_m_cost_kib(1);
        assert!(matches!(
            CredentialHasher::new(config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn policy_defaults() {
        let policy = PasswordPolicy::default();
        assert!(policy.check("short1a").is_err());
        assert!(policy.check("longenoughbutnodigits").is_err());
        assert!(policy.check("123456789012345").is_err());
        assert!(policy.check("long enough with 1 digit").is_ok());
    }

    #[test]
    fn policy_is_configurable() {
        let policy = PasswordPolicy::default()
            .with_min_length(4)
            .with_require_digit(false)
            .with_require_letter(false);
        assert!(policy.check("::::").is_ok());
        assert!(policy.check(":::").is_err());
    }

    #[test]
    fn policy_caps_length_before_hashing() {
        let policy = PasswordPolicy::default();
        let long = format!("a1{}", "x".repeat(600));
        assert!(policy.check(&long).is_err());
    }

    #[test]
    fn policy_rejects_common_passwords() {
        let policy = PasswordPolicy::default().with_min_length(8);
        assert!(policy.check("Password123").is_err());
        assert!(policy.check("uncommon enough 7").is_ok());
    }

    #[test]
    fn policy_rejects_long_repeated_runs() {
        let policy = PasswordPolicy::default();
        assert!(policy.check("aaaaa plenty long 1").is_err());
        assert!(policy.check("aaaa plenty long 1").is_ok());
        let relaxed = policy.with_max_repeat_run(0);
        assert!(relaxed.check("aaaaa plenty long 1").is_ok());
    }
}
