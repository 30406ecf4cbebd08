//! Small helpers shared across engine operations.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::fields::{CustomFieldDefinition, FieldValue};

/// Random bytes behind a verification or reset secret.
const SECRET_BYTES: usize = 32;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap_or_else(|_| unreachable!()));

/// Canonical form used for storage and lookups: trimmed and lowercased.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Shallow shape check; deliverability is proven by the verification
/// flow, not the regex.
pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Mints a URL-safe random secret for verification and reset codes.
///
/// # Errors
///
/// Returns [`Error::Hash`] when the operating system entropy source
/// fails.
pub(crate) fn generate_secret() -> Result<String> {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::Hash(err.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Type-checks caller attributes against the declared custom fields.
/// Unknown names are rejected, so system columns are unreachable from
/// this path by construction.
pub(crate) fn coerce_attributes(
    defs: &[CustomFieldDefinition],
    attributes: &Map<String, Value>,
) -> Result<BTreeMap<String, FieldValue>> {
    let mut values = BTreeMap::new();
    for (name, value) in attributes {
        let def = defs
            .iter()
            .find(|d| d.name() == name.as_str())
            .ok_or_else(|| Error::validation(format!("unknown attribute `{name}`")))?;
        values.insert(name.clone(), def.coerce(value)?);
    }
    Ok(values)
}

/// Registration-time check: a required field with no default must be
/// supplied, or the insert would bounce off the NOT NULL constraint.
pub(crate) fn ensure_required_present(
    defs: &[CustomFieldDefinition],
    values: &BTreeMap<String, FieldValue>,
) -> Result<()> {
    for def in defs {
        if def.required() && def.default().is_none() && !values.contains_key(def.name()) {
            return Err(Error::validation(format!(
                "attribute `{}` is required",
                def.name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn accepts_plausible_addresses() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+tag@sub.example.co"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email("ada"));
        assert!(!is_valid_email("ada@"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada @example.com"));
    }

    #[test]
    fn secrets_are_unique_and_url_safe() -> anyhow::Result<()> {
        let one = generate_secret()?;
        let two = generate_secret()?;
        assert_ne!(one, two);
        assert!(one.len() >= 40);
        assert!(one
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        Ok(())
    }

    #[test]
    fn attributes_are_coerced_against_declared_fields() -> anyhow::Result<()> {
        let defs = vec![
            CustomFieldDefinition::new("age", "integer")?,
            CustomFieldDefinition::new("nickname", "text")?,
        ];
        let mut attrs = Map::new();
        attrs.insert("age".to_string(), serde_json::json!(30));
        let values = coerce_attributes(&defs, &attrs)?;
        assert_eq!(values.get("age"), Some(&FieldValue::Int(30)));

        let mut attrs = Map::new();
        attrs.insert("shoe_size".to_string(), serde_json::json!(43));
        assert!(coerce_attributes(&defs, &attrs).is_err());

        let mut attrs = Map::new();
        attrs.insert("age".to_string(), serde_json::json!("not a number"));
        assert!(coerce_attributes(&defs, &attrs).is_err());
        Ok(())
    }

    #[test]
    fn system_columns_are_not_reachable_as_attributes() -> anyhow::Result<()> {
        let defs = vec![CustomFieldDefinition::new("age", "integer")?];
        let mut attrs = Map::new();
        attrs.insert("is_active".to_string(), serde_json::json!(false));
        assert!(coerce_attributes(&defs, &attrs).is_err());
        Ok(())
    }

    #[test]
    fn required_fields_without_defaults_must_be_supplied() -> anyhow::Result<()> {
        let required = CustomFieldDefinition::new("tenant", "text")?.with_required(true);
        let defaulted = CustomFieldDefinition::new("plan", "text")?
            .with_required(true)
            .with_default(serde_json::json!("free"));
        let defs = vec![required, defaulted];

        let empty = BTreeMap::new();
        assert!(ensure_required_present(&defs, &empty).is_err());

        let mut values = BTreeMap::new();
        values.insert("tenant".to_string(), FieldValue::Text("acme".to_string()));
        assert!(ensure_required_present(&defs, &values).is_ok());
        Ok(())
    }
}
