//! Caller-defined custom fields on the account record.
//!
//! A [`CustomFieldDefinition`] describes one extra column on the users
//! table: its name, logical type, nullability, default, and uniqueness.
//! Definitions are validated up front so that every identifier reaching
//! SQL synthesis is already known to be safe to interpolate.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::error::{Error, Result};

/// Upper bound on bound parameters per synthesized statement.
pub const MAX_BOUND_COLUMNS: usize = 100;

/// Longest accepted identifier, the PostgreSQL limit.
pub const MAX_IDENT_LEN: usize = 63;

/// Column names owned by the engine; custom fields may not shadow them.
pub const RESERVED_COLUMNS: &[&str] = &[
    "id",
    "email",
    "password_hash",
    "is_active",
    "email_verified",
    "created_at",
    "updated_at",
];

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|_| unreachable!())
});

static ENUM_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_ .-]+$").unwrap_or_else(|_| unreachable!())
});

/// Rejects anything that is not a plain SQL identifier.
///
/// Identifiers are the one part of a statement that cannot be bound as a
/// parameter, so everything interpolated into SQL must pass through here
/// first.
///
/// # Errors
///
/// Returns [`Error::Validation`] for empty, overlong, or malformed names.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("identifier must not be empty"));
    }
    if name.len() > MAX_IDENT_LEN {
        return Err(Error::validation(format!(
            "identifier `{name}` exceeds {MAX_IDENT_LEN} characters"
        )));
    }
    if !IDENT_RE.is_match(name) {
        return Err(Error::validation(format!(
            "identifier `{name}` must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    Ok(())
}

/// Logical column types supported for custom fields.
///
/// Parsing accepts loose, human-written declarations ("big integer",
/// "BIGINT", "varchar") and resolves them against [`TYPE_PATTERNS`] in
/// order, most specific pattern first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    VarChar,
    Integer,
    BigInteger,
    Boolean,
    Decimal,
    Double,
    Timestamp,
    Date,
    Json,
    Enum,
}

/// Ordered declaration patterns. Earlier entries win, so wide types sit
/// before the narrow types their names contain ("bigint" before "int",
/// "datetime" before "date", "enum" before "string").
const TYPE_PATTERNS: &[(&str, FieldType)] = &[
    ("big integer", FieldType::BigInteger),
    ("bigint", FieldType::BigInteger),
    ("bigserial", FieldType::BigInteger),
    ("double precision", FieldType::Double),
    ("double", FieldType::Double),
    ("float", FieldType::Double),
    ("real", FieldType::Double),
    ("decimal", FieldType::Decimal),
    ("numeric", FieldType::Decimal),
    ("smallint", FieldType::Integer),
    ("integer", FieldType::Integer),
    ("int", FieldType::Integer),
    ("varchar", FieldType::VarChar),
    ("character varying", FieldType::VarChar),
    ("char", FieldType::VarChar),
    ("boolean", FieldType::Boolean),
    ("bool", FieldType::Boolean),
    ("datetime", FieldType::Timestamp),
    ("timestamp", FieldType::Timestamp),
    ("date", FieldType::Date),
    ("jsonb", FieldType::Json),
    ("json", FieldType::Json),
    ("enum", FieldType::Enum),
    ("text", FieldType::Text),
    ("string", FieldType::Text),
];

impl FieldType {
    /// Resolves a human-written type declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when no pattern matches.
    pub fn parse(declared: &str) -> Result<Self> {
        let normalized = declared.trim().to_lowercase();
        TYPE_PATTERNS
            .iter()
            .find(|(pattern, _)| normalized.contains(pattern))
            .map(|(_, ty)| *ty)
            .ok_or_else(|| Error::validation(format!("unknown field type `{declared}`")))
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::VarChar => "varchar",
            Self::Integer => "integer",
            Self::BigInteger => "big integer",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Double => "double",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Json => "json",
            Self::Enum => "enum",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One caller-defined column on the users table.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomFieldDefinition {
    name: String,
    field_type: FieldType,
    required: bool,
    unique: bool,
    default: Option<Value>,
    enum_values: Vec<String>,
}

impl CustomFieldDefinition {
    /// Creates a definition from a column name and a loose type
    /// declaration. The result still needs [`validate`](Self::validate)
    /// before it may reach SQL synthesis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the type declaration is unknown.
    pub fn new(name: impl Into<String>, declared_type: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            field_type: FieldType::parse(declared_type)?,
            required: false,
            unique: false,
            default: None,
            enum_values: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Sets the column default. Timestamp fields additionally accept the
    /// string `"current_timestamp"`, rendered as the engine's now() form.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn with_enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        self.field_type
    }

    #[must_use]
    pub const fn required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub const fn unique(&self) -> bool {
        self.unique
    }

    #[must_use]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn enum_values(&self) -> &[String] {
        &self.enum_values
    }

    /// Checks the whole definition: identifier shape, reserved names,
    /// enum value set, and that any default coerces to the declared type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        if RESERVED_COLUMNS.contains(&self.name.as_str()) {
            return Err(Error::validation(format!(
                "`{}` is a reserved column name",
                self.name
            )));
        }
        match self.field_type {
            FieldType::Enum => {
                if self.enum_values.is_empty() {
                    return Err(Error::validation(format!(
                        "enum field `{}` declares no values",
                        self.name
                    )));
                }
                for value in &self.enum_values {
                    if value.is_empty()
                        || value.len() > MAX_IDENT_LEN
                        || !ENUM_VALUE_RE.is_match(value)
                    {
                        return Err(Error::validation(format!(
                            "enum field `{}` has invalid value `{value}`",
                            self.name
                        )));
                    }
                }
            }
            _ if !self.enum_values.is_empty() => {
                return Err(Error::validation(format!(
                    "field `{}` declares enum values but is not an enum",
                    self.name
                )));
            }
            _ => {}
        }
        if let Some(default) = &self.default {
            if !self.default_is_current_timestamp() {
                self.coerce(default).map_err(|_| {
                    Error::validation(format!(
                        "default for `{}` does not match type {}",
                        self.name, self.field_type
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// True when the default is the magic `current_timestamp` keyword.
    #[must_use]
    pub fn default_is_current_timestamp(&self) -> bool {
        self.field_type == FieldType::Timestamp
            && self
                .default
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|s| s.eq_ignore_ascii_case("current_timestamp"))
    }

    /// Coerces an incoming JSON value to the declared type.
    ///
    /// This is the boundary check applied to every caller-supplied
    /// attribute before it is bound as a statement parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the value does not fit the
    /// declared type, or is null for a required field.
    pub fn coerce(&self, value: &Value) -> Result<FieldValue> {
        if value.is_null() {
            if self.required {
                return Err(Error::validation(format!(
                    "field `{}` is required and cannot be null",
                    self.name
                )));
            }
            return Ok(FieldValue::Null);
        }
        let mismatch = || {
            Error::validation(format!(
                "field `{}` expects type {}, got `{value}`",
                self.name, self.field_type
            ))
        };
        match self.field_type {
            FieldType::Text | FieldType::VarChar => value
                .as_str()
                .map(|s| FieldValue::Text(s.to_string()))
                .ok_or_else(mismatch),
            FieldType::Integer => value
                .as_i64()
                .filter(|n| i32::try_from(*n).is_ok())
                .map(FieldValue::Int)
                .ok_or_else(mismatch),
            FieldType::BigInteger => value.as_i64().map(FieldValue::Int).ok_or_else(mismatch),
            FieldType::Boolean => value.as_bool().map(FieldValue::Bool).ok_or_else(mismatch),
            FieldType::Decimal => match value {
                Value::String(s) => s.parse::<Decimal>().map(FieldValue::Decimal),
                Value::Number(n) => n
                    .as_f64()
                    .ok_or(rust_decimal::Error::ExceedsMaximumPossibleValue)
                    .and_then(Decimal::try_from)
                    .map(FieldValue::Decimal),
                _ => Err(rust_decimal::Error::ExceedsMaximumPossibleValue),
            }
            .map_err(|_| mismatch()),
            FieldType::Double => value.as_f64().map(FieldValue::Double).ok_or_else(mismatch),
            FieldType::Timestamp => value
                .as_str()
                .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
                .map(FieldValue::Timestamp)
                .ok_or_else(mismatch),
            FieldType::Date => value
                .as_str()
                .and_then(|s| Date::parse(s, format_description!("[year]-[month]-[day]")).ok())
                .map(FieldValue::Date)
                .ok_or_else(mismatch),
            FieldType::Json => Ok(FieldValue::Json(value.clone())),
            FieldType::Enum => value
                .as_str()
                .filter(|s| self.enum_values.iter().any(|v| v == s))
                .map(|s| FieldValue::Text(s.to_string()))
                .ok_or_else(|| {
                    Error::validation(format!(
                        "field `{}` accepts one of {:?}, got `{value}`",
                        self.name, self.enum_values
                    ))
                }),
        }
    }
}

/// A validated, typed value ready to be bound as a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Int(i64),
    Bool(bool),
    Decimal(Decimal),
    Double(f64),
    Timestamp(OffsetDateTime),
    Date(Date),
    Json(Value),
}

impl FieldValue {
    /// Renders the value back into JSON, for returning profiles to callers.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Int(n) => Value::from(*n),
            Self::Bool(b) => Value::Bool(*b),
            Self::Decimal(d) => Value::String(d.to_string()),
            Self::Double(f) => Value::from(*f),
            Self::Timestamp(t) => t
                .format(&Rfc3339)
                .map(Value::String)
                .unwrap_or(Value::Null),
            Self::Date(d) => Value::String(d.to_string()),
            Self::Json(v) => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{validate_identifier, CustomFieldDefinition, FieldType, FieldValue};
    use crate::error::Error;

    #[test]
    fn wide_integer_wins_over_substring() {
        assert_eq!(FieldType::parse("BIGINT").ok(), Some(FieldType::BigInteger));
        assert_eq!(
            FieldType::parse("big integer").ok(),
            Some(FieldType::BigInteger)
        );
        assert_eq!(FieldType::parse("integer").ok(), Some(FieldType::Integer));
        assert_eq!(FieldType::parse("int").ok(), Some(FieldType::Integer));
    }

    #[test]
    fn datetime_is_a_timestamp_not_a_date() {
        assert_eq!(
            FieldType::parse("DATETIME").ok(),
            Some(FieldType::Timestamp)
        );
        assert_eq!(FieldType::parse("date").ok(), Some(FieldType::Date));
    }

    #[test]
    fn enumerated_string_is_an_enum() {
        assert_eq!(
            FieldType::parse("enumerated string").ok(),
            Some(FieldType::Enum)
        );
        assert_eq!(FieldType::parse("string").ok(), Some(FieldType::Text));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(matches!(
            FieldType::parse("geometry"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_identifier("nickname").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("a2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("drop table;--").is_err());
        assert!(validate_identifier("naïve").is_err());
        assert!(validate_identifier(&"x".repeat(64)).is_err());
    }

    #[test]
    fn reserved_names_are_rejected() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("password_hash", "text")?;
        assert!(matches!(def.validate(), Err(Error::Validation(_))));
        Ok(())
    }

    #[test]
    fn enum_requires_values() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("plan", "enum")?;
        assert!(def.validate().is_err());
        let def = def.with_enum_values(["free", "pro"]);
        assert!(def.validate().is_ok());
        Ok(())
    }

    #[test]
    fn enum_value_charset_is_restricted() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("plan", "enum")?.with_enum_values(["fr'ee"]);
        assert!(def.validate().is_err());
        Ok(())
    }

    #[test]
    fn default_must_match_declared_type() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("age", "integer")?.with_default(json!("young"));
        assert!(def.validate().is_err());
        let def = CustomFieldDefinition::new("age", "integer")?.with_default(json!(30));
        assert!(def.validate().is_ok());
        Ok(())
    }

    #[test]
    fn timestamp_default_accepts_the_now_keyword() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("joined_at", "timestamp")?
            .with_default(json!("CURRENT_TIMESTAMP"));
        assert!(def.default_is_current_timestamp());
        assert!(def.validate().is_ok());
        let literal = CustomFieldDefinition::new("joined_at", "timestamp")?
            .with_default(json!("2024-05-01T10:00:00Z"));
        assert!(!literal.default_is_current_timestamp());
        assert!(literal.validate().is_ok());
        Ok(())
    }

    #[test]
    fn coerce_narrow_integer_checks_range() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("age", "integer")?;
        assert_eq!(def.coerce(&json!(42))?, FieldValue::Int(42));
        assert!(def.coerce(&json!(i64::from(i32::MAX) + 1)).is_err());
        let wide = CustomFieldDefinition::new("views", "bigint")?;
        assert_eq!(
            wide.coerce(&json!(i64::from(i32::MAX) + 1))?,
            FieldValue::Int(i64::from(i32::MAX) + 1)
        );
        Ok(())
    }

    #[test]
    fn coerce_null_honors_required() -> anyhow::Result<()> {
        let optional = CustomFieldDefinition::new("bio", "text")?;
        assert_eq!(optional.coerce(&json!(null))?, FieldValue::Null);
        let required = CustomFieldDefinition::new("bio", "text")?.with_required(true);
        assert!(required.coerce(&json!(null)).is_err());
        Ok(())
    }

    #[test]
    fn coerce_timestamp_and_date() -> anyhow::Result<()> {
        let ts = CustomFieldDefinition::new("last_seen", "timestamp")?;
        assert!(matches!(
            ts.coerce(&json!("2024-05-01T10:00:00Z"))?,
            FieldValue::Timestamp(_)
        ));
        assert!(ts.coerce(&json!("yesterday")).is_err());
        let date = CustomFieldDefinition::new("born_on", "date")?;
        assert!(matches!(
            date.coerce(&json!("1990-12-31"))?,
            FieldValue::Date(_)
        ));
        assert!(date.coerce(&json!("31/12/1990")).is_err());
        Ok(())
    }

    #[test]
    fn coerce_enum_rejects_values_outside_the_set() -> anyhow::Result<()> {
        let def =
            CustomFieldDefinition::new("plan", "enum")?.with_enum_values(["free", "pro"]);
        assert_eq!(
            def.coerce(&json!("pro"))?,
            FieldValue::Text("pro".to_string())
        );
        assert!(def.coerce(&json!("enterprise")).is_err());
        Ok(())
    }

    #[test]
    fn decimal_accepts_exact_strings() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("balance", "decimal")?;
        assert_eq!(
            def.coerce(&json!("12.50"))?,
            FieldValue::Decimal("12.50".parse()?)
        );
        assert!(matches!(
            def.coerce(&json!(0.25))?,
            FieldValue::Decimal(_)
        ));
        assert!(def.coerce(&json!(true)).is_err());
        Ok(())
    }

    #[test]
    fn json_round_trips() -> anyhow::Result<()> {
        let def = CustomFieldDefinition::new("prefs", "json")?;
        let value = json!({"theme": "dark"});
        assert_eq!(def.coerce(&value)?.to_json(), value);
        Ok(())
    }
}
