//! Dialect strategy: every syntax difference between the two supported
//! engines lives here, so statement synthesis stays dialect-blind.

use std::fmt;
use std::fmt::Write;

use crate::fields::{CustomFieldDefinition, FieldType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

impl SqlDialect {
    /// Positional placeholder for the n-th bound parameter (1-based).
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::MySql => "?".to_string(),
        }
    }

    /// Comma-separated placeholder list starting at parameter `start`.
    #[must_use]
    pub fn placeholders(self, start: usize, count: usize) -> String {
        let mut out = String::new();
        for i in 0..count {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}", self.placeholder(start + i));
        }
        out
    }

    /// Quotes an already-validated identifier.
    ///
    /// Identifiers must have passed
    /// [`validate_identifier`](crate::fields::validate_identifier); quoting
    /// is belt on top of that, not a substitute for it.
    #[must_use]
    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Self::Postgres => format!("\"{ident}\""),
            Self::MySql => format!("`{ident}`"),
        }
    }

    /// Auto-incrementing 64-bit primary key column definition.
    #[must_use]
    pub const fn autoincrement_pk(self) -> &'static str {
        match self {
            Self::Postgres => "BIGSERIAL PRIMARY KEY",
            Self::MySql => "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
        }
    }

    /// Whether DDL participates in transactions and rolls back cleanly.
    #[must_use]
    pub const fn supports_transactional_ddl(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Whether a unique index can be built without blocking writes.
    #[must_use]
    pub const fn supports_concurrent_index(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Whether `CREATE INDEX IF NOT EXISTS` is available. Without it the
    /// adapter consults `information_schema` before creating.
    #[must_use]
    pub const fn supports_create_index_if_not_exists(self) -> bool {
        matches!(self, Self::Postgres)
    }

    #[must_use]
    pub const fn binary_type(self) -> &'static str {
        match self {
            Self::Postgres => "BYTEA",
            // Wide enough for any digest this crate stores.
            Self::MySql => "VARBINARY(64)",
        }
    }

    #[must_use]
    pub const fn timestamp_type(self) -> &'static str {
        match self {
            Self::Postgres => "TIMESTAMPTZ",
            Self::MySql => "TIMESTAMP(6)",
        }
    }

    #[must_use]
    pub const fn current_timestamp(self) -> &'static str {
        match self {
            Self::Postgres => "now()",
            Self::MySql => "CURRENT_TIMESTAMP(6)",
        }
    }

    /// Native column type for a custom field, including inline constraints
    /// that belong to the type (the enum value set in particular).
    #[must_use]
    pub fn native_type(self, def: &CustomFieldDefinition) -> String {
        match def.field_type() {
            FieldType::Text => "TEXT".to_string(),
            FieldType::VarChar => "VARCHAR(255)".to_string(),
            FieldType::Integer => match self {
                Self::Postgres => "INTEGER".to_string(),
                Self::MySql => "INT".to_string(),
            },
            FieldType::BigInteger => "BIGINT".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Decimal => match self {
                Self::Postgres => "NUMERIC(28, 10)".to_string(),
                Self::MySql => "DECIMAL(28, 10)".to_string(),
            },
            FieldType::Double => match self {
                Self::Postgres => "DOUBLE PRECISION".to_string(),
                Self::MySql => "DOUBLE".to_string(),
            },
            FieldType::Timestamp => self.timestamp_type().to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Json => match self {
                Self::Postgres => "JSONB".to_string(),
                Self::MySql => "JSON".to_string(),
            },
            FieldType::Enum => {
                let values = def
                    .enum_values()
                    .iter()
                    .map(|v| format!("'{v}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                match self {
                    // No native enum type; constrain a text column instead.
                    Self::Postgres => format!(
                        "TEXT CHECK ({} IN ({values}))",
                        self.quote_ident(def.name())
                    ),
                    Self::MySql => format!("ENUM({values})"),
                }
            }
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SqlDialect;
    use crate::fields::CustomFieldDefinition;

    #[test]
    fn placeholders_are_numbered_only_on_postgres() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::MySql.placeholder(3), "?");
        assert_eq!(SqlDialect::Postgres.placeholders(2, 3), "$2, $3, $4");
        assert_eq!(SqlDialect::MySql.placeholders(2, 3), "?, ?, ?");
    }

    #[test]
    fn ident_quoting_differs() {
        assert_eq!(SqlDialect::Postgres.quote_ident("users"), "\"users\"");
        assert_eq!(SqlDialect::MySql.quote_ident("users"), "`users`");
    }

    #[test]
    fn enum_is_native_on_mysql_and_a_check_on_postgres() -> anyhow::Result<()> {
        let def =
            CustomFieldDefinition::new("plan", "enum")?.with_enum_values(["free", "pro"]);
        assert_eq!(
            SqlDialect::Postgres.native_type(&def),
            "TEXT CHECK (\"plan\" IN ('free', 'pro'))"
        );
        assert_eq!(SqlDialect::MySql.native_type(&def), "ENUM('free', 'pro')");
        Ok(())
    }

    #[test]
    fn integer_widths_map_per_dialect() -> anyhow::Result<()> {
        let narrow = CustomFieldDefinition::new("age", "integer")?;
        let wide = CustomFieldDefinition::new("views", "bigint")?;
        assert_eq!(SqlDialect::Postgres.native_type(&narrow), "INTEGER");
        assert_eq!(SqlDialect::MySql.native_type(&narrow), "INT");
        assert_eq!(SqlDialect::Postgres.native_type(&wide), "BIGINT");
        assert_eq!(SqlDialect::MySql.native_type(&wide), "BIGINT");
        Ok(())
    }

    #[test]
    fn ddl_capabilities() {
        assert!(SqlDialect::Postgres.supports_transactional_ddl());
        assert!(!SqlDialect::MySql.supports_transactional_ddl());
        assert!(SqlDialect::Postgres.supports_concurrent_index());
        assert!(!SqlDialect::MySql.supports_concurrent_index());
    }
}
