//! Pure SQL synthesis.
//!
//! Every statement the adapters execute is built here from validated
//! identifiers and positional placeholders. Values never appear in
//! statement text; identifiers are validated before they may be
//! interpolated, then quoted. Keeping synthesis pure makes the whole
//! surface unit-testable without a database.

use std::fmt::Write;

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::error::{Error, Result};
use crate::fields::{CustomFieldDefinition, FieldValue};
use crate::store::dialect::SqlDialect;
use crate::store::TableNames;

/// Columns selected for every user read, before custom fields.
pub const USER_SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "email",
    "password_hash",
    "is_active",
    "email_verified",
    "created_at",
    "updated_at",
];

/// A named index plus the statement that creates it. MySQL has no
/// `CREATE INDEX IF NOT EXISTS`, so the adapter needs the name to probe
/// `information_schema` first.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub table: String,
    pub name: String,
    pub sql: String,
}

fn escape_string_literal(dialect: SqlDialect, value: &str) -> String {
    let quoted = value.replace('\'', "''");
    match dialect {
        SqlDialect::Postgres => quoted,
        // Backslash is an escape character unless NO_BACKSLASH_ESCAPES is set.
        SqlDialect::MySql => quoted.replace('\\', "\\\\"),
    }
}

/// Renders a column default as a SQL literal, or `None` when the field
/// declares no default.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the declared default cannot be
/// rendered for this dialect.
pub fn render_default(dialect: SqlDialect, def: &CustomFieldDefinition) -> Result<Option<String>> {
    let Some(default) = def.default() else {
        return Ok(None);
    };
    if def.default_is_current_timestamp() {
        return Ok(Some(dialect.current_timestamp().to_string()));
    }
    let rendered = match def.coerce(default)? {
        FieldValue::Null => "NULL".to_string(),
        FieldValue::Text(s) => format!("'{}'", escape_string_literal(dialect, &s)),
        FieldValue::Int(n) => n.to_string(),
        FieldValue::Bool(b) => if b { "TRUE" } else { "FALSE" }.to_string(),
        FieldValue::Decimal(d) => d.to_string(),
        FieldValue::Double(f) => f.to_string(),
        FieldValue::Timestamp(t) => match dialect {
            SqlDialect::Postgres => {
                let formatted = t.format(&Rfc3339).map_err(|err| {
                    Error::validation(format!("unrenderable timestamp default: {err}"))
                })?;
                format!("'{formatted}'")
            }
            SqlDialect::MySql => {
                let utc = t.to_offset(time::UtcOffset::UTC);
                let formatted = utc
                    .format(format_description!(
                        "[year]-[month]-[day] [hour]:[minute]:[second]"
                    ))
                    .map_err(|err| {
                        Error::validation(format!("unrenderable timestamp default: {err}"))
                    })?;
                format!("'{formatted}'")
            }
        },
        FieldValue::Date(d) => format!("'{d}'"),
        FieldValue::Json(v) => {
            let serialized = escape_string_literal(dialect, &v.to_string());
            match dialect {
                SqlDialect::Postgres => format!("'{serialized}'"),
                // Non-literal defaults need the 8.0.13 expression form.
                SqlDialect::MySql => format!("('{serialized}')"),
            }
        }
    };
    Ok(Some(rendered))
}

/// Full column clause for a custom field: quoted name, native type, and
/// inline constraints.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the default cannot be rendered.
pub fn custom_column_clause(dialect: SqlDialect, def: &CustomFieldDefinition) -> Result<String> {
    let mut clause = format!(
        "{} {}",
        dialect.quote_ident(def.name()),
        dialect.native_type(def)
    );
    if def.required() {
        clause.push_str(" NOT NULL");
    }
    if let Some(default) = render_default(dialect, def)? {
        let _ = write!(clause, " DEFAULT {default}");
    }
    if def.unique() {
        clause.push_str(" UNIQUE");
    }
    Ok(clause)
}

/// `ALTER TABLE .. ADD COLUMN ..` for one custom field.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the default cannot be rendered.
pub fn add_column_sql(
    dialect: SqlDialect,
    users_table: &str,
    def: &CustomFieldDefinition,
) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote_ident(users_table),
        custom_column_clause(dialect, def)?
    ))
}

/// Unique index creation for a migrated column. On PostgreSQL this is
/// `CONCURRENTLY`, which must run outside any transaction.
#[must_use]
pub fn unique_index_sql(dialect: SqlDialect, table: &str, column: &str) -> IndexSpec {
    let name = format!("uniq_{table}_{column}");
    let sql = match dialect {
        SqlDialect::Postgres => format!(
            "CREATE UNIQUE INDEX CONCURRENTLY IF NOT EXISTS {} ON {} ({})",
            dialect.quote_ident(&name),
            dialect.quote_ident(table),
            dialect.quote_ident(column)
        ),
        SqlDialect::MySql => format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            dialect.quote_ident(&name),
            dialect.quote_ident(table),
            dialect.quote_ident(column)
        ),
    };
    IndexSpec {
        table: table.to_string(),
        name,
        sql,
    }
}

/// All `CREATE TABLE` statements plus, on PostgreSQL, the trigger that
/// maintains `updated_at`. Statements are idempotent.
///
/// # Errors
///
/// Returns [`Error::Validation`] when a custom field default cannot be
/// rendered.
pub fn create_schema_sql(
    dialect: SqlDialect,
    tables: &TableNames,
    custom: &[CustomFieldDefinition],
) -> Result<Vec<String>> {
    let users = dialect.quote_ident(tables.users());
    let tokens = dialect.quote_ident(tables.refresh_tokens());
    let attempts = dialect.quote_ident(tables.login_attempts());
    let codes = dialect.quote_ident(tables.verification_codes());
    let pk = dialect.autoincrement_pk();
    let ts = dialect.timestamp_type();
    let now = dialect.current_timestamp();
    let binary = dialect.binary_type();
    let email_type = match dialect {
        SqlDialect::Postgres => "TEXT",
        // TEXT cannot carry a unique constraint without a prefix length.
        SqlDialect::MySql => "VARCHAR(255)",
    };
    let updated_at = match dialect {
        SqlDialect::Postgres => format!("updated_at {ts} NOT NULL DEFAULT {now}"),
        SqlDialect::MySql => {
            format!("updated_at {ts} NOT NULL DEFAULT {now} ON UPDATE {now}")
        }
    };

    let mut custom_clauses = String::new();
    for def in custom {
        let _ = write!(
            custom_clauses,
            ",\n    {}",
            custom_column_clause(dialect, def)?
        );
    }

    let mut statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {users} (\n    \
             id {pk},\n    \
             email {email_type} NOT NULL UNIQUE,\n    \
             password_hash TEXT NOT NULL,\n    \
             is_active BOOLEAN NOT NULL DEFAULT TRUE,\n    \
             email_verified BOOLEAN NOT NULL DEFAULT FALSE,\n    \
             created_at {ts} NOT NULL DEFAULT {now},\n    \
             {updated_at}{custom_clauses}\n)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {tokens} (\n    \
             id {pk},\n    \
             user_id BIGINT NOT NULL,\n    \
             token_hash {binary} NOT NULL UNIQUE,\n    \
             expires_at {ts} NOT NULL,\n    \
             revoked BOOLEAN NOT NULL DEFAULT FALSE,\n    \
             revoked_at {ts} NULL,\n    \
             created_at {ts} NOT NULL DEFAULT {now},\n    \
             FOREIGN KEY (user_id) REFERENCES {users} (id) ON DELETE CASCADE\n)"
        ),
        // No foreign key: attempts are recorded for unknown emails too.
        format!(
            "CREATE TABLE IF NOT EXISTS {attempts} (\n    \
             id {pk},\n    \
             email {email_type} NOT NULL,\n    \
             success BOOLEAN NOT NULL,\n    \
             attempted_at {ts} NOT NULL DEFAULT {now}\n)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {codes} (\n    \
             id {pk},\n    \
             user_id BIGINT NOT NULL,\n    \
             purpose VARCHAR(32) NOT NULL,\n    \
             code_hash {binary} NOT NULL,\n    \
             expires_at {ts} NOT NULL,\n    \
             created_at {ts} NOT NULL DEFAULT {now},\n    \
             FOREIGN KEY (user_id) REFERENCES {users} (id) ON DELETE CASCADE\n)"
        ),
    ];

    if dialect == SqlDialect::Postgres {
        statements.push(
            "CREATE OR REPLACE FUNCTION custode_touch_updated_at() RETURNS TRIGGER AS $$\n\
             BEGIN\n    NEW.updated_at = now();\n    RETURN NEW;\nEND;\n\
             $$ LANGUAGE plpgsql"
                .to_string(),
        );
        let trigger = format!("{}_touch_updated_at", tables.users());
        statements.push(format!(
            "DROP TRIGGER IF EXISTS {} ON {users}",
            dialect.quote_ident(&trigger)
        ));
        statements.push(format!(
            "CREATE TRIGGER {} BEFORE UPDATE ON {users} \
             FOR EACH ROW EXECUTE FUNCTION custode_touch_updated_at()",
            dialect.quote_ident(&trigger)
        ));
    }

    Ok(statements)
}

/// Supporting (non-unique) indexes for the hot lookup paths.
#[must_use]
pub fn index_statements(dialect: SqlDialect, tables: &TableNames) -> Vec<IndexSpec> {
    let specs = [
        (tables.refresh_tokens(), "user_id", vec!["user_id"]),
        (
            tables.login_attempts(),
            "email_attempted_at",
            vec!["email", "attempted_at"],
        ),
        (tables.verification_codes(), "code_hash", vec!["code_hash"]),
        (
            tables.verification_codes(),
            "user_purpose",
            vec!["user_id", "purpose"],
        ),
    ];
    specs
        .into_iter()
        .map(|(table, suffix, columns)| {
            let name = format!("idx_{table}_{suffix}");
            let cols = columns
                .iter()
                .map(|c| dialect.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let if_not_exists = if dialect.supports_create_index_if_not_exists() {
                "IF NOT EXISTS "
            } else {
                ""
            };
            IndexSpec {
                table: table.to_string(),
                name: name.clone(),
                sql: format!(
                    "CREATE INDEX {if_not_exists}{} ON {} ({cols})",
                    dialect.quote_ident(&name),
                    dialect.quote_ident(table)
                ),
            }
        })
        .collect()
}

fn user_column_list(dialect: SqlDialect, custom: &[CustomFieldDefinition]) -> String {
    let mut list = USER_SYSTEM_COLUMNS.join(", ");
    for def in custom {
        let _ = write!(list, ", {}", dialect.quote_ident(def.name()));
    }
    list
}

/// `INSERT` for a new user. Binds: email, password hash, then the given
/// custom columns in order. PostgreSQL returns the new id directly.
#[must_use]
pub fn insert_user_sql(
    dialect: SqlDialect,
    tables: &TableNames,
    custom_columns: &[&str],
) -> String {
    let mut columns = "email, password_hash".to_string();
    for name in custom_columns {
        let _ = write!(columns, ", {}", dialect.quote_ident(name));
    }
    let placeholders = dialect.placeholders(1, 2 + custom_columns.len());
    let returning = match dialect {
        SqlDialect::Postgres => " RETURNING id",
        SqlDialect::MySql => "",
    };
    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders}){returning}",
        dialect.quote_ident(tables.users())
    )
}

/// `SELECT` of the full user record by email. Binds: email.
#[must_use]
pub fn select_user_by_email_sql(
    dialect: SqlDialect,
    tables: &TableNames,
    custom: &[CustomFieldDefinition],
) -> String {
    format!(
        "SELECT {} FROM {} WHERE email = {}",
        user_column_list(dialect, custom),
        dialect.quote_ident(tables.users()),
        dialect.placeholder(1)
    )
}

/// `SELECT` of the full user record by id. Binds: id.
#[must_use]
pub fn select_user_by_id_sql(
    dialect: SqlDialect,
    tables: &TableNames,
    custom: &[CustomFieldDefinition],
) -> String {
    format!(
        "SELECT {} FROM {} WHERE id = {}",
        user_column_list(dialect, custom),
        dialect.quote_ident(tables.users()),
        dialect.placeholder(1)
    )
}

/// `UPDATE` of the named columns. Binds: one value per column, then the
/// user id. `updated_at` maintenance is the schema's job, not the
/// statement's.
#[must_use]
pub fn update_user_sql(dialect: SqlDialect, tables: &TableNames, columns: &[&str]) -> String {
    let mut assignments = String::new();
    for (i, name) in columns.iter().enumerate() {
        if i > 0 {
            assignments.push_str(", ");
        }
        let _ = write!(
            assignments,
            "{} = {}",
            dialect.quote_ident(name),
            dialect.placeholder(i + 1)
        );
    }
    format!(
        "UPDATE {} SET {assignments} WHERE id = {}",
        dialect.quote_ident(tables.users()),
        dialect.placeholder(columns.len() + 1)
    )
}

/// Binds: new password hash, user id.
#[must_use]
pub fn update_password_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "UPDATE {} SET password_hash = {} WHERE id = {}",
        dialect.quote_ident(tables.users()),
        dialect.placeholder(1),
        dialect.placeholder(2)
    )
}

/// Binds: user id, token hash, expiry.
#[must_use]
pub fn insert_refresh_token_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "INSERT INTO {} (user_id, token_hash, expires_at) VALUES ({})",
        dialect.quote_ident(tables.refresh_tokens()),
        dialect.placeholders(1, 3)
    )
}

/// Binds: token hash. The hash itself is not selected back; the caller
/// already holds it.
#[must_use]
pub fn select_refresh_token_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "SELECT id, user_id, expires_at, revoked, created_at FROM {} WHERE token_hash = {}",
        dialect.quote_ident(tables.refresh_tokens()),
        dialect.placeholder(1)
    )
}

/// Marks one live session revoked. Binds: token hash. Affects zero rows
/// when the token is unknown or already revoked.
#[must_use]
pub fn revoke_refresh_token_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "UPDATE {} SET revoked = TRUE, revoked_at = {} WHERE token_hash = {} AND revoked = FALSE",
        dialect.quote_ident(tables.refresh_tokens()),
        dialect.current_timestamp(),
        dialect.placeholder(1)
    )
}

/// Marks every live session of one user revoked. Binds: user id.
#[must_use]
pub fn revoke_all_tokens_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "UPDATE {} SET revoked = TRUE, revoked_at = {} WHERE user_id = {} AND revoked = FALSE",
        dialect.quote_ident(tables.refresh_tokens()),
        dialect.current_timestamp(),
        dialect.placeholder(1)
    )
}

/// Binds: email, success flag.
#[must_use]
pub fn insert_attempt_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "INSERT INTO {} (email, success) VALUES ({})",
        dialect.quote_ident(tables.login_attempts()),
        dialect.placeholders(1, 2)
    )
}

/// Binds: email, window start.
#[must_use]
pub fn count_recent_failures_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE email = {} AND success = FALSE AND attempted_at > {}",
        dialect.quote_ident(tables.login_attempts()),
        dialect.placeholder(1),
        dialect.placeholder(2)
    )
}

/// Binds: user id, purpose.
#[must_use]
pub fn delete_codes_for_purpose_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "DELETE FROM {} WHERE user_id = {} AND purpose = {}",
        dialect.quote_ident(tables.verification_codes()),
        dialect.placeholder(1),
        dialect.placeholder(2)
    )
}

/// Binds: user id, purpose, code hash, expiry.
#[must_use]
pub fn insert_code_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "INSERT INTO {} (user_id, purpose, code_hash, expires_at) VALUES ({})",
        dialect.quote_ident(tables.verification_codes()),
        dialect.placeholders(1, 4)
    )
}

/// Binds: code hash, purpose.
#[must_use]
pub fn select_code_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "SELECT id, user_id, expires_at, created_at FROM {} \
         WHERE code_hash = {} AND purpose = {}",
        dialect.quote_ident(tables.verification_codes()),
        dialect.placeholder(1),
        dialect.placeholder(2)
    )
}

/// Binds: code id.
#[must_use]
pub fn delete_code_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "DELETE FROM {} WHERE id = {}",
        dialect.quote_ident(tables.verification_codes()),
        dialect.placeholder(1)
    )
}

/// Binds: cutoff timestamp.
#[must_use]
pub fn purge_tokens_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "DELETE FROM {} WHERE expires_at < {}",
        dialect.quote_ident(tables.refresh_tokens()),
        dialect.placeholder(1)
    )
}

/// Binds: cutoff timestamp.
#[must_use]
pub fn purge_attempts_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "DELETE FROM {} WHERE attempted_at < {}",
        dialect.quote_ident(tables.login_attempts()),
        dialect.placeholder(1)
    )
}

/// Binds: cutoff timestamp.
#[must_use]
pub fn purge_codes_sql(dialect: SqlDialect, tables: &TableNames) -> String {
    format!(
        "DELETE FROM {} WHERE expires_at < {}",
        dialect.quote_ident(tables.verification_codes()),
        dialect.placeholder(1)
    )
}

#[must_use]
pub fn count_rows_sql(dialect: SqlDialect, table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", dialect.quote_ident(table))
}

/// Binds: table name. Scoped to the connected schema.
#[must_use]
pub fn table_exists_sql(dialect: SqlDialect) -> String {
    let schema = match dialect {
        SqlDialect::Postgres => "current_schema()",
        SqlDialect::MySql => "DATABASE()",
    };
    format!(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = {schema} AND table_name = {}",
        dialect.placeholder(1)
    )
}

/// Binds: table name, column name. Scoped to the connected schema.
#[must_use]
pub fn column_exists_sql(dialect: SqlDialect) -> String {
    let schema = match dialect {
        SqlDialect::Postgres => "current_schema()",
        SqlDialect::MySql => "DATABASE()",
    };
    format!(
        "SELECT COUNT(*) FROM information_schema.columns \
         WHERE table_schema = {schema} AND table_name = {} AND column_name = {}",
        dialect.placeholder(1),
        dialect.placeholder(2)
    )
}

/// Binds: table name, index name.
#[must_use]
pub fn index_exists_sql(dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::Postgres => format!(
            "SELECT COUNT(*) FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = {} AND indexname = {}",
            SqlDialect::Postgres.placeholder(1),
            SqlDialect::Postgres.placeholder(2)
        ),
        SqlDialect::MySql => format!(
            "SELECT COUNT(*) FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = {} AND index_name = {}",
            SqlDialect::MySql.placeholder(1),
            SqlDialect::MySql.placeholder(2)
        ),
    }
}
