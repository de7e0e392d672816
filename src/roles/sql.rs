//! # SQL Statements
//!
//! Builders for the single statements the catalog executes.
//!
//! Identifiers are always double quoted. String literals follow
//! `QuoteLiteral` rules: single quotes are doubled, and when the value holds
//! a backslash every backslash is doubled and the literal gets the ` E`
//! prefix.

use crate::roles::types::{
    AttributeDelta, Password, PasswordAction, RoleAttributes, RoleSpec, ValidUntil,
};
use chrono::{DateTime, SecondsFormat, Utc};
use zeroize::Zeroizing;

/// A statement ready for execution
///
/// Statements carrying a password are zeroed on drop and print redacted.
pub struct Statement {
    sql: Zeroizing<String>,
    has_secret: bool,
}

impl Statement {
    fn plain(sql: String) -> Self {
        Self {
            sql: Zeroizing::new(sql),
            has_secret: false,
        }
    }

    fn secret(sql: String) -> Self {
        Self {
            sql: Zeroizing::new(sql),
            has_secret: true,
        }
    }

    /// Text sent to the server
    #[must_use]
    pub fn as_sql(&self) -> &str {
        self.sql.as_str()
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_secret {
            f.write_str("<statement with password redacted>")
        } else {
            f.write_str(&self.sql)
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Statement({self})")
    }
}

/// Quote an identifier
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal
#[must_use]
pub fn quote_literal(literal: &str) -> String {
    let escaped = literal.replace('\'', "''");
    if escaped.contains('\\') {
        format!(" E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

fn flag(options: &mut Vec<String>, value: bool, on: &str, off: &str) {
    options.push(if value { on } else { off }.to_string());
}

fn timestamp_literal(at: &DateTime<Utc>) -> String {
    quote_literal(&at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn password_option(password: Option<&Password>) -> String {
    match password {
        Some(password) => format!("PASSWORD {}", quote_literal(password.expose())),
        None => "PASSWORD NULL".to_string(),
    }
}

fn attribute_options(attributes: &RoleAttributes) -> Vec<String> {
    let mut options = Vec::new();
    flag(&mut options, attributes.login, "LOGIN", "NOLOGIN");
    flag(&mut options, attributes.superuser, "SUPERUSER", "NOSUPERUSER");
    flag(&mut options, attributes.create_db, "CREATEDB", "NOCREATEDB");
    flag(&mut options, attributes.create_role, "CREATEROLE", "NOCREATEROLE");
    flag(&mut options, attributes.inherit, "INHERIT", "NOINHERIT");
    flag(&mut options, attributes.replication, "REPLICATION", "NOREPLICATION");
    flag(&mut options, attributes.bypass_rls, "BYPASSRLS", "NOBYPASSRLS");
    options.push(format!("CONNECTION LIMIT {}", attributes.connection_limit));
    if let Some(at) = &attributes.valid_until {
        options.push(format!("VALID UNTIL {}", timestamp_literal(at)));
    }
    options
}

fn delta_options(delta: &AttributeDelta) -> Vec<String> {
    let mut options = Vec::new();
    let flags = [
        (delta.login, "LOGIN", "NOLOGIN"),
        (delta.superuser, "SUPERUSER", "NOSUPERUSER"),
        (delta.create_db, "CREATEDB", "NOCREATEDB"),
        (delta.create_role, "CREATEROLE", "NOCREATEROLE"),
        (delta.inherit, "INHERIT", "NOINHERIT"),
        (delta.replication, "REPLICATION", "NOREPLICATION"),
        (delta.bypass_rls, "BYPASSRLS", "NOBYPASSRLS"),
    ];
    for (value, on, off) in flags {
        if let Some(value) = value {
            flag(&mut options, value, on, off);
        }
    }
    if let Some(limit) = delta.connection_limit {
        options.push(format!("CONNECTION LIMIT {limit}"));
    }
    match &delta.valid_until {
        Some(ValidUntil::At(at)) => options.push(format!("VALID UNTIL {}", timestamp_literal(at))),
        Some(ValidUntil::Infinity) => options.push("VALID UNTIL 'infinity'".to_string()),
        None => {}
    }
    options
}

/// `CREATE ROLE` with every attribute spelled out
#[must_use]
pub fn create_role(spec: &RoleSpec, password: Option<&Password>) -> Statement {
    let mut options = attribute_options(&spec.attributes);
    let has_secret = password.is_some();
    if has_secret || spec.disable_password {
        options.push(password_option(password));
    }
    let sql = format!(
        "CREATE ROLE {} WITH {}",
        quote_identifier(&spec.name),
        options.join(" ")
    );
    if has_secret {
        Statement::secret(sql)
    } else {
        Statement::plain(sql)
    }
}

/// `ALTER ROLE` for the changed attributes and password
///
/// Returns `None` when there is nothing to change.
#[must_use]
pub fn alter_role(
    name: &str,
    delta: &AttributeDelta,
    password: Option<&PasswordAction>,
) -> Option<Statement> {
    let mut options = delta_options(delta);
    let has_secret = matches!(password, Some(PasswordAction::Set(_)));
    match password {
        Some(PasswordAction::Set(secret)) => options.push(password_option(Some(&secret.password))),
        Some(PasswordAction::Disable) => options.push(password_option(None)),
        None => {}
    }
    if options.is_empty() {
        return None;
    }
    let sql = format!("ALTER ROLE {} WITH {}", quote_identifier(name), options.join(" "));
    Some(if has_secret {
        Statement::secret(sql)
    } else {
        Statement::plain(sql)
    })
}

/// `COMMENT ON ROLE`, an empty text resets the comment to NULL
#[must_use]
pub fn comment_on_role(name: &str, text: &str) -> Statement {
    let value = if text.is_empty() {
        "NULL".to_string()
    } else {
        quote_literal(text)
    };
    Statement::plain(format!("COMMENT ON ROLE {} IS {value}", quote_identifier(name)))
}

/// Make `name` a member of `parent`
#[must_use]
pub fn grant_role(name: &str, parent: &str) -> Statement {
    Statement::plain(format!(
        "GRANT {} TO {}",
        quote_identifier(parent),
        quote_identifier(name)
    ))
}

/// Remove `name` from `parent`
#[must_use]
pub fn revoke_role(name: &str, parent: &str) -> Statement {
    Statement::plain(format!(
        "REVOKE {} FROM {}",
        quote_identifier(parent),
        quote_identifier(name)
    ))
}

#[must_use]
pub fn drop_role(name: &str) -> Statement {
    Statement::plain(format!("DROP ROLE {}", quote_identifier(name)))
}

/// Every role with its attributes, password presence, comment and parents
///
/// Expiry is only read when finite, `infinity` maps to NULL.
pub const LIST_ROLES: &str = r"
SELECT
    auth.oid::bigint AS oid,
    auth.rolname::text AS name,
    auth.rolcanlogin AS login,
    auth.rolsuper AS superuser,
    auth.rolcreatedb AS create_db,
    auth.rolcreaterole AS create_role,
    auth.rolinherit AS inherit,
    auth.rolreplication AS replication,
    auth.rolbypassrls AS bypass_rls,
    auth.rolconnlimit AS connection_limit,
    CASE WHEN isfinite(auth.rolvaliduntil) THEN auth.rolvaliduntil END AS valid_until,
    auth.rolpassword IS NOT NULL AS has_password,
    pg_catalog.shobj_description(auth.oid, 'pg_authid') AS comment,
    ARRAY(
        SELECT pg_catalog.pg_get_userbyid(members.roleid)::text
        FROM pg_catalog.pg_auth_members AS members
        WHERE auth.oid = members.member
        ORDER BY 1
    ) AS in_roles
FROM pg_catalog.pg_authid AS auth
ORDER BY auth.rolname
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::EnsureOption;
    use crate::roles::types::SecretPassword;
    use chrono::TimeZone;

    fn spec(name: &str) -> RoleSpec {
        RoleSpec {
            name: name.to_string(),
            ensure: EnsureOption::Present,
            comment: String::new(),
            attributes: RoleAttributes::default(),
            in_roles: Default::default(),
            password_secret: None,
            disable_password: false,
        }
    }

    #[test]
    fn test_quote_literal_matches_libpq_rules() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"back\slash"), r" E'back\\slash'");
        assert_eq!(quote_literal(r"a'b\c"), r" E'a''b\\c'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn test_quote_identifier_doubles_quotes() {
        assert_eq!(quote_identifier("dante"), "\"dante\"");
        assert_eq!(quote_identifier("Mixed\"Case"), "\"Mixed\"\"Case\"");
    }

    #[test]
    fn test_create_role_spells_out_defaults() {
        let statement = create_role(&spec("new_role"), None);
        assert_eq!(
            statement.as_sql(),
            "CREATE ROLE \"new_role\" WITH NOLOGIN NOSUPERUSER NOCREATEDB NOCREATEROLE \
             INHERIT NOREPLICATION NOBYPASSRLS CONNECTION LIMIT -1"
        );
    }

    #[test]
    fn test_create_role_with_password_is_redacted_when_displayed() {
        let mut dante = spec("dante");
        dante.attributes.login = true;
        dante.attributes.create_db = true;
        dante.attributes.connection_limit = 4;
        let statement = create_role(&dante, Some(&Password::new("p'w")));
        assert!(statement.as_sql().ends_with("CONNECTION LIMIT 4 PASSWORD 'p''w'"));
        assert!(statement.as_sql().contains("LOGIN NOSUPERUSER CREATEDB"));
        assert!(!statement.to_string().contains("p''w"));
        assert!(!format!("{statement:?}").contains("p''w"));
    }

    #[test]
    fn test_alter_role_lists_only_delta() {
        let delta = AttributeDelta {
            login: Some(false),
            create_db: Some(false),
            create_role: Some(true),
            connection_limit: Some(10),
            ..AttributeDelta::default()
        };
        let statement = alter_role("dante", &delta, None).unwrap();
        assert_eq!(
            statement.as_sql(),
            "ALTER ROLE \"dante\" WITH NOLOGIN NOCREATEDB CREATEROLE CONNECTION LIMIT 10"
        );
    }

    #[test]
    fn test_alter_role_password_only() {
        let password = PasswordAction::Set(SecretPassword {
            password: Password::new("new"),
            resource_version: "42".to_string(),
        });
        let statement = alter_role("dante", &AttributeDelta::default(), Some(&password)).unwrap();
        assert_eq!(statement.as_sql(), "ALTER ROLE \"dante\" WITH PASSWORD 'new'");

        let disabled =
            alter_role("dante", &AttributeDelta::default(), Some(&PasswordAction::Disable))
                .unwrap();
        assert_eq!(disabled.as_sql(), "ALTER ROLE \"dante\" WITH PASSWORD NULL");
        assert!(alter_role("dante", &AttributeDelta::default(), None).is_none());
    }

    #[test]
    fn test_valid_until_clauses() {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let delta = AttributeDelta {
            valid_until: Some(ValidUntil::At(at)),
            ..AttributeDelta::default()
        };
        assert_eq!(
            alter_role("dante", &delta, None).unwrap().as_sql(),
            "ALTER ROLE \"dante\" WITH VALID UNTIL '2030-01-02T03:04:05.000000Z'"
        );
        let delta = AttributeDelta {
            valid_until: Some(ValidUntil::Infinity),
            ..AttributeDelta::default()
        };
        assert_eq!(
            alter_role("dante", &delta, None).unwrap().as_sql(),
            "ALTER ROLE \"dante\" WITH VALID UNTIL 'infinity'"
        );
    }

    #[test]
    fn test_comment_and_membership_statements() {
        assert_eq!(
            comment_on_role("new_role", "This is user new_role").as_sql(),
            "COMMENT ON ROLE \"new_role\" IS 'This is user new_role'"
        );
        assert_eq!(
            comment_on_role("dante", "").as_sql(),
            "COMMENT ON ROLE \"dante\" IS NULL"
        );
        assert_eq!(
            grant_role("new_role", "dante").as_sql(),
            "GRANT \"dante\" TO \"new_role\""
        );
        assert_eq!(
            revoke_role("new_role", "postgres").as_sql(),
            "REVOKE \"postgres\" FROM \"new_role\""
        );
        assert_eq!(drop_role("new_role").as_sql(), "DROP ROLE \"new_role\"");
    }
}
