//! # PostgreSQL Catalog
//!
//! `RoleCatalog` over a single `sqlx` connection to the primary.

use crate::roles::catalog::{CatalogError, RoleCatalog};
use crate::roles::sql::{self, Statement};
use crate::roles::types::{
    AttributeDelta, ObservedRole, Password, PasswordAction, RoleAttributes, RoleSpec,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::debug;

/// Role catalog bound to one connection for the length of a pass
pub struct PostgresCatalog {
    conn: PgConnection,
}

impl std::fmt::Debug for PostgresCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCatalog").finish_non_exhaustive()
    }
}

impl PostgresCatalog {
    /// Open a connection
    ///
    /// # Errors
    /// Every connection failure is `Fatal`: the pass cannot run without it.
    pub async fn connect(options: &PgConnectOptions) -> Result<Self, CatalogError> {
        let conn = PgConnection::connect_with(options)
            .await
            .map_err(|error| CatalogError::Fatal(error.to_string()))?;
        Ok(Self { conn })
    }

    /// Close the connection, ignoring errors on the way out
    pub async fn close(self) {
        if let Err(error) = self.conn.close().await {
            debug!(error = %error, "Closing primary connection failed");
        }
    }

    async fn execute(&mut self, statement: Statement) -> Result<(), CatalogError> {
        debug!(statement = %statement, "Executing role statement");
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(statement.as_sql()))
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Map a driver error onto the catalog error kinds
fn classify(error: sqlx::Error) -> CatalogError {
    match error {
        sqlx::Error::Database(db_error) => {
            let code = db_error.code().map(|code| code.into_owned());
            CatalogError::from_sqlstate(code.as_deref(), db_error.message().to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Protocol(_) => {
            CatalogError::Transient(error.to_string())
        }
        sqlx::Error::Tls(_) | sqlx::Error::Configuration(_) | sqlx::Error::WorkerCrashed => {
            CatalogError::Fatal(error.to_string())
        }
        other => CatalogError::Syntax(other.to_string()),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    oid: i64,
    name: String,
    login: bool,
    superuser: bool,
    create_db: bool,
    create_role: bool,
    inherit: bool,
    replication: bool,
    bypass_rls: bool,
    connection_limit: i32,
    valid_until: Option<DateTime<Utc>>,
    has_password: bool,
    comment: Option<String>,
    in_roles: Vec<String>,
}

impl From<RoleRow> for ObservedRole {
    fn from(row: RoleRow) -> Self {
        Self {
            oid: row.oid,
            name: row.name,
            comment: row.comment.unwrap_or_default(),
            attributes: RoleAttributes {
                login: row.login,
                superuser: row.superuser,
                create_db: row.create_db,
                create_role: row.create_role,
                inherit: row.inherit,
                replication: row.replication,
                bypass_rls: row.bypass_rls,
                connection_limit: row.connection_limit,
                valid_until: row.valid_until,
            },
            in_roles: row.in_roles.into_iter().collect(),
            has_password: row.has_password,
        }
    }
}

#[async_trait]
impl RoleCatalog for PostgresCatalog {
    async fn list(&mut self) -> Result<Vec<ObservedRole>, CatalogError> {
        let rows = sqlx::query_as::<_, RoleRow>(sql::LIST_ROLES)
            .fetch_all(&mut self.conn)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(ObservedRole::from).collect())
    }

    async fn create(
        &mut self,
        spec: &RoleSpec,
        password: Option<&Password>,
    ) -> Result<(), CatalogError> {
        self.execute(sql::create_role(spec, password)).await
    }

    async fn alter(
        &mut self,
        name: &str,
        delta: &AttributeDelta,
        password: Option<&PasswordAction>,
    ) -> Result<(), CatalogError> {
        match sql::alter_role(name, delta, password) {
            Some(statement) => self.execute(statement).await,
            None => Ok(()),
        }
    }

    async fn set_comment(&mut self, name: &str, text: &str) -> Result<(), CatalogError> {
        self.execute(sql::comment_on_role(name, text)).await
    }

    async fn grant(&mut self, name: &str, parent: &str) -> Result<(), CatalogError> {
        self.execute(sql::grant_role(name, parent)).await
    }

    async fn revoke(&mut self, name: &str, parent: &str) -> Result<(), CatalogError> {
        self.execute(sql::revoke_role(name, parent)).await
    }

    async fn drop_role(&mut self, name: &str) -> Result<(), CatalogError> {
        self.execute(sql::drop_role(name)).await
    }
}
