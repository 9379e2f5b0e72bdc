//! Database control plane.
//!
//! StarRocks speaks the MySQL wire protocol for DDL and metadata, so the
//! production implementation rides a `mysql_async` pool. The trait seam
//! keeps the validator and runner testable without a live cluster.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use snafu::prelude::*;
use tracing::debug;

use crate::config::{DatabaseSettings, PoolSettings};
use crate::error::{ConnectSnafu, ControlError, QuerySnafu};

/// One column of a live table, as reported by `information_schema`.
///
/// The ordered list returned by `describe_table` is the single source of
/// truth for column order and width at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub ordinal: u32,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub char_max_len: Option<u32>,
}

/// SQL control interface the engine consumes (§ external collaborators).
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Ordered column metadata for one table.
    async fn describe_table(&self, table: &str) -> Result<Vec<LiveColumn>, ControlError>;

    /// Remove all rows ahead of a full refresh.
    async fn truncate_table(&self, table: &str) -> Result<(), ControlError>;

    /// Widen a varchar column in place.
    async fn widen_varchar(&self, table: &str, column: &str, new_len: u32)
        -> Result<(), ControlError>;

    /// Run one DDL statement (schema creation tooling, seeds).
    async fn execute_ddl(&self, sql: &str) -> Result<(), ControlError>;

    /// `SELECT COUNT(*)` for verification.
    async fn row_count(&self, table: &str) -> Result<u64, ControlError>;

    /// Read `(key, value)` pairs whose key starts with `prefix`, ordered
    /// by key. The prefix is matched literally; `_` and `%` carry no
    /// wildcard meaning.
    async fn query_constants(
        &self,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, ControlError>;
}

/// Production control plane over the database's native wire protocol.
pub struct MySqlControlPlane {
    pool: Pool,
    database: String,
}

impl MySqlControlPlane {
    /// Build a process-private pool for one tenant.
    pub fn connect(
        database: &DatabaseSettings,
        database_name: &str,
        password: &str,
        pool_settings: &PoolSettings,
    ) -> Self {
        let constraints = PoolConstraints::new(
            pool_settings.min_connections,
            pool_settings.max_connections.max(pool_settings.min_connections),
        )
        .unwrap_or_default();
        let pool_opts = PoolOpts::default()
            .with_constraints(constraints)
            // pre-ping: reset and health-check connections on checkout
            .with_reset_connection(pool_settings.pre_ping)
            .with_inactive_connection_ttl(std::time::Duration::from_secs(
                pool_settings.recycle_secs,
            ));

        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(database.host.clone())
            .tcp_port(database.port)
            .user(Some(database.user.clone()))
            .pass(Some(password.to_string()))
            .db_name(Some(database_name.to_string()))
            .pool_opts(pool_opts)
            .into();

        Self {
            pool: Pool::new(opts),
            database: database_name.to_string(),
        }
    }

    /// Build a pool from a connection URI (separate relational stores,
    /// e.g. a constants backend living outside the OLAP cluster).
    pub fn from_uri(uri: &str) -> Result<Self, ControlError> {
        let opts = Opts::from_url(uri).map_err(|e| ControlError::Unexpected {
            message: format!("invalid connection URI: {e}"),
        })?;
        let database = opts.db_name().unwrap_or_default().to_string();
        Ok(Self {
            pool: Pool::new(opts),
            database,
        })
    }

    async fn conn(&self) -> Result<mysql_async::Conn, ControlError> {
        self.pool.get_conn().await.context(ConnectSnafu)
    }
}

#[async_trait]
impl ControlPlane for MySqlControlPlane {
    async fn describe_table(&self, table: &str) -> Result<Vec<LiveColumn>, ControlError> {
        let mut conn = self.conn().await?;
        let rows: Vec<(u64, String, String, String, Option<u64>)> = conn
            .exec(
                "SELECT ordinal_position, column_name, data_type, is_nullable, \
                 character_maximum_length \
                 FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? \
                 ORDER BY ordinal_position",
                (self.database.as_str(), table),
            )
            .await
            .context(QuerySnafu)?;

        Ok(rows
            .into_iter()
            .map(|(ordinal, name, data_type, nullable, char_len)| LiveColumn {
                ordinal: ordinal as u32,
                name,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                char_max_len: char_len.map(|len| len as u32),
            })
            .collect())
    }

    async fn truncate_table(&self, table: &str) -> Result<(), ControlError> {
        let mut conn = self.conn().await?;
        conn.query_drop(format!("TRUNCATE TABLE `{table}`"))
            .await
            .context(QuerySnafu)?;
        debug!(table, "Truncated");
        Ok(())
    }

    async fn widen_varchar(
        &self,
        table: &str,
        column: &str,
        new_len: u32,
    ) -> Result<(), ControlError> {
        let mut conn = self.conn().await?;
        conn.query_drop(format!(
            "ALTER TABLE `{table}` MODIFY COLUMN `{column}` VARCHAR({new_len})"
        ))
        .await
        .context(QuerySnafu)?;
        debug!(table, column, new_len, "Widened varchar column");
        Ok(())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), ControlError> {
        let mut conn = self.conn().await?;
        conn.query_drop(sql).await.context(QuerySnafu)
    }

    async fn row_count(&self, table: &str) -> Result<u64, ControlError> {
        let mut conn = self.conn().await?;
        let count: Option<u64> = conn
            .query_first(format!("SELECT COUNT(*) FROM `{table}`"))
            .await
            .context(QuerySnafu)?;
        count.ok_or_else(|| ControlError::Unexpected {
            message: format!("COUNT(*) on '{table}' returned no rows"),
        })
    }

    async fn query_constants(
        &self,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, ControlError> {
        // Range comparison rather than LIKE: constant keys are snake_case,
        // so a LIKE pattern would read `_` as a wildcard.
        let mut upper = prefix.to_string();
        upper.push(char::MAX);

        let mut conn = self.conn().await?;
        conn.exec(
            format!(
                "SELECT `key`, `value` FROM `{table}` WHERE `key` >= ? AND `key` < ? ORDER BY `key`"
            ),
            (prefix, upper.as_str()),
        )
        .await
        .context(QuerySnafu)
    }
}
