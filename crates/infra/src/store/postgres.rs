//! Postgres-backed command store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed | N/A | `Storage` |
//! | Other | N/A | `Storage` |
//!
//! Rows whose status or execution type no longer parse map to `Corrupt`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rconq_core::{
    AUTO_CANCEL_RESPONSE, Command, CommandId, CommandStatus, ExecutionType, GroupId,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use super::query::{CommandFilter, Page};
use super::r#trait::{CommandStore, StoreError, ensure_reportable};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS commands (
        id             UUID PRIMARY KEY,
        server_id      TEXT NOT NULL,
        game_mode      TEXT,
        command        TEXT NOT NULL,
        player         TEXT,
        execution_type TEXT NOT NULL,
        status         TEXT NOT NULL DEFAULT 'PENDING',
        response       TEXT,
        created_at     TIMESTAMPTZ NOT NULL,
        executed_at    TIMESTAMPTZ,
        expires_at     TIMESTAMPTZ NOT NULL,
        group_id       UUID
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_commands_server_status ON commands (server_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_commands_player_status ON commands (player, status)",
    "CREATE INDEX IF NOT EXISTS idx_commands_expires_at ON commands (expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_commands_created_at ON commands (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_commands_group_id ON commands (group_id)",
];

const COLUMNS: &str = "id, server_id, game_mode, command, player, execution_type, status, \
                       response, created_at, executed_at, expires_at, group_id";

const NON_TERMINAL: &str = "status IN ('PENDING', 'QUEUED')";

/// Postgres-backed command table.
///
/// Every status change is a single guarded `UPDATE ... WHERE status IN
/// ('PENDING', 'QUEUED')`, so concurrent writers across processes are
/// serialized by the database. The group winner step additionally locks the
/// group's rows (`SELECT ... FOR UPDATE`, id order) inside one transaction.
#[derive(Debug, Clone)]
pub struct PostgresCommandStore {
    pool: Arc<PgPool>,
}

impl PostgresCommandStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect with a bounded pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `commands` table and its indexes if missing.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        // One prepared statement may hold only one command.
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        command: &Command,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO commands (
                id, server_id, game_mode, command, player, execution_type,
                status, response, created_at, executed_at, expires_at, group_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(command.id.as_uuid())
        .bind(&command.server_id)
        .bind(&command.game_mode)
        .bind(&command.command_text)
        .bind(&command.player)
        .bind(command.execution_type.as_str())
        .bind(command.status.as_str())
        .bind(&command.response)
        .bind(command.created_at)
        .bind(command.executed_at)
        .bind(command.expires_at)
        .bind(command.group_id.map(|g| *g.as_uuid()))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists(command.id.to_string())
            } else {
                map_sqlx_error("insert_command", e)
            }
        })?;
        Ok(())
    }

    async fn cancel_siblings_in(
        tx: &mut Transaction<'_, Postgres>,
        group_id: GroupId,
        except_id: CommandId,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE commands SET status = 'CANCELLED', response = $3 \
             WHERE group_id = $1 AND id <> $2 AND {NON_TERMINAL}"
        ))
        .bind(group_id.as_uuid())
        .bind(except_id.as_uuid())
        .bind(AUTO_CANCEL_RESPONSE)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("cancel_siblings", e))?;
        Ok(result.rows_affected())
    }

    fn decode(rows: Vec<PgRow>) -> Result<Vec<Command>, StoreError> {
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait::async_trait]
impl CommandStore for PostgresCommandStore {
    #[instrument(skip(self, command), fields(command_id = %command.id, server_id = %command.server_id), err)]
    async fn insert_one(&self, command: &Command) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Self::insert_in(&mut tx, command).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, commands), fields(count = commands.len()), err)]
    async fn insert_many(&self, commands: &[Command]) -> Result<(), StoreError> {
        if commands.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for command in commands {
            if let Err(err) = Self::insert_in(&mut tx, command).await {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(command_id = %id), err)]
    async fn get_by_id(&self, id: CommandId) -> Result<Option<Command>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM commands WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?;

        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self), fields(pending = tracing::field::Empty), err)]
    async fn list_pending_by_server(&self, server_id: &str) -> Result<Vec<Command>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM commands WHERE server_id = $1 AND {NON_TERMINAL} \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(server_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending_by_server", e))?;

        let commands = Self::decode(rows)?;
        Span::current().record("pending", commands.len());
        Ok(commands)
    }

    #[instrument(skip(self), fields(group_id = %group_id), err)]
    async fn list_by_group(&self, group_id: GroupId) -> Result<Vec<Command>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM commands WHERE group_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(group_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_group", e))?;

        Self::decode(rows)
    }

    #[instrument(skip(self, response), fields(command_id = %id, target = %target), err)]
    async fn transition(
        &self,
        id: CommandId,
        target: CommandStatus,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        ensure_reportable(target)?;

        let executed_at = target.records_execution().then_some(at);
        let result = sqlx::query(&format!(
            "UPDATE commands \
             SET status = $2, response = COALESCE($3, response), \
                 executed_at = COALESCE($4, executed_at) \
             WHERE id = $1 AND {NON_TERMINAL}"
        ))
        .bind(id.as_uuid())
        .bind(target.as_str())
        .bind(response)
        .bind(executed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(group_id = %group_id, except_id = %except_id), err)]
    async fn cancel_group_except(
        &self,
        group_id: GroupId,
        except_id: CommandId,
    ) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let cancelled = Self::cancel_siblings_in(&mut tx, group_id, except_id).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(cancelled)
    }

    #[instrument(
        skip(self, response),
        fields(command_id = %id, group_id = %group_id, cancelled = tracing::field::Empty),
        err
    )]
    async fn execute_exclusive(
        &self,
        id: CommandId,
        group_id: GroupId,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Serialize winners of the same group; id order avoids lock-order deadlocks.
        sqlx::query("SELECT id FROM commands WHERE group_id = $1 ORDER BY id FOR UPDATE")
            .bind(group_id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_group", e))?;

        let executed = sqlx::query(&format!(
            "UPDATE commands \
             SET status = 'EXECUTED', response = COALESCE($3, response), executed_at = $4 \
             WHERE id = $1 AND group_id = $2 AND {NON_TERMINAL}"
        ))
        .bind(id.as_uuid())
        .bind(group_id.as_uuid())
        .bind(response)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("execute_exclusive", e))?;

        if executed.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        }

        let cancelled = Self::cancel_siblings_in(&mut tx, group_id, id).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("cancelled", cancelled);
        Ok(Some(cancelled))
    }

    #[instrument(skip(self), err)]
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE commands SET status = 'EXPIRED' WHERE expires_at < $1 AND {NON_TERMINAL}"
        ))
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("expire_overdue", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "DELETE FROM commands WHERE created_at < $1 AND NOT ({NON_TERMINAL})"
        ))
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_before", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &CommandFilter, page: Page) -> Result<Vec<Command>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM commands
            WHERE ($1::text IS NULL OR server_id = $1)
                AND ($2::text IS NULL OR game_mode = $2)
                AND ($3::text IS NULL OR player = $3)
                AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(filter.server_id.as_deref())
        .bind(filter.game_mode.as_deref())
        .bind(filter.player.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        Self::decode(rows)
    }

    #[instrument(skip(self), err)]
    async fn count(&self, filter: &CommandFilter) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM commands
            WHERE ($1::text IS NULL OR server_id = $1)
                AND ($2::text IS NULL OR game_mode = $2)
                AND ($3::text IS NULL OR player = $3)
                AND ($4::text IS NULL OR status = $4)
            "#,
        )
        .bind(filter.server_id.as_deref())
        .bind(filter.game_mode.as_deref())
        .bind(filter.player.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;
        Ok(total.max(0) as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("health_check", e))?;
        Ok(())
    }
}

/// Map SQLx errors to `StoreError`. Details stay in logs, never in responses.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}

fn decode_row(row: &PgRow) -> Result<Command, StoreError> {
    let row = CommandRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to read command row: {e}")))?;
    Command::try_from(row)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct CommandRow {
    id: uuid::Uuid,
    server_id: String,
    game_mode: Option<String>,
    command: String,
    player: Option<String>,
    execution_type: String,
    status: String,
    response: Option<String>,
    created_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    group_id: Option<uuid::Uuid>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for CommandRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CommandRow {
            id: row.try_get("id")?,
            server_id: row.try_get("server_id")?,
            game_mode: row.try_get("game_mode")?,
            command: row.try_get("command")?,
            player: row.try_get("player")?,
            execution_type: row.try_get("execution_type")?,
            status: row.try_get("status")?,
            response: row.try_get("response")?,
            created_at: row.try_get("created_at")?,
            executed_at: row.try_get("executed_at")?,
            expires_at: row.try_get("expires_at")?,
            group_id: row.try_get("group_id")?,
        })
    }
}

impl TryFrom<CommandRow> for Command {
    type Error = StoreError;

    fn try_from(row: CommandRow) -> Result<Self, Self::Error> {
        let execution_type: ExecutionType = row
            .execution_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("command {}: {e}", row.id)))?;
        let status: CommandStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("command {}: {e}", row.id)))?;

        Ok(Command {
            id: CommandId::from_uuid(row.id),
            server_id: row.server_id,
            game_mode: row.game_mode,
            command_text: row.command,
            player: row.player,
            execution_type,
            status,
            response: row.response,
            created_at: row.created_at,
            executed_at: row.executed_at,
            expires_at: row.expires_at,
            group_id: row.group_id.map(GroupId::from_uuid),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing::span::{Attributes, Id};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Captures the declared field names of every span opened.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<(String, Vec<String>)>>>);

    impl<S: Subscriber> Layer<S> for SpanFields {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            let fields = attrs
                .metadata()
                .fields()
                .iter()
                .map(|f| f.name().to_string())
                .collect();
            self.0
                .lock()
                .unwrap()
                .push((attrs.metadata().name().to_string(), fields));
        }
    }

    impl SpanFields {
        fn declared(&self, span: &str) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| name == span)
                .map(|(_, fields)| fields.clone())
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn recorded_span_fields_are_declared() {
        let spans = SpanFields::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(spans.clone()));

        // Nothing listens on port 1; every call fails after opening its span.
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://rconq@127.0.0.1:1/rconq")
            .unwrap();
        let store = PostgresCommandStore::new(pool);

        assert!(store.list_pending_by_server("lobby").await.is_err());
        assert!(
            store
                .execute_exclusive(CommandId::new(), GroupId::new(), None, Utc::now())
                .await
                .is_err()
        );

        assert!(spans.declared("list_pending_by_server").contains(&"pending".to_string()));
        assert!(spans.declared("execute_exclusive").contains(&"cancelled".to_string()));
    }

    #[test]
    fn schema_has_one_statement_per_entry() {
        assert!(SCHEMA[0].contains("CREATE TABLE IF NOT EXISTS commands"));
        assert_eq!(
            SCHEMA
                .iter()
                .filter(|s| s.starts_with("CREATE INDEX"))
                .count(),
            5
        );
        assert!(SCHEMA.iter().all(|s| s.matches(';').count() == 0));
    }

    #[test]
    fn row_with_unknown_status_is_corrupt() {
        let row = CommandRow {
            id: uuid::Uuid::now_v7(),
            server_id: "lobby".to_string(),
            game_mode: None,
            command: "say hi".to_string(),
            player: None,
            execution_type: "INSTANT".to_string(),
            status: "RUNNING".to_string(),
            response: None,
            created_at: Utc::now(),
            executed_at: None,
            expires_at: Utc::now(),
            group_id: None,
        };
        assert!(matches!(
            Command::try_from(row),
            Err(StoreError::Corrupt(_))
        ));
    }
}
