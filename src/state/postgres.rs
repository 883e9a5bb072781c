//! Postgres-backed store
//!
//! Schema is created lazily on first use. Balance updates are applied as
//! `balance = balance + delta` against a row locked with `FOR UPDATE`, so two
//! concurrent notifications for the same account serialize instead of losing
//! an update.

use super::{Store, StoreTx};
use crate::error::GatekeeperError;
use crate::models::{
    Account, Category, NotificationLog, ScheduleEvent, Transaction, TransactionType,
};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
      id UUID PRIMARY KEY,
      user_id UUID NOT NULL,
      institution_name TEXT NOT NULL,
      balance DOUBLE PRECISION NOT NULL DEFAULT 0,
      currency TEXT NOT NULL,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_user_institution
    ON accounts (user_id, LOWER(institution_name));
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
      id UUID PRIMARY KEY,
      user_id UUID NOT NULL,
      account_id UUID NOT NULL REFERENCES accounts (id),
      amount DOUBLE PRECISION NOT NULL,
      currency TEXT NOT NULL,
      type_of_transaction TEXT NOT NULL,
      is_over_budget_alert BOOLEAN NOT NULL DEFAULT FALSE,
      created_at TIMESTAMPTZ NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_events (
      id UUID PRIMARY KEY,
      user_id UUID NOT NULL,
      title TEXT NOT NULL,
      start_time TIMESTAMPTZ NOT NULL,
      end_time TIMESTAMPTZ,
      source_app TEXT NOT NULL,
      is_auto_generated BOOLEAN NOT NULL DEFAULT TRUE,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notification_logs (
      id UUID PRIMARY KEY,
      user_id UUID NOT NULL,
      source_app TEXT NOT NULL,
      title TEXT NOT NULL DEFAULT '',
      raw_content TEXT NOT NULL,
      summary TEXT NOT NULL,
      category TEXT NOT NULL,
      priority SMALLINT NOT NULL,
      is_spam BOOLEAN NOT NULL,
      is_risk BOOLEAN NOT NULL DEFAULT FALSE,
      risk_reason TEXT,
      received_at TIMESTAMPTZ NOT NULL,
      is_included_in_briefing BOOLEAN NOT NULL DEFAULT FALSE,
      content_hash TEXT NOT NULL,
      action_log TEXT NOT NULL DEFAULT ''
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_notification_logs_user_time
    ON notification_logs (user_id, received_at);
    "#,
];

const ACCOUNT_COLUMNS: &str = "id, user_id, institution_name, balance, currency, created_at";

const LOG_COLUMNS: &str = "id, user_id, source_app, title, raw_content, summary, category, \
     priority, is_spam, is_risk, risk_reason, received_at, is_included_in_briefing, \
     content_hash, action_log";

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> GatekeeperError {
    move |e| GatekeeperError::Database(format!("{}: {}", context, e))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let read = db_error("Failed to read account row");
    Ok(Account {
        id: row.try_get("id").map_err(&read)?,
        user_id: row.try_get("user_id").map_err(&read)?,
        institution_name: row.try_get("institution_name").map_err(&read)?,
        balance: row.try_get("balance").map_err(&read)?,
        currency: row.try_get("currency").map_err(&read)?,
        created_at: row.try_get("created_at").map_err(&read)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let read = db_error("Failed to read transaction row");
    let kind: String = row.try_get("type_of_transaction").map_err(&read)?;
    Ok(Transaction {
        id: row.try_get("id").map_err(&read)?,
        user_id: row.try_get("user_id").map_err(&read)?,
        account_id: row.try_get("account_id").map_err(&read)?,
        amount: row.try_get("amount").map_err(&read)?,
        currency: row.try_get("currency").map_err(&read)?,
        type_of_transaction: TransactionType::parse_lenient(&kind),
        is_over_budget_alert: row.try_get("is_over_budget_alert").map_err(&read)?,
        created_at: row.try_get("created_at").map_err(&read)?,
    })
}

fn event_from_row(row: &PgRow) -> Result<ScheduleEvent> {
    let read = db_error("Failed to read schedule event row");
    Ok(ScheduleEvent {
        id: row.try_get("id").map_err(&read)?,
        user_id: row.try_get("user_id").map_err(&read)?,
        title: row.try_get("title").map_err(&read)?,
        start_time: row.try_get("start_time").map_err(&read)?,
        end_time: row.try_get("end_time").map_err(&read)?,
        source_app: row.try_get("source_app").map_err(&read)?,
        is_auto_generated: row.try_get("is_auto_generated").map_err(&read)?,
        created_at: row.try_get("created_at").map_err(&read)?,
    })
}

fn log_from_row(row: &PgRow) -> Result<NotificationLog> {
    let read = db_error("Failed to read notification log row");
    let category: String = row.try_get("category").map_err(&read)?;
    let priority: i16 = row.try_get("priority").map_err(&read)?;
    Ok(NotificationLog {
        id: row.try_get("id").map_err(&read)?,
        user_id: row.try_get("user_id").map_err(&read)?,
        source_app: row.try_get("source_app").map_err(&read)?,
        title: row.try_get("title").map_err(&read)?,
        raw_content: row.try_get("raw_content").map_err(&read)?,
        summary: row.try_get("summary").map_err(&read)?,
        category: Category::from_db(&category),
        priority: priority.clamp(1, 5) as u8,
        is_spam: row.try_get("is_spam").map_err(&read)?,
        is_risk: row.try_get("is_risk").map_err(&read)?,
        risk_reason: row.try_get("risk_reason").map_err(&read)?,
        received_at: row.try_get("received_at").map_err(&read)?,
        is_included_in_briefing: row.try_get("is_included_in_briefing").map_err(&read)?,
        content_hash: row.try_get("content_hash").map_err(&read)?,
        action_log: row.try_get("action_log").map_err(&read)?,
    })
}

/// Postgres store
pub struct PgStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    /// Lazily connecting pool; nothing touches the network until first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(database_url)
            .map_err(db_error("Failed to configure Postgres pool"))?;

        info!("Using Postgres store");
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(statement).execute(pool).await?;
                }
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(db_error("Failed to initialize gatekeeper schema"))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        self.ensure_schema().await?;

        let tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to open transaction"))?;

        Ok(Box::new(PgStoreTx { tx: Some(tx) }))
    }

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE user_id = $1 ORDER BY created_at ASC",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load accounts"))?;

        rows.iter().map(account_from_row).collect()
    }

    async fn register_account(&self, account: Account) -> Result<Account> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, institution_name, balance, currency, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(&account.institution_name)
        .bind(account.balance)
        .bind(&account.currency)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to register account"))?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE user_id = $1 AND LOWER(institution_name) = LOWER($2)",
            ACCOUNT_COLUMNS
        ))
        .bind(account.user_id)
        .bind(&account.institution_name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to load registered account"))?;

        account_from_row(&row)
    }

    async fn purge_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM notification_logs WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to purge notification logs"))?;

        Ok(result.rows_affected())
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, account_id, amount, currency, type_of_transaction,
                   is_over_budget_alert, created_at
            FROM transactions
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load transactions"))?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn logs_for_user(&self, user_id: Uuid) -> Result<Vec<NotificationLog>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM notification_logs WHERE user_id = $1 ORDER BY received_at DESC",
            LOG_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load notification logs"))?;

        rows.iter().map(log_from_row).collect()
    }

    async fn schedule_events_for_user(&self, user_id: Uuid) -> Result<Vec<ScheduleEvent>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, start_time, end_time, source_app, is_auto_generated, created_at
            FROM schedule_events
            WHERE user_id = $1
            ORDER BY start_time ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load schedule events"))?;

        rows.iter().map(event_from_row).collect()
    }
}

/// One Postgres transaction. Rolled back by sqlx when dropped uncommitted.
pub struct PgStoreTx {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgStoreTx {
    fn conn(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| GatekeeperError::Database("transaction already committed".to_string()))
    }
}

#[async_trait::async_trait]
impl StoreTx for PgStoreTx {
    async fn find_account(
        &mut self,
        user_id: Uuid,
        institution_name: &str,
    ) -> Result<Option<Account>> {
        let tx = self.conn()?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM accounts
            WHERE user_id = $1 AND LOWER(institution_name) = LOWER($2)
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(institution_name.trim())
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error("Failed to look up account"))?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn insert_account(&mut self, account: &Account) -> Result<Account> {
        let tx = self.conn()?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, institution_name, balance, currency, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(&account.institution_name)
        .bind(account.balance)
        .bind(&account.currency)
        .bind(account.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to create account"))?;

        self.find_account(account.user_id, &account.institution_name)
            .await?
            .ok_or_else(|| GatekeeperError::AccountNotFound(account.institution_name.clone()))
    }

    async fn apply_balance_delta(&mut self, account_id: Uuid, delta: f64) -> Result<f64> {
        let tx = self.conn()?;

        let row = sqlx::query(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING balance",
        )
        .bind(delta)
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error("Failed to update balance"))?;

        match row {
            Some(row) => row
                .try_get("balance")
                .map_err(db_error("Failed to read updated balance")),
            None => Err(GatekeeperError::AccountNotFound(account_id.to_string())),
        }
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let tx = self.conn()?;

        sqlx::query(
            r#"
            INSERT INTO transactions
              (id, user_id, account_id, amount, currency, type_of_transaction,
               is_over_budget_alert, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.account_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.type_of_transaction.as_str())
        .bind(transaction.is_over_budget_alert)
        .bind(transaction.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to insert transaction"))?;

        Ok(())
    }

    async fn insert_schedule_event(&mut self, event: &ScheduleEvent) -> Result<()> {
        let tx = self.conn()?;

        sqlx::query(
            r#"
            INSERT INTO schedule_events
              (id, user_id, title, start_time, end_time, source_app, is_auto_generated, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.title)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(&event.source_app)
        .bind(event.is_auto_generated)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to insert schedule event"))?;

        Ok(())
    }

    async fn insert_notification_log(&mut self, log: &NotificationLog) -> Result<()> {
        let tx = self.conn()?;

        sqlx::query(&format!(
            r#"
            INSERT INTO notification_logs ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
            LOG_COLUMNS
        ))
        .bind(log.id)
        .bind(log.user_id)
        .bind(&log.source_app)
        .bind(&log.title)
        .bind(&log.raw_content)
        .bind(&log.summary)
        .bind(log.category.as_str())
        .bind(log.priority as i16)
        .bind(log.is_spam)
        .bind(log.is_risk)
        .bind(&log.risk_reason)
        .bind(log.received_at)
        .bind(log.is_included_in_briefing)
        .bind(&log.content_hash)
        .bind(&log.action_log)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to insert notification log"))?;

        Ok(())
    }

    async fn pending_briefing_logs(&mut self, user_id: Uuid) -> Result<Vec<NotificationLog>> {
        let tx = self.conn()?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM notification_logs
            WHERE user_id = $1 AND is_included_in_briefing = FALSE AND is_spam = FALSE
            ORDER BY received_at DESC
            FOR UPDATE
            "#,
            LOG_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_error("Failed to load pending briefing logs"))?;

        rows.iter().map(log_from_row).collect()
    }

    async fn mark_included_in_briefing(&mut self, log_ids: &[Uuid]) -> Result<()> {
        if log_ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn()?;

        sqlx::query("UPDATE notification_logs SET is_included_in_briefing = TRUE WHERE id = ANY($1)")
            .bind(log_ids.to_vec())
            .execute(&mut **tx)
            .await
            .map_err(db_error("Failed to mark briefing logs"))?;

        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| GatekeeperError::Database("transaction already committed".to_string()))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))
    }
}
