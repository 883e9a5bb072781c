//! State persistence layer
//!
//! All mutations caused by one notification go through a single [`StoreTx`]
//! and become visible together on `commit`. Dropping a transaction without
//! committing discards everything it staged.

use crate::error::GatekeeperError;
use crate::models::{Account, NotificationLog, ScheduleEvent, Transaction};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

pub mod postgres;
pub use postgres::PgStore;

/// Trait for state persistence
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Open the unit of work for one inbound event.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>>;

    /// Register an institution for a user. Returns the existing account when
    /// one with the same (case-insensitive) name is already registered.
    async fn register_account(&self, account: Account) -> Result<Account>;

    /// Delete notification logs with `received_at < cutoff`.
    async fn purge_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>>;

    /// Newest first.
    async fn logs_for_user(&self, user_id: Uuid) -> Result<Vec<NotificationLog>>;

    async fn schedule_events_for_user(&self, user_id: Uuid) -> Result<Vec<ScheduleEvent>>;
}

/// One atomic unit of work.
#[async_trait::async_trait]
pub trait StoreTx: Send {
    /// Case-insensitive match on institution name.
    async fn find_account(
        &mut self,
        user_id: Uuid,
        institution_name: &str,
    ) -> Result<Option<Account>>;

    /// Returns the stored account. A concurrent insert of the same
    /// institution yields the row that won.
    async fn insert_account(&mut self, account: &Account) -> Result<Account>;

    /// Add `delta` to the balance and return the new balance.
    async fn apply_balance_delta(&mut self, account_id: Uuid, delta: f64) -> Result<f64>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    async fn insert_schedule_event(&mut self, event: &ScheduleEvent) -> Result<()>;

    async fn insert_notification_log(&mut self, log: &NotificationLog) -> Result<()>;

    /// Non-spam logs not yet included in a briefing, newest first.
    async fn pending_briefing_logs(&mut self, user_id: Uuid) -> Result<Vec<NotificationLog>>;

    async fn mark_included_in_briefing(&mut self, log_ids: &[Uuid]) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;
}

fn same_institution(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

//
// ================= In-memory =================
//

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    transactions: Vec<Transaction>,
    logs: Vec<NotificationLog>,
    events: Vec<ScheduleEvent>,
}

#[derive(Debug)]
enum StagedOp {
    InsertAccount(Account),
    AdjustBalance { account_id: Uuid, delta: f64 },
    InsertTransaction(Transaction),
    InsertEvent(ScheduleEvent),
    InsertLog(NotificationLog),
    MarkBriefed(Vec<Uuid>),
}

/// In-memory state store for development and tests
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    fail_commits: Arc<AtomicBool>,
    /// Serializes briefing read-then-mark, like `FOR UPDATE` on Postgres
    briefing_lock: Arc<Mutex<()>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            fail_commits: Arc::new(AtomicBool::new(false)),
            briefing_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Make every subsequent commit fail (exercise the fatal path).
    pub fn simulate_commit_failure(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(InMemoryTx {
            state: self.state.clone(),
            fail_commits: self.fail_commits.clone(),
            briefing_lock: self.briefing_lock.clone(),
            briefing_guard: None,
            staged_accounts: HashMap::new(),
            ops: Vec::new(),
            committed: false,
        }))
    }

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn register_account(&self, account: Account) -> Result<Account> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.accounts.values().find(|a| {
            a.user_id == account.user_id
                && same_institution(&a.institution_name, &account.institution_name)
        }) {
            return Ok(existing.clone());
        }

        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn purge_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.logs.len();
        state.logs.retain(|log| log.received_at >= cutoff);
        Ok((before - state.logs.len()) as u64)
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn logs_for_user(&self, user_id: Uuid) -> Result<Vec<NotificationLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<NotificationLog> = state
            .logs
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(logs)
    }

    async fn schedule_events_for_user(&self, user_id: Uuid) -> Result<Vec<ScheduleEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

pub struct InMemoryTx {
    state: Arc<RwLock<MemoryState>>,
    fail_commits: Arc<AtomicBool>,
    briefing_lock: Arc<Mutex<()>>,
    /// Held from the pending-briefing read until commit or drop
    briefing_guard: Option<OwnedMutexGuard<()>>,
    /// Accounts created or touched in this unit of work
    staged_accounts: HashMap<Uuid, Account>,
    ops: Vec<StagedOp>,
    committed: bool,
}

impl InMemoryTx {
    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            return Err(GatekeeperError::Database(
                "transaction already committed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StoreTx for InMemoryTx {
    async fn find_account(
        &mut self,
        user_id: Uuid,
        institution_name: &str,
    ) -> Result<Option<Account>> {
        self.ensure_open()?;

        if let Some(staged) = self.staged_accounts.values().find(|a| {
            a.user_id == user_id && same_institution(&a.institution_name, institution_name)
        }) {
            return Ok(Some(staged.clone()));
        }

        let state = self.state.read().await;
        let mut matches: Vec<&Account> = state
            .accounts
            .values()
            .filter(|a| a.user_id == user_id && same_institution(&a.institution_name, institution_name))
            .collect();
        matches.sort_by_key(|a| a.created_at);
        Ok(matches.first().map(|a| (*a).clone()))
    }

    async fn insert_account(&mut self, account: &Account) -> Result<Account> {
        self.ensure_open()?;
        self.staged_accounts.insert(account.id, account.clone());
        self.ops.push(StagedOp::InsertAccount(account.clone()));
        Ok(account.clone())
    }

    async fn apply_balance_delta(&mut self, account_id: Uuid, delta: f64) -> Result<f64> {
        self.ensure_open()?;

        if !self.staged_accounts.contains_key(&account_id) {
            let state = self.state.read().await;
            let account = state.accounts.get(&account_id).cloned().ok_or_else(|| {
                GatekeeperError::AccountNotFound(account_id.to_string())
            })?;
            drop(state);
            self.staged_accounts.insert(account_id, account);
        }

        let account = self
            .staged_accounts
            .get_mut(&account_id)
            .ok_or_else(|| GatekeeperError::AccountNotFound(account_id.to_string()))?;
        account.balance += delta;
        let new_balance = account.balance;

        self.ops.push(StagedOp::AdjustBalance { account_id, delta });
        Ok(new_balance)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.ensure_open()?;
        self.ops.push(StagedOp::InsertTransaction(transaction.clone()));
        Ok(())
    }

    async fn insert_schedule_event(&mut self, event: &ScheduleEvent) -> Result<()> {
        self.ensure_open()?;
        self.ops.push(StagedOp::InsertEvent(event.clone()));
        Ok(())
    }

    async fn insert_notification_log(&mut self, log: &NotificationLog) -> Result<()> {
        self.ensure_open()?;
        self.ops.push(StagedOp::InsertLog(log.clone()));
        Ok(())
    }

    async fn pending_briefing_logs(&mut self, user_id: Uuid) -> Result<Vec<NotificationLog>> {
        self.ensure_open()?;
        if self.briefing_guard.is_none() {
            self.briefing_guard = Some(self.briefing_lock.clone().lock_owned().await);
        }
        let state = self.state.read().await;
        let mut logs: Vec<NotificationLog> = state
            .logs
            .iter()
            .filter(|l| l.user_id == user_id && !l.is_included_in_briefing && !l.is_spam)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(logs)
    }

    async fn mark_included_in_briefing(&mut self, log_ids: &[Uuid]) -> Result<()> {
        self.ensure_open()?;
        self.ops.push(StagedOp::MarkBriefed(log_ids.to_vec()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;

        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(GatekeeperError::Database(
                "simulated commit failure".to_string(),
            ));
        }

        let mut state = self.state.write().await;

        // (user, institution) is unique: an account another unit of work
        // created first wins, and this one's ops follow it.
        let mut redirects: HashMap<Uuid, Uuid> = HashMap::new();
        for op in &self.ops {
            if let StagedOp::InsertAccount(account) = op {
                if let Some(existing) = state.accounts.values().find(|a| {
                    a.id != account.id
                        && a.user_id == account.user_id
                        && same_institution(&a.institution_name, &account.institution_name)
                }) {
                    redirects.insert(account.id, existing.id);
                }
            }
        }
        let target = |id: Uuid| redirects.get(&id).copied().unwrap_or(id);

        // Validate first so a bad op cannot leave half the batch applied.
        for op in &self.ops {
            if let StagedOp::AdjustBalance { account_id, .. } = op {
                let account_id = target(*account_id);
                let known = state.accounts.contains_key(&account_id)
                    || self.ops.iter().any(
                        |o| matches!(o, StagedOp::InsertAccount(a) if a.id == account_id),
                    );
                if !known {
                    return Err(GatekeeperError::Database(format!(
                        "account {} vanished before commit",
                        account_id
                    )));
                }
            }
        }

        for op in self.ops.drain(..) {
            match op {
                StagedOp::InsertAccount(account) => {
                    if !redirects.contains_key(&account.id) {
                        state.accounts.insert(account.id, account);
                    }
                }
                StagedOp::AdjustBalance { account_id, delta } => {
                    if let Some(account) = state.accounts.get_mut(&target(account_id)) {
                        account.balance += delta;
                    }
                }
                StagedOp::InsertTransaction(mut t) => {
                    t.account_id = target(t.account_id);
                    state.transactions.push(t);
                }
                StagedOp::InsertEvent(e) => state.events.push(e),
                StagedOp::InsertLog(l) => state.logs.push(l),
                StagedOp::MarkBriefed(ids) => {
                    for log in state.logs.iter_mut().filter(|l| ids.contains(&l.id)) {
                        log.is_included_in_briefing = true;
                    }
                }
            }
        }

        self.committed = true;
        self.briefing_guard = None;
        Ok(())
    }
}
