//! In-memory implementation of the repository ports.
//!
//! Enforces the same constraints as the Postgres schema (unique payable
//! amount among active deposits, unique transaction hash, non-negative
//! balances) under one lock, so every call is atomic. Used by tests and dry
//! runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    ConfirmDeposit, Deposit, DepositStatus, NewDeposit, Notification, ObservedTransfer,
    ReconciliationFailure, ScanCursor, UserBalance,
};
use crate::money::Amount;
use crate::ports::{
    DepositRepository, FailureRepository, LedgerRepository, RepositoryError, RepositoryResult,
    ScanCursorRepository,
};

#[derive(Default)]
struct State {
    deposits: HashMap<Uuid, Deposit>,
    balances: HashMap<Uuid, UserBalance>,
    cursor: Option<ScanCursor>,
    failures: Vec<ReconciliationFailure>,
    outbox: Vec<(Uuid, Notification)>,
    failing_confirms: HashSet<String>,
}

impl State {
    fn deposit(&self, id: Uuid) -> RepositoryResult<&Deposit> {
        self.deposits
            .get(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", id)))
    }

    fn balance(&self, user_id: Uuid) -> RepositoryResult<UserBalance> {
        self.balances
            .get(&user_id)
            .copied()
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user with a zero balance.
    pub async fn open_account(&self, user_id: Uuid) {
        self.state.lock().await.balances.entry(user_id).or_insert(UserBalance {
            user_id,
            available_balance: Amount::ZERO,
            frozen_balance: Amount::ZERO,
        });
    }

    /// Makes the next confirmation carrying `tx_hash` fail as a transient
    /// storage error, leaving nothing written.
    pub async fn fail_next_confirm(&self, tx_hash: &str) {
        self.state
            .lock()
            .await
            .failing_confirms
            .insert(tx_hash.to_string());
    }

    /// Overwrites a deposit row as-is, bypassing state checks.
    pub async fn put_deposit(&self, deposit: Deposit) {
        self.state.lock().await.deposits.insert(deposit.id, deposit);
    }

    pub async fn all_deposits(&self) -> Vec<Deposit> {
        self.state.lock().await.deposits.values().cloned().collect()
    }

    /// Notifications enqueued by committed credits, oldest first.
    pub async fn outbox(&self) -> Vec<(Uuid, Notification)> {
        self.state.lock().await.outbox.clone()
    }
}

#[async_trait]
impl DepositRepository for InMemoryStore {
    async fn insert(&self, deposit: NewDeposit) -> RepositoryResult<Deposit> {
        let mut state = self.state.lock().await;
        state.balance(deposit.user_id)?;

        let taken = state
            .deposits
            .values()
            .any(|d| d.status.is_active() && d.payable_amount == deposit.payable_amount);
        if taken {
            return Err(RepositoryError::Conflict(deposit.payable_amount.to_string()));
        }

        let deposit = deposit.into_deposit(Utc::now());
        state.deposits.insert(deposit.id, deposit.clone());
        Ok(deposit)
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Deposit> {
        self.state.lock().await.deposit(id).cloned()
    }

    async fn active_payable_amounts(&self) -> RepositoryResult<Vec<Amount>> {
        Ok(self
            .state
            .lock()
            .await
            .deposits
            .values()
            .filter(|d| d.status.is_active())
            .map(|d| d.payable_amount)
            .collect())
    }

    async fn find_active_by_payable_amount(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Deposit>> {
        Ok(self
            .state
            .lock()
            .await
            .deposits
            .values()
            .find(|d| d.payable_amount == amount && d.is_matchable(now))
            .cloned())
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> RepositoryResult<Option<Deposit>> {
        Ok(self
            .state
            .lock()
            .await
            .deposits
            .values()
            .find(|d| d.tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[DepositStatus],
        to: DepositStatus,
    ) -> RepositoryResult<Deposit> {
        let mut state = self.state.lock().await;
        let current = state.deposit(id)?.clone();
        if !from.contains(&current.status) {
            return Err(RepositoryError::InvalidState(format!(
                "deposit {} is {}, cannot move to {}",
                id, current.status, to
            )));
        }
        if to.is_active()
            && state.deposits.values().any(|d| {
                d.id != id && d.status.is_active() && d.payable_amount == current.payable_amount
            })
        {
            return Err(RepositoryError::Conflict(current.payable_amount.to_string()));
        }

        let mut updated = current;
        updated.status = to;
        updated.updated_at = Utc::now();
        state.deposits.insert(id, updated.clone());
        Ok(updated)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for deposit in state.deposits.values_mut() {
            if deposit.is_overdue(now) {
                deposit.status = DepositStatus::Expired;
                deposit.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn confirm_and_credit(&self, confirm: ConfirmDeposit) -> RepositoryResult<Deposit> {
        let mut state = self.state.lock().await;
        let current = state.deposit(confirm.deposit_id)?.clone();
        if !confirm.mode.permits(&current) {
            return Err(RepositoryError::InvalidState(format!(
                "deposit {} is {} and cannot be confirmed",
                current.id, current.status
            )));
        }
        if state.failing_confirms.remove(&confirm.tx_hash) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        if state
            .deposits
            .values()
            .any(|d| d.tx_hash.as_deref() == Some(confirm.tx_hash.as_str()))
        {
            return Err(RepositoryError::DuplicateTxHash(confirm.tx_hash));
        }

        let mut balance = state.balance(current.user_id)?;
        balance.available_balance = balance.available_balance.checked_add(confirm.amount)?;

        let now = Utc::now();
        let mut confirmed = current;
        confirmed.status = DepositStatus::Confirmed;
        confirmed.tx_hash = Some(confirm.tx_hash);
        confirmed.amount = Some(confirm.amount);
        confirmed.confirmed_at = Some(now);
        confirmed.confirmed_by = Some(confirm.confirmed_by);
        confirmed.updated_at = now;

        state.balances.insert(balance.user_id, balance);
        state.deposits.insert(confirmed.id, confirmed.clone());
        state.outbox.push((confirmed.user_id, confirm.notification));
        Ok(confirmed)
    }

    async fn list(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Deposit>> {
        let state = self.state.lock().await;
        let mut deposits: Vec<Deposit> = state
            .deposits
            .values()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        deposits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(deposits
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn balance(&self, user_id: Uuid) -> RepositoryResult<UserBalance> {
        self.state.lock().await.balance(user_id)
    }

    async fn credit(&self, user_id: Uuid, amount: Amount) -> RepositoryResult<UserBalance> {
        let mut state = self.state.lock().await;
        let mut balance = state.balance(user_id)?;
        balance.available_balance = balance.available_balance.checked_add(amount)?;
        state.balances.insert(user_id, balance);
        Ok(balance)
    }

    async fn debit(&self, user_id: Uuid, amount: Amount) -> RepositoryResult<UserBalance> {
        let mut state = self.state.lock().await;
        let mut balance = state.balance(user_id)?;
        let remaining = balance.available_balance.checked_sub(amount)?;
        if remaining < Amount::ZERO {
            return Err(RepositoryError::InsufficientFunds(format!(
                "user {} has {}, needs {}",
                user_id, balance.available_balance, amount
            )));
        }
        balance.available_balance = remaining;
        state.balances.insert(user_id, balance);
        Ok(balance)
    }
}

#[async_trait]
impl ScanCursorRepository for InMemoryStore {
    async fn load(&self) -> RepositoryResult<Option<ScanCursor>> {
        Ok(self.state.lock().await.cursor.clone())
    }

    async fn save(&self, cursor: &ScanCursor) -> RepositoryResult<()> {
        self.state.lock().await.cursor = Some(cursor.clone());
        Ok(())
    }
}

#[async_trait]
impl FailureRepository for InMemoryStore {
    async fn record(
        &self,
        transfer: &ObservedTransfer,
        error: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ReconciliationFailure> {
        let mut state = self.state.lock().await;
        if let Some(open) = state
            .failures
            .iter_mut()
            .find(|f| f.tx_hash == transfer.tx_hash && f.resolved_at.is_none())
        {
            open.attempts += 1;
            open.error = error.to_string();
            open.last_seen_at = now;
            return Ok(open.clone());
        }

        let failure = ReconciliationFailure {
            id: Uuid::new_v4(),
            tx_hash: transfer.tx_hash.clone(),
            from_address: transfer.from.clone(),
            to_address: transfer.to.clone(),
            amount: transfer.amount,
            error: error.to_string(),
            attempts: 1,
            first_seen_at: now,
            last_seen_at: now,
            resolved_at: None,
        };
        state.failures.push(failure.clone());
        Ok(failure)
    }

    async fn resolve(&self, tx_hash: &str, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut state = self.state.lock().await;
        let mut closed = 0;
        for failure in state
            .failures
            .iter_mut()
            .filter(|f| f.tx_hash == tx_hash && f.resolved_at.is_none())
        {
            failure.resolved_at = Some(now);
            closed += 1;
        }
        Ok(closed)
    }

    async fn list_open(&self, limit: i64) -> RepositoryResult<Vec<ReconciliationFailure>> {
        let state = self.state.lock().await;
        let mut open: Vec<ReconciliationFailure> = state
            .failures
            .iter()
            .filter(|f| f.resolved_at.is_none())
            .cloned()
            .collect();
        open.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        open.truncate(limit.max(0) as usize);
        Ok(open)
    }
}
