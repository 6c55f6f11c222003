use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{DepositSettings, DisambiguationSettings};
use crate::domain::{ConfirmDeposit, ConfirmMode, Deposit, DepositStatus, NewDeposit, Notification};
use crate::money::Amount;
use crate::ports::{DepositRepository, Notifier, RepositoryError};
use crate::services::disambiguator::{disambiguate, DisambiguationError};
use crate::services::notifier::dispatch;

/// Page size used by the list operations when the caller gives none.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

#[derive(Error, Debug)]
pub enum DepositError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Exhausted(#[from] DisambiguationError),

    #[error("Could not reserve a payable amount after {0} attempts, try again later")]
    RetriesExhausted(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transaction hash already recorded: {0}")]
    DuplicateTxHash(String),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for DepositError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => DepositError::NotFound(what),
            RepositoryError::InvalidState(msg) => DepositError::InvalidState(msg),
            RepositoryError::DuplicateTxHash(hash) => DepositError::DuplicateTxHash(hash),
            other => DepositError::Repository(other),
        }
    }
}

/// What the user is told after creating a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositTicket {
    pub id: Uuid,
    pub payable_amount: Amount,
    pub wallet_address: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Deposit> for DepositTicket {
    fn from(deposit: &Deposit) -> Self {
        Self {
            id: deposit.id,
            payable_amount: deposit.payable_amount,
            wallet_address: deposit.wallet_address.clone(),
            expires_at: deposit.expires_at,
        }
    }
}

/// Request-driven deposit operations: creation with payable-amount
/// disambiguation, cancel/reject, operator manual confirmation and listing.
pub struct DepositService {
    deposits: Arc<dyn DepositRepository>,
    notifier: Arc<dyn Notifier>,
    settings: DepositSettings,
    disambiguation: DisambiguationSettings,
}

impl DepositService {
    pub fn new(
        deposits: Arc<dyn DepositRepository>,
        notifier: Arc<dyn Notifier>,
        settings: DepositSettings,
        disambiguation: DisambiguationSettings,
    ) -> Self {
        Self {
            deposits,
            notifier,
            settings,
            disambiguation,
        }
    }

    /// Creates a pending deposit with a payable amount no other active
    /// deposit holds. A lost insert race re-snapshots and retries.
    pub async fn create_deposit(
        &self,
        user_id: Uuid,
        requested: Amount,
    ) -> Result<DepositTicket, DepositError> {
        if requested < self.settings.min_amount || requested > self.settings.max_amount {
            return Err(DepositError::Validation(format!(
                "amount must be between {} and {}",
                self.settings.min_amount, self.settings.max_amount
            )));
        }
        if !requested.fits_decimals(self.settings.token_decimals) {
            return Err(DepositError::Validation(format!(
                "amount must have at most {} decimal places",
                self.settings.token_decimals
            )));
        }

        let attempts = self.settings.create_retries.max(1);
        for attempt in 1..=attempts {
            let active: HashSet<Amount> =
                self.deposits.active_payable_amounts().await?.into_iter().collect();
            let payable = disambiguate(requested, &active, &self.disambiguation)?;
            let expires_at = Utc::now()
                + chrono::Duration::from_std(self.settings.expiry)
                    .map_err(|e| DepositError::Validation(e.to_string()))?;

            let new_deposit = NewDeposit {
                user_id,
                requested_amount: requested,
                payable_amount: payable,
                wallet_address: self.settings.wallet_address.clone(),
                expires_at,
            };

            match self.deposits.insert(new_deposit).await {
                Ok(deposit) => {
                    tracing::info!(
                        deposit_id = %deposit.id,
                        %user_id,
                        requested = %requested,
                        payable = %deposit.payable_amount,
                        "Deposit created"
                    );
                    return Ok(DepositTicket::from(&deposit));
                }
                Err(RepositoryError::Conflict(amount)) => {
                    tracing::debug!(
                        %user_id,
                        payable = %amount,
                        attempt,
                        "Payable amount taken concurrently, retrying"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(%user_id, requested = %requested, attempts, "Deposit creation retries exhausted");
        Err(DepositError::RetriesExhausted(attempts))
    }

    pub async fn cancel_deposit(&self, id: Uuid) -> Result<Deposit, DepositError> {
        let deposit = self
            .deposits
            .transition(id, &[DepositStatus::Pending], DepositStatus::Cancelled)
            .await?;
        tracing::info!(deposit_id = %id, "Deposit cancelled");
        Ok(deposit)
    }

    pub async fn reject_deposit(&self, id: Uuid, operator_id: &str) -> Result<Deposit, DepositError> {
        require_non_empty("operator_id", operator_id)?;
        let deposit = self
            .deposits
            .transition(id, &[DepositStatus::Pending], DepositStatus::Rejected)
            .await?;
        tracing::info!(deposit_id = %id, operator_id, "Deposit rejected");
        Ok(deposit)
    }

    /// Credits an expired or cancelled deposit after the fact, using the
    /// operator-supplied transaction hash and settled amount.
    pub async fn manual_confirm(
        &self,
        id: Uuid,
        amount: Amount,
        tx_hash: &str,
        operator_id: &str,
    ) -> Result<Deposit, DepositError> {
        if !amount.is_positive() {
            return Err(DepositError::Validation("amount must be positive".to_string()));
        }
        let tx_hash = tx_hash.trim();
        require_non_empty("tx_hash", tx_hash)?;
        require_non_empty("operator_id", operator_id)?;

        if let Some(existing) = self.deposits.find_by_tx_hash(tx_hash).await? {
            return Err(DepositError::DuplicateTxHash(format!(
                "{} already settled deposit {}",
                tx_hash, existing.id
            )));
        }

        let notification = Notification::deposit_manually_confirmed(amount);
        let confirmed = self
            .deposits
            .confirm_and_credit(ConfirmDeposit {
                deposit_id: id,
                tx_hash: tx_hash.to_string(),
                amount,
                confirmed_by: operator_id.to_string(),
                mode: ConfirmMode::Manual,
                notification: notification.clone(),
            })
            .await?;

        tracing::info!(
            deposit_id = %id,
            tx_hash,
            amount = %amount,
            operator_id,
            user_id = %confirmed.user_id,
            "Deposit manually confirmed"
        );

        dispatch(self.notifier.clone(), confirmed.user_id, notification);

        Ok(confirmed)
    }

    pub async fn get_deposit(&self, id: Uuid) -> Result<Deposit, DepositError> {
        Ok(self.deposits.get_by_id(id).await?)
    }

    pub async fn list_pending(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        self.list_all(Some(DepositStatus::Pending), limit, offset).await
    }

    pub async fn list_all(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Deposit>, DepositError> {
        if limit <= 0 || offset < 0 {
            return Err(DepositError::Validation(
                "limit must be positive and offset non-negative".to_string(),
            ));
        }
        Ok(self.deposits.list(status, limit, offset).await?)
    }

    pub async fn find_active_by_payable_amount(
        &self,
        amount: Amount,
    ) -> Result<Option<Deposit>, DepositError> {
        Ok(self
            .deposits
            .find_active_by_payable_amount(amount, Utc::now())
            .await?)
    }

    pub async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Deposit>, DepositError> {
        Ok(self.deposits.find_by_tx_hash(tx_hash).await?)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), DepositError> {
    if value.trim().is_empty() {
        return Err(DepositError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::ports::LedgerRepository;
    use crate::ports::RepositoryResult;
    use crate::services::notifier::LogNotifier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn settings() -> DepositSettings {
        DepositSettings {
            wallet_address: "TMasterWallet".to_string(),
            expiry: Duration::from_secs(600),
            create_retries: 5,
            retry_backoff: Duration::from_millis(1),
            min_amount: "1".parse().unwrap(),
            max_amount: "1000000".parse().unwrap(),
            token_decimals: 6,
        }
    }

    async fn service() -> (Arc<InMemoryStore>, DepositService, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        store.open_account(user).await;
        let service = DepositService::new(
            store.clone(),
            Arc::new(LogNotifier),
            settings(),
            DisambiguationSettings::default(),
        );
        (store, service, user)
    }

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_second_deposit_for_same_amount_gets_disambiguated() {
        let (_store, service, user) = service().await;

        let first = service.create_deposit(user, amt("50")).await.unwrap();
        let second = service.create_deposit(user, amt("50")).await.unwrap();

        assert_eq!(first.payable_amount, amt("50"));
        assert_eq!(second.payable_amount, amt("49.99"));
        assert_eq!(second.wallet_address, "TMasterWallet");
        assert!(second.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_amount_bounds_are_validated() {
        let (store, service, user) = service().await;

        let low = service.create_deposit(user, amt("0.5")).await;
        assert!(matches!(low, Err(DepositError::Validation(_))));
        let high = service.create_deposit(user, amt("1000000.01")).await;
        assert!(matches!(high, Err(DepositError::Validation(_))));
        assert!(store.all_deposits().await.is_empty());
    }

    #[tokio::test]
    async fn test_amount_finer_than_token_precision_is_rejected() {
        let (store, service, user) = service().await;

        for raw in ["10.1234567", "10.123456789"] {
            let result = service.create_deposit(user, amt(raw)).await;
            assert!(matches!(result, Err(DepositError::Validation(_))), "{raw}");
        }
        assert!(store.all_deposits().await.is_empty());

        let ticket = service.create_deposit(user, amt("10.123456")).await.unwrap();
        assert_eq!(ticket.payable_amount, amt("10.123456"));
        let second = service.create_deposit(user, amt("10.123456")).await.unwrap();
        assert!(second.payable_amount.fits_decimals(6));
    }

    /// Delegates to an in-memory store, but loses the first `conflicts`
    /// inserts to a rival that grabs the same payable amount.
    struct RacingRepository {
        inner: InMemoryStore,
        rival: Uuid,
        conflicts: AtomicU32,
        inserts: AtomicU32,
        snapshots: AtomicU32,
    }

    impl RacingRepository {
        async fn new(user: Uuid, conflicts: u32) -> Self {
            let inner = InMemoryStore::new();
            let rival = Uuid::new_v4();
            inner.open_account(user).await;
            inner.open_account(rival).await;
            Self {
                inner,
                rival,
                conflicts: AtomicU32::new(conflicts),
                inserts: AtomicU32::new(0),
                snapshots: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DepositRepository for RacingRepository {
        async fn insert(&self, deposit: NewDeposit) -> RepositoryResult<Deposit> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            let lost = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                let payable = deposit.payable_amount;
                self.inner
                    .insert(NewDeposit { user_id: self.rival, ..deposit })
                    .await?;
                return Err(RepositoryError::Conflict(payable.to_string()));
            }
            self.inner.insert(deposit).await
        }

        async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Deposit> {
            self.inner.get_by_id(id).await
        }

        async fn active_payable_amounts(&self) -> RepositoryResult<Vec<Amount>> {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            self.inner.active_payable_amounts().await
        }

        async fn find_active_by_payable_amount(
            &self,
            amount: Amount,
            now: DateTime<Utc>,
        ) -> RepositoryResult<Option<Deposit>> {
            self.inner.find_active_by_payable_amount(amount, now).await
        }

        async fn find_by_tx_hash(&self, tx_hash: &str) -> RepositoryResult<Option<Deposit>> {
            self.inner.find_by_tx_hash(tx_hash).await
        }

        async fn transition(
            &self,
            id: Uuid,
            from: &[DepositStatus],
            to: DepositStatus,
        ) -> RepositoryResult<Deposit> {
            self.inner.transition(id, from, to).await
        }

        async fn expire_overdue(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
            self.inner.expire_overdue(now).await
        }

        async fn confirm_and_credit(&self, confirm: ConfirmDeposit) -> RepositoryResult<Deposit> {
            self.inner.confirm_and_credit(confirm).await
        }

        async fn list(
            &self,
            status: Option<DepositStatus>,
            limit: i64,
            offset: i64,
        ) -> RepositoryResult<Vec<Deposit>> {
            self.inner.list(status, limit, offset).await
        }
    }

    fn racing_service(repo: Arc<RacingRepository>) -> DepositService {
        DepositService::new(
            repo,
            Arc::new(LogNotifier),
            settings(),
            DisambiguationSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_lost_insert_race_resnapshots_and_retries() {
        let user = Uuid::new_v4();
        let repo = Arc::new(RacingRepository::new(user, 2).await);
        let service = racing_service(repo.clone());

        let ticket = service.create_deposit(user, amt("50")).await.unwrap();

        // The rival took 50.00 then 49.99; the third snapshot sees both.
        assert_eq!(ticket.payable_amount, amt("50.01"));
        assert_eq!(repo.inserts.load(Ordering::SeqCst), 3);
        assert_eq!(repo.snapshots.load(Ordering::SeqCst), 3);

        let mine = repo.inner.get_by_id(ticket.id).await.unwrap();
        assert_eq!(mine.user_id, user);
        assert_eq!(mine.requested_amount, amt("50"));
    }

    #[tokio::test]
    async fn test_creation_gives_up_after_retry_budget() {
        let user = Uuid::new_v4();
        let repo = Arc::new(RacingRepository::new(user, u32::MAX).await);
        let service = racing_service(repo.clone());

        let result = service.create_deposit(user, amt("50")).await;

        assert!(matches!(result, Err(DepositError::RetriesExhausted(5))));
        assert_eq!(repo.inserts.load(Ordering::SeqCst), 5);
        assert_eq!(repo.snapshots.load(Ordering::SeqCst), 5);
        let mine: Vec<Deposit> = repo
            .inner
            .all_deposits()
            .await
            .into_iter()
            .filter(|d| d.user_id == user)
            .collect();
        assert!(mine.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_reserve_distinct_amounts() {
        let store = Arc::new(InMemoryStore::new());
        let mut settings = settings();
        settings.create_retries = 20;
        let service = Arc::new(DepositService::new(
            store.clone(),
            Arc::new(LogNotifier),
            settings,
            DisambiguationSettings::default(),
        ));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let user = Uuid::new_v4();
            store.open_account(user).await;
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.create_deposit(user, amt("50")).await
            }));
        }

        let mut payable = HashSet::new();
        for handle in handles {
            let ticket = handle.await.unwrap().unwrap();
            assert!((ticket.payable_amount.scaled() - amt("50").scaled()).abs() <= amt("10").scaled());
            assert!(payable.insert(ticket.payable_amount));
        }
        assert_eq!(payable.len(), 12);
        assert_eq!(store.all_deposits().await.len(), 12);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (_store, service, _user) = service().await;
        let result = service.create_deposit(Uuid::new_v4(), amt("10")).await;
        assert!(matches!(result, Err(DepositError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_and_reject_only_from_pending() {
        let (_store, service, user) = service().await;
        let a = service.create_deposit(user, amt("10")).await.unwrap();
        let b = service.create_deposit(user, amt("20")).await.unwrap();

        let cancelled = service.cancel_deposit(a.id).await.unwrap();
        assert_eq!(cancelled.status, DepositStatus::Cancelled);
        assert!(matches!(
            service.cancel_deposit(a.id).await,
            Err(DepositError::InvalidState(_))
        ));

        assert!(matches!(
            service.reject_deposit(b.id, " ").await,
            Err(DepositError::Validation(_))
        ));
        let rejected = service.reject_deposit(b.id, "op-7").await.unwrap();
        assert_eq!(rejected.status, DepositStatus::Rejected);
    }

    #[tokio::test]
    async fn test_cancelled_amount_becomes_available_again() {
        let (_store, service, user) = service().await;
        let first = service.create_deposit(user, amt("50")).await.unwrap();
        service.cancel_deposit(first.id).await.unwrap();

        let again = service.create_deposit(user, amt("50")).await.unwrap();
        assert_eq!(again.payable_amount, amt("50"));
    }

    #[tokio::test]
    async fn test_manual_confirm_credits_cancelled_deposit_once() {
        let (store, service, user) = service().await;
        let ticket = service.create_deposit(user, amt("25")).await.unwrap();

        assert!(matches!(
            service.manual_confirm(ticket.id, amt("25"), "tx-1", "op").await,
            Err(DepositError::InvalidState(_))
        ));

        service.cancel_deposit(ticket.id).await.unwrap();
        let confirmed = service
            .manual_confirm(ticket.id, amt("24.5"), "tx-1", "op")
            .await
            .unwrap();
        assert_eq!(confirmed.status, DepositStatus::Confirmed);
        assert_eq!(confirmed.amount, Some(amt("24.5")));
        assert_eq!(confirmed.confirmed_by.as_deref(), Some("op"));

        let again = service.manual_confirm(ticket.id, amt("24.5"), "tx-1", "op").await;
        assert!(matches!(again, Err(DepositError::DuplicateTxHash(_))));

        let balance = store.balance(user).await.unwrap();
        assert_eq!(balance.available_balance, amt("24.5"));
    }

    #[tokio::test]
    async fn test_manual_confirm_validates_input() {
        let (_store, service, _user) = service().await;
        let id = Uuid::new_v4();
        assert!(matches!(
            service.manual_confirm(id, Amount::ZERO, "tx", "op").await,
            Err(DepositError::Validation(_))
        ));
        assert!(matches!(
            service.manual_confirm(id, amt("1"), "", "op").await,
            Err(DepositError::Validation(_))
        ));
        assert!(matches!(
            service.manual_confirm(id, amt("1"), "tx", "op").await,
            Err(DepositError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pending_filters_by_status() {
        let (_store, service, user) = service().await;
        let a = service.create_deposit(user, amt("10")).await.unwrap();
        service.create_deposit(user, amt("11")).await.unwrap();
        service.cancel_deposit(a.id).await.unwrap();

        let pending = service.list_pending(DEFAULT_PAGE_SIZE, 0).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payable_amount, amt("11"));
        assert!(service.list_pending(DEFAULT_PAGE_SIZE, 1).await.unwrap().is_empty());

        let all = service.list_all(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(service.list_all(None, 0, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_find_helpers() {
        let (_store, service, user) = service().await;
        let ticket = service.create_deposit(user, amt("42")).await.unwrap();

        let found = service.find_active_by_payable_amount(amt("42")).await.unwrap();
        assert_eq!(found.map(|d| d.id), Some(ticket.id));
        assert!(service.find_by_tx_hash("nope").await.unwrap().is_none());
    }
}
