//! Ports: the storage, chain and notification seams the services depend on.
//! Implementations live in `crate::adapters` and `crate::tron`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    ChainHead, ConfirmDeposit, Deposit, DepositStatus, EventPage, NewDeposit, ObservedTransfer,
    ReconciliationFailure, ScanCursor, UserBalance,
};
use crate::money::{Amount, AmountError};

pub use crate::domain::NotificationKind;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another active deposit already holds the payable amount.
    #[error("Payable amount already reserved: {0}")]
    Conflict(String),

    #[error("Transaction hash already recorded: {0}")]
    DuplicateTxHash(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait DepositRepository: Send + Sync {
    /// Inserts a pending deposit. Fails with [`RepositoryError::Conflict`]
    /// when an active deposit already holds the payable amount.
    async fn insert(&self, deposit: NewDeposit) -> RepositoryResult<Deposit>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Deposit>;

    /// Payable amounts currently reserved by pending/awaiting_payment rows.
    async fn active_payable_amounts(&self) -> RepositoryResult<Vec<Amount>>;

    /// The pending deposit, unexpired at `now`, whose payable amount is exactly `amount`.
    async fn find_active_by_payable_amount(
        &self,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Deposit>>;

    async fn find_by_tx_hash(&self, tx_hash: &str) -> RepositoryResult<Option<Deposit>>;

    /// Moves a deposit to `to` if its current status is one of `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: &[DepositStatus],
        to: DepositStatus,
    ) -> RepositoryResult<Deposit>;

    /// Bulk pending/awaiting_payment -> expired for every row past its deadline.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;

    /// Confirms the deposit, credits its owner's available balance and
    /// enqueues the owner's notification in one transaction. Nothing is
    /// written unless all three succeed.
    async fn confirm_and_credit(&self, confirm: ConfirmDeposit) -> RepositoryResult<Deposit>;

    async fn list(
        &self,
        status: Option<DepositStatus>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Deposit>>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn balance(&self, user_id: Uuid) -> RepositoryResult<UserBalance>;

    async fn credit(&self, user_id: Uuid, amount: Amount) -> RepositoryResult<UserBalance>;

    /// Fails with [`RepositoryError::InsufficientFunds`] rather than going negative.
    async fn debit(&self, user_id: Uuid, amount: Amount) -> RepositoryResult<UserBalance>;
}

#[async_trait]
pub trait ScanCursorRepository: Send + Sync {
    async fn load(&self) -> RepositoryResult<Option<ScanCursor>>;

    async fn save(&self, cursor: &ScanCursor) -> RepositoryResult<()>;
}

#[async_trait]
pub trait FailureRepository: Send + Sync {
    /// Opens a failure record for the transfer, or bumps the attempt count of
    /// the one already open.
    async fn record(
        &self,
        transfer: &ObservedTransfer,
        error: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ReconciliationFailure>;

    /// Closes any open record for `tx_hash`. Returns how many were closed.
    async fn resolve(&self, tx_hash: &str, now: DateTime<Utc>) -> RepositoryResult<u64>;

    async fn list_open(&self, limit: i64) -> RepositoryResult<Vec<ReconciliationFailure>>;
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Chain request failed: {0}")]
    Request(String),

    #[error("Invalid response from chain source: {0}")]
    InvalidResponse(String),

    #[error("Chain source unavailable: {0}")]
    Unavailable(String),
}

/// One page request for token `Transfer` events in `[min_timestamp, max_timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub contract: String,
    pub min_timestamp: DateTime<Utc>,
    pub max_timestamp: DateTime<Utc>,
    pub cursor: Option<String>,
    pub limit: u32,
}

#[async_trait]
pub trait TransferEventSource: Send + Sync {
    async fn head(&self) -> Result<ChainHead, ChainError>;

    async fn transfer_events(&self, query: &EventQuery) -> Result<EventPage, ChainError>;
}

/// Push delivery of a notification whose outbox row has already committed.
/// Fire-and-forget: a failure is logged, never rolled back.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, message: &str, kind: NotificationKind)
        -> anyhow::Result<()>;
}
