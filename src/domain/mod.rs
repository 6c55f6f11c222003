//! Domain entities.
//! Framework-agnostic; storage adapters convert their rows into these.

pub mod deposit;
pub mod ledger;
pub mod notification;
pub mod scan;

pub use deposit::{ConfirmDeposit, ConfirmMode, Deposit, DepositStatus, NewDeposit};
pub use ledger::UserBalance;
pub use notification::{Notification, NotificationKind};
pub use scan::{
    ChainHead, EventPage, ObservedTransfer, ReconciliationFailure, ScanCursor, TransferEvent,
};
