//! Implementations of the repository ports.

pub mod in_memory;
pub mod postgres_deposit_repository;
pub mod postgres_scan_repository;

pub use in_memory::InMemoryStore;
pub use postgres_deposit_repository::PostgresDepositRepository;
pub use postgres_scan_repository::PostgresScanRepository;

use crate::ports::RepositoryError;

pub(crate) const ACTIVE_PAYABLE_AMOUNT_INDEX: &str = "deposits_active_payable_amount_key";
pub(crate) const TX_HASH_INDEX: &str = "deposits_tx_hash_key";
pub(crate) const USER_FOREIGN_KEY: &str = "deposits_user_id_fkey";

/// Maps constraint violations on the deposits table onto domain errors.
pub(crate) fn map_write_error(err: sqlx::Error, subject: &str) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.constraint() {
            Some(ACTIVE_PAYABLE_AMOUNT_INDEX) => {
                return RepositoryError::Conflict(subject.to_string())
            }
            Some(TX_HASH_INDEX) => return RepositoryError::DuplicateTxHash(subject.to_string()),
            Some(USER_FOREIGN_KEY) => {
                return RepositoryError::NotFound(format!("user for {}", subject))
            }
            _ => {}
        }
    }
    RepositoryError::Database(err)
}
