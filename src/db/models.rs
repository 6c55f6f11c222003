//! Row types for SQLx. Money columns are `NUMERIC(20, 8)` and are converted
//! into [`Amount`] on the way out; nothing here touches floating point.

use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{Deposit, DepositStatus, ReconciliationFailure, ScanCursor, UserBalance};
use crate::money::Amount;
use crate::ports::{RepositoryError, RepositoryResult};

#[derive(Debug, FromRow)]
pub struct DepositRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub requested_amount: BigDecimal,
    pub payable_amount: BigDecimal,
    pub amount: Option<BigDecimal>,
    pub wallet_address: String,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<String>,
}

impl DepositRow {
    pub fn into_domain(self) -> RepositoryResult<Deposit> {
        let status = self
            .status
            .parse::<DepositStatus>()
            .map_err(RepositoryError::InvalidState)?;

        Ok(Deposit {
            id: self.id,
            user_id: self.user_id,
            requested_amount: Amount::from_bigdecimal(&self.requested_amount)?,
            payable_amount: Amount::from_bigdecimal(&self.payable_amount)?,
            amount: self.amount.as_ref().map(Amount::from_bigdecimal).transpose()?,
            wallet_address: self.wallet_address,
            expires_at: self.expires_at,
            status,
            tx_hash: self.tx_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
            confirmed_at: self.confirmed_at,
            confirmed_by: self.confirmed_by,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct UserBalanceRow {
    pub id: Uuid,
    pub available_balance: BigDecimal,
    pub frozen_balance: BigDecimal,
}

impl UserBalanceRow {
    pub fn into_domain(self) -> RepositoryResult<UserBalance> {
        Ok(UserBalance {
            user_id: self.id,
            available_balance: Amount::from_bigdecimal(&self.available_balance)?,
            frozen_balance: Amount::from_bigdecimal(&self.frozen_balance)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ScanCursorRow {
    pub last_processed_block_number: i64,
    pub last_processed_timestamp: DateTime<Utc>,
    pub last_successful_scan: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ScanCursorRow {
    pub fn into_domain(self) -> ScanCursor {
        ScanCursor {
            last_processed_block_number: self.last_processed_block_number.max(0) as u64,
            last_processed_timestamp: self.last_processed_timestamp,
            last_successful_scan: self.last_successful_scan,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ReconciliationFailureRow {
    pub id: Uuid,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: BigDecimal,
    pub error: String,
    pub attempts: i32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationFailureRow {
    pub fn into_domain(self) -> RepositoryResult<ReconciliationFailure> {
        Ok(ReconciliationFailure {
            id: self.id,
            tx_hash: self.tx_hash,
            from_address: self.from_address,
            to_address: self.to_address,
            amount: Amount::from_bigdecimal(&self.amount)?,
            error: self.error,
            attempts: self.attempts,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
            resolved_at: self.resolved_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_deposit_row_converts_numeric_columns() {
        let now = Utc::now();
        let row = DepositRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            requested_amount: BigDecimal::from_str("50.00000000").unwrap(),
            payable_amount: BigDecimal::from_str("49.99000000").unwrap(),
            amount: None,
            wallet_address: "TMaster".to_string(),
            expires_at: now,
            status: "pending".to_string(),
            tx_hash: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            confirmed_by: None,
        };

        let deposit = row.into_domain().unwrap();
        assert_eq!(deposit.payable_amount, "49.99".parse::<Amount>().unwrap());
        assert_eq!(deposit.status, DepositStatus::Pending);
        assert!(deposit.amount.is_none());
    }

    #[test]
    fn test_deposit_row_rejects_unknown_status() {
        let now = Utc::now();
        let row = DepositRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            requested_amount: BigDecimal::from(1),
            payable_amount: BigDecimal::from(1),
            amount: None,
            wallet_address: "TMaster".to_string(),
            expires_at: now,
            status: "settled".to_string(),
            tx_hash: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            confirmed_by: None,
        };

        assert!(matches!(row.into_domain(), Err(RepositoryError::InvalidState(_))));
    }
}
