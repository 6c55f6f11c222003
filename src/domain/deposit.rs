//! Deposit entity and its lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::Notification;
use crate::money::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    AwaitingPayment,
    Confirmed,
    Rejected,
    Expired,
    Cancelled,
}

impl DepositStatus {
    /// Statuses that reserve a payable amount.
    pub const ACTIVE: [DepositStatus; 2] = [DepositStatus::Pending, DepositStatus::AwaitingPayment];

    /// Statuses an operator may manually confirm from.
    pub const MANUALLY_CONFIRMABLE: [DepositStatus; 2] =
        [DepositStatus::Expired, DepositStatus::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::AwaitingPayment => "awaiting_payment",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Rejected => "rejected",
            DepositStatus::Expired => "expired",
            DepositStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DepositStatus::Pending),
            "awaiting_payment" => Ok(DepositStatus::AwaitingPayment),
            "confirmed" => Ok(DepositStatus::Confirmed),
            "rejected" => Ok(DepositStatus::Rejected),
            "expired" => Ok(DepositStatus::Expired),
            "cancelled" => Ok(DepositStatus::Cancelled),
            other => Err(format!("unknown deposit status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub requested_amount: Amount,
    pub payable_amount: Amount,
    /// Settled amount, set on confirmation.
    pub amount: Option<Amount>,
    pub wallet_address: String,
    pub expires_at: DateTime<Utc>,
    pub status: DepositStatus,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<String>,
}

impl Deposit {
    /// Whether an observed transfer may settle this deposit automatically.
    pub fn is_matchable(&self, now: DateTime<Utc>) -> bool {
        self.status == DepositStatus::Pending && self.expires_at > now
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.expires_at <= now
    }
}

/// A deposit about to be inserted; the payable amount is already disambiguated.
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub user_id: Uuid,
    pub requested_amount: Amount,
    pub payable_amount: Amount,
    pub wallet_address: String,
    pub expires_at: DateTime<Utc>,
}

impl NewDeposit {
    pub fn into_deposit(self, now: DateTime<Utc>) -> Deposit {
        Deposit {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            requested_amount: self.requested_amount,
            payable_amount: self.payable_amount,
            amount: None,
            wallet_address: self.wallet_address,
            expires_at: self.expires_at,
            status: DepositStatus::Pending,
            tx_hash: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            confirmed_by: None,
        }
    }
}

/// Which transition a confirmation is allowed to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Scanner match: only a pending deposit whose deadline is after `now`.
    Automatic { now: DateTime<Utc> },
    /// Operator credit after the fact: only expired or cancelled deposits.
    Manual,
}

impl ConfirmMode {
    pub fn permits(&self, deposit: &Deposit) -> bool {
        match self {
            ConfirmMode::Automatic { now } => deposit.is_matchable(*now),
            ConfirmMode::Manual => DepositStatus::MANUALLY_CONFIRMABLE.contains(&deposit.status),
        }
    }
}

/// Input of the atomic confirm-and-credit primitive.
#[derive(Debug, Clone)]
pub struct ConfirmDeposit {
    pub deposit_id: Uuid,
    pub tx_hash: String,
    pub amount: Amount,
    pub confirmed_by: String,
    pub mode: ConfirmMode,
    /// Enqueued in the outbox in the same transaction as the credit.
    pub notification: Notification,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending(expires_in: Duration) -> Deposit {
        let now = Utc::now();
        NewDeposit {
            user_id: Uuid::new_v4(),
            requested_amount: Amount::from_whole(50).unwrap(),
            payable_amount: Amount::from_whole(50).unwrap(),
            wallet_address: "TMasterWallet".to_string(),
            expires_at: now + expires_in,
        }
        .into_deposit(now)
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DepositStatus::Pending,
            DepositStatus::AwaitingPayment,
            DepositStatus::Confirmed,
            DepositStatus::Rejected,
            DepositStatus::Expired,
            DepositStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<DepositStatus>().unwrap(), status);
        }
        assert!("settled".parse::<DepositStatus>().is_err());
    }

    #[test]
    fn test_automatic_confirmation_requires_unexpired_pending() {
        let now = Utc::now();
        let mut deposit = pending(Duration::minutes(10));
        assert!(ConfirmMode::Automatic { now }.permits(&deposit));
        assert!(!ConfirmMode::Manual.permits(&deposit));

        deposit.expires_at = now - Duration::seconds(1);
        assert!(!ConfirmMode::Automatic { now }.permits(&deposit));
        assert!(deposit.is_overdue(now));

        deposit.expires_at = now + Duration::minutes(1);
        deposit.status = DepositStatus::AwaitingPayment;
        assert!(!ConfirmMode::Automatic { now }.permits(&deposit));
    }

    #[test]
    fn test_manual_confirmation_only_from_expired_or_cancelled() {
        let mut deposit = pending(Duration::minutes(10));
        for (status, allowed) in [
            (DepositStatus::Expired, true),
            (DepositStatus::Cancelled, true),
            (DepositStatus::Pending, false),
            (DepositStatus::Rejected, false),
            (DepositStatus::Confirmed, false),
        ] {
            deposit.status = status;
            assert_eq!(ConfirmMode::Manual.permits(&deposit), allowed, "{status}");
        }
    }
}
