//! User notifications enqueued alongside a credit.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DepositConfirmed,
    DepositManuallyConfirmed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DepositConfirmed => "deposit_confirmed",
            NotificationKind::DepositManuallyConfirmed => "deposit_manually_confirmed",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbox message for the deposit owner, written in the credit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn deposit_confirmed(amount: impl fmt::Display) -> Self {
        Self {
            kind: NotificationKind::DepositConfirmed,
            message: format!("Your deposit of {} USDT has been confirmed.", amount),
        }
    }

    pub fn deposit_manually_confirmed(amount: impl fmt::Display) -> Self {
        Self {
            kind: NotificationKind::DepositManuallyConfirmed,
            message: format!("Your deposit of {} USDT has been credited.", amount),
        }
    }
}
