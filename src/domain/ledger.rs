use serde::Serialize;
use uuid::Uuid;

use crate::money::Amount;

/// Balance columns of a user. Deposits only ever raise `available_balance`;
/// `frozen_balance` belongs to the payout workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub available_balance: Amount,
    pub frozen_balance: Amount,
}
