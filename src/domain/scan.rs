//! Chain observations and scanner bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::money::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// A token `Transfer` event as reported by the chain's event index, before
/// address and value decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    /// Integer value in token base units.
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<TransferEvent>,
    /// Opaque continuation token; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// A decoded transfer ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransfer {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    pub block_number: u64,
}

/// Persisted scan watermark (singleton).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanCursor {
    pub last_processed_block_number: u64,
    /// Lower bound of the next scan window.
    pub last_processed_timestamp: DateTime<Utc>,
    pub last_successful_scan: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Durable record of a transfer whose reconciliation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationFailure {
    pub id: Uuid,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Amount,
    pub error: String,
    pub attempts: i32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
