use chrono::Utc;
use std::sync::Arc;

use crate::domain::{ConfirmDeposit, ConfirmMode, Deposit, Notification, ObservedTransfer};
use crate::ports::{
    DepositRepository, FailureRepository, Notifier, RepositoryError, RepositoryResult,
};
use crate::services::notifier::dispatch;
use crate::tron::TronAddress;

/// Recorded as `confirmed_by` on automatically matched deposits.
pub const SCANNER_ACTOR: &str = "scanner";

/// Result of reconciling one observed transfer. Every variant is a success
/// as far as the scan watermark is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not addressed to the master wallet.
    Ignored,
    /// A deposit already carries this transaction hash.
    AlreadyProcessed,
    /// No pending, unexpired deposit has this payable amount.
    Unmatched,
    Credited(Deposit),
}

/// Matches observed transfers to pending deposits and credits their owners.
pub struct Reconciler {
    deposits: Arc<dyn DepositRepository>,
    failures: Arc<dyn FailureRepository>,
    notifier: Arc<dyn Notifier>,
    master_wallet: TronAddress,
}

impl Reconciler {
    pub fn new(
        deposits: Arc<dyn DepositRepository>,
        failures: Arc<dyn FailureRepository>,
        notifier: Arc<dyn Notifier>,
        master_wallet: TronAddress,
    ) -> Self {
        Self {
            deposits,
            failures,
            notifier,
            master_wallet,
        }
    }

    pub fn master_wallet(&self) -> &TronAddress {
        &self.master_wallet
    }

    /// Idempotent per transaction hash. An `Err` means nothing was written
    /// and the transfer must be retried.
    pub async fn reconcile(&self, transfer: &ObservedTransfer) -> RepositoryResult<ReconcileOutcome> {
        let outcome = self.settle(transfer).await?;

        if outcome != ReconcileOutcome::Ignored {
            match self.failures.resolve(&transfer.tx_hash, Utc::now()).await {
                Ok(0) => {}
                Ok(_) => tracing::info!(tx_hash = %transfer.tx_hash, "Reconciliation failure resolved"),
                Err(e) => tracing::warn!(
                    tx_hash = %transfer.tx_hash,
                    error = %e,
                    "Failed to mark reconciliation failure resolved"
                ),
            }
        }

        Ok(outcome)
    }

    async fn settle(&self, transfer: &ObservedTransfer) -> RepositoryResult<ReconcileOutcome> {
        let to_master = TronAddress::parse_any(&transfer.to)
            .map(|to| to == self.master_wallet)
            .unwrap_or(false);
        if !to_master {
            return Ok(ReconcileOutcome::Ignored);
        }

        if self.deposits.find_by_tx_hash(&transfer.tx_hash).await?.is_some() {
            tracing::debug!(tx_hash = %transfer.tx_hash, "Transfer already reconciled");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let now = Utc::now();
        let deposit = match self
            .deposits
            .find_active_by_payable_amount(transfer.amount, now)
            .await?
        {
            Some(deposit) => deposit,
            None => {
                tracing::warn!(
                    tx_hash = %transfer.tx_hash,
                    from = %transfer.from,
                    amount = %transfer.amount,
                    "Unmatched transfer to master wallet, awaiting manual confirmation"
                );
                return Ok(ReconcileOutcome::Unmatched);
            }
        };

        let confirm = ConfirmDeposit {
            deposit_id: deposit.id,
            tx_hash: transfer.tx_hash.clone(),
            amount: transfer.amount,
            confirmed_by: SCANNER_ACTOR.to_string(),
            mode: ConfirmMode::Automatic { now },
            notification: Notification::deposit_confirmed(transfer.amount),
        };

        let notification = confirm.notification.clone();
        let confirmed = match self.deposits.confirm_and_credit(confirm).await {
            Ok(confirmed) => confirmed,
            Err(RepositoryError::DuplicateTxHash(_)) => {
                tracing::debug!(tx_hash = %transfer.tx_hash, "Transfer reconciled concurrently");
                return Ok(ReconcileOutcome::AlreadyProcessed);
            }
            Err(RepositoryError::InvalidState(reason)) => {
                tracing::warn!(
                    tx_hash = %transfer.tx_hash,
                    deposit_id = %deposit.id,
                    amount = %transfer.amount,
                    reason = %reason,
                    "Matched deposit left pending before confirmation, transfer unmatched"
                );
                return Ok(ReconcileOutcome::Unmatched);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            deposit_id = %confirmed.id,
            user_id = %confirmed.user_id,
            tx_hash = %transfer.tx_hash,
            amount = %transfer.amount,
            "Deposit confirmed and credited"
        );

        dispatch(self.notifier.clone(), confirmed.user_id, notification);

        Ok(ReconcileOutcome::Credited(confirmed))
    }
}
