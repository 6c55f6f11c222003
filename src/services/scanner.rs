//! Periodic scan of token `Transfer` events into the master wallet.
//!
//! Each cycle reads the window `[watermark, head - confirmation_lag)` from
//! the chain's event index and reconciles every transfer into the master wallet. The watermark
//! moves only when every event of the window reconciled, so a failed event
//! is seen again next cycle; the transaction hash check makes the replay
//! harmless.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ScannerSettings;
use crate::domain::{ObservedTransfer, ScanCursor, TransferEvent};
use crate::money::Amount;
use crate::ports::{EventQuery, FailureRepository, ScanCursorRepository, TransferEventSource};
use crate::services::reconciler::{ReconcileOutcome, Reconciler};
use crate::services::single_flight::SingleFlight;
use crate::services::CycleOutcome;
use crate::tron::TronAddress;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub pages: u32,
    pub observed: usize,
    pub relevant: usize,
    pub credited: usize,
    pub already_processed: usize,
    pub unmatched: usize,
    pub failed: usize,
    /// The page cap was hit before the window was exhausted.
    pub truncated: bool,
    /// New watermark, if it moved.
    pub advanced_to: Option<DateTime<Utc>>,
}

pub struct TransferScanner {
    source: Arc<dyn TransferEventSource>,
    cursor: Arc<dyn ScanCursorRepository>,
    failures: Arc<dyn FailureRepository>,
    reconciler: Arc<Reconciler>,
    settings: ScannerSettings,
    flight: SingleFlight,
}

impl TransferScanner {
    pub fn new(
        source: Arc<dyn TransferEventSource>,
        cursor: Arc<dyn ScanCursorRepository>,
        failures: Arc<dyn FailureRepository>,
        reconciler: Arc<Reconciler>,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            source,
            cursor,
            failures,
            reconciler,
            settings,
            flight: SingleFlight::new(),
        }
    }

    /// Runs one cycle unless another is still in flight. Chain and cursor
    /// errors abort the cycle with nothing advanced.
    pub async fn run_once(&self) -> anyhow::Result<CycleOutcome<ScanReport>> {
        let _guard = match self.flight.try_acquire() {
            Some(guard) => guard,
            None => {
                tracing::debug!("Previous scan still running, skipping tick");
                return Ok(CycleOutcome::Skipped);
            }
        };

        self.scan().await.map(CycleOutcome::Completed)
    }

    async fn scan(&self) -> anyhow::Result<ScanReport> {
        let head = self.source.head().await?;
        // Events newer than the lag may not be indexed yet; leave them to a later window.
        let lag = chrono::Duration::from_std(self.settings.confirmation_lag)?;
        let window_end = head.timestamp - lag;
        let watermark = self.watermark(window_end).await?;

        let mut report = ScanReport {
            window_start: Some(watermark),
            window_end: Some(window_end),
            ..ScanReport::default()
        };

        if window_end <= watermark {
            tracing::debug!(%watermark, %window_end, "Scan window empty");
            return Ok(report);
        }

        let events = self.fetch_window(watermark, window_end, &mut report).await?;
        report.observed = events.len();

        let mut last_seen = None;
        for event in &events {
            last_seen = Some(event.block_timestamp);
            let transfer = match self.decode(event) {
                Some(Ok(transfer)) => transfer,
                Some(Err(transfer)) => {
                    report.relevant += 1;
                    report.failed += 1;
                    self.record_failure(&transfer, "undecodable transfer value").await;
                    continue;
                }
                None => continue,
            };
            report.relevant += 1;

            match self.reconciler.reconcile(&transfer).await {
                Ok(ReconcileOutcome::Credited(_)) => report.credited += 1,
                Ok(ReconcileOutcome::AlreadyProcessed) => report.already_processed += 1,
                Ok(ReconcileOutcome::Unmatched) => report.unmatched += 1,
                Ok(ReconcileOutcome::Ignored) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        tx_hash = %transfer.tx_hash,
                        from = %transfer.from,
                        to = %transfer.to,
                        amount = %transfer.amount,
                        block_number = transfer.block_number,
                        error = %e,
                        "Failed to reconcile transfer"
                    );
                    self.record_failure(&transfer, &e.to_string()).await;
                }
            }
        }

        if report.failed > 0 {
            tracing::warn!(
                window_start = %watermark,
                window_end = %window_end,
                failed = report.failed,
                "Scan cycle had failures, watermark not advanced"
            );
            return Ok(report);
        }

        // A truncated window only advances as far as the events actually seen.
        let advance_to = if report.truncated {
            last_seen.filter(|ts| *ts > watermark)
        } else {
            Some(window_end)
        };

        if let Some(next) = advance_to {
            let now = Utc::now();
            self.cursor
                .save(&ScanCursor {
                    last_processed_block_number: head.block_number,
                    last_processed_timestamp: next,
                    last_successful_scan: Some(now),
                    updated_at: now,
                })
                .await?;
            report.advanced_to = Some(next);
        }

        tracing::info!(
            window_start = %watermark,
            window_end = %window_end,
            pages = report.pages,
            observed = report.observed,
            relevant = report.relevant,
            credited = report.credited,
            unmatched = report.unmatched,
            truncated = report.truncated,
            "Scan cycle completed"
        );

        Ok(report)
    }

    /// Loads the persisted watermark, bootstrapping it to `now - lookback`
    /// on first run.
    async fn watermark(&self, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        if let Some(cursor) = self.cursor.load().await? {
            return Ok(cursor.last_processed_timestamp);
        }

        let lookback = chrono::Duration::from_std(self.settings.lookback)?;
        let start = now - lookback;
        self.cursor
            .save(&ScanCursor {
                last_processed_block_number: 0,
                last_processed_timestamp: start,
                last_successful_scan: None,
                updated_at: Utc::now(),
            })
            .await?;
        tracing::info!(watermark = %start, "Scan cursor bootstrapped");
        Ok(start)
    }

    async fn fetch_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> anyhow::Result<Vec<TransferEvent>> {
        let mut query = EventQuery {
            contract: self.settings.token_contract.to_base58(),
            min_timestamp: start,
            max_timestamp: end,
            cursor: None,
            limit: self.settings.page_size,
        };
        let mut events = Vec::new();

        loop {
            let page = self.source.transfer_events(&query).await?;
            report.pages += 1;
            events.extend(page.events.into_iter().filter(|e| e.block_timestamp < end));

            match page.next_cursor {
                Some(next) if report.pages < self.settings.max_pages => query.cursor = Some(next),
                Some(_) => {
                    report.truncated = true;
                    tracing::warn!(
                        pages = report.pages,
                        window_start = %start,
                        window_end = %end,
                        "Scan page cap reached, remainder deferred to next cycle"
                    );
                    break;
                }
                None => break,
            }
        }

        Ok(events)
    }

    /// `None` for events not addressed to the master wallet. `Some(Err)`
    /// carries a best-effort transfer for the failure log when the value
    /// cannot be decoded.
    fn decode(&self, event: &TransferEvent) -> Option<Result<ObservedTransfer, ObservedTransfer>> {
        let to = TronAddress::parse_any(&event.to).ok()?;
        if &to != self.reconciler.master_wallet() {
            return None;
        }
        let from = TronAddress::parse_any(&event.from)
            .map(|a| a.to_base58())
            .unwrap_or_else(|_| event.from.clone());

        let mut transfer = ObservedTransfer {
            tx_hash: event.tx_hash.clone(),
            from,
            to: to.to_base58(),
            amount: Amount::ZERO,
            block_number: event.block_number,
        };

        match Amount::from_base_units(&event.value, self.settings.token_decimals) {
            Ok(amount) => {
                transfer.amount = amount;
                Some(Ok(transfer))
            }
            Err(e) => {
                tracing::error!(
                    tx_hash = %event.tx_hash,
                    value = %event.value,
                    error = %e,
                    "Cannot decode transfer value"
                );
                Some(Err(transfer))
            }
        }
    }

    async fn record_failure(&self, transfer: &ObservedTransfer, error: &str) {
        if let Err(e) = self.failures.record(transfer, error, Utc::now()).await {
            tracing::error!(
                tx_hash = %transfer.tx_hash,
                error = %e,
                "Failed to persist reconciliation failure"
            );
        }
    }

    /// Ticks every `interval` until `shutdown` flips or its sender drops.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval = ?self.settings.interval, "Transfer scanner started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "Scan cycle aborted");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            tracing::info!("Transfer scanner stopped");
        })
    }
}
