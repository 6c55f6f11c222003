use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SweeperSettings;
use crate::ports::DepositRepository;
use crate::services::single_flight::SingleFlight;
use crate::services::CycleOutcome;

/// Moves overdue pending/awaiting_payment deposits to `expired`.
pub struct ExpirationSweeper {
    deposits: Arc<dyn DepositRepository>,
    settings: SweeperSettings,
    flight: SingleFlight,
}

impl ExpirationSweeper {
    pub fn new(deposits: Arc<dyn DepositRepository>, settings: SweeperSettings) -> Self {
        Self {
            deposits,
            settings,
            flight: SingleFlight::new(),
        }
    }

    /// Returns the number of deposits expired by this cycle.
    pub async fn run_once(&self) -> anyhow::Result<CycleOutcome<u64>> {
        let _guard = match self.flight.try_acquire() {
            Some(guard) => guard,
            None => {
                tracing::debug!("Previous sweep still running, skipping tick");
                return Ok(CycleOutcome::Skipped);
            }
        };

        let expired = self.deposits.expire_overdue(Utc::now()).await?;
        if expired > 0 {
            tracing::info!(expired, "Expired overdue deposits");
        }
        Ok(CycleOutcome::Completed(expired))
    }

    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval = ?self.settings.interval, "Expiration sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "Sweep cycle failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            tracing::info!("Expiration sweeper stopped");
        })
    }
}
