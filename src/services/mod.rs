pub mod deposits;
pub mod disambiguator;
pub mod notifier;
pub mod reconciler;
pub mod scanner;
pub mod single_flight;
pub mod sweeper;

pub use deposits::{DepositError, DepositService, DepositTicket};
pub use disambiguator::{disambiguate, DisambiguationError};
pub use notifier::LogNotifier;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use scanner::{ScanReport, TransferScanner};
pub use single_flight::SingleFlight;
pub use sweeper::ExpirationSweeper;

/// Result of one tick of a periodic service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome<T> {
    /// The previous cycle was still running.
    Skipped,
    Completed(T),
}
