pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod money;
pub mod ports;
pub mod services;
pub mod startup;
pub mod tron;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::health::DependencyChecker;
use crate::ports::{FailureRepository, ScanCursorRepository};
use crate::services::DepositService;

#[derive(Clone)]
pub struct AppState {
    pub deposits: Arc<DepositService>,
    pub failures: Arc<dyn FailureRepository>,
    pub scan_cursor: Arc<dyn ScanCursorRepository>,
    pub checkers: Vec<Arc<dyn DependencyChecker>>,
    pub started_at: Instant,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/deposits",
            get(handlers::deposits::list_deposits).post(handlers::deposits::create_deposit),
        )
        .route("/deposits/pending", get(handlers::deposits::list_pending))
        .route("/deposits/:id/cancel", post(handlers::deposits::cancel_deposit))
        .route("/deposits/:id/reject", post(handlers::deposits::reject_deposit))
        .route(
            "/deposits/:id/manual-confirm",
            post(handlers::deposits::manual_confirm),
        )
        .route(
            "/reconciliation-failures",
            get(handlers::deposits::list_reconciliation_failures),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
