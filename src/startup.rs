use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;

use crate::adapters::{PostgresDepositRepository, PostgresScanRepository};
use crate::config::Config;
use crate::health::{DependencyChecker, PostgresChecker, TronGridChecker};
use crate::services::{DepositService, ExpirationSweeper, LogNotifier, Reconciler, TransferScanner};
use crate::tron::TronGridClient;
use crate::AppState;

/// Every long-lived component, wired against Postgres and TronGrid.
pub struct Components {
    pub deposits: Arc<DepositService>,
    pub scanner: Arc<TransferScanner>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub app_state: AppState,
}

pub fn tron_client(config: &Config) -> TronGridClient {
    TronGridClient::with_circuit_breaker(
        config.trongrid_url.clone(),
        config.trongrid_api_key.clone(),
        config.circuit_breaker_failures,
        config.circuit_breaker_reset_secs,
    )
}

pub fn build(config: &Config, pool: PgPool) -> Components {
    let deposit_repo = Arc::new(PostgresDepositRepository::new(pool.clone()));
    let scan_repo = Arc::new(PostgresScanRepository::new(pool.clone()));
    let notifier = Arc::new(LogNotifier);
    let client = tron_client(config);

    let deposits = Arc::new(DepositService::new(
        deposit_repo.clone(),
        notifier.clone(),
        config.deposits.clone(),
        config.disambiguation,
    ));

    let reconciler = Arc::new(Reconciler::new(
        deposit_repo.clone(),
        scan_repo.clone(),
        notifier,
        config.scanner.master_wallet,
    ));

    let scanner = Arc::new(TransferScanner::new(
        Arc::new(client.clone()),
        scan_repo.clone(),
        scan_repo.clone(),
        reconciler,
        config.scanner.clone(),
    ));

    let sweeper = Arc::new(ExpirationSweeper::new(
        deposit_repo,
        config.sweeper.clone(),
    ));

    let checkers: Vec<Arc<dyn DependencyChecker>> = vec![
        Arc::new(PostgresChecker::new(pool)),
        Arc::new(TronGridChecker::new(client)),
    ];

    let app_state = AppState {
        deposits: deposits.clone(),
        failures: scan_repo.clone(),
        scan_cursor: scan_repo,
        checkers,
        started_at: Instant::now(),
    };

    Components {
        deposits,
        scanner,
        sweeper,
        app_state,
    }
}

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub trongrid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.trongrid
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("TronGrid Connectivity: {}", status(self.trongrid));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  - {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "PASS" } else { "FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAIL"
    }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        trongrid: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = tron_client(config).get_now_block().await {
        report.trongrid = false;
        report.errors.push(format!("TronGrid: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.scanner.page_size == 0 || config.scanner.max_pages == 0 {
        anyhow::bail!("SCAN_PAGE_SIZE and SCAN_MAX_PAGES must be greater than 0");
    }
    if config.scanner.interval.is_zero() || config.sweeper.interval.is_zero() {
        anyhow::bail!("SCAN_INTERVAL_SECS and SWEEP_INTERVAL_SECS must be greater than 0");
    }

    url::Url::parse(&config.trongrid_url).context("TRONGRID_URL is not a valid URL")?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DepositSettings, DisambiguationSettings, ScannerSettings, SweeperSettings};
    use std::time::Duration;

    fn config(trongrid_url: &str) -> Config {
        let wallet = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".parse().unwrap();
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/deposits".to_string(),
            trongrid_url: trongrid_url.to_string(),
            trongrid_api_key: None,
            circuit_breaker_failures: 3,
            circuit_breaker_reset_secs: 60,
            log_json: false,
            deposits: DepositSettings {
                wallet_address: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string(),
                expiry: Duration::from_secs(600),
                create_retries: 5,
                retry_backoff: Duration::from_millis(50),
                min_amount: "1".parse().unwrap(),
                max_amount: "1000000".parse().unwrap(),
                token_decimals: 6,
            },
            disambiguation: DisambiguationSettings::default(),
            scanner: ScannerSettings {
                master_wallet: wallet,
                token_contract: wallet,
                token_decimals: 6,
                interval: Duration::from_secs(15),
                lookback: Duration::from_secs(120),
                confirmation_lag: Duration::ZERO,
                max_pages: 20,
                page_size: 200,
            },
            sweeper: SweeperSettings { interval: Duration::from_secs(30) },
        }
    }

    #[test]
    fn test_validate_env_vars_accepts_defaults() {
        assert!(validate_env_vars(&config("https://api.trongrid.io")).is_ok());
    }

    #[test]
    fn test_validate_env_vars_invalid_url() {
        assert!(validate_env_vars(&config("not-a-url")).is_err());
    }

    #[test]
    fn test_validate_env_vars_zero_page_size() {
        let mut config = config("https://api.trongrid.io");
        config.scanner.page_size = 0;
        assert!(validate_env_vars(&config).is_err());
    }
}
