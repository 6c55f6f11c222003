use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::money::{Amount, CENT};
use crate::tron::TronAddress;

/// Knobs for deposit creation.
#[derive(Debug, Clone)]
pub struct DepositSettings {
    /// Address users are told to pay into.
    pub wallet_address: String,
    pub expiry: Duration,
    pub create_retries: u32,
    pub retry_backoff: Duration,
    pub min_amount: Amount,
    pub max_amount: Amount,
    /// On-chain precision of the token; finer requests could never be paid.
    pub token_decimals: u32,
}

/// Bounds of the nearest-free-slot search.
#[derive(Debug, Clone, Copy)]
pub struct DisambiguationSettings {
    pub step: Amount,
    pub max_deviation: Amount,
    pub max_attempts: u32,
}

impl Default for DisambiguationSettings {
    fn default() -> Self {
        Self {
            step: Amount::from_scaled(CENT),
            max_deviation: Amount::from_scaled(10 * 100 * CENT),
            max_attempts: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub master_wallet: TronAddress,
    pub token_contract: TronAddress,
    pub token_decimals: u32,
    pub interval: Duration,
    pub lookback: Duration,
    /// How far behind the head the event index is trusted to be complete.
    pub confirmation_lag: Duration,
    pub max_pages: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub trongrid_url: String,
    pub trongrid_api_key: Option<String>,
    pub circuit_breaker_failures: u32,
    pub circuit_breaker_reset_secs: u64,
    pub log_json: bool,
    pub deposits: DepositSettings,
    pub disambiguation: DisambiguationSettings,
    pub scanner: ScannerSettings,
    pub sweeper: SweeperSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let master_wallet = address_var("MASTER_WALLET_ADDRESS")?;
        let token_contract = address_var("USDT_CONTRACT_ADDRESS")?;
        let token_decimals: u32 = parse_var("TOKEN_DECIMALS", 6)?;
        if token_decimals > crate::money::SCALE {
            anyhow::bail!("TOKEN_DECIMALS must be at most {}", crate::money::SCALE);
        }

        let deposits = DepositSettings {
            wallet_address: master_wallet.to_base58(),
            expiry: Duration::from_secs(parse_var("DEPOSIT_EXPIRY_SECS", 600)?),
            create_retries: parse_var("DEPOSIT_CREATE_RETRIES", 5)?,
            retry_backoff: Duration::from_millis(parse_var("DEPOSIT_RETRY_BACKOFF_MS", 50)?),
            min_amount: amount_var("DEPOSIT_MIN_AMOUNT", "1")?,
            max_amount: amount_var("DEPOSIT_MAX_AMOUNT", "1000000")?,
            token_decimals,
        };
        if deposits.min_amount > deposits.max_amount {
            anyhow::bail!("DEPOSIT_MIN_AMOUNT must not exceed DEPOSIT_MAX_AMOUNT");
        }

        let disambiguation = DisambiguationSettings {
            max_attempts: parse_var("DISAMBIGUATION_MAX_ATTEMPTS", 200)?,
            max_deviation: amount_var("DISAMBIGUATION_MAX_DEVIATION", "10")?,
            ..DisambiguationSettings::default()
        };

        let scanner = ScannerSettings {
            master_wallet,
            token_contract,
            token_decimals,
            interval: Duration::from_secs(nonzero_var("SCAN_INTERVAL_SECS", 15)?),
            lookback: Duration::from_secs(parse_var("SCAN_LOOKBACK_SECS", 120)?),
            confirmation_lag: Duration::from_secs(parse_var("SCAN_CONFIRMATION_LAG_SECS", 60)?),
            max_pages: nonzero_var("SCAN_MAX_PAGES", 20)?,
            page_size: nonzero_var("SCAN_PAGE_SIZE", 200)?,
        };

        Ok(Config {
            server_port: parse_var("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            trongrid_url: env::var("TRONGRID_URL").context("TRONGRID_URL must be set")?,
            trongrid_api_key: env::var("TRONGRID_API_KEY").ok().filter(|k| !k.is_empty()),
            circuit_breaker_failures: parse_var("CIRCUIT_BREAKER_FAILURES", 3)?,
            circuit_breaker_reset_secs: parse_var("CIRCUIT_BREAKER_RESET_SECS", 60)?,
            log_json: env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json")),
            deposits,
            disambiguation,
            scanner,
            sweeper: SweeperSettings {
                interval: Duration::from_secs(nonzero_var("SWEEP_INTERVAL_SECS", 30)?),
            },
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Like [`parse_var`], but zero is rejected. Intervals of zero would panic
/// the service loops.
fn nonzero_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = parse_var(name, default)?;
    if value == T::default() {
        anyhow::bail!("{} must be greater than 0", name);
    }
    Ok(value)
}

fn amount_var(name: &str, default: &str) -> anyhow::Result<Amount> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let amount: Amount = raw
        .parse()
        .with_context(|| format!("{} is not a decimal amount: {:?}", name, raw))?;
    if !amount.is_positive() {
        anyhow::bail!("{} must be positive", name);
    }
    Ok(amount)
}

fn address_var(name: &str) -> anyhow::Result<TronAddress> {
    let raw = env::var(name).with_context(|| format!("{} must be set", name))?;
    TronAddress::parse_any(raw.trim()).with_context(|| format!("{} is not a TRON address", name))
}
