use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{Deposit, DepositStatus};
use crate::money::Amount;
use crate::services::{CycleOutcome, DepositService, ExpirationSweeper, TransferScanner};

#[derive(Parser)]
#[command(name = "deposit-intake")]
#[command(about = "USDT deposit intake: payable amounts, chain scanning and crediting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and background loops (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Chain scanner commands
    #[command(subcommand)]
    Scan(ScanCommands),

    /// Expiration sweeper commands
    #[command(subcommand)]
    Sweep(SweepCommands),

    /// Deposit management commands
    #[command(subcommand)]
    Deposit(DepositCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum ScanCommands {
    /// Run a single scan cycle
    Once,
}

#[derive(Subcommand)]
pub enum SweepCommands {
    /// Run a single expiration sweep
    Once,
}

#[derive(Subcommand)]
pub enum DepositCommands {
    /// Credit an expired or cancelled deposit with an observed transfer
    ManualConfirm {
        /// Deposit UUID
        #[arg(value_name = "DEPOSIT_ID")]
        id: Uuid,

        /// Settled amount
        #[arg(long)]
        amount: Amount,

        /// Transaction hash of the transfer
        #[arg(long)]
        tx_hash: String,

        /// Operator performing the confirmation
        #[arg(long)]
        operator: String,
    },

    /// List deposits, newest first
    List {
        /// Filter by status (pending, awaiting_payment, confirmed, ...)
        #[arg(long)]
        status: Option<DepositStatus>,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  TronGrid URL: {}", config.trongrid_url);
    println!(
        "  TronGrid API Key: {}",
        if config.trongrid_api_key.is_some() { "set" } else { "not set" }
    );
    println!("  Master Wallet: {}", config.scanner.master_wallet);
    println!("  Token Contract: {}", config.scanner.token_contract);
    println!("  Token Decimals: {}", config.scanner.token_decimals);
    println!("  Confirmation Lag: {:?}", config.scanner.confirmation_lag);
    println!(
        "  Deposit Amount Range: {} .. {}",
        config.deposits.min_amount, config.deposits.max_amount
    );
    println!("  Deposit Expiry: {:?}", config.deposits.expiry);
    println!("  Create Retries: {}", config.deposits.create_retries);
    println!(
        "  Disambiguation: max {} attempts within {}",
        config.disambiguation.max_attempts, config.disambiguation.max_deviation
    );
    println!(
        "  Scanner: every {:?}, lookback {:?}, {} pages of {}",
        config.scanner.interval,
        config.scanner.lookback,
        config.scanner.max_pages,
        config.scanner.page_size
    );
    println!("  Sweeper: every {:?}", config.sweeper.interval);

    println!("Configuration is valid");
    Ok(())
}

pub async fn handle_scan_once(scanner: &TransferScanner) -> anyhow::Result<()> {
    match scanner.run_once().await? {
        CycleOutcome::Skipped => println!("Scan skipped: another cycle is running"),
        CycleOutcome::Completed(report) => {
            println!("Scan completed:");
            if let (Some(start), Some(end)) = (report.window_start, report.window_end) {
                println!("  Window: {} .. {}", start, end);
            }
            println!("  Pages: {}", report.pages);
            println!("  Events observed: {}", report.observed);
            println!("  To master wallet: {}", report.relevant);
            println!("  Credited: {}", report.credited);
            println!("  Already processed: {}", report.already_processed);
            println!("  Unmatched: {}", report.unmatched);
            println!("  Failed: {}", report.failed);
            match report.advanced_to {
                Some(ts) => println!("  Watermark advanced to {}", ts),
                None => println!("  Watermark unchanged"),
            }
        }
    }
    Ok(())
}

pub async fn handle_sweep_once(sweeper: &ExpirationSweeper) -> anyhow::Result<()> {
    match sweeper.run_once().await? {
        CycleOutcome::Skipped => println!("Sweep skipped: another cycle is running"),
        CycleOutcome::Completed(expired) => println!("Expired {} deposit(s)", expired),
    }
    Ok(())
}

pub async fn handle_manual_confirm(
    deposits: &DepositService,
    id: Uuid,
    amount: Amount,
    tx_hash: &str,
    operator: &str,
) -> anyhow::Result<()> {
    let deposit = deposits.manual_confirm(id, amount, tx_hash, operator).await?;
    println!(
        "Deposit {} confirmed: {} credited to user {}",
        deposit.id, amount, deposit.user_id
    );
    Ok(())
}

pub async fn handle_deposit_list(
    deposits: &DepositService,
    status: Option<DepositStatus>,
    limit: i64,
) -> anyhow::Result<()> {
    let rows = deposits.list_all(status, limit, 0).await?;
    if rows.is_empty() {
        println!("No deposits found");
        return Ok(());
    }

    println!(
        "{:<38} {:<18} {:<18} {:<17} {:<25}",
        "ID", "Payable", "Settled", "Status", "Expires"
    );
    println!("{}", "-".repeat(118));
    for deposit in rows {
        println!("{}", format_row(&deposit));
    }
    Ok(())
}

fn format_row(deposit: &Deposit) -> String {
    format!(
        "{:<38} {:<18} {:<18} {:<17} {:<25}",
        deposit.id.to_string(),
        deposit.payable_amount.to_string(),
        deposit.amount.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
        deposit.status.as_str(),
        deposit.expires_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://intake:s3cret@db:5432/deposits"),
            "postgres://intake:****@db:5432/deposits"
        );
        assert_eq!(mask_password("postgres://db/deposits"), "postgres://db/deposits");
    }

    #[test]
    fn test_parse_manual_confirm() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "deposit-intake",
            "deposit",
            "manual-confirm",
            id.to_string().as_str(),
            "--amount",
            "49.99",
            "--tx-hash",
            "abc123",
            "--operator",
            "ops-1",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Deposit(DepositCommands::ManualConfirm {
                id: parsed,
                amount,
                tx_hash,
                operator,
            })) => {
                assert_eq!(parsed, id);
                assert_eq!(amount, "49.99".parse::<Amount>().unwrap());
                assert_eq!(tx_hash, "abc123");
                assert_eq!(operator, "ops-1");
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_parse_deposit_list_status() {
        let cli = Cli::try_parse_from(["deposit-intake", "deposit", "list", "--status", "expired"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Deposit(DepositCommands::List {
                status: Some(DepositStatus::Expired),
                limit: 50
            }))
        ));

        assert!(Cli::try_parse_from(["deposit-intake", "deposit", "list", "--status", "paid"]).is_err());
    }

    #[test]
    fn test_no_subcommand_defaults_to_serve() {
        let cli = Cli::try_parse_from(["deposit-intake"]).unwrap();
        assert!(cli.command.is_none());
    }
}
