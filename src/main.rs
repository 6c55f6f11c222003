use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deposit_intake::cli::{self, Cli, Commands, DbCommands, DepositCommands, ScanCommands, SweepCommands};
use deposit_intake::config::Config;
use deposit_intake::{create_app, db, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_json);

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Scan(ScanCommands::Once) => {
            let components = connect(&config).await?;
            cli::handle_scan_once(&components.scanner).await
        }
        Commands::Sweep(SweepCommands::Once) => {
            let components = connect(&config).await?;
            cli::handle_sweep_once(&components.sweeper).await
        }
        Commands::Deposit(DepositCommands::ManualConfirm {
            id,
            amount,
            tx_hash,
            operator,
        }) => {
            let components = connect(&config).await?;
            cli::handle_manual_confirm(&components.deposits, id, amount, &tx_hash, &operator).await
        }
        Commands::Deposit(DepositCommands::List { status, limit }) => {
            let components = connect(&config).await?;
            cli::handle_deposit_list(&components.deposits, status, limit).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect(config: &Config) -> anyhow::Result<startup::Components> {
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(startup::build(config, pool))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&pool).await?;

    let report = startup::validate_environment(&config, &pool).await?;
    if !report.is_valid() {
        report.print();
        // A TronGrid outage is tolerated at startup.
        if !report.database || !report.environment {
            anyhow::bail!("Startup validation failed");
        }
    }

    let components = startup::build(&config, pool);
    tracing::info!(
        master_wallet = %config.scanner.master_wallet,
        trongrid = %config.trongrid_url,
        "Deposit intake initialized"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner = components.scanner.clone().start(shutdown_rx.clone());
    let sweeper = components.sweeper.clone().start(shutdown_rx.clone());

    let app = create_app(components.app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    let _ = tokio::join!(scanner, sweeper);
    Ok(())
}
