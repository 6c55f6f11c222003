#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use deposit_intake::adapters::InMemoryStore;
use deposit_intake::config::{
    DepositSettings, DisambiguationSettings, ScannerSettings, SweeperSettings,
};
use deposit_intake::domain::{ChainHead, EventPage, TransferEvent};
use deposit_intake::ports::{ChainError, EventQuery, NotificationKind, Notifier, TransferEventSource};
use deposit_intake::services::{DepositService, ExpirationSweeper, Reconciler, TransferScanner};
use deposit_intake::tron::TronAddress;
use deposit_intake::AppState;

/// USDT-TRC20 contract; doubles as the master wallet in tests.
pub const MASTER_WALLET: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
/// The master wallet as TronGrid reports it in event results.
pub const MASTER_WALLET_HEX: &str = "0xa614f803b6fd780986a42c78ec9c7f77e6ded13c";
pub const SENDER_HEX: &str = "0x1111111111111111111111111111111111111111";
pub const OTHER_WALLET_HEX: &str = "0x2222222222222222222222222222222222222222";

/// Chain source returning scripted pages. The head advances by `step` on
/// every call so consecutive cycles scan consecutive windows.
pub struct ScriptedSource {
    head: Mutex<DateTime<Utc>>,
    step: Duration,
    pages: Mutex<VecDeque<Result<EventPage, ChainError>>>,
    pub queries: Mutex<Vec<EventQuery>>,
}

impl ScriptedSource {
    pub fn new(head: DateTime<Utc>) -> Self {
        Self {
            head: Mutex::new(head),
            step: Duration::seconds(15),
            pages: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub async fn push_page(&self, events: Vec<TransferEvent>) {
        self.pages.lock().await.push_back(Ok(EventPage {
            events,
            next_cursor: None,
        }));
    }

    pub async fn push_error(&self, message: &str) {
        self.pages
            .lock()
            .await
            .push_back(Err(ChainError::Unavailable(message.to_string())));
    }

    pub async fn current_head(&self) -> DateTime<Utc> {
        *self.head.lock().await
    }
}

#[async_trait]
impl TransferEventSource for ScriptedSource {
    async fn head(&self) -> Result<ChainHead, ChainError> {
        let mut head = self.head.lock().await;
        *head = *head + self.step;
        Ok(ChainHead {
            block_number: head.timestamp() as u64 / 3,
            timestamp: *head,
        })
    }

    async fn transfer_events(&self, query: &EventQuery) -> Result<EventPage, ChainError> {
        self.queries.lock().await.push(query.clone());
        self.pages
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(EventPage::default()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Uuid, String, NotificationKind)>>,
}

impl RecordingNotifier {
    /// Waits for detached notification tasks to land.
    pub async fn wait_for(&self, count: usize) -> Vec<(Uuid, String, NotificationKind)> {
        for _ in 0..100 {
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        message: &str,
        kind: NotificationKind,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .await
            .push((user_id, message.to_string(), kind));
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _: Uuid, _: &str, _: NotificationKind) -> anyhow::Result<()> {
        anyhow::bail!("notification gateway down")
    }
}

pub fn master_wallet() -> TronAddress {
    MASTER_WALLET.parse().unwrap()
}

pub fn deposit_settings() -> DepositSettings {
    DepositSettings {
        wallet_address: MASTER_WALLET.to_string(),
        expiry: std::time::Duration::from_secs(600),
        create_retries: 5,
        retry_backoff: std::time::Duration::from_millis(1),
        min_amount: "1".parse().unwrap(),
        max_amount: "1000000".parse().unwrap(),
        token_decimals: 6,
    }
}

pub fn scanner_settings() -> ScannerSettings {
    ScannerSettings {
        master_wallet: master_wallet(),
        token_contract: master_wallet(),
        token_decimals: 6,
        interval: std::time::Duration::from_secs(15),
        lookback: std::time::Duration::from_secs(120),
        confirmation_lag: std::time::Duration::ZERO,
        max_pages: 20,
        page_size: 200,
    }
}

/// A USDT transfer of `usdt` (decimal string) in base units.
pub fn transfer(tx_hash: &str, to: &str, usdt: &str, at: DateTime<Utc>) -> TransferEvent {
    let amount: deposit_intake::money::Amount = usdt.parse().unwrap();
    // 6 on-chain decimals: drop the two lowest of the eight scaled digits.
    let base_units = amount.scaled() / 100;
    TransferEvent {
        tx_hash: tx_hash.to_string(),
        block_number: 1,
        block_timestamp: at,
        from: SENDER_HEX.to_string(),
        to: to.to_string(),
        value: base_units.to_string(),
    }
}

/// The whole service wired against in-memory storage and a scripted chain.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub source: Arc<ScriptedSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub deposits: Arc<DepositService>,
    pub scanner: Arc<TransferScanner>,
    pub sweeper: Arc<ExpirationSweeper>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(RecordingNotifier::default()), None)
    }

    pub fn with_notifier(
        notifier: Arc<RecordingNotifier>,
        override_notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let source = Arc::new(ScriptedSource::new(Utc::now() - Duration::minutes(5)));
        let active_notifier: Arc<dyn Notifier> = match override_notifier {
            Some(other) => other,
            None => notifier.clone(),
        };

        let deposits = Arc::new(DepositService::new(
            store.clone(),
            active_notifier.clone(),
            deposit_settings(),
            DisambiguationSettings::default(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            store.clone(),
            active_notifier,
            master_wallet(),
        ));
        let scanner = Arc::new(TransferScanner::new(
            source.clone(),
            store.clone(),
            store.clone(),
            reconciler,
            scanner_settings(),
        ));
        let sweeper = Arc::new(ExpirationSweeper::new(
            store.clone(),
            SweeperSettings {
                interval: std::time::Duration::from_secs(30),
            },
        ));

        Self {
            store,
            source,
            notifier,
            deposits,
            scanner,
            sweeper,
        }
    }

    pub async fn user(&self) -> Uuid {
        let user = Uuid::new_v4();
        self.store.open_account(user).await;
        user
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            deposits: self.deposits.clone(),
            failures: self.store.clone(),
            scan_cursor: self.store.clone(),
            checkers: Vec::new(),
            started_at: Instant::now(),
        }
    }
}
