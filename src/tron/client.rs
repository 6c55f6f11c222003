use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::{ChainHead, EventPage, TransferEvent};
use crate::ports::{ChainError, EventQuery, TransferEventSource};

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

#[derive(Error, Debug)]
pub enum TronError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("TronGrid returned status {0}")]
    Status(u16),
    #[error("Invalid response from TronGrid: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

impl From<TronError> for ChainError {
    fn from(err: TronError) -> Self {
        match err {
            TronError::InvalidResponse(msg) => ChainError::InvalidResponse(msg),
            TronError::CircuitBreakerOpen(msg) => ChainError::Unavailable(msg),
            other => ChainError::Request(other.to_string()),
        }
    }
}

/// Response from `/wallet/getnowblock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NowBlockResponse {
    pub block_header: BlockHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub raw_data: BlockRawData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRawData {
    #[serde(default)]
    pub number: u64,
    pub timestamp: i64,
}

/// Response from `/v1/contracts/{address}/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEventsResponse {
    #[serde(default)]
    pub data: Vec<ContractEvent>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub meta: EventsMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsMeta {
    pub fingerprint: Option<String>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEvent {
    pub transaction_id: String,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub event_name: String,
    #[serde(default)]
    pub result: TransferResult,
}

/// Decoded `Transfer(from, to, value)` arguments. TronGrid reports addresses
/// as 20-byte `0x` hex and the value as a decimal string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferResult {
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, TronError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TronError::InvalidResponse(format!("bad timestamp {}", ms)))
}

impl ContractEventsResponse {
    fn into_page(self) -> Result<EventPage, TronError> {
        if !self.success {
            return Err(TronError::InvalidResponse(
                "events query reported success=false".to_string(),
            ));
        }

        let mut events = Vec::with_capacity(self.data.len());
        for event in self.data {
            if event.event_name != "Transfer" {
                continue;
            }
            let (from, to, value) = match (event.result.from, event.result.to, event.result.value) {
                (Some(from), Some(to), Some(value)) => (from, to, value),
                _ => {
                    return Err(TronError::InvalidResponse(format!(
                        "Transfer event {} is missing arguments",
                        event.transaction_id
                    )))
                }
            };
            events.push(TransferEvent {
                tx_hash: event.transaction_id,
                block_number: event.block_number,
                block_timestamp: millis_to_utc(event.block_timestamp)?,
                from,
                to,
                value,
            });
        }

        Ok(EventPage {
            events,
            next_cursor: self.meta.fingerprint.filter(|f| !f.is_empty()),
        })
    }
}

/// HTTP client for the TronGrid full-node and event APIs
#[derive(Clone)]
pub struct TronGridClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl TronGridClient {
    /// Creates a client with the default breaker (3 failures, 60s reset)
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self::with_circuit_breaker(base_url, api_key, 3, 60)
    }

    /// Creates a client with custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        api_key: Option<String>,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        TronGridClient {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, TronError>
    where
        F: std::future::Future<Output = Result<T, TronError>>,
    {
        match self.circuit_breaker.call(call).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(TronError::CircuitBreakerOpen(
                "TronGrid circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Fetches the latest block header
    pub async fn get_now_block(&self) -> Result<ChainHead, TronError> {
        let request = self.authorize(self.client.post(self.url("/wallet/getnowblock")));

        let block = self
            .guarded(async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(TronError::Status(response.status().as_u16()));
                }
                Ok(response.json::<NowBlockResponse>().await?)
            })
            .await?;

        Ok(ChainHead {
            block_number: block.block_header.raw_data.number,
            timestamp: millis_to_utc(block.block_header.raw_data.timestamp)?,
        })
    }

    /// Fetches one page of confirmed `Transfer` events emitted by a contract
    pub async fn get_transfer_events(&self, query: &EventQuery) -> Result<EventPage, TronError> {
        let mut params: Vec<(&str, String)> = vec![
            ("event_name", "Transfer".to_string()),
            ("only_confirmed", "true".to_string()),
            ("order_by", "block_timestamp,asc".to_string()),
            (
                "min_block_timestamp",
                query.min_timestamp.timestamp_millis().to_string(),
            ),
            (
                "max_block_timestamp",
                query.max_timestamp.timestamp_millis().to_string(),
            ),
            ("limit", query.limit.to_string()),
        ];
        if let Some(cursor) = &query.cursor {
            params.push(("fingerprint", cursor.clone()));
        }

        let url = self.url(&format!("/v1/contracts/{}/events", query.contract));
        let request = self.authorize(self.client.get(url).query(&params));

        let response = self
            .guarded(async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(TronError::Status(response.status().as_u16()));
                }
                Ok(response.json::<ContractEventsResponse>().await?)
            })
            .await?;

        response.into_page()
    }
}

#[async_trait]
impl TransferEventSource for TronGridClient {
    async fn head(&self) -> Result<ChainHead, ChainError> {
        Ok(self.get_now_block().await?)
    }

    async fn transfer_events(&self, query: &EventQuery) -> Result<EventPage, ChainError> {
        Ok(self.get_transfer_events(query).await?)
    }
}
