//! REST client for the marketplace indexer.
//!
//! The indexer exposes block-scoped, processed events and agreement
//! snapshots. Transport failures are a distinct error kind: the reconciler
//! holds its cursor on them and the supervisor drives the health-log
//! suppression from the `is_healthy` probe.

use std::time::Duration;

use alloy::primitives::U256;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use harbor_chain::{Agreement, AgreementStatus};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum IndexerError {
    /// The indexer could not be reached (connect, timeout, broken socket).
    #[error("indexer transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The indexer answered with a non-success status.
    #[error("indexer returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode indexer response: {0}")]
    Decode(String),
}

impl IndexerError {
    pub fn is_transport(&self) -> bool {
        matches!(self, IndexerError::Transport(_))
    }
}

/// One ordered, processed on-chain event as the indexer reports it.
///
/// Pages are deterministic but unordered; consumers sort ascending by
/// `(block_number, log_index)` before applying.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedEvent {
    pub block_number: u64,
    #[serde(default)]
    pub log_index: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl IndexedEvent {
    pub fn agreement_id(&self) -> Option<u64> {
        self.args.get("id").and_then(Value::as_u64)
    }

    pub fn provider_address(&self) -> Option<&str> {
        self.args.get("providerAddress").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetAgreementsQuery {
    pub protocol_address: String,
    pub provider_address: Option<String>,
    pub status: Option<AgreementStatus>,
    pub id: Option<u64>,
    pub auto_paginate: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GetEventsQuery {
    pub contract_address: Option<String>,
    pub event_name: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: Option<u32>,
    pub auto_paginate: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgreementDto {
    id: u64,
    user_address: String,
    provider_address: String,
    offer_id: u64,
    balance: String,
    status: String,
    started_at: u64,
    #[serde(default)]
    ended_at: Option<u64>,
}

impl AgreementDto {
    fn into_agreement(self) -> Result<Agreement, IndexerError> {
        let user = self
            .user_address
            .parse()
            .map_err(|e| IndexerError::Decode(format!("bad user address: {e}")))?;
        let provider = self
            .provider_address
            .parse()
            .map_err(|e| IndexerError::Decode(format!("bad provider address: {e}")))?;
        let balance = U256::from_str_radix(&self.balance, 10)
            .map_err(|e| IndexerError::Decode(format!("bad balance {}: {e}", self.balance)))?;
        let status = match self.status.as_str() {
            "Active" => AgreementStatus::Active,
            _ => AgreementStatus::NotActive,
        };
        Ok(Agreement {
            id: self.id,
            user,
            provider,
            offer_id: self.offer_id,
            balance,
            status,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

/// Typed queries against the indexer REST API.
#[derive(Clone)]
pub struct IndexerClient {
    http: reqwest::Client,
    base_url: Url,
}

impl IndexerClient {
    pub fn new(endpoint: &str) -> Result<Self, IndexerError> {
        let base_url = endpoint
            .parse::<Url>()
            .map_err(|e| IndexerError::Decode(format!("invalid indexer endpoint: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().expect("indexer url is a base");
            segments.pop_if_empty().push(path);
        }
        url
    }

    async fn fetch_page<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
        page: u32,
    ) -> Result<Page<T>, IndexerError> {
        let mut url = self.endpoint(path);
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("page", &page.to_string());
        }

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IndexerError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        serde_json::from_str(&body).map_err(|e| IndexerError::Decode(e.to_string()))
    }

    async fn fetch_all<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
        auto_paginate: bool,
    ) -> Result<Vec<T>, IndexerError> {
        let first: Page<T> = self.fetch_page(path, params, 1).await?;
        let total_pages = first.total_pages.unwrap_or(1);
        let mut items = first.data;
        if auto_paginate {
            for page in 2..=total_pages {
                let next: Page<T> = self.fetch_page(path, params, page).await?;
                items.extend(next.data);
            }
        }
        Ok(items)
    }

    /// Filtered listing of agreement snapshots.
    pub async fn get_agreements(
        &self,
        query: &GetAgreementsQuery,
    ) -> Result<Vec<Agreement>, IndexerError> {
        let mut params = vec![("protocolAddress".to_string(), query.protocol_address.clone())];
        if let Some(provider) = &query.provider_address {
            params.push(("providerAddress".to_string(), provider.clone()));
        }
        if let Some(status) = query.status {
            let value = match status {
                AgreementStatus::Active => "Active",
                AgreementStatus::NotActive => "NotActive",
            };
            params.push(("status".to_string(), value.to_string()));
        }
        if let Some(id) = query.id {
            params.push(("id".to_string(), id.to_string()));
        }

        let dtos: Vec<AgreementDto> = self
            .fetch_all("agreements", &params, query.auto_paginate)
            .await?;
        debug!("Indexer returned {} agreements", dtos.len());
        dtos.into_iter().map(AgreementDto::into_agreement).collect()
    }

    /// Processed events, optionally scoped to a contract, name, and block
    /// range. Per-page order is deterministic but unspecified.
    pub async fn get_events(
        &self,
        query: &GetEventsQuery,
    ) -> Result<Vec<IndexedEvent>, IndexerError> {
        let mut params = vec![("processed".to_string(), "true".to_string())];
        if let Some(contract) = &query.contract_address {
            params.push(("contractAddress".to_string(), contract.clone()));
        }
        if let Some(name) = &query.event_name {
            params.push(("eventName".to_string(), name.clone()));
        }
        if let Some(from) = query.from_block {
            params.push(("fromBlock".to_string(), from.to_string()));
        }
        if let Some(to) = query.to_block {
            params.push(("toBlock".to_string(), to.to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let events = self.fetch_all("events", &params, query.auto_paginate).await?;
        debug!("Indexer returned {} events", events.len());
        Ok(events)
    }

    /// Block number of the most recent processed event, if any.
    pub async fn latest_processed_block(&self) -> Result<Option<u64>, IndexerError> {
        let events = self
            .get_events(&GetEventsQuery {
                limit: Some(1),
                ..Default::default()
            })
            .await?;
        Ok(events.first().map(|e| e.block_number))
    }

    pub async fn is_healthy(&self) -> bool {
        match self.http.get(self.endpoint("health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_arg_accessors() {
        let event = IndexedEvent {
            block_number: 100,
            log_index: Some(2),
            name: "AgreementCreated".to_string(),
            args: json!({"id": 7, "providerAddress": "0x00000000000000000000000000000000000000aa"}),
        };
        assert_eq!(event.agreement_id(), Some(7));
        assert_eq!(
            event.provider_address(),
            Some("0x00000000000000000000000000000000000000aa")
        );
    }

    #[test]
    fn agreement_dto_decodes_balance_and_status() {
        let dto = AgreementDto {
            id: 1,
            user_address: "0x0000000000000000000000000000000000000001".to_string(),
            provider_address: "0x0000000000000000000000000000000000000002".to_string(),
            offer_id: 3,
            balance: "1000000000000000000".to_string(),
            status: "Active".to_string(),
            started_at: 5,
            ended_at: None,
        };
        let agreement = dto.into_agreement().unwrap();
        assert_eq!(agreement.balance, U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(agreement.status, AgreementStatus::Active);
    }

    #[test]
    fn bad_balance_is_a_decode_error() {
        let dto = AgreementDto {
            id: 1,
            user_address: "0x0000000000000000000000000000000000000001".to_string(),
            provider_address: "0x0000000000000000000000000000000000000002".to_string(),
            offer_id: 3,
            balance: "not-a-number".to_string(),
            status: "Active".to_string(),
            started_at: 5,
            ended_at: None,
        };
        let err = dto.into_agreement().unwrap_err();
        assert!(!err.is_transport());
    }
}
