//! Test doubles shared by the daemon scenario tests: an in-memory chain, a
//! stub indexer served over HTTP, a scriptable service backend, and a
//! SQLite-backed store.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use harbor_backend::{BackendError, Resource, ResourceDetails, ServiceBackend};
use harbor_chain::{
    Agreement, AgreementStatus, ChainClient, ChainError, DetailedOffer, Offer, ProviderRecord,
    RegisterOfferRequest,
};
use harbor_db::entity::{
    config, detail_files, offer_configurations, protocols, providers, resources,
};
use harbor_db::{DeploymentStatus, Store};
use harbor_indexer::IndexerClient;
use sea_orm::{ConnectionTrait, Database, DbBackend, Schema};

use harbor_daemon::config::ProviderTagConfig;
use harbor_daemon::details::DetailRegistry;
use harbor_daemon::runtime::ProviderRuntime;
use harbor_daemon::state::SharedState;

pub fn protocol() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn protocol_str() -> String {
    format!("{:#x}", protocol())
}

pub fn gateway_endpoint() -> &'static str {
    "https://gateway.example"
}

pub const PROVIDER_ID: u64 = 10;
pub const OFFER_ID: u64 = 3;

pub const PROVIDER_DETAILS: &str = r#"{"name":"Test Provider"}"#;
pub const OFFER_DETAILS: &str = r#"{"name":"Test Offer"}"#;

// --- chain double ---

#[derive(Default)]
pub struct MockChain {
    pub actors: Mutex<HashMap<Address, ProviderRecord>>,
    pub offers: Mutex<HashMap<u64, Offer>>,
    pub agreements: Mutex<HashMap<u64, Agreement>>,
    pub closed: Mutex<Vec<u64>>,
    pub next_offer_id: AtomicU64,
}

impl MockChain {
    pub fn add_actor(&self, record: ProviderRecord) {
        self.actors.lock().unwrap().insert(record.owner, record);
    }

    pub fn add_offer(&self, offer: Offer) {
        self.offers.lock().unwrap().insert(offer.id, offer);
    }

    pub fn add_agreement(&self, agreement: Agreement) {
        self.agreements.lock().unwrap().insert(agreement.id, agreement);
    }

    pub fn closed_agreements(&self) -> Vec<u64> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_actor(&self, address: Address) -> Result<Option<ProviderRecord>, ChainError> {
        Ok(self.actors.lock().unwrap().get(&address).cloned())
    }

    async fn get_registered_protocols(
        &self,
        _provider_id: u64,
    ) -> Result<Vec<Address>, ChainError> {
        Ok(vec![protocol()])
    }

    async fn get_offer(&self, _protocol: Address, id: u64) -> Result<Offer, ChainError> {
        self.offers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ChainError::Contract(format!("no offer {id}")))
    }

    async fn get_agreement(&self, _protocol: Address, id: u64) -> Result<Agreement, ChainError> {
        self.agreements
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ChainError::Contract(format!("no agreement {id}")))
    }

    async fn get_all_provider_offers(
        &self,
        _protocol: Address,
        _provider_id: u64,
    ) -> Result<Vec<Offer>, ChainError> {
        Ok(self.offers.lock().unwrap().values().cloned().collect())
    }

    async fn close_agreement(&self, _protocol: Address, id: u64) -> Result<(), ChainError> {
        self.closed.lock().unwrap().push(id);
        Ok(())
    }

    async fn register_offer(
        &self,
        _protocol: Address,
        request: RegisterOfferRequest,
    ) -> Result<u64, ChainError> {
        let id = 100 + self.next_offer_id.fetch_add(1, Ordering::SeqCst);
        self.offers.lock().unwrap().insert(
            id,
            Offer {
                id,
                owner: request.provider_owner,
                fee: request.fee,
                stock: request.stock,
                details_link: request.details_link,
            },
        );
        Ok(id)
    }
}

// --- indexer stub ---

#[derive(Clone, Default)]
pub struct StubIndexer {
    pub events: Arc<Mutex<Vec<Value>>>,
    pub agreements: Arc<Mutex<Vec<Value>>>,
    pub healthy: Arc<AtomicBool>,
}

impl StubIndexer {
    pub fn new() -> Self {
        let stub = Self::default();
        stub.healthy.store(true, Ordering::SeqCst);
        stub
    }

    pub fn push_event(&self, block: u64, log_index: u64, name: &str, id: u64, provider: Address) {
        self.events.lock().unwrap().push(json!({
            "blockNumber": block,
            "logIndex": log_index,
            "name": name,
            "args": { "id": id, "providerAddress": format!("{provider:#x}") },
        }));
    }

    pub fn push_agreement(&self, id: u64, provider: Address, user: Address, balance: &str) {
        self.agreements.lock().unwrap().push(json!({
            "id": id,
            "userAddress": format!("{user:#x}"),
            "providerAddress": format!("{provider:#x}"),
            "offerId": OFFER_ID,
            "balance": balance,
            "status": "Active",
            "startedAt": 0,
        }));
    }
}

async fn stub_events(
    State(stub): State<StubIndexer>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if !stub.healthy.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "down"})));
    }
    let mut events: Vec<Value> = stub.events.lock().unwrap().clone();
    if let Some(name) = params.get("eventName") {
        events.retain(|e| e["name"].as_str() == Some(name));
    }
    if let Some(from) = params.get("fromBlock").and_then(|v| v.parse::<u64>().ok()) {
        events.retain(|e| e["blockNumber"].as_u64().unwrap_or(0) >= from);
    }
    if let Some(to) = params.get("toBlock").and_then(|v| v.parse::<u64>().ok()) {
        events.retain(|e| e["blockNumber"].as_u64().unwrap_or(0) <= to);
    }
    // Newest first so a limit of one yields the head of processed history.
    events.sort_by_key(|e| std::cmp::Reverse(e["blockNumber"].as_u64().unwrap_or(0)));
    if let Some(limit) = params.get("limit").and_then(|v| v.parse::<usize>().ok()) {
        events.truncate(limit);
    }
    (
        StatusCode::OK,
        Json(json!({"data": events, "totalPages": 1})),
    )
}

async fn stub_agreements(
    State(stub): State<StubIndexer>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if !stub.healthy.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "down"})));
    }
    let mut agreements: Vec<Value> = stub.agreements.lock().unwrap().clone();
    if let Some(id) = params.get("id").and_then(|v| v.parse::<u64>().ok()) {
        agreements.retain(|a| a["id"].as_u64() == Some(id));
    }
    if let Some(provider) = params.get("providerAddress") {
        let wanted = provider.to_ascii_lowercase();
        agreements.retain(|a| {
            a["providerAddress"]
                .as_str()
                .map(|p| p.to_ascii_lowercase() == wanted)
                .unwrap_or(false)
        });
    }
    if let Some(status) = params.get("status") {
        agreements.retain(|a| a["status"].as_str() == Some(status));
    }
    (
        StatusCode::OK,
        Json(json!({"data": agreements, "totalPages": 1})),
    )
}

async fn stub_health(State(stub): State<StubIndexer>) -> StatusCode {
    if stub.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn spawn_indexer(stub: StubIndexer) -> String {
    let app = Router::new()
        .route("/events", get(stub_events))
        .route("/agreements", get(stub_agreements))
        .route("/health", get(stub_health))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// --- backend double ---

#[derive(Default)]
pub struct TestBackend {
    pub create_calls: AtomicU64,
    pub delete_calls: AtomicU64,
    pub poll_calls: AtomicU64,
    pub fail_create: AtomicBool,
    pub create_status: Mutex<Option<DeploymentStatus>>,
    pub details_status: Mutex<Option<DeploymentStatus>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_create_status(&self, status: DeploymentStatus) {
        *self.create_status.lock().unwrap() = Some(status);
    }

    pub fn set_details_status(&self, status: DeploymentStatus) {
        *self.details_status.lock().unwrap() = Some(status);
    }

    fn details_with(&self, status: DeploymentStatus) -> ResourceDetails {
        let mut details = ResourceDetails::running().with_detail("Example_Detail", json!(42));
        details.status = status;
        details
            .extra
            .insert("_Private_Token".to_string(), json!("secret"));
        details
    }
}

#[async_trait]
impl ServiceBackend for TestBackend {
    async fn create(
        &self,
        _agreement: &Agreement,
        _offer: &DetailedOffer,
    ) -> Result<ResourceDetails, BackendError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackendError::Failure("provisioning exploded".to_string()));
        }
        let status = self
            .create_status
            .lock()
            .unwrap()
            .unwrap_or(DeploymentStatus::Running);
        Ok(self.details_with(status))
    }

    async fn get_details(
        &self,
        _agreement: &Agreement,
        _offer: &DetailedOffer,
        _resource: &Resource,
    ) -> Result<ResourceDetails, BackendError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .details_status
            .lock()
            .unwrap()
            .unwrap_or(DeploymentStatus::Running);
        Ok(self.details_with(status))
    }

    async fn delete(
        &self,
        _agreement: &Agreement,
        _offer: &DetailedOffer,
        _resource: &Resource,
    ) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn configuration_schema(&self) -> Option<harbor_backend::ConfigSchema> {
        let mut schema = harbor_backend::ConfigSchema::new();
        schema.insert(
            "model".to_string(),
            harbor_backend::ConfigField {
                example: json!("small"),
                format: "string".to_string(),
                description: "Model served behind this offer".to_string(),
                required: true,
                default: None,
            },
        );
        Some(schema)
    }
}

// --- store and runtime wiring ---

pub async fn test_store() -> Store {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(DbBackend::Sqlite);
    let backend = db.get_database_backend();
    db.execute(backend.build(&schema.create_table_from_entity(protocols::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(providers::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(resources::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(detail_files::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(config::Entity)))
        .await
        .unwrap();
    db.execute(backend.build(&schema.create_table_from_entity(
        offer_configurations::Entity,
    )))
    .await
    .unwrap();
    Store::from_connection(db)
}

pub fn temp_details_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "harbor-test-{}-{}",
        std::process::id(),
        rand::random::<u64>()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("provider.json"), PROVIDER_DETAILS).unwrap();
    std::fs::write(dir.join("offer.json"), OFFER_DETAILS).unwrap();
    dir
}

pub struct Harness {
    pub runtime: Arc<ProviderRuntime>,
    pub store: Store,
    pub state: SharedState,
    pub chain: Arc<MockChain>,
    pub backend: Arc<TestBackend>,
    pub indexer: IndexerClient,
    pub stub: StubIndexer,
    pub owner: Address,
    pub operator: Address,
    pub details_dir: PathBuf,
}

/// Build a full runtime over the mock chain, stub indexer, SQLite store and
/// a temp detail directory. The provider actor and one offer are registered
/// on the mock chain up front.
pub async fn harness(is_gateway: bool) -> Harness {
    let owner_key = PrivateKeySigner::random();
    let operator_key = PrivateKeySigner::random();
    let owner = owner_key.address();
    let operator = operator_key.address();

    let chain = Arc::new(MockChain::default());
    chain.add_actor(ProviderRecord {
        id: PROVIDER_ID,
        owner,
        operator,
        endpoint: gateway_endpoint().to_string(),
        details_link: harbor_chain::generate_cid(PROVIDER_DETAILS.as_bytes()),
    });
    chain.add_offer(Offer {
        id: OFFER_ID,
        owner,
        fee: U256::from(1u64),
        stock: 1000,
        details_link: harbor_chain::generate_cid(OFFER_DETAILS.as_bytes()),
    });

    let stub = StubIndexer::new();
    let indexer_url = spawn_indexer(stub.clone()).await;
    let indexer = IndexerClient::new(&indexer_url).unwrap();

    let store = test_store().await;
    let details_dir = temp_details_dir();
    let registry = Arc::new(
        DetailRegistry::sync_from_disk(store.clone(), &details_dir)
            .await
            .unwrap(),
    );

    let backend = Arc::new(TestBackend::new());
    let pipe = Arc::new(harbor_pipe::Pipe::new(operator));

    let tag_config = ProviderTagConfig {
        tag: "TEST".to_string(),
        owner_key,
        billing_key: PrivateKeySigner::random(),
        operator_key,
        operator_pipe_port: 3001,
        protocol_address: Some(protocol()),
        is_gateway,
    };

    let chain_client: Arc<dyn ChainClient> = chain.clone();
    let service_backend: Arc<dyn ServiceBackend> = backend.clone();
    let runtime = ProviderRuntime::initialize(
        &tag_config,
        store.clone(),
        chain_client,
        indexer.clone(),
        registry,
        service_backend,
        pipe,
    )
    .await
    .unwrap();

    Harness {
        runtime,
        store,
        state: SharedState::new(),
        chain,
        backend,
        indexer,
        stub,
        owner,
        operator,
        details_dir,
    }
}

pub fn active_agreement(id: u64, provider: Address, user: Address, balance: u64) -> Agreement {
    Agreement {
        id,
        user,
        provider,
        offer_id: OFFER_ID,
        balance: U256::from(balance),
        status: AgreementStatus::Active,
        started_at: 0,
        ended_at: None,
    }
}
