//! The pluggable service-backend seam.
//!
//! A backend provisions the actual user-visible resource behind an
//! agreement: `create` on `AgreementCreated`, `get_details` while a resource
//! is still coming up, `delete` on closure. Backends may also contribute
//! provider-scoped service routes and a gateway configuration schema.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use harbor_chain::{Agreement, DetailedOffer};
use harbor_db::DeploymentStatus;
use harbor_pipe::{Handler, Method, handler};

/// The stored resource row a backend operates on.
pub type Resource = harbor_db::entity::resources::Model;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend failure: {0}")]
    Failure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What a backend reports about a resource: an optional human name, the
/// deployment status, and free-form details persisted alongside the row.
#[derive(Debug, Clone)]
pub struct ResourceDetails {
    pub name: Option<String>,
    pub status: DeploymentStatus,
    pub extra: Map<String, Value>,
}

impl ResourceDetails {
    pub fn running() -> Self {
        Self {
            name: None,
            status: DeploymentStatus::Running,
            extra: Map::new(),
        }
    }

    pub fn deploying() -> Self {
        Self {
            name: None,
            status: DeploymentStatus::Deploying,
            extra: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// The details object persisted on the resource row (name and status are
    /// stored in their own columns).
    pub fn details_json(&self) -> Value {
        Value::Object(self.extra.clone())
    }
}

/// One field of the gateway configuration schema a backend declares for its
/// per-offer configuration blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub example: Value,
    pub format: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

pub type ConfigSchema = BTreeMap<String, ConfigField>;

/// A provider-scoped route contributed by a backend; the runtime registers
/// it under the provider's id and each virtual child's id.
pub struct ServiceRoute {
    pub method: Method,
    pub path: String,
    pub handler: Handler,
}

#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Provision the resource for a fresh agreement. Called exactly once per
    /// agreement: the reconciler only dispatches here when no local row
    /// exists yet.
    async fn create(
        &self,
        agreement: &Agreement,
        offer: &DetailedOffer,
    ) -> Result<ResourceDetails, BackendError>;

    /// Poll the current state of a not-yet-running resource.
    async fn get_details(
        &self,
        agreement: &Agreement,
        offer: &DetailedOffer,
        resource: &Resource,
    ) -> Result<ResourceDetails, BackendError>;

    /// Tear the resource down after the agreement closed.
    async fn delete(
        &self,
        agreement: &Agreement,
        offer: &DetailedOffer,
        resource: &Resource,
    ) -> Result<(), BackendError>;

    /// Provider-scoped service routes; none by default.
    fn service_routes(&self) -> Vec<ServiceRoute> {
        Vec::new()
    }

    /// Schema of the per-offer gateway configuration; `None` when the
    /// backend has no gateway capability.
    fn configuration_schema(&self) -> Option<ConfigSchema> {
        None
    }
}

/// A backend that provisions nothing and reports `Running` immediately.
/// Useful for wiring checks and as the scenario-test double's baseline.
pub struct EchoBackend;

#[async_trait]
impl ServiceBackend for EchoBackend {
    async fn create(
        &self,
        agreement: &Agreement,
        _offer: &DetailedOffer,
    ) -> Result<ResourceDetails, BackendError> {
        Ok(ResourceDetails::running().with_detail("Agreement_Id", json!(agreement.id)))
    }

    async fn get_details(
        &self,
        _agreement: &Agreement,
        _offer: &DetailedOffer,
        _resource: &Resource,
    ) -> Result<ResourceDetails, BackendError> {
        Ok(ResourceDetails::running())
    }

    async fn delete(
        &self,
        _agreement: &Agreement,
        _offer: &DetailedOffer,
        _resource: &Resource,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    fn service_routes(&self) -> Vec<ServiceRoute> {
        vec![ServiceRoute {
            method: Method::POST,
            path: "/echo".to_string(),
            handler: handler(|req| async move { Ok(req.body.unwrap_or(Value::Null)) }),
        }]
    }

    fn configuration_schema(&self) -> Option<ConfigSchema> {
        let mut schema = ConfigSchema::new();
        schema.insert(
            "greeting".to_string(),
            ConfigField {
                example: json!("hello"),
                format: "string".to_string(),
                description: "Text echoed back to callers".to_string(),
                required: false,
                default: Some(json!("hello")),
            },
        );
        Some(schema)
    }
}
