use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use alloy::primitives::Address;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::verify_envelope;
use crate::error::PipeError;
use crate::request::{Method, PipeEnvelope, PipeRequest, PipeResponse};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, PipeError>> + Send>>;
pub type Handler = Arc<dyn Fn(PipeRequest) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure into a route [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(PipeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, PipeError>> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

struct Route {
    method: Method,
    pattern: String,
    handler: Handler,
}

struct ProviderRoute {
    method: Method,
    provider_id: i64,
    pattern: String,
    handler: Handler,
}

/// Route table for one operator identity, shared by both transports.
///
/// Operator routes are registered at startup. Provider-scoped routes are
/// keyed by `(method, providerId, path)`; a gateway aliases them for each
/// virtual provider it fronts, including ones registered at runtime.
pub struct Pipe {
    operator: Address,
    routes: RwLock<Vec<Route>>,
    provider_routes: RwLock<Vec<ProviderRoute>>,
}

impl Pipe {
    pub fn new(operator: Address) -> Self {
        Self {
            operator,
            routes: RwLock::new(Vec::new()),
            provider_routes: RwLock::new(Vec::new()),
        }
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    pub fn register_route(&self, method: Method, pattern: &str, handler: Handler) {
        debug!("Registered operator route {} {}", method, pattern);
        self.routes.write().unwrap().push(Route {
            method,
            pattern: pattern.to_string(),
            handler,
        });
    }

    /// Register a provider-scoped route under each of the given provider ids.
    pub fn register_provider_route(
        &self,
        method: Method,
        pattern: &str,
        provider_ids: &[i64],
        handler: Handler,
    ) {
        let mut table = self.provider_routes.write().unwrap();
        for provider_id in provider_ids {
            debug!(
                "Registered provider route {} {} for provider {}",
                method, pattern, provider_id
            );
            table.push(ProviderRoute {
                method,
                provider_id: *provider_id,
                pattern: pattern.to_string(),
                handler: handler.clone(),
            });
        }
    }

    /// Make every route of `source_id` addressable under `new_id` as well.
    /// Used when a virtual provider registers against a running gateway.
    pub fn alias_provider_routes(&self, source_id: i64, new_id: i64) {
        let mut table = self.provider_routes.write().unwrap();
        let aliases: Vec<ProviderRoute> = table
            .iter()
            .filter(|r| r.provider_id == source_id)
            .map(|r| ProviderRoute {
                method: r.method,
                provider_id: new_id,
                pattern: r.pattern.clone(),
                handler: r.handler.clone(),
            })
            .collect();
        info!(
            "Aliased {} provider routes from {} to {}",
            aliases.len(),
            source_id,
            new_id
        );
        table.extend(aliases);
    }

    /// Verify, dispatch, and convert any failure into a response.
    pub async fn dispatch_envelope(&self, envelope: PipeEnvelope) -> PipeResponse {
        let request = match verify_envelope(&envelope) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    "Request {} rejected at the transport: {}",
                    envelope.id, err
                );
                return err.into();
            }
        };
        self.dispatch_request(request).await
    }

    /// Dispatch an already-verified request.
    pub async fn dispatch_request(&self, request: PipeRequest) -> PipeResponse {
        let id = request.id.clone();
        let method = request.method;
        let path = request.path.clone();

        match self.route(request).await {
            Ok(body) => {
                info!("✅ Request {} completed: {} {}", id, method, path);
                PipeResponse::ok(body)
            }
            Err(err) => {
                warn!(
                    "Request {} failed with {}: {} {}",
                    id, err.code, method, path
                );
                err.into()
            }
        }
    }

    async fn route(&self, mut request: PipeRequest) -> Result<Value, PipeError> {
        // Operator-level routes first.
        let operator_match = {
            let routes = self.routes.read().unwrap();
            routes.iter().find_map(|route| {
                if route.method != request.method {
                    return None;
                }
                match_path(&route.pattern, &request.path)
                    .map(|params| (route.handler.clone(), params))
            })
        };
        if let Some((handler, params)) = operator_match {
            request.path_params.extend(params);
            return handler(request).await;
        }

        // Provider-scoped sub-dispatch.
        let candidates: Vec<(i64, Handler, HashMap<String, String>)> = {
            let table = self.provider_routes.read().unwrap();
            table
                .iter()
                .filter(|route| route.method == request.method)
                .filter_map(|route| {
                    match_path(&route.pattern, &request.path)
                        .map(|params| (route.provider_id, route.handler.clone(), params))
                })
                .collect()
        };
        if !candidates.is_empty() {
            let provider_id = request
                .provider_id()
                .ok_or_else(|| PipeError::bad_request("providerId is required"))?;
            let Some((_, handler, params)) = candidates
                .into_iter()
                .find(|(id, _, _)| *id == provider_id)
            else {
                return Err(PipeError::not_found(format!(
                    "no handler for provider {provider_id}"
                )));
            };
            request.path_params.extend(params);
            return handler(request).await;
        }

        Err(PipeError::not_found(format!(
            "no route for {} {}",
            request.method, request.path
        )))
    }
}

/// Match a `/segment/:param` pattern against a concrete path.
fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (pattern_segment, path_segment) in pattern_segments.iter().zip(&path_segments) {
        if let Some(name) = pattern_segment.strip_prefix(':') {
            params.insert(name.to_string(), (*path_segment).to_string());
        } else if pattern_segment != path_segment {
            return None;
        }
    }
    Some(params)
}
