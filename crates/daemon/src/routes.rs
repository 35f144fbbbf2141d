use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};

use harbor_db::Store;
use harbor_pipe::{Method, Pipe, PipeError, PipeRequest, handler};

use crate::constants::SPEC_FILES;
use crate::details::DetailRegistry;

/// Context shared by the operator-level routes of one pipe.
pub struct OperatorContext {
    pub store: Store,
    pub registry: Arc<DetailRegistry>,
    pub data_dir: PathBuf,
}

/// Strip private (`_`-prefixed) keys from a details object.
pub fn filter_private_details(details: &Value) -> Value {
    match details.as_object() {
        Some(object) => Value::Object(
            object
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        None => details.clone(),
    }
}

pub fn resource_to_json(
    resource: &harbor_db::entity::resources::Model,
    protocol_address: &str,
) -> Value {
    json!({
        "id": resource.id,
        "name": resource.name,
        "ownerAddress": resource.owner_address,
        "details": filter_private_details(&resource.details),
        "deploymentStatus": resource.deployment_status,
        "groupName": resource.group_name,
        "offerId": resource.offer_id,
        "isActive": resource.is_active,
        "providerId": resource.provider_id,
        "ptAddress": protocol_address,
        "createdAt": resource.created_at.to_rfc3339(),
    })
}

fn cids_from_request(request: &PipeRequest) -> Result<Vec<String>, PipeError> {
    let extract = |value: &Value| {
        value.get("cids").and_then(Value::as_array).map(|cids| {
            cids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
    };
    extract(&request.params)
        .or_else(|| request.body.as_ref().and_then(extract))
        .ok_or_else(|| PipeError::validation("cids", "missing required field"))
}

async fn handle_spec(ctx: Arc<OperatorContext>) -> Result<Value, PipeError> {
    for candidate in SPEC_FILES {
        let path = ctx.data_dir.join(candidate);
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Ok(json!(content));
        }
    }
    Err(PipeError::not_found("no spec document available"))
}

async fn handle_details(
    ctx: Arc<OperatorContext>,
    request: PipeRequest,
) -> Result<Value, PipeError> {
    let cids = cids_from_request(&request)?;
    let files = ctx.registry.resolve_many(&cids);
    if files.is_empty() {
        return Err(PipeError::not_found("no matching detail files"));
    }
    Ok(Value::Array(
        files.into_iter().map(|f| json!(f.content)).collect(),
    ))
}

async fn handle_resources(
    ctx: Arc<OperatorContext>,
    request: PipeRequest,
) -> Result<Value, PipeError> {
    let requester = format!("{:#x}", request.requester);

    let id = request.params.get("id").and_then(Value::as_i64);
    let protocol = request.params.get("pt").and_then(Value::as_str);

    if let (Some(id), Some(protocol)) = (id, protocol) {
        let resource = ctx
            .store
            .get_resource(id, protocol, Some(&requester))
            .await
            .map_err(|e| PipeError::internal(e.to_string()))?
            .ok_or_else(|| PipeError::not_found("no such resource"))?;
        return Ok(resource_to_json(&resource, protocol));
    }

    let resources = ctx
        .store
        .get_resources_by_owner(&requester)
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;
    let mut out = Vec::with_capacity(resources.len());
    for resource in resources {
        let protocol = ctx
            .store
            .find_protocol_by_id(resource.protocol_id)
            .await
            .map_err(|e| PipeError::internal(e.to_string()))?
            .map(|p| p.address)
            .unwrap_or_default();
        out.push(resource_to_json(&resource, &protocol));
    }
    Ok(Value::Array(out))
}

/// Register `GET /spec`, `GET /details`, and `GET /resources` on an
/// operator pipe.
pub fn register_operator_routes(pipe: &Pipe, ctx: Arc<OperatorContext>) {
    let spec_ctx = ctx.clone();
    pipe.register_route(
        Method::GET,
        "/spec",
        handler(move |_| handle_spec(spec_ctx.clone())),
    );

    let details_ctx = ctx.clone();
    pipe.register_route(
        Method::GET,
        "/details",
        handler(move |request| handle_details(details_ctx.clone(), request)),
    );

    let resources_ctx = ctx;
    pipe.register_route(
        Method::GET,
        "/resources",
        handler(move |request| handle_resources(resources_ctx.clone(), request)),
    );
}
