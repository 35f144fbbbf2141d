use std::sync::Arc;

use alloy::primitives::U256;
use serde_json::{Value, json};
use tracing::info;

use harbor_chain::RegisterOfferRequest;
use harbor_pipe::{Method, PipeError, PipeRequest, handler};

use crate::runtime::{ProviderRuntime, parse_provider_details};

const DEFAULT_STOCK: u32 = 1000;

fn body_field<'a>(request: &'a PipeRequest, name: &str) -> Option<&'a Value> {
    request.body.as_ref().and_then(|body| body.get(name))
}

fn required_body_str(request: &PipeRequest, name: &str) -> Result<String, PipeError> {
    body_field(request, name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PipeError::validation(name, "missing required field"))
}

fn offer_id_from_path(request: &PipeRequest) -> Result<u64, PipeError> {
    request
        .path_params
        .get("offerId")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| PipeError::validation("offerId", "must be a numeric offer id"))
}

/// `POST /virtual-providers` — register a new virtual provider behind this
/// gateway. The requester's on-chain record must share the gateway's
/// operator and endpoint, and its `detailsLink` must equal the CID of the
/// submitted content.
async fn handle_register_virtual_provider(
    runtime: Arc<ProviderRuntime>,
    request: PipeRequest,
) -> Result<Value, PipeError> {
    let details_file = required_body_str(&request, "detailsFile")?;
    let owner_lower = format!("{:#x}", request.requester);

    let existing = runtime
        .store
        .get_provider_by_owner(&owner_lower)
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;
    if existing.is_some() {
        return Err(PipeError::bad_request(
            "a provider is already registered for this address",
        ));
    }

    parse_provider_details(&details_file)
        .map_err(|e| PipeError::validation("detailsFile", e.to_string()))?;

    let actor = runtime
        .chain
        .get_actor(request.requester)
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?
        .ok_or_else(|| PipeError::not_found("requester is not a registered provider on-chain"))?;

    if actor.operator != runtime.provider.operator || actor.endpoint != runtime.provider.endpoint {
        return Err(PipeError::bad_request(
            "virtual provider must share the gateway's operator and endpoint",
        ));
    }

    let cid = harbor_chain::generate_cid(details_file.as_bytes());
    if actor.details_link != cid {
        return Err(PipeError::not_found(
            "on-chain details link does not match the submitted content",
        ));
    }

    runtime
        .registry
        .register(&format!("vprov.{owner_lower}.details.{cid}.json"), &details_file)
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;
    runtime
        .store
        .save_provider(actor.id as i64, &owner_lower, true, Some(runtime.db_id()))
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;

    // Make existing provider-scoped routes addressable under the new id.
    runtime
        .pipe
        .alias_provider_routes(runtime.db_id(), actor.id as i64);
    let provider_id = actor.id;
    runtime.add_virtual_child(actor);

    info!(
        "🆕 Registered virtual provider {} ({}) behind gateway {}",
        provider_id, owner_lower, runtime.provider.id
    );
    Ok(json!({ "providerId": provider_id, "cid": cid }))
}

/// `POST /virtual-providers/offers` — register (or adopt) an offer for an
/// existing virtual provider and persist its configuration.
async fn handle_register_offer(
    runtime: Arc<ProviderRuntime>,
    request: PipeRequest,
) -> Result<Value, PipeError> {
    let child = runtime
        .virtual_child_by_owner(request.requester)
        .ok_or_else(|| {
            PipeError::not_authorized("requester is not a virtual provider of this gateway")
        })?;

    let details_file = required_body_str(&request, "detailsFile")?;
    let fee_raw = required_body_str(&request, "fee")?;
    let fee = U256::from_str_radix(&fee_raw, 10)
        .map_err(|_| PipeError::validation("fee", "must be a decimal integer"))?;
    let configuration = body_field(&request, "configuration")
        .cloned()
        .ok_or_else(|| PipeError::validation("configuration", "missing required field"))?;
    let stock = body_field(&request, "stockAmount")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_STOCK);
    let existing_offer_id = body_field(&request, "existingOfferId").and_then(Value::as_u64);

    let cid = harbor_chain::generate_cid(details_file.as_bytes());
    runtime
        .store
        .insert_detail_file(&cid, &details_file)
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;

    let offer_id = match existing_offer_id {
        Some(id) => {
            runtime
                .chain
                .get_offer(runtime.protocol, id)
                .await
                .map_err(|_| PipeError::not_found("existingOfferId not found on-chain"))?
                .id
        }
        None => runtime
            .chain
            .register_offer(
                runtime.protocol,
                RegisterOfferRequest {
                    provider_owner: child.owner,
                    details_link: cid.clone(),
                    fee,
                    stock,
                },
            )
            .await
            .map_err(|e| PipeError::internal(e.to_string()))?,
    };

    let owner_lower = format!("{:#x}", request.requester);
    let protocol_lower = runtime.protocol_str();
    runtime
        .registry
        .register(
            &format!("vprov.{owner_lower}.offer.{offer_id}.{protocol_lower}.details.{cid}.json"),
            &details_file,
        )
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;
    runtime
        .store
        .upsert_offer_configuration(offer_id as i64, &protocol_lower, configuration)
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;

    info!(
        "🆕 Registered offer {} for virtual provider {:#x}",
        offer_id, child.owner
    );
    Ok(json!({ "offerId": offer_id, "cid": cid }))
}

/// `GET /virtual-provider-configurations` — the backend-declared schema.
async fn handle_configuration_schema(
    runtime: Arc<ProviderRuntime>,
    request: PipeRequest,
) -> Result<Value, PipeError> {
    if runtime.virtual_child_by_owner(request.requester).is_none() {
        return Err(PipeError::not_authorized(
            "requester is not a virtual provider of this gateway",
        ));
    }
    let schema = runtime.backend.configuration_schema().ok_or_else(|| {
        PipeError::internal("backend does not declare a configuration schema")
    })?;
    serde_json::to_value(schema).map_err(|e| PipeError::internal(e.to_string()))
}

/// The offer behind `:offerId` must be owned by the requester on-chain.
async fn authorize_offer(
    runtime: &ProviderRuntime,
    request: &PipeRequest,
) -> Result<u64, PipeError> {
    let offer_id = offer_id_from_path(request)?;
    let offer = runtime
        .chain
        .get_offer(runtime.protocol, offer_id)
        .await
        .map_err(|_| PipeError::not_found("no such offer on-chain"))?;
    if offer.owner != request.requester {
        return Err(PipeError::not_authorized("offer is not owned by the requester"));
    }
    Ok(offer_id)
}

async fn handle_get_offer_configuration(
    runtime: Arc<ProviderRuntime>,
    request: PipeRequest,
) -> Result<Value, PipeError> {
    let offer_id = authorize_offer(&runtime, &request).await?;
    runtime
        .store
        .get_offer_configuration(offer_id as i64, &runtime.protocol_str())
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?
        .ok_or_else(|| PipeError::not_found("no configuration for this offer"))
}

async fn handle_patch_offer_configuration(
    runtime: Arc<ProviderRuntime>,
    request: PipeRequest,
) -> Result<Value, PipeError> {
    let offer_id = authorize_offer(&runtime, &request).await?;
    let configuration = body_field(&request, "configuration")
        .cloned()
        .ok_or_else(|| PipeError::validation("configuration", "missing required field"))?;
    runtime
        .store
        .upsert_offer_configuration(offer_id as i64, &runtime.protocol_str(), configuration.clone())
        .await
        .map_err(|e| PipeError::internal(e.to_string()))?;
    Ok(configuration)
}

/// Register the gateway-management routes for a gateway runtime.
pub fn register_gateway_routes(runtime: Arc<ProviderRuntime>) {
    let pipe = runtime.pipe.clone();

    let rt = runtime.clone();
    pipe.register_route(
        Method::POST,
        "/virtual-providers",
        handler(move |request| handle_register_virtual_provider(rt.clone(), request)),
    );

    let rt = runtime.clone();
    pipe.register_route(
        Method::POST,
        "/virtual-providers/offers",
        handler(move |request| handle_register_offer(rt.clone(), request)),
    );

    let rt = runtime.clone();
    pipe.register_route(
        Method::GET,
        "/virtual-provider-configurations",
        handler(move |request| handle_configuration_schema(rt.clone(), request)),
    );

    let rt = runtime.clone();
    pipe.register_route(
        Method::GET,
        "/virtual-provider-configurations/:offerId",
        handler(move |request| handle_get_offer_configuration(rt.clone(), request)),
    );

    let rt = runtime;
    pipe.register_route(
        Method::PATCH,
        "/virtual-provider-configurations/:offerId",
        handler(move |request| handle_patch_offer_configuration(rt.clone(), request)),
    );
}
