use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;

use grokgate_core::GatewayState;
use grokgate_provider_core::{Credential, GatewayError, Tier};

use crate::proxy::{bearer_token, error_response, parse_json, unauthorized};

#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<GatewayState>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    sso: String,
    #[serde(default)]
    tier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CfClearanceBody {
    #[serde(default)]
    cf_clearance: Option<String>,
}

/// Token management behind the caller API key and, when a manager password
/// is configured, the same operations under `/manager/api`.
pub fn admin_router(gateway: Arc<GatewayState>) -> Router {
    let state = AdminState { gateway };

    let keyed = Router::new()
        .route("/get/tokens", get(get_tokens))
        .route("/add/token", post(add_token))
        .route("/delete/token", post(delete_token))
        .route("/set/cf_clearance", post(set_cf_clearance))
        .layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    let manager = Router::new()
        .route("/manager/api/get", get(manager_get))
        .route("/manager/api/add", post(manager_add))
        .route("/manager/api/delete", post(manager_delete))
        .route("/manager/api/cf_clearance", post(manager_cf_clearance))
        .layer(middleware::from_fn_with_state(state.clone(), manager_auth));

    keyed.merge(manager).with_state(state)
}

async fn api_key_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = bearer_token(&headers) else {
        return unauthorized("missing api key");
    };
    if key != state.gateway.config.api_key {
        warn!(event = "admin_auth_rejected", path = %req.uri().path());
        return unauthorized("invalid api key");
    }
    next.run(req).await
}

async fn manager_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.gateway.config.manager_password.as_deref() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "manager_disabled" })),
        )
            .into_response();
    };
    let presented = extract_manager_password(&headers);
    if presented.as_deref() != Some(expected) {
        warn!(event = "manager_auth_rejected", path = %req.uri().path());
        return unauthorized("invalid manager password");
    }
    next.run(req).await
}

fn extract_manager_password(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-manager-password")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    bearer_token(headers)
}

fn custom_sso_forbidden(state: &AdminState) -> Option<Response> {
    if !state.gateway.config.custom_sso {
        return None;
    }
    Some(
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "token pool is disabled in custom sso mode"
            })),
        )
            .into_response(),
    )
}

fn parse_token_body(body: &Bytes) -> Result<(String, Tier), GatewayError> {
    let parsed: TokenBody = parse_json(body)?;
    let tier = match parsed.tier.as_deref() {
        Some(raw) => Tier::parse(raw)
            .ok_or_else(|| GatewayError::Validation(format!("unknown tier: {raw}")))?,
        None => Tier::Normal,
    };
    Ok((parsed.sso, tier))
}

fn parse_cf_clearance(body: &Bytes) -> Result<String, GatewayError> {
    let parsed: CfClearanceBody = parse_json(body)?;
    parsed
        .cf_clearance
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::Validation("cf_clearance is required".into()))
}

async fn get_tokens(State(state): State<AdminState>) -> Response {
    if let Some(resp) = custom_sso_forbidden(&state) {
        return resp;
    }
    Json(state.gateway.token_status().await).into_response()
}

async fn add_token(State(state): State<AdminState>, body: Bytes) -> Response {
    if let Some(resp) = custom_sso_forbidden(&state) {
        return resp;
    }
    let (sso, tier) = match parse_token_body(&body) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&err),
    };
    if let Err(err) = state.gateway.add_token(&sso, tier).await {
        return error_response(&err);
    }
    let key = Credential::parse(&sso)
        .map(|credential| credential.session_key().to_string())
        .unwrap_or_default();
    let status = state.gateway.token_status().await;
    Json(status.get(&key).cloned().unwrap_or_default()).into_response()
}

async fn delete_token(State(state): State<AdminState>, body: Bytes) -> Response {
    if let Some(resp) = custom_sso_forbidden(&state) {
        return resp;
    }
    let (sso, _) = match parse_token_body(&body) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&err),
    };
    match state.gateway.delete_token(&sso).await {
        Ok(removed) => Json(serde_json::json!({
            "message": "token deleted",
            "removed": removed,
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn set_cf_clearance(State(state): State<AdminState>, body: Bytes) -> Response {
    match parse_cf_clearance(&body) {
        Ok(value) => {
            state.gateway.set_cf_clearance(Some(value));
            Json(serde_json::json!({ "message": "cf_clearance updated" })).into_response()
        }
        Err(err) => error_response(&err),
    }
}

async fn manager_get(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.gateway.token_status().await)
}

async fn manager_add(State(state): State<AdminState>, body: Bytes) -> Response {
    let result = match parse_token_body(&body) {
        Ok((sso, tier)) => state.gateway.add_token(&sso, tier).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(_) => success(),
        Err(err) => error_response(&err),
    }
}

async fn manager_delete(State(state): State<AdminState>, body: Bytes) -> Response {
    let result = match parse_token_body(&body) {
        Ok((sso, _)) => state.gateway.delete_token(&sso).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(_) => success(),
        Err(err) => error_response(&err),
    }
}

async fn manager_cf_clearance(State(state): State<AdminState>, body: Bytes) -> Response {
    match parse_cf_clearance(&body) {
        Ok(value) => {
            state.gateway.set_cf_clearance(Some(value));
            success()
        }
        Err(err) => error_response(&err),
    }
}

fn success() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "success": true }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_body_defaults_to_normal_tier() {
        let (sso, tier) = parse_token_body(&Bytes::from_static(br#"{"sso":"abc"}"#)).unwrap();
        assert_eq!(sso, "abc");
        assert_eq!(tier, Tier::Normal);
        let (_, tier) =
            parse_token_body(&Bytes::from_static(br#"{"sso":"abc","tier":"heavy"}"#)).unwrap();
        assert_eq!(tier, Tier::Heavy);
        assert!(parse_token_body(&Bytes::from_static(br#"{"sso":"abc","tier":"gold"}"#)).is_err());
        assert!(parse_token_body(&Bytes::from_static(br#"{}"#)).is_err());
    }

    #[test]
    fn cf_clearance_must_be_present() {
        assert_eq!(
            parse_cf_clearance(&Bytes::from_static(br#"{"cf_clearance":" v "}"#)).unwrap(),
            "v"
        );
        assert!(parse_cf_clearance(&Bytes::from_static(br#"{"cf_clearance":""}"#)).is_err());
        assert!(parse_cf_clearance(&Bytes::from_static(b"not json")).is_err());
    }
}
