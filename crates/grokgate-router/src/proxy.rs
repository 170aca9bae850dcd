use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use grokgate_core::{ChatOutput, GatewayState};
use grokgate_protocol::openai::ChatCompletionRequest;
use grokgate_provider_core::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DownstreamKeySource {
    AuthorizationBearer,
    XApiKey,
    QueryKey,
}

#[derive(Clone)]
pub struct ProxyState {
    pub gateway: Arc<GatewayState>,
}

/// Key the caller authenticated with. In custom-SSO mode it is the caller's
/// own upstream session token.
#[derive(Clone)]
struct CallerKey(String);

pub fn proxy_router(gateway: Arc<GatewayState>) -> Router {
    let state = ProxyState { gateway };

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .layer(middleware::from_fn_with_state(state.clone(), proxy_auth))
        .route("/v1/models", get(models_list))
        .with_state(state)
}

async fn proxy_auth(
    State(state): State<ProxyState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let Some((key, source)) = extract_user_key(req.headers(), req.uri().query()) else {
        return unauthorized("missing api key");
    };
    strip_downstream_auth_headers(req.headers_mut());

    let config = &state.gateway.config;
    if !config.custom_sso && key != config.api_key {
        warn!(event = "downstream_auth_rejected", source = ?source);
        return unauthorized("invalid api key");
    }
    req.extensions_mut().insert(CallerKey(key));
    next.run(req).await
}

pub(crate) fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": { "message": message, "type": "authentication_error" }
        })),
    )
        .into_response()
}

fn strip_downstream_auth_headers(headers: &mut HeaderMap) {
    for name in [header::AUTHORIZATION.as_str(), "x-api-key"] {
        headers.remove(name);
    }
}

fn header_text<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = header_text(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Caller key lookup order: bearer token, `x-api-key` header, `?key=` query.
pub(crate) fn extract_user_key(
    headers: &HeaderMap,
    query: Option<&str>,
) -> Option<(String, DownstreamKeySource)> {
    if let Some(token) = bearer_token(headers) {
        return Some((token, DownstreamKeySource::AuthorizationBearer));
    }
    if let Some(key) = header_text(headers, "x-api-key") {
        return Some((key.to_string(), DownstreamKeySource::XApiKey));
    }
    serde_urlencoded::from_str::<Vec<(String, String)>>(query?)
        .ok()?
        .into_iter()
        .filter(|(name, _)| name == "key")
        .map(|(_, value)| value.trim().to_string())
        .find(|value| !value.is_empty())
        .map(|value| (value, DownstreamKeySource::QueryKey))
}

/// Parses a JSON request body, mapping failures to a validation error.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::Validation(format!("invalid request body: {err}")))
}

pub(crate) fn error_response(err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(err.to_payload())).into_response()
}

async fn chat_completions(
    State(state): State<ProxyState>,
    Extension(caller): Extension<CallerKey>,
    body: Bytes,
) -> Response {
    let request: ChatCompletionRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    let model = request.model.clone();
    match state.gateway.chat(request, Some(caller.0.as_str())).await {
        Ok(ChatOutput::Stream(frames)) => sse_response(Body::from_stream(frames)),
        Ok(ChatOutput::Complete(completion)) => Json(completion).into_response(),
        Err(err) => {
            warn!(
                event = "chat_failed",
                model = %model,
                status = err.status_code(),
                error = %err
            );
            error_response(&err)
        }
    }
}

fn sse_response(body: Body) -> Response {
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        ),
    ];
    (headers, body).into_response()
}

async fn models_list(State(state): State<ProxyState>) -> impl IntoResponse {
    let list = state.gateway.models();
    info!(event = "models_listed", count = list.data.len());
    Json(list)
}
