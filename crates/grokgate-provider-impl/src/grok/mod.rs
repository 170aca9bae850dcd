//! Upstream endpoints, request headers and the HTTP-backed collaborators.

mod fetcher;
mod uploader;

pub use fetcher::{HomepageFetcher, extract_site_verification};
pub use uploader::GrokUploader;

use bytes::Bytes;
use grokgate_protocol::grok::ConversationRequest;
use grokgate_provider_core::{
    Credential, GatewayError, Headers, UpstreamHttpRequest, cookie_append, header_set,
};

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";
const SENTRY_BAGGAGE: &str = "sentry-public_key=b311e0f2690c81f25e2c4cf6d4f7ce1c";

#[derive(Debug, Clone)]
pub struct GrokEndpoints {
    pub base_url: String,
    pub assets_url: String,
}

impl Default for GrokEndpoints {
    fn default() -> Self {
        Self {
            base_url: "https://grok.com".to_string(),
            assets_url: "https://assets.grok.com".to_string(),
        }
    }
}

impl GrokEndpoints {
    pub fn new(base_url: impl Into<String>, assets_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            assets_url: assets_url.into(),
        }
    }

    pub fn conversation_url(&self) -> String {
        format!("{}/rest/app-chat/conversations/new", self.base_url)
    }

    pub fn upload_url(&self) -> String {
        format!("{}/rest/app-chat/upload-file", self.base_url)
    }

    pub fn asset_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.assets_url, path.trim_start_matches('/'))
    }
}

/// Browser-shaped headers every upstream call carries.
pub fn default_headers(base_url: &str, identity_tag: &str) -> Headers {
    let mut headers: Headers = Vec::new();
    header_set(&mut headers, "accept", "*/*");
    header_set(&mut headers, "accept-language", "zh-CN,zh;q=0.9");
    header_set(&mut headers, "content-type", "text/plain;charset=UTF-8");
    header_set(&mut headers, "origin", base_url);
    header_set(&mut headers, "referer", format!("{base_url}/"));
    header_set(&mut headers, "priority", "u=1, i");
    header_set(&mut headers, "user-agent", USER_AGENT);
    header_set(
        &mut headers,
        "sec-ch-ua",
        "\"Not(A:Brand\";v=\"99\", \"Google Chrome\";v=\"133\", \"Chromium\";v=\"133\"",
    );
    header_set(&mut headers, "sec-ch-ua-mobile", "?0");
    header_set(&mut headers, "sec-ch-ua-platform", "\"macOS\"");
    header_set(&mut headers, "sec-fetch-dest", "empty");
    header_set(&mut headers, "sec-fetch-mode", "cors");
    header_set(&mut headers, "sec-fetch-site", "same-origin");
    header_set(&mut headers, "x-statsig-id", identity_tag);
    header_set(&mut headers, "x-xai-request-id", uuid::Uuid::new_v4().to_string());
    header_set(&mut headers, "baggage", SENTRY_BAGGAGE);
    headers
}

/// Headers for a call made on behalf of `credential`.
pub fn credential_headers(
    base_url: &str,
    identity_tag: &str,
    credential: &Credential,
    cf_clearance: Option<&str>,
) -> Headers {
    let mut headers = default_headers(base_url, identity_tag);
    header_set(&mut headers, "cookie", credential.cookie());
    if let Some(extra) = cf_clearance {
        cookie_append(&mut headers, extra);
    }
    headers
}

pub fn conversation_request(
    endpoints: &GrokEndpoints,
    payload: &ConversationRequest,
    credential: &Credential,
    identity_tag: &str,
    cf_clearance: Option<&str>,
) -> Result<UpstreamHttpRequest, GatewayError> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| GatewayError::Validation(format!("payload encoding failed: {err}")))?;
    let headers = credential_headers(&endpoints.base_url, identity_tag, credential, cf_clearance);
    Ok(UpstreamHttpRequest::post(
        endpoints.conversation_url(),
        headers,
        Bytes::from(body),
        true,
    ))
}
