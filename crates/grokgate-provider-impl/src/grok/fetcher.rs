use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use grokgate_provider_core::{
    GatewayError, Headers, UpstreamClient, UpstreamHttpRequest, collect_body, header_set,
};
use regex::Regex;
use tracing::{debug, warn};

use crate::identity::DocumentFetcher;

use super::USER_AGENT;

const DEFAULT_META: &str = "default-grok-verification-content-for-fallback-use";

fn meta_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"(?i)<meta\s+name=["']grok-site-verification["']\s+content=["']([^"']+)["']"#,
            r#"(?i)<meta\s+content=["']([^"']+)["']\s+name=["']grok-site-verification["']"#,
            r#"(?i)grok-site-verification["']?\s*(?:content|value)\s*=\s*["']([^"']+)["']"#,
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Pulls the `grok-site-verification` token out of the homepage markup.
pub fn extract_site_verification(html: &str) -> Option<String> {
    meta_patterns()
        .iter()
        .find_map(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Fetches the upstream homepage over the shared upstream client.
pub struct HomepageFetcher {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
}

impl HomepageFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DocumentFetcher for HomepageFetcher {
    async fn fetch_homepage_meta(&self) -> Result<Vec<u8>, GatewayError> {
        let mut headers: Headers = Vec::new();
        header_set(&mut headers, "user-agent", USER_AGENT);
        header_set(&mut headers, "accept", "text/html");
        let resp = self
            .client
            .send(UpstreamHttpRequest::get(self.base_url.clone(), headers))
            .await?;
        let status = resp.status;
        let body = collect_body(resp.body).await?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::UpstreamRejected {
                status,
                body: String::from_utf8_lossy(&body).chars().take(256).collect(),
            });
        }
        let html = String::from_utf8_lossy(&body);
        match extract_site_verification(&html) {
            Some(token) => {
                debug!(event = "site_verification_found", len = token.len());
                Ok(token.into_bytes())
            }
            None => {
                warn!(event = "site_verification_missing");
                Ok(DEFAULT_META.as_bytes().to_vec())
            }
        }
    }
}
