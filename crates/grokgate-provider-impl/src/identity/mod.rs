//! Anti-automation identity tag sent as `x-statsig-id`.

pub mod codec;
pub mod fallback;

use std::sync::Arc;

use async_trait::async_trait;
use grokgate_provider_core::{Clock, GatewayError};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use codec::{TagRecord, decode, encode};

/// Source of the site-verification token embedded in primary tags.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch_homepage_meta(&self) -> Result<Vec<u8>, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSource {
    Primary,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct IdentityTag {
    pub value: Arc<str>,
    pub source: TagSource,
}

/// Lazily generated, process-wide identity tag.
///
/// The first caller generates the primary tag; later callers reuse it until
/// [`IdentityTagProvider::refresh_fallback`] swaps in a fallback tag.
pub struct IdentityTagProvider {
    fetcher: Arc<dyn DocumentFetcher>,
    clock: Arc<dyn Clock>,
    method: String,
    path: String,
    fingerprint: String,
    cached: RwLock<Option<IdentityTag>>,
}

impl IdentityTagProvider {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            method: "POST".to_string(),
            path: "/rest/app-chat/conversations/new".to_string(),
            fingerprint: browser_fingerprint(),
            cached: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> IdentityTag {
        if let Some(tag) = self.cached.read().await.as_ref() {
            return tag.clone();
        }
        let mut guard = self.cached.write().await;
        if let Some(tag) = guard.as_ref() {
            return tag.clone();
        }
        let tag = match self.generate_primary().await {
            Ok(value) => {
                info!(event = "identity_tag_ready", source = "primary");
                IdentityTag {
                    value: Arc::from(value),
                    source: TagSource::Primary,
                }
            }
            Err(err) => {
                warn!(event = "identity_tag_primary_failed", error = %err);
                self.fallback()
            }
        };
        *guard = Some(tag.clone());
        tag
    }

    /// Replaces the cached tag with a freshly synthesized fallback tag.
    pub async fn refresh_fallback(&self) -> IdentityTag {
        let tag = self.fallback();
        info!(event = "identity_tag_refreshed", source = "fallback");
        *self.cached.write().await = Some(tag.clone());
        tag
    }

    async fn generate_primary(&self) -> Result<String, GatewayError> {
        let meta = self.fetcher.fetch_homepage_meta().await?;
        let elapsed = codec::elapsed_since_epoch(self.clock.now_ms() / 1000);
        let record = TagRecord::new(&meta, &self.method, &self.path, elapsed, &self.fingerprint);
        Ok(encode(&record, rand::random::<u8>()))
    }

    fn fallback(&self) -> IdentityTag {
        IdentityTag {
            value: Arc::from(fallback::fallback_tag(&mut rand::rng())),
            source: TagSource::Fallback,
        }
    }
}

/// Hex SHA-256 of a fixed desktop browser profile serialized with sorted keys.
pub fn browser_fingerprint() -> String {
    let profile = json!({
        "userAgent": crate::grok::USER_AGENT,
        "language": "en",
        "languages": ["en", "zh", "zh-TW", "zh-CN"],
        "platform": "MacIntel",
        "cookieEnabled": true,
        "doNotTrack": null,
        "screenWidth": 450,
        "screenHeight": 654,
        "screenColorDepth": 24,
        "screenPixelDepth": 24,
        "screenAvailWidth": 450,
        "screenAvailHeight": 654,
        "innerWidth": 450,
        "innerHeight": 654,
        "outerWidth": 1920,
        "outerHeight": 1055,
        "timezone": "Asia/Shanghai",
        "timezoneOffset": -480,
        "hardwareConcurrency": 14,
        "deviceMemory": 8,
        "maxTouchPoints": 0
    });
    let canonical = profile.to_string();
    Sha256::digest(canonical.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grokgate_provider_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticMeta {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl DocumentFetcher for StaticMeta {
        async fn fetch_homepage_meta(&self) -> Result<Vec<u8>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::Decode("no document".into()));
            }
            Ok(b"verification-token".to_vec())
        }
    }

    fn provider(fail: bool) -> (IdentityTagProvider, Arc<StaticMeta>) {
        let fetcher = Arc::new(StaticMeta {
            calls: AtomicUsize::new(0),
            fail,
        });
        let clock = Arc::new(ManualClock::new((codec::TAG_EPOCH_SECS + 600) * 1000));
        (IdentityTagProvider::new(fetcher.clone(), clock), fetcher)
    }

    #[tokio::test]
    async fn primary_tag_is_cached_and_decodable() {
        let (provider, fetcher) = provider(false);
        let first = provider.current().await;
        let second = provider.current().await;
        assert_eq!(first.source, TagSource::Primary);
        assert_eq!(first.value, second.value);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let record = decode(&first.value).unwrap();
        assert_eq!(record.timestamp, 600);
        assert_eq!(&record.meta[..18], b"verification-token");
        assert!(record.meta[18..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn failed_fetch_falls_back() {
        let (provider, _) = provider(true);
        let tag = provider.current().await;
        assert_eq!(tag.source, TagSource::Fallback);
        assert!(decode(&tag.value).is_none());
    }

    #[tokio::test]
    async fn refresh_replaces_cached_tag() {
        let (provider, fetcher) = provider(false);
        provider.current().await;
        let refreshed = provider.refresh_fallback().await;
        assert_eq!(refreshed.source, TagSource::Fallback);
        assert_eq!(provider.current().await.value, refreshed.value);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = browser_fingerprint();
        assert_eq!(a.len(), 64);
        assert_eq!(a, browser_fingerprint());
    }
}
