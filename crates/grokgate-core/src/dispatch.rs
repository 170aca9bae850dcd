use std::sync::Arc;

use arc_swap::ArcSwapOption;
use grokgate_protocol::openai::ChatCompletionRequest;
use grokgate_provider_core::{
    BodyChunk, ByteStream, Credential, CredentialPool, GatewayError, UpstreamBody, UpstreamClient,
    collect_body,
};
use grokgate_provider_impl::{
    GrokEndpoints, GrokUploader, IdentityTagProvider, PayloadOptions, RequestPayloadBuilder,
    conversation_request,
};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_attempts: usize,
    /// Caller bearer is the upstream credential; no pooling, no retries.
    pub custom_sso: bool,
    pub payload: PayloadOptions,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            custom_sso: false,
            payload: PayloadOptions {
                temporary: true,
                has_image_host: false,
            },
        }
    }
}

/// A successful upstream call ready for translation.
#[derive(Debug)]
pub struct Dispatched {
    pub body: ByteStream,
    pub credential: Credential,
    pub identity_tag: Arc<str>,
    pub attempts: usize,
}

/// Runs one logical chat request across pooled credentials.
pub struct Dispatcher {
    client: Arc<dyn UpstreamClient>,
    pool: CredentialPool,
    identity: Arc<IdentityTagProvider>,
    endpoints: GrokEndpoints,
    cf_clearance: Arc<ArcSwapOption<String>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        pool: CredentialPool,
        identity: Arc<IdentityTagProvider>,
        endpoints: GrokEndpoints,
        cf_clearance: Arc<ArcSwapOption<String>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            client,
            pool,
            identity,
            endpoints,
            cf_clearance,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn cf_clearance(&self) -> Option<Arc<String>> {
        self.cf_clearance.load_full()
    }

    pub async fn send(
        &self,
        request: &ChatCompletionRequest,
        caller: Option<Credential>,
    ) -> Result<Dispatched, GatewayError> {
        let model = request.model.as_str();
        let cf = self.cf_clearance();
        let cf = cf.as_deref().map(String::as_str);

        let upload_credential = match (&caller, self.config.custom_sso) {
            (Some(credential), true) => credential.clone(),
            (_, true) => {
                return Err(GatewayError::Validation(
                    "a session token is required as the bearer key".into(),
                ));
            }
            (_, false) => self
                .pool
                .next(model, true)
                .await
                .ok_or_else(|| GatewayError::no_credentials(model))?,
        };
        let tag = self.identity.current().await;
        let uploader = GrokUploader::new(
            self.client.clone(),
            self.endpoints.clone(),
            upload_credential.clone(),
            tag.value.as_ref(),
            cf.map(str::to_string),
        );
        let catalog = self.pool.catalog();
        let payload = RequestPayloadBuilder::new(catalog, self.config.payload)
            .build(request, &uploader)
            .await?;

        if self.config.custom_sso {
            let upstream = conversation_request(
                &self.endpoints,
                &payload,
                &upload_credential,
                &tag.value,
                cf,
            )?;
            let resp = self.client.send(upstream).await?;
            if !resp.is_success() {
                let status = resp.status;
                let body = collect_body(resp.body).await.unwrap_or_default();
                warn!(event = "upstream_rejected", model, status, custom_sso = true);
                return Err(GatewayError::UpstreamRejected {
                    status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            return Ok(Dispatched {
                body: into_stream(resp.body),
                credential: upload_credential,
                identity_tag: tag.value,
                attempts: 1,
            });
        }

        let mut last_status: Option<u16> = None;
        for attempt in 1..=self.config.max_attempts {
            let Some(credential) = self.pool.next(model, false).await else {
                warn!(event = "pool_empty", model, attempt);
                return Err(GatewayError::no_credentials(model));
            };
            let tag = if last_status == Some(403) {
                self.identity.refresh_fallback().await
            } else {
                self.identity.current().await
            };
            let upstream =
                conversation_request(&self.endpoints, &payload, &credential, &tag.value, cf)?;
            info!(
                event = "upstream_attempt",
                model,
                attempt,
                key = %credential.key_prefix()
            );
            match self.client.send(upstream).await {
                Ok(resp) if resp.is_success() => {
                    info!(event = "upstream_accepted", model, attempt, status = resp.status);
                    return Ok(Dispatched {
                        body: into_stream(resp.body),
                        credential,
                        identity_tag: tag.value,
                        attempts: attempt,
                    });
                }
                Ok(resp) => {
                    let status = resp.status;
                    let body = collect_body(resp.body).await.unwrap_or_default();
                    warn!(
                        event = "upstream_rejected",
                        model,
                        attempt,
                        status,
                        key = %credential.key_prefix(),
                        body = %String::from_utf8_lossy(&body[..body.len().min(256)])
                    );
                    if matches!(status, 403 | 429) {
                        self.pool.refund(model, &credential, 1).await;
                    }
                    self.pool.retire(model, &credential).await;
                    last_status = Some(status);
                }
                Err(failure) => {
                    let err = GatewayError::from(failure);
                    warn!(
                        event = "upstream_transport_failed",
                        model,
                        attempt,
                        key = %credential.key_prefix(),
                        error = %err
                    );
                    self.pool.retire(model, &credential).await;
                    last_status = None;
                }
            }
        }
        warn!(event = "attempts_exhausted", model, max_attempts = self.config.max_attempts);
        Err(GatewayError::exhausted(model))
    }
}

/// Normalizes a response body into a receiver.
pub fn into_stream(body: UpstreamBody) -> ByteStream {
    match body {
        UpstreamBody::Stream(rx) => rx,
        UpstreamBody::Bytes(bytes) => {
            let (tx, rx) = tokio::sync::mpsc::channel::<BodyChunk>(1);
            if !bytes.is_empty() {
                let _ = tx.try_send(Ok(bytes));
            }
            rx
        }
    }
}
