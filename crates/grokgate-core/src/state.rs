use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use grokgate_common::GlobalConfig;
use grokgate_protocol::openai::{ChatCompletion, ChatCompletionRequest, ModelList};
use grokgate_provider_core::{Clock, Credential, CredentialPool, GatewayError, StatusMap, Tier};
use grokgate_provider_impl::{ClassifyOptions, ImageResolver, StreamTranslator};
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::heartbeat::HeartbeatDecoupler;
use crate::stream::{ImageContext, ResponseMeta, collect_answer, sse_frames};

pub type FrameStream = BoxStream<'static, Result<Bytes, GatewayError>>;

pub enum ChatOutput {
    Stream(FrameStream),
    Complete(ChatCompletion),
}

/// Everything a request handler needs, shared behind one `Arc`.
pub struct GatewayState {
    pub config: GlobalConfig,
    pub pool: CredentialPool,
    pub dispatcher: Dispatcher,
    pub cf_clearance: Arc<ArcSwapOption<String>>,
    pub images: Arc<ImageResolver>,
    pub heartbeat: HeartbeatDecoupler,
    pub clock: Arc<dyn Clock>,
}

impl GatewayState {
    fn now_secs(&self) -> i64 {
        self.clock.now_ms() / 1000
    }

    fn classify_options(&self, model: &str) -> ClassifyOptions {
        let agent = self
            .pool
            .catalog()
            .normalize(model)
            .is_some_and(|class| class.is_agent());
        ClassifyOptions {
            agent,
            show_thinking: self.config.show_thinking,
            show_search_results: self.config.show_search_results,
        }
    }

    fn image_context(&self) -> ImageContext {
        ImageContext {
            resolver: self.images.clone(),
            cf_clearance: self.cf_clearance.load_full().map(|value| value.as_ref().clone()),
        }
    }

    /// Serves one chat completion. `caller_key` is the bearer presented by the
    /// caller, used as the upstream credential in custom-SSO mode.
    pub async fn chat(
        &self,
        request: ChatCompletionRequest,
        caller_key: Option<&str>,
    ) -> Result<ChatOutput, GatewayError> {
        let caller = if self.config.custom_sso {
            caller_key.and_then(Credential::parse)
        } else {
            None
        };
        let dispatched = self.dispatcher.send(&request, caller).await?;
        info!(
            event = "chat_dispatched",
            model = %request.model,
            stream = request.stream,
            attempts = dispatched.attempts
        );
        let translator = StreamTranslator::new(self.classify_options(&request.model));
        let images = self.image_context();
        let created = self.now_secs();
        if request.stream {
            let meta = ResponseMeta::new(request.model.clone(), created);
            let frames = sse_frames(dispatched, translator, meta, images);
            return Ok(ChatOutput::Stream(self.heartbeat.wrap(frames).boxed()));
        }
        let answer = collect_answer(dispatched, translator, &images).await?;
        let meta = ResponseMeta::new(request.model.clone(), created);
        Ok(ChatOutput::Complete(ChatCompletion::assistant(
            &meta.id,
            meta.created,
            &meta.model,
            answer,
        )))
    }

    pub fn models(&self) -> ModelList {
        ModelList::from_ids(self.pool.catalog().ids(), self.now_secs())
    }

    pub fn set_cf_clearance(&self, value: Option<String>) {
        let value = value
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty());
        info!(event = "cf_clearance_updated", present = value.is_some());
        self.cf_clearance.store(value.map(Arc::new));
    }

    pub async fn add_token(&self, raw: &str, tier: Tier) -> Result<bool, GatewayError> {
        let credential = Credential::parse(raw)
            .ok_or_else(|| GatewayError::Validation("sso token is empty or malformed".into()))?;
        let key = credential.key_prefix().to_string();
        let added = self.pool.add(credential, tier).await;
        info!(event = "token_added", key = %key, ?tier, added);
        Ok(added)
    }

    pub async fn delete_token(&self, raw: &str) -> Result<bool, GatewayError> {
        let credential = Credential::parse(raw)
            .ok_or_else(|| GatewayError::Validation("sso token is empty or malformed".into()))?;
        let removed = self.pool.delete(&credential).await;
        info!(event = "token_deleted", key = %credential.key_prefix(), removed);
        Ok(removed)
    }

    pub async fn token_status(&self) -> StatusMap {
        self.pool.status_snapshot().await
    }
}
