//! Caller-facing framing of translated upstream output.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use futures_util::stream;
use grokgate_protocol::openai::ChatCompletionChunk;
use grokgate_provider_core::GatewayError;
use grokgate_provider_impl::{ImageResolver, StreamTranslator, TranslatorStep};
use serde::Serialize;
use tracing::{debug, warn};

use crate::dispatch::Dispatched;

pub const SSE_DONE_FRAME: &[u8] = b"data: [DONE]\n\n";
pub const SSE_KEEPALIVE_FRAME: &[u8] = b": keep-alive\n\n";
const IMAGE_FAILED_TEXT: &str = "Image generation failed; check the image host configuration.";

pub fn sse_json_bytes<T: Serialize>(value: &T) -> Option<Bytes> {
    let payload = serde_json::to_vec(value).ok()?;
    let mut data = Vec::with_capacity(payload.len() + 8);
    data.extend_from_slice(b"data: ");
    data.extend_from_slice(&payload);
    data.extend_from_slice(b"\n\n");
    Some(Bytes::from(data))
}

/// Identity shared by every chunk of one response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ResponseMeta {
    pub fn new(model: impl Into<String>, created: i64) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created,
            model: model.into(),
        }
    }

    fn chunk(&self, content: String) -> Option<Bytes> {
        sse_json_bytes(&ChatCompletionChunk::content(
            &self.id,
            self.created,
            &self.model,
            content,
        ))
    }
}

/// What resolving an image needs besides its path.
#[derive(Clone)]
pub struct ImageContext {
    pub resolver: Arc<ImageResolver>,
    pub cf_clearance: Option<String>,
}

impl ImageContext {
    async fn markdown(&self, path: &str, dispatched: &Dispatched) -> String {
        match self
            .resolver
            .resolve(
                path,
                &dispatched.credential,
                &dispatched.identity_tag,
                self.cf_clearance.as_deref(),
            )
            .await
        {
            Ok(markdown) => markdown,
            Err(err) => {
                warn!(event = "image_resolve_failed", error = %err);
                IMAGE_FAILED_TEXT.to_string()
            }
        }
    }
}

struct FrameState {
    dispatched: Dispatched,
    translator: StreamTranslator,
    meta: ResponseMeta,
    images: ImageContext,
    pending: VecDeque<Bytes>,
    done: bool,
}

impl FrameState {
    async fn queue(&mut self, steps: Vec<TranslatorStep>) {
        for step in steps {
            match step {
                TranslatorStep::Text(text) => {
                    if let Some(frame) = self.meta.chunk(text) {
                        self.pending.push_back(frame);
                    }
                }
                TranslatorStep::Keepalive => {
                    self.pending.push_back(Bytes::from_static(SSE_KEEPALIVE_FRAME));
                }
                TranslatorStep::Image(path) => {
                    let markdown = self.images.markdown(&path, &self.dispatched).await;
                    if let Some(frame) = self.meta.chunk(markdown) {
                        self.pending.push_back(frame);
                    }
                }
            }
        }
    }
}

/// Translates the upstream body into chat-completion SSE frames ending with
/// `data: [DONE]`. A body cut short upstream ends with an `Err` item instead.
pub fn sse_frames(
    dispatched: Dispatched,
    translator: StreamTranslator,
    meta: ResponseMeta,
    images: ImageContext,
) -> impl Stream<Item = Result<Bytes, GatewayError>> + Send + 'static {
    let state = FrameState {
        dispatched,
        translator,
        meta,
        images,
        pending: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }
            match state.dispatched.body.recv().await {
                Some(Ok(chunk)) => {
                    let steps = state.translator.push_bytes(&chunk);
                    state.queue(steps).await;
                }
                Some(Err(failure)) => {
                    warn!(
                        event = "stream_truncated",
                        model = %state.meta.model,
                        kind = failure.kind.as_str(),
                        error = %failure.message
                    );
                    state.done = true;
                    return Some((Err(GatewayError::from(failure)), state));
                }
                None => {
                    let steps = state.translator.finish();
                    state.queue(steps).await;
                }
            }
            if state.translator.is_finished() {
                state.pending.push_back(Bytes::from_static(SSE_DONE_FRAME));
                state.done = true;
                debug!(event = "stream_finished", model = %state.meta.model);
            }
        }
    })
}

/// Buffered mode: drains the upstream body and returns the answer text.
pub async fn collect_answer(
    mut dispatched: Dispatched,
    mut translator: StreamTranslator,
    images: &ImageContext,
) -> Result<String, GatewayError> {
    loop {
        let steps = match dispatched.body.recv().await {
            Some(Ok(chunk)) => translator.push_bytes(&chunk),
            Some(Err(failure)) => {
                warn!(event = "answer_truncated", kind = failure.kind.as_str(), error = %failure.message);
                return Err(failure.into());
            }
            None => translator.finish(),
        };
        for step in steps {
            if let TranslatorStep::Image(path) = step {
                return Ok(images.markdown(&path, &dispatched).await);
            }
        }
        if translator.saw_upstream_error() || translator.is_finished() {
            break;
        }
    }
    Ok(translator.buffered_text())
}
