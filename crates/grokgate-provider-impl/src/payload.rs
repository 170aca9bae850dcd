use std::sync::OnceLock;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use grokgate_protocol::grok::{ConversationRequest, ToolOverrides};
use grokgate_protocol::openai::{ChatCompletionRequest, ChatMessage, ContentPart, MessageContent};
use grokgate_provider_core::{GatewayError, ModelCatalog, ModelSpec};
use regex::Regex;
use tracing::{debug, info, warn};

/// Blob length at which the conversation is moved into a text attachment.
pub const OVERFLOW_THRESHOLD: usize = 40_000;
pub const MAX_ATTACHMENTS: usize = 4;
pub const IMAGE_PLACEHOLDER: &str = "[image]";
pub const ATTACHMENT_INSTRUCTION: &str = "Respond based on the content of the attached txt file:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    /// Decodes a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.trim().strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        let bytes = STANDARD.decode(payload.trim()).ok()?;
        Some(Self {
            mime: if mime.is_empty() { "image/jpeg".to_string() } else { mime.to_string() },
            bytes,
        })
    }

    pub fn extension(&self) -> &str {
        match self.mime.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

/// Attachment upload collaborator.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload_text(&self, content: &[u8]) -> Result<String, GatewayError>;
    async fn upload_image(&self, image: &ImageData, model: &str) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PayloadOptions {
    pub temporary: bool,
    pub has_image_host: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

impl Role {
    fn of(message: &ChatMessage) -> Self {
        if message.role == "assistant" {
            Role::Assistant
        } else {
            Role::User
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

/// Renders merged turns as `ROLE: text\n` lines.
#[derive(Default)]
struct Transcript {
    turns: Vec<(Role, String)>,
    rendered_len: usize,
}

impl Transcript {
    fn push(&mut self, role: Role, text: &str) {
        if let Some((last_role, last_text)) = self.turns.last_mut()
            && *last_role == role
        {
            last_text.push('\n');
            last_text.push_str(text);
            self.rendered_len += 1 + text.len();
            return;
        }
        self.rendered_len += role.label().len() + 2 + text.len() + 1;
        self.turns.push((role, text.to_string()));
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(self.rendered_len);
        for (role, text) in &self.turns {
            out.push_str(role.label());
            out.push_str(": ");
            out.push_str(text);
            out.push('\n');
        }
        out
    }
}

/// Turns a chat request into the upstream conversation payload.
pub struct RequestPayloadBuilder<'a> {
    catalog: &'a ModelCatalog,
    options: PayloadOptions,
}

impl<'a> RequestPayloadBuilder<'a> {
    pub fn new(catalog: &'a ModelCatalog, options: PayloadOptions) -> Self {
        Self { catalog, options }
    }

    pub async fn build(
        &self,
        request: &ChatCompletionRequest,
        uploader: &dyn Uploader,
    ) -> Result<ConversationRequest, GatewayError> {
        let spec = self.catalog.get(&request.model).ok_or_else(|| {
            GatewayError::Validation(format!("model {} is not supported", request.model))
        })?;
        if spec.stream_needs_image_host && request.stream && !self.options.has_image_host {
            return Err(GatewayError::Validation(format!(
                "streaming output for {} requires an image host key",
                spec.id
            )));
        }
        let Some((last, history)) = request.messages.split_last() else {
            return Err(GatewayError::Validation("messages must not be empty".into()));
        };
        let history: &[ChatMessage] = if spec.requires_user_last {
            if last.role != "user" {
                return Err(GatewayError::Validation(format!(
                    "the last message for {} must come from the user",
                    spec.id
                )));
            }
            &[]
        } else {
            history
        };

        let mut attachments = self.upload_images(last, &spec.id, uploader).await;

        let mut transcript = Transcript::default();
        let mut overflow = false;
        for message in history {
            let text = flatten_content(&message.content, false);
            if text.is_empty() {
                continue;
            }
            transcript.push(Role::of(message), &text);
            if transcript.rendered_len >= OVERFLOW_THRESHOLD {
                overflow = true;
                break;
            }
        }

        let last_role = Role::of(last);
        let mut last_text = flatten_content(&last.content, true);
        if last_text.is_empty() && !attachments.is_empty() {
            last_text = IMAGE_PLACEHOLDER.to_string();
        }

        let message = if overflow {
            self.attach_transcript(&transcript, uploader, &mut attachments)
                .await?;
            if last_text.is_empty() {
                ATTACHMENT_INSTRUCTION.to_string()
            } else {
                format!("{}: {last_text}", last_role.label())
            }
        } else {
            if !last_text.is_empty() {
                transcript.push(last_role, &last_text);
            }
            if transcript.rendered_len >= OVERFLOW_THRESHOLD {
                self.attach_transcript(&transcript, uploader, &mut attachments)
                    .await?;
                ATTACHMENT_INSTRUCTION.to_string()
            } else {
                transcript.render().trim().to_string()
            }
        };

        if message.trim().is_empty() {
            return Err(GatewayError::Validation("message content is empty".into()));
        }
        attachments.truncate(MAX_ATTACHMENTS);
        debug!(
            event = "payload_built",
            model = %spec.id,
            message_len = message.len(),
            attachments = attachments.len(),
            overflow
        );
        Ok(self.payload(spec, message, attachments))
    }

    async fn attach_transcript(
        &self,
        transcript: &Transcript,
        uploader: &dyn Uploader,
        attachments: &mut Vec<String>,
    ) -> Result<(), GatewayError> {
        let blob = transcript.render();
        info!(event = "payload_overflow", bytes = blob.len());
        let id = uploader.upload_text(blob.as_bytes()).await?;
        attachments.insert(0, id);
        Ok(())
    }

    async fn upload_images(
        &self,
        message: &ChatMessage,
        model: &str,
        uploader: &dyn Uploader,
    ) -> Vec<String> {
        let mut out = Vec::new();
        for url in image_urls(&message.content) {
            if out.len() >= MAX_ATTACHMENTS {
                break;
            }
            let Some(image) = ImageData::from_data_url(url) else {
                debug!(event = "image_skipped", reason = "not a base64 data url");
                continue;
            };
            match uploader.upload_image(&image, model).await {
                Ok(id) => out.push(id),
                Err(err) => warn!(event = "image_upload_failed", error = %err),
            }
        }
        out
    }

    fn payload(&self, spec: &ModelSpec, message: String, attachments: Vec<String>) -> ConversationRequest {
        let mut tools = ToolOverrides::search(spec.search);
        tools.image_gen = spec.image_generation;
        ConversationRequest {
            temporary: self.options.temporary,
            model_name: spec.upstream.clone(),
            message,
            file_attachments: attachments,
            image_attachments: Vec::new(),
            disable_search: false,
            enable_image_generation: true,
            return_image_bytes: false,
            return_raw_grok_in_xai_request: false,
            enable_image_streaming: false,
            image_generation_count: 1,
            force_concise: false,
            tool_overrides: tools,
            enable_side_by_side: true,
            send_final_metadata: true,
            custom_personality: String::new(),
            deepsearch_preset: spec.deepsearch_preset.clone().unwrap_or_default(),
            is_reasoning: spec.reasoning,
            disable_text_follow_ups: true,
        }
    }
}

fn part_image(part: &ContentPart) -> Option<&str> {
    match part {
        ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
        _ => None,
    }
}

fn image_urls(content: &MessageContent) -> Vec<&str> {
    match content {
        MessageContent::Parts(parts) => parts.iter().filter_map(part_image).collect(),
        MessageContent::Part(part) => part_image(part).into_iter().collect(),
        MessageContent::Text(_) | MessageContent::Null => Vec::new(),
    }
}

/// Flattens message content to text. Images become a placeholder unless they
/// belong to the final turn, which uploads them instead.
fn flatten_content(content: &MessageContent, final_turn: bool) -> String {
    let mut pieces: Vec<String> = Vec::new();
    let mut push_part = |part: &ContentPart| match part {
        ContentPart::Text { text } => {
            let cleaned = scrub_history(text);
            if !cleaned.is_empty() {
                pieces.push(cleaned);
            }
        }
        ContentPart::ImageUrl { .. } if !final_turn => pieces.push(IMAGE_PLACEHOLDER.to_string()),
        _ => {}
    };
    match content {
        MessageContent::Text(text) => return scrub_history(text),
        MessageContent::Parts(parts) => parts.iter().for_each(&mut push_part),
        MessageContent::Part(part) => push_part(part),
        MessageContent::Null => {}
    }
    pieces.join("\n")
}

fn think_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think regex"))
}

fn inline_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"!\[image\]\(data:[^)]*?base64,[^)]*?\)").expect("valid inline image regex")
    })
}

/// Drops earlier think blocks and inline base64 images echoed back in history.
fn scrub_history(text: &str) -> String {
    let without_think = think_regex().replace_all(text, "");
    inline_image_regex()
        .replace_all(without_think.trim(), IMAGE_PLACEHOLDER)
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grokgate_protocol::openai::ImageUrl;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUploader {
        texts: Mutex<Vec<String>>,
        images: Mutex<Vec<ImageData>>,
    }

    #[async_trait]
    impl Uploader for RecordingUploader {
        async fn upload_text(&self, content: &[u8]) -> Result<String, GatewayError> {
            let mut texts = self.texts.lock().unwrap();
            texts.push(String::from_utf8_lossy(content).into_owned());
            Ok(format!("file-{}", texts.len()))
        }

        async fn upload_image(&self, image: &ImageData, _model: &str) -> Result<String, GatewayError> {
            let mut images = self.images.lock().unwrap();
            images.push(image.clone());
            Ok(format!("img-{}", images.len()))
        }
    }

    fn request(model: &str, messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages,
            stream: false,
        }
    }

    fn options() -> PayloadOptions {
        PayloadOptions {
            temporary: true,
            has_image_host: false,
        }
    }

    fn image_part(url: &str) -> ContentPart {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn merges_consecutive_roles() {
        let catalog = ModelCatalog::default();
        let builder = RequestPayloadBuilder::new(&catalog, options());
        let uploader = RecordingUploader::default();
        let req = request(
            "grok-3",
            vec![
                ChatMessage::text("system", "be brief"),
                ChatMessage::text("user", "hello"),
                ChatMessage::text("assistant", "<think>hmm</think>hi there"),
                ChatMessage::text("user", "bye"),
            ],
        );
        let payload = builder.build(&req, &uploader).await.unwrap();
        assert_eq!(
            payload.message,
            "USER: be brief\nhello\nASSISTANT: hi there\nUSER: bye"
        );
        assert!(payload.file_attachments.is_empty());
        assert_eq!(payload.model_name, "grok-3");
        assert!(payload.temporary);
    }

    #[tokio::test]
    async fn overflow_uploads_history_and_keeps_final_turn() {
        let catalog = ModelCatalog::default();
        let builder = RequestPayloadBuilder::new(&catalog, options());
        let uploader = RecordingUploader::default();
        let big = "x".repeat(25_000);
        let req = request(
            "grok-3",
            vec![
                ChatMessage::text("user", big.clone()),
                ChatMessage::text("assistant", big.clone()),
                ChatMessage::text("user", "dropped middle turn"),
                ChatMessage::text("user", "final question"),
            ],
        );
        let payload = builder.build(&req, &uploader).await.unwrap();
        assert_eq!(payload.message, "USER: final question");
        assert_eq!(payload.file_attachments, vec!["file-1".to_string()]);
        let uploaded = uploader.texts.lock().unwrap()[0].clone();
        assert!(uploaded.starts_with("USER: xxx"));
        assert!(uploaded.contains("ASSISTANT: xxx"));
        assert!(!uploaded.contains("dropped middle turn"));
        assert!(!uploaded.contains("final question"));
    }

    #[tokio::test]
    async fn overflow_with_empty_final_turn_uses_instruction() {
        let catalog = ModelCatalog::default();
        let builder = RequestPayloadBuilder::new(&catalog, options());
        let uploader = RecordingUploader::default();
        let req = request(
            "grok-3",
            vec![
                ChatMessage::text("user", "y".repeat(OVERFLOW_THRESHOLD)),
                ChatMessage::text("user", "   "),
            ],
        );
        let payload = builder.build(&req, &uploader).await.unwrap();
        assert_eq!(payload.message, ATTACHMENT_INSTRUCTION);
        assert_eq!(payload.file_attachments.len(), 1);
    }

    #[tokio::test]
    async fn final_turn_images_are_uploaded_earlier_ones_replaced() {
        let catalog = ModelCatalog::default();
        let builder = RequestPayloadBuilder::new(&catalog, options());
        let uploader = RecordingUploader::default();
        let png = format!("data:image/png;base64,{}", STANDARD.encode([1u8, 2, 3]));
        let mut parts = vec![ContentPart::Text {
            text: "describe".to_string(),
        }];
        for _ in 0..6 {
            parts.push(image_part(&png));
        }
        let req = request(
            "grok-4",
            vec![
                ChatMessage {
                    role: "user".to_string(),
                    content: MessageContent::Parts(vec![image_part(&png)]),
                },
                ChatMessage::text("assistant", "ok"),
                ChatMessage {
                    role: "user".to_string(),
                    content: MessageContent::Parts(parts),
                },
            ],
        );
        let payload = builder.build(&req, &uploader).await.unwrap();
        assert_eq!(payload.message, "USER: [image]\nASSISTANT: ok\nUSER: describe");
        assert_eq!(payload.file_attachments.len(), MAX_ATTACHMENTS);
        let images = uploader.images.lock().unwrap();
        assert_eq!(images.len(), MAX_ATTACHMENTS);
        assert_eq!(images[0].mime, "image/png");
        assert_eq!(images[0].bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn image_only_final_turn_gets_placeholder_text() {
        let catalog = ModelCatalog::default();
        let builder = RequestPayloadBuilder::new(&catalog, options());
        let uploader = RecordingUploader::default();
        let png = format!("data:image/png;base64,{}", STANDARD.encode([9u8]));
        let req = request(
            "grok-3",
            vec![ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![image_part(&png)]),
            }],
        );
        let payload = builder.build(&req, &uploader).await.unwrap();
        assert_eq!(payload.message, "USER: [image]");
        assert_eq!(payload.file_attachments, vec!["img-1".to_string()]);
    }

    #[tokio::test]
    async fn validation_failures() {
        let catalog = ModelCatalog::default();
        let builder = RequestPayloadBuilder::new(&catalog, options());
        let uploader = RecordingUploader::default();

        let empty = request("grok-3", vec![ChatMessage::text("user", "  ")]);
        assert!(matches!(
            builder.build(&empty, &uploader).await,
            Err(GatewayError::Validation(_))
        ));

        let no_messages = request("grok-3", Vec::new());
        assert!(builder.build(&no_messages, &uploader).await.is_err());

        let assistant_last = request(
            "grok-3-deepsearch",
            vec![
                ChatMessage::text("user", "q"),
                ChatMessage::text("assistant", "a"),
            ],
        );
        assert!(matches!(
            builder.build(&assistant_last, &uploader).await,
            Err(GatewayError::Validation(msg)) if msg.contains("last message")
        ));

        let mut streaming_image = request("grok-3-imageGen", vec![ChatMessage::text("user", "cat")]);
        streaming_image.stream = true;
        assert!(matches!(
            builder.build(&streaming_image, &uploader).await,
            Err(GatewayError::Validation(msg)) if msg.contains("image host")
        ));

        let unknown = request("gpt-4o", vec![ChatMessage::text("user", "hi")]);
        assert!(builder.build(&unknown, &uploader).await.is_err());
    }

    #[tokio::test]
    async fn capability_flags_follow_model() {
        let catalog = ModelCatalog::default();
        let builder = RequestPayloadBuilder::new(&catalog, options());
        let uploader = RecordingUploader::default();
        let msgs = || {
            vec![
                ChatMessage::text("user", "first"),
                ChatMessage::text("assistant", "reply"),
                ChatMessage::text("user", "go"),
            ]
        };

        let search = builder.build(&request("grok-4-search", msgs()), &uploader).await.unwrap();
        assert!(search.tool_overrides.web_search && search.tool_overrides.x_post_analyze);
        assert!(!search.tool_overrides.image_gen);
        assert_eq!(search.model_name, "grok-4");

        let deep = builder.build(&request("grok-3-deepsearch", msgs()), &uploader).await.unwrap();
        assert_eq!(deep.deepsearch_preset, "default");
        assert_eq!(deep.message, "USER: go");

        let deeper = builder.build(&request("grok-3-deepersearch", msgs()), &uploader).await.unwrap();
        assert_eq!(deeper.deepsearch_preset, "deeper");

        let reasoning = builder.build(&request("grok-3-reasoning", msgs()), &uploader).await.unwrap();
        assert!(reasoning.is_reasoning);

        let image = builder.build(&request("grok-3-imageGen", msgs()), &uploader).await.unwrap();
        assert!(image.tool_overrides.image_gen);
    }

    #[test]
    fn scrubs_inline_images_and_think_blocks() {
        let text = "<think>\nplan\n</think>\nresult ![image](data:image/png;base64,AAAA) done";
        assert_eq!(scrub_history(text), "result [image] done");
    }
}
