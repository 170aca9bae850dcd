use serde::{Deserialize, Serialize};

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const COMPLETION_OBJECT: &str = "chat.completion";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(text.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Part(ContentPart),
    #[default]
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    pub fn content(id: &str, created: i64, model: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            object: CHUNK_OBJECT.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(content.into()),
                },
                finish_reason: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl ChatCompletion {
    pub fn assistant(id: &str, created: i64, model: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            object: COMPLETION_OBJECT.to_string(),
            created,
            model: model.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: content.into(),
                },
                finish_reason: "stop".to_string(),
            }],
            usage: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelList {
    pub fn from_ids<'a>(ids: impl IntoIterator<Item = &'a str>, created: i64) -> Self {
        Self {
            object: "list".to_string(),
            data: ids
                .into_iter()
                .map(|id| ModelObject {
                    id: id.to_string(),
                    object: "model".to_string(),
                    created,
                    owned_by: "grok".to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_content_shapes() {
        let raw = r#"{
            "model": "grok-3",
            "stream": true,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                    {"type": "input_audio", "input_audio": {}}
                ]},
                {"role": "assistant", "content": null}
            ]
        }"#;
        let req: ChatCompletionRequest = serde_json::from_str(raw).unwrap();
        assert!(req.stream);
        assert_eq!(req.messages.len(), 3);
        assert!(matches!(req.messages[0].content, MessageContent::Text(_)));
        let MessageContent::Parts(parts) = &req.messages[1].content else {
            panic!("expected parts");
        };
        assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
        assert!(matches!(parts[2], ContentPart::Unsupported));
        assert!(matches!(req.messages[2].content, MessageContent::Null));
    }

    #[test]
    fn chunk_omits_empty_finish_reason() {
        let chunk = ChatCompletionChunk::content("chatcmpl-1", 10, "grok-3", "hi");
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], CHUNK_OBJECT);
        assert_eq!(value["choices"][0]["delta"]["content"], "hi");
        assert!(value["choices"][0].get("finish_reason").is_none());
    }
}
