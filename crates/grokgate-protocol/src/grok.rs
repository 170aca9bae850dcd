use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Body of `POST /rest/app-chat/conversations/new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    pub temporary: bool,
    pub model_name: String,
    pub message: String,
    pub file_attachments: Vec<String>,
    pub image_attachments: Vec<String>,
    pub disable_search: bool,
    pub enable_image_generation: bool,
    pub return_image_bytes: bool,
    pub return_raw_grok_in_xai_request: bool,
    pub enable_image_streaming: bool,
    pub image_generation_count: u32,
    pub force_concise: bool,
    pub tool_overrides: ToolOverrides,
    pub enable_side_by_side: bool,
    pub send_final_metadata: bool,
    pub custom_personality: String,
    pub deepsearch_preset: String,
    pub is_reasoning: bool,
    pub disable_text_follow_ups: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOverrides {
    pub image_gen: bool,
    pub web_search: bool,
    pub x_search: bool,
    pub x_media_search: bool,
    pub trends_search: bool,
    pub x_post_analyze: bool,
}

impl ToolOverrides {
    pub fn search(enabled: bool) -> Self {
        Self {
            image_gen: false,
            web_search: enabled,
            x_search: enabled,
            x_media_search: enabled,
            trends_search: enabled,
            x_post_analyze: enabled,
        }
    }
}

/// Body of `POST /rest/app-chat/upload-file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileRequest {
    pub file_name: String,
    pub file_mime_type: String,
    /// Base64 encoded file content.
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileResponse {
    #[serde(default)]
    pub file_metadata_id: Option<String>,
}

/// One NDJSON line of the upstream conversation stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamLine {
    #[serde(default)]
    pub result: Option<StreamResult>,
    #[serde(default)]
    pub error: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamResult {
    #[serde(default)]
    pub response: Option<StreamResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub message_tag: Option<String>,
    #[serde(default)]
    pub is_thinking: Option<bool>,
    #[serde(default)]
    pub message_step_id: Option<JsonValue>,
    #[serde(default)]
    pub model_response: Option<ModelResponse>,
    #[serde(default)]
    pub cached_image_generation_response: Option<CachedImage>,
    #[serde(default)]
    pub web_search_results: Option<WebSearchResults>,
    #[serde(default)]
    pub card_attachment: Option<CardAttachment>,
    #[serde(default)]
    pub do_img_gen: Option<bool>,
    #[serde(default)]
    pub image_attachment_info: Option<JsonValue>,
}

impl StreamResponse {
    pub fn has_step(&self) -> bool {
        matches!(&self.message_step_id, Some(v) if !v.is_null())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub generated_image_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedImage {
    pub image_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSearchResults {
    #[serde(default)]
    pub results: Vec<WebSearchResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSearchResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAttachment {
    /// JSON document serialized as a string, carrying at least `id` and `url`.
    pub json_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CitationCard {
    pub id: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_token_line() {
        let line = r#"{"result":{"response":{"token":"Hi","messageTag":"final","isThinking":false,"messageStepId":null}}}"#;
        let parsed: StreamLine = serde_json::from_str(line).unwrap();
        let response = parsed.result.unwrap().response.unwrap();
        assert_eq!(response.token.as_deref(), Some("Hi"));
        assert_eq!(response.message_tag.as_deref(), Some("final"));
        assert!(!response.has_step());
    }

    #[test]
    fn payload_uses_camel_case() {
        let payload = ConversationRequest {
            temporary: true,
            model_name: "grok-3".to_string(),
            message: "USER: hi".to_string(),
            file_attachments: Vec::new(),
            image_attachments: Vec::new(),
            disable_search: false,
            enable_image_generation: true,
            return_image_bytes: false,
            return_raw_grok_in_xai_request: false,
            enable_image_streaming: false,
            image_generation_count: 1,
            force_concise: false,
            tool_overrides: ToolOverrides::search(true),
            enable_side_by_side: true,
            send_final_metadata: true,
            custom_personality: String::new(),
            deepsearch_preset: String::new(),
            is_reasoning: false,
            disable_text_follow_ups: true,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["modelName"], "grok-3");
        assert_eq!(value["toolOverrides"]["xPostAnalyze"], true);
        assert_eq!(value["returnRawGrokInXaiRequest"], false);
    }
}
