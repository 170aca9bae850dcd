use std::sync::OnceLock;

use grokgate_protocol::grok::{CitationCard, StreamResponse, WebSearchResults};
use grokgate_provider_core::GatewayError;
use regex::Regex;

/// Tags that carry short agent progress notes rather than answer text.
const THINKING_TAGS: [&str; 4] = ["header", "summary", "raw_function_result", "citedWebSearchResults"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Heartbeat,
    Citation { id: String, url: String },
    Image(String),
    FinalAnswer(String),
    Intermediate(String),
    Content(String),
    Skip,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyOptions {
    pub agent: bool,
    pub show_thinking: bool,
    pub show_search_results: bool,
}

fn tool_card_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<xai:tool_usage_card>.*?</xai:tool_usage_card>")
            .expect("valid tool card regex")
    })
}

pub fn strip_tool_cards(text: &str) -> String {
    if !text.contains("<xai:tool_usage_card>") {
        return text.to_string();
    }
    tool_card_regex().replace_all(text, "").into_owned()
}

/// Renders search results as collapsible markdown blocks.
pub fn render_search_results(results: &WebSearchResults) -> String {
    results
        .results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            let title = result.title.as_deref().unwrap_or("Untitled");
            let url = result.url.as_deref().unwrap_or("#");
            let preview = result.preview.as_deref().unwrap_or("No preview available");
            format!(
                "\r\n<details><summary>Source[{index}]: {title}</summary>\r\n{preview}\r\n\n[{title}]({url})\r\n</details>\n"
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Classifies one upstream event.
pub fn classify(response: &StreamResponse, options: ClassifyOptions) -> Result<EventKind, GatewayError> {
    if let Some(image) = &response.cached_image_generation_response {
        return Ok(EventKind::Image(image.image_url.clone()));
    }
    if let Some(url) = response
        .model_response
        .as_ref()
        .and_then(|model| model.generated_image_urls.first())
    {
        return Ok(EventKind::Image(url.clone()));
    }

    let tag = response.message_tag.as_deref().unwrap_or_default();
    if tag == "heartbeat" {
        return Ok(EventKind::Heartbeat);
    }

    if let Some(card) = &response.card_attachment {
        let parsed: CitationCard = serde_json::from_str(&card.json_data)
            .map_err(|err| GatewayError::Decode(format!("citation card: {err}")))?;
        return Ok(EventKind::Citation {
            id: parsed.id,
            url: parsed.url,
        });
    }

    if let Some(model) = &response.model_response {
        return Ok(match model.message.as_deref() {
            Some(message) if !message.is_empty() => {
                EventKind::FinalAnswer(strip_tool_cards(message).trim().to_string())
            }
            _ => EventKind::Skip,
        });
    }

    let token = response.token.as_deref().unwrap_or_default();
    if options.agent {
        if THINKING_TAGS.contains(&tag) {
            let source = if !token.is_empty() {
                token.to_string()
            } else if options.show_search_results
                && let Some(results) = &response.web_search_results
            {
                render_search_results(results)
            } else {
                String::new()
            };
            let cleaned = strip_tool_cards(&source).trim().to_string();
            return Ok(if cleaned.is_empty() {
                EventKind::Skip
            } else {
                EventKind::Intermediate(cleaned)
            });
        }
        let verbose = response.is_thinking.unwrap_or(false) || response.has_step();
        if verbose {
            if !options.show_thinking {
                return Ok(EventKind::Heartbeat);
            }
            let cleaned = strip_tool_cards(token).trim().to_string();
            return Ok(if cleaned.is_empty() {
                EventKind::Skip
            } else {
                EventKind::Intermediate(cleaned)
            });
        }
    }

    if token.is_empty() {
        return Ok(EventKind::Skip);
    }
    Ok(EventKind::Content(strip_tool_cards(token)))
}
