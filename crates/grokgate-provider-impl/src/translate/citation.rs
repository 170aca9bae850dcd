use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const MISSING_SOURCE: &str = "[missing source]";

const RENDER_OPEN: &str = "<grok:render";
const RENDER_CLOSE: &str = "</grok:render>";
/// Unclosed markup longer than this is released as plain text.
const MAX_HELD: usize = 8 * 1024;

fn render_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<grok:render\b[^>]*?\bcard_id="([^"]*)"[^>]*>.*?</grok:render>"#)
            .expect("valid citation regex")
    })
}

/// Citation ids registered during one call and the footnote counter they share.
#[derive(Debug, Default)]
pub struct CitationBook {
    urls: HashMap<String, String>,
    counter: usize,
    /// Tail of the last streamed token that may be the start of markup.
    held: String,
}

impl CitationBook {
    pub fn register(&mut self, id: impl Into<String>, url: impl Into<String>) {
        self.urls.insert(id.into(), url.into());
    }

    /// Same registrations with the footnote counter back at zero.
    pub fn restarted(&self) -> Self {
        Self {
            urls: self.urls.clone(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Streaming variant of [`rewrite`](Self::rewrite): markup split across
    /// tokens is held back until its closing tag arrives.
    pub fn rewrite_streamed(&mut self, text: &str) -> String {
        let mut joined = std::mem::take(&mut self.held);
        joined.push_str(text);
        let cut = unfinished_markup_start(&joined).unwrap_or(joined.len());
        if joined.len() - cut <= MAX_HELD {
            self.held = joined.split_off(cut);
        }
        self.rewrite(&joined)
    }

    /// Releases whatever [`rewrite_streamed`](Self::rewrite_streamed) held back.
    pub fn take_held(&mut self) -> String {
        std::mem::take(&mut self.held)
    }

    /// Rewrites inline citation markup into `[[n]](url)` footnotes.
    pub fn rewrite(&mut self, text: &str) -> String {
        if !text.contains(RENDER_OPEN) {
            return text.to_string();
        }
        let urls = &self.urls;
        let counter = &mut self.counter;
        render_regex()
            .replace_all(text, |caps: &Captures<'_>| {
                let id = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                match urls.get(id) {
                    Some(url) => {
                        *counter += 1;
                        format!("[[{}]]({url})", *counter)
                    }
                    None => MISSING_SOURCE.to_string(),
                }
            })
            .into_owned()
    }
}

/// Byte offset of a trailing `<grok:render` span that is not closed yet, or of
/// a trailing fragment that could still grow into one.
fn unfinished_markup_start(text: &str) -> Option<usize> {
    if let Some(open) = text.rfind(RENDER_OPEN)
        && !text[open..].contains(RENDER_CLOSE)
    {
        return Some(open);
    }
    text.char_indices()
        .rev()
        .take(RENDER_OPEN.len())
        .find(|&(idx, ch)| ch == '<' && RENDER_OPEN.starts_with(&text[idx..]))
        .map(|(idx, _)| idx)
}
