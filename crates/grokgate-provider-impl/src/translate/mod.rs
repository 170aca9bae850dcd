//! Upstream event stream to caller token sequence.
//!
//! One [`StreamTranslator`] lives for exactly one upstream call. It owns the
//! think-block flag, the citation book and the footnote counter, so concurrent
//! calls never share numbering.

pub mod citation;
pub mod classify;

use bytes::BytesMut;
use grokgate_protocol::grok::StreamLine;
use grokgate_protocol::ndjson::{drain_lines, drain_remainder};
use tracing::{debug, warn};

pub use citation::{CitationBook, MISSING_SOURCE};
pub use classify::{ClassifyOptions, EventKind, classify, render_search_results, strip_tool_cards};

pub const THINK_OPEN: &str = "<think>\n";
pub const THINK_CLOSE: &str = "\n</think>\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslatorStep {
    Text(String),
    Keepalive,
    /// Generated image reference. Nothing follows it.
    Image(String),
}

#[derive(Debug, Default)]
pub struct StreamTranslator {
    options: ClassifyOptions,
    buffer: BytesMut,
    in_think: bool,
    think_has_text: bool,
    emitted_real_content: bool,
    citations: CitationBook,
    final_answer: Option<String>,
    accumulated: String,
    upstream_error: bool,
    finished: bool,
}

impl StreamTranslator {
    pub fn new(options: ClassifyOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Feeds raw response bytes; complete lines are translated immediately.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<TranslatorStep> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        for line in drain_lines(&mut self.buffer) {
            if self.finished {
                break;
            }
            out.extend(self.push_line(&line));
        }
        out
    }

    pub fn push_line(&mut self, line: &str) -> Vec<TranslatorStep> {
        if self.finished {
            return Vec::new();
        }
        let parsed: StreamLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(event = "stream_line_skipped", error = %err, len = line.len());
                return Vec::new();
            }
        };
        if let Some(error) = parsed.error {
            warn!(event = "upstream_stream_error", error = %error);
            self.upstream_error = true;
            return Vec::new();
        }
        let Some(response) = parsed.result.and_then(|result| result.response) else {
            return Vec::new();
        };
        match classify(&response, self.options) {
            Ok(kind) => self.push_event(kind),
            Err(err) => {
                warn!(event = "stream_event_skipped", error = %err);
                Vec::new()
            }
        }
    }

    pub fn push_event(&mut self, kind: EventKind) -> Vec<TranslatorStep> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();
        match kind {
            EventKind::Skip => {}
            EventKind::Heartbeat => out.push(TranslatorStep::Keepalive),
            EventKind::Citation { id, url } => self.citations.register(id, url),
            EventKind::Intermediate(token) => {
                if !self.in_think {
                    self.release_held(&mut out);
                    self.in_think = true;
                    self.think_has_text = false;
                    self.emit(&mut out, THINK_OPEN.to_string());
                }
                let mut text = self.citations.rewrite(&token);
                if self.think_has_text {
                    text.insert(0, '\n');
                }
                self.think_has_text = true;
                self.emit(&mut out, text);
            }
            EventKind::Content(token) => {
                self.close_think(&mut out);
                let text = self.citations.rewrite_streamed(&token);
                self.emit(&mut out, text);
                self.emitted_real_content = true;
            }
            EventKind::FinalAnswer(message) => {
                if self.emitted_real_content {
                    debug!(event = "final_answer_suppressed", len = message.len());
                } else {
                    self.close_think(&mut out);
                    self.release_held(&mut out);
                    let text = self.citations.rewrite(&message);
                    self.emit(&mut out, text);
                    self.emitted_real_content = true;
                }
                self.final_answer = Some(message);
            }
            EventKind::Image(url) => {
                self.close_think(&mut out);
                self.release_held(&mut out);
                out.push(TranslatorStep::Image(url));
                self.finished = true;
            }
        }
        out
    }

    /// Drains any trailing partial line and closes an open think block.
    pub fn finish(&mut self) -> Vec<TranslatorStep> {
        let mut out = Vec::new();
        if let Some(line) = drain_remainder(&mut self.buffer) {
            out.extend(self.push_line(&line));
        }
        self.close_think(&mut out);
        self.release_held(&mut out);
        self.finished = true;
        out
    }

    /// Result for buffered mode: the final answer when one arrived, otherwise
    /// everything emitted so far.
    pub fn buffered_text(&self) -> String {
        if self.upstream_error {
            return String::new();
        }
        match &self.final_answer {
            Some(message) => {
                let mut book = self.citations.restarted();
                book.rewrite(message)
            }
            None => self.accumulated.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn saw_upstream_error(&self) -> bool {
        self.upstream_error
    }

    fn close_think(&mut self, out: &mut Vec<TranslatorStep>) {
        if self.in_think {
            self.in_think = false;
            self.emit(out, THINK_CLOSE.to_string());
        }
    }

    /// Emits content-token markup the citation book held back, before anything
    /// that is not a continuation of that content.
    fn release_held(&mut self, out: &mut Vec<TranslatorStep>) {
        let held = self.citations.take_held();
        self.emit(out, held);
    }

    fn emit(&mut self, out: &mut Vec<TranslatorStep>, text: String) {
        if text.is_empty() {
            return;
        }
        self.accumulated.push_str(&text);
        out.push(TranslatorStep::Text(text));
    }
}
