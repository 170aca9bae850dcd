//! Wire types for grokgate.
//!
//! `openai` holds the caller-facing chat-completion shapes, `grok` holds the
//! upstream conversation payload and the NDJSON event envelope.

pub mod grok;
pub mod ndjson;
pub mod openai;
