//! Upstream-specific pieces of grokgate: identity tags, request payloads,
//! stream translation and image handling.

pub mod grok;
pub mod identity;
pub mod image;
pub mod payload;
pub mod translate;

pub use grok::{GrokEndpoints, GrokUploader, HomepageFetcher, conversation_request};
pub use identity::{DocumentFetcher, IdentityTag, IdentityTagProvider, TagSource};
pub use image::{ImageHost, ImageResolver, PicGoHost, TumyHost};
pub use payload::{ImageData, PayloadOptions, RequestPayloadBuilder, Uploader};
pub use translate::{ClassifyOptions, StreamTranslator, TranslatorStep};
