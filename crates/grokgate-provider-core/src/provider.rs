use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::headers::Headers;

/// One item of a streamed body. A transport failure is the last item sent,
/// so a closed channel without one means the body ended cleanly.
pub type BodyChunk = Result<Bytes, UpstreamFailure>;

/// Chunked upstream body, fed by a pump task owned by the client.
pub type ByteStream = tokio::sync::mpsc::Receiver<BodyChunk>;

/// The only two verbs the Grok web backend needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    /// Hand a 2xx body back as a [`ByteStream`] instead of buffering it.
    pub is_stream: bool,
}

impl UpstreamHttpRequest {
    /// Page or asset fetch, always buffered.
    pub fn get(url: impl Into<String>, headers: Headers) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers,
            body: None,
            is_stream: false,
        }
    }

    pub fn post(url: impl Into<String>, headers: Headers, body: Bytes, is_stream: bool) -> Self {
        Self {
            body: Some(body),
            is_stream,
            method: HttpMethod::Post,
            ..Self::get(url, headers)
        }
    }
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

impl UpstreamTransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ReadTimeout => "read_timeout",
            Self::Connect => "connect",
            Self::Dns => "dns",
            Self::Tls => "tls",
            Self::Other => "other",
        }
    }
}

/// The request never produced an HTTP status.
#[derive(Debug, Clone)]
pub struct UpstreamFailure {
    pub kind: UpstreamTransportErrorKind,
    pub message: String,
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind.as_str(), self.message)
    }
}

/// Sends one request to grok.com or its asset host. Any HTTP status,
/// 4xx and 5xx included, comes back as `Ok`; only transport problems are `Err`.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}

/// Buffers a body fully, draining the channel when it is streamed. A body
/// cut short by a transport failure is an error, never a shorter body.
pub async fn collect_body(body: UpstreamBody) -> Result<Bytes, UpstreamFailure> {
    let mut rx = match body {
        UpstreamBody::Bytes(bytes) => return Ok(bytes),
        UpstreamBody::Stream(rx) => rx,
    };
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_body_drains_streams() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"{\"a\":"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"1}"))).await.unwrap();
        drop(tx);
        assert_eq!(
            collect_body(UpstreamBody::Stream(rx)).await.unwrap(),
            Bytes::from_static(b"{\"a\":1}")
        );
    }

    #[tokio::test]
    async fn collect_body_reports_truncation() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"{\"a\":"))).await.unwrap();
        tx.send(Err(UpstreamFailure {
            kind: UpstreamTransportErrorKind::ReadTimeout,
            message: "body idle".into(),
        }))
        .await
        .unwrap();
        drop(tx);
        let err = collect_body(UpstreamBody::Stream(rx)).await.unwrap_err();
        assert_eq!(err.kind, UpstreamTransportErrorKind::ReadTimeout);
    }

    #[test]
    fn post_keeps_url_and_headers() {
        let req = UpstreamHttpRequest::post(
            "https://grok.com/rest/app-chat/conversations/new",
            vec![("cookie".into(), "sso=a".into())],
            Bytes::from_static(b"{}"),
            true,
        );
        assert_eq!(req.method, HttpMethod::Post);
        assert!(req.is_stream);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.body.as_deref(), Some(&b"{}"[..]));
    }
}
