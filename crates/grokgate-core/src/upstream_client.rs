use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wreq::{Client, Method, Proxy};
use wreq_util::Emulation;

use grokgate_common::GlobalConfig;
use grokgate_provider_core::{
    BodyChunk, ByteStream, Headers, HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure,
    UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransportErrorKind,
};

const BODY_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Upper bound for a whole conversation, streaming included.
    pub request_timeout: Duration,
    /// Longest silence tolerated between two body chunks.
    pub stream_idle_timeout: Duration,
}

impl UpstreamClientConfig {
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            proxy: global
                .proxy
                .as_deref()
                .map(str::trim)
                .filter(|proxy| !proxy.is_empty())
                .map(str::to_string),
            ..Self::default()
        }
    }
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(3600),
            stream_idle_timeout: Duration::from_secs(120),
        }
    }
}

/// `wreq` client presenting a desktop Chrome TLS and HTTP/2 fingerprint.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    client: Client,
    stream_idle_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let mut builder = Client::builder()
            .emulation(Emulation::Chrome133)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout);
        if let Some(proxy) = config.proxy.as_deref() {
            debug!(event = "upstream_proxy_configured");
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }

    /// The underlying client, for callers that need raw `wreq` features such
    /// as multipart uploads to image hosts.
    pub fn shared_client(&self) -> Client {
        self.client.clone()
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let method = match req.method {
                HttpMethod::Get => Method::GET,
                HttpMethod::Post => Method::POST,
            };
            debug!(event = "upstream_send", method = req.method.as_str(), url = %req.url);
            let mut builder = self.client.request(method, &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }
            let resp = builder.send().await.map_err(transport_failure)?;

            let status = resp.status().as_u16();
            let headers = collect_headers(resp.headers());
            // Rejections are always buffered so the dispatcher can log them.
            if !req.is_stream || !(200..300).contains(&status) {
                let body = resp.bytes().await.map_err(transport_failure)?;
                return Ok(UpstreamHttpResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(body),
                });
            }
            Ok(UpstreamHttpResponse {
                status,
                headers,
                body: UpstreamBody::Stream(pump_body(
                    resp.bytes_stream(),
                    self.stream_idle_timeout,
                )),
            })
        })
    }
}

/// Moves body chunks into a channel until the body ends or the receiver is
/// dropped. A body error or an idle gap longer than `idle` is sent as a final
/// `Err` item so readers can tell truncation from a clean end.
fn pump_body<S>(body: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes, wreq::Error>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<BodyChunk>(BODY_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut body = Box::pin(body);
        loop {
            let item = match tokio::time::timeout(idle, body.next()).await {
                Ok(None) => break,
                Ok(Some(Ok(chunk))) => Ok(chunk),
                Ok(Some(Err(err))) => {
                    let failure = transport_failure(err);
                    warn!(event = "upstream_body_failed", kind = failure.kind.as_str(), error = %failure.message);
                    Err(failure)
                }
                Err(_) => {
                    warn!(event = "upstream_body_idle", idle_secs = idle.as_secs());
                    Err(UpstreamFailure {
                        kind: UpstreamTransportErrorKind::ReadTimeout,
                        message: format!("no body data for {}s", idle.as_secs()),
                    })
                }
            };
            let last = item.is_err();
            if tx.send(item).await.is_err() {
                debug!(event = "upstream_body_receiver_dropped");
                break;
            }
            if last {
                break;
            }
        }
    });
    rx
}

fn collect_headers(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn transport_failure(err: wreq::Error) -> UpstreamFailure {
    UpstreamFailure {
        kind: classify(&err),
        message: err.to_string(),
    }
}

fn classify(err: &wreq::Error) -> UpstreamTransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return UpstreamTransportErrorKind::ReadTimeout;
        }
        return UpstreamTransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return UpstreamTransportErrorKind::Dns;
        }
        return UpstreamTransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return UpstreamTransportErrorKind::Tls;
    }
    UpstreamTransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use grokgate_common::GlobalConfigPatch;

    #[test]
    fn proxy_flows_from_global_config() {
        let config = GlobalConfigPatch {
            api_key: Some("k".into()),
            proxy: Some("socks5://127.0.0.1:1080".into()),
            ..GlobalConfigPatch::default()
        }
        .into_config()
        .unwrap();
        let upstream = UpstreamClientConfig::from_global(&config);
        assert_eq!(upstream.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert_eq!(upstream.stream_idle_timeout, Duration::from_secs(120));

        let config = GlobalConfigPatch {
            api_key: Some("k".into()),
            ..GlobalConfigPatch::default()
        }
        .into_config()
        .unwrap();
        assert!(UpstreamClientConfig::from_global(&config).proxy.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gap_ends_body_with_read_timeout() {
        let body = stream::unfold(0u8, |n| async move {
            match n {
                0 => Some((Ok::<_, wreq::Error>(Bytes::from_static(b"a\n")), 1)),
                _ => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Some((Ok(Bytes::from_static(b"late\n")), 2))
                }
            }
        });
        let mut rx = pump_body(body, Duration::from_secs(5));
        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from_static(b"a\n"));
        let failure = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(failure.kind, UpstreamTransportErrorKind::ReadTimeout);
        assert!(rx.recv().await.is_none());
    }
}
