//! Generated-image download and optional re-hosting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use grokgate_provider_core::{
    Credential, GatewayError, UpstreamClient, UpstreamHttpRequest, collect_body, header_get,
};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::grok::{GrokEndpoints, credential_headers};

const PICGO_UPLOAD_URL: &str = "https://www.picgo.net/api/1/upload";
const TUMY_UPLOAD_URL: &str = "https://tu.my/api/v1/upload";
const DOWNLOAD_ATTEMPTS: u32 = 2;

/// Publishes image bytes and returns a public URL.
#[async_trait]
pub trait ImageHost: Send + Sync {
    fn name(&self) -> &'static str;
    async fn publish(&self, bytes: Bytes, mime: &str) -> Result<String, GatewayError>;
}

fn image_form(field: &'static str, bytes: Bytes, mime: &str) -> Result<wreq::multipart::Form, GatewayError> {
    let part = wreq::multipart::Part::bytes(bytes.to_vec())
        .file_name("image.jpg")
        .mime_str(mime)
        .map_err(|err| GatewayError::Validation(format!("image mime {mime}: {err}")))?;
    Ok(wreq::multipart::Form::new().part(field, part))
}

async fn read_json(resp: wreq::Response, host: &str) -> Result<JsonValue, GatewayError> {
    let status = resp.status().as_u16();
    let body = resp
        .bytes()
        .await
        .map_err(|err| GatewayError::Decode(format!("{host} response body: {err}")))?;
    if !(200..300).contains(&status) {
        return Err(GatewayError::UpstreamRejected {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    serde_json::from_slice(&body).map_err(|err| GatewayError::Decode(format!("{host} response: {err}")))
}

fn send_error(host: &str, err: wreq::Error) -> GatewayError {
    GatewayError::Transport {
        kind: grokgate_provider_core::UpstreamTransportErrorKind::Other,
        message: format!("{host}: {err}"),
    }
}

pub struct PicGoHost {
    client: wreq::Client,
    api_key: String,
}

impl PicGoHost {
    pub fn new(client: wreq::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ImageHost for PicGoHost {
    fn name(&self) -> &'static str {
        "picgo"
    }

    async fn publish(&self, bytes: Bytes, mime: &str) -> Result<String, GatewayError> {
        let resp = self
            .client
            .post(PICGO_UPLOAD_URL)
            .header("X-API-Key", self.api_key.as_str())
            .multipart(image_form("source", bytes, mime)?)
            .send()
            .await
            .map_err(|err| send_error(self.name(), err))?;
        let json = read_json(resp, self.name()).await?;
        json.pointer("/image/url")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Decode("picgo response without image.url".into()))
    }
}

pub struct TumyHost {
    client: wreq::Client,
    api_key: String,
}

impl TumyHost {
    pub fn new(client: wreq::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ImageHost for TumyHost {
    fn name(&self) -> &'static str {
        "tumy"
    }

    async fn publish(&self, bytes: Bytes, mime: &str) -> Result<String, GatewayError> {
        let resp = self
            .client
            .post(TUMY_UPLOAD_URL)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(image_form("file", bytes, mime)?)
            .send()
            .await
            .map_err(|err| send_error(self.name(), err))?;
        let json = read_json(resp, self.name()).await?;
        json.pointer("/data/links/url")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Decode("tumy response without data.links.url".into()))
    }
}

/// Turns an upstream image path into a markdown image the caller can render.
pub struct ImageResolver {
    client: Arc<dyn UpstreamClient>,
    endpoints: GrokEndpoints,
    host: Option<Arc<dyn ImageHost>>,
    retry_delay: Duration,
}

impl ImageResolver {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        endpoints: GrokEndpoints,
        host: Option<Arc<dyn ImageHost>>,
    ) -> Self {
        Self {
            client,
            endpoints,
            host,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn resolve(
        &self,
        path: &str,
        credential: &Credential,
        identity_tag: &str,
        cf_clearance: Option<&str>,
    ) -> Result<String, GatewayError> {
        let (bytes, mime) = self
            .download(path, credential, identity_tag, cf_clearance)
            .await?;
        if let Some(host) = &self.host {
            match host.publish(bytes.clone(), &mime).await {
                Ok(url) => {
                    info!(event = "image_published", host = host.name());
                    return Ok(format!("![image]({url})"));
                }
                Err(err) => warn!(event = "image_publish_failed", host = host.name(), error = %err),
            }
        }
        Ok(format!("![image](data:{mime};base64,{})", STANDARD.encode(&bytes)))
    }

    async fn download(
        &self,
        path: &str,
        credential: &Credential,
        identity_tag: &str,
        cf_clearance: Option<&str>,
    ) -> Result<(Bytes, String), GatewayError> {
        let url = self.endpoints.asset_url(path);
        let mut last_error = None;
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            let headers =
                credential_headers(&self.endpoints.base_url, identity_tag, credential, cf_clearance);
            let result = self.client.send(UpstreamHttpRequest::get(url.clone(), headers)).await;
            match result {
                Ok(resp) if resp.is_success() => {
                    let mime = header_get(&resp.headers, "content-type")
                        .unwrap_or("image/jpeg")
                        .to_string();
                    match collect_body(resp.body).await {
                        Ok(bytes) => return Ok((bytes, mime)),
                        Err(failure) => last_error = Some(failure.into()),
                    }
                }
                Ok(resp) => {
                    let status = resp.status;
                    let body = collect_body(resp.body).await.unwrap_or_default();
                    last_error = Some(GatewayError::UpstreamRejected {
                        status,
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                }
                Err(err) => last_error = Some(err.into()),
            }
            warn!(event = "image_download_failed", attempt, url = %url);
            if attempt < DOWNLOAD_ATTEMPTS {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }
        Err(last_error.unwrap_or_else(|| GatewayError::Decode("image download failed".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grokgate_provider_core::{
        UpstreamBody, UpstreamFailure, UpstreamHttpResponse, UpstreamTransportErrorKind,
    };
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<Result<UpstreamHttpResponse, UpstreamFailure>>>,
        urls: Mutex<Vec<String>>,
    }

    impl UpstreamClient for ScriptedClient {
        fn send<'a>(
            &'a self,
            req: UpstreamHttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
        {
            self.urls.lock().unwrap().push(req.url);
            let next = self.responses.lock().unwrap().remove(0);
            Box::pin(async move { next })
        }
    }

    struct FixedHost;

    #[async_trait]
    impl ImageHost for FixedHost {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn publish(&self, _bytes: Bytes, _mime: &str) -> Result<String, GatewayError> {
            Ok("https://img.test/a.png".to_string())
        }
    }

    fn png_response() -> Result<UpstreamHttpResponse, UpstreamFailure> {
        Ok(UpstreamHttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "image/png".to_string())],
            body: UpstreamBody::Bytes(Bytes::from_static(&[1, 2, 3])),
        })
    }

    fn resolver(
        responses: Vec<Result<UpstreamHttpResponse, UpstreamFailure>>,
        host: Option<Arc<dyn ImageHost>>,
    ) -> (ImageResolver, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(responses),
            urls: Mutex::new(Vec::new()),
        });
        let resolver = ImageResolver::new(client.clone(), GrokEndpoints::default(), host)
            .with_retry_delay(Duration::ZERO);
        (resolver, client)
    }

    #[tokio::test]
    async fn inlines_without_host_after_retry() {
        let transient = Err(UpstreamFailure {
            kind: UpstreamTransportErrorKind::Connect,
            message: "refused".into(),
        });
        let (resolver, client) = resolver(vec![transient, png_response()], None);
        let out = resolver
            .resolve("users/1/a.png", &Credential::from_sso("t"), "tag", None)
            .await
            .unwrap();
        assert_eq!(out, "![image](data:image/png;base64,AQID)");
        let urls = client.urls.lock().unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://assets.grok.com/users/1/a.png");
    }

    #[tokio::test]
    async fn publishes_through_host() {
        let (resolver, _) = resolver(vec![png_response()], Some(Arc::new(FixedHost)));
        let out = resolver
            .resolve("a.png", &Credential::from_sso("t"), "tag", None)
            .await
            .unwrap();
        assert_eq!(out, "![image](https://img.test/a.png)");
    }

    #[tokio::test]
    async fn gives_up_after_two_attempts() {
        let rejected = || {
            Ok(UpstreamHttpResponse {
                status: 404,
                headers: Vec::new(),
                body: UpstreamBody::Bytes(Bytes::new()),
            })
        };
        let (resolver, _) = resolver(vec![rejected(), rejected()], None);
        let err = resolver
            .resolve("a.png", &Credential::from_sso("t"), "tag", None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
