use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use grokgate_protocol::grok::{UploadFileRequest, UploadFileResponse};
use grokgate_provider_core::{
    Credential, GatewayError, UpstreamClient, UpstreamHttpRequest, collect_body, header_set,
};
use tracing::info;

use crate::payload::{ImageData, Uploader};

use super::{GrokEndpoints, credential_headers};

/// Uploads attachments through `/rest/app-chat/upload-file` as one credential.
pub struct GrokUploader {
    client: Arc<dyn UpstreamClient>,
    endpoints: GrokEndpoints,
    credential: Credential,
    identity_tag: String,
    cf_clearance: Option<String>,
}

impl GrokUploader {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        endpoints: GrokEndpoints,
        credential: Credential,
        identity_tag: impl Into<String>,
        cf_clearance: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoints,
            credential,
            identity_tag: identity_tag.into(),
            cf_clearance,
        }
    }

    async fn upload(&self, file_name: &str, mime: &str, content: &[u8]) -> Result<String, GatewayError> {
        let request = UploadFileRequest {
            file_name: file_name.to_string(),
            file_mime_type: mime.to_string(),
            content: STANDARD.encode(content),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|err| GatewayError::Validation(format!("upload encoding failed: {err}")))?;
        let mut headers = credential_headers(
            &self.endpoints.base_url,
            &self.identity_tag,
            &self.credential,
            self.cf_clearance.as_deref(),
        );
        header_set(&mut headers, "content-type", "application/json");
        let resp = self
            .client
            .send(UpstreamHttpRequest::post(
                self.endpoints.upload_url(),
                headers,
                Bytes::from(body),
                false,
            ))
            .await?;
        let status = resp.status;
        let body = collect_body(resp.body).await?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::UpstreamRejected {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let parsed: UploadFileResponse = serde_json::from_slice(&body)
            .map_err(|err| GatewayError::Decode(format!("upload response: {err}")))?;
        let id = parsed
            .file_metadata_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::Decode("upload response without fileMetadataId".into()))?;
        info!(
            event = "attachment_uploaded",
            file = file_name,
            bytes = content.len(),
            key = %self.credential.key_prefix()
        );
        Ok(id)
    }
}

#[async_trait]
impl Uploader for GrokUploader {
    async fn upload_text(&self, content: &[u8]) -> Result<String, GatewayError> {
        self.upload("message.txt", "text/plain", content).await
    }

    async fn upload_image(&self, image: &ImageData, _model: &str) -> Result<String, GatewayError> {
        let name = format!("image.{}", image.extension());
        self.upload(&name, &image.mime, &image.bytes).await
    }
}
