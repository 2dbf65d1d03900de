//! Attachment loading
//!
//! Attachments are fetched once per run, before the first job, and shared
//! read-only by every job of that run.

use crate::error::{DeliveryError, ErrorKind};
use crate::smtp::infer_content_type;
use async_trait::async_trait;
use mailblast_common::config::StorageConfig;
use mailblast_common::types::AttachmentRef;
use mailblast_storage::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Attachment bytes ready to be encoded into a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Arc<Vec<u8>>,
}

/// Source of attachment bytes
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn fetch(&self, reference: &AttachmentRef) -> Result<Vec<u8>, DeliveryError>;
}

/// Reads attachments from the blob store, or over HTTP(S) for foreign URLs
pub struct StorageAttachmentSource {
    blobs: Option<Arc<dyn BlobStore>>,
    http: reqwest::Client,
    max_bytes: u64,
}

impl StorageAttachmentSource {
    /// Create a new attachment source
    pub fn new(config: &StorageConfig, blobs: Option<Arc<dyn BlobStore>>) -> mailblast_common::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs.max(1)))
            .build()
            .map_err(|e| mailblast_common::Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            blobs,
            http,
            max_bytes: config.max_attachment_bytes,
        })
    }

    fn too_large(&self, reference: &AttachmentRef, size: u64) -> DeliveryError {
        DeliveryError::new(
            ErrorKind::Attachment,
            format!(
                "Attachment {} is {} bytes, above the limit of {} bytes",
                reference.name, size, self.max_bytes
            ),
        )
    }
}

#[async_trait]
impl AttachmentSource for StorageAttachmentSource {
    async fn fetch(&self, reference: &AttachmentRef) -> Result<Vec<u8>, DeliveryError> {
        if let Some(blobs) = &self.blobs {
            if let Some((bucket, path)) = blobs.locate(&reference.url) {
                let bytes = blobs.read(&bucket, &path).await.map_err(|e| {
                    DeliveryError::new(
                        ErrorKind::Attachment,
                        format!("Failed to read attachment {}: {}", reference.name, e),
                    )
                })?;
                if bytes.len() as u64 > self.max_bytes {
                    return Err(self.too_large(reference, bytes.len() as u64));
                }
                return Ok(bytes);
            }
        }

        if !(reference.url.starts_with("http://") || reference.url.starts_with("https://")) {
            return Err(DeliveryError::new(
                ErrorKind::Attachment,
                format!("Attachment {} has an unsupported location {:?}", reference.name, reference.url),
            ));
        }

        let mut response = self
            .http
            .get(&reference.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                DeliveryError::new(
                    ErrorKind::Attachment,
                    format!("Failed to download attachment {}: {}", reference.name, e),
                )
            })?;

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(self.too_large(reference, length));
            }
        }

        // Content-Length may be absent or wrong; enforce the cap while reading
        let mut bytes = Vec::new();
        loop {
            let chunk = response.chunk().await.map_err(|e| {
                DeliveryError::new(
                    ErrorKind::Attachment,
                    format!("Failed to download attachment {}: {}", reference.name, e),
                )
            })?;
            let Some(chunk) = chunk else { break };

            let received = (bytes.len() + chunk.len()) as u64;
            if received > self.max_bytes {
                return Err(self.too_large(reference, received));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}

/// Load every attachment of a template; the first failure wins
pub async fn load_attachments(
    source: &dyn AttachmentSource,
    references: &[AttachmentRef],
) -> Result<Vec<LoadedAttachment>, DeliveryError> {
    let mut loaded = Vec::with_capacity(references.len());

    for reference in references {
        let content = source.fetch(reference).await?;
        let content_type = reference
            .content_type
            .clone()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| infer_content_type(&reference.name));

        debug!(name = %reference.name, size = content.len(), content_type = %content_type, "Loaded attachment");

        loaded.push(LoadedAttachment {
            filename: reference.name.clone(),
            content_type,
            content: Arc::new(content),
        });
    }

    Ok(loaded)
}
