//! Image Attachments
//!
//! Images travel to the API as base64 data URLs. When Cloudinary is
//! configured, chat images are also uploaded there so stored messages carry
//! a short hosted URL instead of the whole data URL.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::CloudinaryConfig;
use crate::error::ClientError;
use crate::fallback::{HttpMethod, HttpRequest, HttpTransport};

/// Largest accepted image (decoded)
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const CLOUDINARY_API: &str = "https://api.cloudinary.com";

/// A validated image ready to send
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAttachment {
    mime: String,
    data_url: String,
    size: usize,
}

impl ImageAttachment {
    /// Build from raw bytes, taking the mime type from the file extension
    pub fn from_bytes(bytes: &[u8], extension: &str) -> Result<Self, ClientError> {
        let mime = mime_for_extension(extension).ok_or_else(|| {
            ClientError::InvalidImage(format!("unsupported file type: .{extension}"))
        })?;
        check_size(bytes.len())?;
        Ok(Self {
            mime: mime.to_string(),
            data_url: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
            size: bytes.len(),
        })
    }

    /// Parse and validate a `data:image/...;base64,` URL
    pub fn from_data_url(data_url: &str) -> Result<Self, ClientError> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| ClientError::InvalidImage("not a data URL".to_string()))?;
        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| ClientError::InvalidImage("data URL is not base64".to_string()))?;
        if !mime.starts_with("image/") {
            return Err(ClientError::InvalidImage(format!("not an image: {mime}")));
        }
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ClientError::InvalidImage(format!("bad base64 payload: {e}")))?;
        check_size(bytes.len())?;
        Ok(Self {
            mime: mime.to_string(),
            data_url: data_url.to_string(),
            size: bytes.len(),
        })
    }

    /// Read and validate an image file
    pub async fn from_path(path: &Path) -> Result<Self, ClientError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        // Reject by type before reading a possibly large file
        if mime_for_extension(extension).is_none() {
            return Err(ClientError::InvalidImage(format!(
                "unsupported file type: {}",
                path.display()
            )));
        }
        let len = tokio::fs::metadata(path).await?.len();
        check_size(usize::try_from(len).unwrap_or(usize::MAX))?;
        let bytes = tokio::fs::read(path).await?;
        Self::from_bytes(&bytes, extension)
    }

    /// Mime type, e.g. `image/png`
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// The full data URL
    #[must_use]
    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// Decoded size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn check_size(size: usize) -> Result<(), ClientError> {
    if size == 0 {
        return Err(ClientError::InvalidImage("image is empty".to_string()));
    }
    if size > MAX_IMAGE_BYTES {
        return Err(ClientError::InvalidImage(format!(
            "image is {size} bytes, limit is {MAX_IMAGE_BYTES}"
        )));
    }
    Ok(())
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    file: &'a str,
    upload_preset: &'a str,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

/// Unsigned uploads to Cloudinary
pub struct CloudinaryUploader<T: HttpTransport> {
    config: CloudinaryConfig,
    api_base: String,
    transport: T,
}

impl<T: HttpTransport> CloudinaryUploader<T> {
    /// Create an uploader for `config`
    pub fn new(config: CloudinaryConfig, transport: T) -> Self {
        Self {
            config,
            api_base: CLOUDINARY_API.to_string(),
            transport,
        }
    }

    /// Point at a different API host
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Upload an image and return its `secure_url`
    pub async fn upload(&self, image: &ImageAttachment) -> Result<String, ClientError> {
        let url = format!(
            "{}/v1_1/{}/image/upload",
            self.api_base, self.config.cloud_name
        );
        let body = serde_json::to_vec(&UploadRequest {
            file: image.data_url(),
            upload_preset: &self.config.upload_preset,
        })?;

        tracing::debug!(url = %url, bytes = image.size(), "Uploading image");
        let response = self
            .transport
            .execute(HttpRequest {
                method: HttpMethod::Post,
                url,
                headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                body: Some(body),
            })
            .await?;
        if !response.is_success() {
            return Err(ClientError::status(response.status, &response.text()));
        }

        let parsed: UploadResponse = response.json()?;
        parsed
            .secure_url
            .ok_or_else(|| ClientError::UnexpectedResponse("upload returned no secure_url".to_string()))
    }
}
