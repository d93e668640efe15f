//! Vision Describer: downloads image attachments and asks the vision
//! model for a structured description. Per-image failures never stop the
//! message; they just contribute nothing to the document.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use scribe_core::types::AttachmentInfo;
use scribe_model::runtime::ModelRuntime;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const ALLOWED_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
];

const VISION_PROMPT: &str = "Describe this image for a searchable chat archive. \
Cover: the main subject, a one-paragraph description, notable details, any \
text visible in the image, and the likely context.";

/// True when the attachment's content type is an image kind we accept.
pub fn content_type_allowed(attachment: &AttachmentInfo) -> bool {
    attachment
        .content_type
        .as_deref()
        .is_some_and(|ct| ALLOWED_TYPES.contains(&ct))
}

/// True when a downloaded body fits under the size cap.
pub fn within_size_cap(len: u64, max_bytes: u64) -> bool {
    len <= max_bytes
}

pub struct VisionDescriber {
    client: reqwest::Client,
    runtime: Arc<dyn ModelRuntime>,
    vision_model: String,
    max_bytes: u64,
}

impl VisionDescriber {
    pub fn new(
        runtime: Arc<dyn ModelRuntime>,
        vision_model: impl Into<String>,
        max_bytes: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            runtime,
            vision_model: vision_model.into(),
            max_bytes,
        }
    }

    /// Describe every acceptable image attachment.
    ///
    /// Returns one description per attachment in order; rejected or failed
    /// images yield empty strings. When more than one image survives, each
    /// description gets a numbered prefix.
    pub async fn describe_all(&self, attachments: &[AttachmentInfo]) -> Vec<String> {
        let mut descriptions = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            descriptions.push(self.describe_one(attachment).await);
        }

        let survivors = descriptions.iter().filter(|d| !d.is_empty()).count();
        if survivors > 1 {
            let mut n = 0;
            for d in descriptions.iter_mut() {
                if !d.is_empty() {
                    n += 1;
                    *d = format!("Image {}: {}", n, d);
                }
            }
        }
        descriptions
    }

    async fn describe_one(&self, attachment: &AttachmentInfo) -> String {
        if !content_type_allowed(attachment) {
            debug!(
                filename = %attachment.filename,
                content_type = ?attachment.content_type,
                "attachment is not an accepted image type"
            );
            return String::new();
        }

        let bytes = match self.download(&attachment.url).await {
            Ok(b) => b,
            Err(e) => {
                warn!(filename = %attachment.filename, error = %e, "image download failed");
                return String::new();
            }
        };
        if !within_size_cap(bytes.len() as u64, self.max_bytes) {
            warn!(
                filename = %attachment.filename,
                size = bytes.len(),
                max = self.max_bytes,
                "image exceeds size cap, skipping"
            );
            return String::new();
        }

        match self
            .runtime
            .describe_image(&self.vision_model, &bytes, VISION_PROMPT)
            .await
        {
            Ok(description) => description.trim().to_string(),
            Err(e) => {
                warn!(filename = %attachment.filename, error = %e, "vision description failed");
                String::new()
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }

        // Reject early when the server declares an oversized body.
        if let Some(len) = response.content_length() {
            if !within_size_cap(len, self.max_bytes) {
                return Err(format!("declared length {} over cap", len));
            }
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| e.to_string())
    }
}
