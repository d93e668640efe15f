//! Processing Pipeline: per-message routing from raw platform messages to
//! stored vector records, with per-server ordering and failure policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use scribe_core::sink::{BatchReport, BatchSink};
use scribe_core::types::{FailurePolicy, RawMessage, ServerId};
use scribe_core::ScribeError;
use scribe_store::ServerConfigStore;
use scribe_vector::{ProcessedRecord, VectorStore};

use crate::error::PipelineError;
use crate::extract::{scan_urls, Extractor};
use crate::normalize::normalize;
use crate::vision::VisionDescriber;

/// Routing flags for one message.
#[derive(Debug, Clone, Copy)]
struct MessageClass {
    has_text: bool,
    has_images: bool,
    has_urls: bool,
    has_mentions: bool,
    is_empty: bool,
}

fn classify(message: &RawMessage) -> MessageClass {
    let has_text = !message.content.trim().is_empty();
    let has_images = message.attachments.iter().any(|a| a.is_image());
    let has_urls = !scan_urls(&message.content).is_empty();
    let has_mentions = !crate::extract::scan_user_mentions(&message.content).is_empty()
        || !crate::extract::scan_channel_mentions(&message.content).is_empty();
    MessageClass {
        has_text,
        has_images,
        has_urls,
        has_mentions,
        is_empty: !has_text && !has_images && !has_urls,
    }
}

enum Outcome {
    Stored,
    Skipped,
}

pub struct Pipeline {
    extractor: Extractor,
    vision: VisionDescriber,
    vectors: Arc<VectorStore>,
    configs: Arc<ServerConfigStore>,
    default_policy: FailurePolicy,
}

impl Pipeline {
    pub fn new(
        extractor: Extractor,
        vision: VisionDescriber,
        vectors: Arc<VectorStore>,
        configs: Arc<ServerConfigStore>,
        default_policy: FailurePolicy,
    ) -> Self {
        Self {
            extractor,
            vision,
            vectors,
            configs,
            default_policy,
        }
    }

    /// Process one batch of messages.
    ///
    /// Messages are grouped by server and committed oldest first within
    /// each group, so a server's collection always grows in timestamp
    /// order. A server whose policy is `Stop` halts on its first failed
    /// message; other servers in the batch are unaffected.
    pub async fn process(&self, messages: Vec<RawMessage>) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::default();
        let mut stop: Option<PipelineError> = None;

        for (server, mut group) in group_by_server(messages, &mut report) {
            if !self.configs.is_configured(&server) {
                warn!(server = %server, dropped = group.len(), "messages for unconfigured server dropped");
                report.dropped += group.len();
                continue;
            }

            group.sort_by_key(|m| m.created_utc().unwrap_or(DateTime::<Utc>::MIN_UTC));
            let policy = self.configs.policy_for(&server, self.default_policy);

            for message in group {
                match self.process_one(&server, &message).await {
                    Ok(Outcome::Stored) => report.stored += 1,
                    Ok(Outcome::Skipped) => report.skipped += 1,
                    Err(e) => match policy {
                        FailurePolicy::Skip => {
                            warn!(server = %server, message = %message.id, error = %e, "message failed, skipping");
                            report.dropped += 1;
                        }
                        FailurePolicy::Stop => {
                            // Halt this server's group; the rest of the
                            // batch belongs to other servers and proceeds.
                            if stop.is_none() {
                                stop = Some(PipelineError::PolicyStop {
                                    server: server.to_string(),
                                    source: Box::new(e),
                                });
                            }
                            break;
                        }
                    },
                }
            }
        }

        info!(
            stored = report.stored,
            skipped = report.skipped,
            dropped = report.dropped,
            "batch processed"
        );
        match stop {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn process_one(
        &self,
        server: &ServerId,
        message: &RawMessage,
    ) -> Result<Outcome, PipelineError> {
        let class = classify(message);
        if class.is_empty {
            debug!(message = %message.id, "empty message skipped");
            return Ok(Outcome::Skipped);
        }

        let normalized = normalize(message)?;
        let mut metadata = normalized.metadata;

        let extraction = if class.has_urls || class.has_mentions {
            self.extractor.extract(&message.content).await
        } else {
            Default::default()
        };

        let descriptions = if class.has_images {
            self.vision.describe_all(&message.attachments).await
        } else {
            Vec::new()
        };

        // A message that is nothing but links contributes no text of its
        // own: the document is exactly the joined summaries.
        let content_part =
            if class.has_urls && crate::extract::text_without_urls(&message.content).is_empty() {
                ""
            } else {
                message.content.as_str()
            };
        let document = build_document(content_part, &extraction.link_summaries, &descriptions);
        if document.is_empty() {
            debug!(message = %message.id, "nothing searchable survived processing");
            return Ok(Outcome::Skipped);
        }

        metadata.insert(
            "urls_found".to_string(),
            (!extraction.urls.is_empty()).to_string(),
        );
        metadata.insert(
            "has_link_summaries".to_string(),
            extraction.has_summaries().to_string(),
        );

        let record = ProcessedRecord {
            id: ProcessedRecord::record_id(message.id.as_str()),
            document,
            metadata,
            timestamp: normalized.timestamp,
        };
        self.vectors.upsert(server, &[record]).await?;
        Ok(Outcome::Stored)
    }
}

/// The searchable document: message text, link summaries and image
/// descriptions joined by blank lines, trimmed.
fn build_document(content: &str, summaries: &[String], descriptions: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let trimmed = content.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed);
    }
    parts.extend(summaries.iter().map(|s| s.trim()).filter(|s| !s.is_empty()));
    parts.extend(
        descriptions
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty()),
    );
    parts.join("\n\n")
}

fn group_by_server(
    messages: Vec<RawMessage>,
    report: &mut BatchReport,
) -> BTreeMap<ServerId, Vec<RawMessage>> {
    let mut groups: BTreeMap<ServerId, Vec<RawMessage>> = BTreeMap::new();
    for message in messages {
        match message.server.as_ref().map(|s| s.id.clone()) {
            Some(server) => groups.entry(server).or_default().push(message),
            None => {
                // Direct messages bypass indexing entirely.
                debug!(message = %message.id, "direct message not indexed");
                report.skipped += 1;
            }
        }
    }
    groups
}

#[async_trait]
impl BatchSink for Pipeline {
    async fn submit(
        &self,
        batch: Vec<RawMessage>,
        done: oneshot::Sender<Result<BatchReport, ScribeError>>,
    ) {
        let outcome = self.process(batch).await.map_err(ScribeError::from);
        if done.send(outcome).is_err() {
            warn!("batch completion receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_joins_parts_with_blank_lines() {
        let doc = build_document(
            "see https://x.test/a",
            &["Discusses logs.".to_string(), String::new()],
            &["Image 1: a cat".to_string()],
        );
        assert_eq!(doc, "see https://x.test/a\n\nDiscusses logs.\n\nImage 1: a cat");
    }

    #[test]
    fn url_only_content_contributes_no_text_part() {
        assert!(crate::extract::text_without_urls("https://x.test/a").is_empty());
        let doc = build_document("", &["Only summary.".to_string()], &[]);
        assert_eq!(doc, "Only summary.");
    }
}
