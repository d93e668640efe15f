//! Search Tool: semantic query against one server's collection.
//!
//! The tool is constructed bound to a single server id, so cross-server
//! leakage is impossible by construction.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use scribe_core::types::ServerId;
use scribe_model::runtime::{ToolCall, ToolDefinition};
use scribe_vector::{SearchHit, VectorStore};

use crate::tool_loop::ToolExecutor;

/// Hits are capped here regardless of what the model asks for.
const MAX_RESULTS: usize = 15;
const DEFAULT_RESULTS: usize = 5;
/// Characters of each document shown in a result excerpt.
const EXCERPT_CHARS: usize = 300;

pub struct SearchTool {
    vectors: Arc<VectorStore>,
    server: ServerId,
}

impl SearchTool {
    pub fn new(vectors: Arc<VectorStore>, server: ServerId) -> Self {
        Self { vectors, server }
    }

    /// Run a search and format the hits as a text block for the model.
    pub async fn search(&self, query: &str, limit: usize) -> String {
        let limit = limit.clamp(1, MAX_RESULTS);
        let hits = match self.vectors.query(&self.server, query, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(server = %self.server, error = %e, "search failed");
                return "Search is unavailable right now.".to_string();
            }
        };
        debug!(server = %self.server, query, hits = hits.len(), "search ran");

        if hits.is_empty() {
            return "No matching messages found.".to_string();
        }

        let mut out = String::new();
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format_hit(i + 1, hit));
            out.push('\n');
        }
        out
    }
}

fn format_hit(rank: usize, hit: &SearchHit) -> String {
    let author = hit
        .metadata
        .get("author_name")
        .map(String::as_str)
        .unwrap_or("Unknown");
    let channel = hit
        .metadata
        .get("channel_name")
        .map(String::as_str)
        .unwrap_or("?");
    let timestamp = hit
        .metadata
        .get("timestamp")
        .map(String::as_str)
        .unwrap_or("");

    let mut excerpt = hit.document.replace('\n', " ");
    if excerpt.len() > EXCERPT_CHARS {
        let mut cut = EXCERPT_CHARS;
        while !excerpt.is_char_boundary(cut) {
            cut -= 1;
        }
        excerpt.truncate(cut);
        excerpt.push('…');
    }

    format!(
        "{rank}. [#{channel}] {author} ({timestamp}, relevance {:.3}): {excerpt}",
        hit.score
    )
}

#[async_trait]
impl ToolExecutor for SearchTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "search_messages".to_string(),
            description: "Semantic search over this server's indexed message history. \
                          Returns the most relevant messages with author, channel and time."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (1-15)",
                        "minimum": 1,
                        "maximum": MAX_RESULTS
                    }
                },
                "required": ["query"]
            }),
        }]
    }

    async fn execute(&self, call: &ToolCall) -> String {
        if call.name != "search_messages" {
            return format!("unknown tool: {}", call.name);
        }
        let query = call.arguments["query"].as_str().unwrap_or_default();
        if query.is_empty() {
            return "search_messages requires a non-empty query".to_string();
        }
        let limit = call.arguments["limit"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_RESULTS);
        self.search(query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn hit_formatting_includes_author_channel_time_and_excerpt() {
        let mut metadata = BTreeMap::new();
        metadata.insert("author_name".to_string(), "Ada".to_string());
        metadata.insert("channel_name".to_string(), "general".to_string());
        metadata.insert(
            "timestamp".to_string(),
            "2024-01-01T00:00:00+00:00".to_string(),
        );
        let hit = SearchHit {
            document: "see the\nlogs".to_string(),
            metadata,
            score: 0.912,
        };
        let line = format_hit(1, &hit);
        assert!(line.contains("[#general]"));
        assert!(line.contains("Ada"));
        assert!(line.contains("2024-01-01T00:00:00+00:00"));
        assert!(line.contains("see the logs"));
        assert!(line.contains("0.912"));
    }

    #[test]
    fn long_documents_are_truncated_in_the_excerpt() {
        let hit = SearchHit {
            document: "x".repeat(1000),
            metadata: BTreeMap::new(),
            score: 0.5,
        };
        let line = format_hit(2, &hit);
        assert!(line.len() < 500);
        assert!(line.contains('…'));
    }
}
