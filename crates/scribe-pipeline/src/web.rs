//! Web-fetch boundary: URL in, cleaned page text out.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::debug;

/// Cleaned page text is capped here before summarization.
const MAX_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("fetch failed: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("fetch timed out")]
    Timeout,
}

/// Contract consumed from the web content fetcher.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    /// Fetch `url` and return cleaned, readable text.
    async fn fetch(&self, url: &str, deadline: Duration) -> Result<String, WebError>;
}

/// reqwest + scraper implementation: strips script/style/nav chrome and
/// prefers the page's main content container.
pub struct HttpWebFetcher {
    client: reqwest::Client,
}

impl HttpWebFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; ScribeBot/0.1)")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpWebFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebFetcher for HttpWebFetcher {
    async fn fetch(&self, url: &str, deadline: Duration) -> Result<String, WebError> {
        let response = self
            .client
            .get(url)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebError::Timeout
                } else {
                    WebError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebError::Status(status.as_u16()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| WebError::Transport(e.to_string()))?;

        let content = clean_html(&html);
        debug!(url, chars = content.len(), "web page cleaned");
        Ok(content)
    }
}

/// Extract readable text: try main-content containers first, fall back to
/// `<body>`, collapse blank lines, truncate.
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut content = String::new();
    for selector_str in ["main", "article", "#content", ".content", "body"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                content = extract_text(element);
                if content.split_whitespace().count() > 100 || selector_str == "body" {
                    break;
                }
            }
        }
    }

    let mut cleaned = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.len() > MAX_CONTENT_CHARS {
        let mut cut = MAX_CONTENT_CHARS;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
        cleaned.push_str("\n...[truncated]");
    }
    cleaned
}

/// Recursive text extraction, skipping non-content elements.
fn extract_text(element: scraper::ElementRef) -> String {
    let mut text = String::new();
    for node in element.children() {
        if let Some(el) = scraper::ElementRef::wrap(node) {
            let tag = el.value().name();
            if matches!(
                tag,
                "script" | "style" | "nav" | "footer" | "header" | "aside" | "noscript" | "iframe"
            ) {
                continue;
            }
            text.push_str(&extract_text(el));
            if matches!(
                tag,
                "p" | "div" | "br" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
            ) {
                text.push('\n');
            }
        } else if let Some(text_node) = node.value().as_text() {
            text.push_str(text_node);
        }
    }
    text
}
