//! Extractor: URL and mention scanning plus per-link summarization.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use scribe_model::runtime::{ChatMessage, ChatOptions, ChatRequest, ModelRuntime};

use crate::web::WebFetcher;

/// Per-URL fetch deadline.
const WEB_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Page text is clipped to this before it is sent for summarization.
const MAX_SUMMARY_INPUT_CHARS: usize = 8_000;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize web pages shared in chat. \
Produce a short factual summary of the page content in at most three \
sentences. State only what the page says; do not speculate.";

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s<>]+").expect("static regex"))
}

fn user_mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<@!?(\d+)>").expect("static regex"))
}

fn channel_mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<#(\d+)>").expect("static regex"))
}

/// What the extractor found in one message.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub urls: Vec<String>,
    pub user_mentions: Vec<String>,
    pub channel_mentions: Vec<String>,
    /// One entry per URL, in order; failed fetches/summaries are empty.
    pub link_summaries: Vec<String>,
}

impl Extraction {
    pub fn has_summaries(&self) -> bool {
        self.link_summaries.iter().any(|s| !s.is_empty())
    }
}

/// Scan `text` for URLs, deduplicated preserving first occurrence.
pub fn scan_urls(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in url_regex().find_iter(text) {
        let url = m
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']'])
            .to_string();
        if !seen.contains(&url) {
            seen.push(url);
        }
    }
    seen
}

/// `text` with every URL removed; empty when the message was only links.
pub fn text_without_urls(text: &str) -> String {
    url_regex().replace_all(text, "").trim().to_string()
}

/// Scan `text` for the platform's user mention tokens.
pub fn scan_user_mentions(text: &str) -> Vec<String> {
    user_mention_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Scan `text` for the platform's channel mention tokens.
pub fn scan_channel_mentions(text: &str) -> Vec<String> {
    channel_mention_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

pub struct Extractor {
    web: Arc<dyn WebFetcher>,
    runtime: Arc<dyn ModelRuntime>,
    text_model: String,
    summary_token_budget: u32,
}

impl Extractor {
    pub fn new(
        web: Arc<dyn WebFetcher>,
        runtime: Arc<dyn ModelRuntime>,
        text_model: impl Into<String>,
        summary_token_budget: u32,
    ) -> Self {
        Self {
            web,
            runtime,
            text_model: text_model.into(),
            summary_token_budget,
        }
    }

    /// Scan the text and summarize every linked page.
    ///
    /// Never fails: a URL whose fetch or summary errors contributes an
    /// empty summary and the rest of the batch continues. Summaries run
    /// sequentially; messages rarely carry more than a few links.
    pub async fn extract(&self, text: &str) -> Extraction {
        let urls = scan_urls(text);
        let user_mentions = scan_user_mentions(text);
        let channel_mentions = scan_channel_mentions(text);

        let mut link_summaries = Vec::with_capacity(urls.len());
        for url in &urls {
            link_summaries.push(self.summarize_url(url).await);
        }

        Extraction {
            urls,
            user_mentions,
            channel_mentions,
            link_summaries,
        }
    }

    async fn summarize_url(&self, url: &str) -> String {
        let page = match self.web.fetch(url, WEB_FETCH_TIMEOUT).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(url, "page had no readable content");
                return String::new();
            }
            Err(e) => {
                warn!(url, error = %e, "web fetch failed");
                return String::new();
            }
        };

        let mut input = page;
        if input.len() > MAX_SUMMARY_INPUT_CHARS {
            let mut cut = MAX_SUMMARY_INPUT_CHARS;
            while !input.is_char_boundary(cut) {
                cut -= 1;
            }
            input.truncate(cut);
        }

        let request = ChatRequest {
            model: self.text_model.clone(),
            messages: vec![
                ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                ChatMessage::user(input),
            ],
            tools: Vec::new(),
            options: ChatOptions {
                temperature: Some(0.2),
                max_tokens: Some(self.summary_token_budget),
            },
        };

        match self.runtime.chat(&request).await {
            Ok(response) => response.content.trim().to_string(),
            Err(e) => {
                warn!(url, error = %e, "link summarization failed");
                String::new()
            }
        }
    }
}
