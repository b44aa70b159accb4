use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::RegexBuilder;
use relay_conversations::ConversationManager;
use relay_messages::{Message, MessageStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sanitize::sanitize_query;

/// Candidate pool bound when filters force in-memory evaluation.
const FILTER_CANDIDATE_CAP: usize = 1000;
/// Context-window radius around the target message.
const CONTEXT_RADIUS_SECS: i64 = 300;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("message store error: {0}")]
    Messages(#[from] relay_messages::MessageError),

    #[error("conversation store error: {0}")]
    Conversations(#[from] relay_conversations::ConversationError),
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default, rename = "q")]
    pub query: String,
    #[serde(default)]
    pub page: usize,
    pub size: Option<usize>,
    /// Case-insensitive substring over the sender display name.
    pub sender: Option<String>,
    /// Inclusive lower bound (whole day, UTC).
    pub from: Option<NaiveDate>,
    /// Exclusive upper bound at `to` + 24 h.
    pub to: Option<NaiveDate>,
    pub has_media: Option<bool>,
}

impl SearchRequest {
    fn has_filters(&self) -> bool {
        self.sender.is_some() || self.from.is_some() || self.to.is_some() || self.has_media.is_some()
    }

    fn page_size(&self) -> usize {
        self.size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub message: Message,
    /// Content with case-insensitive query occurrences wrapped in
    /// `<mark>…</mark>`.
    pub highlighted: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub page: usize,
    pub size: usize,
}

pub struct SearchService {
    messages: Arc<MessageStore>,
    conversations: Arc<ConversationManager>,
}

impl SearchService {
    pub fn new(messages: Arc<MessageStore>, conversations: Arc<ConversationManager>) -> Self {
        Self {
            messages,
            conversations,
        }
    }

    /// Search one conversation. A viewer without access gets an empty
    /// page, not an error.
    pub fn search(
        &self,
        conversation_id: &str,
        viewer: &str,
        request: &SearchRequest,
    ) -> Result<SearchPage> {
        let size = request.page_size();
        let empty = SearchPage {
            hits: vec![],
            page: request.page,
            size,
        };

        if !self.conversations.has_access(viewer, conversation_id)? {
            return Ok(empty);
        }
        let query = sanitize_query(&request.query);
        if query.is_empty() {
            return Ok(empty);
        }

        let hits = if request.has_filters() {
            let candidates = self.candidates(conversation_id, &query, FILTER_CANDIDATE_CAP, 0)?;
            let filtered = apply_filters(candidates, request);
            filtered
                .into_iter()
                .skip(request.page * size)
                .take(size)
                .collect()
        } else {
            self.candidates(conversation_id, &query, size, request.page * size)?
        };

        let marker = highlight_regex(&query);
        Ok(SearchPage {
            hits: hits
                .into_iter()
                .map(|message| {
                    let highlighted = marker.replace_all(&message.content, "<mark>$0</mark>").into_owned();
                    SearchHit {
                        message,
                        highlighted,
                    }
                })
                .collect(),
            page: request.page,
            size,
        })
    }

    /// Messages within ±300 s of the target, ascending, trimmed to a
    /// window of `n` centered on the target. Viewers without access and
    /// unknown messages get an empty window.
    pub fn context(&self, message_id: &str, viewer: &str, n: usize) -> Result<Vec<Message>> {
        let Some(target) = self.messages.get(message_id)? else {
            return Ok(vec![]);
        };
        if n == 0 || !self.conversations.has_access(viewer, &target.conversation_id)? {
            return Ok(vec![]);
        }

        let center = DateTime::parse_from_rfc3339(&target.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let from = (center - Duration::seconds(CONTEXT_RADIUS_SECS)).to_rfc3339();
        let to = (center + Duration::seconds(CONTEXT_RADIUS_SECS)).to_rfc3339();

        let window = self
            .messages
            .list_window(&target.conversation_id, &from, &to)?;
        let Some(idx) = window.iter().position(|m| m.id == target.id) else {
            return Ok(vec![target]);
        };

        let mut start = idx.saturating_sub(n / 2);
        let end = window.len().min(start + n);
        if end - start < n {
            start = end.saturating_sub(n);
        }
        Ok(window[start..end].to_vec())
    }

    /// Index-first retrieval: FTS for ranked results, and on any backend
    /// error a literal-regex scan over the most recent messages.
    fn candidates(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        match self.messages.search_text(conversation_id, query, limit, offset) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                warn!(conversation_id, error = %e, "text index failed, regex fallback");
                let literal = highlight_regex(query);
                let scanned = self
                    .messages
                    .scan_conversation(conversation_id, FILTER_CANDIDATE_CAP)?;
                debug!(scanned = scanned.len(), "regex fallback scan");
                Ok(scanned
                    .into_iter()
                    .filter(|m| literal.is_match(&m.content))
                    .skip(offset)
                    .take(limit)
                    .collect())
            }
        }
    }
}

/// Case-insensitive literal matcher for the query; also drives
/// highlighting.
fn highlight_regex(query: &str) -> regex::Regex {
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .expect("escaped literal always compiles")
}

fn apply_filters(candidates: Vec<Message>, request: &SearchRequest) -> Vec<Message> {
    let sender = request.sender.as_ref().map(|s| s.to_lowercase());
    let from = request
        .from
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());
    // exclusive upper bound: start of the day after `to`
    let until = request
        .to
        .and_then(|d| d.succ_opt())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    candidates
        .into_iter()
        .filter(|m| {
            if let Some(ref needle) = sender {
                if !m.sender_name.to_lowercase().contains(needle) {
                    return false;
                }
            }
            if from.is_some() || until.is_some() {
                let Ok(created) = DateTime::parse_from_rfc3339(&m.created_at) else {
                    return false;
                };
                let created = created.with_timezone(&Utc);
                if from.is_some_and(|f| created < f) {
                    return false;
                }
                if until.is_some_and(|u| created >= u) {
                    return false;
                }
            }
            if let Some(wants_media) = request.has_media {
                let is_media = m.msg_type != "TEXT";
                if is_media != wants_media {
                    return false;
                }
            }
            true
        })
        .collect()
}
