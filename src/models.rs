//! Data models for the preview toolbar.
//!
//! Wire shapes exchanged with the CMS (prediction results, token exchange)
//! and the session payload delivered by the session frame.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

// ============================================================================
// Predicted Documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictedDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// Last update, epoch milliseconds
    #[serde(default)]
    pub updated: i64,
    /// Edit link. Relative on the wire, absolute after normalization.
    #[serde(default)]
    pub url: String,
    /// Every page URL this document was seen on
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub query_total: u64,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub priority: i64,
    /// Pattern matched against the page's query string, hash and path
    #[serde(default)]
    pub slug: String,
    #[serde(default, skip_deserializing)]
    pub status: Option<DocumentStatus>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Release,
    Experiment,
}

impl DocumentStatus {
    /// Status encoded in an edit link's `c=` parameter
    pub fn from_edit_url(url: &str) -> Option<Self> {
        if url.contains("c=unclassified") {
            Some(DocumentStatus::Draft)
        } else if url.contains("c=release") {
            Some(DocumentStatus::Release)
        } else if url.contains("c=variation") {
            Some(DocumentStatus::Experiment)
        } else {
            None
        }
    }
}

impl PredictedDocument {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.updated)
    }

    /// Compiled slug pattern; `None` when the slug is not a valid pattern
    pub fn slug_pattern(&self) -> Option<Regex> {
        Regex::new(&self.slug).ok()
    }

    /// Make the edit link absolute against `origin` and derive the status
    /// from the original relative link.
    pub fn normalize(mut self, origin: &str) -> Self {
        self.status = DocumentStatus::from_edit_url(&self.url);
        self.url = format!("{}{}", origin, self.url);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub documents: Vec<PredictedDocument>,
}

// ============================================================================
// Preview session
// ============================================================================

/// `GET /previews/token/{sessionId}` answer
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

/// Preview reference as carried by the session frame: the ref itself, with
/// the page URL, tracking id and cache breaker packed into its query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub url: Option<String>,
    pub track: Option<String>,
    pub breaker: Option<String>,
}

impl SessionRef {
    /// `"abc?url=https%3A%2F%2Fsite&track=t1"` -> ref `abc`, url, track
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return Self::default();
        };

        let (head, query) = match raw.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (raw, None),
        };
        let mut session = SessionRef {
            reference: Some(head.to_string()).filter(|h| !h.is_empty()),
            ..Default::default()
        };

        if let Some(query) = query {
            // Parse through a throwaway base so the url crate does the decoding
            if let Ok(parsed) = Url::parse(&format!("http://q.invalid/?{}", query)) {
                for (key, value) in parsed.query_pairs() {
                    let value = Some(value.into_owned()).filter(|v| !v.is_empty());
                    match key.as_ref() {
                        "url" => session.url = value,
                        "track" => session.track = value,
                        "breaker" => session.breaker = value,
                        _ => {}
                    }
                }
            }
        }
        session
    }

    pub fn is_active(&self) -> bool {
        self.reference.is_some()
    }
}
