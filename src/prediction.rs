//! Document prediction: which CMS documents is this page built from?
//!
//! The CMS returns candidates seen alongside the current page; they are
//! ranked locally, best guess first:
//! - most recently updated
//! - seen on the fewest URLs, then in the fewest queries
//! - singletons before repeatable types
//! - lowest priority number
//! - slug found in the query string, then the hash, then the path

use tracing::{debug, warn};

use crate::config::ToolbarConfig;
use crate::error::{Result, ToolbarError};
use crate::host::{Fetcher, Location, RequestOptions};
use crate::models::{PredictResponse, PredictedDocument, SessionRef};
use crate::ranking::Sorter;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredictionQuery {
    pub url: Option<String>,
    pub reference: Option<String>,
    pub track: Option<String>,
}

impl PredictionQuery {
    pub fn for_session(session: &SessionRef, page: &Location) -> Self {
        Self {
            url: session.url.clone().or_else(|| Some(page.href())),
            reference: session.reference.clone(),
            track: session.track.clone(),
        }
    }

    /// `url=..&ref=..&track=..`, absent fields left out
    pub fn to_query_string(&self) -> String {
        [
            ("url", &self.url),
            ("ref", &self.reference),
            ("track", &self.track),
        ]
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .map(|v| format!("{}={}", key, urlencoding::encode(v)))
        })
        .collect::<Vec<_>>()
        .join("&")
    }
}

/// Rank candidates for the given page, best match first.
pub fn rank_documents(
    documents: Vec<PredictedDocument>,
    page: &Location,
) -> Vec<PredictedDocument> {
    Sorter::new()
        .max(|d: &PredictedDocument| d.updated)
        .min(|d: &PredictedDocument| d.urls.len())
        .min(|d: &PredictedDocument| d.query_total)
        .is(|d: &PredictedDocument| d.singleton)
        .min(|d: &PredictedDocument| d.priority)
        .found_in(PredictedDocument::slug_pattern, page.search.clone())
        .found_in(PredictedDocument::slug_pattern, page.hash.clone())
        .found_in(PredictedDocument::slug_pattern, page.pathname.clone())
        .rank(documents)
}

/// Fetch predictions for `query` and rank them against `page`.
///
/// Edit links are made absolute against the CMS base URL.
pub async fn predict(
    fetcher: &dyn Fetcher,
    config: &ToolbarConfig,
    query: &PredictionQuery,
    page: &Location,
) -> Result<Vec<PredictedDocument>> {
    let url = config.predict_url(&query.to_query_string());
    let response = fetcher.get(&url, RequestOptions::default()).await?;
    if !response.is_ok() {
        warn!(status = response.status, "prediction request failed");
        return Err(ToolbarError::Status(response.status));
    }

    let documents: Vec<PredictedDocument> = response
        .json::<PredictResponse>()?
        .documents
        .into_iter()
        .map(|doc| doc.normalize(&config.base_url))
        .collect();
    debug!(count = documents.len(), "predicted documents");

    Ok(rank_documents(documents, page))
}
