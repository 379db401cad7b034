//! Local stand-in for the CMS preview endpoints.
//!
//! Serves just enough of the CMS for toolbar development and end-to-end
//! tests: the messenger page, the legacy token exchange and predictions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::models::PredictedDocument;

/// Length of a legacy session id
pub const SESSION_ID_LEN: usize = 16;

#[derive(Default)]
pub struct StubState {
    sessions: Mutex<HashMap<String, String>>,
    catalogue: Mutex<Vec<PredictedDocument>>,
}

impl StubState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a legacy preview session; returns `(session id, ref)`
    pub fn open_session(&self) -> (String, String) {
        let mut rng = rand::thread_rng();
        let id: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        let reference: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), reference.clone());
        info!(session_id = %id, "stub preview session opened");
        (id, reference)
    }

    pub fn add_document(&self, document: PredictedDocument) {
        self.catalogue.lock().unwrap().push(document);
    }

    fn lookup(&self, session_id: &str) -> Option<String> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }
}

pub fn router(state: Arc<StubState>) -> Router {
    Router::new()
        .route("/previews/messenger", get(messenger))
        .merge(legacy_router(state))
}

/// A CMS that predates the messenger endpoint
pub fn legacy_router(state: Arc<StubState>) -> Router {
    Router::new()
        .route("/previews/token/{session_id}", get(token))
        .route("/toolbar/predict", get(predict))
        .with_state(state)
}

async fn messenger() -> Html<&'static str> {
    Html("<!doctype html><title>preview messenger</title>")
}

async fn token(
    Path(session_id): Path<String>,
    State(state): State<Arc<StubState>>,
) -> Response {
    if session_id.len() != SESSION_ID_LEN {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.lookup(&session_id) {
        Some(reference) => Json(json!({ "ref": reference })).into_response(),
        None => {
            debug!(session_id = %session_id, "unknown preview session");
            (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown session" }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    url: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    track: Option<String>,
}

async fn predict(
    Query(params): Query<PredictParams>,
    State(state): State<Arc<StubState>>,
) -> Json<serde_json::Value> {
    debug!(
        url = ?params.url,
        reference = ?params.reference,
        track = ?params.track,
        "prediction requested"
    );
    let documents = state.catalogue.lock().unwrap().clone();
    Json(json!({ "documents": documents }))
}
