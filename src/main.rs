//! Stub CMS server for local preview toolbar development.
//!
//! Serves the preview endpoints the toolbar core talks to:
//!
//! - `GET /previews/messenger`: messenger page
//! - `GET /previews/token/{sessionId}`: legacy session token exchange
//! - `GET /toolbar/predict`: document predictions

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use preview_toolbar::models::PredictedDocument;
use preview_toolbar::stub_server::{self, StubState};
use preview_toolbar::{DEFAULT_STUB_ADDR, STUB_ADDR_ENV};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = StubState::new();
    for document in sample_catalogue() {
        state.add_document(document);
    }
    let (session_id, reference) = state.open_session();

    let addr = env::var(STUB_ADDR_ENV).unwrap_or_else(|_| DEFAULT_STUB_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", addr, e));

    info!("Stub CMS running at http://{}", addr);
    info!(
        "Legacy preview link: <page>#prismic-session={} (ref {})",
        session_id, reference
    );

    axum::serve(listener, stub_server::router(state))
        .await
        .expect("Server error");
}

fn sample_catalogue() -> Vec<PredictedDocument> {
    let now = chrono::Utc::now().timestamp_millis();
    serde_json::from_value(serde_json::json!([
        {
            "id": "home", "title": "Home", "updated": now, "singleton": true,
            "url": "/app/documents/home/ref?c=release", "urls": ["/"], "slug": "^/$"
        },
        {
            "id": "post-1", "title": "First post", "updated": now - 60_000,
            "url": "/app/documents/post-1/ref?c=unclassified", "urls": ["/blog/first-post"],
            "queryTotal": 2, "slug": "first-post"
        }
    ]))
    .expect("static catalogue")
}
