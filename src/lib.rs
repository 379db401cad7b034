//! Preview toolbar core.
//!
//! Keeps a site's preview cookie in sync with the CMS preview session, talks
//! to CMS-hosted frames over window messages, and guesses which documents the
//! current page was built from.
//!
//! The browsing context (cookies, frames, navigation, HTTP) is reached only
//! through the traits in [`host`]; [`sandbox`] provides in-memory versions.

pub mod config;
pub mod cookies;
pub mod error;
pub mod hooks;
pub mod host;
pub mod http;
pub mod messenger;
pub mod models;
pub mod prediction;
pub mod ranking;
pub mod sandbox;
pub mod session;
pub mod stub_server;
pub mod toolbar;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::ToolbarConfig;
pub use cookies::{ExperimentCookie, PreviewCookie, PreviewDocument};
pub use error::{ConfigError, Result, ToolbarError};
pub use hooks::{Hooks, ToolbarEvent, ToolbarEventKind};
pub use host::{Host, Location};
pub use messenger::Messenger;
pub use models::{PredictedDocument, SessionRef};
pub use ranking::Sorter;
pub use session::{Reconciler, Reconciliation, SessionState};
pub use toolbar::{Startup, Toolbar};

/// Env var with the stub CMS listen address
pub const STUB_ADDR_ENV: &str = "PREVIEW_STUB_ADDR";
pub const DEFAULT_STUB_ADDR: &str = "127.0.0.1:3000";
