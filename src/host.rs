//! Seams to the browsing context the toolbar runs in.
//!
//! The core never touches a page directly. A host (a real browser binding, the
//! in-memory [`crate::sandbox`], ...) supplies these collaborators and the
//! toolbar composes them.

use async_trait::async_trait;
use axum_extra::extract::cookie::Cookie;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use url::Url;

use crate::error::{ConfigError, Result};

// ============================================================================
// Location
// ============================================================================

/// Snapshot of the page location, split the way `window.location` splits it.
///
/// `search` keeps its leading `?` and `hash` its leading `#`; both are empty
/// strings when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub origin: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl Location {
    pub fn parse(href: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(href).map_err(|e| ConfigError::InvalidLocation(e.to_string()))?;
        Ok(Self::from_url(&url))
    }

    pub fn from_url(url: &Url) -> Self {
        let search = match url.query() {
            Some(q) if !q.is_empty() => format!("?{}", q),
            _ => String::new(),
        };
        let hash = match url.fragment() {
            Some(f) if !f.is_empty() => format!("#{}", f),
            _ => String::new(),
        };
        Self {
            origin: url.origin().ascii_serialization(),
            pathname: url.path().to_string(),
            search,
            hash,
        }
    }

    pub fn href(&self) -> String {
        format!("{}{}{}{}", self.origin, self.pathname, self.search, self.hash)
    }

    /// Host part of the origin (`repo.prismic.io` for `https://repo.prismic.io`)
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.origin)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// When false the interception layer stays silent for this request
    pub emit_events: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { emit_events: true }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// `fetch`-like request primitive. Non-2xx answers are returned, not raised.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<FetchResponse>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<FetchResponse> {
        (**self).get(url, options).await
    }
}

// ============================================================================
// Cookies
// ============================================================================

pub trait CookieStore: Send + Sync {
    /// Value of the cookie visible from the current page, if any
    fn read(&self, name: &str) -> Option<String>;
    fn write(&self, cookie: Cookie<'static>);
    /// Remove the named cookie at every path it was set on
    fn demolish(&self, name: &str);
}

// ============================================================================
// Frames and messages
// ============================================================================

/// Opaque handle for a frame mounted through [`Dom::mount_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

/// The `{ type, data }` payload exchanged over postMessage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// A message as seen by the window-level listener.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub source: FrameId,
    pub envelope: Envelope,
}

pub trait MessageChannel: Send + Sync {
    /// Every message delivered to the host window from now on
    fn subscribe(&self) -> broadcast::Receiver<WindowMessage>;
    /// postMessage into the given frame's content window
    fn post(&self, target: FrameId, envelope: Envelope) -> Result<()>;
}

// ============================================================================
// DOM and navigation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// 1x1, invisible, no pointer events
    Hidden,
    /// Full-viewport, topmost, starts fully transparent
    Overlay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSpec {
    pub src: Url,
    pub kind: FrameKind,
}

#[async_trait]
pub trait Dom: Send + Sync {
    fn mount_frame(&self, spec: FrameSpec) -> Result<FrameId>;
    fn set_opacity(&self, frame: FrameId, opacity: f32) -> Result<()>;
    /// Resolves once the document body is available
    async fn dom_ready(&self);
}

pub trait Navigator: Send + Sync {
    fn location(&self) -> Location;
    fn set_href(&self, href: &str);
    fn reload(&self);
    /// Same-document history entry (`history.pushState`)
    fn push_state(&self, url: &str);
    /// Replace the current history entry (`history.replaceState`)
    fn replace_state(&self, url: &str);
}

impl<T: Navigator + ?Sized> Navigator for Arc<T> {
    fn location(&self) -> Location {
        (**self).location()
    }

    fn set_href(&self, href: &str) {
        (**self).set_href(href)
    }

    fn reload(&self) {
        (**self).reload()
    }

    fn push_state(&self, url: &str) {
        (**self).push_state(url)
    }

    fn replace_state(&self, url: &str) {
        (**self).replace_state(url)
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Every collaborator the toolbar needs from its browsing context.
#[derive(Clone)]
pub struct Host {
    pub fetcher: Arc<dyn Fetcher>,
    pub cookies: Arc<dyn CookieStore>,
    pub channel: Arc<dyn MessageChannel>,
    pub dom: Arc<dyn Dom>,
    pub navigator: Arc<dyn Navigator>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_split() {
        let loc = Location::parse("https://example.com:8080/fr/page?x=1#top").unwrap();
        assert_eq!(loc.origin, "https://example.com:8080");
        assert_eq!(loc.pathname, "/fr/page");
        assert_eq!(loc.search, "?x=1");
        assert_eq!(loc.hash, "#top");
        assert_eq!(loc.href(), "https://example.com:8080/fr/page?x=1#top");
        assert_eq!(loc.host().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_location_empty_parts() {
        let loc = Location::parse("http://localhost/").unwrap();
        assert_eq!(loc.search, "");
        assert_eq!(loc.hash, "");
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env: Envelope = serde_json::from_str(r#"{"type":"previewRef","data":"abc"}"#).unwrap();
        assert_eq!(env.kind, "previewRef");
        assert_eq!(env.data, Value::String("abc".into()));

        let close: Envelope = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert_eq!(close.data, Value::Null);
    }

    #[test]
    fn test_fetch_response_ok_range() {
        let ok = FetchResponse { status: 204, body: String::new() };
        let missing = FetchResponse { status: 404, body: String::new() };
        assert!(ok.is_ok());
        assert!(!missing.is_ok());
    }
}
