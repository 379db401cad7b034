//! Toolbar configuration.
//!
//! The CMS endpoint is the one required input. It is normalized the same way
//! the hosted toolbar does it:
//! - CDN hosts (`*.cdn.prismic.io`) are rewritten to the API host
//! - Only the `scheme://host` prefix is kept as the base URL
//! - The bare host doubles as the editor tab name
//! - The host without its port is the cookie domain-key. Hosts that are not
//!   valid domain-keys (IP addresses, `localhost`) cannot hold a preview
//!   cookie; this is reported once here and reconciliation gives up on them.

use std::env;
use std::time::Duration;

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::cookies::is_domain_key;
use crate::error::ConfigError;
use crate::host::Location;

/// Env var holding the CMS API endpoint
pub const ENDPOINT_ENV: &str = "PRISMIC_ENDPOINT";

/// Env var holding the URL of the page the toolbar is running on
pub const PAGE_URL_ENV: &str = "PREVIEW_PAGE_URL";

/// Wait before the loading overlay starts fading in
pub const OVERLAY_FADE_DELAY: Duration = Duration::from_millis(200);

/// Hold after the fade so the transition is visible before navigation
pub const OVERLAY_HOLD: Duration = Duration::from_millis(1800);

#[derive(Debug, Clone)]
pub struct ToolbarConfig {
    /// `https://repo.prismic.io`
    pub base_url: String,
    /// `repo.prismic.io`, port included when the endpoint has one
    pub editor_tab: String,
    /// Preview cookie domain-key: the endpoint host without its port
    pub cookie_domain: String,
    pub location: Location,
    pub overlay_fade_delay: Duration,
    pub overlay_hold: Duration,
    /// Upper bound on waiting for the messenger frame. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

impl ToolbarConfig {
    pub fn from_endpoint(endpoint: &str, location: Location) -> Result<Self, ConfigError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }

        let endpoint = endpoint.replace(".cdn.prismic.io", ".prismic.io");
        let re = Regex::new(r"^https?://([^/]*)").expect("static regex");
        let caps = re
            .captures(&endpoint)
            .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.clone()))?;

        let host = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if host.is_empty() {
            return Err(ConfigError::InvalidEndpoint(endpoint.clone()));
        }
        let base_url = caps[0].to_string();

        // The prefix must itself be a usable URL, every endpoint is built on it
        let parsed =
            Url::parse(&base_url).map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))?;
        let cookie_domain = parsed.host_str().unwrap_or(host).to_string();
        if !is_domain_key(&cookie_domain) {
            warn!(
                domain = %cookie_domain,
                "CMS host is not a valid cookie domain-key, preview sessions will not persist"
            );
        }

        Ok(Self {
            base_url,
            editor_tab: host.to_string(),
            cookie_domain,
            location,
            overlay_fade_delay: OVERLAY_FADE_DELAY,
            overlay_hold: OVERLAY_HOLD,
            handshake_timeout: None,
        })
    }

    /// Build from `PRISMIC_ENDPOINT` and `PREVIEW_PAGE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = env::var(ENDPOINT_ENV).map_err(|_| ConfigError::MissingEndpoint)?;
        let page = env::var(PAGE_URL_ENV)
            .map_err(|_| ConfigError::InvalidLocation(format!("{} is not set", PAGE_URL_ENV)))?;
        Self::from_endpoint(&endpoint, Location::parse(&page)?)
    }

    /// Whether a preview ref can be stored for this CMS at all
    pub fn persists_sessions(&self) -> bool {
        is_domain_key(&self.cookie_domain)
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn with_overlay_timing(mut self, fade_delay: Duration, hold: Duration) -> Self {
        self.overlay_fade_delay = fade_delay;
        self.overlay_hold = hold;
        self
    }

    // ------------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------------

    pub fn messenger_url(&self) -> String {
        format!("{}/previews/messenger", self.base_url)
    }

    pub fn token_url(&self, session_id: &str) -> String {
        format!("{}/previews/token/{}", self.base_url, session_id)
    }

    pub fn loading_url(&self) -> String {
        format!("{}/previews/loading", self.base_url)
    }

    pub fn session_frame_url(&self) -> String {
        format!("{}/previews/session/get", self.base_url)
    }

    pub fn predict_url(&self, query: &str) -> String {
        format!("{}/toolbar/predict?{}", self.base_url, query)
    }

    /// Parsed form of an endpoint, for mounting frames
    pub fn frame_src(&self, endpoint: &str) -> Result<Url, ConfigError> {
        Url::parse(endpoint).map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Location {
        Location::parse("http://localhost:3000/fr-lu/page/foyer-voyage").unwrap()
    }

    #[test]
    fn test_endpoint_split() {
        let cfg =
            ToolbarConfig::from_endpoint("https://foyer-demo.prismic.io/api/v2", page()).unwrap();
        assert_eq!(cfg.base_url, "https://foyer-demo.prismic.io");
        assert_eq!(cfg.editor_tab, "foyer-demo.prismic.io");
        assert_eq!(cfg.cookie_domain, "foyer-demo.prismic.io");
        assert!(cfg.persists_sessions());
        assert_eq!(cfg.messenger_url(), "https://foyer-demo.prismic.io/previews/messenger");
        assert_eq!(
            cfg.token_url("abcdefgh12345678"),
            "https://foyer-demo.prismic.io/previews/token/abcdefgh12345678"
        );
    }

    #[test]
    fn test_cdn_endpoint_rewritten() {
        let cfg = ToolbarConfig::from_endpoint("https://repo.cdn.prismic.io/api", page()).unwrap();
        assert_eq!(cfg.base_url, "https://repo.prismic.io");
        assert_eq!(cfg.editor_tab, "repo.prismic.io");
    }

    #[test]
    fn test_missing_endpoint_is_fatal() {
        assert_eq!(
            ToolbarConfig::from_endpoint("  ", page()).unwrap_err(),
            ConfigError::MissingEndpoint
        );
    }

    #[test]
    fn test_malformed_endpoint_is_fatal() {
        assert!(matches!(
            ToolbarConfig::from_endpoint("ftp://repo.prismic.io", page()),
            Err(ConfigError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            ToolbarConfig::from_endpoint("https:///api", page()),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_cookie_domain_drops_port() {
        let cfg = ToolbarConfig::from_endpoint("http://repo.wroom.test:9000/api", page()).unwrap();
        assert_eq!(cfg.base_url, "http://repo.wroom.test:9000");
        assert_eq!(cfg.editor_tab, "repo.wroom.test:9000");
        assert_eq!(cfg.cookie_domain, "repo.wroom.test");
        assert!(cfg.persists_sessions());
    }

    #[test]
    fn test_ip_endpoint_cannot_persist_sessions() {
        let cfg = ToolbarConfig::from_endpoint("http://127.0.0.1:3000", page()).unwrap();
        assert_eq!(cfg.cookie_domain, "127.0.0.1");
        assert!(!cfg.persists_sessions());
    }

    #[test]
    fn test_defaults() {
        let cfg = ToolbarConfig::from_endpoint("http://repo.wroom.test", page()).unwrap();
        assert_eq!(cfg.overlay_fade_delay, OVERLAY_FADE_DELAY);
        assert_eq!(cfg.overlay_hold, OVERLAY_HOLD);
        assert!(cfg.handshake_timeout.is_none());
    }
}
