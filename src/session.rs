//! Preview session reconciliation.
//!
//! Runs once per page load and lines the preview cookie up with the session
//! the CMS knows about:
//!
//! | frame ref | cookie ref     | action                                      |
//! |-----------|----------------|---------------------------------------------|
//! | none      | none           | nothing                                     |
//! | none      | some           | close remote session, delete cookie, reload |
//! | some      | none           | loading overlay, write cookie, reload       |
//! | some      | same           | nothing                                     |
//! | some      | different      | loading overlay, overwrite cookie, reload   |
//!
//! CMS deployments without the messenger endpoint fall back to the legacy
//! flow: a signed session id in the URL hash is exchanged for a ref.
//!
//! Reconciliation never fails from the page's point of view. Errors are
//! logged and the load proceeds without a session. A reload or navigation is
//! only issued once the cookie holds what the next load will compare against;
//! a write the cookie store dropped abandons the pass instead.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ToolbarConfig;
use crate::cookies::PreviewCookie;
use crate::error::{Result, ToolbarError};
use crate::hooks::{Hooks, ToolbarEvent};
use crate::host::{FrameKind, FrameSpec, Host, RequestOptions};
use crate::messenger::Messenger;
use crate::models::TokenResponse;

/// Message the messenger frame sends with the CMS-side preview ref
pub const PREVIEW_REF_MESSAGE: &str = "previewRef";

/// Message asking the messenger frame to end the CMS-side session
pub const CLOSE_MESSAGE: &str = "close";

static LEGACY_SESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#(([^~]+)~)?prismic-session=([-_a-zA-Z0-9]{16})").expect("static regex")
});

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    CookieOnly,
    FrameOnly,
    BothAgree,
    BothDisagree,
    Legacy,
}

impl SessionState {
    pub fn classify(frame: Option<&str>, cookie: Option<&str>) -> Self {
        match (frame, cookie) {
            (None, None) => SessionState::NoSession,
            (None, Some(_)) => SessionState::CookieOnly,
            (Some(_), None) => SessionState::FrameOnly,
            (Some(f), Some(c)) if f == c => SessionState::BothAgree,
            (Some(_), Some(_)) => SessionState::BothDisagree,
        }
    }
}

/// How a reconciliation pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing to change; the page keeps running
    Settled(SessionState),
    /// A reload was issued. Terminal for this page lifetime.
    Reloaded { state: SessionState, reason: &'static str },
    /// The page was sent to a new URL. Terminal for this page lifetime.
    Navigated { state: SessionState, href: String },
    /// Something failed; logged, and the load proceeds without a session
    Abandoned { state: SessionState, reason: String },
}

impl Reconciliation {
    /// True when the page is going away and no further toolbar logic may run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Reconciliation::Reloaded { .. } | Reconciliation::Navigated { .. }
        )
    }

    pub fn state(&self) -> SessionState {
        match self {
            Reconciliation::Settled(state)
            | Reconciliation::Reloaded { state, .. }
            | Reconciliation::Navigated { state, .. }
            | Reconciliation::Abandoned { state, .. } => *state,
        }
    }
}

fn log_session_error(reason: &str) {
    error!("[prismic.io] Unable to access to preview session: {}", reason);
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler {
    config: ToolbarConfig,
    host: Host,
    cookie: PreviewCookie,
    hooks: Hooks,
}

impl Reconciler {
    pub fn new(config: ToolbarConfig, host: Host, hooks: Hooks) -> Self {
        let cookie = PreviewCookie::new(host.cookies.clone(), config.cookie_domain.clone());
        Self {
            config,
            host,
            cookie,
            hooks,
        }
    }

    pub fn cookie(&self) -> &PreviewCookie {
        &self.cookie
    }

    pub async fn run(&self) -> Reconciliation {
        self.cookie.fix_path();

        let legacy = self.is_legacy().await;
        self.host.dom.dom_ready().await;

        let outcome = if legacy {
            self.legacy_setup().await
        } else {
            self.reconcile().await
        };
        info!(?outcome, "preview session reconciled");
        outcome
    }

    /// A CMS without the messenger endpoint only speaks the legacy protocol
    async fn is_legacy(&self) -> bool {
        match self
            .host
            .fetcher
            .get(&self.config.messenger_url(), RequestOptions::default())
            .await
        {
            Ok(response) => !response.is_ok(),
            Err(err) => {
                debug!(%err, "messenger check failed, using legacy session flow");
                true
            }
        }
    }

    async fn reconcile(&self) -> Reconciliation {
        let messenger = match self.open_messenger() {
            Ok(messenger) => messenger,
            Err(err) => {
                warn!(%err, "could not mount messenger frame");
                return Reconciliation::Abandoned {
                    state: SessionState::NoSession,
                    reason: err.to_string(),
                };
            }
        };

        let (frame_ref, cookie_ref) =
            tokio::join!(self.frame_reference(&messenger), async { self.cookie.preview() });

        let frame_ref = match frame_ref {
            Ok(frame_ref) => frame_ref,
            Err(err) => {
                warn!(%err, "no preview ref from messenger frame");
                return Reconciliation::Abandoned {
                    state: SessionState::classify(None, cookie_ref.as_deref()),
                    reason: err.to_string(),
                };
            }
        };

        let state = SessionState::classify(frame_ref.as_deref(), cookie_ref.as_deref());
        debug!(?state, ?frame_ref, ?cookie_ref, "session references compared");

        match (state, frame_ref) {
            (SessionState::CookieOnly, _) => {
                if let Err(err) = messenger.notify(CLOSE_MESSAGE, Value::Null) {
                    warn!(%err, "could not ask the CMS to close the preview session");
                }
                if let Err(reason) = self.store_preview(None) {
                    return self.unpersisted(state, reason);
                }
                self.reload(state, "preview session ended")
            }
            (SessionState::FrameOnly | SessionState::BothDisagree, Some(reference)) => {
                if !self.config.persists_sessions() {
                    return self.unpersisted(state, "cookie domain-key is invalid");
                }
                self.display_loading().await;
                if let Err(reason) = self.store_preview(Some(&reference)) {
                    return self.unpersisted(state, reason);
                }
                self.reload(state, "preview session changed")
            }
            _ => Reconciliation::Settled(state),
        }
    }

    /// Write this repository's preview ref (or drop it with `None`) and read
    /// it back.
    fn store_preview(&self, reference: Option<&str>) -> std::result::Result<(), &'static str> {
        self.cookie.set_preview(reference);
        if self.cookie.preview().as_deref() == reference {
            Ok(())
        } else {
            Err("preview cookie write was dropped")
        }
    }

    fn unpersisted(&self, state: SessionState, reason: &'static str) -> Reconciliation {
        warn!(
            domain = %self.cookie.domain(),
            reason,
            "preview cookie not updated, skipping reload"
        );
        Reconciliation::Abandoned {
            state,
            reason: reason.to_string(),
        }
    }

    fn open_messenger(&self) -> Result<Messenger> {
        let src = self.config.frame_src(&self.config.messenger_url())?;
        Messenger::open(src, self.host.dom.as_ref(), self.host.channel.clone())
    }

    async fn frame_reference(&self, messenger: &Messenger) -> Result<Option<String>> {
        let data = match self.config.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, messenger.expect(PREVIEW_REF_MESSAGE))
                .await
                .map_err(|_| ToolbarError::Timeout("previewRef message"))??,
            None => messenger.expect(PREVIEW_REF_MESSAGE).await?,
        };
        Ok(data.as_str().filter(|s| !s.is_empty()).map(str::to_string))
    }

    fn reload(&self, state: SessionState, reason: &'static str) -> Reconciliation {
        info!(reason, "reloading page");
        self.hooks.emit(ToolbarEvent::Reloading { reason });
        self.host.navigator.reload();
        Reconciliation::Reloaded { state, reason }
    }

    /// Full-page loading overlay: mount transparent, wait, fade in, hold.
    ///
    /// Always runs to completion; failures only cost the visual transition.
    pub async fn display_loading(&self) {
        let mounted = self
            .config
            .frame_src(&self.config.loading_url())
            .map_err(ToolbarError::from)
            .and_then(|src| {
                self.host.dom.mount_frame(FrameSpec {
                    src,
                    kind: FrameKind::Overlay,
                })
            });

        sleep(self.config.overlay_fade_delay).await;
        match mounted {
            Ok(frame) => {
                if let Err(err) = self.host.dom.set_opacity(frame, 1.0) {
                    warn!(%err, "could not fade in loading overlay");
                }
            }
            Err(err) => warn!(%err, "could not mount loading overlay"),
        }
        sleep(self.config.overlay_hold).await;
    }

    // ------------------------------------------------------------------------
    // Legacy flow
    // ------------------------------------------------------------------------

    async fn legacy_setup(&self) -> Reconciliation {
        let state = SessionState::Legacy;
        let location = self.host.navigator.location();

        let Some(caps) = LEGACY_SESSION.captures(&location.hash) else {
            return Reconciliation::Settled(state);
        };
        let session_id = caps[3].to_string();
        debug!(session_id = %session_id, "legacy preview session in hash");

        let reference = match self.exchange_token(&session_id).await {
            Ok(reference) => reference,
            Err(reason) => {
                log_session_error(reason);
                return Reconciliation::Abandoned {
                    state,
                    reason: reason.to_string(),
                };
            }
        };

        self.cookie.close();
        if self.store_preview(Some(&reference)).is_err() {
            let reason = "Preview cookie could not be written";
            log_session_error(reason);
            return Reconciliation::Abandoned {
                state,
                reason: reason.to_string(),
            };
        }
        self.hooks.emit(ToolbarEvent::SessionEstablished {
            reference: reference.clone(),
        });

        let updated_hash = LEGACY_SESSION.replace(&location.hash, "$2").into_owned();
        let href = format!(
            "{}{}{}{}",
            location.origin,
            location.pathname,
            location.search,
            if updated_hash.is_empty() {
                String::new()
            } else {
                format!("#{}", updated_hash)
            }
        );
        self.host.navigator.set_href(&href);

        if updated_hash.is_empty() {
            // Dropping the fragment entirely is a full navigation already
            Reconciliation::Navigated { state, href }
        } else {
            // A fragment-only change does not reload by itself
            self.reload(state, "legacy preview session")
        }
    }

    async fn exchange_token(&self, session_id: &str) -> std::result::Result<String, &'static str> {
        let response = self
            .host
            .fetcher
            .get(&self.config.token_url(session_id), RequestOptions::default())
            .await
            .map_err(|_| "Invalid server response")?;
        if !response.is_ok() {
            return Err("Invalid server response");
        }
        let token: TokenResponse = response.json().map_err(|_| "Invalid server response")?;
        token
            .reference
            .filter(|r| !r.is_empty())
            .ok_or("Session id isn't valid")
    }
}
