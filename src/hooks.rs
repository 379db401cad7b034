//! Toolbar event hooks.
//!
//! Other toolbar parts react to requests, navigations and focus changes
//! through a [`Hooks`] handle. Requests and navigations only produce events
//! when they go through the intercepting adapters below, which wrap a host
//! collaborator by composition.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::Result;
use crate::host::{FetchResponse, Fetcher, Location, Navigator, RequestOptions};

#[derive(Debug, Clone, PartialEq)]
pub enum ToolbarEvent {
    BeforeRequest { url: String },
    AfterRequest { url: String, status: Option<u16> },
    HistoryChange { url: String },
    ActiveTab(bool),
    SessionEstablished { reference: String },
    ExperimentStarted { id: String },
    Reloading { reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolbarEventKind {
    BeforeRequest,
    AfterRequest,
    HistoryChange,
    ActiveTab,
    SessionEstablished,
    ExperimentStarted,
    Reloading,
}

impl ToolbarEvent {
    pub fn kind(&self) -> ToolbarEventKind {
        match self {
            ToolbarEvent::BeforeRequest { .. } => ToolbarEventKind::BeforeRequest,
            ToolbarEvent::AfterRequest { .. } => ToolbarEventKind::AfterRequest,
            ToolbarEvent::HistoryChange { .. } => ToolbarEventKind::HistoryChange,
            ToolbarEvent::ActiveTab(_) => ToolbarEventKind::ActiveTab,
            ToolbarEvent::SessionEstablished { .. } => ToolbarEventKind::SessionEstablished,
            ToolbarEvent::ExperimentStarted { .. } => ToolbarEventKind::ExperimentStarted,
            ToolbarEvent::Reloading { .. } => ToolbarEventKind::Reloading,
        }
    }
}

#[derive(Clone)]
pub struct Hooks {
    sender: broadcast::Sender<ToolbarEvent>,
}

impl Hooks {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: ToolbarEvent) {
        trace!(?event, "toolbar event");
        // Emitting with nobody subscribed is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToolbarEvent> {
        self.sender.subscribe()
    }

    /// Subscription that only yields events of one kind
    pub fn on(&self, kind: ToolbarEventKind) -> KindSubscription {
        KindSubscription {
            kind,
            rx: self.subscribe(),
        }
    }

    /// Window focus/blur
    pub fn focus_changed(&self, focused: bool) {
        self.emit(ToolbarEvent::ActiveTab(focused));
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new(64)
    }
}

pub struct KindSubscription {
    kind: ToolbarEventKind,
    rx: broadcast::Receiver<ToolbarEvent>,
}

impl KindSubscription {
    /// Next matching event, or `None` once every emitter is gone
    pub async fn recv(&mut self) -> Option<ToolbarEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.kind() == self.kind => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// Interception adapters
// ============================================================================

pub struct InterceptingFetcher<F> {
    inner: F,
    hooks: Hooks,
}

impl<F: Fetcher> InterceptingFetcher<F> {
    pub fn new(inner: F, hooks: Hooks) -> Self {
        Self { inner, hooks }
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for InterceptingFetcher<F> {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<FetchResponse> {
        if !options.emit_events {
            return self.inner.get(url, options).await;
        }
        self.hooks.emit(ToolbarEvent::BeforeRequest {
            url: url.to_string(),
        });
        let response = self.inner.get(url, options).await;
        self.hooks.emit(ToolbarEvent::AfterRequest {
            url: url.to_string(),
            status: response.as_ref().ok().map(|r| r.status),
        });
        response
    }
}

pub struct InterceptingNavigator<N> {
    inner: N,
    hooks: Hooks,
}

impl<N: Navigator> InterceptingNavigator<N> {
    pub fn new(inner: N, hooks: Hooks) -> Self {
        Self { inner, hooks }
    }
}

impl<N: Navigator> Navigator for InterceptingNavigator<N> {
    fn location(&self) -> Location {
        self.inner.location()
    }

    fn set_href(&self, href: &str) {
        self.inner.set_href(href);
        self.hooks.emit(ToolbarEvent::HistoryChange {
            url: href.to_string(),
        });
    }

    fn reload(&self) {
        self.inner.reload();
    }

    fn push_state(&self, url: &str) {
        self.inner.push_state(url);
        self.hooks.emit(ToolbarEvent::HistoryChange {
            url: url.to_string(),
        });
    }

    fn replace_state(&self, url: &str) {
        self.inner.replace_state(url);
        self.hooks.emit(ToolbarEvent::HistoryChange {
            url: url.to_string(),
        });
    }
}
