//! In-memory browsing context.
//!
//! Implements every host trait without a browser: a path-aware cookie jar, a
//! window whose frames are driven by scripts, and a routing fetcher. Used by
//! the test-suite and handy for driving the toolbar from a plain binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_extra::extract::cookie::Cookie;
use tokio::sync::broadcast;
use url::Url;

use crate::error::{Result, ToolbarError};
use crate::host::{
    CookieStore, Dom, Envelope, FetchResponse, Fetcher, FrameId, FrameSpec, Host, Location,
    MessageChannel, Navigator, RequestOptions, WindowMessage,
};

/// A full in-memory host: one window, one cookie jar, one fetcher.
#[derive(Clone)]
pub struct Sandbox {
    pub window: Arc<SandboxWindow>,
    pub cookies: Arc<SandboxCookies>,
    pub fetcher: Arc<SandboxFetcher>,
}

impl Sandbox {
    pub fn new(location: Location) -> Self {
        Self {
            window: SandboxWindow::new(location),
            cookies: Arc::new(SandboxCookies::default()),
            fetcher: Arc::new(SandboxFetcher::default()),
        }
    }

    /// Same sandbox, but requests go to `fetcher` (e.g. a real HTTP client)
    pub fn host_with_fetcher(&self, fetcher: Arc<dyn Fetcher>) -> Host {
        Host {
            fetcher,
            cookies: self.cookies.clone(),
            channel: self.window.clone(),
            dom: self.window.clone(),
            navigator: self.window.clone(),
        }
    }

    pub fn host(&self) -> Host {
        self.host_with_fetcher(self.fetcher.clone())
    }
}

// ============================================================================
// Cookies
// ============================================================================

#[derive(Default)]
pub struct SandboxCookies {
    jar: Mutex<Vec<Cookie<'static>>>,
}

impl SandboxCookies {
    /// Path of the first cookie with this name
    pub fn path_of(&self, name: &str) -> Option<String> {
        self.paths_of(name).into_iter().next()
    }

    pub fn paths_of(&self, name: &str) -> Vec<String> {
        let jar = self.jar.lock().unwrap();
        jar.iter()
            .filter(|c| c.name() == name)
            .map(|c| c.path().unwrap_or("/").to_string())
            .collect()
    }
}

impl CookieStore for SandboxCookies {
    fn read(&self, name: &str) -> Option<String> {
        let jar = self.jar.lock().unwrap();
        jar.iter()
            .find(|c| c.name() == name)
            .map(|c| c.value().to_string())
    }

    fn write(&self, cookie: Cookie<'static>) {
        let mut jar = self.jar.lock().unwrap();
        jar.retain(|c| !(c.name() == cookie.name() && c.path() == cookie.path()));
        jar.push(cookie);
    }

    fn demolish(&self, name: &str) {
        self.jar.lock().unwrap().retain(|c| c.name() != name);
    }
}

// ============================================================================
// Window
// ============================================================================

/// What a scripted frame is reacting to.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Mounted,
    Message(Envelope),
}

/// Behaviour of a remote frame: every returned envelope is posted back to the
/// host window, synchronously, with the frame as source.
pub type FrameScript = Arc<dyn Fn(FrameEvent) -> Vec<Envelope> + Send + Sync>;

pub struct SandboxWindow {
    location: Mutex<Location>,
    messages: broadcast::Sender<WindowMessage>,
    scripts: Mutex<Vec<(String, FrameScript)>>,
    frames: Mutex<HashMap<FrameId, (FrameSpec, Option<FrameScript>)>>,
    next_frame: AtomicU64,
    posted: Mutex<Vec<(FrameId, Envelope)>>,
    opacity: Mutex<Vec<(FrameId, f32)>>,
    hrefs: Mutex<Vec<String>>,
    history: Mutex<Vec<HistoryEntry>>,
    reloads: AtomicUsize,
}

/// A same-document history change, as requested (possibly relative).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    Push(String),
    Replace(String),
}

impl SandboxWindow {
    pub fn new(location: Location) -> Arc<Self> {
        let (messages, _) = broadcast::channel(64);
        Arc::new(Self {
            location: Mutex::new(location),
            messages,
            scripts: Mutex::new(Vec::new()),
            frames: Mutex::new(HashMap::new()),
            next_frame: AtomicU64::new(1),
            posted: Mutex::new(Vec::new()),
            opacity: Mutex::new(Vec::new()),
            hrefs: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            reloads: AtomicUsize::new(0),
        })
    }

    /// Attach a script to every frame whose src path ends with `path_suffix`.
    pub fn script_frame<F>(&self, path_suffix: &str, script: F)
    where
        F: Fn(FrameEvent) -> Vec<Envelope> + Send + Sync + 'static,
    {
        self.scripts
            .lock()
            .unwrap()
            .push((path_suffix.to_string(), Arc::new(script)));
    }

    /// Deliver a message to the window as if `source` had posted it.
    pub fn deliver(&self, source: FrameId, envelope: Envelope) {
        // No receivers is fine: nobody is listening yet
        let _ = self.messages.send(WindowMessage { source, envelope });
    }

    pub fn frames(&self) -> Vec<(FrameId, FrameSpec)> {
        let frames = self.frames.lock().unwrap();
        let mut out: Vec<_> = frames.iter().map(|(id, (spec, _))| (*id, spec.clone())).collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn frame_for(&self, path_suffix: &str) -> Option<FrameId> {
        self.frames()
            .into_iter()
            .find(|(_, spec)| spec.src.path().ends_with(path_suffix))
            .map(|(id, _)| id)
    }

    pub fn posted(&self) -> Vec<(FrameId, Envelope)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn opacity_changes(&self) -> Vec<(FrameId, f32)> {
        self.opacity.lock().unwrap().clone()
    }

    pub fn hrefs(&self) -> Vec<String> {
        self.hrefs.lock().unwrap().clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().unwrap().clone()
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Resolve `url` against the current location, like the history API does
    fn move_to(&self, url: &str) {
        let mut location = self.location.lock().unwrap();
        let resolved = Url::parse(&location.href()).and_then(|base| base.join(url));
        if let Ok(resolved) = resolved {
            *location = Location::from_url(&resolved);
        }
    }

    fn run_script(&self, frame: FrameId, script: Option<FrameScript>, event: FrameEvent) {
        if let Some(script) = script {
            for reply in script(event) {
                self.deliver(frame, reply);
            }
        }
    }
}

#[async_trait]
impl Dom for SandboxWindow {
    fn mount_frame(&self, spec: FrameSpec) -> Result<FrameId> {
        let id = FrameId(self.next_frame.fetch_add(1, Ordering::SeqCst));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(suffix, _)| spec.src.path().ends_with(suffix.as_str()))
            .map(|(_, s)| s.clone());
        self.frames
            .lock()
            .unwrap()
            .insert(id, (spec, script.clone()));
        self.run_script(id, script, FrameEvent::Mounted);
        Ok(id)
    }

    fn set_opacity(&self, frame: FrameId, opacity: f32) -> Result<()> {
        if !self.frames.lock().unwrap().contains_key(&frame) {
            return Err(ToolbarError::Protocol(format!("no frame {:?}", frame)));
        }
        self.opacity.lock().unwrap().push((frame, opacity));
        Ok(())
    }

    async fn dom_ready(&self) {}
}

impl MessageChannel for SandboxWindow {
    fn subscribe(&self) -> broadcast::Receiver<WindowMessage> {
        self.messages.subscribe()
    }

    fn post(&self, target: FrameId, envelope: Envelope) -> Result<()> {
        let script = match self.frames.lock().unwrap().get(&target) {
            Some((_, script)) => script.clone(),
            None => return Err(ToolbarError::Protocol(format!("no frame {:?}", target))),
        };
        self.posted.lock().unwrap().push((target, envelope.clone()));
        self.run_script(target, script, FrameEvent::Message(envelope));
        Ok(())
    }
}

impl Navigator for SandboxWindow {
    fn location(&self) -> Location {
        self.location.lock().unwrap().clone()
    }

    fn set_href(&self, href: &str) {
        self.hrefs.lock().unwrap().push(href.to_string());
        if let Ok(url) = Url::parse(href) {
            *self.location.lock().unwrap() = Location::from_url(&url);
        }
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    fn push_state(&self, url: &str) {
        self.history
            .lock()
            .unwrap()
            .push(HistoryEntry::Push(url.to_string()));
        self.move_to(url);
    }

    fn replace_state(&self, url: &str) {
        self.history
            .lock()
            .unwrap()
            .push(HistoryEntry::Replace(url.to_string()));
        self.move_to(url);
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Answers requests from a prefix routing table; unrouted URLs fail as
/// network errors.
#[derive(Default)]
pub struct SandboxFetcher {
    routes: Mutex<Vec<(String, std::result::Result<FetchResponse, String>)>>,
    requests: Mutex<Vec<String>>,
}

impl SandboxFetcher {
    pub fn respond(&self, prefix: &str, status: u16, body: impl Into<String>) {
        self.routes.lock().unwrap().push((
            prefix.to_string(),
            Ok(FetchResponse {
                status,
                body: body.into(),
            }),
        ));
    }

    pub fn fail(&self, prefix: &str, reason: &str) {
        self.routes
            .lock()
            .unwrap()
            .push((prefix.to_string(), Err(reason.to_string())));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for SandboxFetcher {
    async fn get(&self, url: &str, _options: RequestOptions) -> Result<FetchResponse> {
        self.requests.lock().unwrap().push(url.to_string());
        let routes = self.routes.lock().unwrap();
        let best = routes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        match best {
            Some((_, Ok(response))) => Ok(response.clone()),
            Some((_, Err(reason))) => Err(ToolbarError::Network(reason.clone())),
            None => Err(ToolbarError::Network(format!("no route for {}", url))),
        }
    }
}
