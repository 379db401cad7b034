//! Toolbar bootstrap.
//!
//! Wires the host collaborators through the event hooks, reconciles the
//! preview session, then asks the session frame which preview is active.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ToolbarConfig;
use crate::cookies::{ExperimentCookie, PreviewCookie};
use crate::error::{Result, ToolbarError};
use crate::hooks::{Hooks, InterceptingFetcher, InterceptingNavigator, ToolbarEvent};
use crate::host::Host;
use crate::messenger::Messenger;
use crate::models::{PredictedDocument, SessionRef};
use crate::prediction::{self, PredictionQuery};
use crate::session::{Reconciler, Reconciliation};

/// Message the session frame sends with the raw session reference
pub const PREVIEW_MESSAGE: &str = "preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Startup {
    /// Reconciliation reloaded or navigated the page; nothing else ran
    Interrupted(Reconciliation),
    /// The toolbar is up with this session (possibly inactive)
    Ready(SessionRef),
}

pub struct Toolbar {
    config: ToolbarConfig,
    host: Host,
    hooks: Hooks,
    experiment: Mutex<Option<String>>,
    session: Mutex<SessionRef>,
}

impl Toolbar {
    /// Requests and navigations made through the returned toolbar's host
    /// produce [`ToolbarEvent`]s on [`Toolbar::hooks`].
    pub fn new(config: ToolbarConfig, host: Host) -> Self {
        let hooks = Hooks::default();
        let host = Host {
            fetcher: Arc::new(InterceptingFetcher::new(host.fetcher, hooks.clone())),
            navigator: Arc::new(InterceptingNavigator::new(host.navigator, hooks.clone())),
            ..host
        };
        Self {
            config,
            host,
            hooks,
            experiment: Mutex::new(None),
            session: Mutex::new(SessionRef::default()),
        }
    }

    pub fn config(&self) -> &ToolbarConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn session(&self) -> SessionRef {
        self.session.lock().unwrap().clone()
    }

    pub fn preview_cookie(&self) -> PreviewCookie {
        PreviewCookie::new(self.host.cookies.clone(), self.config.cookie_domain.clone())
    }

    pub fn experiment_cookie(&self) -> ExperimentCookie {
        ExperimentCookie::new(self.host.cookies.clone())
    }

    /// Register an experiment to start once the session is known. Empty ids
    /// are ignored.
    pub fn start_experiment(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        *self.experiment.lock().unwrap() = Some(id.to_string());
    }

    pub async fn start(&self) -> Result<Startup> {
        let outcome = Reconciler::new(self.config.clone(), self.host.clone(), self.hooks.clone())
            .run()
            .await;
        if outcome.is_terminal() {
            return Ok(Startup::Interrupted(outcome));
        }

        let session = self.fetch_session().await?;
        *self.session.lock().unwrap() = session.clone();
        if session.is_active() {
            // Kept for later loads whose session payload carries neither
            let cookie = self.preview_cookie();
            if session.url.is_some() {
                cookie.set_url(session.url.as_deref());
            }
            if session.track.is_some() {
                cookie.set_track(session.track.as_deref());
            }
        }
        if let Some(reference) = &session.reference {
            info!(reference = %reference, "preview session established");
            self.hooks.emit(ToolbarEvent::SessionEstablished {
                reference: reference.clone(),
            });
        }

        let experiment = self.experiment.lock().unwrap().clone();
        if let Some(id) = experiment {
            self.run_experiment(&id);
        }

        Ok(Startup::Ready(session))
    }

    async fn fetch_session(&self) -> Result<SessionRef> {
        let src = self.config.frame_src(&self.config.session_frame_url())?;
        let messenger = Messenger::open(src, self.host.dom.as_ref(), self.host.channel.clone())?;

        let data = match self.config.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, messenger.expect(PREVIEW_MESSAGE))
                .await
                .map_err(|_| ToolbarError::Timeout("preview message"))??,
            None => messenger.expect(PREVIEW_MESSAGE).await?,
        };
        debug!(?data, "session frame answered");

        Ok(match data {
            Value::String(raw) => SessionRef::parse(Some(&raw)),
            Value::Null => SessionRef::default(),
            other => {
                warn!(payload = %other, "unexpected session payload");
                SessionRef::default()
            }
        })
    }

    fn run_experiment(&self, id: &str) {
        let cookie = self.experiment_cookie();
        // An assignment for another experiment is stale
        if let Some(current) = cookie.get() {
            if current.split(' ').next() != Some(id) {
                debug!(current = %current, "dropping stale experiment assignment");
                cookie.delete();
            }
        }
        info!(experiment = %id, "experiment started");
        self.hooks.emit(ToolbarEvent::ExperimentStarted { id: id.to_string() });
    }

    /// Documents the current page was probably built from, best guess first.
    ///
    /// A session without its own url or tracking id falls back to the ones
    /// stored in the preview cookie by an earlier load.
    pub async fn predict(&self) -> Result<Vec<PredictedDocument>> {
        let page = self.host.navigator.location();
        let mut session = self.session();
        if session.is_active() {
            let cookie = self.preview_cookie();
            session.url = session.url.or_else(|| cookie.url());
            session.track = session.track.or_else(|| cookie.track());
        }
        let query = PredictionQuery::for_session(&session, &page);
        prediction::predict(self.host.fetcher.as_ref(), &self.config, &query, &page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Envelope, Location, Navigator};
    use crate::hooks::ToolbarEventKind;
    use crate::messenger::READY;
    use crate::sandbox::{FrameEvent, Sandbox};
    use crate::session::PREVIEW_REF_MESSAGE;
    use serde_json::json;
    use std::time::Duration;

    const BASE: &str = "https://repo.prismic.io";

    /// A CMS where the messenger reports `frame_ref` and the session frame
    /// reports `session`
    fn sandbox(frame_ref: Option<&'static str>, session: Value) -> Sandbox {
        let sb = Sandbox::new(Location::parse("https://site.test/blog?x=1").unwrap());
        sb.fetcher.respond(&format!("{}/previews/messenger", BASE), 200, "");
        sb.window.script_frame("/previews/messenger", move |event| match event {
            FrameEvent::Mounted => {
                let reference = frame_ref.map(Value::from).unwrap_or(Value::Null);
                vec![
                    Envelope::new(READY, Value::Null),
                    Envelope::new(PREVIEW_REF_MESSAGE, reference),
                ]
            }
            FrameEvent::Message(_) => vec![],
        });
        sb.window.script_frame("/previews/session/get", move |event| match event {
            FrameEvent::Mounted => vec![Envelope::new(PREVIEW_MESSAGE, session.clone())],
            FrameEvent::Message(_) => vec![],
        });
        sb
    }

    fn toolbar(sb: &Sandbox) -> Toolbar {
        let config = ToolbarConfig::from_endpoint(BASE, sb.window.location())
            .unwrap()
            .with_handshake_timeout(Duration::from_secs(5));
        Toolbar::new(config, sb.host())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_session() {
        let sb = sandbox(None, Value::Null);
        let tb = toolbar(&sb);
        let mut events = tb.hooks().on(ToolbarEventKind::SessionEstablished);

        let startup = tb.start().await.unwrap();
        assert_eq!(startup, Startup::Ready(SessionRef::default()));
        assert!(tokio::time::timeout(Duration::from_millis(10), events.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_session_emits_event() {
        let sb = sandbox(Some("R1"), json!("R1?track=t9"));
        PreviewCookie::new(sb.cookies.clone(), "repo.prismic.io").set_preview(Some("R1"));
        let tb = toolbar(&sb);
        let mut events = tb.hooks().on(ToolbarEventKind::SessionEstablished);

        let startup = tb.start().await.unwrap();
        let Startup::Ready(session) = startup else {
            panic!("expected the toolbar to start");
        };
        assert_eq!(session.reference.as_deref(), Some("R1"));
        assert_eq!(session.track.as_deref(), Some("t9"));
        assert_eq!(
            events.recv().await,
            Some(ToolbarEvent::SessionEstablished { reference: "R1".into() })
        );
        assert_eq!(tb.session(), session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_interrupts_startup() {
        let sb = sandbox(Some("new"), json!("new"));
        let tb = toolbar(&sb);
        tb.start_experiment("exp1");
        let mut events = tb.hooks().subscribe();

        let startup = tb.start().await.unwrap();
        assert!(matches!(startup, Startup::Interrupted(ref r) if r.is_terminal()));
        assert_eq!(sb.window.frame_for("/previews/session/get"), None);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert!(kinds.contains(&ToolbarEventKind::Reloading));
        assert!(!kinds.contains(&ToolbarEventKind::ExperimentStarted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_experiment_runs_after_session() {
        let sb = sandbox(None, Value::Null);
        let tb = toolbar(&sb);
        tb.experiment_cookie().set("other", "1");
        tb.start_experiment("");
        tb.start_experiment("exp1");
        let mut events = tb.hooks().on(ToolbarEventKind::ExperimentStarted);

        tb.start().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ToolbarEvent::ExperimentStarted { id: "exp1".into() })
        );
        assert_eq!(tb.experiment_cookie().get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_go_through_hooks() {
        let sb = sandbox(None, Value::Null);
        let tb = toolbar(&sb);
        let mut requests = tb.hooks().on(ToolbarEventKind::BeforeRequest);

        tb.start().await.unwrap();
        assert_eq!(
            requests.recv().await,
            Some(ToolbarEvent::BeforeRequest { url: format!("{}/previews/messenger", BASE) })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_predict_uses_session() {
        let sb = sandbox(None, json!("R2?url=https%3A%2F%2Fsite.test%2Fother"));
        sb.fetcher.respond(
            &format!("{}/toolbar/predict", BASE),
            200,
            json!({ "documents": [{ "id": "d1", "url": "/app/d1?c=release" }] }).to_string(),
        );
        let tb = toolbar(&sb);
        tb.start().await.unwrap();

        let docs = tb.predict().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].url, "https://repo.prismic.io/app/d1?c=release");
        assert!(sb.fetcher.requests().contains(
            &"https://repo.prismic.io/toolbar/predict?url=https%3A%2F%2Fsite.test%2Fother&ref=R2"
                .to_string()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_frame_times_out() {
        let sb = Sandbox::new(Location::parse("https://site.test/").unwrap());
        sb.fetcher.respond(&format!("{}/previews/messenger", BASE), 404, "");
        let tb = toolbar(&sb);
        assert!(matches!(tb.start().await, Err(ToolbarError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_url_and_track_are_stored() {
        let sb = sandbox(None, json!("R1?url=https%3A%2F%2Fsite.test%2Fa&track=t9"));
        let tb = toolbar(&sb);
        tb.start().await.unwrap();

        let cookie = tb.preview_cookie();
        assert_eq!(cookie.url().as_deref(), Some("https://site.test/a"));
        assert_eq!(cookie.track().as_deref(), Some("t9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predict_falls_back_to_stored_track() {
        let sb = sandbox(None, json!("R2"));
        sb.fetcher
            .respond(&format!("{}/toolbar/predict", BASE), 200, r#"{"documents":[]}"#);
        let tb = toolbar(&sb);
        tb.preview_cookie().set_track(Some("t0"));
        tb.start().await.unwrap();

        tb.predict().await.unwrap();
        let expected = "https://repo.prismic.io/toolbar/predict?\
                        url=https%3A%2F%2Fsite.test%2Fblog%3Fx%3D1&ref=R2&track=t0";
        assert!(sb.fetcher.requests().contains(&expected.to_string()));
    }
}
