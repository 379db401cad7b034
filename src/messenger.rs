//! Request/response over postMessage with one hidden frame.
//!
//! A [`Messenger`] mounts an invisible frame, listens to every window message
//! whose source is that frame, and turns `{ type, data }` replies into awaited
//! values.
//!
//! Listeners are one-shot and keyed by message type. While a `post("foo", ..)`
//! is waiting, a second `post("foo", ..)` still sends its message but fails
//! at once with [`ToolbarError::ListenerBusy`]; the first caller receives the
//! reply. The error stands in for a second listener that would never resolve,
//! so same-type calls are reported, not serialized.
//! A message nobody is waiting for is kept (latest per type) until an
//! [`Messenger::expect`] claims it; `post` discards it.
//! Nothing here times out: a frame that never answers leaves the future
//! pending, so callers wrap it with `tokio::time::timeout` when they care.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Result, ToolbarError};
use crate::host::{Dom, Envelope, FrameId, FrameKind, FrameSpec, MessageChannel, WindowMessage};

/// Lifecycle message a frame sends once its own listener is installed
pub const READY: &str = "ready";

#[derive(Default)]
struct Inbox {
    listeners: HashMap<String, oneshot::Sender<Value>>,
    unclaimed: HashMap<String, Value>,
}

type Listeners = Arc<Mutex<Inbox>>;

pub struct Messenger {
    frame: FrameId,
    channel: Arc<dyn MessageChannel>,
    listeners: Listeners,
    ready: Shared<BoxFuture<'static, ()>>,
    dispatcher: JoinHandle<()>,
}

impl Messenger {
    /// Mount a hidden frame at `src` and start dispatching its messages.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(src: Url, dom: &dyn Dom, channel: Arc<dyn MessageChannel>) -> Result<Self> {
        // Subscribe before mounting so the frame's first message is never missed
        let inbox = channel.subscribe();
        let frame = dom.mount_frame(FrameSpec {
            src: src.clone(),
            kind: FrameKind::Hidden,
        })?;
        debug!(%src, ?frame, "messenger frame mounted");

        let listeners: Listeners = Arc::new(Mutex::new(Inbox::default()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(dispatch(frame, inbox, listeners.clone(), ready_tx));

        // A dispatcher that dies before "ready" leaves the gate closed forever
        let ready = async move {
            if ready_rx.await.is_err() {
                futures_util::future::pending::<()>().await;
            }
        }
        .boxed()
        .shared();

        Ok(Self {
            frame,
            channel,
            listeners,
            ready,
            dispatcher,
        })
    }

    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Resolves once the frame has announced itself
    pub async fn ready(&self) {
        self.ready.clone().await
    }

    /// Wait for an unsolicited message of type `kind` from the frame. One that
    /// already arrived unclaimed is returned right away.
    pub async fn expect(&self, kind: &str) -> Result<Value> {
        let rx = {
            let mut inbox = self.listeners.lock().unwrap();
            if let Some(value) = inbox.unclaimed.remove(kind) {
                return Ok(value);
            }
            Self::register(&mut inbox, kind)?
        };
        Self::await_reply(kind, rx).await
    }

    /// Send `{ type: kind, data }` once the frame is ready and wait for the
    /// frame's reply of the same type.
    pub async fn post(&self, kind: &str, data: Value) -> Result<Value> {
        self.ready().await;

        // The listener is in the table before the message leaves
        let registered = {
            let mut inbox = self.listeners.lock().unwrap();
            inbox.unclaimed.remove(kind);
            Self::register(&mut inbox, kind)
        };
        self.channel.post(self.frame, Envelope::new(kind, data))?;
        trace!(kind, frame = ?self.frame, "posted to frame");

        Self::await_reply(kind, registered?).await
    }

    /// Fire-and-forget, without waiting for the ready signal.
    pub fn notify(&self, kind: &str, data: Value) -> Result<()> {
        self.channel.post(self.frame, Envelope::new(kind, data))
    }

    fn register(inbox: &mut Inbox, kind: &str) -> Result<oneshot::Receiver<Value>> {
        if let Some(existing) = inbox.listeners.get(kind) {
            if !existing.is_closed() {
                warn!(kind, "listener already pending for this message type");
                return Err(ToolbarError::ListenerBusy(kind.to_string()));
            }
        }
        let (tx, rx) = oneshot::channel();
        inbox.listeners.insert(kind.to_string(), tx);
        Ok(rx)
    }

    async fn await_reply(kind: &str, rx: oneshot::Receiver<Value>) -> Result<Value> {
        rx.await.map_err(|_| {
            ToolbarError::Protocol(format!("message channel closed while waiting for `{}`", kind))
        })
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(
    frame: FrameId,
    mut inbox: broadcast::Receiver<WindowMessage>,
    listeners: Listeners,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    loop {
        let message = match inbox.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "messenger fell behind the window message stream");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if message.source != frame {
            continue;
        }

        let Envelope { kind, data } = message.envelope;
        if kind == READY {
            if let Some(tx) = ready.take() {
                debug!(?frame, "messenger frame ready");
                let _ = tx.send(());
            }
            continue;
        }

        let mut inbox = listeners.lock().unwrap();
        match inbox.listeners.remove(&kind) {
            Some(tx) => {
                if let Err(data) = tx.send(data) {
                    // The waiting future was dropped; keep the message around
                    inbox.unclaimed.insert(kind, data);
                }
            }
            None => {
                trace!(kind = %kind, "keeping unclaimed frame message");
                inbox.unclaimed.insert(kind, data);
            }
        }
    }
}
