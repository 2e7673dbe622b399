//! Channel subscriber: one live connection per context, frame decoding, liveness pings.

use futures::{SinkExt, StreamExt};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::lock;
use crate::error::{SyncError, SyncResult};
use crate::models::{decode_frame, ChannelContext, FrameError, InboundEvent, PING};
use crate::transport::{Connection, Connector};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Callback invoked once per decoded event, in transport order.
pub type EventHandler = Arc<dyn Fn(&ChannelContext, &InboundEvent) + Send + Sync>;

/// State of the subscriber's link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Never opened, or closed by the caller.
    Closed,
    Open,
    /// Ended by the peer or a transport error. No retry happens here.
    Dropped,
}

#[derive(Default)]
struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, EventHandler)>>,
}

impl HandlerRegistry {
    fn add(&self, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers).push((id, handler));
        id
    }

    fn remove(&self, id: u64) {
        lock(&self.handlers).retain(|(handler_id, _)| *handler_id != id);
    }

    fn get(&self, id: u64) -> Option<EventHandler> {
        lock(&self.handlers)
            .iter()
            .find(|(handler_id, _)| *handler_id == id)
            .map(|(_, h)| h.clone())
    }

    /// Call every registered handler while `generation` is still the gate's value.
    ///
    /// Each call runs under the gate lock, so once `close` has bumped the generation no
    /// handler of the old link is running or will start. Membership is re-checked per
    /// handler so an unsubscribe made mid-dispatch is honoured. The handler list is not
    /// locked during a call: a handler may unsubscribe itself.
    fn dispatch(
        &self,
        gate: &Mutex<u64>,
        generation: u64,
        context: &ChannelContext,
        event: &InboundEvent,
    ) -> bool {
        if *lock(gate) != generation {
            return false;
        }
        let ids: Vec<u64> = lock(&self.handlers).iter().map(|(id, _)| *id).collect();
        for id in ids {
            let current = lock(gate);
            if *current != generation {
                return false;
            }
            let Some(handler) = self.get(id) else {
                continue;
            };
            if panic::catch_unwind(AssertUnwindSafe(|| handler(context, event))).is_err() {
                warn!(context = %context, kind = event.kind(), handler = id, "event handler panicked");
            }
        }
        true
    }
}

/// Registration returned by [`ChannelSubscriber::on_event`].
#[must_use = "the handler stays registered until `unsubscribe` is called"]
pub struct Subscription {
    id: u64,
    registry: Weak<HandlerRegistry>,
}

impl Subscription {
    /// Remove the handler. Takes effect before the next frame is dispatched.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

struct ActiveLink {
    context: ChannelContext,
    task: JoinHandle<()>,
}

/// Owns at most one live connection. Frames from a closed link never reach handlers.
pub struct ChannelSubscriber {
    connector: Arc<dyn Connector>,
    ping_interval: Duration,
    handlers: Arc<HandlerRegistry>,
    /// Current link generation, bumped on every open and close. A link dispatches and
    /// reports status only while holding this lock with its own generation current.
    gate: Arc<Mutex<u64>>,
    status: Arc<watch::Sender<LinkStatus>>,
    active: Option<ActiveLink>,
}

impl ChannelSubscriber {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(LinkStatus::Closed);
        Self {
            connector,
            ping_interval: DEFAULT_PING_INTERVAL,
            handlers: Arc::new(HandlerRegistry::default()),
            gate: Arc::new(Mutex::new(0)),
            status: Arc::new(status),
            active: None,
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Register a handler for decoded events.
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChannelContext, &InboundEvent) + Send + Sync + 'static,
    {
        let id = self.handlers.add(Arc::new(handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.handlers),
        }
    }

    /// Connect for `context` and start pinging.
    ///
    /// Opening the context that is already open is a no-op. Opening a different context
    /// while a link is open fails: call [`close`](Self::close) first.
    pub async fn open(&mut self, context: ChannelContext) -> SyncResult<()> {
        if let Some(active) = &self.active {
            let live = *self.status.borrow() == LinkStatus::Open && !active.task.is_finished();
            if live {
                if active.context == context {
                    return Ok(());
                }
                return Err(SyncError::InvalidContext(format!(
                    "channel already open for {}; close it before opening {}",
                    active.context, context
                )));
            }
        }
        self.close();

        let connection = self.connector.connect(&context).await?;
        let generation = {
            let mut current = lock(&self.gate);
            *current += 1;
            self.status.send_replace(LinkStatus::Open);
            *current
        };
        let link = Link {
            context: context.clone(),
            generation,
            gate: self.gate.clone(),
            handlers: self.handlers.clone(),
            status: self.status.clone(),
        };
        let task = tokio::spawn(run_link(link, connection, self.ping_interval));
        info!(context = %context, "channel opened");
        self.active = Some(ActiveLink { context, task });
        Ok(())
    }

    /// Terminate the link and its pings. Idempotent.
    ///
    /// Waits for a handler call already in progress on the old link; after this returns
    /// no event from that link reaches a handler.
    pub fn close(&mut self) {
        let mut current = lock(&self.gate);
        if let Some(active) = self.active.take() {
            *current += 1;
            active.task.abort();
            info!(context = %active.context, "channel closed");
        }
        self.status.send_if_modified(|status| {
            let changed = *status != LinkStatus::Closed;
            *status = LinkStatus::Closed;
            changed
        });
    }

    /// Context of the current link, open or dropped.
    pub fn context(&self) -> Option<&ChannelContext> {
        self.active.as_ref().map(|a| &a.context)
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }
}

impl Drop for ChannelSubscriber {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            *lock(&self.gate) += 1;
            active.task.abort();
        }
    }
}

struct Link {
    context: ChannelContext,
    generation: u64,
    gate: Arc<Mutex<u64>>,
    handlers: Arc<HandlerRegistry>,
    status: Arc<watch::Sender<LinkStatus>>,
}

impl Link {
    /// False once the link has been superseded.
    fn handle_frame(&self, text: &str) -> bool {
        match decode_frame(text) {
            Ok(event) => {
                trace!(context = %self.context, kind = event.kind(), "event");
                self.handlers
                    .dispatch(&self.gate, self.generation, &self.context, &event)
            }
            Err(FrameError::Pong) => {
                trace!(context = %self.context, "pong");
                true
            }
            Err(e) => {
                debug!(context = %self.context, error = %e, "dropping frame");
                true
            }
        }
    }

    fn mark_dropped(&self, outcome: SyncResult<()>) {
        let current = lock(&self.gate);
        if *current != self.generation {
            return;
        }
        match outcome {
            Ok(()) => info!(context = %self.context, "channel closed by server"),
            Err(e) => warn!(context = %self.context, error = %e, "channel dropped"),
        }
        self.status.send_replace(LinkStatus::Dropped);
    }
}

async fn run_link(link: Link, mut connection: Connection, ping_interval: Duration) {
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome: SyncResult<()> = loop {
        tokio::select! {
            _ = ping.tick() => {
                if let Err(e) = connection.sink.send(PING.to_string()).await {
                    break Err(e);
                }
                trace!(context = %link.context, "ping");
            }
            frame = connection.stream.next() => match frame {
                Some(Ok(text)) => {
                    if !link.handle_frame(&text) {
                        return;
                    }
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
        }
    };
    link.mark_dropped(outcome);
}
