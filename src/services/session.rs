//! Live session: one subscriber and one reconciler bound to the current context.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use super::reconciler::{Reconciler, DEFAULT_TOAST_TTL};
use super::subscriber::{ChannelSubscriber, LinkStatus, Subscription, DEFAULT_PING_INTERVAL};
use crate::error::SyncResult;
use crate::models::ChannelContext;
use crate::transport::Connector;

/// Settings shared by every context a session opens.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub me: String,
    pub ping_interval: Duration,
    pub toast_ttl: Duration,
}

impl SessionOptions {
    pub fn new(me: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            ping_interval: DEFAULT_PING_INTERVAL,
            toast_ttl: DEFAULT_TOAST_TTL,
        }
    }
}

struct Bound {
    context: ChannelContext,
    reconciler: Reconciler,
    subscription: Subscription,
}

/// Switching context tears down the old connection and discards its reconciler state.
pub struct LiveSession {
    subscriber: ChannelSubscriber,
    options: SessionOptions,
    bound: Option<Bound>,
}

impl LiveSession {
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        let subscriber = ChannelSubscriber::new(connector).with_ping_interval(options.ping_interval);
        Self {
            subscriber,
            options,
            bound: None,
        }
    }

    /// Open `context` with a fresh reconciler. Fails if a different context is open.
    pub async fn open(&mut self, context: ChannelContext) -> SyncResult<Reconciler> {
        let live = *self.subscriber.status().borrow() == LinkStatus::Open;
        if let Some(bound) = &self.bound {
            if bound.context == context && live {
                return Ok(bound.reconciler.clone());
            }
        }

        // A link that is no longer open delivers nothing, so its reconciler can be detached
        // before the new link starts. An open one stays bound until the new open succeeds.
        let detached = match self.bound.take() {
            Some(old) if !live => {
                old.subscription.unsubscribe();
                Some((old.context, old.reconciler))
            }
            other => {
                self.bound = other;
                None
            }
        };

        let reconciler = Reconciler::builder(context.family_id.clone(), self.options.me.clone())
            .toast_ttl(self.options.toast_ttl)
            .build();
        let subscription = self.attach(&context, &reconciler);

        if let Err(e) = self.subscriber.open(context.clone()).await {
            subscription.unsubscribe();
            if let Some((context, reconciler)) = detached {
                let subscription = self.attach(&context, &reconciler);
                self.bound = Some(Bound {
                    context,
                    reconciler,
                    subscription,
                });
            }
            return Err(e);
        }
        if let Some(old) = self.bound.take() {
            old.subscription.unsubscribe();
        }
        debug!(context = %context, "session bound");
        self.bound = Some(Bound {
            context,
            reconciler: reconciler.clone(),
            subscription,
        });
        Ok(reconciler)
    }

    /// Route events for `context` into `reconciler`.
    fn attach(&self, context: &ChannelContext, reconciler: &Reconciler) -> Subscription {
        let target = reconciler.clone();
        let expected = context.clone();
        self.subscriber.on_event(move |ctx, event| {
            if ctx == &expected {
                target.apply(event);
            }
        })
    }

    /// Close whatever is open, then open `context`.
    pub async fn switch(&mut self, context: ChannelContext) -> SyncResult<Reconciler> {
        self.close();
        info!(context = %context, "switching context");
        self.open(context).await
    }

    /// Close the link and drop the reconciler. Idempotent.
    pub fn close(&mut self) {
        if let Some(bound) = self.bound.take() {
            bound.subscription.unsubscribe();
            debug!(context = %bound.context, "session unbound");
        }
        self.subscriber.close();
    }

    pub fn context(&self) -> Option<&ChannelContext> {
        self.bound.as_ref().map(|b| &b.context)
    }

    pub fn reconciler(&self) -> Option<&Reconciler> {
        self.bound.as_ref().map(|b| &b.reconciler)
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.subscriber.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reconciler::Change;
    use crate::transport::memory::MemoryConnector;
    use tokio::sync::broadcast;

    const NEW_M1: &str =
        r#"{"type":"new_message","message":{"id":"m1","chat_id":"c1","text":"hi"}}"#;

    async fn wait_messages(changes: &mut broadcast::Receiver<Change>, count: usize) {
        let mut seen = 0;
        while seen < count {
            if let Ok(Change::Messages { .. }) = changes.recv().await {
                seen += 1;
            }
        }
    }

    #[tokio::test]
    async fn frames_reach_bound_reconciler() {
        let connector = Arc::new(MemoryConnector::new());
        let mut session = LiveSession::new(connector.clone(), SessionOptions::new("kid"));
        let reconciler = session
            .open(ChannelContext::chat("f1", "c1").unwrap())
            .await
            .unwrap();
        let remote = connector.next_remote().await;
        assert_eq!(remote.context.path(), "/families/f1/chats/c1/ws");

        let mut changes = reconciler.changes();
        remote.push(NEW_M1);
        remote.push(NEW_M1);
        remote.push(r#"{"type":"message_edited","message":{"id":"m1","text":"hey"}}"#);
        // Insert and edit; the duplicate produces no change.
        wait_messages(&mut changes, 2).await;

        let msgs = reconciler.messages("c1");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "hey");
        assert!(msgs[0].edited);
    }

    #[tokio::test]
    async fn switch_discards_old_context() {
        let connector = Arc::new(MemoryConnector::new());
        let mut session = LiveSession::new(connector.clone(), SessionOptions::new("kid"));
        let first = session
            .open(ChannelContext::chat("f1", "c1").unwrap())
            .await
            .unwrap();
        let old_remote = connector.next_remote().await;

        let second = session
            .switch(ChannelContext::chat("f1", "c2").unwrap())
            .await
            .unwrap();
        let new_remote = connector.next_remote().await;
        assert_eq!(session.context().unwrap().chat_id.as_deref(), Some("c2"));

        let mut changes = second.changes();
        old_remote.push(NEW_M1);
        new_remote.push(r#"{"type":"new_message","message":{"id":"m2","chat_id":"c2","text":"yo"}}"#);
        wait_messages(&mut changes, 1).await;

        assert!(first.messages("c1").is_empty());
        assert!(second.messages("c1").is_empty());
        assert_eq!(second.messages("c2").len(), 1);
    }

    #[tokio::test]
    async fn open_while_other_context_open_fails_and_keeps_binding() {
        let connector = Arc::new(MemoryConnector::new());
        let mut session = LiveSession::new(connector.clone(), SessionOptions::new("kid"));
        session
            .open(ChannelContext::family("f1").unwrap())
            .await
            .unwrap();
        assert!(session
            .open(ChannelContext::family("f2").unwrap())
            .await
            .is_err());
        assert_eq!(session.context().unwrap().family_id, "f1");

        session.close();
        session.close();
        assert!(session.reconciler().is_none());
        assert_eq!(*session.status().borrow(), LinkStatus::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reopen_after_drop_detaches_old_reconciler_first() {
        let connector = Arc::new(MemoryConnector::new());
        let mut session = LiveSession::new(connector.clone(), SessionOptions::new("kid"));
        let context = ChannelContext::chat("f1", "c1").unwrap();
        let first = session.open(context.clone()).await.unwrap();
        let mut status = session.status();
        drop(connector.next_remote().await);
        status.wait_for(|s| *s == LinkStatus::Dropped).await.unwrap();

        // Dispatched by the new link as soon as it starts, possibly before open returns.
        connector.queue_on_connect(NEW_M1);
        let second = session.open(context).await.unwrap();
        let _remote = connector.next_remote().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while second.messages("c1").is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(first.messages("c1").is_empty());
    }

    #[tokio::test]
    async fn failed_reopen_keeps_previous_binding() {
        let connector = Arc::new(MemoryConnector::new());
        let mut session = LiveSession::new(connector.clone(), SessionOptions::new("kid"));
        let context = ChannelContext::chat("f1", "c1").unwrap();
        session.open(context.clone()).await.unwrap();
        let mut status = session.status();
        drop(connector.next_remote().await);
        status.wait_for(|s| *s == LinkStatus::Dropped).await.unwrap();

        connector.refuse_next();
        assert!(session.open(context.clone()).await.is_err());
        assert_eq!(session.context(), Some(&context));
        assert!(session.reconciler().is_some());

        let reconciler = session.open(context).await.unwrap();
        let remote = connector.next_remote().await;
        let mut changes = reconciler.changes();
        remote.push(NEW_M1);
        wait_messages(&mut changes, 1).await;
        assert_eq!(reconciler.messages("c1").len(), 1);
    }
}
