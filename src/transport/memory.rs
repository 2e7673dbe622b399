//! In-memory connector for tests: each connect hands the far end to the test.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{Connection, Connector};
use crate::error::{SyncError, SyncResult};
use crate::models::ChannelContext;

/// Server side of one in-memory connection.
pub struct RemoteEnd {
    pub context: ChannelContext,
    inbound: mpsc::UnboundedSender<SyncResult<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    /// Deliver a text frame to the client. Ignored once the client side is gone.
    pub fn push(&self, frame: &str) {
        let _ = self.inbound.unbounded_send(Ok(frame.to_string()));
    }

    /// Next frame the client sent, `None` once the client side is gone.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.next().await
    }
}

pub struct MemoryConnector {
    connects: AtomicUsize,
    refuse_next: AtomicBool,
    /// Frames already waiting on the next connection when it is handed out.
    queued: std::sync::Mutex<Vec<String>>,
    remotes_tx: mpsc::UnboundedSender<RemoteEnd>,
    remotes_rx: Mutex<mpsc::UnboundedReceiver<RemoteEnd>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (remotes_tx, remotes_rx) = mpsc::unbounded();
        Self {
            connects: AtomicUsize::new(0),
            refuse_next: AtomicBool::new(false),
            queued: std::sync::Mutex::new(Vec::new()),
            remotes_tx,
            remotes_rx: Mutex::new(remotes_rx),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make the next connect fail.
    pub fn refuse_next(&self) {
        self.refuse_next.store(true, Ordering::SeqCst);
    }

    /// Deliver `frame` on the next connection as soon as it exists.
    pub fn queue_on_connect(&self, frame: &str) {
        self.queued.lock().unwrap().push(frame.to_string());
    }

    /// Far end of the next connection, in connect order.
    pub async fn next_remote(&self) -> RemoteEnd {
        self.remotes_rx
            .lock()
            .await
            .next()
            .await
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, context: &ChannelContext) -> SyncResult<Connection> {
        if self.refuse_next.swap(false, Ordering::SeqCst) {
            return Err(SyncError::LinkClosed("connection refused".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (inbound_tx, inbound_rx) = mpsc::unbounded();
        for frame in self.queued.lock().unwrap().drain(..) {
            let _ = inbound_tx.unbounded_send(Ok(frame));
        }
        let (outbound_tx, outbound_rx) = mpsc::unbounded::<String>();
        let _ = self.remotes_tx.unbounded_send(RemoteEnd {
            context: context.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
        });
        let sink = outbound_tx.sink_map_err(|e| SyncError::LinkClosed(e.to_string()));
        Ok(Connection::new(Box::pin(sink), Box::pin(inbound_rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_after_remote_gone_reports_closed_link() {
        let connector = MemoryConnector::new();
        let mut connection = connector
            .connect(&ChannelContext::family("f1").unwrap())
            .await
            .unwrap();
        drop(connector.next_remote().await);

        let err = connection.sink.send("ping".to_string()).await.unwrap_err();
        assert!(matches!(err, SyncError::LinkClosed(_)));
    }
}
