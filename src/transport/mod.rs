//! Wire transport for live channels: a text-frame sink and stream per connection.

#[cfg(test)]
pub(crate) mod memory;
pub mod ws;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::Sink;
use std::pin::Pin;

use crate::error::{SyncError, SyncResult};
use crate::models::ChannelContext;

pub use ws::WsConnector;

/// Outbound text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;
/// Inbound text frames in transport order. The stream ends when the peer closes.
pub type FrameStream = BoxStream<'static, SyncResult<String>>;

/// One established full-duplex connection.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Establishes connections for a channel context.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, context: &ChannelContext) -> SyncResult<Connection>;
}
