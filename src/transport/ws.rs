//! WebSocket connector: authenticated upgrade, text frames only.

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use super::{Connection, Connector};
use crate::error::{SyncError, SyncResult};
use crate::models::ChannelContext;

const SESSION_COOKIE: &str = "lentik_session";

/// Connects to `{ws_base}{context.path()}`, sending the session cookie when one is set.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_base: String,
    session_token: Option<String>,
}

impl WsConnector {
    pub fn new(ws_base: impl Into<String>, session_token: Option<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            session_token,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, context: &ChannelContext) -> SyncResult<Connection> {
        let url = context.url(&self.ws_base);
        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = &self.session_token {
            let cookie = HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, token))
                .map_err(|e| SyncError::Config(format!("session token: {}", e)))?;
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (socket, _response) = connect_async(request).await?;
        info!(context = %context, url = %url, "ws connected");

        let (sink, stream) = socket.split();
        let sink = sink.sink_map_err(SyncError::from).with(|text: String| {
            future::ready(Ok::<_, SyncError>(Message::Text(text.into())))
        });
        let stream = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(other) => {
                        debug!(len = other.len(), "ignoring non-text frame");
                        None
                    }
                    Err(e) => Some(Err(SyncError::from(e))),
                })
            });

        Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
    }
}
