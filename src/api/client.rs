//! REST client for the family API: messages, families, memberships.

use reqwest::header::COOKIE;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::{SyncError, SyncResult};
use crate::models::{ErrorBody, Family, MessageRecord, MessageText, MyFamily};

const SESSION_COOKIE: &str = "lentik_session";
const FALLBACK_DETAIL: &str = "server error";

/// Authenticated JSON client. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, session_token: Option<String>) -> SyncResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.session_token {
            Some(token) => builder.header(COOKIE, format!("{}={}", SESSION_COOKIE, token)),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> SyncResult<Response> {
        let res = builder.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        let detail = error_detail(&body);
        debug!(status = status.as_u16(), detail = %detail, "api error");
        Err(SyncError::Api {
            status: status.as_u16(),
            detail,
        })
    }

    async fn json<T: DeserializeOwned>(builder: RequestBuilder) -> SyncResult<T> {
        Ok(Self::send(builder).await?.json().await?)
    }

    #[instrument(skip(self))]
    pub async fn messages(&self, family_id: &str, chat_id: &str) -> SyncResult<Vec<MessageRecord>> {
        let path = format!("/families/{}/chats/{}/messages", family_id, chat_id);
        Self::json(self.request(Method::GET, &path)).await
    }

    /// Post a message. Feed the result to `Reconciler::record_sent` so the channel echo is
    /// recognised as a duplicate.
    #[instrument(skip(self, text))]
    pub async fn send_message(
        &self,
        family_id: &str,
        chat_id: &str,
        text: &str,
    ) -> SyncResult<MessageRecord> {
        let path = format!("/families/{}/chats/{}/messages", family_id, chat_id);
        let body = MessageText {
            text: text.to_string(),
        };
        Self::json(self.request(Method::POST, &path).json(&body)).await
    }

    #[instrument(skip(self, text))]
    pub async fn edit_message(
        &self,
        family_id: &str,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> SyncResult<MessageRecord> {
        let path = format!(
            "/families/{}/chats/{}/messages/{}",
            family_id, chat_id, message_id
        );
        let body = MessageText {
            text: text.to_string(),
        };
        Self::json(self.request(Method::PATCH, &path).json(&body)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_message(
        &self,
        family_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> SyncResult<()> {
        let path = format!(
            "/families/{}/chats/{}/messages/{}",
            family_id, chat_id, message_id
        );
        Self::send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn family(&self, family_id: &str) -> SyncResult<Family> {
        Self::json(self.request(Method::GET, &format!("/families/{}", family_id))).await
    }

    /// Families the current user belongs to. Refetched when membership goes stale.
    #[instrument(skip(self))]
    pub async fn my_families(&self) -> SyncResult<Vec<MyFamily>> {
        Self::json(self.request(Method::GET, "/me/families")).await
    }
}

/// User-facing text for an error body: `detail` as a string, or field messages joined.
pub fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.detail.into_message())
        .unwrap_or_else(|_| FALLBACK_DETAIL.to_string())
}
