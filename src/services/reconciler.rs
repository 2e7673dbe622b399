//! Event reconciler: merges inbound events into message collections, the toast queue, and the
//! unread counter.
//!
//! Every merge is total. Duplicate `new_message` deliveries are suppressed by id, edits and
//! deletes for messages that are not loaded are no-ops, and toast removal is idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::ids::{ToastIdGenerator, UuidIds};
use super::lock;
use crate::models::{
    InboundEvent, MessageCollection, MessagePatch, MessageRecord, Toast, ToastDraft,
};

pub const DEFAULT_TOAST_TTL: Duration = Duration::from_secs(5);

/// Notification sent to views after a collection changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Messages { chat_id: String },
    ToastAdded { id: String },
    ToastRemoved { id: String },
    Unread(u64),
    /// A member was removed; the viewer's family list may be stale and should be refetched.
    MembershipStale,
}

#[derive(Default)]
struct State {
    chats: HashMap<String, MessageCollection>,
    toasts: Vec<Toast>,
    expiries: HashMap<String, JoinHandle<()>>,
    unread: u64,
}

struct Inner {
    family_id: String,
    me: String,
    toast_ttl: Duration,
    ids: Box<dyn ToastIdGenerator>,
    changes: broadcast::Sender<Change>,
    state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in state.expiries.drain() {
            timer.abort();
        }
    }
}

pub struct ReconcilerBuilder {
    family_id: String,
    me: String,
    toast_ttl: Duration,
    ids: Box<dyn ToastIdGenerator>,
}

impl ReconcilerBuilder {
    pub fn toast_ttl(mut self, ttl: Duration) -> Self {
        self.toast_ttl = ttl;
        self
    }

    pub fn ids(mut self, ids: impl ToastIdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn build(self) -> Reconciler {
        let (changes, _) = broadcast::channel(64);
        Reconciler {
            inner: Arc::new(Inner {
                family_id: self.family_id,
                me: self.me,
                toast_ttl: self.toast_ttl,
                ids: self.ids,
                changes,
                state: Mutex::new(State::default()),
            }),
        }
    }
}

/// Owns the collections of one channel context. Clones share state.
///
/// Scheduling toast expiry needs a Tokio runtime; without one toasts stay until dismissed.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    /// `me` is the username matched against mention lists.
    pub fn builder(family_id: impl Into<String>, me: impl Into<String>) -> ReconcilerBuilder {
        ReconcilerBuilder {
            family_id: family_id.into(),
            me: me.into(),
            toast_ttl: DEFAULT_TOAST_TTL,
            ids: Box::new(UuidIds),
        }
    }

    pub fn family_id(&self) -> &str {
        &self.inner.family_id
    }

    /// Merge one event.
    pub fn apply(&self, event: &InboundEvent) {
        match event {
            InboundEvent::NewMessage { message } => {
                self.record_sent(message.clone());
            }
            InboundEvent::MessageEdited { message } => self.edit(message),
            InboundEvent::MessageDeleted { message_id } => self.delete(message_id),
            InboundEvent::Mention {
                from,
                text,
                chat_id,
                mentions,
            } => {
                if mentions.iter().any(|m| m == &self.inner.me) {
                    self.enqueue(ToastDraft::mention(from, text, chat_id.clone()));
                } else {
                    trace!(from = %from, "mention for someone else");
                }
            }
            InboundEvent::MemberJoined { display_name } => {
                self.enqueue(ToastDraft::member_joined(display_name));
            }
            InboundEvent::MemberKicked { display_name } => {
                self.enqueue(ToastDraft::member_kicked(display_name));
                info!(family_id = %self.inner.family_id, "membership list stale");
                self.notify(Change::MembershipStale);
            }
        }
    }

    /// Insert a message unless its id is present. Used for channel deliveries and for the
    /// sender's own message returned by the send request, whichever arrives first.
    pub fn record_sent(&self, message: MessageRecord) -> bool {
        let chat_id = message.chat_id.clone();
        let message_id = message.id.clone();
        let inserted = {
            let mut state = lock(&self.inner.state);
            state
                .chats
                .entry(chat_id.clone())
                .or_default()
                .insert(message)
        };
        if inserted {
            self.notify(Change::Messages { chat_id });
        } else {
            debug!(chat_id = %chat_id, message_id = %message_id, "duplicate message suppressed");
        }
        inserted
    }

    /// Replace a chat's collection with fetched history.
    pub fn load_messages(&self, chat_id: &str, history: Vec<MessageRecord>) {
        let collection = MessageCollection::from_history(history);
        debug!(chat_id = %chat_id, count = collection.len(), "history loaded");
        lock(&self.inner.state)
            .chats
            .insert(chat_id.to_string(), collection);
        self.notify(Change::Messages {
            chat_id: chat_id.to_string(),
        });
    }

    fn edit(&self, patch: &MessagePatch) {
        let edited_in = {
            let mut state = lock(&self.inner.state);
            match &patch.chat_id {
                Some(chat_id) => state
                    .chats
                    .get_mut(chat_id)
                    .map_or(false, |c| c.edit(&patch.id, &patch.text))
                    .then(|| chat_id.clone()),
                None => state
                    .chats
                    .iter_mut()
                    .find_map(|(chat_id, c)| c.edit(&patch.id, &patch.text).then(|| chat_id.clone())),
            }
        };
        match edited_in {
            Some(chat_id) => self.notify(Change::Messages { chat_id }),
            None => trace!(message_id = %patch.id, "edit for message not loaded"),
        }
    }

    fn delete(&self, message_id: &str) {
        let deleted_in = lock(&self.inner.state)
            .chats
            .iter_mut()
            .find_map(|(chat_id, c)| c.remove(message_id).then(|| chat_id.clone()));
        match deleted_in {
            Some(chat_id) => self.notify(Change::Messages { chat_id }),
            None => trace!(message_id = %message_id, "delete for message not loaded"),
        }
    }

    fn enqueue(&self, draft: ToastDraft) {
        let id = self.inner.ids.next_id();
        let toast = draft.into_toast(id.clone());
        let unread = {
            let mut state = lock(&self.inner.state);
            state.toasts.push(toast);
            state.unread += 1;
            // Spawned under the lock so expiry cannot observe a half-inserted toast.
            if let Some(timer) = self.schedule_expiry(id.clone()) {
                state.expiries.insert(id.clone(), timer);
            }
            state.unread
        };
        debug!(toast_id = %id, unread, "toast queued");
        self.notify(Change::ToastAdded { id });
        self.notify(Change::Unread(unread));
    }

    fn schedule_expiry(&self, id: String) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(toast_id = %id, "no runtime; toast will not expire");
                return None;
            }
        };
        let ttl = self.inner.toast_ttl;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Some(handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = weak.upgrade() {
                Reconciler { inner }.expire(&id);
            }
        }))
    }

    fn expire(&self, id: &str) {
        let removed = {
            let mut state = lock(&self.inner.state);
            state.expiries.remove(id);
            remove_toast(&mut state.toasts, id)
        };
        if removed {
            trace!(toast_id = %id, "toast expired");
            self.notify(Change::ToastRemoved { id: id.to_string() });
        }
    }

    /// Remove one toast and cancel its expiry. Dismissing an unknown id is a no-op.
    pub fn dismiss(&self, id: &str) {
        let removed = {
            let mut state = lock(&self.inner.state);
            if let Some(timer) = state.expiries.remove(id) {
                timer.abort();
            }
            remove_toast(&mut state.toasts, id)
        };
        if removed {
            self.notify(Change::ToastRemoved { id: id.to_string() });
        }
    }

    /// Reset the unread counter. The toast queue is untouched.
    pub fn clear_unread(&self) {
        let was = std::mem::take(&mut lock(&self.inner.state).unread);
        if was != 0 {
            self.notify(Change::Unread(0));
        }
    }

    pub fn unread(&self) -> u64 {
        lock(&self.inner.state).unread
    }

    pub fn toasts(&self) -> Vec<Toast> {
        lock(&self.inner.state).toasts.clone()
    }

    pub fn toast(&self, id: &str) -> Option<Toast> {
        lock(&self.inner.state)
            .toasts
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Snapshot of a chat's messages; empty when the chat is not loaded.
    pub fn messages(&self, chat_id: &str) -> Vec<MessageRecord> {
        lock(&self.inner.state)
            .chats
            .get(chat_id)
            .map(|c| c.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub fn changes(&self) -> broadcast::Receiver<Change> {
        self.inner.changes.subscribe()
    }

    fn notify(&self, change: Change) {
        let _ = self.inner.changes.send(change);
    }
}

fn remove_toast(toasts: &mut Vec<Toast>, id: &str) -> bool {
    let before = toasts.len();
    toasts.retain(|t| t.id != id);
    toasts.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::record;
    use crate::models::{decode_frame, ToastKind};
    use crate::services::ids::SequenceIds;

    fn reconciler(me: &str) -> Reconciler {
        Reconciler::builder("f1", me).ids(SequenceIds::new()).build()
    }

    fn deliver(r: &Reconciler, frame: &str) {
        if let Ok(event) = decode_frame(frame) {
            r.apply(&event);
        }
    }

    fn new_message(id: &str, chat_id: &str, text: &str) -> InboundEvent {
        InboundEvent::NewMessage {
            message: record(id, chat_id, text),
        }
    }

    fn joined(name: &str) -> InboundEvent {
        InboundEvent::MemberJoined {
            display_name: name.to_string(),
        }
    }

    const MENTION_KID: &str =
        r#"{"type":"mention","from":"mama","text":"@kid hi","chat_id":"c1","mentions":["kid"]}"#;

    #[tokio::test]
    async fn new_message_frame_lands_in_chat() {
        let r = reconciler("kid");
        let frame = r#"{"type":"new_message","message":{"id":"m1","chat_id":"c1","text":"hi"}}"#;
        deliver(&r, frame);
        let msgs = r.messages("c1");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "m1");
        assert_eq!(msgs[0].text, "hi");

        deliver(&r, frame);
        assert_eq!(r.messages("c1").len(), 1);
    }

    #[tokio::test]
    async fn distinct_ids_counted_once_each() {
        let r = reconciler("kid");
        let ids = ["a", "b", "a", "c", "b", "d", "d"];
        for id in ids {
            r.apply(&new_message(id, "c1", "x"));
        }
        assert_eq!(r.messages("c1").len(), 4);
    }

    #[tokio::test]
    async fn optimistic_send_suppresses_echo() {
        let r = reconciler("kid");
        assert!(r.record_sent(record("m1", "c1", "mine")));
        r.apply(&new_message("m1", "c1", "mine"));
        assert_eq!(r.messages("c1").len(), 1);
    }

    #[tokio::test]
    async fn edit_and_delete_merge_in_place() {
        let r = reconciler("kid");
        r.load_messages(
            "c1",
            vec![record("m1", "c1", "a"), record("m2", "c1", "b")],
        );

        deliver(&r, r#"{"type":"message_edited","message":{"id":"m2","text":"B"}}"#);
        let msgs = r.messages("c1");
        assert_eq!(msgs[1].text, "B");
        assert!(msgs[1].edited);

        // Missing id: unchanged.
        deliver(&r, r#"{"type":"message_edited","message":{"id":"zz","text":"?"}}"#);
        assert_eq!(r.messages("c1"), msgs);

        deliver(&r, r#"{"type":"message_deleted","message_id":"m1"}"#);
        assert_eq!(r.messages("c1").len(), 1);
        deliver(&r, r#"{"type":"message_deleted","message_id":"m1"}"#);
        assert_eq!(r.messages("c1").len(), 1);
        assert_eq!(r.messages("c1")[0].id, "m2");
    }

    #[tokio::test]
    async fn edit_with_chat_id_only_searches_that_chat() {
        let r = reconciler("kid");
        r.load_messages("c1", vec![record("m1", "c1", "a")]);
        r.apply(&InboundEvent::MessageEdited {
            message: MessagePatch {
                id: "m1".to_string(),
                text: "nope".to_string(),
                chat_id: Some("c2".to_string()),
            },
        });
        assert_eq!(r.messages("c1")[0].text, "a");
        assert!(r.messages("c2").is_empty());
    }

    #[tokio::test]
    async fn edit_or_delete_without_loaded_chat_is_noop() {
        let r = reconciler("kid");
        let mut changes = r.changes();
        deliver(&r, r#"{"type":"message_edited","message":{"id":"m1","text":"x"}}"#);
        deliver(&r, r#"{"type":"message_deleted","message_id":"m1"}"#);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn mention_for_me_queues_toast() {
        let r = reconciler("kid");
        deliver(&r, MENTION_KID);
        let toasts = r.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].kind, ToastKind::Mention);
        assert_eq!(toasts[0].chat_id.as_deref(), Some("c1"));
        assert_eq!(toasts[0].title, "mama mentioned you");
        assert_eq!(r.unread(), 1);
    }

    #[tokio::test]
    async fn mention_for_someone_else_is_ignored() {
        let r = reconciler("dad");
        deliver(&r, MENTION_KID);
        assert!(r.toasts().is_empty());
        assert_eq!(r.unread(), 0);
    }

    #[tokio::test]
    async fn unknown_frame_changes_nothing() {
        let r = reconciler("kid");
        let mut changes = r.changes();
        deliver(&r, r#"{"type":"future_event"}"#);
        assert!(changes.try_recv().is_err());
        assert!(r.toasts().is_empty());
        assert_eq!(r.unread(), 0);
    }

    #[tokio::test]
    async fn unread_counts_each_toast_and_clears() {
        let r = reconciler("kid");
        for n in 0..7 {
            r.apply(&joined(&format!("guest{}", n)));
        }
        assert_eq!(r.unread(), 7);
        r.clear_unread();
        assert_eq!(r.unread(), 0);
        assert_eq!(r.toasts().len(), 7);
        r.clear_unread();
        assert_eq!(r.unread(), 0);
    }

    #[tokio::test]
    async fn dismiss_twice_removes_once() {
        let r = reconciler("kid");
        r.apply(&joined("Gran"));
        r.apply(&joined("Grandpa"));
        let mut changes = r.changes();

        r.dismiss("1");
        r.dismiss("1");
        r.dismiss("unknown");

        assert_eq!(r.toasts().len(), 1);
        assert_eq!(r.toasts()[0].id, "2");
        assert_eq!(
            changes.try_recv().unwrap(),
            Change::ToastRemoved { id: "1".to_string() }
        );
        assert!(changes.try_recv().is_err());
        assert!(lock(&r.inner.state).expiries.get("1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn toasts_expire_after_ttl() {
        let r = reconciler("kid");
        r.apply(&joined("Gran"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        r.apply(&joined("Grandpa"));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let left: Vec<String> = r.toasts().into_iter().map(|t| t.id).collect();
        assert_eq!(left, vec!["2".to_string()]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(r.toasts().is_empty());
        assert!(lock(&r.inner.state).expiries.is_empty());
        // Expiry never touches the counter.
        assert_eq!(r.unread(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_cancels_pending_expiry() {
        let r = reconciler("kid");
        let mut changes = r.changes();
        r.apply(&joined("Gran"));
        r.dismiss("1");
        tokio::time::sleep(Duration::from_secs(10)).await;

        let seen: Vec<Change> = std::iter::from_fn(|| changes.try_recv().ok()).collect();
        assert_eq!(
            seen,
            vec![
                Change::ToastAdded { id: "1".to_string() },
                Change::Unread(1),
                Change::ToastRemoved { id: "1".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn member_kicked_flags_membership_stale() {
        let r = reconciler("kid");
        let mut changes = r.changes();
        deliver(&r, r#"{"type":"member_kicked","display_name":"Uncle"}"#);

        let toasts = r.toasts();
        assert_eq!(toasts[0].kind, ToastKind::MemberKicked);
        assert_eq!(toasts[0].body, "Uncle left the family");
        let seen: Vec<Change> = std::iter::from_fn(|| changes.try_recv().ok()).collect();
        assert!(seen.contains(&Change::MembershipStale));
        assert_eq!(r.unread(), 1);
    }

    #[test]
    fn works_without_runtime() {
        let r = reconciler("kid");
        r.apply(&joined("Gran"));
        assert_eq!(r.toasts().len(), 1);
        r.dismiss("1");
        assert!(r.toasts().is_empty());
    }
}
