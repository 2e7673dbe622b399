//! Real-time family channel client built with Rust.
//!
//! A [`ChannelSubscriber`] keeps one WebSocket per channel context, decodes frames into
//! typed events and pings to keep the link alive. A [`Reconciler`] merges those events into
//! chat message collections, a self-expiring toast queue and an unread counter.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod transport;

pub use api::ApiClient;
pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use models::{ChannelContext, InboundEvent};
pub use services::{
    ChannelSubscriber, LinkStatus, LiveSession, Reconciler, SessionOptions, Subscription,
};
pub use transport::{Connector, WsConnector};
