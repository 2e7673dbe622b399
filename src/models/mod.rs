//! Data models for channel contexts, inbound events, messages, toasts, and REST payloads.

pub mod api;
pub mod context;
pub mod event;
pub mod message;
pub mod toast;

pub use api::*;
pub use context::*;
pub use event::*;
pub use message::*;
pub use toast::*;
