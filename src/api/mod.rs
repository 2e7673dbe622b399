//! REST collaborator.

pub mod client;

pub use client::{error_detail, ApiClient};
