//! Push Dispatch
//!
//! Builds a notification for many devices, resolves per-device payloads,
//! batches them per platform and aggregates the gateway results.

pub mod config;
mod error;
mod notification;

pub use config::{ConfigError, PushConfig};
pub use error::DispatchError;
pub use notification::{Notification, NotificationState};
