//! Push Gateways
//!
//! Delivery backends for Apple (APNs) and Android (GCM) behind a uniform
//! [`Backend`] contract.

mod apns;
mod config;
mod gcm;
mod traits;

pub use apns::*;
pub use config::*;
pub use gcm::*;
pub use traits::*;
