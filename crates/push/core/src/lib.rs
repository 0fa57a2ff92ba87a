//! Push Core Types
//!
//! Payloads, devices and delivery results shared by the gateways and the
//! dispatcher.

mod device;
mod payload;
mod result;

pub use device::*;
pub use payload::*;
pub use result::*;
