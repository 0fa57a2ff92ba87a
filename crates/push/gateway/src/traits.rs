//! Backend traits.

use push_core::{DeliveryResult, Device};

/// A platform delivery backend.
#[trait_variant::make(Send)]
pub trait Backend: Send + Sync {
    /// Deliver one chunk of resolved devices.
    ///
    /// Per-device problems are reported in the returned [`DeliveryResult`];
    /// an `Err` means the whole chunk could not be attempted.
    async fn push(&self, chunk: &[Device]) -> color_eyre::eyre::Result<DeliveryResult>;
}
