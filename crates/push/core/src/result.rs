//! Delivery outcome types.

use crate::Device;

/// A device whose push token was replaced by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenUpdate {
    /// Device as it was sent.
    pub device: Device,
    /// Canonical token to store in place of the old one.
    pub token: String,
}

/// A device that was never handed to the gateway because of a local error.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalError {
    pub device: Device,
    pub reason: String,
}

/// Aggregated result of pushing one or more chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryResult {
    /// Devices whose delivery failed permanently.
    pub failures: Vec<Device>,
    /// Devices whose token was rotated.
    pub updates: Vec<TokenUpdate>,
    /// Devices dropped before reaching the gateway.
    pub local_errors: Vec<LocalError>,
    /// Wire payloads, only filled when payload capture is enabled.
    pub raw_payloads: Vec<Vec<u8>>,
}

impl DeliveryResult {
    /// Record a permanent failure.
    pub fn fail(&mut self, device: Device) {
        self.failures.push(device);
    }

    /// Record a token rotation.
    pub fn update(&mut self, device: Device, token: impl Into<String>) {
        self.updates.push(TokenUpdate {
            device,
            token: token.into(),
        });
    }

    /// Record a local, pre-network error.
    pub fn local_error(&mut self, device: Device, reason: impl std::fmt::Display) {
        self.local_errors.push(LocalError {
            device,
            reason: reason.to_string(),
        });
    }

    /// Append everything from `other`.
    pub fn absorb(&mut self, other: DeliveryResult) {
        self.failures.extend(other.failures);
        self.updates.extend(other.updates);
        self.local_errors.extend(other.local_errors);
        self.raw_payloads.extend(other.raw_payloads);
    }

    /// True when nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
            && self.updates.is_empty()
            && self.local_errors.is_empty()
            && self.raw_payloads.is_empty()
    }
}
