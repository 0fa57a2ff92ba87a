//! Delivery targets.

use sha2::Digest as _;

use crate::{Payload, WithPayload};

/// Push platform of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Apple Push Notification service.
    Apple,
    /// Google Cloud Messaging.
    Android,
}

impl Platform {
    /// Short tag used in identity hashes and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Apple => "apns",
            Self::Android => "gcm",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Invalid device construction.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{0} device token must not be empty")]
    EmptyToken(Platform),
}

/// One delivery target with its per-device payload overrides.
///
/// Platform, token and identity hash are fixed at construction. The payload is
/// changed through the [`WithPayload`] setters before the device is pushed into
/// a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    platform: Platform,
    token: String,
    id: String,
    hash: String,
    payload: Payload,
}

impl Device {
    /// Create a device for `platform` with a generated id.
    pub fn new(platform: Platform, token: impl Into<String>) -> Result<Self, DeviceError> {
        let token = token.into();
        if token.is_empty() {
            return Err(DeviceError::EmptyToken(platform));
        }

        Ok(Self {
            hash: Self::fingerprint(platform, &token),
            platform,
            token,
            id: uuid::Uuid::new_v4().to_string(),
            payload: Payload::default(),
        })
    }

    /// Create an Apple device.
    pub fn apns(token: impl Into<String>) -> Result<Self, DeviceError> {
        Self::new(Platform::Apple, token)
    }

    /// Create an Android device.
    pub fn gcm(token: impl Into<String>) -> Result<Self, DeviceError> {
        Self::new(Platform::Android, token)
    }

    /// Use a caller-supplied id instead of the generated one.
    ///
    /// An empty id keeps the generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.id = id;
        }
        self
    }

    /// Deterministic fingerprint of `(platform, token)`.
    pub fn fingerprint(platform: Platform, token: &str) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(platform.tag().as_bytes());
        hasher.update(b"+");
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Display label. Not used for identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity used for deduplication and error correlation.
    pub fn identity_hash(&self) -> &str {
        &self.hash
    }

    pub fn is_apns(&self) -> bool {
        self.platform == Platform::Apple
    }

    pub fn is_gcm(&self) -> bool {
        self.platform == Platform::Android
    }

    /// Merge notification-level `defaults` into this device's payload.
    pub fn resolve(mut self, defaults: &Payload) -> Self {
        self.payload = Payload::merge(defaults, self.payload);
        self
    }
}

impl WithPayload for Device {
    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }
}
