//! APNs backend using the a2 crate.

use std::sync::atomic::{AtomicU64, Ordering};

use a2::NotificationBuilder as _;
use color_eyre::eyre::WrapErr as _;
use push_core::{DeliveryResult, Device, WithPayload as _};

use crate::{ApnsConfig, Backend, Environment};

/// Reserved root key of the APNs payload.
const APS_KEY: &str = "aps";

/// Per-message status, using the numbering of the legacy binary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApnsStatus {
    NoError,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    /// The token is invalid or no longer registered.
    InvalidToken,
    Shutdown,
    Unknown,
}

impl ApnsStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::NoError => 0,
            Self::ProcessingError => 1,
            Self::MissingDeviceToken => 2,
            Self::MissingTopic => 3,
            Self::MissingPayload => 4,
            Self::InvalidTokenSize => 5,
            Self::InvalidTopicSize => 6,
            Self::InvalidPayloadSize => 7,
            Self::InvalidToken => 8,
            Self::Shutdown => 10,
            Self::Unknown => 255,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NoError,
            1 => Self::ProcessingError,
            2 => Self::MissingDeviceToken,
            3 => Self::MissingTopic,
            4 => Self::MissingPayload,
            5 => Self::InvalidTokenSize,
            6 => Self::InvalidTopicSize,
            7 => Self::InvalidPayloadSize,
            8 => Self::InvalidToken,
            10 => Self::Shutdown,
            _ => Self::Unknown,
        }
    }

    /// Classify an HTTP/2 provider API rejection reason.
    pub fn from_reason(reason: &a2::ErrorReason) -> Self {
        match reason {
            a2::ErrorReason::BadDeviceToken
            | a2::ErrorReason::Unregistered
            | a2::ErrorReason::DeviceTokenNotForTopic => Self::InvalidToken,
            a2::ErrorReason::MissingDeviceToken => Self::MissingDeviceToken,
            a2::ErrorReason::MissingTopic => Self::MissingTopic,
            a2::ErrorReason::BadTopic | a2::ErrorReason::TopicDisallowed => {
                Self::InvalidTopicSize
            }
            a2::ErrorReason::PayloadEmpty => Self::MissingPayload,
            a2::ErrorReason::PayloadTooLarge => Self::InvalidPayloadSize,
            a2::ErrorReason::Shutdown => Self::Shutdown,
            _ => Self::ProcessingError,
        }
    }
}

/// One platform-native message, built from a resolved device.
#[derive(Debug, Clone, PartialEq)]
pub struct ApnsMessage {
    pub token: String,
    /// `<identity hash>::<sequence>`, for logs.
    pub identifier: String,
    pub text: String,
    pub sound: String,
    /// Absolute expiry (unix seconds).
    pub expiry: u64,
    pub badge: Option<u32>,
    /// Custom properties next to the `aps` dictionary.
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl ApnsMessage {
    /// Build the message for `device`, expiring `ttl` seconds after `now`.
    pub fn from_device(
        device: &Device,
        identifier: String,
        now: u64,
    ) -> color_eyre::eyre::Result<Self> {
        let token = device.token();
        if token.len() % 2 != 0 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            color_eyre::eyre::bail!("APNs token is not a hexadecimal string: {token}");
        }

        let payload = device.payload();
        if payload.metadata.contains_key(APS_KEY) {
            color_eyre::eyre::bail!("metadata key {APS_KEY:?} is reserved");
        }

        let mut custom = serde_json::Map::new();
        custom.insert("title".into(), payload.title.clone().into());
        custom.insert("message".into(), payload.message.clone().into());
        for (name, value) in &payload.metadata {
            custom.insert(name.clone(), value.clone());
        }

        let props = ["title", "message"]
            .into_iter()
            .chain(payload.metadata.keys().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",");
        custom.insert("props".into(), props.into());

        let sound = if payload.sound.is_empty() {
            push_core::DEFAULT_SOUND.to_string()
        } else {
            payload.sound.clone()
        };

        Ok(Self {
            token: token.to_string(),
            identifier,
            text: payload.message.clone(),
            sound,
            expiry: now + u64::from(payload.ttl),
            badge: payload.badge_count(),
            custom,
        })
    }

    /// JSON document sent to the gateway.
    pub fn to_json(&self) -> serde_json::Value {
        let mut aps = serde_json::Map::new();
        aps.insert("alert".into(), serde_json::json!({ "body": self.text }));
        aps.insert("sound".into(), self.sound.clone().into());
        if let Some(badge) = self.badge {
            aps.insert("badge".into(), badge.into());
        }

        let mut root = self.custom.clone();
        root.insert(APS_KEY.into(), aps.into());
        serde_json::Value::Object(root)
    }
}

/// Error reported by the gateway for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ApnsDeliveryError {
    /// Token the message was addressed to.
    pub recipient: String,
    pub identifier: String,
    pub status: ApnsStatus,
    pub detail: String,
}

impl ApnsDeliveryError {
    pub fn new(message: &ApnsMessage, status: ApnsStatus, detail: impl std::fmt::Display) -> Self {
        Self {
            recipient: message.token.clone(),
            identifier: message.identifier.clone(),
            status,
            detail: detail.to_string(),
        }
    }
}

/// Connection to the APNs gateway.
#[trait_variant::make(Send)]
pub trait ApnsTransport: Send + Sync {
    /// Connect, send every message, disconnect, and return per-message errors.
    ///
    /// `Err` is reserved for failures that prevent the whole batch, such as an
    /// unusable certificate.
    async fn deliver(
        &self,
        messages: &[ApnsMessage],
    ) -> color_eyre::eyre::Result<Vec<ApnsDeliveryError>>;
}

/// Apple backend.
pub struct ApnsBackend<T> {
    transport: T,
    capture: bool,
    seq: AtomicU64,
}

impl<T> ApnsBackend<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            capture: false,
            seq: AtomicU64::new(0),
        }
    }

    /// Record every outgoing payload in the result.
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    fn next_identifier(&self, device: &Device) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}::{}", device.identity_hash(), seq)
    }
}

impl ApnsBackend<A2Transport> {
    /// Backend talking to the real gateway.
    pub fn from_config(config: ApnsConfig) -> Self {
        Self::new(A2Transport::new(config))
    }
}

impl<T: ApnsTransport> Backend for ApnsBackend<T> {
    #[tracing::instrument(name = "apns_push", skip_all, fields(devices = chunk.len()))]
    async fn push(&self, chunk: &[Device]) -> color_eyre::eyre::Result<DeliveryResult> {
        let mut result = DeliveryResult::default();
        let now = unix_now();
        let mut messages = Vec::with_capacity(chunk.len());

        for device in chunk {
            let identifier = self.next_identifier(device);
            match ApnsMessage::from_device(device, identifier, now) {
                Ok(message) => {
                    if self.capture {
                        result.raw_payloads.push(message.to_json().to_string().into_bytes());
                    }
                    messages.push(message);
                }
                Err(e) => {
                    tracing::error!(
                        device = %device.identity_hash(),
                        error = %e,
                        "failed to build APNs message"
                    );
                    result.local_error(device.clone(), e);
                }
            }
        }

        if messages.is_empty() {
            return Ok(result);
        }

        let errors = self
            .transport
            .deliver(&messages)
            .await
            .wrap_err("APNs delivery failed")?;

        for error in errors {
            match error.status {
                ApnsStatus::NoError => {}
                ApnsStatus::InvalidToken => {
                    match chunk.iter().find(|device| device.token() == error.recipient) {
                        Some(device) => result.fail(device.clone()),
                        None => tracing::warn!(
                            id = %error.identifier,
                            "invalid token reported for unknown recipient"
                        ),
                    }
                }
                status => tracing::error!(
                    id = %error.identifier,
                    status = status.code(),
                    detail = %error.detail,
                    "APNs error"
                ),
            }
        }

        Ok(result)
    }
}

/// Transport over the HTTP/2 provider API.
pub struct A2Transport {
    config: ApnsConfig,
}

impl A2Transport {
    pub fn new(config: ApnsConfig) -> Self {
        Self { config }
    }

    fn connect(&self) -> color_eyre::eyre::Result<a2::Client> {
        let path = self
            .config
            .certificate
            .as_ref()
            .ok_or_else(|| color_eyre::eyre::eyre!("no APNs certificate configured"))?;

        let mut file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to open certificate {}", path.display()))?;

        let client_config = a2::ClientConfig {
            request_timeout_secs: Some(self.config.timeout_secs),
            ..a2::ClientConfig::new(endpoint(self.config.environment))
        };
        let password = self.config.password.as_deref().unwrap_or("");

        let client = a2::Client::certificate(&mut file, password, client_config)
            .wrap_err("failed to create APNs client")?;

        tracing::debug!(host = self.config.environment.host(), "connected to APNs");
        Ok(client)
    }
}

impl ApnsTransport for A2Transport {
    async fn deliver(
        &self,
        messages: &[ApnsMessage],
    ) -> color_eyre::eyre::Result<Vec<ApnsDeliveryError>> {
        let client = self.connect()?;
        let mut errors = Vec::new();

        'messages: for message in messages {
            let mut builder = a2::DefaultNotificationBuilder::new()
                .set_body(&message.text)
                .set_sound(&message.sound);
            if let Some(badge) = message.badge {
                builder = builder.set_badge(badge);
            }

            let options = a2::NotificationOptions {
                apns_topic: self.config.topic.as_deref(),
                apns_expiration: Some(message.expiry),
                ..Default::default()
            };
            let mut payload = builder.build(&message.token, options);

            for (key, value) in &message.custom {
                if let Err(e) = payload.add_custom_data(key, value) {
                    errors.push(ApnsDeliveryError::new(
                        message,
                        ApnsStatus::ProcessingError,
                        e,
                    ));
                    continue 'messages;
                }
            }

            match client.send(payload).await {
                Ok(_) => {}
                Err(a2::Error::ResponseError(response)) => {
                    let status = response
                        .error
                        .as_ref()
                        .map(|body| ApnsStatus::from_reason(&body.reason))
                        .unwrap_or(ApnsStatus::Unknown);
                    errors.push(ApnsDeliveryError::new(
                        message,
                        status,
                        format!("HTTP {}", response.code),
                    ));
                }
                Err(e) => {
                    errors.push(ApnsDeliveryError::new(
                        message,
                        ApnsStatus::ProcessingError,
                        e,
                    ));
                }
            }
        }

        tracing::debug!(sent = messages.len(), errors = errors.len(), "disconnected from APNs");
        Ok(errors)
    }
}

fn endpoint(environment: Environment) -> a2::Endpoint {
    match environment {
        Environment::Production => a2::Endpoint::Production,
        Environment::Sandbox => a2::Endpoint::Sandbox,
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
