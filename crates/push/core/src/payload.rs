//! Notification payload shared by devices and notifications.
//!
//! A notification carries a payload of defaults and every device carries a
//! payload of overrides. [`Payload::merge`] resolves the two.

use std::collections::BTreeMap;

/// Sound played when nothing else is configured.
pub const DEFAULT_SOUND: &str = "default";

/// Default time-to-live in seconds (3 days).
pub const DEFAULT_TTL: u32 = 259_200;

/// Custom key/value data forwarded to the client application.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Title, message and delivery hints of a push notification.
///
/// Every field has an "empty" state (empty string, zero or absent number, empty
/// map) which [`Payload::merge`] treats as unset.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Payload {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub message: String,
    /// Application icon badge. Zero counts as unset.
    pub badge: Option<u32>,
    /// Sound name.
    pub sound: String,
    /// Custom data.
    pub metadata: Metadata,
    /// Time-to-live in seconds. Zero counts as unset.
    pub ttl: u32,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            title: String::new(),
            message: String::new(),
            badge: None,
            sound: DEFAULT_SOUND.to_string(),
            metadata: Metadata::new(),
            ttl: DEFAULT_TTL,
        }
    }
}

impl Payload {
    /// Fill the empty fields of `target` from `source` and return it.
    ///
    /// Scalars are only inherited when the target's value is empty. Metadata
    /// always accumulates: the result is `source.metadata` overridden by
    /// `target.metadata`.
    pub fn merge(source: &Payload, mut target: Payload) -> Payload {
        if target.title.is_empty() {
            target.title = source.title.clone();
        }

        if target.message.is_empty() {
            target.message = source.message.clone();
        }

        if target.sound.is_empty() {
            target.sound = source.sound.clone();
        }

        if target.badge.unwrap_or(0) == 0 {
            target.badge = source.badge;
        }

        let mut metadata = source.metadata.clone();
        metadata.extend(std::mem::take(&mut target.metadata));
        target.metadata = metadata;

        if target.ttl == 0 {
            target.ttl = source.ttl;
        }

        target
    }

    /// Badge to display, if any. Zero is reported as no badge.
    pub fn badge_count(&self) -> Option<u32> {
        self.badge.filter(|badge| *badge > 0)
    }
}

/// Fluent setters for anything that embeds a [`Payload`].
pub trait WithPayload: Sized {
    /// Borrow the embedded payload.
    fn payload(&self) -> &Payload;

    /// Mutably borrow the embedded payload.
    fn payload_mut(&mut self) -> &mut Payload;

    /// Set the title.
    fn title(mut self, value: impl Into<String>) -> Self {
        self.payload_mut().title = value.into();
        self
    }

    /// Set the message.
    fn message(mut self, value: impl Into<String>) -> Self {
        self.payload_mut().message = value.into();
        self
    }

    /// Set the badge.
    fn badge(mut self, value: u32) -> Self {
        self.payload_mut().badge = Some(value);
        self
    }

    /// Set the sound.
    fn sound(mut self, value: impl Into<String>) -> Self {
        self.payload_mut().sound = value.into();
        self
    }

    /// Insert one metadata entry, replacing any previous value for `name`.
    fn metadata(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload_mut()
            .metadata
            .insert(name.into(), value.into());
        self
    }

    /// Set the time-to-live in seconds.
    fn ttl(mut self, value: u32) -> Self {
        self.payload_mut().ttl = value;
        self
    }
}

impl WithPayload for Payload {
    fn payload(&self) -> &Payload {
        self
    }

    fn payload_mut(&mut self) -> &mut Payload {
        self
    }
}
