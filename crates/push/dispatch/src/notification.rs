//! Notification orchestration.

use std::collections::HashSet;

use push_core::{DeliveryResult, Device, Payload, Platform, WithPayload};
use push_gateway::{ApnsBackend, ApnsConfig, Backend, GcmBackend, GcmConfig};

use crate::{DispatchError, PushConfig};

/// Lifecycle of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    /// Devices are being added.
    Building,
    /// A send is in progress.
    Sending,
    /// Results were returned and the device set was cleared.
    Sent,
}

/// One logical broadcast to a deduplicated set of devices.
///
/// The notification payload holds defaults; each device's own payload wins
/// where it is non-empty (see [`Payload::merge`]).
#[derive(Debug, Clone)]
pub struct Notification {
    payload: Payload,
    devices: Vec<Device>,
    hashes: HashSet<String>,
    config: PushConfig,
    state: NotificationState,
}

impl Notification {
    /// Create a notification with the default configuration.
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_config(title, message, PushConfig::default())
    }

    pub fn with_config(
        title: impl Into<String>,
        message: impl Into<String>,
        config: PushConfig,
    ) -> Self {
        Self {
            payload: Payload::default().title(title).message(message),
            devices: Vec::new(),
            hashes: HashSet::new(),
            config,
            state: NotificationState::Building,
        }
    }

    /// Add a device. Returns `false` if a device with the same identity hash
    /// is already present, in which case nothing changes.
    pub fn push(&mut self, device: Device) -> bool {
        if !self.hashes.insert(device.identity_hash().to_string()) {
            tracing::debug!(device = %device.identity_hash(), "duplicate device ignored");
            return false;
        }
        self.devices.push(device);
        self.state = NotificationState::Building;
        true
    }

    /// Fluent form of [`Notification::push`].
    pub fn with_device(mut self, device: Device) -> Self {
        self.push(device);
        self
    }

    /// Number of distinct devices.
    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices in insertion order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn state(&self) -> NotificationState {
        self.state
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub fn apns_config(&self) -> &ApnsConfig {
        &self.config.apns
    }

    pub fn set_apns_config(&mut self, config: ApnsConfig) {
        self.config.apns = config;
    }

    pub fn gcm_config(&self) -> &GcmConfig {
        &self.config.gcm
    }

    pub fn set_gcm_config(&mut self, config: GcmConfig) {
        self.config.gcm = config;
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk
    }

    /// Devices per backend call. Zero is treated as one.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.config.chunk = size.max(1);
    }

    pub fn capture_payloads(&self) -> bool {
        self.config.capture_payloads
    }

    pub fn set_capture_payloads(&mut self, capture: bool) {
        self.config.capture_payloads = capture;
    }

    /// Send through the configured APNs and GCM gateways.
    pub async fn send(&mut self) -> Result<DeliveryResult, DispatchError> {
        let capture = self.config.capture_payloads;
        let apns = ApnsBackend::from_config(self.config.apns.clone()).with_capture(capture);
        let gcm = GcmBackend::from_config(&self.config.gcm)
            .map_err(|e| DispatchError::Setup {
                platform: Platform::Android,
                source: e.into(),
            })?
            .with_capture(capture);

        self.send_with(&apns, &gcm).await
    }

    /// Send through the given backends.
    ///
    /// Devices are grouped by platform, resolved against the notification
    /// payload and pushed in chunks, Apple first. The APNs certificate is
    /// checked before anything is sent when Apple devices are present. On
    /// success the device set is cleared. On error, or if the future is
    /// dropped before completion, the devices are kept and the state returns
    /// to [`NotificationState::Building`].
    #[tracing::instrument(name = "notification_send", skip_all, fields(devices = self.devices.len()))]
    pub async fn send_with<A, G>(
        &mut self,
        apns: &A,
        gcm: &G,
    ) -> Result<DeliveryResult, DispatchError>
    where
        A: Backend,
        G: Backend,
    {
        let Self {
            payload,
            devices,
            hashes,
            config,
            state,
        } = self;
        let guard = SendGuard::start(state);

        let (apple, android): (Vec<Device>, Vec<Device>) = devices
            .iter()
            .cloned()
            .map(|device| device.resolve(payload))
            .partition(Device::is_apns);

        if !apple.is_empty() {
            if let Err(e) = check_certificates(&config.apns) {
                tracing::error!(error = %e, "APNs precondition failed");
                return Err(e);
            }
        }

        let chunk_size = config.chunk.max(1);
        let mut result = dispatch(Platform::Apple, apns, &apple, chunk_size).await?;
        result.absorb(dispatch(Platform::Android, gcm, &android, chunk_size).await?);

        devices.clear();
        hashes.clear();
        guard.complete();

        tracing::info!(
            apple = apple.len(),
            android = android.len(),
            failures = result.failures.len(),
            updates = result.updates.len(),
            local_errors = result.local_errors.len(),
            "notification sent"
        );

        Ok(result)
    }
}

impl WithPayload for Notification {
    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }
}

/// Holds the notification in `Sending` and returns it to `Building` when
/// dropped before [`SendGuard::complete`].
struct SendGuard<'a> {
    state: &'a mut NotificationState,
    done: bool,
}

impl<'a> SendGuard<'a> {
    fn start(state: &'a mut NotificationState) -> Self {
        *state = NotificationState::Sending;
        Self { state, done: false }
    }

    fn complete(mut self) {
        *self.state = NotificationState::Sent;
        self.done = true;
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            *self.state = NotificationState::Building;
        }
    }
}

async fn dispatch<B: Backend>(
    platform: Platform,
    backend: &B,
    devices: &[Device],
    chunk_size: usize,
) -> Result<DeliveryResult, DispatchError> {
    let mut result = DeliveryResult::default();

    for (index, chunk) in devices.chunks(chunk_size).enumerate() {
        tracing::debug!(%platform, chunk = index, size = chunk.len(), "pushing chunk");

        let outcome = backend
            .push(chunk)
            .await
            .map_err(|e| DispatchError::Backend {
                platform,
                source: e.into(),
            })?;
        result.absorb(outcome);
    }

    Ok(result)
}

fn check_certificates(config: &ApnsConfig) -> Result<(), DispatchError> {
    let certificate = config
        .certificate
        .as_ref()
        .ok_or(DispatchError::MissingCertificate)?;

    if !certificate.is_file() {
        return Err(DispatchError::InvalidCertificate(certificate.clone()));
    }

    if let Some(root) = &config.root {
        if !root.is_file() {
            return Err(DispatchError::InvalidRootCertificate(root.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use push_core::WithPayload as _;

    use super::*;

    /// Records every chunk and fails or rotates the scripted tokens.
    #[derive(Default)]
    struct RecordingBackend {
        chunks: Mutex<Vec<Vec<Device>>>,
        fail: Vec<&'static str>,
        rotate: Vec<(&'static str, &'static str)>,
        broken: bool,
        stall: bool,
    }

    impl RecordingBackend {
        fn calls(&self) -> usize {
            self.chunks.lock().unwrap().len()
        }

        fn sizes(&self) -> Vec<usize> {
            self.chunks.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    impl Backend for RecordingBackend {
        async fn push(&self, chunk: &[Device]) -> color_eyre::eyre::Result<DeliveryResult> {
            self.chunks.lock().unwrap().push(chunk.to_vec());
            if self.broken {
                color_eyre::eyre::bail!("gateway unreachable");
            }
            if self.stall {
                std::future::pending::<()>().await;
            }

            let mut result = DeliveryResult::default();
            for device in chunk {
                if self.fail.iter().any(|token| *token == device.token()) {
                    result.fail(device.clone());
                }
                if let Some((_, token)) = self.rotate.iter().find(|(old, _)| *old == device.token()) {
                    result.update(device.clone(), *token);
                }
            }
            Ok(result)
        }
    }

    fn with_certificate(notification: &mut Notification) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        notification.set_apns_config(ApnsConfig {
            certificate: Some(file.path().to_path_buf()),
            ..Default::default()
        });
        file
    }

    #[test]
    fn test_blank_notification() {
        let notification = Notification::new("title", "message");
        assert_eq!(notification.payload().title, "title");
        assert_eq!(notification.payload().message, "message");
        assert_eq!(notification.state(), NotificationState::Building);
        assert!(notification.is_empty());
    }

    #[test]
    fn test_chaining() {
        let notification = Notification::new("title", "message")
            .badge(5)
            .sound("sound")
            .ttl(1234)
            .metadata("key1", "value1")
            .metadata("key2", "value2");

        let payload = notification.payload();
        assert_eq!(payload.badge, Some(5));
        assert_eq!(payload.sound, "sound");
        assert_eq!(payload.ttl, 1234);
        assert_eq!(payload.metadata.len(), 2);
    }

    #[test]
    fn test_unique_devices() {
        let mut notification = Notification::new("title", "message");
        assert!(notification.push(Device::gcm("token").unwrap().with_id("uuid")));
        assert!(notification.push(Device::apns("token").unwrap().with_id("uuid")));
        assert!(!notification.push(Device::gcm("token").unwrap().with_id("other")));
        assert!(!notification.push(Device::apns("token").unwrap()));

        assert_eq!(notification.count(), 2);
    }

    #[test]
    fn test_config_accessors() {
        let mut notification = Notification::new("t", "m");
        notification.set_chunk_size(0);
        assert_eq!(notification.chunk_size(), 1);

        notification.set_capture_payloads(true);
        assert!(notification.capture_payloads());

        notification.set_gcm_config(GcmConfig {
            key: "k".into(),
            ..Default::default()
        });
        assert_eq!(notification.gcm_config().key, "k");
        assert!(notification.apns_config().certificate.is_none());
    }

    #[tokio::test]
    async fn test_empty_send() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M");

        let result = notification.send_with(&apns, &gcm).await.unwrap();

        assert!(result.is_empty());
        assert_eq!(apns.calls() + gcm.calls(), 0);
        assert_eq!(notification.state(), NotificationState::Sent);
    }

    #[tokio::test]
    async fn test_chunks_preserve_order() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M");
        for i in 0..250 {
            notification.push(Device::gcm(format!("token-{i}")).unwrap());
        }

        notification.send_with(&apns, &gcm).await.unwrap();

        assert_eq!(apns.calls(), 0);
        assert_eq!(gcm.sizes(), vec![100, 100, 50]);

        let tokens: Vec<String> = gcm
            .chunks
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|d| d.token().to_string())
            .collect();
        let expected: Vec<String> = (0..250).map(|i| format!("token-{i}")).collect();
        assert_eq!(tokens, expected);
    }

    #[tokio::test]
    async fn test_devices_receive_resolved_payload() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M").badge(0).metadata("a", 1);
        let _cert = with_certificate(&mut notification);
        notification.push(Device::apns("apple").unwrap().badge(5).metadata("b", 2));
        notification.push(Device::gcm("android").unwrap());

        notification.send_with(&apns, &gcm).await.unwrap();

        let apple = &apns.chunks.lock().unwrap()[0][0];
        assert_eq!(apple.payload().title, "T");
        assert_eq!(apple.payload().badge, Some(5));
        assert_eq!(apple.payload().metadata.len(), 2);

        let android = &gcm.chunks.lock().unwrap()[0][0];
        assert_eq!(android.payload().message, "M");
        assert_eq!(android.payload().ttl, 259_200);
        assert_eq!(android.payload().metadata["a"], 1);
    }

    #[tokio::test]
    async fn test_results_aggregate_across_platforms_and_chunks() {
        let apns = RecordingBackend {
            fail: vec!["apple-1"],
            ..Default::default()
        };
        let gcm = RecordingBackend {
            fail: vec!["android-2"],
            rotate: vec![("android-0", "android-new")],
            ..Default::default()
        };
        let mut notification = Notification::new("T", "M");
        notification.set_chunk_size(2);
        let _cert = with_certificate(&mut notification);
        for i in 0..3 {
            notification.push(Device::apns(format!("apple-{i}")).unwrap());
            notification.push(Device::gcm(format!("android-{i}")).unwrap());
        }

        let result = notification.send_with(&apns, &gcm).await.unwrap();

        assert_eq!(apns.sizes(), vec![2, 1]);
        assert_eq!(gcm.sizes(), vec![2, 1]);
        let failed: Vec<&str> = result.failures.iter().map(Device::token).collect();
        assert_eq!(failed, vec!["apple-1", "android-2"]);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].device.token(), "android-0");
        assert_eq!(result.updates[0].token, "android-new");

        assert!(notification.is_empty());
        assert_eq!(notification.state(), NotificationState::Sent);
    }

    #[tokio::test]
    async fn test_invalid_certificate_aborts_before_any_backend() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M").badge(0);
        notification.set_apns_config(ApnsConfig {
            certificate: Some("/nonexistent/cert.p12".into()),
            ..Default::default()
        });
        notification.push(Device::apns("apple").unwrap().badge(5));
        notification.push(Device::gcm("android").unwrap());

        let err = notification.send_with(&apns, &gcm).await.unwrap_err();

        assert!(matches!(err, DispatchError::InvalidCertificate(_)));
        assert!(err.is_config());
        assert_eq!(apns.calls(), 0);
        assert_eq!(gcm.calls(), 0);
        assert_eq!(notification.count(), 2);
        assert_eq!(notification.state(), NotificationState::Building);
    }

    #[tokio::test]
    async fn test_directory_is_not_a_certificate() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let dir = tempfile::tempdir().unwrap();
        let mut notification = Notification::new("T", "M");
        notification.set_apns_config(ApnsConfig {
            certificate: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        notification.push(Device::apns("apple").unwrap());

        let err = notification.send_with(&apns, &gcm).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidCertificate(_)));
    }

    #[tokio::test]
    async fn test_missing_root_certificate() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M");
        let cert = tempfile::NamedTempFile::new().unwrap();
        notification.set_apns_config(ApnsConfig {
            certificate: Some(cert.path().to_path_buf()),
            root: Some("/nonexistent/root.pem".into()),
            ..Default::default()
        });
        notification.push(Device::apns("apple").unwrap());

        let err = notification.send_with(&apns, &gcm).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRootCertificate(_)));
    }

    #[tokio::test]
    async fn test_certificate_not_needed_without_apple_devices() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M");
        notification.push(Device::gcm("android").unwrap());

        notification.send_with(&apns, &gcm).await.unwrap();
        assert_eq!(gcm.calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let apns = RecordingBackend {
            broken: true,
            ..Default::default()
        };
        let gcm = RecordingBackend::default();
        let mut notification = Notification::new("T", "M");
        let _cert = with_certificate(&mut notification);
        notification.push(Device::apns("apple").unwrap());
        notification.push(Device::gcm("android").unwrap());

        let err = notification.send_with(&apns, &gcm).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Backend {
                platform: Platform::Apple,
                ..
            }
        ));
        assert!(!err.is_config());
        assert_eq!(gcm.calls(), 0);
    }

    #[tokio::test]
    async fn test_backend_error_keeps_devices() {
        let gcm = RecordingBackend {
            broken: true,
            ..Default::default()
        };
        let mut notification = Notification::new("T", "M");
        notification.push(Device::gcm("android").unwrap());

        notification
            .send_with(&RecordingBackend::default(), &gcm)
            .await
            .unwrap_err();

        assert_eq!(notification.count(), 1);
        assert_eq!(notification.state(), NotificationState::Building);
    }

    #[tokio::test]
    async fn test_dropped_send_returns_to_building() {
        let gcm = RecordingBackend {
            stall: true,
            ..Default::default()
        };
        let mut notification = Notification::new("T", "M");
        notification.push(Device::gcm("android").unwrap());

        let apns = RecordingBackend::default();
        let send = notification.send_with(&apns, &gcm);
        let elapsed = tokio::time::timeout(std::time::Duration::from_millis(20), send).await;

        assert!(elapsed.is_err());
        assert_eq!(gcm.calls(), 1);
        assert_eq!(notification.count(), 1);
        assert_eq!(notification.state(), NotificationState::Building);
    }

    #[tokio::test]
    async fn test_repeated_send_is_empty() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M");
        notification.push(Device::gcm("android").unwrap());

        notification.send_with(&apns, &gcm).await.unwrap();
        assert_eq!(gcm.calls(), 1);

        let again = notification.send_with(&apns, &gcm).await.unwrap();

        assert!(again.is_empty());
        assert_eq!(apns.calls() + gcm.calls(), 1);
        assert_eq!(notification.state(), NotificationState::Sent);
    }

    #[tokio::test]
    async fn test_push_after_send_reopens_notification() {
        let (apns, gcm) = (RecordingBackend::default(), RecordingBackend::default());
        let mut notification = Notification::new("T", "M");
        notification.push(Device::gcm("android").unwrap());
        notification.send_with(&apns, &gcm).await.unwrap();
        assert_eq!(notification.state(), NotificationState::Sent);

        assert!(notification.push(Device::gcm("android").unwrap()));

        assert_eq!(notification.state(), NotificationState::Building);
        assert_eq!(notification.count(), 1);

        notification.send_with(&apns, &gcm).await.unwrap();
        assert_eq!(gcm.calls(), 2);
    }
}
