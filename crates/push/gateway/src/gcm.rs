//! GCM backend over the legacy HTTP JSON API.

use color_eyre::eyre::WrapErr as _;
use push_core::{DeliveryResult, Device, Metadata, WithPayload as _};

use crate::{Backend, GcmConfig};

/// Body of one GCM send request.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GcmRequest {
    pub to: String,
    pub time_to_live: u32,
    pub data: GcmData,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GcmData {
    pub message: String,
    pub title: String,
    pub sound: String,
    pub appdata: Metadata,
}

impl GcmRequest {
    pub fn from_device(device: &Device) -> Self {
        let payload = device.payload();
        Self {
            to: device.token().to_string(),
            time_to_live: payload.ttl,
            data: GcmData {
                message: payload.message.clone(),
                title: payload.title.clone(),
                sound: payload.sound.clone(),
                appdata: payload.metadata.clone(),
            },
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct GcmResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
struct GcmResult {
    registration_id: Option<String>,
    /// Any non-null value marks the device as failed.
    error: Option<serde_json::Value>,
}

/// HTTP client for the GCM gateway.
#[trait_variant::make(Send)]
pub trait GcmTransport: Send + Sync {
    /// POST one request and return the raw response body.
    async fn post(&self, request: &GcmRequest) -> color_eyre::eyre::Result<String>;
}

/// Android backend.
///
/// Sends one request per device. The `results` array of every response is
/// read positionally against the chunk: entry `i` belongs to device `i`.
pub struct GcmBackend<T> {
    transport: T,
    capture: bool,
}

impl<T> GcmBackend<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            capture: false,
        }
    }

    /// Record every outgoing request body in the result.
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }
}

impl GcmBackend<HttpTransport> {
    /// Backend talking to the real gateway.
    pub fn from_config(config: &GcmConfig) -> color_eyre::eyre::Result<Self> {
        Ok(Self::new(HttpTransport::new(config)?))
    }
}

impl<T: GcmTransport> Backend for GcmBackend<T> {
    #[tracing::instrument(name = "gcm_push", skip_all, fields(devices = chunk.len()))]
    async fn push(&self, chunk: &[Device]) -> color_eyre::eyre::Result<DeliveryResult> {
        let mut result = DeliveryResult::default();
        let mut responses = Vec::new();

        for device in chunk {
            let request = GcmRequest::from_device(device);

            if self.capture {
                match serde_json::to_vec(&request) {
                    Ok(body) => result.raw_payloads.push(body),
                    Err(e) => tracing::warn!(error = %e, "failed to capture GCM payload"),
                }
            }

            match self.transport.post(&request).await {
                Ok(body) if body.is_empty() => {}
                Ok(body) => responses.push(body),
                Err(e) => tracing::error!(
                    device = %device.identity_hash(),
                    error = %e,
                    "failed to send GCM notification"
                ),
            }
        }

        for body in &responses {
            correlate(chunk, body, &mut result);
        }

        Ok(result)
    }
}

fn correlate(chunk: &[Device], body: &str, result: &mut DeliveryResult) {
    let response: GcmResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable GCM response");
            return;
        }
    };

    for (index, entry) in response.results.into_iter().enumerate() {
        let Some(device) = chunk.get(index) else {
            tracing::error!(index, size = chunk.len(), "GCM result outside of chunk");
            continue;
        };

        match serde_json::from_value::<GcmResult>(entry) {
            Ok(GcmResult {
                registration_id: Some(token),
                ..
            }) => result.update(device.clone(), token),
            Ok(GcmResult { error: Some(_), .. }) => result.fail(device.clone()),
            Ok(_) => {}
            Err(e) => tracing::error!(index, error = %e, "failed to handle GCM result"),
        }
    }
}

/// Transport over HTTPS with `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl HttpTransport {
    pub fn new(config: &GcmConfig) -> color_eyre::eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .wrap_err("failed to build GCM HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            key: config.key.clone(),
        })
    }
}

impl GcmTransport for HttpTransport {
    async fn post(&self, request: &GcmRequest) -> color_eyre::eyre::Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("key={}", self.key))
            .json(request)
            .send()
            .await
            .wrap_err("GCM request failed")?
            .error_for_status()
            .wrap_err("GCM rejected the request")?;

        response.text().await.wrap_err("failed to read GCM response")
    }
}
