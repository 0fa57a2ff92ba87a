//! Backend configuration.

use std::path::PathBuf;

/// Legacy GCM HTTP endpoint.
pub const GCM_ENDPOINT: &str = "https://gcm-http.googleapis.com/gcm/send";

/// File name of the trust root shipped alongside the configuration.
pub const DEFAULT_ROOT_CERTIFICATE: &str = "entrust_root_certification_authority.pem";

/// APNs gateway environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    #[serde(alias = "development")]
    Sandbox,
}

impl Environment {
    /// Gateway host for this environment.
    pub fn host(&self) -> &'static str {
        match self {
            Self::Production => "api.push.apple.com",
            Self::Sandbox => "api.sandbox.push.apple.com",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "sandbox" | "development" => Ok(Self::Sandbox),
            other => color_eyre::eyre::bail!("unknown APNs environment: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ApnsConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Trust-root certificate (PEM).
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Client certificate (PKCS#12).
    #[serde(default)]
    pub certificate: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
    /// `apns-topic` header, usually the bundle id.
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            root: None,
            certificate: None,
            password: None,
            topic: None,
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GcmConfig {
    /// Server API key sent as `Authorization: key=...`.
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_gcm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for GcmConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            endpoint: default_gcm_endpoint(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_gcm_endpoint() -> String {
    GCM_ENDPOINT.to_string()
}
