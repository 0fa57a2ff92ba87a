use push_gateway::{ApnsConfig, DEFAULT_ROOT_CERTIFICATE, Environment, GcmConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Config file not found at {0}")]
    NotFound(PathBuf),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Chunk size must be greater than zero")]
    InvalidChunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    /// Devices per backend call.
    #[serde(default = "default_chunk")]
    pub chunk: usize,
    /// Keep a copy of every outgoing payload in the result.
    #[serde(default)]
    pub capture_payloads: bool,
    #[serde(default)]
    pub apns: ApnsConfig,
    #[serde(default)]
    pub gcm: GcmConfig,
}

fn default_chunk() -> usize {
    100
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            chunk: default_chunk(),
            capture_payloads: false,
            apns: ApnsConfig::default(),
            gcm: GcmConfig::default(),
        }
    }
}

impl PushConfig {
    /// Load the user configuration, then apply `PUSH_*` environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = if config_path.exists() {
            Self::parse(&std::fs::read_to_string(&config_path)?)?
        } else {
            Self::default()
        };

        config.discover_root(&Self::config_dir());
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a specific file, then apply `PUSH_*` environment overrides.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let mut config = Self::parse(&std::fs::read_to_string(path)?)?;
        config.discover_root(&Self::config_dir());
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("push-dispatch")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("push.toml")
    }

    /// Use the bundled trust root under `dir/push/` when none is configured.
    pub fn discover_root(&mut self, dir: &Path) {
        if self.apns.root.is_some() {
            return;
        }
        let bundled = dir.join("push").join(DEFAULT_ROOT_CERTIFICATE);
        if bundled.is_file() {
            tracing::debug!(root = %bundled.display(), "using bundled APNs trust root");
            self.apns.root = Some(bundled);
        }
    }

    /// Override fields from `PUSH_*` variables returned by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("PUSH_APNS_ENVIRONMENT") {
            self.apns.environment =
                value
                    .parse::<Environment>()
                    .map_err(|_| ConfigError::InvalidValue {
                        name: "PUSH_APNS_ENVIRONMENT",
                        value,
                    })?;
        }
        if let Some(value) = lookup("PUSH_APNS_ROOT") {
            self.apns.root = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("PUSH_APNS_CERTIFICATE") {
            self.apns.certificate = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("PUSH_APNS_PASSWORD") {
            self.apns.password = Some(value);
        }
        if let Some(value) = lookup("PUSH_APNS_TOPIC") {
            self.apns.topic = Some(value);
        }
        if let Some(value) = lookup("PUSH_GCM_KEY") {
            self.gcm.key = value;
        }
        if let Some(value) = lookup("PUSH_CHUNK") {
            self.chunk = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "PUSH_CHUNK",
                value,
            })?;
        }
        if let Some(value) = lookup("PUSH_CAPTURE_PAYLOADS") {
            self.capture_payloads = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk == 0 {
            return Err(ConfigError::InvalidChunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = PushConfig::default();
        assert_eq!(config.chunk, 100);
        assert!(!config.capture_payloads);
        assert_eq!(config.apns.environment, Environment::Production);
        assert!(config.apns.certificate.is_none());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = PushConfig::parse(
            r#"
            chunk = 50

            [apns]
            environment = "development"
            certificate = "certs/push.p12"
            password = "secret"

            [gcm]
            key = "AIza"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunk, 50);
        assert_eq!(config.apns.environment, Environment::Sandbox);
        assert_eq!(
            config.apns.certificate.as_deref(),
            Some(Path::new("certs/push.p12"))
        );
        assert_eq!(config.apns.password.as_deref(), Some("secret"));
        assert_eq!(config.gcm.key, "AIza");
        assert_eq!(config.gcm.endpoint, push_gateway::GCM_ENDPOINT);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PUSH_APNS_ENVIRONMENT", "sandbox"),
            ("PUSH_APNS_CERTIFICATE", "/tmp/cert.p12"),
            ("PUSH_GCM_KEY", "key-from-env"),
            ("PUSH_CHUNK", "25"),
            ("PUSH_CAPTURE_PAYLOADS", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = PushConfig::default();
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.apns.environment, Environment::Sandbox);
        assert_eq!(
            config.apns.certificate.as_deref(),
            Some(Path::new("/tmp/cert.p12"))
        );
        assert_eq!(config.gcm.key, "key-from-env");
        assert_eq!(config.chunk, 25);
        assert!(config.capture_payloads);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = PushConfig::default();
        let err = config
            .apply_env(|name| (name == "PUSH_CHUNK").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "PUSH_CHUNK",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let config = PushConfig::parse("chunk = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidChunk)));
    }

    #[test]
    fn test_missing_file() {
        let err = PushConfig::from_path(Path::new("/nonexistent/push.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_discover_bundled_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PushConfig::default();

        config.discover_root(dir.path());
        assert!(config.apns.root.is_none());

        let bundled = dir.path().join("push").join(DEFAULT_ROOT_CERTIFICATE);
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, "root").unwrap();

        config.discover_root(dir.path());
        assert_eq!(config.apns.root.as_deref(), Some(bundled.as_path()));
    }

    #[test]
    fn test_configured_root_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("push").join(DEFAULT_ROOT_CERTIFICATE);
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, "root").unwrap();

        let mut config = PushConfig::parse(
            r#"
            [apns]
            root = "/etc/ssl/custom.pem"
            "#,
        )
        .unwrap();
        config.discover_root(dir.path());

        assert_eq!(
            config.apns.root.as_deref(),
            Some(Path::new("/etc/ssl/custom.pem"))
        );
    }
}
