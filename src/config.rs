//! Device configuration loading and validation
//!
//! Configuration is read once at startup, validated, and immutable afterwards.
//! Two sources are supported: a TOML runtime file, and the JSON provisioning
//! file downloaded from the Bytebeam console (identity, broker and inline
//! certificates).

use crate::protocol::{validate_identifier, IdentifierKind, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// PEM material resolved from the configured paths (or inline provisioning data)
    #[serde(skip)]
    pub credentials: Credentials,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Project (tenant) identifier (must match [a-zA-Z0-9._-]+)
    pub project_id: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// CA certificate used to verify the broker
    pub ca_cert_path: Option<PathBuf>,
    /// Device certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Device private key for mutual TLS
    pub client_key_path: Option<PathBuf>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive() -> u64 {
    60
}

/// Telemetry cadence and stream names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Interval between device shadow publishes
    #[serde(default = "default_publish_period_ms")]
    pub publish_period_ms: u64,
    /// Stream carrying the device shadow
    #[serde(default = "default_shadow_stream")]
    pub shadow_stream: String,
}

fn default_publish_period_ms() -> u64 {
    1000
}

fn default_shadow_stream() -> String {
    "device_shadow".to_string()
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            publish_period_ms: default_publish_period_ms(),
            shadow_stream: default_shadow_stream(),
        }
    }
}

/// Descriptive fields reported in the device shadow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceInfo {
    pub status: String,
    pub software_type: String,
    pub software_version: String,
    pub hardware_type: String,
    pub hardware_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            status: "Device is Up!".to_string(),
            software_type: env!("CARGO_PKG_NAME").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            hardware_type: std::env::consts::ARCH.to_string(),
            hardware_version: "unknown".to_string(),
        }
    }
}

/// PEM credential material
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

impl Credentials {
    /// Client certificate and key, when both are present
    pub fn client_auth(&self) -> Option<(&str, &str)> {
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<pem>"))
            .field("client_cert", &self.client_cert.as_ref().map(|_| "<pem>"))
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Provisioning file as issued by the Bytebeam console
#[derive(Debug, Deserialize)]
struct ProvisioningFile {
    project_id: String,
    device_id: String,
    broker: String,
    port: u16,
    #[serde(default)]
    authentication: Option<ProvisioningAuth>,
}

#[derive(Debug, Deserialize)]
struct ProvisioningAuth {
    ca_certificate: Option<String>,
    device_certificate: Option<String>,
    device_private_key: Option<String>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to parse provisioning JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Failed to read credential file {path}: {source}")]
    CredentialRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] ValidationError),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file and resolve credential paths.
    ///
    /// Relative certificate paths are resolved against the directory holding
    /// the configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: DeviceConfig = toml::from_str(&content)?;

        config.validate()?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.credentials = config.mqtt.read_credentials(base_dir)?;

        Ok(config)
    }

    /// Load identity, broker and credentials from a Bytebeam provisioning file
    pub fn load_provisioning_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let provisioning: ProvisioningFile = serde_json::from_str(&content)?;

        let credentials = provisioning
            .authentication
            .map(|auth| Credentials {
                ca_cert: auth.ca_certificate,
                client_cert: auth.device_certificate,
                client_key: auth.device_private_key,
            })
            .unwrap_or_default();

        let config = DeviceConfig {
            device: DeviceSection {
                id: provisioning.device_id,
                project_id: provisioning.project_id,
            },
            mqtt: MqttSection {
                broker_url: format!("mqtts://{}:{}", provisioning.broker, provisioning.port),
                ca_cert_path: None,
                client_cert_path: None,
                client_key_path: None,
                username_env: None,
                password_env: None,
                keep_alive_secs: default_keep_alive(),
            },
            telemetry: TelemetrySection::default(),
            device_info: DeviceInfo::default(),
            credentials,
        };

        config.validate()?;
        if config.credentials.client_cert.is_some() != config.credentials.client_key.is_some() {
            return Err(ConfigError::InvalidConfig(
                "provisioning file must carry both device_certificate and device_private_key"
                    .to_string(),
            ));
        }

        Ok(config)
    }

    /// Validate identity, broker address and telemetry settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(IdentifierKind::DeviceId, &self.device.id)?;
        validate_identifier(IdentifierKind::ProjectId, &self.device.project_id)?;
        validate_broker_url(&self.mqtt.broker_url)?;

        if self.mqtt.client_cert_path.is_some() != self.mqtt.client_key_path.is_some() {
            return Err(ConfigError::InvalidConfig(
                "client_cert_path and client_key_path must be set together".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be at least 5, got {}",
                self.mqtt.keep_alive_secs
            )));
        }
        if self.telemetry.publish_period_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish_period_ms must be greater than 0".to_string(),
            ));
        }
        validate_identifier(IdentifierKind::Stream, &self.telemetry.shadow_stream)?;

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"
project_id = "demo"

[mqtt]
broker_url = "mqtt://localhost:1883"

[telemetry]
publish_period_ms = 1000
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl MqttSection {
    fn read_credentials(&self, base_dir: &Path) -> Result<Credentials, ConfigError> {
        Ok(Credentials {
            ca_cert: read_pem(base_dir, self.ca_cert_path.as_deref())?,
            client_cert: read_pem(base_dir, self.client_cert_path.as_deref())?,
            client_key: read_pem(base_dir, self.client_key_path.as_deref())?,
        })
    }
}

fn read_pem(base_dir: &Path, path: Option<&Path>) -> Result<Option<String>, ConfigError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let resolved = if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    };
    std::fs::read_to_string(&resolved)
        .map(Some)
        .map_err(|source| ConfigError::CredentialRead {
            path: resolved,
            source,
        })
}

fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    if broker_url.is_empty() {
        return Err(ConfigError::InvalidBrokerUrl("broker URL is empty".to_string()));
    }
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
    if !matches!(url.scheme(), "mqtt" | "mqtts") {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (scheme must be mqtt or mqtts)"
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[device]
id = "42"
project_id = "demo"

[mqtt]
broker_url = "mqtts://cloud.bytebeam.io:8883"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
keep_alive_secs = 30

[telemetry]
publish_period_ms = 5000
shadow_stream = "shadow"

[device_info]
status = "Device is Up!"
software_type = "temp-humid-app"
software_version = "1.0.0"
hardware_type = "ESP32 DevKit V1"
hardware_version = "rev1"
"#;

        let config: DeviceConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.id, "42");
        assert_eq!(config.device.project_id, "demo");
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.telemetry.publish_period_ms, 5000);
        assert_eq!(config.telemetry.shadow_stream, "shadow");
        assert_eq!(config.device_info.hardware_type, "ESP32 DevKit V1");
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = DeviceConfig::test_config();
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.telemetry.shadow_stream, "device_shadow");
        assert_eq!(config.device_info.status, "Device is Up!");
        assert_eq!(config.credentials, Credentials::default());
    }

    #[test]
    fn test_empty_device_id_rejected() {
        let mut config = DeviceConfig::test_config();
        config.device.id = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIdentifier(ValidationError::Empty(
                IdentifierKind::DeviceId
            )))
        ));
    }

    #[test]
    fn test_broker_url_validation() {
        assert!(validate_broker_url("mqtt://localhost:1883").is_ok());
        assert!(validate_broker_url("mqtts://cloud.bytebeam.io:8883").is_ok());
        assert!(matches!(
            validate_broker_url(""),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            validate_broker_url("http://localhost"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            validate_broker_url("not a url"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_unpaired_client_cert_rejected() {
        let mut config = DeviceConfig::test_config();
        config.mqtt.client_cert_path = Some(PathBuf::from("device.pem"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_publish_period_rejected() {
        let mut config = DeviceConfig::test_config();
        config.telemetry.publish_period_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let credentials = Credentials {
            ca_cert: Some("-----BEGIN CERTIFICATE-----".to_string()),
            client_cert: Some("cert".to_string()),
            client_key: Some("super-secret-key".to_string()),
        };
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(credentials.client_auth(), Some(("cert", "super-secret-key")));
    }
}
