//! Renderer configuration surface (§6.5): a single structured config loaded
//! from file, overridden by environment, overridden by CLI, in that order.

use std::net::IpAddr;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{RenderError, RenderResult};
use crate::session::DeviceInfo;

/// `qobuz.max_quality`: 0 auto-detects from DLNA capabilities, otherwise fixed.
pub const QUALITY_AUTO: i32 = 0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QobuzConfig {
    pub email: String,
    pub password: String,
    pub max_quality: i32,
    /// Vendor-issued app identity, required alongside the user's own
    /// credentials to sign REST calls (§4.3).
    pub app_id: String,
    pub app_secret: String,
}

impl Default for QobuzConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            max_quality: QUALITY_AUTO,
            app_id: String::new(),
            app_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub uuid: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { name: "Connect Render".to_string(), uuid: String::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Dlna,
    Local,
}

impl Default for BackendType {
    fn default() -> Self {
        Self::Local
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DlnaBackendConfig {
    pub ip: String,
    pub port: u16,
    pub fixed_volume: bool,
}

impl Default for DlnaBackendConfig {
    fn default() -> Self {
        Self { ip: String::new(), port: crate::dlna::backend::DEFAULT_DLNA_PORT, fixed_volume: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalBackendConfig {
    pub device: String,
    pub buffer_size: u32,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self { device: "default".to_string(), buffer_size: 2048 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendType,
    pub dlna: DlnaBackendConfig,
    pub local: LocalBackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    pub proxy_port: u16,
    pub bind_address: String,
    /// LAN IP advertised in mDNS and audio-proxy URLs. `None` auto-detects
    /// via the machine's default route.
    pub advertise_ip: Option<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8689,
            proxy_port: 7120,
            bind_address: "0.0.0.0".to_string(),
            advertise_ip: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// Maps to an `EnvFilter`-compatible level name (`warning` -> `warn`).
    #[must_use]
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

/// The renderer's full configuration (§6.5). Deserializes from YAML/JSON/TOML
/// with every field optional; [`Config::validate`] enforces the fields that
/// are actually required to start.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub qobuz: QobuzConfig,
    pub device: DeviceConfig,
    pub backend: BackendConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates required fields, assigning defaults for ones that may be
    /// auto-generated (device uuid).
    pub fn validate(&mut self) -> RenderResult<()> {
        if self.qobuz.email.is_empty() || self.qobuz.password.is_empty() {
            return Err(RenderError::Configuration("qobuz.email and qobuz.password are required".into()));
        }
        if self.qobuz.app_id.is_empty() || self.qobuz.app_secret.is_empty() {
            return Err(RenderError::Configuration("qobuz.app_id and qobuz.app_secret are required".into()));
        }
        if !matches!(self.qobuz.max_quality, QUALITY_AUTO | 5 | 6 | 7 | 27) {
            return Err(RenderError::Configuration(format!(
                "qobuz.max_quality must be one of 0, 5, 6, 7, 27 (got {})",
                self.qobuz.max_quality
            )));
        }
        if self.device.uuid.is_empty() {
            self.device.uuid = Uuid::new_v4().to_string();
        }
        if self.backend.kind == BackendType::Dlna && self.backend.dlna.ip.is_empty() {
            return Err(RenderError::Configuration("backend.dlna.ip is required when backend.type = dlna".into()));
        }
        if !(64..=16384).contains(&self.backend.local.buffer_size) {
            return Err(RenderError::Configuration(format!(
                "backend.local.buffer_size must be between 64 and 16384 (got {})",
                self.backend.local.buffer_size
            )));
        }
        Ok(())
    }

    /// The device identity announced in `JoinSession` and the discovery endpoint.
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            uuid: self.device.uuid.clone(),
            friendly_name: self.device.name.clone(),
            brand: crate::protocol_constants::APP_NAME.to_string(),
            model: crate::protocol_constants::APP_NAME.to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_qobuz() -> QobuzConfig {
        QobuzConfig {
            email: "a@b.com".into(),
            password: "p".into(),
            app_id: "app-id".into(),
            app_secret: "app-secret".into(),
            max_quality: QUALITY_AUTO,
        }
    }

    #[test]
    fn validate_rejects_missing_credentials() {
        let mut config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RenderError::Configuration(_)));
    }

    #[test]
    fn validate_rejects_missing_app_credentials() {
        let mut config = Config {
            qobuz: QobuzConfig { app_id: String::new(), ..sample_qobuz() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_max_quality() {
        let mut config = Config {
            qobuz: QobuzConfig { max_quality: 9, ..sample_qobuz() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_generates_uuid_when_absent() {
        let mut config = Config { qobuz: sample_qobuz(), ..Default::default() };
        config.validate().unwrap();
        assert!(!config.device.uuid.is_empty());
    }

    #[test]
    fn validate_requires_dlna_ip_when_selected() {
        let mut config = Config {
            qobuz: sample_qobuz(),
            backend: BackendConfig { kind: BackendType::Dlna, ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_buffer_size() {
        let mut config = Config {
            qobuz: sample_qobuz(),
            backend: BackendConfig {
                local: LocalBackendConfig { buffer_size: 32, ..Default::default() },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
