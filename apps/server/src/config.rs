//! CLI configuration loading.
//!
//! Loads a YAML config file, then applies environment variable overrides
//! (§6.5 precedence: CLI > environment > file > defaults). CLI overrides
//! themselves are applied in `main.rs`, after this file's defaults/env pass.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use connect_core::state::Config;

/// Loads configuration from a YAML file (if given), then applies recognized
/// environment variable overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Applies recognized `QOBUZ_*`/`CONNECT_*` environment variable overrides.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("QOBUZ_EMAIL") {
        config.qobuz.email = val;
    }
    if let Ok(val) = std::env::var("QOBUZ_PASSWORD") {
        config.qobuz.password = val;
    }
    if let Ok(val) = std::env::var("QOBUZ_APP_ID") {
        config.qobuz.app_id = val;
    }
    if let Ok(val) = std::env::var("QOBUZ_APP_SECRET") {
        config.qobuz.app_secret = val;
    }
    if let Ok(val) = std::env::var("QOBUZ_MAX_QUALITY") {
        if let Ok(quality) = val.parse() {
            config.qobuz.max_quality = quality;
        }
    }

    if let Ok(val) = std::env::var("CONNECT_HTTP_PORT") {
        if let Ok(port) = val.parse() {
            config.server.http_port = port;
        }
    }
    if let Ok(val) = std::env::var("CONNECT_PROXY_PORT") {
        if let Ok(port) = val.parse() {
            config.server.proxy_port = port;
        }
    }
    if let Ok(val) = std::env::var("CONNECT_BIND_ADDRESS") {
        config.server.bind_address = val;
    }
    if let Ok(val) = std::env::var("CONNECT_ADVERTISE_IP") {
        if let Ok(ip) = val.parse::<IpAddr>() {
            config.server.advertise_ip = Some(ip);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Serializes the two tests below; both mutate process-global env vars.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn load_without_a_file_returns_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = load(None).unwrap();
        assert_eq!(config.server.http_port, 8689);
        assert_eq!(config.server.proxy_port, 7120);
    }

    #[test]
    fn env_override_wins_over_file_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("CONNECT_HTTP_PORT", "9100");
        let config = load(None).unwrap();
        std::env::remove_var("CONNECT_HTTP_PORT");
        assert_eq!(config.server.http_port, 9100);
    }
}
