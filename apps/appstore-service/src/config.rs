use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use appstore::{ManagerOptions, SecretCipher};
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8788";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_JSON: bool = false;
const DEFAULT_SECRET_KEY_ID: &str = "v1";
const DEFAULT_WEBHOOK_CALLBACK_BASE_URL: &str = "http://127.0.0.1:8788";
const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WEBHOOK_CONCURRENCY: usize = 4;
const DEFAULT_WEBHOOK_PROVIDER_BASE_URL: &str = "https://example.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_json: bool,
    pub store_path: Option<PathBuf>,
    pub secret_encryption_key: Option<String>,
    pub secret_key_id: String,
    pub webhook_callback_base_url: String,
    pub webhook_timeout_ms: u64,
    pub webhook_concurrency: usize,
    pub webhook_provider_base_url: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid APPSTORE_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid {name} value '{value}': expected a positive integer")]
    InvalidNumber { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("APPSTORE_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw.clone(),
                source,
            })?;

        let log_filter = env::var("APPSTORE_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_json = env::var("APPSTORE_LOG_JSON")
            .ok()
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(DEFAULT_LOG_JSON);

        let store_path = env::var("APPSTORE_STORE_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let secret_encryption_key = env::var("APPSTORE_SECRET_ENCRYPTION_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let secret_key_id = env::var("APPSTORE_SECRET_KEY_ID")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SECRET_KEY_ID.to_string());

        let webhook_callback_base_url = env::var("APPSTORE_WEBHOOK_CALLBACK_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WEBHOOK_CALLBACK_BASE_URL.to_string());

        let webhook_timeout_ms =
            parse_positive("APPSTORE_WEBHOOK_TIMEOUT_MS", DEFAULT_WEBHOOK_TIMEOUT_MS)?;

        let webhook_concurrency = parse_positive(
            "APPSTORE_WEBHOOK_CONCURRENCY",
            DEFAULT_WEBHOOK_CONCURRENCY as u64,
        )? as usize;

        let webhook_provider_base_url = env::var("APPSTORE_WEBHOOK_PROVIDER_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WEBHOOK_PROVIDER_BASE_URL.to_string());

        Ok(Self {
            bind_addr,
            log_filter,
            log_json,
            store_path,
            secret_encryption_key,
            secret_key_id,
            webhook_callback_base_url,
            webhook_timeout_ms,
            webhook_concurrency,
            webhook_provider_base_url,
        })
    }

    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_json: false,
            store_path: None,
            secret_encryption_key: None,
            secret_key_id: DEFAULT_SECRET_KEY_ID.to_string(),
            webhook_callback_base_url: DEFAULT_WEBHOOK_CALLBACK_BASE_URL.to_string(),
            webhook_timeout_ms: 2_000,
            webhook_concurrency: DEFAULT_WEBHOOK_CONCURRENCY,
            webhook_provider_base_url: DEFAULT_WEBHOOK_PROVIDER_BASE_URL.to_string(),
        }
    }

    pub fn secret_cipher(&self) -> Option<SecretCipher> {
        SecretCipher::from_encoded(
            self.secret_encryption_key.as_deref(),
            Some(self.secret_key_id.as_str()),
        )
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            callback_base_url: self.webhook_callback_base_url.clone(),
            outbound_timeout: Duration::from_millis(self.webhook_timeout_ms),
            webhook_concurrency: self.webhook_concurrency,
            cipher: self.secret_cipher(),
        }
    }
}

fn parse_positive(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };

    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;

    #[test]
    fn manager_options_follow_config() {
        let mut config = Config::for_tests();
        config.webhook_timeout_ms = 1_500;
        config.webhook_concurrency = 8;
        config.secret_encryption_key = Some(URL_SAFE_NO_PAD.encode([4u8; 32]));
        config.secret_key_id = "k7".to_string();

        let options = config.manager_options();
        assert_eq!(options.outbound_timeout, Duration::from_millis(1_500));
        assert_eq!(options.webhook_concurrency, 8);
        assert_eq!(
            options.cipher.as_ref().map(|cipher| cipher.key_id().to_string()),
            Some("k7".to_string())
        );
    }

    #[test]
    fn malformed_key_disables_encryption() {
        let mut config = Config::for_tests();
        config.secret_encryption_key = Some("not-a-key".to_string());
        assert!(config.secret_cipher().is_none());
    }
}
