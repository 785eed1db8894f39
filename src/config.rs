// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::peer::types::ServerConfig;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене только если включено в конфиге

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Переменная окружения с путём к JSON конфигу
pub const CONFIG_ENV: &str = "RELAYCALL_CONFIG";

/// Коллекция, в которой живут каналы
pub const DEFAULT_COLLECTION: &str = "channels";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "info".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    pub collection: String,
    pub log: LogConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: 10,
            collection: DEFAULT_COLLECTION.into(),
            log: LogConfig::default(),
        }
    }
}

/// Публичные STUN сервера Google
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
}

impl CallConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Конфиг по пути из `RELAYCALL_CONFIG`, иначе значения по умолчанию
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::EmptyUrl(server.id.clone()));
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = CallConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CallConfig::default());
        assert_eq!(config.collection, "channels");
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn turn_server_with_credentials_is_accepted() {
        let raw = r#"{
            "ice_servers": [
                { "id": "relay", "type": "turn", "url": "3.208.30.246:3478",
                  "username": "user", "credential": "secret" }
            ],
            "log": { "filter": "relaycall_lib=debug" }
        }"#;
        let config = CallConfig::from_json_str(raw).unwrap();
        assert_eq!(config.ice_servers[0].username.as_deref(), Some("user"));
        assert_eq!(config.log.filter, "relaycall_lib=debug");
        assert_eq!(config.ice_candidate_pool_size, 10);
    }

    #[test]
    fn turn_server_without_credentials_is_rejected() {
        let raw = r#"{ "ice_servers": [ { "id": "relay", "type": "turn", "url": "turn:h:3478" } ] }"#;
        let err = CallConfig::from_json_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTurnCredentials(id) if id == "relay"));
    }

    #[test]
    fn empty_url_is_rejected() {
        let raw = r#"{ "ice_servers": [ { "id": "blank", "type": "stun", "url": " " } ] }"#;
        assert!(matches!(
            CallConfig::from_json_str(raw),
            Err(ConfigError::EmptyUrl(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = CallConfig::load("/nonexistent/relaycall.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relaycall.json"));
    }
}
