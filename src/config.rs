use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
    pub acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub token_ttl_hours: Option<i64>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://haulage.db".to_string(),
            max_connections: Some(10),
            acquire_timeout_seconds: Some(30),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: Some(24),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("text".to_string()),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| MarketError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| MarketError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HAULAGE_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(jwt_secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = Some(jwt_secret);
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(MarketError::Config("Server port cannot be 0".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(MarketError::Config("Database URL cannot be empty".to_string()));
        }

        match self.auth.jwt_secret.as_deref() {
            Some(secret) if secret.len() >= 16 => {}
            Some(_) => {
                return Err(MarketError::Config(
                    "JWT secret must be at least 16 bytes".to_string(),
                ))
            }
            None => return Err(MarketError::Config("JWT secret is not set".to_string())),
        }

        if let Some(ttl) = self.auth.token_ttl_hours {
            if ttl <= 0 {
                return Err(MarketError::Config("Token TTL must be positive".to_string()));
            }
        }

        if let Some(format) = self.logging.format.as_deref() {
            if format != "text" && format != "json" {
                return Err(MarketError::Config(format!("Unknown log format: {}", format)));
            }
        }

        Ok(())
    }

    pub fn get_database_url(&self) -> &str {
        &self.database.url
    }

    pub fn get_server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn get_jwt_secret(&self) -> Option<&str> {
        self.auth.jwt_secret.as_deref()
    }

    pub fn token_ttl_hours(&self) -> i64 {
        self.auth.token_ttl_hours.unwrap_or(24)
    }

    pub fn is_json_logging(&self) -> bool {
        self.logging.format.as_deref() == Some("json")
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| MarketError::Config(format!("Failed to serialize default config: {}", e)))?;

    std::fs::write(path, toml_str)
        .map_err(|e| MarketError::Config(format!("Failed to write default config file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn with_secret() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = Some("0123456789abcdef-test".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.get_database_url(), "sqlite://haulage.db");
        assert_eq!(config.token_ttl_hours(), 24);
    }

    #[test]
    fn test_config_validation() {
        let mut config = with_secret();
        assert!(config.validate().is_ok());

        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_or_short_secret_is_rejected() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = Some("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut config = with_secret();
        config.logging.format = Some("xml".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[server]\nport = 9090\n\n[auth]\njwt_secret = \"partial-file-secret-value\"\n",
        )
        .unwrap();

        let config = AppConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.max_connections, Some(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        create_default_config_file(path).unwrap();
        assert!(path.exists());

        let loaded_config = AppConfig::load(path).unwrap();
        assert_eq!(loaded_config.server.port, 8000);
        assert_eq!(loaded_config.logging.level, "info");
    }
}
