//! Config Module - Service configuration

use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub redemption: RedemptionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret. `JWT_SECRET` in the environment wins over this.
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub admin_email: String,
    pub admin_password: String,
    pub admin_full_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RedemptionConfig {
    /// Days a redemption code stays valid after issuance.
    pub code_ttl_days: i64,
    /// 64-char hex AES-256 key sealing the code payload.
    pub encryption_key: String,
    /// Attempts at minting a unique reference number before giving up.
    pub reference_max_attempts: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change_me_dev_secret".to_string(),
            token_ttl_hours: 24,
            admin_email: "admin@medconnect.example".to_string(),
            admin_password: "admin123!@#".to_string(),
            admin_full_name: "System Administrator".to_string(),
        }
    }
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            code_ttl_days: 30,
            // Dev-only key; override in any real deployment.
            encryption_key: "0f".repeat(32),
            reference_max_attempts: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            redemption: RedemptionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Effective signing secret, honoring the `JWT_SECRET` env override.
    pub fn secret(&self) -> String {
        std::env::var("JWT_SECRET").unwrap_or_else(|_| self.jwt_secret.clone())
    }
}

impl Config {
    /// Load from a TOML or JSON file
    pub async fn load(path: &str) -> Result<Self, String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config: {}", e))?;

        let config: Config = if path.ends_with(".toml") {
            toml::from_str(&content).map_err(|e| format!("Invalid TOML: {}", e))?
        } else if path.ends_with(".json") {
            serde_json::from_str(&content).map_err(|e| format!("Invalid JSON: {}", e))?
        } else {
            return Err("Unsupported config format".to_string());
        };

        Ok(config)
    }

    /// Validate config
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port".to_string());
        }

        if self.auth.token_ttl_hours <= 0 {
            errors.push("token_ttl_hours must be > 0".to_string());
        }

        if self.redemption.code_ttl_days <= 0 {
            errors.push("code_ttl_days must be > 0".to_string());
        }

        if self.redemption.reference_max_attempts == 0 {
            errors.push("reference_max_attempts must be > 0".to_string());
        }

        match hex::decode(&self.redemption.encryption_key) {
            Ok(bytes) if bytes.len() == 32 => {}
            _ => errors.push("encryption_key must be 64 hex characters (32 bytes)".to_string()),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Export config as TOML
    pub fn export_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = config.export_toml().unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.redemption.code_ttl_days, 30);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str("[server]\nport = 9999\n").unwrap();
        assert_eq!(parsed.server.port, 9999);
        assert_eq!(parsed.auth.token_ttl_hours, 24);
        assert_eq!(parsed.redemption.reference_max_attempts, 5);
    }

    #[test]
    fn test_validate_rejects_bad_key() {
        let mut config = Config::default();
        config.redemption.encryption_key = "deadbeef".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("encryption_key")));
    }
}
