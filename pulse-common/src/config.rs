//! Configuration loading
//!
//! Resolution order per option: environment variable, then the TOML
//! config file, then the compiled default. The config file lives at
//! `$PULSE_CONFIG` or `<config-dir>/pulse/config.toml`.

use serde::Serialize;
use std::path::PathBuf;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// SQLite URL, e.g. `sqlite://pulse.db` (`sqlite::memory:` in tests)
    pub url: String,
    /// Base pool size
    pub pool_size: u32,
    /// Extra connections allowed on top of the base pool
    pub max_overflow: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://pulse.db".to_string(),
            pool_size: 10,
            max_overflow: 20,
        }
    }
}

/// Security configuration: token signing and the configured credentials.
///
/// Credentials live in the environment for development deployments; a
/// production install would substitute a credential store.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub secret_key: String,
    /// Bearer token lifetime in minutes (24h default)
    pub token_expire_minutes: i64,
    pub admin_username: String,
    pub admin_password: String,
    pub viewer_username: String,
    pub viewer_password: String,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            secret_key: "change-me-in-production".to_string(),
            token_expire_minutes: 24 * 60,
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            viewer_username: "viewer".to_string(),
            viewer_password: "viewer123".to_string(),
        }
    }
}

/// Rate limiting configuration (per-minute budgets, shared burst)
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub general_per_minute: u32,
    pub analytics_per_minute: u32,
    pub admin_per_minute: u32,
    pub upload_per_minute: u32,
    pub burst_limit: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            general_per_minute: 60,
            analytics_per_minute: 30,
            admin_per_minute: 10,
            upload_per_minute: 5,
            burst_limit: 10,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize)]
pub struct CorsSettings {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Feature flags
#[derive(Debug, Clone, Serialize)]
pub struct FeatureFlags {
    /// Use the remote transformer sentiment endpoint instead of the lexicon
    pub remote_sentiment: bool,
    /// Drop non-English rows during upload ingestion
    pub english_only: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            remote_sentiment: false,
            english_only: true,
        }
    }
}

/// External service endpoints. Empty strings disable the integration and
/// the owning component degrades (cache miss, lexicon sentiment, no QA).
#[derive(Debug, Clone, Default)]
pub struct ExternalSettings {
    pub cache_url: String,
    pub queue_url: String,
    pub vector_url: String,
    pub sentiment_model_url: String,
    pub llm_url: String,
    pub llm_api_key: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub file: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub security: SecuritySettings,
    pub rate_limit: RateLimitSettings,
    pub cors: CorsSettings,
    pub features: FeatureFlags,
    pub external: ExternalSettings,
    pub log: LogSettings,
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

/// Locate and parse the TOML config file, if any.
fn load_config_file() -> Option<toml::Value> {
    let path = std::env::var("PULSE_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or_else(|| dirs::config_dir().map(|d| d.join("pulse").join("config.toml")))?;
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

struct Resolver {
    file: Option<toml::Value>,
}

impl Resolver {
    fn file_value(&self, section: &str, key: &str) -> Option<&toml::Value> {
        self.file.as_ref()?.get(section)?.get(key)
    }

    fn string(&self, env_key: &str, section: &str, key: &str, default: &str) -> String {
        std::env::var(env_key)
            .ok()
            .or_else(|| {
                self.file_value(section, key)
                    .and_then(|v| v.as_str().map(String::from))
            })
            .unwrap_or_else(|| default.to_string())
    }

    fn optional_string(&self, env_key: &str, section: &str, key: &str) -> Option<String> {
        std::env::var(env_key).ok().or_else(|| {
            self.file_value(section, key)
                .and_then(|v| v.as_str().map(String::from))
        })
    }

    fn integer<T: TryFrom<i64>>(&self, env_key: &str, section: &str, key: &str, default: T) -> T {
        if let Ok(raw) = std::env::var(env_key) {
            if let Ok(parsed) = raw.parse::<i64>() {
                if let Ok(value) = T::try_from(parsed) {
                    return value;
                }
            }
        }
        self.file_value(section, key)
            .and_then(|v| v.as_integer())
            .and_then(|v| T::try_from(v).ok())
            .unwrap_or(default)
    }

    fn boolean(&self, env_key: &str, section: &str, key: &str, default: bool) -> bool {
        if let Ok(raw) = std::env::var(env_key) {
            return matches!(
                raw.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        self.file_value(section, key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    fn string_list(&self, env_key: &str, section: &str, key: &str) -> Option<Vec<String>> {
        if let Ok(raw) = std::env::var(env_key) {
            return Some(raw.split(',').map(|s| s.trim().to_string()).collect());
        }
        self.file_value(section, key).and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect()
            })
        })
    }
}

impl Settings {
    /// Load settings: environment first, config file second, defaults
    /// last.
    pub fn from_env() -> Self {
        let resolver = Resolver {
            file: load_config_file(),
        };
        let db = DatabaseSettings::default();
        let sec = SecuritySettings::default();
        let rl = RateLimitSettings::default();
        let flags = FeatureFlags::default();
        let log = LogSettings::default();

        Self {
            database: DatabaseSettings {
                url: resolver.string("PULSE_DATABASE_URL", "database", "url", &db.url),
                pool_size: resolver.integer(
                    "PULSE_DATABASE_POOL_SIZE",
                    "database",
                    "pool_size",
                    db.pool_size,
                ),
                max_overflow: resolver.integer(
                    "PULSE_DATABASE_MAX_OVERFLOW",
                    "database",
                    "max_overflow",
                    db.max_overflow,
                ),
            },
            security: SecuritySettings {
                secret_key: resolver.string(
                    "PULSE_SECRET_KEY",
                    "security",
                    "secret_key",
                    &sec.secret_key,
                ),
                token_expire_minutes: resolver.integer(
                    "PULSE_TOKEN_EXPIRE_MINUTES",
                    "security",
                    "token_expire_minutes",
                    sec.token_expire_minutes,
                ),
                admin_username: resolver.string(
                    "PULSE_ADMIN_USERNAME",
                    "security",
                    "admin_username",
                    &sec.admin_username,
                ),
                admin_password: resolver.string(
                    "PULSE_ADMIN_PASSWORD",
                    "security",
                    "admin_password",
                    &sec.admin_password,
                ),
                viewer_username: resolver.string(
                    "PULSE_VIEWER_USERNAME",
                    "security",
                    "viewer_username",
                    &sec.viewer_username,
                ),
                viewer_password: resolver.string(
                    "PULSE_VIEWER_PASSWORD",
                    "security",
                    "viewer_password",
                    &sec.viewer_password,
                ),
            },
            rate_limit: RateLimitSettings {
                enabled: resolver.boolean("PULSE_RATE_LIMIT_ENABLED", "rate_limit", "enabled", rl.enabled),
                general_per_minute: resolver.integer(
                    "PULSE_RATE_LIMIT_GENERAL",
                    "rate_limit",
                    "general_per_minute",
                    rl.general_per_minute,
                ),
                analytics_per_minute: resolver.integer(
                    "PULSE_RATE_LIMIT_ANALYTICS",
                    "rate_limit",
                    "analytics_per_minute",
                    rl.analytics_per_minute,
                ),
                admin_per_minute: resolver.integer(
                    "PULSE_RATE_LIMIT_ADMIN",
                    "rate_limit",
                    "admin_per_minute",
                    rl.admin_per_minute,
                ),
                upload_per_minute: resolver.integer(
                    "PULSE_RATE_LIMIT_UPLOAD",
                    "rate_limit",
                    "upload_per_minute",
                    rl.upload_per_minute,
                ),
                burst_limit: resolver.integer(
                    "PULSE_RATE_LIMIT_BURST",
                    "rate_limit",
                    "burst_limit",
                    rl.burst_limit,
                ),
            },
            cors: CorsSettings {
                allowed_origins: resolver
                    .string_list("PULSE_CORS_ORIGINS", "cors", "allowed_origins")
                    .unwrap_or_else(|| CorsSettings::default().allowed_origins),
            },
            features: FeatureFlags {
                remote_sentiment: resolver.boolean(
                    "PULSE_USE_REMOTE_SENTIMENT",
                    "features",
                    "remote_sentiment",
                    flags.remote_sentiment,
                ),
                english_only: resolver.boolean(
                    "PULSE_ENGLISH_ONLY",
                    "features",
                    "english_only",
                    flags.english_only,
                ),
            },
            external: ExternalSettings {
                cache_url: resolver.string("PULSE_CACHE_URL", "external", "cache_url", ""),
                queue_url: resolver.string("PULSE_QUEUE_URL", "external", "queue_url", ""),
                vector_url: resolver.string("PULSE_VECTOR_URL", "external", "vector_url", ""),
                sentiment_model_url: resolver.string(
                    "PULSE_SENTIMENT_MODEL_URL",
                    "external",
                    "sentiment_model_url",
                    "",
                ),
                llm_url: resolver.string("PULSE_LLM_URL", "external", "llm_url", ""),
                llm_api_key: resolver.string("PULSE_LLM_API_KEY", "external", "llm_api_key", ""),
            },
            log: LogSettings {
                level: resolver.string("PULSE_LOG_LEVEL", "log", "level", &log.level),
                json: resolver.boolean("PULSE_LOG_JSON", "log", "json", log.json),
                file: resolver.optional_string("PULSE_LOG_FILE", "log", "file"),
            },
            host: resolver.string("PULSE_HOST", "api", "host", "0.0.0.0"),
            port: resolver.integer("PULSE_PORT", "api", "port", 8000),
            debug: resolver.boolean("PULSE_DEBUG", "api", "debug", false),
        }
    }

    /// Sanitized view for the admin config endpoint. Never includes
    /// secrets or credentials.
    pub fn sanitized(&self) -> serde_json::Value {
        serde_json::json!({
            "database": {
                "pool_size": self.database.pool_size,
                "max_overflow": self.database.max_overflow,
            },
            "rate_limit": self.rate_limit,
            "cors": self.cors,
            "features": self.features,
            "debug": self.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.database.pool_size, 10);
        assert_eq!(s.database.max_overflow, 20);
        assert_eq!(s.rate_limit.general_per_minute, 60);
        assert_eq!(s.rate_limit.burst_limit, 10);
        assert_eq!(s.security.token_expire_minutes, 24 * 60);
        assert!(s.features.english_only);
    }

    #[test]
    fn test_sanitized_hides_secrets() {
        let s = Settings::default();
        let v = s.sanitized().to_string();
        assert!(!v.contains("admin123"));
        assert!(!v.contains("change-me"));
    }

    #[test]
    fn test_file_values_fill_in_behind_env() {
        let file: toml::Value = toml::from_str(
            r#"
            [database]
            pool_size = 5

            [rate_limit]
            enabled = false

            [cors]
            allowed_origins = ["https://app.example.com"]
            "#,
        )
        .unwrap();
        let resolver = Resolver { file: Some(file) };

        assert_eq!(
            resolver.integer("PULSE_TEST_UNSET_POOL", "database", "pool_size", 10u32),
            5
        );
        assert!(!resolver.boolean("PULSE_TEST_UNSET_RL", "rate_limit", "enabled", true));
        assert_eq!(
            resolver.string_list("PULSE_TEST_UNSET_CORS", "cors", "allowed_origins"),
            Some(vec!["https://app.example.com".to_string()])
        );
        // Missing everywhere falls back to the default
        assert_eq!(
            resolver.integer("PULSE_TEST_UNSET_X", "database", "missing", 7u32),
            7
        );
    }
}
