use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::{env, path::Path, time::Duration};
use strum::Display;

pub const ENV_PREFIX: &str = "UNCLUTTER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub log_json: bool,
    pub body_limit_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 5000,
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            log_json: false,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub id: String,
    pub base_url: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.3,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 1024,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub max_body_chars: usize,
    pub digest_max_emails: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_body_chars: 10_000,
            digest_max_emails: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptLimits {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 10,
            refill_interval_ms: 100,
            refill_amount: 1,
        }
    }
}

/// Per-IP request ceiling in front of the whole router.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Seconds between replenishing one request
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // ~100 requests per 15 minutes
        Self {
            enabled: true,
            per_second: 9,
            burst_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthMode {
    /// Tokens are ignored, every caller is anonymous
    Disabled,
    /// A valid token identifies the caller, anything else is anonymous
    Optional,
    /// Analysis routes reject callers without a valid token
    Required,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token_ttl_secs: usize,
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Optional,
            token_ttl_secs: 7 * 24 * 60 * 60,
            min_password_len: 6,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub model: ModelConfig,
    pub prompt: PromptConfig,
    pub prompt_limits: PromptLimits,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
}

impl ServerConfig {
    /// Loads `config.toml` from `APP_DIR` (or `<workspace>/config`) when present,
    /// then applies `UNCLUTTER__SECTION__KEY` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = format!("{}/config.toml", config_dir());
        let mut cfg: ServerConfig = Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(port) = env::var("PORT") {
            cfg.server.port = port
                .parse()
                .map_err(|_| ConfigError::Message(format!("PORT is invalid: {port}")))?;
        }

        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

fn config_dir() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir = env!("CARGO_MANIFEST_DIR");
        let parent = Path::new(dir)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        format!("{parent}/config")
    })
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\n{:?}\n\nModel: {:?}\n\nPrompt: {:?}\n\nPrompt Limits: {:?}\n\nRate Limit: {:?}\n\nAuth: mode={} ttl={}s",
            self.server,
            self.model,
            self.prompt,
            self.prompt_limits,
            self.rate_limit,
            self.auth.mode,
            self.auth.token_ttl_secs,
        )
    }
}
