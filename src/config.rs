use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub openai: OpenAiConfig,
    pub protalk: ProTalkConfig,
    pub retry: RetryConfig,
    pub polling: PollingConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.bizo-chat/state.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProTalkConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ProTalkConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.pro-talk.ru/api/v1.0".to_string(),
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_jitter_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            max_attempts: 60,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_messages: 20 }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("BIZO_CHAT_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.bizo-chat/bizo-chat.json"))
}

fn env_override(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();
    let mut cfg = Config::default();

    if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => tracing::warn!(path = %config_path.display(), "ignoring invalid config: {err}"),
            },
            Err(err) => tracing::warn!(path = %config_path.display(), "config unreadable: {err}"),
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(token) = env_override("BIZO_CHAT_TOKEN") {
        cfg.auth.token = Some(token);
    }
    if let Some(url) = env_override("BIZO_CHAT_DATABASE_URL") {
        cfg.database.url = Some(url);
    }
    if let Some(path) = env_override("BIZO_CHAT_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }
    if let Some(url) = env_override("BIZO_CHAT_OPENAI_URL") {
        cfg.openai.api_url = url;
    }
    if let Some(model) = env_override("BIZO_CHAT_OPENAI_MODEL") {
        cfg.openai.model = model;
    }
    if let Some(url) = env_override("BIZO_CHAT_PROTALK_URL") {
        cfg.protalk.base_url = url;
    }
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}
