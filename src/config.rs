use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::translation::openai;

/// Call signaling and translation coordination server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(
    name = "translink-server",
    version,
    about = "Call signaling and translation coordination server"
)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "TRANSLINK_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "TRANSLINK_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./translink.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "TRANSLINK_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Speech translation backend configuration (loaded from [translation] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub translation: Option<TranslationConfig>,

    /// User directory configuration (loaded from [directory] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,
}

/// Configuration for the OpenAI Realtime translation backend.
/// Translation stays unavailable (calls still work) when no API key is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// OpenAI API key. Empty disables the backend.
    #[serde(default)]
    pub api_key: String,

    /// Realtime model used for translation sessions
    #[serde(default = "default_translation_model")]
    pub model: String,

    /// Endpoint that exchanges the API key for a realtime session grant
    #[serde(default = "default_session_url")]
    pub session_url: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_translation_model(),
            session_url: default_session_url(),
        }
    }
}

fn default_translation_model() -> String {
    openai::DEFAULT_MODEL.to_string()
}

fn default_session_url() -> String {
    openai::DEFAULT_SESSION_URL.to_string()
}

/// Configuration for the user directory gating registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory mode: "open" or "roster"
    #[serde(default = "default_directory_mode")]
    pub mode: String,

    /// Allowed user ids when mode = "roster"
    #[serde(default)]
    pub roster: Vec<String>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            mode: default_directory_mode(),
            roster: Vec::new(),
        }
    }
}

fn default_directory_mode() -> String {
    "open".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./translink.toml".to_string(),
            json_logs: false,
            generate_config: false,
            translation: None,
            directory: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (TRANSLINK_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("TRANSLINK_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Translink Signaling Server Configuration
# Place this file at ./translink.toml or specify with --config <path>
# All settings can be overridden via environment variables (TRANSLINK_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Speech Translation (OpenAI Realtime) ----
# [translation]

# OpenAI API key. Leave empty to run without translation — calls still work,
# toggling translation reports "unavailable".
# api_key = ""

# Realtime model used for translation sessions
# model = "gpt-4o-mini-realtime-preview"

# Session grant endpoint
# session_url = "https://api.openai.com/v1/realtime/sessions"

# ---- User Directory ----
# [directory]

# Directory mode: "open" accepts any user id at registration,
# "roster" only accepts ids listed below.
# mode = "open"

# Allowed user ids when mode = "roster"
# roster = []
"#
    .to_string()
}
