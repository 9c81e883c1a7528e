use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// ChatPulse chat server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chatpulse-server", version, about = "ChatPulse chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHATPULSE_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHATPULSE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chatpulse.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHATPULSE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "CHATPULSE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Echo typing indicators back to the connection that sent them.
    /// Off by default: the typist's own client already shows its state.
    #[arg(long, env = "CHATPULSE_TYPING_ECHO_SELF")]
    pub typing_echo_self: bool,

    /// Browser origins allowed by CORS (loaded from the TOML file).
    /// Empty list = allow any origin.
    #[arg(skip)]
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./chatpulse.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            typing_echo_self: false,
            cors_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATPULSE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATPULSE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# ChatPulse Server Configuration
# Place this file at ./chatpulse.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATPULSE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# Echo typing indicators back to the connection that sent them
# typing_echo_self = false

# Browser origins allowed by CORS. Empty = allow any origin.
# cors_origins = ["http://localhost:5173"]
"#
    .to_string()
}
