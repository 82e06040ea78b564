//! Configuration system for the `Aether` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/aether/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error. The access token is only
//! taken from the command line or the environment, never from the file.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use url::Url;

use aether_proto::message::UserId;

use crate::chat::ChatConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting needed to connect is absent.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A URL setting is malformed or has the wrong scheme.
    #[error("invalid {field}: {reason}")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    reconnect: ReconnectFileConfig,
    chat: ChatFileConfig,
    presence: PresenceFileConfig,
    search: SearchFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    api_url: Option<String>,
    user_id: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    history_page_size: Option<u32>,
    ack_timeout_secs: Option<u64>,
    resurface_on_message: Option<bool>,
    initial_room: Option<String>,
}

/// `[presence]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceFileConfig {
    typing_window_ms: Option<u64>,
    typing_emit_interval_ms: Option<u64>,
}

/// `[search]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SearchFileConfig {
    debounce_ms: Option<u64>,
    page_size: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Reconnect policy after an established connection is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_delay: Duration,
    /// Attempts before giving up; `0` disables reconnecting.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Whether the driver should reconnect at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before attempt `attempt` (1-based).
    ///
    /// Doubles from `initial_delay` up to `max_delay`, minus up to a fifth
    /// of random jitter.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay);
        let max_jitter = u64::try_from(base.as_millis() / 5).unwrap_or(u64::MAX);
        if max_jitter == 0 {
            return base;
        }
        base.saturating_sub(Duration::from_millis(rng.random_range(0..=max_jitter)))
    }
}

/// Validated connection targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Streaming endpoint (`ws://` or `wss://`).
    pub server_url: Url,
    /// Request/response base (`http://` or `https://`).
    pub api_url: Url,
    /// The session user.
    pub user_id: UserId,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Streaming server URL.
    pub server_url: Option<String>,
    /// REST base URL; derived from `server_url` when absent.
    pub api_url: Option<String>,
    /// Identifier of the logged-in user.
    pub user_id: Option<String>,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Capacity of the command, notice and internal channels.
    pub channel_capacity: usize,

    // -- Reconnect --
    pub reconnect: ReconnectConfig,

    // -- Chat --
    /// Synchronization core tunables.
    pub chat: ChatConfig,
    /// Room to open at startup.
    pub initial_room: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_url: None,
            user_id: None,
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            chat: ChatConfig::default(),
            initial_room: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and silently
    /// ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let chat_defaults = defaults.chat;

        let ms = Duration::from_millis;
        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| file.network.server_url.clone()),
            api_url: cli.api_url.clone().or_else(|| file.network.api_url.clone()),
            user_id: cli.user_id.clone().or_else(|| file.network.user_id.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, ms),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, ms),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
            chat: ChatConfig {
                history_page_size: file
                    .chat
                    .history_page_size
                    .unwrap_or(chat_defaults.history_page_size),
                ack_timeout: file
                    .chat
                    .ack_timeout_secs
                    .map_or(chat_defaults.ack_timeout, Duration::from_secs),
                typing_window: file
                    .presence
                    .typing_window_ms
                    .map_or(chat_defaults.typing_window, ms),
                typing_emit_interval: file
                    .presence
                    .typing_emit_interval_ms
                    .map_or(chat_defaults.typing_emit_interval, ms),
                search_debounce: file
                    .search
                    .debounce_ms
                    .map_or(chat_defaults.search_debounce, ms),
                search_page_size: file
                    .search
                    .page_size
                    .unwrap_or(chat_defaults.search_page_size),
                resurface_on_message: file
                    .chat
                    .resurface_on_message
                    .unwrap_or(chat_defaults.resurface_on_message),
            },
            initial_room: cli
                .room
                .clone()
                .or_else(|| file.chat.initial_room.clone()),
        }
    }

    /// Validate and return the connection targets.
    ///
    /// Without an explicit API URL, the server URL's host is used with the
    /// matching HTTP scheme.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when the server URL or user id is absent,
    /// [`ConfigError::InvalidUrl`] for malformed URLs or wrong schemes.
    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        let raw_server = self
            .server_url
            .as_deref()
            .ok_or(ConfigError::Missing("server_url"))?;
        let server_url = parse_url("server_url", raw_server, &["ws", "wss"])?;

        let api_url = match self.api_url.as_deref() {
            Some(raw) => parse_url("api_url", raw, &["http", "https"])?,
            None => derive_api_url(&server_url)?,
        };

        let user_id = self
            .user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::Missing("user_id"))?;

        Ok(Endpoints {
            server_url,
            api_url,
            user_id: UserId::new(user_id),
        })
    }
}

fn parse_url(field: &'static str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            field,
            reason: format!("expected {} URL, got {}", schemes.join("/"), url.scheme()),
        });
    }
    Ok(url)
}

fn derive_api_url(server_url: &Url) -> Result<Url, ConfigError> {
    let scheme = if server_url.scheme() == "wss" { "https" } else { "http" };
    let host = server_url
        .host_str()
        .ok_or(ConfigError::Missing("api_url"))?;
    let raw = server_url
        .port()
        .map_or_else(|| format!("{scheme}://{host}/"), |port| format!("{scheme}://{host}:{port}/"));
    parse_url("api_url", &raw, &["http", "https"])
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time terminal chat client")]
pub struct CliArgs {
    /// WebSocket URL of the chat server.
    #[arg(long, env = "AETHER_SERVER_URL")]
    pub server_url: Option<String>,

    /// Base URL of the REST API (default: derived from the server URL).
    #[arg(long, env = "AETHER_API_URL")]
    pub api_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "AETHER_USER_ID")]
    pub user_id: Option<String>,

    /// Access token issued at login.
    #[arg(long, env = "AETHER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Room to open at startup (id or name).
    #[arg(long)]
    pub room: Option<String>,

    /// Path to config file (default: `~/.config/aether/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "AETHER_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/aether.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("aether").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
