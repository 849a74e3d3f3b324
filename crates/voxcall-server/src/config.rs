//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use voxcall_calls::{ControllerSettings, FoundrySettings, GraphSettings, PollPolicy, DEFAULT_FALLBACK_NOTICE};
use voxcall_speech::SpeechConfig;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech recognition and synthesis settings.
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Telephony credentials and callback address.
    #[serde(default)]
    pub calling: CallingConfig,

    /// Reply agent settings.
    #[serde(default)]
    pub assistant: AssistantConfig,

    #[serde(default)]
    pub calls: CallsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "voxcall_calls=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Clone, Deserialize)]
pub struct CallingConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Public URL the telephony platform posts call notifications to.
    #[serde(default)]
    pub callback_uri: String,
    #[serde(default = "default_login_base_url")]
    pub login_base_url: String,
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
}

#[derive(Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_poll_initial_delay_ms")]
    pub poll_initial_delay_ms: u64,
    #[serde(default = "default_poll_max_delay_ms")]
    pub poll_max_delay_ms: u64,
    #[serde(default = "default_poll_jitter")]
    pub poll_jitter: f32,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

/// Call handling policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CallsConfig {
    /// Spoken to the caller when no reply could be produced.
    #[serde(default = "default_fallback_notice")]
    pub fallback_notice: String,

    /// How long finished calls stay listed before they are pruned.
    /// Zero disables pruning.
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3978
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_login_base_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_poll_initial_delay_ms() -> u64 {
    500
}

fn default_poll_max_delay_ms() -> u64 {
    5_000
}

fn default_poll_jitter() -> f32 {
    0.2
}

fn default_poll_max_attempts() -> u32 {
    60
}

fn default_poll_timeout_ms() -> u64 {
    60_000
}

fn default_fallback_notice() -> String {
    DEFAULT_FALLBACK_NOTICE.to_string()
}

fn default_retention_seconds() -> u64 {
    3_600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CallingConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            callback_uri: String::new(),
            login_base_url: default_login_base_url(),
            graph_base_url: default_graph_base_url(),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            agent_id: String::new(),
            api_key: String::new(),
            api_version: default_api_version(),
            poll_initial_delay_ms: default_poll_initial_delay_ms(),
            poll_max_delay_ms: default_poll_max_delay_ms(),
            poll_jitter: default_poll_jitter(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            fallback_notice: default_fallback_notice(),
            retention_seconds: default_retention_seconds(),
        }
    }
}

impl fmt::Debug for CallingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallingConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("callback_uri", &self.callback_uri)
            .field("login_base_url", &self.login_base_url)
            .field("graph_base_url", &self.graph_base_url)
            .finish()
    }
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("endpoint", &self.endpoint)
            .field("agent_id", &self.agent_id)
            .field("api_key", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("poll_initial_delay_ms", &self.poll_initial_delay_ms)
            .field("poll_max_delay_ms", &self.poll_max_delay_ms)
            .field("poll_jitter", &self.poll_jitter)
            .field("poll_max_attempts", &self.poll_max_attempts)
            .field("poll_timeout_ms", &self.poll_timeout_ms)
            .finish()
    }
}

impl CallingConfig {
    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            login_base_url: self.login_base_url.clone(),
            graph_base_url: self.graph_base_url.clone(),
            ..GraphSettings::new(self.client_id.clone(), self.client_secret.clone())
        }
    }
}

impl AssistantConfig {
    pub fn foundry_settings(&self) -> FoundrySettings {
        FoundrySettings {
            endpoint: self.endpoint.clone(),
            agent_id: self.agent_id.clone(),
            api_key: self.api_key.clone(),
            api_version: self.api_version.clone(),
            poll: PollPolicy {
                initial_delay: Duration::from_millis(self.poll_initial_delay_ms),
                max_delay: Duration::from_millis(self.poll_max_delay_ms),
                jitter_factor: self.poll_jitter,
                max_attempts: self.poll_max_attempts,
                timeout: Duration::from_millis(self.poll_timeout_ms),
            },
        }
    }
}

impl Config {
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            callback_uri: self.calling.callback_uri.clone(),
            fallback_notice: self.calls.fallback_notice.clone(),
            audio_format: self.speech.audio_format(),
        }
    }

    /// Checks the settings the server cannot run without.
    ///
    /// Missing calling or assistant settings only warn: the server still
    /// starts, and calls fail (or fall back) individually.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the speech key or region is absent,
    /// and `ConfigError::Invalid` for unusable speech limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.speech.subscription_key.trim().is_empty() {
            return Err(ConfigError::Missing("speech.subscription_key (SPEECH_SERVICE_KEY)"));
        }
        if self.speech.region.trim().is_empty() {
            return Err(ConfigError::Missing("speech.region (SPEECH_SERVICE_REGION)"));
        }
        self.speech
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.calling.client_id.trim().is_empty() || self.calling.client_secret.trim().is_empty() {
            tracing::warn!("calling client id or secret not configured; incoming calls cannot be answered");
        }
        if self.calling.callback_uri.trim().is_empty() {
            tracing::warn!("calling.callback_uri not configured");
        }
        if self.assistant.endpoint.trim().is_empty() || self.assistant.agent_id.trim().is_empty() {
            tracing::warn!("assistant endpoint or agent id not configured; callers will hear the fallback notice");
        }
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting is absent.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies overrides from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading overrides through `lookup`.
///
/// Environment variable overrides:
/// - `VOXCALL_HOST`, `VOXCALL_PORT` override `server.host` and `server.port`
/// - `VOXCALL_LOG_LEVEL` overrides `logging.level`
/// - `VOXCALL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `SPEECH_SERVICE_KEY`, `SPEECH_SERVICE_REGION`, `SPEECH_LANGUAGE` and
///   `SPEECH_VOICE_NAME` override the matching `speech` keys
/// - `CALLING_CLIENT_ID`, `CALLING_CLIENT_SECRET` and `BOT_CALLBACK_URI`
///   override the `calling` section
/// - `FOUNDRY_ENDPOINT`, `FOUNDRY_AGENT_ID` and `FOUNDRY_API_KEY` override
///   the `assistant` section
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config_with<F>(path: Option<&str>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, lookup);
    Ok(config)
}

fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(host) = var("VOXCALL_HOST") {
        match host.parse() {
            Ok(parsed) => config.server.host = parsed,
            Err(_) => tracing::warn!(value = %host, "ignoring unparsable VOXCALL_HOST"),
        }
    }
    if let Some(port) = var("VOXCALL_PORT") {
        match port.parse() {
            Ok(parsed) => config.server.port = parsed,
            Err(_) => tracing::warn!(value = %port, "ignoring unparsable VOXCALL_PORT"),
        }
    }
    if let Some(level) = var("VOXCALL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("VOXCALL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if let Some(key) = var("SPEECH_SERVICE_KEY") {
        config.speech.subscription_key = key;
    }
    if let Some(region) = var("SPEECH_SERVICE_REGION") {
        config.speech.region = region;
    }
    if let Some(language) = var("SPEECH_LANGUAGE") {
        config.speech.language = language;
    }
    if let Some(voice) = var("SPEECH_VOICE_NAME") {
        config.speech.voice = voice;
    }

    if let Some(client_id) = var("CALLING_CLIENT_ID") {
        config.calling.client_id = client_id;
    }
    if let Some(secret) = var("CALLING_CLIENT_SECRET") {
        config.calling.client_secret = secret;
    }
    if let Some(uri) = var("BOT_CALLBACK_URI") {
        config.calling.callback_uri = uri;
    }

    if let Some(endpoint) = var("FOUNDRY_ENDPOINT") {
        config.assistant.endpoint = endpoint;
    }
    if let Some(agent_id) = var("FOUNDRY_AGENT_ID") {
        config.assistant.agent_id = agent_id;
    }
    if let Some(api_key) = var("FOUNDRY_API_KEY") {
        config.assistant.api_key = api_key;
    }
}
