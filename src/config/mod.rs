//! Configuration Module
//!
//! One immutable [`Config`] is built at startup and handed to each
//! component. Sources, lowest precedence first:
//! - Built-in defaults
//! - An optional TOML file, with `${VAR}` / `${VAR:-default}` substitution
//! - The flat environment keys (`MQTT_HOST`, `ALSA_CARD`, `VOL_MAX`, ...)
//!
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use config::{File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::mixer::{ControlAddress, VolumeRange};
use crate::protocol::QoS;
use crate::topic::{validate_topic_level, validate_topic_name};

#[cfg(test)]
mod tests;

/// Environment keys and the config paths they override
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("MQTT_HOST", "mqtt.host"),
    ("MQTT_PORT", "mqtt.port"),
    ("MQTT_USER", "mqtt.username"),
    ("MQTT_PASS", "mqtt.password"),
    ("MQTT_BASE", "mqtt.base_topic"),
    ("MQTT_QOS", "mqtt.qos"),
    ("ALSA_CARD", "mixer.card"),
    ("ALSA_CONTROL", "mixer.control"),
    ("ALSA_NUMID", "mixer.numid"),
    ("VOL_MIN", "mixer.min"),
    ("VOL_MAX", "mixer.max"),
];

/// Environment flags and the config paths they override
pub const FLAG_ENV_KEYS: &[(&str, &str)] = &[
    ("PUBLISH_STATE", "state.publish"),
    ("RETAIN_STATE", "state.retain"),
];

/// `1` and the usual truthy words enable a flag; any other value disables it
fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str, env: &impl Fn(&str) -> Option<String>) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("substitution pattern is valid")
    });
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        env(var_name).unwrap_or_else(|| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Config(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker connection
    pub mqtt: MqttConfig,
    /// Mixer control
    pub mixer: MixerConfig,
    /// State publishing
    pub state: StateConfig,
    /// Reconnect timing
    pub reconnect: ReconnectConfig,
    /// Device identity
    pub device: DeviceConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Username; credentials are only sent when this is non-empty
    pub username: String,
    /// Password
    pub password: String,
    /// Topic prefix
    pub base_topic: String,
    /// QoS for both subscriptions and state publishes (0, 1 or 2)
    pub qos: u8,
    /// Client identifier, defaults to `{base_topic}-{device}`
    pub client_id: Option<String>,
    /// Keep alive in seconds (0 disables keepalive pings)
    pub keepalive: u16,
    /// Timeout for TCP connect and CONNACK
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            base_topic: "ha-satellite".to_string(),
            qos: 0,
            client_id: None,
            keepalive: 60,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl MqttConfig {
    /// Configured QoS; validated at load time
    pub fn qos(&self) -> QoS {
        QoS::from_u8(self.qos).unwrap_or_default()
    }

    /// Username and password to send in CONNECT, if any
    pub fn credentials(&self) -> Option<(String, Option<Bytes>)> {
        if self.username.is_empty() {
            return None;
        }
        let password = if self.password.is_empty() {
            None
        } else {
            Some(Bytes::from(self.password.clone()))
        };
        Some((self.username.clone(), password))
    }

    /// Client identifier for the given device
    pub fn client_id(&self, device: &str) -> String {
        match &self.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{}-{}", self.base_topic.replace('/', "-"), device),
        }
    }

    /// Broker address as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Mixer control configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Path to the amixer binary
    pub binary: PathBuf,
    /// Sound card index
    pub card: String,
    /// Control name, used when no numid is configured
    pub control: String,
    /// Numeric control id, preferred over the name
    pub numid: Option<String>,
    /// Lowest volume sent to the control
    pub min: i64,
    /// Highest volume sent to the control
    pub max: i64,
    /// Upper bound on a single amixer run
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/amixer"),
            card: "1".to_string(),
            control: "Speaker Playback Volume".to_string(),
            numid: None,
            min: 0,
            max: 255,
            timeout: Duration::from_secs(10),
        }
    }
}

impl MixerConfig {
    pub fn control_address(&self) -> ControlAddress {
        match self.numid.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => ControlAddress::NumId(id.to_string()),
            _ => ControlAddress::Name(self.control.clone()),
        }
    }

    pub fn range(&self) -> VolumeRange {
        VolumeRange::new(self.min, self.max)
    }
}

/// State publishing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Publish the applied volume to the state topic
    pub publish: bool,
    /// Retain flag on state publishes
    pub retain: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            publish: true,
            retain: false,
        }
    }
}

/// Reconnect timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed delay after a failed connect attempt
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// First delay after an established session is lost
    #[serde(with = "humantime_serde")]
    pub min_backoff: Duration,
    /// Upper bound for the session-loss backoff
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Device identity
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device name used in topics; defaults to the short host name
    pub name: Option<String>,
}

impl Config {
    /// Load configuration from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load configuration reading environment values through `env`.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("mqtt.host", "127.0.0.1")?
            .set_default("mqtt.port", 1883)?
            .set_default("mqtt.username", "")?
            .set_default("mqtt.password", "")?
            .set_default("mqtt.base_topic", "ha-satellite")?
            .set_default("mqtt.qos", 0)?
            .set_default("mqtt.keepalive", 60)?
            .set_default("mqtt.connect_timeout", "10s")?
            .set_default("mixer.binary", "/usr/bin/amixer")?
            .set_default("mixer.card", "1")?
            .set_default("mixer.control", "Speaker Playback Volume")?
            .set_default("mixer.min", 0)?
            .set_default("mixer.max", 255)?
            .set_default("mixer.timeout", "10s")?
            .set_default("state.publish", true)?
            .set_default("state.retain", false)?
            .set_default("reconnect.retry_delay", "5s")?
            .set_default("reconnect.min_backoff", "1s")?
            .set_default("reconnect.max_backoff", "30s")?;

        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content, &env);
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        // Empty environment values count as unset
        for (key, path) in ENV_KEYS {
            let value = env(key).filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*path, value)?;
        }
        for (key, path) in FLAG_ENV_KEYS {
            let value = env(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| env_flag(&v));
            builder = builder.set_override_option(*path, value)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.mqtt.host.trim().is_empty() {
            return invalid("mqtt.host cannot be empty".to_string());
        }
        if self.mqtt.port == 0 {
            return invalid("mqtt.port cannot be 0".to_string());
        }
        if QoS::from_u8(self.mqtt.qos).is_none() {
            return invalid("mqtt.qos must be 0, 1, or 2".to_string());
        }
        if let Err(e) = validate_topic_name(&self.mqtt.base_topic) {
            return invalid(format!("mqtt.base_topic: {}", e));
        }
        if self.mqtt.connect_timeout.is_zero() {
            return invalid("mqtt.connect_timeout must be greater than 0".to_string());
        }

        if self.mixer.min > self.mixer.max {
            return invalid(format!(
                "mixer.min ({}) must not exceed mixer.max ({})",
                self.mixer.min, self.mixer.max
            ));
        }
        if self.mixer.card.trim().is_empty() {
            return invalid("mixer.card cannot be empty".to_string());
        }
        if let ControlAddress::Name(name) = self.mixer.control_address() {
            if name.trim().is_empty() {
                return invalid("mixer.control is required when mixer.numid is not set".to_string());
            }
        }
        if self.mixer.timeout.is_zero() {
            return invalid("mixer.timeout must be greater than 0".to_string());
        }

        if self.reconnect.retry_delay.is_zero() {
            return invalid("reconnect.retry_delay must be greater than 0".to_string());
        }
        if self.reconnect.min_backoff.is_zero() {
            return invalid("reconnect.min_backoff must be greater than 0".to_string());
        }
        if self.reconnect.min_backoff > self.reconnect.max_backoff {
            return invalid("reconnect.min_backoff must not exceed reconnect.max_backoff".to_string());
        }

        if let Some(name) = &self.device.name {
            if let Err(e) = validate_topic_level(name) {
                return invalid(format!("device.name: {}", e));
            }
        }

        Ok(())
    }
}
