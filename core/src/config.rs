use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the signed REST pipeline of a single exchange account.
// Field order matters for serialization: simple values must be emitted
// before structs with custom (de)serialization.
// https://github.com/alexcrichton/toml-rs/issues/142#issuecomment-278970591
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RestSettings {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(with = "duration_millis", default = "default_rest_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_max_weight")]
    pub max_weight: u32,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    #[serde(default)]
    pub testnet: bool,
}

impl RestSettings {
    pub fn new_short(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            base_url,
            api_key,
            api_secret,
            timeout: default_rest_timeout(),
            max_weight: default_max_weight(),
            recv_window_ms: default_recv_window(),
            testnet: false,
        }
    }
}

fn default_rest_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_weight() -> u32 {
    1200
}

fn default_recv_window() -> u64 {
    5000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectSettings {
    #[serde(with = "duration_millis", default = "default_initial_delay")]
    pub initial_delay: Duration,
    #[serde(with = "duration_millis", default = "default_max_delay")]
    pub max_delay: Duration,
    /// `0` means unbounded.
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            max_attempts: 0,
            jitter: default_jitter(),
        }
    }
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_jitter() -> f64 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WsSettings {
    pub base_url: String,
    #[serde(default)]
    pub testnet: bool,
    #[serde(with = "duration_millis", default = "default_ping_interval")]
    pub ping_interval: Duration,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClockSyncSettings {
    #[serde(with = "duration_millis", default = "default_max_offset")]
    pub max_offset: Duration,
    #[serde(with = "duration_millis", default = "default_sync_interval")]
    pub sync_interval: Duration,
}

impl Default for ClockSyncSettings {
    fn default() -> Self {
        Self {
            max_offset: default_max_offset(),
            sync_interval: default_sync_interval(),
        }
    }
}

fn default_max_offset() -> Duration {
    Duration::from_millis(500)
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SupervisorStrategy {
    OneForOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_intensity")]
    pub intensity: u32,
    #[serde(with = "duration_millis", default = "default_period")]
    pub period: Duration,
    #[serde(default = "default_strategy")]
    pub strategy: SupervisorStrategy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            intensity: default_intensity(),
            period: default_period(),
            strategy: default_strategy(),
        }
    }
}

fn default_intensity() -> u32 {
    10
}

fn default_period() -> Duration {
    Duration::from_secs(60)
}

fn default_strategy() -> SupervisorStrategy {
    SupervisorStrategy::OneForOne
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExchangeSettings {
    pub rest: RestSettings,
    pub ws: WsSettings,
    #[serde(default)]
    pub clock_sync: ClockSyncSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
