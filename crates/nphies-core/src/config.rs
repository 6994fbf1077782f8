use crate::error::{PollError, Result};
use crate::paths;
use crate::types::BusinessTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ExchangeAuth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeAuth {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// ExchangeConfig
// ---------------------------------------------------------------------------

/// Where and how to poll. Injected into the transport at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub endpoint: String,
    #[serde(default)]
    pub auth: ExchangeAuth,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Provider license placed in the poll request's sender slot.
    #[serde(default = "default_sender_id")]
    pub sender_id: String,
    #[serde(default = "default_receiver_id")]
    pub receiver_id: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_sender_id() -> String {
    "provider".to_string()
}

fn default_receiver_id() -> String {
    "nphies".to_string()
}

impl ExchangeConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth: ExchangeAuth::None,
            timeout_secs: default_timeout_secs(),
            sender_id: default_sender_id(),
            receiver_id: default_receiver_id(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// MatchingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Half-width of the service-date window used by the heuristic strategy.
    #[serde(default = "default_window_days")]
    pub heuristic_window_days: u32,
    /// Upper bound on heuristic candidates considered before giving up.
    #[serde(default = "default_max_candidates")]
    pub max_heuristic_candidates: usize,
    /// Tables that may receive records created from payer-initiated messages.
    #[serde(default = "default_create_policy")]
    pub create_policy: Vec<BusinessTable>,
}

fn default_window_days() -> u32 {
    30
}

fn default_max_candidates() -> usize {
    5
}

fn default_create_policy() -> Vec<BusinessTable> {
    vec![
        BusinessTable::AdvancedAuthorizations,
        BusinessTable::Communications,
    ]
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            heuristic_window_days: default_window_days(),
            max_heuristic_candidates: default_max_candidates(),
            create_policy: default_create_policy(),
        }
    }
}

impl MatchingConfig {
    pub fn may_create(&self, table: BusinessTable) -> bool {
        self.create_policy.contains(&table)
    }
}

// ---------------------------------------------------------------------------
// ScheduleConfig / ServerConfig / RetentionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Absent means polls run only when triggered manually.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

impl ScheduleConfig {
    /// A zero interval is treated as unscheduled.
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_logs: Option<usize>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            version: 1,
            exchange: ExchangeConfig::new(endpoint),
            matching: MatchingConfig::default(),
            schedule: ScheduleConfig::default(),
            server: ServerConfig::default(),
            retention: RetentionConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(PollError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let endpoint = self.exchange.endpoint.trim();
        if endpoint.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "exchange.endpoint is empty".to_string(),
            });
        } else if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("exchange.endpoint '{endpoint}' is not an http(s) URL"),
            });
        }

        if self.exchange.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "exchange.timeout_secs must be greater than zero".to_string(),
            });
        }

        if let ExchangeAuth::Bearer { token } = &self.exchange.auth {
            if token.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "exchange.auth bearer token is empty".to_string(),
                });
            }
        }

        if self.matching.max_heuristic_candidates == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "matching.max_heuristic_candidates is 0; heuristic matching is disabled"
                    .to_string(),
            });
        }

        if let Some(secs) = self.schedule.interval_secs {
            if secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "schedule.interval_secs must be greater than zero; omit it for manual polling"
                        .to_string(),
                });
            } else if secs < 10 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "schedule.interval_secs={secs} is shorter than the 10s minimum"
                    ),
                });
            }
        }

        warnings
    }

    /// Fail on any `Error`-level warning.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PollError::InvalidConfig(errors.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
