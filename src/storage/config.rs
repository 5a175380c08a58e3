use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Unknown time zone: {0}")]
    InvalidTimezone(String),
    #[error("Invalid reminder lead time: {0} minutes")]
    InvalidLeadTime(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub reminders: ReminderConfig,
    pub household: HouseholdConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    pub project_id: String,
    pub base_url: String,
    pub poll_interval_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderConfig {
    pub lead_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HouseholdConfig {
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub level: String,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn load_or_create() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("household-sync")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// How long before an event its reminder fires. Must be non-negative.
    pub fn reminder_lead(&self) -> Result<Duration, ConfigError> {
        let minutes = self.reminders.lead_minutes;
        if minutes < 0 {
            return Err(ConfigError::InvalidLeadTime(minutes));
        }
        Duration::try_minutes(minutes).ok_or(ConfigError::InvalidLeadTime(minutes))
    }

    /// The zone weekdays and months are evaluated in.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.household
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.household.timezone.clone()))
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = Self::config_dir();

        Self {
            storage: StorageConfig {
                database: config_dir.join("household.db"),
            },
            remote: RemoteConfig {
                project_id: String::new(),
                base_url: "https://firestore.googleapis.com/v1".to_string(),
                poll_interval_seconds: 10,
                id_token: None,
            },
            reminders: ReminderConfig { lead_minutes: 15 },
            household: HouseholdConfig {
                timezone: "UTC".to_string(),
            },
            logging: LoggingConfig {
                directory: config_dir,
                level: "info".to_string(),
            },
        }
    }
}
