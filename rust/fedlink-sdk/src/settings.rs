//! Loading and validation of client settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An example
//! configuration file can be found in the `configs/` directory located in the repository root.

use std::{fmt, path::Path, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, DeserializeOwned, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use url::Url;
use validator::{Validate, ValidationErrors};

use crate::client::DEFAULT_CHUNK_SIZE;
pub use fedlink_core::settings::LoggingSettings;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined client settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub client: ClientSettings,
    #[serde(default)]
    pub endpoints: EndpointSettings,
    #[serde(default)]
    #[validate]
    pub round: RoundSettings,
    #[serde(default)]
    #[validate]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// The subset of the settings the round coordinator needs.
    pub fn coordinator(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            endpoints: self.endpoints.clone(),
            round: self.round.clone(),
            storage: self.storage.clone(),
        }
    }
}

/// Deserialize any section of the client configuration file, with the same environment overrides
/// as [`Settings::new`].
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let mut config = Config::new();
    config.merge(config::File::from(path.as_ref()))?;
    config.merge(Environment::with_prefix("fedlink").separator("__"))?;
    config.try_into()
}

#[derive(Debug, Clone)]
/// The settings consumed by the [`RoundCoordinator`](crate::RoundCoordinator).
pub struct CoordinatorSettings {
    pub endpoints: EndpointSettings,
    pub round: RoundSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Participant identity settings.
pub struct ClientSettings {
    /// The identifier of the participant, used to name its uploads on the server.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// id = "hospital-a"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_CLIENT__ID=hospital-a
    /// ```
    #[validate(length(min = 1))]
    pub id: String,

    /// The device the local trainer realizes the model on. Only passed through to the trainer.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [client]
    /// device = "cuda"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_CLIENT__DEVICE=cuda
    /// ```
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_device() -> String {
    "cpu".to_string()
}

#[derive(Debug, Deserialize, Clone)]
/// Remote endpoint settings.
pub struct EndpointSettings {
    /// The federated server publishing the global model. Without it, the participant waits for
    /// the global model to be placed in the model slot by other means.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [endpoints]
    /// server_url = "http://127.0.0.1:8000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_ENDPOINTS__SERVER_URL=http://127.0.0.1:8000
    /// ```
    #[serde(default)]
    pub server_url: Option<Url>,

    /// The relay that forwards checkpoints to the federated server.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [endpoints]
    /// relay_url = "http://127.0.0.1:5000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_ENDPOINTS__RELAY_URL=http://127.0.0.1:5000
    /// ```
    #[serde(default = "default_relay_url")]
    pub relay_url: Url,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            relay_url: default_relay_url(),
        }
    }
}

fn default_relay_url() -> Url {
    Url::parse("http://127.0.0.1:5000").expect("the default relay URL is a valid URL")
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Round lifecycle settings.
pub struct RoundSettings {
    /// The number of local epochs per round.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// epochs_per_round = 3
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_ROUND__EPOCHS_PER_ROUND=3
    /// ```
    #[validate(range(min = 1))]
    #[serde(default = "default_epochs_per_round")]
    pub epochs_per_round: u32,

    /// The delay in seconds between two checks for the global model.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// poll_interval = 5
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_ROUND__POLL_INTERVAL=5
    /// ```
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_seconds"
    )]
    pub poll_interval: Duration,

    /// How long in seconds to wait for the global model before the round is given up. Leave this
    /// out to wait forever.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// wait_timeout = 600
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_ROUND__WAIT_TIMEOUT=600
    /// ```
    #[serde(default, deserialize_with = "deserialize_optional_seconds")]
    pub wait_timeout: Option<Duration>,

    /// The threshold the trainer applies when evaluating the local model.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// eval_threshold = 0.5
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_ROUND__EVAL_THRESHOLD=0.5
    /// ```
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_eval_threshold")]
    pub eval_threshold: f64,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            epochs_per_round: default_epochs_per_round(),
            poll_interval: default_poll_interval(),
            wait_timeout: None,
            eval_threshold: default_eval_threshold(),
        }
    }
}

fn default_epochs_per_round() -> u32 {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_eval_threshold() -> f64 {
    0.5
}

#[derive(Debug, Validate, Deserialize, Clone)]
/// Download settings.
pub struct TransferSettings {
    /// The number of bytes buffered before a download is written to disk and its progress is
    /// reported.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [transfer]
    /// chunk_size = 1048576
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_TRANSFER__CHUNK_SIZE=1048576
    /// ```
    #[validate(range(min = 1))]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Deserialize, Clone)]
/// Local storage layout.
pub struct StorageSettings {
    /// The single slot holding the latest global model.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [storage]
    /// global_model_path = "global_models/global_latest.pth"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_STORAGE__GLOBAL_MODEL_PATH=global_models/global_latest.pth
    /// ```
    #[serde(default = "default_global_model_path")]
    pub global_model_path: PathBuf,

    /// The directory of the per-round checkpoints.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [storage]
    /// checkpoint_dir = "client_checkpoints"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_STORAGE__CHECKPOINT_DIR=client_checkpoints
    /// ```
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// The CSV round log.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [storage]
    /// log_path = "logs.csv"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_STORAGE__LOG_PATH=logs.csv
    /// ```
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Whether the checkpoint of a rolled back round is deleted. Kept by default.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [storage]
    /// remove_checkpoint_on_rollback = true
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDLINK_STORAGE__REMOVE_CHECKPOINT_ON_ROLLBACK=true
    /// ```
    #[serde(default)]
    pub remove_checkpoint_on_rollback: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            global_model_path: default_global_model_path(),
            checkpoint_dir: default_checkpoint_dir(),
            log_path: default_log_path(),
            remove_checkpoint_on_rollback: false,
        }
    }
}

fn default_global_model_path() -> PathBuf {
    PathBuf::from("global_models").join("global_latest.pth")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("client_checkpoints")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs.csv")
}

struct SecondsVisitor;

impl<'de> Visitor<'de> for SecondsVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a non-negative number of seconds")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(Duration::from_secs(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        if value < 0 {
            return Err(de::Error::invalid_value(de::Unexpected::Signed(value), &self));
        }
        Ok(Duration::from_secs(value as u64))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        if !value.is_finite() || value < 0.0 {
            return Err(de::Error::invalid_value(de::Unexpected::Float(value), &self));
        }
        Ok(Duration::from_secs_f64(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        match value.trim().parse::<f64>() {
            Ok(seconds) => self.visit_f64(seconds),
            Err(_) => Err(de::Error::invalid_value(de::Unexpected::Str(value), &self)),
        }
    }
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(SecondsVisitor)
}

fn deserialize_optional_seconds<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(SecondsVisitor).map(Some)
}
