//! A local trainer delegating every step to an external program.
//!
//! The program is invoked once per step as
//!
//! ```text
//! <program> [args...] <step> --weights <file> --device <device> [--threshold <t>]
//! ```
//!
//! where `<step>` is one of `load`, `train`, `eval` and `save`. The weights file is shared between
//! the steps: `load` validates the global weights written there, `train` and `save` update it in
//! place. `train` and `eval` print their metrics as a JSON object on the last line of their
//! standard output, respectively `{"train_loss": ...}` and `{"loss": ..., "metric": ...}`.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    process::Command,
};

use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::debug;

use fedlink_core::{
    storage::{write_atomically, StorageError},
    Evaluation,
};
use fedlink_sdk::LocalTrainer;

#[derive(Debug, Clone, Deserialize)]
/// The `[trainer]` section of the client configuration file.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [trainer]
/// program = "python3"
/// args = ["train.py", "--data", "data/"]
/// weights_path = "local_model.pth"
/// dataset_size = 56
/// ```
///
/// **Environment variable**
/// ```text
/// FEDLINK_TRAINER__PROGRAM=python3
/// ```
pub struct TrainerSettings {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_weights_path")]
    pub weights_path: PathBuf,
    /// Reported to the server to weight this participant's update.
    pub dataset_size: usize,
}

fn default_weights_path() -> PathBuf {
    PathBuf::from("local_model.pth")
}

#[derive(Debug, Deserialize)]
pub struct TrainerSection {
    pub trainer: TrainerSettings,
}

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("failed to start the {step} step: {source}")]
    Spawn {
        step: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("the {step} step exited with {status}: {stderr}")]
    Failed {
        step: &'static str,
        status: String,
        stderr: String,
    },
    #[error("the {step} step printed no valid metrics: {reason}")]
    Metrics { step: &'static str, reason: String },
    #[error("failed to read the weights file {}: {source}", .path.display())]
    Weights {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Deserialize)]
struct TrainOutput {
    train_loss: f64,
}

/// Runs the steps of the local training loop through an external program.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    settings: TrainerSettings,
    device: String,
}

impl CommandTrainer {
    pub fn new(settings: TrainerSettings, device: impl Into<String>) -> Self {
        Self {
            settings,
            device: device.into(),
        }
    }

    pub fn weights_path(&self) -> &Path {
        &self.settings.weights_path
    }

    fn run(&self, step: &'static str, extra: &[String]) -> Result<String, TrainerError> {
        let output = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .arg(step)
            .arg("--weights")
            .arg(&self.settings.weights_path)
            .arg("--device")
            .arg(&self.device)
            .args(extra)
            .output()
            .map_err(|source| TrainerError::Spawn { step, source })?;
        if !output.status.success() {
            return Err(TrainerError::Failed {
                step,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("{} step done", step);
        Ok(stdout)
    }

    fn run_for<T: DeserializeOwned>(
        &self,
        step: &'static str,
        extra: &[String],
    ) -> Result<T, TrainerError> {
        let stdout = self.run(step, extra)?;
        let line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| TrainerError::Metrics {
                step,
                reason: "empty output".to_string(),
            })?;
        serde_json::from_str(line).map_err(|e| TrainerError::Metrics {
            step,
            reason: e.to_string(),
        })
    }
}

impl LocalTrainer for CommandTrainer {
    type Error = TrainerError;

    fn load_state(&mut self, weights: &[u8]) -> Result<(), Self::Error> {
        write_atomically(&self.settings.weights_path, weights)?;
        self.run("load", &[]).map(drop)
    }

    fn save_state(&mut self) -> Result<Vec<u8>, Self::Error> {
        self.run("save", &[])?;
        let path = &self.settings.weights_path;
        fs::read(path).map_err(|source| TrainerError::Weights {
            path: path.clone(),
            source,
        })
    }

    fn train_epoch(&mut self) -> Result<f64, Self::Error> {
        self.run_for::<TrainOutput>("train", &[])
            .map(|output| output.train_loss)
    }

    fn evaluate(&mut self, threshold: f64) -> Result<Evaluation, Self::Error> {
        self.run_for("eval", &["--threshold".to_string(), threshold.to_string()])
    }

    fn dataset_size(&self) -> usize {
        self.settings.dataset_size
    }
}
