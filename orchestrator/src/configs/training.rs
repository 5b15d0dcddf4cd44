use std::{fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::error::OrchestratorError;

fn default_shuffle() -> bool {
    true
}

fn default_batch_size() -> usize {
    32
}

/// The hyperparameters of a training run, as received from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    /// One of `adam`, `sgd`, `adagrad` or `rmsprop`.
    pub optimizer: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 0.001,
            shuffle: default_shuffle(),
            optimizer: "adam".to_string(),
            batch_size: default_batch_size(),
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads the hyperparameters from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}

/// The optimizers a training run can select by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    Sgd,
    Adagrad,
    RmsProp,
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            "adagrad" => Ok(Self::Adagrad),
            "rmsprop" => Ok(Self::RmsProp),
            _ => Err(ConfigError::UnknownOptimizer(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_have_defaults() {
        let json = r#"{ "epochs": 3, "learning_rate": 0.01, "optimizer": "sgd" }"#;
        let config = TrainingConfig::from_json(json).unwrap();

        assert_eq!(config.batch_size, 32);
        assert!(config.shuffle);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn optimizer_names_are_case_insensitive() {
        assert_eq!("Adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adam);
        assert_eq!("RMSprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
    }

    #[test]
    fn unknown_optimizer_is_an_error() {
        assert!(matches!(
            "lbfgs".parse::<OptimizerKind>(),
            Err(ConfigError::UnknownOptimizer(name)) if name == "lbfgs"
        ));
    }
}
