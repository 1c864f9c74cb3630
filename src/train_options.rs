//! Training options shared by every updatable component of a network.

use std::{fmt, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::NnetResult;

/// The options record a network broadcasts to its updatable components.
///
/// Every field is optional in JSON; missing fields take their defaults.
///
/// ```json
/// { "learn_rate": 0.008, "momentum": 0.9, "l2_penalty": 1e-5 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub learn_rate: f32,
    pub momentum: f32,
    pub l1_penalty: f32,
    pub l2_penalty: f32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            learn_rate: 0.008,
            momentum: 0.0,
            l1_penalty: 0.0,
            l2_penalty: 0.0,
        }
    }
}

impl TrainOptions {
    pub fn from_json_str(json: &str) -> NnetResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> NnetResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_learn_rate(self, learn_rate: f32) -> Self {
        Self { learn_rate, ..self }
    }
}

impl fmt::Display for TrainOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "learn-rate {}, momentum {}, l1-penalty {}, l2-penalty {}",
            self.learn_rate, self.momentum, self.l1_penalty, self.l2_penalty
        )
    }
}
