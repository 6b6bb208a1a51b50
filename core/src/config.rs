//! Estimator configuration.
//!
//! Everything the estimator needs besides the demonstrations themselves lives in
//! [EstimatorConfig], which is passed in explicitly at construction. Files are read and written
//! as TOML or JSON depending on the extension; missing keys take their default values.
use crate::demonstration::DEFAULT_TRACE_PREFIX;
use crate::error::BipError;
use crate::sensors::DEFAULT_SENSOR_FREQUENCY_HZ;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Width of the uniform noise added to each replicated sensor observation.
    pub sensor_noise_range: f64,
    /// Width of the uniform noise added to each member's predicted observation.
    pub observation_noise_range: f64,
    /// Upper bound of the diagonal measurement noise `R`; entries are drawn from
    /// `[range/2, range]` every update.
    pub measurement_noise_range: f64,
    /// Width of the uniform spread applied to the unit weights at initialization.
    ///
    /// At `0` every member starts with the same weights, the weight rows of the deviation matrix
    /// are zero and the correction leaves the weights at `1`.
    pub initial_weight_spread: f64,
    pub sensor_frequency_hz: f64,
    /// File-name prefix of demonstration traces.
    pub trace_prefix: String,
    /// Seed of the estimator's random number generator.
    pub seed: u64,
}
impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            sensor_noise_range: 2.0,
            observation_noise_range: 2.0,
            measurement_noise_range: 1.0,
            initial_weight_spread: 0.0,
            sensor_frequency_hz: DEFAULT_SENSOR_FREQUENCY_HZ,
            trace_prefix: DEFAULT_TRACE_PREFIX.to_string(),
            seed: 42,
        }
    }
}
impl EstimatorConfig {
    /// Reject values the estimator cannot work with.
    pub fn validate(&self) -> Result<(), BipError> {
        let ranges = [
            ("sensor_noise_range", self.sensor_noise_range),
            ("observation_noise_range", self.observation_noise_range),
            ("measurement_noise_range", self.measurement_noise_range),
            ("initial_weight_spread", self.initial_weight_spread),
        ];
        for (name, value) in ranges {
            if !value.is_finite() || value < 0.0 {
                return Err(BipError::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !self.sensor_frequency_hz.is_finite() || self.sensor_frequency_hz <= 0.0 {
            return Err(BipError::Config(format!(
                "sensor_frequency_hz must be positive, got {}",
                self.sensor_frequency_hz
            )));
        }
        if self.trace_prefix.is_empty() {
            return Err(BipError::Config("trace_prefix must not be empty".into()));
        }
        Ok(())
    }
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), BipError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(|e| BipError::Config(e.to_string()))
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, BipError> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(|e| BipError::Config(e.to_string()))
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), BipError> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(|e| BipError::Config(e.to_string()))?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, BipError> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(|e| BipError::Config(e.to_string()))
    }
    /// Generic write: choose format by file extension (.json/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), BipError> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("toml") => self.to_toml(p),
            _ => Err(BipError::Config(format!(
                "unsupported configuration file extension: {}",
                p.display()
            ))),
        }
    }
    /// Generic read: choose format by file extension (.json/.toml), then validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BipError> {
        let p = path.as_ref();
        let config = match extension(p).as_deref() {
            Some("json") => Self::from_json(p)?,
            Some("toml") => Self::from_toml(p)?,
            _ => {
                return Err(BipError::Config(format!(
                    "unsupported configuration file extension: {}",
                    p.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
