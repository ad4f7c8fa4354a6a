use crate::error::ConfigError;
use crate::types::IndicatorDefinition;
use serde::Deserialize;
use std::path::Path;

/// Startup configuration of a [`Calculator`](crate::runtime::Calculator).
///
/// ```toml
/// instruments = ["600000.SH", "000001.SZ"]
/// settlement = true
///
/// [[indicators]]
/// Name = "A"
/// Input = { Close = "" }
///
/// [[indicators]]
/// Name = "B"
/// FormulaKind = "EMA"
/// Input = { A = "3" }
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CalculatorConfig {
    pub instruments: Vec<String>,
    #[serde(default)]
    pub settlement: bool,
    #[serde(default = "defaults::workers")]
    pub workers: usize,
    #[serde(default)]
    pub indicators: Vec<IndicatorDefinition>,
}

mod defaults {
    pub fn workers() -> usize {
        1
    }
}

impl CalculatorConfig {
    pub fn new(
        instruments: impl IntoIterator<Item = impl Into<String>>,
        indicators: Vec<IndicatorDefinition>,
    ) -> Self {
        Self {
            instruments: instruments.into_iter().map(Into::into).collect(),
            settlement: false,
            workers: defaults::workers(),
            indicators,
        }
    }

    pub fn with_settlement(mut self, enabled: bool) -> Self {
        self.settlement = enabled;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CalculatorConfig = toml::from_str(raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        Ok(())
    }
}
