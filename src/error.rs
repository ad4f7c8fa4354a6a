use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate indicator name `{name}`")]
    DuplicateName { name: String },
    #[error("dependency cycle among indicators: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },
    #[error("unknown indicator `{name}`")]
    UnknownIndicator { name: String },
}

/// Formula construction and parameter errors. Raised while a graph is being
/// materialized, never while ticks are processed.
#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("unknown formula kind `{kind}`")]
    UnknownFormulaKind { kind: String },
    #[error("formula kind `{kind}` is already registered")]
    DuplicateFormulaKind { kind: String },
    #[error("indicator `{indicator}` is missing required parameter `{param}`")]
    MissingParam { indicator: String, param: &'static str },
    #[error("indicator `{indicator}` has invalid parameter `{param}`={value}: {reason}")]
    InvalidParam {
        indicator: String,
        param: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl FormulaError {
    pub(crate) fn invalid(
        indicator: &str,
        param: &'static str,
        value: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidParam {
            indicator: indicator.to_string(),
            param,
            value: value.into(),
            reason,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("corporate action source reload failed: {reason}")]
    Reload { reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
    #[error("instrument universe is empty")]
    EmptyUniverse,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error("failed to initialize formula for instrument `{instrument}`")]
    FormulaInit {
        instrument: String,
        #[source]
        source: FormulaError,
    },
    #[error("unknown instrument `{instrument}`")]
    UnknownInstrument { instrument: String },
    #[error("instrument `{instrument}` appears more than once")]
    DuplicateInstrument { instrument: String },
    #[error(
        "tick ts must be non-decreasing for `{instrument}`: current={current_ts}, last={last_ts}"
    )]
    NonMonotonicTick {
        instrument: String,
        current_ts: i64,
        last_ts: i64,
    },
}
