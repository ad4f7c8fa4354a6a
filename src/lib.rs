pub mod compile;
pub mod config;
pub mod error;
pub mod ops;
pub mod plan;
pub mod runtime;
pub mod settlement;
pub mod state;
pub mod types;

pub use compile::{GraphBuilder, Planner};
pub use config::CalculatorConfig;
pub use error::{ConfigError, EngineError, FormulaError, GraphError, SettlementError};
pub use ops::{Formula, FormulaConstructor, FormulaRegistry};
pub use plan::{BuildManifest, CanonicalOrder, DependencyGraph, Node};
pub use runtime::{Calculator, Engine, InstrumentGraph};
pub use settlement::{
    CorporateAction, CorporateActionSource, InMemoryCorporateActions, Resettlement,
    SettlementQueue,
};
pub use types::{IndicatorDefinition, QuoteRow, RowBuffer, RowRecord};

#[cfg(test)]
mod tests;
