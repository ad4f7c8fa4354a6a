use crate::compile::Planner;
use crate::config::CalculatorConfig;
use crate::ops::FormulaRegistry;
use crate::runtime::{Calculator, Engine, InstrumentGraph};
use crate::settlement::{CorporateAction, CorporateActionSource, InMemoryCorporateActions};
use crate::types::{parse_value, IndicatorDefinition, QuoteRow, RowBuffer, RowRecord, FIELD_CLOSE};
use crate::{EngineError, FormulaError, GraphBuilder, GraphError, SettlementError};
use std::sync::{Arc, Mutex};

mod settlement;

/// A = Close, B = EMA(A, 3), C = EMA(B, 2).
fn abc_definitions() -> Vec<IndicatorDefinition> {
    vec![
        IndicatorDefinition::pass_through("A").with_input(FIELD_CLOSE, ""),
        IndicatorDefinition::new("B", "EMA").with_input("A", "3"),
        IndicatorDefinition::new("C", "EMA").with_input("B", "2"),
    ]
}

/// Price-linear indicators over Close.
fn price_definitions() -> Vec<IndicatorDefinition> {
    vec![
        IndicatorDefinition::pass_through("Px").with_input(FIELD_CLOSE, ""),
        IndicatorDefinition::new("EmaPx", "EMA").with_input("Px", "3"),
        IndicatorDefinition::new("MaPx", "MA").with_input("Px", "2"),
    ]
}

fn close_row(close: f64) -> QuoteRow {
    QuoteRow::new().with(FIELD_CLOSE, close)
}

fn batch(entries: &[(&str, f64)]) -> Vec<(String, QuoteRow)> {
    entries
        .iter()
        .map(|(instrument, close)| (instrument.to_string(), close_row(*close)))
        .collect()
}

fn graph_for(definitions: &[IndicatorDefinition]) -> Arc<crate::plan::DependencyGraph> {
    let (graph, _) = GraphBuilder
        .build(definitions)
        .expect("build should succeed");
    Arc::new(graph)
}

fn calculator(instruments: &[&str], definitions: Vec<IndicatorDefinition>) -> Calculator {
    let config = CalculatorConfig::new(instruments.iter().copied(), definitions);
    Calculator::initialize(&config, &FormulaRegistry::with_builtins(), None)
        .expect("initialize should succeed")
}

fn settled_calculator(
    instruments: &[&str],
    definitions: Vec<IndicatorDefinition>,
    source: impl CorporateActionSource + 'static,
) -> Calculator {
    let config =
        CalculatorConfig::new(instruments.iter().copied(), definitions).with_settlement(true);
    Calculator::initialize(
        &config,
        &FormulaRegistry::with_builtins(),
        Some(Box::new(source)),
    )
    .expect("initialize should succeed")
}

fn value(row: &RowBuffer, name: &str) -> f64 {
    parse_value(row.val(name)).unwrap_or_else(|| panic!("`{name}` should hold a number"))
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Source whose series can be swapped while a calculator owns it.
#[derive(Debug, Clone, Default)]
struct SharedSource {
    inner: Arc<Mutex<InMemoryCorporateActions>>,
    fail_reload: bool,
}

impl CorporateActionSource for SharedSource {
    fn need_reload(&self) -> bool {
        self.inner.lock().expect("source lock").need_reload()
    }

    fn reload(&mut self) -> Result<(), SettlementError> {
        if self.fail_reload {
            return Err(SettlementError::Reload {
                reason: "cache unavailable".to_string(),
            });
        }
        self.inner.lock().expect("source lock").reload()
    }

    fn actions(&self, instrument: &str) -> Option<Vec<CorporateAction>> {
        self.inner.lock().expect("source lock").actions(instrument)
    }
}
