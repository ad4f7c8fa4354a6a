//! Formula layer entry.
//!
//! Extension path:
//! 1) implement `Formula` in `ts.rs` (single series) or `composite.rs`,
//! 2) add a `(kind, constructor)` pair to `BUILTIN_FORMULAS` in `catalog.rs`,
//! 3) add unit tests next to the implementation.

use crate::error::FormulaError;
use crate::types::{parse_value, IndicatorDefinition, RowRecord, DEFAULT_PRECISION};
use std::fmt;
use tracing::trace;

pub mod catalog;
pub mod composite;
pub mod period;
pub mod ts;

pub use catalog::{FormulaRegistry, BUILTIN_FORMULAS};
pub use composite::{Macd, MacdOutput};
pub use period::Periodicity;
pub use ts::{Ema, Ma, Ref, Sma};

/// Incremental indicator computation.
///
/// Lifecycle: constructed, then `initialize` once, then `calculate` per tick.
/// `reset` returns the instance to its just-initialized state, so replaying an
/// input sequence after `reset` yields the same output as a fresh instance.
pub trait Formula: Send + fmt::Debug {
    fn initialize(&mut self, definition: &IndicatorDefinition) -> Result<(), FormulaError>;

    /// Returns the formatted value, or an empty string while the value is not
    /// yet computable. Never fails: unusable upstream values are absorbed here.
    fn calculate(&mut self, ts: i64, row: &dyn RowRecord) -> String;

    fn reset(&mut self);
}

pub type FormulaConstructor = fn() -> Box<dyn Formula>;

/// Digits beyond this carry no information for an `f64`.
pub const MAX_PRECISION: usize = 17;

/// Parameters every built-in formula understands.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CommonParams {
    pub indicator: String,
    pub instrument: String,
    pub precision: usize,
    pub period: Periodicity,
}

impl CommonParams {
    pub fn from_definition(definition: &IndicatorDefinition) -> Result<Self, FormulaError> {
        let indicator = definition.name.clone();
        let precision = param_usize(definition, "Precision", DEFAULT_PRECISION, 0)?;
        if precision > MAX_PRECISION {
            return Err(FormulaError::invalid(
                &indicator,
                "Precision",
                precision.to_string(),
                "Precision must not exceed 17",
            ));
        }
        let period = match definition.param("Period") {
            Some(raw) => Periodicity::parse(&indicator, raw)?,
            None => Periodicity::Tick,
        };
        Ok(Self {
            instrument: definition.param("Instrument").unwrap_or_default().to_string(),
            indicator,
            precision,
            period,
        })
    }

    /// Reads a numeric upstream value; `None` for the empty sentinel or text.
    pub fn read(&self, row: &dyn RowRecord, field: &str) -> Option<f64> {
        let raw = row.val(field);
        let value = parse_value(raw);
        if value.is_none() && !raw.trim().is_empty() {
            trace!(
                indicator = %self.indicator,
                instrument = %self.instrument,
                field,
                raw,
                "unparsable input absorbed"
            );
        }
        value
    }
}

/// The single `(dependency, argument)` pair of a one-input formula.
pub(crate) fn single_input(
    definition: &IndicatorDefinition,
) -> Result<(String, String), FormulaError> {
    let mut inputs = definition.input.iter();
    match (inputs.next(), inputs.next()) {
        (Some((base, arg)), None) => Ok((base.clone(), arg.clone())),
        (None, _) => Err(FormulaError::MissingParam {
            indicator: definition.name.clone(),
            param: "Input",
        }),
        _ => Err(FormulaError::invalid(
            &definition.name,
            "Input",
            definition
                .input
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
            "expected exactly one input",
        )),
    }
}

/// Window length from the input argument, falling back to param `N`.
pub(crate) fn window_arg(definition: &IndicatorDefinition, arg: &str) -> Result<usize, FormulaError> {
    if arg.trim().is_empty() {
        return match definition.param("N") {
            Some(raw) => parse_usize(&definition.name, "N", raw, 1),
            None => Err(FormulaError::MissingParam {
                indicator: definition.name.clone(),
                param: "N",
            }),
        };
    }
    parse_usize(&definition.name, "N", arg, 1)
}

pub(crate) fn param_usize(
    definition: &IndicatorDefinition,
    key: &'static str,
    default: usize,
    min: usize,
) -> Result<usize, FormulaError> {
    match definition.param(key) {
        Some(raw) => parse_usize(&definition.name, key, raw, min),
        None => Ok(default),
    }
}

fn parse_usize(
    indicator: &str,
    param: &'static str,
    raw: &str,
    min: usize,
) -> Result<usize, FormulaError> {
    let value = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| FormulaError::invalid(indicator, param, raw, "expected an unsigned integer"))?;
    if value < min {
        return Err(FormulaError::invalid(
            indicator,
            param,
            raw,
            "value below minimum",
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_input_requires_exactly_one_entry() {
        let def = IndicatorDefinition::new("B", "EMA");
        assert_eq!(
            single_input(&def),
            Err(FormulaError::MissingParam {
                indicator: "B".to_string(),
                param: "Input"
            })
        );
        let def = def.with_input("A", "3").with_input("C", "4");
        assert!(matches!(
            single_input(&def),
            Err(FormulaError::InvalidParam { param: "Input", .. })
        ));
    }

    #[test]
    fn window_arg_falls_back_to_param_n() {
        let def = IndicatorDefinition::new("B", "MA").with_param("N", "5");
        assert_eq!(window_arg(&def, ""), Ok(5));
        assert_eq!(window_arg(&def, "3"), Ok(3));
        assert!(window_arg(&def, "0").is_err());
        assert!(window_arg(&def, "x").is_err());
        let bare = IndicatorDefinition::new("B", "MA");
        assert!(matches!(
            window_arg(&bare, ""),
            Err(FormulaError::MissingParam { param: "N", .. })
        ));
    }

    #[test]
    fn common_params_read_precision_period_and_instrument() {
        let def = IndicatorDefinition::new("B", "EMA")
            .with_param("Precision", "2")
            .with_param("Period", "day")
            .with_param("Instrument", "600000.SH");
        let common = CommonParams::from_definition(&def).expect("valid params");
        assert_eq!(common.precision, 2);
        assert_eq!(common.period, Periodicity::Day);
        assert_eq!(common.instrument, "600000.SH");

        let bad = IndicatorDefinition::new("B", "EMA").with_param("Period", "hourly");
        assert!(CommonParams::from_definition(&bad).is_err());
    }

    #[test]
    fn precision_is_capped_at_f64_significance() {
        let widest = IndicatorDefinition::new("B", "EMA").with_param("Precision", "17");
        assert_eq!(
            CommonParams::from_definition(&widest).map(|common| common.precision),
            Ok(MAX_PRECISION)
        );
        let huge = IndicatorDefinition::new("B", "EMA").with_param("Precision", "1000000000");
        assert!(matches!(
            CommonParams::from_definition(&huge),
            Err(FormulaError::InvalidParam { param: "Precision", .. })
        ));
    }
}
