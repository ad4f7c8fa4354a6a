use crate::error::FormulaError;
use crate::ops::ts::EmaState;
use crate::ops::{param_usize, single_input, CommonParams, Formula};
use crate::state::PeriodGate;
use crate::types::{format_value, IndicatorDefinition, RowRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MacdOutput {
    Dif,
    Dea,
    #[default]
    Macd,
}

impl MacdOutput {
    fn parse(indicator: &str, raw: &str) -> Result<Self, FormulaError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DIF" => Ok(Self::Dif),
            "DEA" => Ok(Self::Dea),
            "MACD" | "" => Ok(Self::Macd),
            _ => Err(FormulaError::invalid(
                indicator,
                "Output",
                raw,
                "expected one of DIF, DEA, MACD",
            )),
        }
    }
}

/// `MACD`: Input `{base: ""}`, params `Short` (12), `Long` (26), `Mid` (9), `Output`.
///
/// DIF = EMA(short) - EMA(long), DEA = EMA(DIF, mid), MACD = 2 * (DIF - DEA).
/// Keeps its last value on unusable input, like the EMA it is built from.
#[derive(Debug, Default)]
pub struct Macd {
    common: CommonParams,
    base: String,
    output: MacdOutput,
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
    gate: PeriodGate,
}

impl Macd {
    fn current(&self) -> Option<f64> {
        let dif = self.fast.current()? - self.slow.current()?;
        let dea = self.signal.current()?;
        Some(match self.output {
            MacdOutput::Dif => dif,
            MacdOutput::Dea => dea,
            MacdOutput::Macd => 2.0 * (dif - dea),
        })
    }
}

impl Formula for Macd {
    fn initialize(&mut self, definition: &IndicatorDefinition) -> Result<(), FormulaError> {
        self.common = CommonParams::from_definition(definition)?;
        let (base, _) = single_input(definition)?;
        let short = param_usize(definition, "Short", 12, 1)?;
        let long = param_usize(definition, "Long", 26, 1)?;
        let mid = param_usize(definition, "Mid", 9, 1)?;
        if short >= long {
            return Err(FormulaError::invalid(
                &definition.name,
                "Short",
                short.to_string(),
                "Short must be less than Long",
            ));
        }
        self.output = match definition.param("Output") {
            Some(raw) => MacdOutput::parse(&definition.name, raw)?,
            None => MacdOutput::Macd,
        };
        self.base = base;
        self.fast = EmaState::new(short);
        self.slow = EmaState::new(long);
        self.signal = EmaState::new(mid);
        self.gate = PeriodGate::new(self.common.period);
        Ok(())
    }

    fn calculate(&mut self, ts: i64, row: &dyn RowRecord) -> String {
        if let Some(x) = self.common.read(row, &self.base) {
            let advance = self.gate.advance(ts);
            let dif = self.fast.update(x, advance) - self.slow.update(x, advance);
            self.signal.update(dif, advance);
        }
        self.current()
            .map(|v| format_value(v, self.common.precision))
            .unwrap_or_default()
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
        self.gate.reset();
    }
}
