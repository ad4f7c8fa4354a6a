use crate::error::FormulaError;
use crate::ops::{param_usize, single_input, window_arg, CommonParams, Formula};
use crate::state::{PeriodGate, RingBuffer};
use crate::types::{format_value, IndicatorDefinition, RowRecord};

/// Exponential recurrence `y = (2x + (n-1)·y') / (n+1)` seeded with `y' = 0`.
///
/// `committed` holds the value at the end of the previous period bucket so a
/// revision inside the current bucket recomputes from it instead of compounding.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EmaState {
    window: usize,
    committed: Option<f64>,
    current: Option<f64>,
}

impl EmaState {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            committed: None,
            current: None,
        }
    }

    #[inline]
    pub fn update(&mut self, x: f64, advance: bool) -> f64 {
        if advance {
            self.committed = self.current;
        }
        let n = self.window as f64;
        let next = match self.committed {
            None => 2.0 * x / (n + 1.0),
            Some(prev) => (2.0 * x + (n - 1.0) * prev) / (n + 1.0),
        };
        self.current = Some(next);
        next
    }

    #[inline]
    pub fn current(&self) -> Option<f64> {
        self.current
    }

    pub fn reset(&mut self) {
        self.committed = None;
        self.current = None;
    }
}

/// `EMA`: Input `{base: N}`.
///
/// An unusable input keeps the last value (stale reuse) rather than emitting
/// the empty sentinel.
#[derive(Debug, Default)]
pub struct Ema {
    common: CommonParams,
    base: String,
    state: EmaState,
    gate: PeriodGate,
}

impl Formula for Ema {
    fn initialize(&mut self, definition: &IndicatorDefinition) -> Result<(), FormulaError> {
        self.common = CommonParams::from_definition(definition)?;
        let (base, arg) = single_input(definition)?;
        self.state = EmaState::new(window_arg(definition, &arg)?);
        self.base = base;
        self.gate = PeriodGate::new(self.common.period);
        Ok(())
    }

    fn calculate(&mut self, ts: i64, row: &dyn RowRecord) -> String {
        let value = match self.common.read(row, &self.base) {
            Some(x) => {
                let advance = self.gate.advance(ts);
                Some(self.state.update(x, advance))
            }
            None => self.state.current(),
        };
        value
            .map(|v| format_value(v, self.common.precision))
            .unwrap_or_default()
    }

    fn reset(&mut self) {
        self.state.reset();
        self.gate.reset();
    }
}

/// `SMA`: weighted smoothing `y = (M·x + (N-M)·y') / N`, seeded with the first input.
/// Input `{base: N}`, param `M` (default 1, `1 <= M <= N`). Stale reuse on
/// unusable input, like [`Ema`].
#[derive(Debug, Default)]
pub struct Sma {
    common: CommonParams,
    base: String,
    window: usize,
    weight: usize,
    committed: Option<f64>,
    current: Option<f64>,
    gate: PeriodGate,
}

impl Formula for Sma {
    fn initialize(&mut self, definition: &IndicatorDefinition) -> Result<(), FormulaError> {
        self.common = CommonParams::from_definition(definition)?;
        let (base, arg) = single_input(definition)?;
        let window = window_arg(definition, &arg)?;
        let weight = param_usize(definition, "M", 1, 1)?;
        if weight > window {
            return Err(FormulaError::invalid(
                &definition.name,
                "M",
                weight.to_string(),
                "M must not exceed N",
            ));
        }
        self.base = base;
        self.window = window;
        self.weight = weight;
        self.gate = PeriodGate::new(self.common.period);
        Ok(())
    }

    fn calculate(&mut self, ts: i64, row: &dyn RowRecord) -> String {
        if let Some(x) = self.common.read(row, &self.base) {
            if self.gate.advance(ts) {
                self.committed = self.current;
            }
            let n = self.window as f64;
            let m = self.weight as f64;
            self.current = Some(match self.committed {
                None => x,
                Some(prev) => (m * x + (n - m) * prev) / n,
            });
        }
        self.current
            .map(|v| format_value(v, self.common.precision))
            .unwrap_or_default()
    }

    fn reset(&mut self) {
        self.committed = None;
        self.current = None;
        self.gate.reset();
    }
}

/// `MA`: arithmetic mean of the last N inputs. Empty until N inputs are loaded;
/// an unusable input propagates the empty sentinel without touching the window.
#[derive(Debug, Default)]
pub struct Ma {
    common: CommonParams,
    base: String,
    ring: RingBuffer,
    gate: PeriodGate,
}

impl Formula for Ma {
    fn initialize(&mut self, definition: &IndicatorDefinition) -> Result<(), FormulaError> {
        self.common = CommonParams::from_definition(definition)?;
        let (base, arg) = single_input(definition)?;
        self.ring = RingBuffer::new(window_arg(definition, &arg)?);
        self.base = base;
        self.gate = PeriodGate::new(self.common.period);
        Ok(())
    }

    fn calculate(&mut self, ts: i64, row: &dyn RowRecord) -> String {
        let Some(x) = self.common.read(row, &self.base) else {
            return String::new();
        };
        if self.gate.advance(ts) {
            self.ring.push(x);
        } else {
            self.ring.overwrite_latest(x);
        }
        if !self.ring.is_full() {
            return String::new();
        }
        let mean = self.ring.iter().sum::<f64>() / self.ring.capacity() as f64;
        format_value(mean, self.common.precision)
    }

    fn reset(&mut self) {
        self.ring.clear();
        self.gate.reset();
    }
}

/// `REF`: the input observed N updates before the current one.
/// Repeated calls inside one period bucket revise the latest sample instead of
/// advancing. Unusable input propagates the empty sentinel.
#[derive(Debug, Default)]
pub struct Ref {
    common: CommonParams,
    base: String,
    lag: usize,
    ring: RingBuffer,
    gate: PeriodGate,
}

impl Formula for Ref {
    fn initialize(&mut self, definition: &IndicatorDefinition) -> Result<(), FormulaError> {
        self.common = CommonParams::from_definition(definition)?;
        let (base, arg) = single_input(definition)?;
        self.lag = window_arg(definition, &arg)?;
        self.ring = RingBuffer::new(self.lag + 1);
        self.base = base;
        self.gate = PeriodGate::new(self.common.period);
        Ok(())
    }

    fn calculate(&mut self, ts: i64, row: &dyn RowRecord) -> String {
        let Some(x) = self.common.read(row, &self.base) else {
            return String::new();
        };
        if self.gate.advance(ts) {
            self.ring.push(x);
        } else {
            self.ring.overwrite_latest(x);
        }
        self.ring
            .get_lag(self.lag)
            .map(|v| format_value(v, self.common.precision))
            .unwrap_or_default()
    }

    fn reset(&mut self) {
        self.ring.clear();
        self.gate.reset();
    }
}
