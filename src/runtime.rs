use crate::compile::{GraphBuilder, Planner};
use crate::config::CalculatorConfig;
use crate::error::{EngineError, FormulaError};
use crate::ops::{Formula, FormulaRegistry};
use crate::plan::{BuildManifest, DependencyGraph};
use crate::settlement::{CorporateAction, CorporateActionSource, Resettlement};
use crate::types::{QuoteRow, RowBuffer, RowRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
enum Step {
    PassThrough { slot: usize, field: String },
    Compute { slot: usize, formula: Box<dyn Formula> },
}

/// Computation graph of one instrument.
///
/// Steps follow the shared canonical order, so every computed node observes
/// already-final values of its dependencies within the same tick.
#[derive(Debug)]
pub struct InstrumentGraph {
    instrument: String,
    graph: Arc<DependencyGraph>,
    steps: Vec<Step>,
    row: RowBuffer,
    history: Vec<(i64, QuoteRow)>,
    retain_history: bool,
    last_ts: Option<i64>,
}

impl InstrumentGraph {
    pub fn new(
        instrument: impl Into<String>,
        graph: Arc<DependencyGraph>,
        registry: &FormulaRegistry,
    ) -> Result<Self, EngineError> {
        let instrument = instrument.into();
        let init_failed = |source: FormulaError| EngineError::FormulaInit {
            instrument: instrument.clone(),
            source,
        };
        let mut steps = Vec::with_capacity(graph.len());
        for &node_id in graph.order.as_slice() {
            let node = &graph.nodes[node_id];
            if node.is_pass_through() {
                steps.push(Step::PassThrough {
                    slot: node_id,
                    field: node.definition.source_field().to_string(),
                });
                continue;
            }
            let mut definition = (*node.definition).clone();
            definition
                .param
                .insert("Instrument".to_string(), instrument.clone());
            let mut formula = registry
                .create(&definition.formula_kind)
                .map_err(init_failed)?;
            formula.initialize(&definition).map_err(init_failed)?;
            steps.push(Step::Compute {
                slot: node_id,
                formula,
            });
        }
        let row = graph.new_row();
        Ok(Self {
            instrument,
            graph,
            steps,
            row,
            history: Vec::new(),
            retain_history: true,
            last_ts: None,
        })
    }

    /// Stops accumulating quote history. Only safe when the instrument will
    /// never be resettled.
    pub fn without_history(mut self) -> Self {
        self.retain_history = false;
        self.history.clear();
        self
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Row produced by the most recent tick (or replay).
    pub fn row(&self) -> &RowBuffer {
        &self.row
    }

    pub fn history(&self) -> &[(i64, QuoteRow)] {
        &self.history
    }

    pub fn last_ts(&self) -> Option<i64> {
        self.last_ts
    }

    pub fn check_ts(&self, ts: i64) -> Result<(), EngineError> {
        match self.last_ts {
            Some(last_ts) if ts < last_ts => Err(EngineError::NonMonotonicTick {
                instrument: self.instrument.clone(),
                current_ts: ts,
                last_ts,
            }),
            _ => Ok(()),
        }
    }

    pub fn process_tick(&mut self, ts: i64, raw: &QuoteRow) -> Result<&RowBuffer, EngineError> {
        self.check_ts(ts)?;
        Ok(self.advance(ts, raw))
    }

    /// `process_tick` without the ordering check; callers validate first.
    pub(crate) fn advance(&mut self, ts: i64, raw: &QuoteRow) -> &RowBuffer {
        if self.retain_history {
            self.history.push((ts, raw.clone()));
        }
        self.evaluate(ts, raw);
        self.last_ts = Some(ts);
        &self.row
    }

    fn evaluate(&mut self, ts: i64, raw: &QuoteRow) {
        let Self { steps, row, .. } = self;
        row.clear(ts);
        for step in steps.iter_mut() {
            match step {
                Step::PassThrough { slot, field } => row.set(*slot, raw.val(field).to_string()),
                Step::Compute { slot, formula } => {
                    let value = formula.calculate(ts, &*row);
                    row.set(*slot, value);
                }
            }
        }
    }

    /// Resets formula state, rescales the history recorded before
    /// `action.effective_ts` and replays all of it. Rows at or after the
    /// effective date are already in the adjusted basis. Returns the number of
    /// replayed ticks.
    pub fn settle(&mut self, action: CorporateAction) -> usize {
        for step in &mut self.steps {
            if let Step::Compute { formula, .. } = step {
                formula.reset();
            }
        }
        let mut history = std::mem::take(&mut self.history);
        for (_, raw) in history
            .iter_mut()
            .filter(|(ts, _)| *ts < action.effective_ts)
        {
            raw.rescale(action.factor);
        }
        for (ts, raw) in &history {
            self.evaluate(*ts, raw);
        }
        let replayed = history.len();
        self.history = history;
        replayed
    }
}

pub trait Engine {
    /// Processes one multi-instrument batch at `ts`; output follows input order.
    fn calculate(
        &mut self,
        ts: i64,
        batch: &[(String, QuoteRow)],
    ) -> Result<Vec<(String, RowBuffer)>, EngineError>;
}

/// Owns every instrument graph of the universe and dispatches batches to them.
#[derive(Debug)]
pub struct Calculator {
    graph: Arc<DependencyGraph>,
    manifest: BuildManifest,
    instruments: Vec<InstrumentGraph>,
    instrument_index: HashMap<String, usize>,
    settlement: Option<Resettlement>,
    workers: usize,
}

impl Engine for Calculator {
    fn calculate(
        &mut self,
        ts: i64,
        batch: &[(String, QuoteRow)],
    ) -> Result<Vec<(String, RowBuffer)>, EngineError> {
        if self.workers > 1 {
            return self.calculate_parallel(ts, batch, self.workers);
        }
        let slots = self.resolve_batch(ts, batch)?;
        self.settle_due(ts)?;
        let mut out = Vec::with_capacity(batch.len());
        for (&slot, (instrument, raw)) in slots.iter().zip(batch) {
            let row = self.instruments[slot].advance(ts, raw).clone();
            out.push((instrument.clone(), row));
        }
        Ok(out)
    }
}

impl Calculator {
    /// Builds the shared graph and one instrument graph per configured
    /// instrument. Every failure here is fatal.
    pub fn initialize(
        config: &CalculatorConfig,
        registry: &FormulaRegistry,
        source: Option<Box<dyn CorporateActionSource>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (graph, manifest) = GraphBuilder.build(&config.indicators)?;
        let graph = Arc::new(graph);

        let settlement = match (config.settlement, source) {
            (true, Some(source)) => Some(Resettlement::new(source, &config.instruments)),
            (true, None) => {
                warn!("settlement enabled without a corporate action source; prices never adjust");
                None
            }
            (false, _) => None,
        };

        let mut instruments = Vec::with_capacity(config.instruments.len());
        let mut instrument_index = HashMap::with_capacity(config.instruments.len());
        for instrument in &config.instruments {
            if instrument_index
                .insert(instrument.clone(), instruments.len())
                .is_some()
            {
                return Err(EngineError::DuplicateInstrument {
                    instrument: instrument.clone(),
                });
            }
            let mut instrument_graph =
                InstrumentGraph::new(instrument.clone(), graph.clone(), registry)?;
            if settlement.is_none() {
                instrument_graph = instrument_graph.without_history();
            }
            instruments.push(instrument_graph);
        }

        info!(
            instruments = instruments.len(),
            nodes = manifest.node_count,
            computed = manifest.computed_count,
            settlement = settlement.is_some(),
            workers = config.workers,
            "calculator initialized"
        );
        Ok(Self {
            graph,
            manifest,
            instruments,
            instrument_index,
            settlement,
            workers: config.workers.max(1),
        })
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn manifest(&self) -> &BuildManifest {
        &self.manifest
    }

    pub fn instrument(&self, instrument: &str) -> Option<&InstrumentGraph> {
        self.instrument_index
            .get(instrument)
            .map(|&slot| &self.instruments[slot])
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentGraph> {
        self.instruments.iter()
    }

    /// Instruments that still have corporate actions to apply.
    pub fn pending_settlements(&self) -> usize {
        self.settlement.as_ref().map_or(0, Resettlement::pending)
    }

    /// Same contract as [`Engine::calculate`], with the per-instrument work of
    /// the batch spread over up to `workers` scoped threads.
    pub fn calculate_parallel(
        &mut self,
        ts: i64,
        batch: &[(String, QuoteRow)],
        workers: usize,
    ) -> Result<Vec<(String, RowBuffer)>, EngineError> {
        let slots = self.resolve_batch(ts, batch)?;
        self.settle_due(ts)?;

        let mut jobs: Vec<Option<(usize, &QuoteRow)>> = vec![None; self.instruments.len()];
        for (pos, (&slot, (_, raw))) in slots.iter().zip(batch).enumerate() {
            jobs[slot] = Some((pos, raw));
        }
        let chunk = self.instruments.len().div_ceil(workers.max(1)).max(1);
        let mut rows: Vec<Option<RowBuffer>> = vec![None; batch.len()];

        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .instruments
                .chunks_mut(chunk)
                .zip(jobs.chunks(chunk))
                .map(|(graphs, jobs)| {
                    scope.spawn(move || {
                        graphs
                            .iter_mut()
                            .zip(jobs)
                            .filter_map(|(graph, job)| {
                                let (pos, raw) = (*job)?;
                                Some((pos, graph.advance(ts, raw).clone()))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                let produced = handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                for (pos, row) in produced {
                    rows[pos] = Some(row);
                }
            }
        });

        Ok(batch
            .iter()
            .zip(rows)
            .map(|((instrument, _), row)| {
                (
                    instrument.clone(),
                    row.expect("every batch entry maps to exactly one instrument graph"),
                )
            })
            .collect())
    }

    /// Maps batch entries to instrument graphs and checks ordering, before
    /// any state is touched.
    fn resolve_batch(&self, ts: i64, batch: &[(String, QuoteRow)]) -> Result<Vec<usize>, EngineError> {
        let mut seen = vec![false; self.instruments.len()];
        let mut slots = Vec::with_capacity(batch.len());
        for (instrument, _) in batch {
            let slot = *self.instrument_index.get(instrument).ok_or_else(|| {
                EngineError::UnknownInstrument {
                    instrument: instrument.clone(),
                }
            })?;
            if std::mem::replace(&mut seen[slot], true) {
                return Err(EngineError::DuplicateInstrument {
                    instrument: instrument.clone(),
                });
            }
            self.instruments[slot].check_ts(ts)?;
            slots.push(slot);
        }
        Ok(slots)
    }

    fn settle_due(&mut self, ts: i64) -> Result<(), EngineError> {
        let Some(settlement) = self.settlement.as_mut() else {
            return Ok(());
        };
        settlement.refresh()?;
        while let Some((instrument, action)) = settlement.pop_due(ts) {
            if let Some(&slot) = self.instrument_index.get(&instrument) {
                let graph = &mut self.instruments[slot];
                if graph.last_ts().is_some_and(|last| last >= action.effective_ts) {
                    warn!(
                        instrument = %instrument,
                        effective_ts = action.effective_ts,
                        "corporate action arrived after its effective date; rescaling earlier rows only"
                    );
                }
                let replayed = graph.settle(action);
                info!(
                    instrument = %instrument,
                    ts,
                    effective_ts = action.effective_ts,
                    factor = action.factor,
                    replayed,
                    "corporate action applied"
                );
            }
            settlement.complete(&instrument);
        }
        Ok(())
    }
}
