//! Corporate-action resettlement.
//!
//! An instrument's pending actions are consumed through a forward-only cursor.
//! The [`SettlementQueue`] groups instruments by the effective timestamp of
//! their next action, so every action due at a batch timestamp is applied
//! before that batch's ticks are processed. The rescale/reset/replay work
//! itself lives on the instrument graph.

use crate::error::SettlementError;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Split/dividend adjustment: prices are multiplied by `factor`, volume and
/// amount divided by it.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CorporateAction {
    pub effective_ts: i64,
    pub factor: f64,
}

impl CorporateAction {
    pub fn new(effective_ts: i64, factor: f64) -> Self {
        Self {
            effective_ts,
            factor,
        }
    }
}

/// Provider of corporate-action series.
pub trait CorporateActionSource: Send {
    /// True when cached series are stale and `reload` must run before further lookups.
    fn need_reload(&self) -> bool;

    fn reload(&mut self) -> Result<(), SettlementError>;

    /// Chronological actions for `instrument`, or `None` when the source has no
    /// data for it.
    fn actions(&self, instrument: &str) -> Option<Vec<CorporateAction>>;
}

/// In-process source backed by a map. Series staged with [`stage`](Self::stage)
/// become visible after the next reload.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorporateActions {
    series: HashMap<String, Vec<CorporateAction>>,
    staged: HashMap<String, Vec<CorporateAction>>,
}

impl InMemoryCorporateActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(
        mut self,
        instrument: impl Into<String>,
        actions: impl IntoIterator<Item = CorporateAction>,
    ) -> Self {
        self.series
            .insert(instrument.into(), actions.into_iter().collect());
        self
    }

    pub fn stage(
        &mut self,
        instrument: impl Into<String>,
        actions: impl IntoIterator<Item = CorporateAction>,
    ) {
        self.staged
            .insert(instrument.into(), actions.into_iter().collect());
    }
}

impl CorporateActionSource for InMemoryCorporateActions {
    fn need_reload(&self) -> bool {
        !self.staged.is_empty()
    }

    fn reload(&mut self) -> Result<(), SettlementError> {
        self.series.extend(self.staged.drain());
        Ok(())
    }

    fn actions(&self, instrument: &str) -> Option<Vec<CorporateAction>> {
        self.series.get(instrument).cloned()
    }
}

#[derive(Debug, Clone, Default)]
struct ActionCursor {
    actions: Vec<CorporateAction>,
    pos: usize,
}

impl ActionCursor {
    #[inline]
    fn peek(&self) -> Option<CorporateAction> {
        self.actions.get(self.pos).copied()
    }

    #[inline]
    fn advance(&mut self) {
        self.pos = (self.pos + 1).min(self.actions.len());
    }
}

/// Settlement timestamp -> instruments whose next action falls on it.
#[derive(Debug, Clone, Default)]
pub struct SettlementQueue {
    by_ts: BTreeMap<i64, Vec<String>>,
}

impl SettlementQueue {
    pub fn insert(&mut self, ts: i64, instrument: String) {
        self.by_ts.entry(ts).or_default().push(instrument);
    }

    /// Earliest queued entry with a timestamp at or before `ts`.
    pub fn pop_due(&mut self, ts: i64) -> Option<(i64, String)> {
        let mut entry = self.by_ts.first_entry()?;
        if *entry.key() > ts {
            return None;
        }
        let due_ts = *entry.key();
        let instrument = entry.get_mut().remove(0);
        if entry.get().is_empty() {
            entry.remove();
        }
        Some((due_ts, instrument))
    }

    pub fn next_ts(&self) -> Option<i64> {
        self.by_ts.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.by_ts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ts.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_ts.clear();
    }
}

/// Tracks pending corporate actions per instrument and decides which are due.
pub struct Resettlement {
    source: Box<dyn CorporateActionSource>,
    instruments: Vec<String>,
    cursors: HashMap<String, ActionCursor>,
    applied_through: HashMap<String, i64>,
    queue: SettlementQueue,
}

impl std::fmt::Debug for Resettlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resettlement")
            .field("instruments", &self.instruments)
            .field("cursors", &self.cursors)
            .field("applied_through", &self.applied_through)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Resettlement {
    pub fn new(source: Box<dyn CorporateActionSource>, instruments: &[String]) -> Self {
        let mut settlement = Self {
            source,
            instruments: instruments.to_vec(),
            cursors: HashMap::new(),
            applied_through: HashMap::new(),
            queue: SettlementQueue::default(),
        };
        settlement.rebuild();
        settlement
    }

    fn rebuild(&mut self) {
        self.cursors.clear();
        self.queue.clear();
        for instrument in &self.instruments {
            let Some(mut actions) = self.source.actions(instrument) else {
                warn!(instrument = %instrument, "no corporate action data; settlement skipped");
                continue;
            };
            actions.retain(|action| {
                let usable = action.factor.is_finite() && action.factor > 0.0;
                if !usable {
                    warn!(
                        instrument = %instrument,
                        effective_ts = action.effective_ts,
                        factor = action.factor,
                        "ignoring corporate action with unusable factor"
                    );
                }
                usable
            });
            if let Some(&applied) = self.applied_through.get(instrument) {
                actions.retain(|action| action.effective_ts > applied);
            }
            actions.sort_by_key(|action| action.effective_ts);
            let cursor = ActionCursor { actions, pos: 0 };
            if let Some(next) = cursor.peek() {
                self.queue.insert(next.effective_ts, instrument.clone());
                self.cursors.insert(instrument.clone(), cursor);
            }
        }
    }

    /// Reloads the source and rebuilds every cursor when the source asks for it.
    /// Already-applied actions are not applied again.
    pub fn refresh(&mut self) -> Result<bool, SettlementError> {
        if !self.source.need_reload() {
            return Ok(false);
        }
        self.source.reload()?;
        self.rebuild();
        Ok(true)
    }

    /// Next instrument whose pending action is due at `ts`. The caller applies
    /// it and then calls [`complete`](Self::complete).
    pub fn pop_due(&mut self, ts: i64) -> Option<(String, CorporateAction)> {
        loop {
            let (_, instrument) = self.queue.pop_due(ts)?;
            if let Some(action) = self.cursors.get(&instrument).and_then(ActionCursor::peek) {
                return Some((instrument, action));
            }
        }
    }

    /// Advances `instrument` past its current action and requeues its next one.
    pub fn complete(&mut self, instrument: &str) {
        let Some(cursor) = self.cursors.get_mut(instrument) else {
            return;
        };
        if let Some(done) = cursor.peek() {
            self.applied_through
                .insert(instrument.to_string(), done.effective_ts);
        }
        cursor.advance();
        match cursor.peek() {
            Some(next) => self
                .queue
                .insert(next.effective_ts, instrument.to_string()),
            None => {
                self.cursors.remove(instrument);
            }
        }
    }

    pub fn next_action(&self, instrument: &str) -> Option<CorporateAction> {
        self.cursors.get(instrument).and_then(ActionCursor::peek)
    }

    /// Instruments that still have pending actions.
    pub fn pending(&self) -> usize {
        self.cursors.len()
    }

    pub fn queue(&self) -> &SettlementQueue {
        &self.queue
    }
}
