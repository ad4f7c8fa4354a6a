use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const FIELD_OPEN: &str = "Open";
pub const FIELD_HIGH: &str = "High";
pub const FIELD_LOW: &str = "Low";
pub const FIELD_CLOSE: &str = "Close";
pub const FIELD_VOLUME: &str = "Volume";
pub const FIELD_AMOUNT: &str = "Amount";
pub const FIELD_TIME: &str = "Time";

/// Price fields multiplied by a corporate-action factor.
pub const PRICE_FIELDS: [&str; 4] = [FIELD_OPEN, FIELD_HIGH, FIELD_LOW, FIELD_CLOSE];
/// Liquidity fields divided by a corporate-action factor.
pub const LIQUIDITY_FIELDS: [&str; 2] = [FIELD_VOLUME, FIELD_AMOUNT];

pub const DEFAULT_PRECISION: usize = 4;

/// Declarative indicator definition.
///
/// `input` keys are dependencies whose value string doubles as a formula
/// argument (usually a window length); `depend` lists dependencies that carry
/// no argument. An empty `formula_kind` marks a pass-through raw field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndicatorDefinition {
    pub name: String,
    #[serde(default)]
    pub formula_kind: String,
    #[serde(default)]
    pub input: BTreeMap<String, String>,
    #[serde(default)]
    pub depend: Vec<String>,
    #[serde(default)]
    pub param: BTreeMap<String, String>,
}

impl IndicatorDefinition {
    pub fn new(name: impl Into<String>, formula_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formula_kind: formula_kind.into(),
            ..Self::default()
        }
    }

    pub fn pass_through(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    pub fn with_input(mut self, dependency: impl Into<String>, param: impl Into<String>) -> Self {
        self.input.insert(dependency.into(), param.into());
        self
    }

    pub fn with_depend(mut self, dependency: impl Into<String>) -> Self {
        self.depend.push(dependency.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.param.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn is_pass_through(&self) -> bool {
        self.formula_kind.trim().is_empty()
    }

    /// Input keys in sorted order, then explicit dependencies in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.input
            .keys()
            .map(String::as_str)
            .chain(self.depend.iter().map(String::as_str))
    }

    #[inline]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.param.get(key).map(String::as_str)
    }

    /// Raw-row field a pass-through node copies.
    pub fn source_field(&self) -> &str {
        if let Some(field) = self.param("Field") {
            return field;
        }
        let mut deps = self.dependencies();
        match (deps.next(), deps.next()) {
            (Some(only), None) => only,
            _ => &self.name,
        }
    }
}

/// Row record contract shared with the data-ingestion side.
pub trait RowRecord {
    /// Field value, or the empty sentinel when the field is absent.
    fn val(&self, field: &str) -> &str;
    fn update(&mut self, field: &str, value: String);
}

/// One raw quote row keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteRow {
    fields: Vec<(String, String)>,
}

impl QuoteRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.update(&field.into(), value.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Multiplies price fields and divides liquidity fields by `factor`.
    /// Missing or non-numeric fields are left untouched.
    pub fn rescale(&mut self, factor: f64) {
        for (field, value) in &mut self.fields {
            let scaled = if PRICE_FIELDS.contains(&field.as_str()) {
                parse_value(value).map(|v| v * factor)
            } else if LIQUIDITY_FIELDS.contains(&field.as_str()) {
                parse_value(value).map(|v| v / factor)
            } else {
                None
            };
            if let Some(scaled) = scaled {
                *value = scaled.to_string();
            }
        }
    }
}

impl RowRecord for QuoteRow {
    fn val(&self, field: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    fn update(&mut self, field: &str, value: String) {
        match self.fields.iter_mut().find(|(k, _)| k == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for QuoteRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |row, (field, value)| row.with(field, value))
    }
}

/// Positional row of node values for one instrument, indexed by node id.
///
/// The schema (`names`, `index`) is shared by every instrument graph built from
/// the same dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBuffer {
    pub ts: i64,
    names: Arc<[String]>,
    index: Arc<HashMap<String, usize>>,
    values: Vec<String>,
}

impl RowBuffer {
    pub fn with_shared_schema(names: Arc<[String]>, index: Arc<HashMap<String, usize>>) -> Self {
        let values = vec![String::new(); names.len()];
        Self {
            ts: i64::MIN,
            names,
            index,
            values,
        }
    }

    pub fn clear(&mut self, ts: i64) {
        self.ts = ts;
        self.values.iter_mut().for_each(String::clear);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[inline]
    pub fn value_at(&self, slot: usize) -> Option<&str> {
        self.values.get(slot).map(String::as_str)
    }

    #[inline]
    pub fn set(&mut self, slot: usize, value: String) {
        self.values[slot] = value;
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

impl RowRecord for RowBuffer {
    fn val(&self, field: &str) -> &str {
        self.slot(field)
            .and_then(|slot| self.value_at(slot))
            .unwrap_or("")
    }

    fn update(&mut self, field: &str, value: String) {
        if let Some(slot) = self.slot(field) {
            self.values[slot] = value;
        }
    }
}

/// Parses a row value; the empty sentinel and non-numeric text yield `None`.
#[inline]
pub fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Formats a computed value with a fixed number of fractional digits.
/// Non-finite values map to the empty sentinel.
#[inline]
pub fn format_value(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let out = format!("{value:.precision$}");
    if out.starts_with('-') && out[1..].bytes().all(|b| b == b'0' || b == b'.') {
        return out[1..].to_string();
    }
    out
}
