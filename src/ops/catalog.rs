use crate::error::FormulaError;
use crate::ops::{Ema, Formula, FormulaConstructor, Ma, Macd, Ref, Sma};
use std::collections::HashMap;

/// Built-in formula kinds, registered by [`FormulaRegistry::with_builtins`].
pub const BUILTIN_FORMULAS: &[(&str, FormulaConstructor)] = &[
    ("EMA", || Box::new(Ema::default())),
    ("SMA", || Box::new(Sma::default())),
    ("MA", || Box::new(Ma::default())),
    ("REF", || Box::new(Ref::default())),
    ("MACD", || Box::new(Macd::default())),
];

/// Maps a formula kind to its constructor. Populated once before any graph
/// is materialized; lookups are case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct FormulaRegistry {
    constructors: HashMap<String, FormulaConstructor>,
}

impl FormulaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (kind, constructor) in BUILTIN_FORMULAS {
            registry
                .register(kind, *constructor)
                .expect("builtin formula kinds are unique");
        }
        registry
    }

    pub fn register(
        &mut self,
        kind: &str,
        constructor: FormulaConstructor,
    ) -> Result<(), FormulaError> {
        if self.constructors.contains_key(kind) {
            return Err(FormulaError::DuplicateFormulaKind {
                kind: kind.to_string(),
            });
        }
        self.constructors.insert(kind.to_string(), constructor);
        Ok(())
    }

    pub fn create(&self, kind: &str) -> Result<Box<dyn Formula>, FormulaError> {
        self.constructors
            .get(kind)
            .map(|constructor| constructor())
            .ok_or_else(|| FormulaError::UnknownFormulaKind {
                kind: kind.to_string(),
            })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
