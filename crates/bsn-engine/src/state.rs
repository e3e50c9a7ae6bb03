//! Engine state: current formula plus strategy, priority and deactivation set
//!
//! Everything the control loop and the exception consumer share lives in one
//! [`EngineState`] guarded by a single lock in the engine.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use bsn_common::{TermKind, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
use bsn_model::Formula;

/// Saturate a priority into `[MIN_PRIORITY, MAX_PRIORITY]`
pub fn clamp_priority(value: i64) -> i32 {
    value.clamp(MIN_PRIORITY as i64, MAX_PRIORITY as i64) as i32
}

/// Term values, reliability priorities and deactivated components
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyStore {
    strategy: BTreeMap<String, f64>,
    priority: BTreeMap<String, i32>,
    deactivated: BTreeSet<String>,
}

impl StrategyStore {
    /// Fresh store for a formula: every term at 1, every `R_` term at default priority
    pub fn for_formula(formula: &Formula) -> Self {
        let strategy = formula.terms().map(|t| (t.to_string(), 1.0)).collect();
        let priority = formula
            .terms_of_kind(TermKind::Reliability)
            .map(|d| (d.name.clone(), DEFAULT_PRIORITY))
            .collect();

        Self {
            strategy,
            priority,
            deactivated: BTreeSet::new(),
        }
    }

    pub fn strategy(&self) -> &BTreeMap<String, f64> {
        &self.strategy
    }

    pub fn priority(&self) -> &BTreeMap<String, i32> {
        &self.priority
    }

    pub fn deactivated(&self) -> &BTreeSet<String> {
        &self.deactivated
    }

    pub fn value(&self, term: &str) -> Option<f64> {
        self.strategy.get(term).copied()
    }

    pub fn set(&mut self, term: &str, value: f64) {
        self.strategy.insert(term.to_string(), value);
    }

    /// Replace the whole strategy with an accepted plan
    pub fn commit(&mut self, strategy: BTreeMap<String, f64>) {
        self.strategy = strategy;
    }

    /// Write the monitor baseline: `CTX_` → 0, `R_` and `F_` → 1
    pub fn reset_baseline(&mut self, formula: &Formula) {
        for d in formula.descriptors() {
            if let Some(baseline) = d.kind.baseline() {
                self.strategy.insert(d.name.clone(), baseline);
            }
        }
    }

    pub fn priority_of(&self, term: &str) -> Option<i32> {
        self.priority.get(term).copied()
    }

    /// Add `delta` to the priority of `term`, saturating; `None` if unknown
    pub fn adjust_priority(&mut self, term: &str, delta: i64) -> Option<i32> {
        let entry = self.priority.get_mut(term)?;
        *entry = clamp_priority((*entry as i64).saturating_add(delta));
        Some(*entry)
    }

    pub fn is_deactivated(&self, term: &str) -> bool {
        self.deactivated.contains(term)
    }

    /// Mark an `R_` term deactivated and pin it to 1
    pub fn deactivate(&mut self, term: &str) {
        self.deactivated.insert(term.to_string());
        self.strategy.insert(term.to_string(), 1.0);
    }

    pub fn reactivate(&mut self, term: &str) {
        self.deactivated.remove(term);
    }

    /// Re-pin every deactivated term to 1
    pub fn pin_deactivated(&mut self) {
        for term in &self.deactivated {
            self.strategy.insert(term.clone(), 1.0);
        }
    }
}

/// Phase of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnginePhase {
    /// No formula loaded yet
    Idle,
    Monitoring,
    Analyzing,
    Planning,
    Executing,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnginePhase::Idle => write!(f, "idle"),
            EnginePhase::Monitoring => write!(f, "monitoring"),
            EnginePhase::Analyzing => write!(f, "analyzing"),
            EnginePhase::Planning => write!(f, "planning"),
            EnginePhase::Executing => write!(f, "executing"),
        }
    }
}

/// Shared engine state
#[derive(Debug, Clone)]
pub struct EngineState {
    pub formula: Option<Formula>,
    pub store: StrategyStore,
    /// Monitor cycles since the last plan
    pub cycles: u64,
    pub phase: EnginePhase,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            formula: None,
            store: StrategyStore::default(),
            cycles: 0,
            phase: EnginePhase::Idle,
        }
    }
}

impl EngineState {
    /// Swap in a new formula and reinitialize strategy and priority
    pub fn install_formula(&mut self, formula: Formula) {
        self.store = StrategyStore::for_formula(&formula);
        self.formula = Some(formula);
        self.cycles = 0;
        if self.phase == EnginePhase::Idle {
            self.phase = EnginePhase::Monitoring;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn formula() -> Formula {
        Formula::parse("CTX_G3_T1_1*R_G3_T1_1*F_G3_T1_1 + CTX_G4_T1*R_G4_T1*F_G4_T1 + W").unwrap()
    }

    #[test]
    fn test_for_formula() {
        let store = StrategyStore::for_formula(&formula());
        assert_eq!(store.strategy().len(), 7);
        assert!(store.strategy().values().all(|v| *v == 1.0));
        assert_eq!(store.priority().len(), 2);
        assert_eq!(store.priority_of("R_G4_T1"), Some(DEFAULT_PRIORITY));
        assert_eq!(store.priority_of("CTX_G4_T1"), None);
    }

    #[test]
    fn test_reset_baseline() {
        let f = formula();
        let mut store = StrategyStore::for_formula(&f);
        store.set("R_G3_T1_1", 0.4);
        store.set("W", 7.0);
        store.reset_baseline(&f);

        assert_eq!(store.value("R_G3_T1_1"), Some(1.0));
        assert_eq!(store.value("CTX_G3_T1_1"), Some(0.0));
        assert_eq!(store.value("F_G4_T1"), Some(1.0));
        assert_eq!(store.value("W"), Some(7.0));
    }

    #[test]
    fn test_adjust_priority_saturates() {
        let mut store = StrategyStore::for_formula(&formula());
        assert_eq!(store.adjust_priority("R_G3_T1_1", 70), Some(100));
        assert_eq!(store.adjust_priority("R_G3_T1_1", -250), Some(0));
        assert_eq!(store.adjust_priority("R_G3_T1_1", 1), Some(1));
        assert_eq!(store.adjust_priority("R_G9_T9", 1), None);
        assert_eq!(store.adjust_priority("R_G3_T1_1", i64::MAX), Some(100));
        assert_eq!(store.adjust_priority("R_G3_T1_1", i64::MIN), Some(0));
    }

    #[test]
    fn test_deactivate_pins_value() {
        let mut store = StrategyStore::for_formula(&formula());
        store.deactivate("R_G4_T1");
        store.set("R_G4_T1", 0.3);
        store.pin_deactivated();
        assert_eq!(store.value("R_G4_T1"), Some(1.0));

        store.reactivate("R_G4_T1");
        assert!(!store.is_deactivated("R_G4_T1"));
    }

    #[test]
    fn test_install_formula_leaves_idle() {
        let mut state = EngineState::default();
        assert_eq!(state.phase, EnginePhase::Idle);
        state.cycles = 4;
        state.install_formula(formula());
        assert_eq!(state.phase, EnginePhase::Monitoring);
        assert_eq!(state.cycles, 0);
        assert_eq!(state.store.priority().len(), 2);
    }

    proptest! {
        #[test]
        fn priority_stays_in_bounds(
            deltas in proptest::collection::vec(
                prop_oneof![-300i64..300, Just(i64::MIN), Just(i64::MAX)],
                0..50,
            )
        ) {
            let mut store = StrategyStore::for_formula(&formula());
            for delta in deltas {
                let p = store.adjust_priority("R_G4_T1", delta).unwrap();
                prop_assert!((MIN_PRIORITY..=MAX_PRIORITY).contains(&p));
            }
        }
    }
}
