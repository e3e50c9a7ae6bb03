//! Reliability planner
//!
//! Priority-ordered coordinate search. Every adaptable `R_` term is reseeded
//! to the current QoS, then for each pivot the pivot term and after it every
//! other candidate is stepped by `gain * error` until the QoS would cross the
//! set-point, stop improving, or leave `(0, 1)`. Each pivot yields one
//! candidate solution; the first one inside the stability band wins.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use bsn_common::{PlanError, Result, TermKind, DEFAULT_PRIORITY};
use bsn_model::Formula;

/// Upper bound on steps taken along one coordinate
pub const MAX_ADJUSTMENT_STEPS: usize = 10_000;

/// Search parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanParams {
    pub setpoint: f64,
    pub offset: f64,
    pub gain: f64,
    pub stability_margin: f64,
}

impl PlanParams {
    /// Accepted QoS band, exclusive on both ends
    pub fn band(&self) -> (f64, f64) {
        (
            self.setpoint * (1.0 - self.stability_margin),
            self.setpoint * (1.0 + self.stability_margin),
        )
    }

    pub fn in_band(&self, qos: f64) -> bool {
        let (low, high) = self.band();
        qos > low && qos < high
    }
}

/// Accepted solution
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Full strategy to commit
    pub strategy: BTreeMap<String, f64>,
    /// QoS the strategy yields
    pub qos: f64,
    /// Pivot term that produced it
    pub pivot: String,
}

/// `R_` terms eligible for adjustment, highest priority first
///
/// A term is a candidate when its `CTX_` and `F_` siblings are both non-zero
/// (an absent sibling counts as zero) and it is not deactivated.
pub fn candidates(
    formula: &Formula,
    strategy: &BTreeMap<String, f64>,
    priority: &BTreeMap<String, i32>,
    deactivated: &BTreeSet<String>,
) -> Vec<String> {
    let sibling_value = |d: &bsn_common::TermDescriptor, kind| {
        d.sibling(kind)
            .and_then(|t| strategy.get(&t).copied())
            .unwrap_or(0.0)
    };

    let mut out: Vec<String> = formula
        .terms_of_kind(TermKind::Reliability)
        .filter(|d| {
            sibling_value(d, TermKind::Context) != 0.0
                && sibling_value(d, TermKind::Feasibility) != 0.0
                && !deactivated.contains(&d.name)
        })
        .map(|d| d.name.clone())
        .collect();

    let prio = |t: &String| priority.get(t).copied().unwrap_or(DEFAULT_PRIORITY);
    out.sort_by(|a, b| prio(b).cmp(&prio(a)).then_with(|| a.cmp(b)));
    out
}

/// Search for a strategy whose QoS falls inside the stability band
///
/// `strategy` is never modified; on failure the caller keeps its current one.
#[instrument(skip_all, fields(setpoint = params.setpoint))]
pub fn plan(
    formula: &Formula,
    strategy: &BTreeMap<String, f64>,
    priority: &BTreeMap<String, i32>,
    deactivated: &BTreeSet<String>,
    params: &PlanParams,
) -> Result<Plan> {
    let r_curr = formula.evaluate(strategy)?;
    let error = params.setpoint - r_curr;

    let candidates = candidates(formula, strategy, priority, deactivated);
    if candidates.is_empty() {
        return Err(PlanError::NoCandidates.into());
    }
    debug!(r_curr, error, ?candidates, "Planning");

    let mut working = strategy.clone();
    for d in formula.terms_of_kind(TermKind::Reliability) {
        if candidates.contains(&d.name) {
            working.insert(d.name.clone(), r_curr);
        } else if deactivated.contains(&d.name)
            && d.sibling(TermKind::Context)
                .and_then(|t| working.get(&t).copied())
                .is_some_and(|ctx| ctx != 0.0)
        {
            working.insert(d.name.clone(), 1.0);
        }
    }

    let seed = if error > 0.0 {
        Some(r_curr * (1.0 - params.offset))
    } else if error < 0.0 {
        Some((r_curr * (1.0 + params.offset)).min(1.0))
    } else {
        None
    };

    let mut best_qos = f64::NAN;
    for pivot in &candidates {
        if let Some(seed) = seed {
            for term in &candidates {
                working.insert(term.clone(), seed);
            }
        }

        climb(formula, &mut working, pivot, error, params)?;
        for other in candidates.iter().filter(|t| *t != pivot) {
            climb(formula, &mut working, other, error, params)?;
        }

        let qos = formula.evaluate(&working)?;
        debug!(pivot = %pivot, qos, "Candidate solution");
        if params.in_band(qos) {
            return Ok(Plan {
                strategy: working,
                qos,
                pivot: pivot.clone(),
            });
        }
        if best_qos.is_nan() || (qos - params.setpoint).abs() < (best_qos - params.setpoint).abs() {
            best_qos = qos;
        }
    }

    let (low, high) = params.band();
    Err(PlanError::DidNotConverge {
        pivots: candidates.len(),
        best_qos,
        low,
        high,
    }
    .into())
}

/// Step one coordinate towards the set-point, discarding the step that fails
fn climb(
    formula: &Formula,
    working: &mut BTreeMap<String, f64>,
    term: &str,
    error: f64,
    params: &PlanParams,
) -> Result<()> {
    if error == 0.0 {
        return Ok(());
    }

    let mut current = formula.evaluate(&*working)?;
    for _ in 0..MAX_ADJUSTMENT_STEPS {
        let before = working.get(term).copied().unwrap_or(0.0);
        let next = before + params.gain * error;
        working.insert(term.to_string(), next);
        let qos = formula.evaluate(&*working)?;

        let progressing = if error > 0.0 {
            qos < params.setpoint && current < qos
        } else {
            qos > params.setpoint && current > qos
        };
        if !(progressing && next > 0.0 && next < 1.0) {
            working.insert(term.to_string(), before);
            break;
        }
        current = qos;
    }
    Ok(())
}
