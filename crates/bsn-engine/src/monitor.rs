//! Monitor phase: repository response parsing and strategy refresh
//!
//! Responses look like `/g3t1_1:0.9,0.95;/g4t1:1` (reliability, last value
//! wins) and `/g3t1_1:activate;/g4t1:deactivate` (events, in order).

use tracing::debug;

use bsn_common::{ComponentId, RepositoryError, TermKind};
use bsn_model::Formula;

use crate::state::StrategyStore;

/// Component whose events gate its own context instead of always enabling it
pub const CONTEXT_GATED_COMPONENT: &str = "G4_T1";

/// Event that (re)activates a component
pub const ACTIVATE_EVENT: &str = "activate";

/// Event that deactivates a component
pub const DEACTIVATE_EVENT: &str = "deactivate";

/// Query for the latest activation events
pub const EVENT_QUERY: &str = "all:event:1";

/// One tick's worth of validated repository data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations {
    /// Last reliability observation per component
    pub reliability: Vec<(ComponentId, f64)>,
    /// Events per component, in arrival order
    pub events: Vec<(ComponentId, Vec<String>)>,
}

impl Observations {
    /// Validate both responses; nothing is applied unless both parse
    pub fn parse(
        reliability_query: &str,
        reliability: &str,
        event_query: &str,
        events: &str,
    ) -> Result<Self, RepositoryError> {
        let reliability = split_pairs(reliability_query, reliability)?
            .into_iter()
            .map(|(component, values)| {
                let last = values.last().copied().unwrap_or_default();
                let value = last.parse::<f64>().map_err(|_| RepositoryError::Malformed {
                    query: reliability_query.to_string(),
                    reason: format!("invalid observation '{last}' for {component}"),
                })?;
                Ok::<_, RepositoryError>((component, value))
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        let events = split_pairs(event_query, events)?
            .into_iter()
            .map(|(component, values)| {
                (component, values.into_iter().map(str::to_string).collect())
            })
            .collect();

        Ok(Self {
            reliability,
            events,
        })
    }

    /// Overwrite the store with this tick's view
    ///
    /// Baselines are written first, then reliability, then events, so a
    /// `deactivate` in the batch wins over a measurement for the same component.
    pub fn apply(&self, formula: &Formula, store: &mut StrategyStore) {
        store.reset_baseline(formula);

        for (component, value) in &self.reliability {
            let Some(r_term) = term_in(formula, TermKind::Reliability, component) else {
                debug!(%component, "Skipping reliability for component outside formula");
                continue;
            };
            store.set(&r_term, *value);
        }

        for (component, events) in &self.events {
            let r_term = term_in(formula, TermKind::Reliability, component);
            let ctx_term = term_in(formula, TermKind::Context, component);
            if r_term.is_none() && ctx_term.is_none() {
                debug!(%component, "Skipping events for component outside formula");
                continue;
            }
            let gated = component.term_suffix() == CONTEXT_GATED_COMPONENT;

            for event in events {
                let active = !gated || event == ACTIVATE_EVENT;
                if let Some(ctx) = &ctx_term {
                    store.set(ctx, if active { 1.0 } else { 0.0 });
                }
                let Some(r) = &r_term else { continue };
                if (gated && !active) || event == DEACTIVATE_EVENT {
                    debug!(%component, "Component deactivated");
                    store.deactivate(r);
                } else if event == ACTIVATE_EVENT {
                    store.reactivate(r);
                }
            }
        }

        store.pin_deactivated();
    }
}

fn term_in(formula: &Formula, kind: TermKind, component: &ComponentId) -> Option<String> {
    kind.term_for(&component.term_suffix())
        .filter(|t| formula.contains(t))
}

/// Split `path:v1,v2;path:v3` into components and their values
fn split_pairs<'a>(
    query: &str,
    content: &'a str,
) -> Result<Vec<(ComponentId, Vec<&'a str>)>, RepositoryError> {
    if content.trim().is_empty() {
        return Err(RepositoryError::EmptyResponse(query.to_string()));
    }

    let malformed = |reason: String| RepositoryError::Malformed {
        query: query.to_string(),
        reason,
    };

    content
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (path, values) = pair
                .split_once(':')
                .ok_or_else(|| malformed(format!("missing ':' in '{pair}'")))?;
            let component = ComponentId::from_path(path).map_err(|e| malformed(e.to_string()))?;
            let values: Vec<&str> = values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                return Err(malformed(format!("no values for '{path}'")));
            }
            Ok((component, values))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMULA: &str = "CTX_G3_T1_1*F_G3_T1_1*R_G3_T1_1 + CTX_G4_T1*F_G4_T1*R_G4_T1";
    const RELI: &str = "all:reliability:0";

    fn observe(reliability: &str, events: &str) -> Observations {
        Observations::parse(RELI, reliability, EVENT_QUERY, events).unwrap()
    }

    fn store_after(obs: &Observations) -> StrategyStore {
        let formula = Formula::parse(FORMULA).unwrap();
        let mut store = StrategyStore::for_formula(&formula);
        obs.apply(&formula, &mut store);
        store
    }

    #[test]
    fn test_parse_takes_last_observation() {
        let obs = observe("/g3t1_1:0.5,0.7,0.82;/g4t1:1", "/g3t1_1:activate");
        assert_eq!(obs.reliability.len(), 2);
        assert_eq!(obs.reliability[0].0.term_suffix(), "G3_T1_1");
        assert_eq!(obs.reliability[0].1, 0.82);
        assert_eq!(obs.events[0].1, vec!["activate"]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Observations::parse(RELI, "", EVENT_QUERY, "/g4t1:activate"),
            Err(RepositoryError::EmptyResponse(RELI.to_string()))
        );
        assert_eq!(
            Observations::parse(RELI, "/g4t1:1", EVENT_QUERY, "  "),
            Err(RepositoryError::EmptyResponse(EVENT_QUERY.to_string()))
        );
        assert!(matches!(
            Observations::parse(RELI, "/g4t1 0.9", EVENT_QUERY, "/g4t1:activate"),
            Err(RepositoryError::Malformed { .. })
        ));
        assert!(matches!(
            Observations::parse(RELI, "/g4t1:high", EVENT_QUERY, "/g4t1:activate"),
            Err(RepositoryError::Malformed { .. })
        ));
        assert!(matches!(
            Observations::parse(RELI, "/g4t1:", EVENT_QUERY, "/g4t1:activate"),
            Err(RepositoryError::Malformed { .. })
        ));
    }

    #[test]
    fn test_apply_sets_reliability_and_context() {
        let store = store_after(&observe("/g3t1_1:0.8;/g4t1:0.95", "/g3t1_1:activate;/g4t1:activate"));
        assert_eq!(store.value("R_G3_T1_1"), Some(0.8));
        assert_eq!(store.value("R_G4_T1"), Some(0.95));
        assert_eq!(store.value("CTX_G3_T1_1"), Some(1.0));
        assert_eq!(store.value("CTX_G4_T1"), Some(1.0));
        assert_eq!(store.value("F_G3_T1_1"), Some(1.0));
    }

    #[test]
    fn test_unreported_context_is_zero() {
        let store = store_after(&observe("/g3t1_1:0.8", "/g4t1:activate"));
        assert_eq!(store.value("CTX_G3_T1_1"), Some(0.0));
    }

    #[test]
    fn test_deactivate_overrides_measurement() {
        let store = store_after(&observe("/g3t1_1:0.4", "/g3t1_1:deactivate"));
        assert_eq!(store.value("R_G3_T1_1"), Some(1.0));
        assert_eq!(store.value("CTX_G3_T1_1"), Some(1.0));
        assert!(store.is_deactivated("R_G3_T1_1"));
    }

    #[test]
    fn test_gated_component() {
        let formula = Formula::parse(FORMULA).unwrap();
        let mut store = StrategyStore::for_formula(&formula);

        observe("/g4t1:0.6", "/g4t1:idle").apply(&formula, &mut store);
        assert_eq!(store.value("CTX_G4_T1"), Some(0.0));
        assert_eq!(store.value("R_G4_T1"), Some(1.0));
        assert!(store.is_deactivated("R_G4_T1"));

        observe("/g4t1:0.6", "/g4t1:activate").apply(&formula, &mut store);
        assert_eq!(store.value("CTX_G4_T1"), Some(1.0));
        assert_eq!(store.value("R_G4_T1"), Some(0.6));
        assert!(!store.is_deactivated("R_G4_T1"));
    }

    #[test]
    fn test_deactivation_persists_until_activate() {
        let formula = Formula::parse(FORMULA).unwrap();
        let mut store = StrategyStore::for_formula(&formula);

        observe("/g3t1_1:0.4", "/g3t1_1:deactivate").apply(&formula, &mut store);
        observe("/g3t1_1:0.4", "/g4t1:activate").apply(&formula, &mut store);
        assert_eq!(store.value("R_G3_T1_1"), Some(1.0));

        observe("/g3t1_1:0.4", "/g3t1_1:activate").apply(&formula, &mut store);
        assert_eq!(store.value("R_G3_T1_1"), Some(0.4));
    }

    #[test]
    fn test_unknown_component_skipped() {
        let store = store_after(&observe("/g9t9:0.1;/g3t1_1:0.7", "/g9t9:activate"));
        assert_eq!(store.value("R_G3_T1_1"), Some(0.7));
        assert_eq!(store.value("R_G9_T9"), None);
        assert_eq!(store.strategy().len(), 6);
    }
}
