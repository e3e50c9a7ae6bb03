//! Execute phase: strategy serialization
//!
//! `R_` entries become `/<goal><task>[_<sub>]:<value>`; entries of the same
//! goal are joined by `,` and goal groups by `;`.

use std::collections::BTreeMap;

use tracing::warn;

use bsn_common::{ComponentId, TermDescriptor, TermKind};
use bsn_model::Formula;

/// Receiver of every actuation command
pub const ENACTOR_TARGET: &str = "/enactor";

const ENTRY_SEPARATOR: &str = ",";
const GROUP_SEPARATOR: &str = ";";

/// Serialize the reliability part of a strategy
pub fn strategy_content(strategy: &BTreeMap<String, f64>) -> String {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (term, value) in strategy {
        let descriptor = TermDescriptor::classify(term);
        if descriptor.kind != TermKind::Reliability {
            continue;
        }
        let Some(component) = descriptor
            .component
            .as_deref()
            .and_then(|s| ComponentId::from_term_suffix(s).ok())
        else {
            warn!(%term, "Reliability term has no component identifier, not actuated");
            continue;
        };

        groups
            .entry(component.goal().to_string())
            .or_default()
            .push(format!("{}:{:.6}", component.path(), value));
    }

    groups
        .into_values()
        .map(|entries| entries.join(ENTRY_SEPARATOR))
        .collect::<Vec<_>>()
        .join(GROUP_SEPARATOR)
}

/// `R_` terms of `formula` that cannot be addressed to a component
pub fn unaddressable_terms(formula: &Formula) -> Vec<String> {
    formula
        .terms_of_kind(TermKind::Reliability)
        .filter(|d| {
            d.component
                .as_deref()
                .and_then(|s| ComponentId::from_term_suffix(s).ok())
                .is_none()
        })
        .map(|d| d.name.clone())
        .collect()
}
