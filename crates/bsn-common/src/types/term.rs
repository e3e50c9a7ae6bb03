//! Term descriptors
//!
//! Formula terms are namespaced by prefix. The prefix is classified once,
//! when a formula is parsed, so the control loop never rescans term names.

use serde::{Deserialize, Serialize};

/// Prefix of measured-reliability terms
pub const RELIABILITY_PREFIX: &str = "R_";

/// Prefix of activation-context terms
pub const CONTEXT_PREFIX: &str = "CTX_";

/// Prefix of feasibility/frequency terms
pub const FEASIBILITY_PREFIX: &str = "F_";

/// Kind of quantity a term stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermKind {
    /// `R_<ID>`: reliability of a component, the adaptable quantity
    Reliability,
    /// `CTX_<ID>`: 0/1 activation flag
    Context,
    /// `F_<ID>`: feasibility flag
    Feasibility,
    /// Any other term; left untouched by the control loop
    Other,
}

impl TermKind {
    /// Name prefix for this kind, if it has one
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            TermKind::Reliability => Some(RELIABILITY_PREFIX),
            TermKind::Context => Some(CONTEXT_PREFIX),
            TermKind::Feasibility => Some(FEASIBILITY_PREFIX),
            TermKind::Other => None,
        }
    }

    /// Baseline value written by the monitor before measurements are applied
    pub fn baseline(&self) -> Option<f64> {
        match self {
            TermKind::Reliability | TermKind::Feasibility => Some(1.0),
            TermKind::Context => Some(0.0),
            TermKind::Other => None,
        }
    }

    /// Build the term name for a component suffix
    pub fn term_for(&self, suffix: &str) -> Option<String> {
        self.prefix().map(|p| format!("{p}{suffix}"))
    }
}

/// Typed view of one formula term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermDescriptor {
    /// Full term name as it appears in the formula
    pub name: String,
    /// Classified kind
    pub kind: TermKind,
    /// Component suffix (`G3_T1_1`), `None` for [`TermKind::Other`]
    pub component: Option<String>,
}

impl TermDescriptor {
    /// Classify a term name by its prefix
    pub fn classify(name: &str) -> Self {
        for kind in [TermKind::Context, TermKind::Reliability, TermKind::Feasibility] {
            let Some(prefix) = kind.prefix() else { continue };
            if let Some(rest) = name.strip_prefix(prefix) {
                if !rest.is_empty() {
                    return Self {
                        name: name.to_string(),
                        kind,
                        component: Some(rest.to_string()),
                    };
                }
            }
        }

        Self {
            name: name.to_string(),
            kind: TermKind::Other,
            component: None,
        }
    }

    /// Name of the sibling term of another kind for the same component
    pub fn sibling(&self, kind: TermKind) -> Option<String> {
        self.component.as_deref().and_then(|c| kind.term_for(c))
    }
}
