//! # BSN Common
//!
//! Shared errors, identifiers and constants for the SA-BSN adaptation core.
//!
//! ## Core Types
//!
//! - [`ComponentId`]: `/g3t1_1` ↔ `G3_T1_1` component identifier transform
//! - [`TermDescriptor`]/[`TermKind`]: typed view of `R_`/`CTX_`/`F_` formula terms
//! - [`BsnError`]: unified error type over every tick-scoped failure kind

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    BsnError, ComponentError, FormulaError, GoalModelError, PlanError, RepositoryError, Result,
    TransportError,
};
pub use types::{
    component_id::ComponentId,
    term::{TermDescriptor, TermKind, CONTEXT_PREFIX, FEASIBILITY_PREFIX, RELIABILITY_PREFIX},
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum priority value
pub const MAX_PRIORITY: i32 = 100;

/// Minimum priority value
pub const MIN_PRIORITY: i32 = 0;

/// Priority given to every reliability term when a formula is loaded
pub const DEFAULT_PRIORITY: i32 = 50;

/// QoS attribute managed by the reliability engine
pub const QOS_ATTRIBUTE: &str = "reliability";
