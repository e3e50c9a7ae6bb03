//! # BSN Model
//!
//! Data model of the adaptation core.
//!
//! - [`Formula`]: QoS expression over `R_`/`CTX_`/`F_` terms, parsed once and
//!   evaluated against any [`Assignment`]
//! - [`GoalTree`]: goal/task decomposition that owns the term namespace

pub mod formula;
pub mod goalmodel;

pub use formula::{Assignment, Formula};
pub use goalmodel::{Context, GoalTree, Node, NodeId, NodeKind, Property};
