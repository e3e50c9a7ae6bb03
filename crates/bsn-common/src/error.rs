//! Error types for the adaptation core
//!
//! Provides a unified error type and domain-specific error variants. Every
//! variant is tick-scoped: callers log it and carry on with the next period.

use thiserror::Error;

/// Result type alias using BsnError
pub type Result<T> = std::result::Result<T, BsnError>;

/// Unified error type for adaptation operations
#[derive(Debug, Error)]
pub enum BsnError {
    // Formula errors
    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    // Goal model errors
    #[error("Goal model error: {0}")]
    GoalModel(#[from] GoalModelError),

    // Component identifier errors
    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    // Repository errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    // Planning errors
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Formula parsing and evaluation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("Formula text is empty")]
    Empty,

    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function {name} expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: String,
        actual: usize,
    },

    #[error("Assignment is missing term: {0}")]
    MissingTerm(String),
}

/// Goal model errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GoalModelError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Invalid node id: {0}")]
    InvalidId(String),

    #[error("Duplicate node id: {0}")]
    Duplicate(String),

    #[error("Leaf task {0} cannot have children")]
    LeafHasNoChildren(String),

    #[error("A {parent} cannot contain a {child}")]
    InvalidNesting { parent: String, child: String },

    #[error("Goal tree already has a root: {0}")]
    RootAlreadySet(String),
}

/// Component identifier and exception message errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComponentError {
    #[error("Malformed component identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Malformed exception message: {0}")]
    MalformedException(String),
}

/// Knowledge repository query errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepositoryError {
    #[error("Repository unavailable for query {query}: {reason}")]
    Unavailable { query: String, reason: String },

    #[error("Empty response for query: {0}")]
    EmptyResponse(String),

    #[error("Malformed response for query {query}: {reason}")]
    Malformed { query: String, reason: String },

    #[error("Query {query} timed out after {elapsed_ms}ms")]
    Timeout { query: String, elapsed_ms: u64 },
}

/// Planner errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("Plan did not converge after {pivots} pivot(s), best QoS {best_qos:.4} vs band [{low:.4}, {high:.4}]")]
    DidNotConverge {
        pivots: usize,
        best_qos: f64,
        low: f64,
        high: f64,
    },

    #[error("No adaptable candidates in current strategy")]
    NoCandidates,
}

/// Actuation and messaging errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("Subscription to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel closed")]
    Closed,
}

impl BsnError {
    /// Whether this error only abandons the current tick
    ///
    /// Configuration and internal errors are the only ones that may keep the
    /// engine from starting.
    pub fn is_tick_scoped(&self) -> bool {
        !matches!(self, BsnError::Config(_) | BsnError::Internal(_))
    }
}

// Implement From for common external error types
impl From<serde_json::Error> for BsnError {
    fn from(err: serde_json::Error) -> Self {
        BsnError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for BsnError {
    fn from(err: anyhow::Error) -> Self {
        BsnError::Internal(err.to_string())
    }
}
