//! Node annotations

use serde::{Deserialize, Serialize};

/// Named numeric attribute of a task (cost, reliability, frequency)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub value: f64,
}

impl Property {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Activation context under which a task is relevant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub description: String,
    /// Whether the context currently holds
    pub active: bool,
}

impl Context {
    pub fn new(id: impl Into<String>, description: impl Into<String>, active: bool) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            active,
        }
    }
}
