//! ComponentId - external component path ↔ formula term suffix
//!
//! Sensors and tasks are addressed on the wire by a lower-case path such as
//! `/g3t1_1`. Formula terms use the upper-case, underscore-separated form
//! `G3_T1_1`, prefixed by the term kind (`R_G3_T1_1`). The transform is:
//!
//! ```text
//! /g3t1_1  --drop '/'-->  g3t1_1  --upper-->  G3T1_1  --'_' before first 'T'-->  G3_T1_1
//! ```
//!
//! and its inverse lower-cases the suffix, splits on `_`, and glues the goal
//! and task parts back together behind a leading `/`.

use serde::{Deserialize, Serialize};

use crate::error::ComponentError;

/// Leading separator of an external component path
pub const PATH_SEPARATOR: char = '/';

/// Marker that starts the task part of an identifier; `_` is inserted before it
pub const TASK_MARKER: char = 'T';

/// Marker that starts the goal part of an identifier
pub const GOAL_MARKER: char = 'G';

/// Separator between goal, task and subtask parts of a term suffix
pub const PART_SEPARATOR: char = '_';

/// Structured component identifier `<goal><task>[_<sub>]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    /// Goal part, upper-case (e.g. `G3`)
    goal: String,
    /// Task part, upper-case (e.g. `T1`)
    task: String,
    /// Optional subtask parts (e.g. `["1"]`)
    sub: Vec<String>,
}

impl ComponentId {
    /// Parse an external component path such as `/g3t1_1`
    pub fn from_path(path: &str) -> Result<Self, ComponentError> {
        let trimmed = path.trim();
        let body = trimmed.strip_prefix(PATH_SEPARATOR).unwrap_or(trimmed);
        let upper = body.to_ascii_uppercase();

        let task_at = upper
            .find(TASK_MARKER)
            .ok_or_else(|| ComponentError::InvalidIdentifier(path.to_string()))?;

        let mut suffix = String::with_capacity(upper.len() + 1);
        suffix.push_str(&upper[..task_at]);
        suffix.push(PART_SEPARATOR);
        suffix.push_str(&upper[task_at..]);

        Self::from_term_suffix(&suffix).map_err(|_| ComponentError::InvalidIdentifier(path.to_string()))
    }

    /// Parse a term suffix such as `G3_T1_1`
    pub fn from_term_suffix(suffix: &str) -> Result<Self, ComponentError> {
        let invalid = || ComponentError::InvalidIdentifier(suffix.to_string());

        let mut parts = suffix.split(PART_SEPARATOR);
        let goal = parts.next().filter(|g| is_part(g, GOAL_MARKER)).ok_or_else(invalid)?;
        let task = parts.next().filter(|t| is_part(t, TASK_MARKER)).ok_or_else(invalid)?;

        let mut sub = Vec::new();
        for part in parts {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid());
            }
            sub.push(part.to_ascii_uppercase());
        }

        Ok(Self {
            goal: goal.to_ascii_uppercase(),
            task: task.to_ascii_uppercase(),
            sub,
        })
    }

    /// Goal part (e.g. `G3`)
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Task part (e.g. `T1`)
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Subtask parts, empty for plain tasks
    pub fn sub(&self) -> &[String] {
        &self.sub
    }

    /// Term suffix form, `G3_T1_1`
    pub fn term_suffix(&self) -> String {
        let mut out = format!("{}{}{}", self.goal, PART_SEPARATOR, self.task);
        for part in &self.sub {
            out.push(PART_SEPARATOR);
            out.push_str(part);
        }
        out
    }

    /// External path form, `/g3t1_1`
    pub fn path(&self) -> String {
        let mut out = String::new();
        out.push(PATH_SEPARATOR);
        out.push_str(&self.goal.to_ascii_lowercase());
        out.push_str(&self.task.to_ascii_lowercase());
        for part in &self.sub {
            out.push(PART_SEPARATOR);
            out.push_str(&part.to_ascii_lowercase());
        }
        out
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.term_suffix())
    }
}

impl std::str::FromStr for ComponentId {
    type Err = ComponentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(PATH_SEPARATOR) {
            Self::from_path(s)
        } else {
            Self::from_term_suffix(s)
        }
    }
}

/// `<marker><alphanumerics>`, case-insensitive
fn is_part(part: &str, marker: char) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.to_ascii_uppercase() == marker)
        && chars.clone().next().is_some()
        && chars.all(|c| c.is_ascii_alphanumeric())
}
