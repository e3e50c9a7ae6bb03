//! Core identifier types shared across the adaptation crates

pub mod component_id;
pub mod term;
