//! Goal model: goals decomposed into tasks and leaf tasks

pub mod node;
pub mod property;
pub mod tree;

pub use node::{Node, NodeId, NodeKind};
pub use property::{Context, Property};
pub use tree::GoalTree;
