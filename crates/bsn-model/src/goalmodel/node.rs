//! Goal model nodes
//!
//! A node is a goal, a task, or a leaf task. Parents own their children
//! exclusively; there are no back-edges.

use serde::{Deserialize, Serialize};

use bsn_common::{ComponentId, GoalModelError};

use super::property::{Context, Property};

/// Structured node identifier `<Goal>[_<Task>[.<subtask>...]]`
///
/// `G3`, `G3_T1`, `G3_T1.1` and `G3_T1.412` are all valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Parse and validate an identifier
    pub fn parse(id: &str) -> Result<Self, GoalModelError> {
        let invalid = || GoalModelError::InvalidId(id.to_string());

        let (goal, rest) = match id.split_once('_') {
            Some((goal, rest)) => (goal, Some(rest)),
            None => (id, None),
        };
        if !is_marked(goal, 'G') {
            return Err(invalid());
        }

        if let Some(rest) = rest {
            let mut parts = rest.split('.');
            let task = parts.next().unwrap_or_default();
            if !is_marked(task, 'T') {
                return Err(invalid());
            }
            for sub in parts {
                if sub.is_empty() || !sub.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(invalid());
                }
            }
        }

        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id names only a goal (`G3`)
    pub fn is_goal_only(&self) -> bool {
        !self.0.contains('_')
    }

    /// Term suffix this node contributes to the formula namespace
    ///
    /// `G3_T1.11` becomes `G3_T1_11`; goal-only ids have none.
    pub fn term_suffix(&self) -> Option<String> {
        if self.is_goal_only() {
            None
        } else {
            Some(self.0.replace('.', "_"))
        }
    }

    /// Component identifier matching this node, if it names a task
    pub fn component(&self) -> Option<ComponentId> {
        self.term_suffix()
            .and_then(|s| ComponentId::from_term_suffix(&s).ok())
    }
}

impl TryFrom<String> for NodeId {
    type Error = GoalModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_marked(part: &str, marker: char) -> bool {
    let mut chars = part.chars();
    chars.next() == Some(marker)
        && !chars.as_str().is_empty()
        && chars.all(|c| c.is_ascii_alphanumeric())
}

/// Kind of node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Goal,
    Task,
    LeafTask,
}

impl NodeKind {
    pub(crate) fn accepts(&self, child: NodeKind) -> bool {
        match self {
            NodeKind::Goal => matches!(child, NodeKind::Goal | NodeKind::Task),
            NodeKind::Task => matches!(child, NodeKind::Task | NodeKind::LeafTask),
            NodeKind::LeafTask => false,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Goal => write!(f, "goal"),
            NodeKind::Task => write!(f, "task"),
            NodeKind::LeafTask => write!(f, "leaf task"),
        }
    }
}

/// Goal model node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    description: String,
    kind: NodeKind,
    #[serde(default)]
    properties: Vec<Property>,
    #[serde(default)]
    context: Option<Context>,
    #[serde(default)]
    children: Vec<Node>,
}

impl Node {
    fn new(id: &str, description: &str, kind: NodeKind) -> Result<Self, GoalModelError> {
        Ok(Self {
            id: NodeId::parse(id)?,
            description: description.to_string(),
            kind,
            properties: Vec::new(),
            context: None,
            children: Vec::new(),
        })
    }

    /// Create a goal
    pub fn goal(id: &str, description: &str) -> Result<Self, GoalModelError> {
        Self::new(id, description, NodeKind::Goal)
    }

    /// Create an intermediate task
    pub fn task(id: &str, description: &str) -> Result<Self, GoalModelError> {
        Self::new(id, description, NodeKind::Task)
    }

    /// Create a leaf task with neutral cost, reliability and frequency
    ///
    /// Property ids follow the formula namespace (`W_`, `R_`, `F_` + suffix).
    pub fn leaf_task(id: &str, description: &str) -> Result<Self, GoalModelError> {
        let mut node = Self::new(id, description, NodeKind::LeafTask)?;
        let suffix = node
            .id
            .term_suffix()
            .ok_or_else(|| GoalModelError::InvalidId(id.to_string()))?;
        node.properties = vec![
            Property::new(format!("W_{suffix}"), 1.0),
            Property::new(format!("R_{suffix}"), 1.0),
            Property::new(format!("F_{suffix}"), 1.0),
        ];
        Ok(node)
    }

    /// Attach or replace a property
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.retain(|p| p.id != property.id);
        self.properties.push(property);
        self
    }

    /// Attach an activation context
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Property lookup by id
    pub fn property(&self, id: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::LeafTask
    }

    /// Add a child, enforcing goal → task → leaf nesting
    pub fn add_child(&mut self, child: Node) -> Result<(), GoalModelError> {
        if self.is_leaf() {
            return Err(GoalModelError::LeafHasNoChildren(self.id.to_string()));
        }
        if !self.kind.accepts(child.kind) {
            return Err(GoalModelError::InvalidNesting {
                parent: self.kind.to_string(),
                child: child.kind.to_string(),
            });
        }
        if self.children.iter().any(|c| c.id == child.id) {
            return Err(GoalModelError::Duplicate(child.id.to_string()));
        }
        self.children.push(child);
        Ok(())
    }

    /// Remove and return a direct child
    pub fn remove_child(&mut self, id: &str) -> Result<Node, GoalModelError> {
        let pos = self
            .children
            .iter()
            .position(|c| c.id.as_str() == id)
            .ok_or_else(|| GoalModelError::NotFound(id.to_string()))?;
        Ok(self.children.remove(pos))
    }

    /// Direct child by id
    pub fn get_child(&self, id: &str) -> Result<&Node, GoalModelError> {
        self.children
            .iter()
            .find(|c| c.id.as_str() == id)
            .ok_or_else(|| GoalModelError::NotFound(id.to_string()))
    }

    pub(crate) fn child_at(&self, i: usize) -> Option<&Node> {
        self.children.get(i)
    }

    pub(crate) fn child_at_mut(&mut self, i: usize) -> Option<&mut Node> {
        self.children.get_mut(i)
    }

    /// Depth-first walk over this node and its descendants
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node, &[usize])) {
        fn go<'a>(node: &'a Node, path: &mut Vec<usize>, visit: &mut dyn FnMut(&'a Node, &[usize])) {
            visit(node, path.as_slice());
            for (i, child) in node.children.iter().enumerate() {
                path.push(i);
                go(child, path, visit);
                path.pop();
            }
        }
        go(self, &mut Vec::new(), visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_construct() {
        let goal = Node::goal("G3_T1.11", "Read data").unwrap();
        assert_eq!(goal.id().as_str(), "G3_T1.11");
        assert_eq!(goal.description(), "Read data");
    }

    #[test]
    fn test_node_id_validation() {
        assert!(NodeId::parse("G1").is_ok());
        assert!(NodeId::parse("G3_T1").is_ok());
        assert!(NodeId::parse("G3_T1.412").is_ok());
        assert!(NodeId::parse("G3_T1.4.2").is_ok());
        assert!(NodeId::parse("").is_err());
        assert!(NodeId::parse("X3_T1").is_err());
        assert!(NodeId::parse("G3_").is_err());
        assert!(NodeId::parse("G3_T1.").is_err());
        assert!(NodeId::parse("G3_X1").is_err());
    }

    #[test]
    fn test_term_suffix() {
        let id = NodeId::parse("G3_T1.11").unwrap();
        assert_eq!(id.term_suffix().as_deref(), Some("G3_T1_11"));
        assert_eq!(id.component().unwrap().path(), "/g3t1_11");
        assert_eq!(NodeId::parse("G3").unwrap().term_suffix(), None);
    }

    #[test]
    fn test_add_child() {
        let mut parent = Node::task("G3_T1", "Read").unwrap();
        let child = Node::leaf_task("G3_T1.4", "Read ABP").unwrap();
        parent.add_child(child.clone()).unwrap();

        assert_eq!(parent.children().len(), 1);
        assert_eq!(parent.children()[0], child);
    }

    #[test]
    fn test_remove_child() {
        let mut parent = Node::task("G3_T1", "Read").unwrap();
        parent.add_child(Node::leaf_task("G3_T1.4", "Read ABP").unwrap()).unwrap();

        let removed = parent.remove_child("G3_T1.4").unwrap();
        assert_eq!(removed.id().as_str(), "G3_T1.4");
        assert!(parent.children().is_empty());
    }

    #[test]
    fn test_remove_child_not_found() {
        let mut parent = Node::task("G3_T1", "Read").unwrap();
        parent.add_child(Node::leaf_task("G3_T1.4", "Read ABP").unwrap()).unwrap();

        assert_eq!(
            parent.remove_child("XXX"),
            Err(GoalModelError::NotFound("XXX".to_string()))
        );
    }

    #[test]
    fn test_get_child_not_found() {
        let parent = Node::goal("G3", "Read").unwrap();
        assert!(matches!(parent.get_child("XXX"), Err(GoalModelError::NotFound(_))));
    }

    #[test]
    fn test_nesting_rules() {
        let mut leaf = Node::leaf_task("G3_T1.1", "Leaf").unwrap();
        let other = Node::leaf_task("G3_T1.2", "Leaf").unwrap();
        assert!(matches!(leaf.add_child(other), Err(GoalModelError::LeafHasNoChildren(_))));

        let mut goal = Node::goal("G3", "Goal").unwrap();
        let leaf = Node::leaf_task("G3_T1.3", "Leaf").unwrap();
        assert!(matches!(goal.add_child(leaf), Err(GoalModelError::InvalidNesting { .. })));
    }

    #[test]
    fn test_leaf_properties() {
        let leaf = Node::leaf_task("G3_T1.1", "Collect ECG")
            .unwrap()
            .with_property(Property::new("R_G3_T1_1", 0.95))
            .with_context(Context::new("CTX_G3_T1_1", "ECG sensor on", true));

        assert_eq!(leaf.property("R_G3_T1_1").unwrap().value, 0.95);
        assert_eq!(leaf.property("W_G3_T1_1").unwrap().value, 1.0);
        assert_eq!(leaf.properties().len(), 3);
        assert!(leaf.context().unwrap().active);
    }

    #[test]
    fn test_serde_round_trip() {
        let node = Node::leaf_task("G3_T1.1", "Collect ECG").unwrap();
        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);

        let bad = json.replace("G3_T1.1", "bogus");
        assert!(serde_json::from_str::<Node>(&bad).is_err());
    }
}
