//! GoalTree - rooted goal model with indexed lookup
//!
//! The tree keeps an id → child-index path table, so `find_by_id` costs one
//! hash lookup plus a walk of `depth` steps. Mutations rebuild the table; they
//! only happen while the model is being configured.

use std::collections::HashMap;

use tracing::debug;

use bsn_common::{ComponentId, GoalModelError, TermKind};

use super::node::Node;

/// Goal model owned by one actor (e.g. the body hub)
#[derive(Debug, Clone, Default)]
pub struct GoalTree {
    actor: String,
    root: Option<Node>,
    /// Node id → child indices from the root
    paths: HashMap<String, Vec<usize>>,
    /// Component term suffix → leaf node id
    components: HashMap<String, String>,
}

impl GoalTree {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            ..Self::default()
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    /// Install the root node (and its subtree)
    pub fn set_root(&mut self, root: Node) -> Result<(), GoalModelError> {
        if let Some(existing) = &self.root {
            return Err(GoalModelError::RootAlreadySet(existing.id().to_string()));
        }
        Self::check_nesting(&root)?;
        Self::check_unique(&root, &HashMap::new())?;
        self.root = Some(root);
        self.reindex();
        Ok(())
    }

    /// Number of nodes
    pub fn size(&self) -> usize {
        self.paths.len()
    }

    /// Look up a node by id
    pub fn find_by_id(&self, id: &str) -> Result<&Node, GoalModelError> {
        let not_found = || GoalModelError::NotFound(id.to_string());
        let path = self.paths.get(id).ok_or_else(not_found)?;
        let mut node = self.root.as_ref().ok_or_else(not_found)?;
        for &i in path {
            node = node.child_at(i).ok_or_else(not_found)?;
        }
        Ok(node)
    }

    /// Look up the leaf task addressed by an external component path (`/g3t1_1`)
    pub fn find_by_component(&self, path: &str) -> Result<&Node, GoalModelError> {
        let component = ComponentId::from_path(path)
            .map_err(|_| GoalModelError::NotFound(path.to_string()))?;
        let id = self
            .components
            .get(&component.term_suffix())
            .ok_or_else(|| GoalModelError::NotFound(path.to_string()))?;
        self.find_by_id(id)
    }

    /// Attach `child` under the node `parent_id`
    pub fn add_child(&mut self, parent_id: &str, child: Node) -> Result<(), GoalModelError> {
        Self::check_nesting(&child)?;
        Self::check_unique(&child, &self.paths)?;
        let parent = self.find_by_id_mut(parent_id)?;
        parent.add_child(child)?;
        self.reindex();
        Ok(())
    }

    /// Detach and return the child `child_id` of `parent_id`
    pub fn remove_child(&mut self, parent_id: &str, child_id: &str) -> Result<Node, GoalModelError> {
        let parent = self.find_by_id_mut(parent_id)?;
        let removed = parent.remove_child(child_id)?;
        self.reindex();
        Ok(removed)
    }

    /// All leaf tasks in depth-first order
    pub fn leaf_tasks(&self) -> Vec<&Node> {
        let mut leaves = Vec::new();
        if let Some(root) = &self.root {
            root.walk(&mut |node, _| {
                if node.is_leaf() {
                    leaves.push(node);
                }
            });
        }
        leaves
    }

    /// Formula terms contributed by the leaf tasks (`R_`, `CTX_`, `F_` per leaf)
    pub fn term_namespace(&self) -> Vec<String> {
        self.leaf_tasks()
            .into_iter()
            .filter_map(|leaf| leaf.id().term_suffix())
            .flat_map(|suffix| {
                [TermKind::Reliability, TermKind::Context, TermKind::Feasibility]
                    .into_iter()
                    .filter_map(move |kind| kind.term_for(&suffix))
            })
            .collect()
    }

    fn find_by_id_mut(&mut self, id: &str) -> Result<&mut Node, GoalModelError> {
        let not_found = || GoalModelError::NotFound(id.to_string());
        let path = self.paths.get(id).ok_or_else(not_found)?.clone();
        let mut node = self.root.as_mut().ok_or_else(not_found)?;
        for i in path {
            node = node.child_at_mut(i).ok_or_else(not_found)?;
        }
        Ok(node)
    }

    /// Subtrees built outside `add_child` (e.g. deserialized) skip its checks
    fn check_nesting(subtree: &Node) -> Result<(), GoalModelError> {
        let mut error = None;
        subtree.walk(&mut |node, _| {
            if error.is_some() {
                return;
            }
            if node.is_leaf() && !node.children().is_empty() {
                error = Some(GoalModelError::LeafHasNoChildren(node.id().to_string()));
                return;
            }
            if let Some(child) = node.children().iter().find(|c| !node.kind().accepts(c.kind())) {
                error = Some(GoalModelError::InvalidNesting {
                    parent: node.kind().to_string(),
                    child: child.kind().to_string(),
                });
            }
        });
        error.map_or(Ok(()), Err)
    }

    fn check_unique(subtree: &Node, existing: &HashMap<String, Vec<usize>>) -> Result<(), GoalModelError> {
        let mut seen = std::collections::HashSet::new();
        let mut duplicate = None;
        subtree.walk(&mut |node, _| {
            let id = node.id().as_str();
            if duplicate.is_none() && (existing.contains_key(id) || !seen.insert(id.to_string())) {
                duplicate = Some(id.to_string());
            }
        });
        match duplicate {
            Some(id) => Err(GoalModelError::Duplicate(id)),
            None => Ok(()),
        }
    }

    fn reindex(&mut self) {
        self.paths.clear();
        self.components.clear();
        let Some(root) = &self.root else { return };

        let paths = &mut self.paths;
        let components = &mut self.components;
        root.walk(&mut |node, path| {
            paths.insert(node.id().to_string(), path.to_vec());
            if node.is_leaf() {
                if let Some(component) = node.id().component() {
                    components.insert(component.term_suffix(), node.id().to_string());
                }
            }
        });
        debug!(actor = %self.actor, nodes = self.paths.len(), "Reindexed goal tree");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_hub_tree() -> GoalTree {
        let mut tree = GoalTree::new("body_hub");
        tree.set_root(Node::goal("G1", "Emergency is detected").unwrap()).unwrap();
        tree.add_child("G1", Node::goal("G3", "Patient status is monitored").unwrap())
            .unwrap();
        tree.add_child("G3", Node::task("G3_T1", "Read vital signs").unwrap())
            .unwrap();
        tree.add_child("G3_T1", Node::leaf_task("G3_T1.1", "Read SpO2").unwrap())
            .unwrap();
        tree.add_child("G3_T1", Node::leaf_task("G3_T1.2", "Read ECG").unwrap())
            .unwrap();
        tree
    }

    #[test]
    fn test_find_by_id() {
        let tree = body_hub_tree();
        assert_eq!(tree.size(), 5);
        assert_eq!(tree.find_by_id("G3_T1.2").unwrap().description(), "Read ECG");
        assert_eq!(tree.find_by_id("G1").unwrap().children().len(), 1);
    }

    #[test]
    fn test_find_missing() {
        let tree = body_hub_tree();
        assert_eq!(
            tree.find_by_id("G9_T9").unwrap_err(),
            GoalModelError::NotFound("G9_T9".to_string())
        );
        assert!(GoalTree::new("empty").find_by_id("G1").is_err());
    }

    #[test]
    fn test_find_by_component() {
        let tree = body_hub_tree();
        let node = tree.find_by_component("/g3t1_1").unwrap();
        assert_eq!(node.id().as_str(), "G3_T1.1");
        assert!(tree.find_by_component("/g4t1").is_err());
        assert!(tree.find_by_component("nonsense").is_err());
    }

    #[test]
    fn test_remove_child_reindexes() {
        let mut tree = body_hub_tree();
        let removed = tree.remove_child("G3_T1", "G3_T1.1").unwrap();
        assert_eq!(removed.id().as_str(), "G3_T1.1");
        assert!(tree.find_by_id("G3_T1.1").is_err());
        assert_eq!(tree.find_by_id("G3_T1.2").unwrap().description(), "Read ECG");
        assert_eq!(tree.size(), 4);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut tree = body_hub_tree();
        let err = tree
            .add_child("G3", Node::task("G3_T1", "Again").unwrap())
            .unwrap_err();
        assert_eq!(err, GoalModelError::Duplicate("G3_T1".to_string()));
    }

    #[test]
    fn test_second_root_rejected() {
        let mut tree = body_hub_tree();
        assert!(matches!(
            tree.set_root(Node::goal("G2", "Other").unwrap()),
            Err(GoalModelError::RootAlreadySet(_))
        ));
    }

    #[test]
    fn test_deserialized_root_is_checked() {
        let tree_json = r#"{
            "id": "G1", "description": "Emergency is detected", "kind": "Goal",
            "children": [{
                "id": "G3_T1", "description": "Read vital signs", "kind": "Task",
                "children": [{ "id": "G3_T1.1", "description": "Read SpO2", "kind": "LeafTask" }]
            }]
        }"#;
        let mut tree = GoalTree::new("body_hub");
        tree.set_root(serde_json::from_str(tree_json).unwrap()).unwrap();
        assert_eq!(tree.size(), 3);
        assert_eq!(tree.find_by_component("/g3t1_1").unwrap().description(), "Read SpO2");

        let leaf_with_child = r#"{
            "id": "G3_T1", "description": "root", "kind": "Task",
            "children": [{
                "id": "G3_T1.1", "description": "leaf", "kind": "LeafTask",
                "children": [{ "id": "G3_T1.2", "description": "x", "kind": "LeafTask" }]
            }]
        }"#;
        let mut tree = GoalTree::new("body_hub");
        assert_eq!(
            tree.set_root(serde_json::from_str(leaf_with_child).unwrap()),
            Err(GoalModelError::LeafHasNoChildren("G3_T1.1".to_string()))
        );

        let goal_under_task = r#"{
            "id": "G1_T1", "description": "root", "kind": "Task",
            "children": [{ "id": "G2", "description": "goal", "kind": "Goal" }]
        }"#;
        assert!(matches!(
            GoalTree::new("body_hub").set_root(serde_json::from_str(goal_under_task).unwrap()),
            Err(GoalModelError::InvalidNesting { .. })
        ));
    }

    #[test]
    fn test_term_namespace() {
        let tree = body_hub_tree();
        assert_eq!(
            tree.term_namespace(),
            vec![
                "R_G3_T1_1", "CTX_G3_T1_1", "F_G3_T1_1", "R_G3_T1_2", "CTX_G3_T1_2", "F_G3_T1_2",
            ]
        );
        assert_eq!(tree.leaf_tasks().len(), 2);
    }
}
