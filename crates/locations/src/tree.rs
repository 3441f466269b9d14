//! Hierarchy rendering as an id-keyed arena.
//!
//! Nodes reference their children by id; the tree is assembled from flat
//! rows with an explicit stack instead of recursive ownership.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use wms_core::LocationId;

use crate::location::{Location, LocationNode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub location: LocationNode,
    pub children: Vec<LocationId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationTree {
    nodes: HashMap<LocationId, TreeNode>,
    roots: Vec<LocationId>,
}

impl LocationTree {
    /// Build the tree from flat rows, keeping locations with `level <= max_level`.
    ///
    /// Rows whose parent is filtered out or missing become roots. Siblings are
    /// ordered by code.
    pub fn build(rows: impl IntoIterator<Item = Location>, max_level: u8) -> Self {
        let rows: Vec<Location> = rows.into_iter().filter(|l| l.level <= max_level).collect();

        let mut nodes: HashMap<LocationId, TreeNode> = rows
            .iter()
            .map(|l| {
                (
                    l.id,
                    TreeNode {
                        location: l.node(0),
                        children: Vec::new(),
                    },
                )
            })
            .collect();

        let mut sorted: Vec<&Location> = rows.iter().collect();
        sorted.sort_by(|a, b| a.code.cmp(&b.code));

        let mut roots = Vec::new();
        for row in sorted {
            match row.parent_id.filter(|p| nodes.contains_key(p)) {
                Some(parent) => {
                    if let Some(node) = nodes.get_mut(&parent) {
                        node.children.push(row.id);
                    }
                }
                None => roots.push(row.id),
            }
        }

        let mut tree = Self { nodes, roots };
        tree.assign_depths();
        tree
    }

    fn assign_depths(&mut self) {
        let mut stack: Vec<(LocationId, u8)> = self.roots.iter().map(|id| (*id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.location.depth = depth;
            stack.extend(node.children.iter().map(|child| (*child, depth + 1)));
        }
    }

    pub fn roots(&self) -> &[LocationId] {
        &self.roots
    }

    pub fn node(&self, id: LocationId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order traversal (parents before children, siblings by code).
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<LocationId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            out.push(node);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{NewLocation, ZoneType};
    use chrono::Utc;

    fn make(id: i64, name: &str, parent: Option<&Location>) -> Location {
        let mut req = NewLocation::new(name, ZoneType::Storage);
        if let Some(p) = parent {
            req = req.under(p.id);
        }
        req.plan(parent).unwrap().into_location(LocationId::new(id), Utc::now())
    }

    fn sample() -> Vec<Location> {
        let wh = make(1, "WH", None);
        let b = make(2, "B", Some(&wh));
        let a = make(3, "A", Some(&wh));
        let a1 = make(4, "01", Some(&a));
        let a1x = make(5, "X", Some(&a1));
        vec![a1x, wh, b, a1, a]
    }

    #[test]
    fn walk_is_preorder_with_sorted_siblings() {
        let tree = LocationTree::build(sample(), 5);
        let walked: Vec<(&str, u8)> = tree
            .walk()
            .iter()
            .map(|n| (n.location.code.as_str(), n.location.depth))
            .collect();
        assert_eq!(
            walked,
            vec![
                ("WH", 0),
                ("WH-A", 1),
                ("WH-A-01", 2),
                ("WH-A-01-X", 3),
                ("WH-B", 1),
            ]
        );
    }

    #[test]
    fn max_level_prunes_deeper_nodes() {
        let tree = LocationTree::build(sample(), 2);
        assert_eq!(tree.len(), 3);
        let wh = tree.node(LocationId::new(1)).unwrap();
        assert_eq!(wh.children, vec![LocationId::new(3), LocationId::new(2)]);
        assert!(tree.node(LocationId::new(3)).unwrap().children.is_empty());
    }

    #[test]
    fn orphans_become_roots() {
        let rows: Vec<Location> = sample().into_iter().filter(|l| l.id != LocationId::new(1)).collect();
        let tree = LocationTree::build(rows, 5);
        let roots: Vec<i64> = tree.roots().iter().map(|id| id.get()).collect();
        assert_eq!(roots, vec![3, 2]);
    }
}
