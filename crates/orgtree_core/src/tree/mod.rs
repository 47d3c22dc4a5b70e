//! Tree assembly from flat unit rows.
//!
//! # Responsibility
//! - Turn a level-ordered list of units into a nested forest for display.
//!
//! # Invariants
//! - Sibling order follows input order; the assembler never re-sorts.
//! - Every input unit appears exactly once in the output.
//! - A unit whose parent is absent from the input becomes a forest root.

use crate::model::unit::{Unit, UnitId, UnitStatus, UnitType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tree read model consumed by org-chart rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTreeNode {
    pub id: UnitId,
    pub code: String,
    pub name: String,
    pub short_name: Option<String>,
    pub unit_type: UnitType,
    pub status: UnitStatus,
    pub level: u32,
    pub sort_order: i64,
    pub parent_id: Option<UnitId>,
    pub children: Vec<UnitTreeNode>,
}

impl From<Unit> for UnitTreeNode {
    fn from(unit: Unit) -> Self {
        Self {
            id: unit.id,
            code: unit.code,
            name: unit.name,
            short_name: unit.short_name,
            unit_type: unit.unit_type,
            status: unit.status,
            level: unit.level,
            sort_order: unit.sort_order,
            parent_id: unit.parent_id,
            children: Vec::new(),
        }
    }
}

impl UnitTreeNode {
    /// Returns the number of nodes in this subtree, including `self`.
    pub fn subtree_size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Builds a forest from units sorted by `(level, sort_order, name)`.
///
/// Total over any finite input: dangling parent references and parent
/// cycles in corrupted data surface as extra roots instead of dropping
/// nodes.
pub fn assemble(units: Vec<Unit>) -> Vec<UnitTreeNode> {
    let mut index: HashMap<UnitId, usize> = HashMap::with_capacity(units.len());
    for (position, unit) in units.iter().enumerate() {
        index.entry(unit.id).or_insert(position);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    let mut roots = Vec::new();
    for (position, unit) in units.iter().enumerate() {
        match unit.parent_id.and_then(|parent_id| index.get(&parent_id)) {
            Some(&parent) if parent != position => children[parent].push(position),
            _ => roots.push(position),
        }
    }

    let mut slots: Vec<Option<UnitTreeNode>> = units
        .into_iter()
        .map(|unit| Some(UnitTreeNode::from(unit)))
        .collect();
    let mut visited = vec![false; slots.len()];
    let mut forest = Vec::with_capacity(roots.len());

    for root in roots {
        visited[root] = true;
        forest.extend(build_subtree(root, &mut children, &mut slots, &mut visited));
    }

    // Rows only reachable through a parent cycle.
    for position in 0..slots.len() {
        if !visited[position] {
            visited[position] = true;
            forest.extend(build_subtree(position, &mut children, &mut slots, &mut visited));
        }
    }

    forest
}

fn build_subtree(
    root: usize,
    children: &mut [Vec<usize>],
    slots: &mut [Option<UnitTreeNode>],
    visited: &mut [bool],
) -> Option<UnitTreeNode> {
    let mut built: HashMap<usize, UnitTreeNode> = HashMap::new();
    let mut stack = vec![(root, false)];

    while let Some((position, expanded)) = stack.pop() {
        if expanded {
            let Some(mut node) = slots[position].take() else {
                continue;
            };
            node.children = children[position]
                .iter()
                .filter_map(|child| built.remove(child))
                .collect();
            built.insert(position, node);
            continue;
        }

        let mut accepted = Vec::with_capacity(children[position].len());
        for &child in &children[position] {
            if !visited[child] {
                visited[child] = true;
                accepted.push(child);
            }
        }
        stack.push((position, true));
        stack.extend(accepted.iter().rev().map(|&child| (child, false)));
        children[position] = accepted;
    }

    built.remove(&root)
}
