use std::collections::HashMap;
use std::ops::Range;

use thiserror::Error;

/// Placement directive when inserting or moving a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddAction {
    GroupHead,
    GroupTail,
    BeforeNode,
    AfterNode,
    Replace,
}

impl AddAction {
    pub fn from_i32(value: i32) -> Option<AddAction> {
        match value {
            0 => Some(AddAction::GroupHead),
            1 => Some(AddAction::GroupTail),
            2 => Some(AddAction::BeforeNode),
            3 => Some(AddAction::AfterNode),
            4 => Some(AddAction::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {0} not found")]
    UnknownNode(i32),
    #[error("node {0} is not a group")]
    NotAGroup(i32),
    #[error("node id {0} already in use")]
    DuplicateId(i32),
    #[error("moving node {0} inside its own subtree")]
    WouldCycle(i32),
    #[error("the root group cannot be moved or freed")]
    RootImmovable,
    #[error("unsupported add action for this operation")]
    UnsupportedAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeChild {
    Scinth(i32),
    Group(i32),
}

impl NodeChild {
    fn id(&self) -> i32 {
        match self {
            NodeChild::Scinth(id) | NodeChild::Group(id) => *id,
        }
    }
}

#[derive(Debug)]
struct GroupNode {
    children: Vec<NodeChild>,
    parent: i32,
}

/// The derived render representation of one group: half-open index ranges
/// into the flat scinth order and the pre-order group list, covering the
/// group's whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRange {
    pub id: i32,
    pub parent: i32,
    pub scinths: Range<usize>,
    pub groups: Range<usize>,
}

/// The node tree: Scinth payloads and Groups with globally unique ids,
/// flattened into a draw-ordered list with per-group ranges.
///
/// The nested children lists are the source of truth for structure; the
/// flat list and group ranges are rebuilt after every mutation, which is
/// also what keeps the range invariants (nesting, disjoint siblings) true
/// by construction. The root group id 0 always exists.
#[derive(Debug)]
pub struct NodeTree<T> {
    groups: HashMap<i32, GroupNode>,
    payloads: HashMap<i32, T>,
    flat: Vec<i32>,
    ranges: Vec<GroupRange>,
}

pub const ROOT_GROUP_ID: i32 = 0;

impl<T> Default for NodeTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NodeTree<T> {
    pub fn new() -> NodeTree<T> {
        let mut groups = HashMap::new();
        groups.insert(
            ROOT_GROUP_ID,
            GroupNode {
                children: Vec::new(),
                parent: ROOT_GROUP_ID,
            },
        );
        let mut tree = NodeTree {
            groups,
            payloads: HashMap::new(),
            flat: Vec::new(),
            ranges: Vec::new(),
        };
        tree.rebuild();
        tree
    }

    pub fn contains(&self, id: i32) -> bool {
        self.groups.contains_key(&id) || self.payloads.contains_key(&id)
    }

    pub fn is_group(&self, id: i32) -> bool {
        self.groups.contains_key(&id)
    }

    pub fn payload(&self, id: i32) -> Option<&T> {
        self.payloads.get(&id)
    }

    /// Scinth ids of the whole tree in draw order.
    pub fn flat(&self) -> &[i32] {
        &self.flat
    }

    /// Group ranges in pre-order; index 0 is the root group.
    pub fn ranges(&self) -> &[GroupRange] {
        &self.ranges
    }

    pub fn number_of_scinths(&self) -> usize {
        self.payloads.len()
    }

    pub fn number_of_groups(&self) -> usize {
        self.groups.len()
    }

    /// The scinth ids reached by addressing `id`: the node itself for a
    /// Scinth, or every scinth in the subtree for a Group, in draw order.
    pub fn scinth_ids_in(&self, id: i32) -> Result<Vec<i32>, TreeError> {
        if self.payloads.contains_key(&id) {
            return Ok(vec![id]);
        }
        let Some(range) = self.ranges.iter().find(|range| range.id == id) else {
            return Err(TreeError::UnknownNode(id));
        };
        Ok(self.flat[range.scinths.clone()].to_vec())
    }

    pub fn insert_scinth(
        &mut self,
        id: i32,
        payload: T,
        action: AddAction,
        target_id: i32,
    ) -> Result<Vec<T>, TreeError> {
        if self.contains(id) {
            return Err(TreeError::DuplicateId(id));
        }
        let mut removed = Vec::new();
        let (parent, index) = self.resolve_insertion(action, target_id, &mut removed)?;
        self.groups
            .get_mut(&parent)
            .expect("resolved parent exists")
            .children
            .insert(index, NodeChild::Scinth(id));
        self.payloads.insert(id, payload);
        self.rebuild();
        Ok(removed)
    }

    pub fn insert_group(
        &mut self,
        id: i32,
        action: AddAction,
        target_id: i32,
    ) -> Result<Vec<T>, TreeError> {
        if self.contains(id) {
            return Err(TreeError::DuplicateId(id));
        }
        let mut removed = Vec::new();
        let (parent, index) = self.resolve_insertion(action, target_id, &mut removed)?;
        self.groups
            .get_mut(&parent)
            .expect("resolved parent exists")
            .children
            .insert(index, NodeChild::Group(id));
        self.groups.insert(
            id,
            GroupNode {
                children: Vec::new(),
                parent,
            },
        );
        self.rebuild();
        Ok(removed)
    }

    /// Remove a node; for a Group the whole subtree goes. Returns the
    /// payloads of every removed Scinth.
    pub fn remove(&mut self, id: i32) -> Result<Vec<T>, TreeError> {
        if id == ROOT_GROUP_ID {
            return Err(TreeError::RootImmovable);
        }
        if !self.contains(id) {
            return Err(TreeError::UnknownNode(id));
        }
        let mut removed = Vec::new();
        self.detach(id);
        self.drop_subtree(id, &mut removed);
        self.rebuild();
        Ok(removed)
    }

    /// Remove every child of a group, recursively; the group itself stays.
    pub fn remove_group_children(&mut self, id: i32) -> Result<Vec<T>, TreeError> {
        let group = self.groups.get_mut(&id).ok_or(TreeError::NotAGroup(id))?;
        let children = std::mem::take(&mut group.children);
        let mut removed = Vec::new();
        for child in children {
            self.drop_subtree(child.id(), &mut removed);
        }
        self.rebuild();
        Ok(removed)
    }

    /// Remove only the Scinths in a group's subtree; groups remain.
    pub fn remove_scinths_deep(&mut self, id: i32) -> Result<Vec<T>, TreeError> {
        if !self.is_group(id) {
            return Err(TreeError::NotAGroup(id));
        }
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(group_id) = pending.pop() {
            let group = self.groups.get_mut(&group_id).expect("group ids stay valid");
            let mut kept = Vec::with_capacity(group.children.len());
            for child in std::mem::take(&mut group.children) {
                match child {
                    NodeChild::Scinth(scinth_id) => {
                        if let Some(payload) = self.payloads.remove(&scinth_id) {
                            removed.push(payload);
                        }
                    }
                    NodeChild::Group(child_id) => {
                        kept.push(child);
                        pending.push(child_id);
                    }
                }
            }
            self.groups
                .get_mut(&group_id)
                .expect("group ids stay valid")
                .children = kept;
        }
        self.rebuild();
        Ok(removed)
    }

    /// Re-splice a node (and its subtree, for groups) to a new position.
    pub fn move_node(
        &mut self,
        id: i32,
        action: AddAction,
        target_id: i32,
    ) -> Result<(), TreeError> {
        if id == ROOT_GROUP_ID {
            return Err(TreeError::RootImmovable);
        }
        if !self.contains(id) {
            return Err(TreeError::UnknownNode(id));
        }
        if id == target_id || (self.is_group(id) && self.is_in_subtree(target_id, id)) {
            return Err(TreeError::WouldCycle(id));
        }
        if matches!(action, AddAction::Replace) {
            return Err(TreeError::UnsupportedAction);
        }
        let child = self.detach(id);
        let mut removed = Vec::new();
        let (parent, index) = match self.resolve_insertion(action, target_id, &mut removed) {
            Ok(position) => position,
            Err(err) => {
                // Reattach at the root tail rather than losing the node.
                self.groups
                    .get_mut(&ROOT_GROUP_ID)
                    .expect("root group always exists")
                    .children
                    .push(child);
                if let NodeChild::Group(group_id) = child {
                    self.groups
                        .get_mut(&group_id)
                        .expect("detached group still mapped")
                        .parent = ROOT_GROUP_ID;
                }
                self.rebuild();
                return Err(err);
            }
        };
        debug_assert!(removed.is_empty());
        self.groups
            .get_mut(&parent)
            .expect("resolved parent exists")
            .children
            .insert(index, child);
        if let NodeChild::Group(group_id) = child {
            self.groups
                .get_mut(&group_id)
                .expect("moved group still mapped")
                .parent = parent;
        }
        self.rebuild();
        Ok(())
    }

    fn resolve_insertion(
        &mut self,
        action: AddAction,
        target_id: i32,
        removed: &mut Vec<T>,
    ) -> Result<(i32, usize), TreeError> {
        match action {
            AddAction::GroupHead => {
                if !self.is_group(target_id) {
                    return Err(TreeError::NotAGroup(target_id));
                }
                Ok((target_id, 0))
            }
            AddAction::GroupTail => {
                let group = self
                    .groups
                    .get(&target_id)
                    .ok_or(TreeError::NotAGroup(target_id))?;
                Ok((target_id, group.children.len()))
            }
            AddAction::BeforeNode => self.position_of(target_id),
            AddAction::AfterNode => {
                let (parent, index) = self.position_of(target_id)?;
                Ok((parent, index + 1))
            }
            AddAction::Replace => {
                if target_id == ROOT_GROUP_ID {
                    return Err(TreeError::RootImmovable);
                }
                let (parent, index) = self.position_of(target_id)?;
                self.detach(target_id);
                self.drop_subtree(target_id, removed);
                Ok((parent, index))
            }
        }
    }

    fn position_of(&self, id: i32) -> Result<(i32, usize), TreeError> {
        if id == ROOT_GROUP_ID {
            return Err(TreeError::RootImmovable);
        }
        let parent = if let Some(group) = self.groups.get(&id) {
            group.parent
        } else if self.payloads.contains_key(&id) {
            self.owner_of_scinth(id)
        } else {
            return Err(TreeError::UnknownNode(id));
        };
        let index = self
            .groups
            .get(&parent)
            .expect("parents stay valid")
            .children
            .iter()
            .position(|child| child.id() == id)
            .expect("child listed in its parent");
        Ok((parent, index))
    }

    fn owner_of_scinth(&self, id: i32) -> i32 {
        for (group_id, group) in &self.groups {
            if group
                .children
                .iter()
                .any(|child| *child == NodeChild::Scinth(id))
            {
                return *group_id;
            }
        }
        unreachable!("scinth payloads are always owned by a group");
    }

    fn detach(&mut self, id: i32) -> NodeChild {
        let (parent, index) = self.position_of(id).expect("detach of known node");
        self.groups
            .get_mut(&parent)
            .expect("parents stay valid")
            .children
            .remove(index)
    }

    fn drop_subtree(&mut self, id: i32, removed: &mut Vec<T>) {
        if let Some(payload) = self.payloads.remove(&id) {
            removed.push(payload);
            return;
        }
        if let Some(group) = self.groups.remove(&id) {
            for child in group.children {
                self.drop_subtree(child.id(), removed);
            }
        }
    }

    fn is_in_subtree(&self, id: i32, subtree_root: i32) -> bool {
        if id == subtree_root {
            return true;
        }
        let mut current = id;
        loop {
            let parent = if let Some(group) = self.groups.get(&current) {
                group.parent
            } else if self.payloads.contains_key(&current) {
                self.owner_of_scinth(current)
            } else {
                return false;
            };
            if parent == subtree_root {
                return true;
            }
            if parent == current {
                return false;
            }
            current = parent;
        }
    }

    fn rebuild(&mut self) {
        self.flat.clear();
        self.ranges.clear();
        self.rebuild_group(ROOT_GROUP_ID, ROOT_GROUP_ID);
    }

    fn rebuild_group(&mut self, id: i32, parent: i32) {
        let range_index = self.ranges.len();
        let scinth_start = self.flat.len();
        let group_start = range_index + 1;
        self.ranges.push(GroupRange {
            id,
            parent,
            scinths: scinth_start..scinth_start,
            groups: group_start..group_start,
        });
        let children = self.groups[&id].children.clone();
        for child in children {
            match child {
                NodeChild::Scinth(scinth_id) => self.flat.push(scinth_id),
                NodeChild::Group(group_id) => self.rebuild_group(group_id, id),
            }
        }
        self.ranges[range_index].scinths = scinth_start..self.flat.len();
        self.ranges[range_index].groups = group_start..self.ranges.len();
    }

    /// The direct children of a group as (id, is_group) pairs, for
    /// diagnostics such as the tree dump.
    pub fn children_of(&self, id: i32) -> Option<Vec<(i32, bool)>> {
        self.groups.get(&id).map(|group| {
            group
                .children
                .iter()
                .map(|child| match child {
                    NodeChild::Scinth(child_id) => (*child_id, false),
                    NodeChild::Group(child_id) => (*child_id, true),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tree: &NodeTree<&'static str>) -> Vec<i32> {
        tree.flat().to_vec()
    }

    fn assert_invariants(tree: &NodeTree<&'static str>) {
        // Node ids unique across scinths and groups.
        for id in tree.payloads.keys() {
            assert!(!tree.groups.contains_key(id));
        }
        // Every group range is contained in its parent's range, and sibling
        // ranges are disjoint.
        let ranges = tree.ranges();
        for range in ranges {
            if range.id != ROOT_GROUP_ID {
                let parent = ranges
                    .iter()
                    .find(|candidate| candidate.id == range.parent)
                    .unwrap();
                assert!(parent.scinths.start <= range.scinths.start);
                assert!(range.scinths.end <= parent.scinths.end);
            }
        }
        for a in ranges {
            for b in ranges {
                if a.id == b.id || a.parent != b.parent || a.id == ROOT_GROUP_ID {
                    continue;
                }
                let disjoint =
                    a.scinths.end <= b.scinths.start || b.scinths.end <= a.scinths.start;
                assert!(disjoint, "ranges of {} and {} overlap", a.id, b.id);
            }
        }
    }

    #[test]
    fn inserts_at_head_and_tail() {
        let mut tree = NodeTree::new();
        tree.insert_scinth(1, "a", AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(2, "b", AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(3, "c", AddAction::GroupHead, 0).unwrap();
        assert_eq!(vec![3, 1, 2], ids(&tree));
        assert_invariants(&tree);
    }

    #[test]
    fn inserts_before_and_after() {
        let mut tree = NodeTree::new();
        tree.insert_scinth(1, "a", AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(2, "b", AddAction::AfterNode, 1).unwrap();
        tree.insert_scinth(3, "c", AddAction::BeforeNode, 2).unwrap();
        assert_eq!(vec![1, 3, 2], ids(&tree));
        assert_invariants(&tree);
    }

    #[test]
    fn duplicate_ids_rejected_across_kinds() {
        let mut tree = NodeTree::new();
        tree.insert_scinth(5, "a", AddAction::GroupTail, 0).unwrap();
        assert_eq!(
            Err(TreeError::DuplicateId(5)),
            tree.insert_group(5, AddAction::GroupTail, 0).map(|_| ())
        );
        tree.insert_group(6, AddAction::GroupTail, 0).unwrap();
        assert_eq!(
            Err(TreeError::DuplicateId(6)),
            tree.insert_scinth(6, "b", AddAction::GroupTail, 0).map(|_| ())
        );
    }

    #[test]
    fn nested_group_ranges() {
        let mut tree = NodeTree::new();
        tree.insert_scinth(1, "a", AddAction::GroupTail, 0).unwrap();
        tree.insert_group(10, AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(2, "b", AddAction::GroupTail, 10).unwrap();
        tree.insert_group(11, AddAction::GroupTail, 10).unwrap();
        tree.insert_scinth(3, "c", AddAction::GroupTail, 11).unwrap();
        tree.insert_scinth(4, "d", AddAction::GroupTail, 0).unwrap();

        assert_eq!(vec![1, 2, 3, 4], ids(&tree));
        let ranges = tree.ranges();
        assert_eq!(ROOT_GROUP_ID, ranges[0].id);
        assert_eq!(0..4, ranges[0].scinths);
        let group_10 = ranges.iter().find(|range| range.id == 10).unwrap();
        assert_eq!(1..3, group_10.scinths);
        let group_11 = ranges.iter().find(|range| range.id == 11).unwrap();
        assert_eq!(2..3, group_11.scinths);
        assert_invariants(&tree);

        assert_eq!(vec![2, 3], tree.scinth_ids_in(10).unwrap());
        assert_eq!(vec![3], tree.scinth_ids_in(11).unwrap());
        assert_eq!(vec![2], tree.scinth_ids_in(2).unwrap());
    }

    #[test]
    fn remove_group_removes_subtree() {
        let mut tree = NodeTree::new();
        tree.insert_group(10, AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(1, "a", AddAction::GroupTail, 10).unwrap();
        tree.insert_group(11, AddAction::GroupTail, 10).unwrap();
        tree.insert_scinth(2, "b", AddAction::GroupTail, 11).unwrap();
        tree.insert_scinth(3, "c", AddAction::GroupTail, 0).unwrap();

        let removed = tree.remove(10).unwrap();
        assert_eq!(2, removed.len());
        assert_eq!(vec![3], ids(&tree));
        assert!(!tree.contains(10));
        assert!(!tree.contains(11));
        assert_invariants(&tree);
    }

    #[test]
    fn free_all_keeps_group_deep_free_keeps_groups() {
        let mut tree = NodeTree::new();
        tree.insert_group(10, AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(1, "a", AddAction::GroupTail, 10).unwrap();
        tree.insert_group(11, AddAction::GroupTail, 10).unwrap();
        tree.insert_scinth(2, "b", AddAction::GroupTail, 11).unwrap();

        let removed = tree.remove_scinths_deep(10).unwrap();
        assert_eq!(2, removed.len());
        assert!(tree.contains(10));
        assert!(tree.contains(11));
        assert_eq!(0, tree.number_of_scinths());

        tree.insert_scinth(3, "c", AddAction::GroupTail, 11).unwrap();
        let removed = tree.remove_group_children(10).unwrap();
        assert_eq!(1, removed.len());
        assert!(tree.contains(10));
        assert!(!tree.contains(11));
        assert_invariants(&tree);
    }

    #[test]
    fn replace_takes_position() {
        let mut tree = NodeTree::new();
        tree.insert_scinth(1, "a", AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(2, "b", AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(3, "c", AddAction::GroupTail, 0).unwrap();
        let removed = tree.insert_scinth(4, "d", AddAction::Replace, 2).unwrap();
        assert_eq!(1, removed.len());
        assert_eq!(vec![1, 4, 3], ids(&tree));
        assert_invariants(&tree);
    }

    #[test]
    fn move_node_re_splices() {
        let mut tree = NodeTree::new();
        tree.insert_scinth(1, "a", AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(2, "b", AddAction::GroupTail, 0).unwrap();
        tree.insert_group(10, AddAction::GroupTail, 0).unwrap();
        tree.insert_scinth(3, "c", AddAction::GroupTail, 10).unwrap();

        tree.move_node(1, AddAction::GroupTail, 10).unwrap();
        assert_eq!(vec![2, 3, 1], ids(&tree));
        tree.move_node(10, AddAction::BeforeNode, 2).unwrap();
        assert_eq!(vec![3, 1, 2], ids(&tree));
        assert_invariants(&tree);
    }

    #[test]
    fn move_group_into_itself_rejected() {
        let mut tree = NodeTree::new();
        tree.insert_group(10, AddAction::GroupTail, 0).unwrap();
        tree.insert_group(11, AddAction::GroupTail, 10).unwrap();
        assert_eq!(
            Err(TreeError::WouldCycle(10)),
            tree.move_node(10, AddAction::GroupTail, 11)
        );
        assert_eq!(
            Err(TreeError::WouldCycle(10)),
            tree.move_node(10, AddAction::GroupTail, 10)
        );
        assert_invariants(&tree);
    }

    #[test]
    fn root_cannot_be_removed_or_moved() {
        let mut tree: NodeTree<&'static str> = NodeTree::new();
        assert_eq!(Err(TreeError::RootImmovable), tree.remove(0).map(|_| ()));
        assert_eq!(
            Err(TreeError::RootImmovable),
            tree.move_node(0, AddAction::GroupTail, 0)
        );
    }
}
