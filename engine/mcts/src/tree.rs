//! Node arena and the reusable search tree.
//!
//! Nodes are stored in a contiguous arena behind a reader-writer lock and
//! referenced by stable [`NodeId`] indices. Descent and backup hold the
//! shared lock (per-node statistics are atomic); creating edges, spawning
//! children and re-rooting hold the exclusive lock.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use xqzero_core::{Move, Position, PositionHistory};

use crate::node::{Node, NodeId};

/// Contiguous node storage. Index 0 is always the current root.
#[derive(Debug)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    fn with_root() -> Arena {
        Arena {
            nodes: vec![Node::new(NodeId::NONE)],
        }
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, root first. Order is allocation order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Child node behind `edge_index`, spawning it lazily.
    pub(crate) fn get_or_spawn_child(&mut self, parent: NodeId, edge_index: usize) -> NodeId {
        let existing = self.get(parent).child(edge_index);
        if existing.is_some() {
            return existing;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(parent));
        self.get_mut(parent).set_child(edge_index, id);
        id
    }

    /// Drop everything and start over with a fresh root.
    fn reset(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::new(NodeId::NONE));
    }

    /// Rebuild the arena so that `new_root` becomes index 0, keeping its
    /// subtree (statistics included) and dropping everything else.
    fn reroot(&mut self, new_root: NodeId) {
        let old_nodes = std::mem::take(&mut self.nodes);

        // BFS over the kept subtree, assigning new indices in discovery
        // order so parents are always remapped before their children.
        let mut map = vec![u32::MAX; old_nodes.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        map[new_root.index()] = 0;
        order.push(new_root.index());
        queue.push_back(new_root.index());
        while let Some(idx) = queue.pop_front() {
            for child in old_nodes[idx].children() {
                if child.is_some() {
                    map[child.index()] = order.len() as u32;
                    order.push(child.index());
                    queue.push_back(child.index());
                }
            }
        }

        let mut slots: Vec<Option<Node>> = old_nodes.into_iter().map(Some).collect();
        self.nodes = Vec::with_capacity(order.len());
        for &old_idx in &order {
            let mut node = match slots[old_idx].take() {
                Some(node) => node,
                None => continue,
            };
            if old_idx == new_root.index() {
                node.set_parent(NodeId::NONE);
            } else {
                node.set_parent(NodeId(map[node.parent().index()]));
            }
            for child in node.children_mut() {
                if child.is_some() {
                    *child = NodeId(map[child.index()]);
                }
            }
            self.nodes.push(node);
        }
    }
}

/// Recover the guard from a poisoned lock: node statistics stay usable
/// even if another worker panicked mid-iteration.
pub(crate) fn read_arena(lock: &RwLock<Arena>) -> RwLockReadGuard<'_, Arena> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_arena(lock: &RwLock<Arena>) -> RwLockWriteGuard<'_, Arena> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A root node plus the line of play that led to it.
///
/// The tree outlives individual searches: advancing the root along a
/// played move keeps the chosen subtree and its accumulated statistics,
/// so the next search starts warm.
pub struct NodeTree<P: Position> {
    arena: Arc<RwLock<Arena>>,
    root: NodeId,
    history: PositionHistory<P>,
}

impl<P: Position> NodeTree<P> {
    pub fn new(start: P) -> NodeTree<P> {
        NodeTree {
            arena: Arc::new(RwLock::new(Arena::with_root())),
            root: NodeId(0),
            history: PositionHistory::new(start),
        }
    }

    pub fn played_history(&self) -> &PositionHistory<P> {
        &self.history
    }

    #[inline]
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Shared handle to the node storage, for a running search.
    pub(crate) fn shared_arena(&self) -> Arc<RwLock<Arena>> {
        Arc::clone(&self.arena)
    }

    /// Read access to the node storage.
    pub fn nodes(&self) -> RwLockReadGuard<'_, Arena> {
        read_arena(&self.arena)
    }

    /// Completed visits at the current root.
    pub fn root_visits(&self) -> u32 {
        let arena = self.nodes();
        arena.get(self.root).n()
    }

    /// Advance the root along `mv`, keeping the subtree behind that move
    /// (with all statistics) and freeing every sibling subtree. If the
    /// move was never explored the tree restarts empty at the new head.
    ///
    /// Must not be called while a search on this tree is running.
    pub fn trim_tree_at_head(&mut self, mv: Move) {
        {
            let mut arena = write_arena(&self.arena);
            let root = arena.get(self.root);
            let kept = root
                .edges()
                .iter()
                .position(|e| e.mv() == mv)
                .map(|i| root.child(i))
                .filter(|child| child.is_some());
            match kept {
                Some(child) => arena.reroot(child),
                None => arena.reset(),
            }
        }
        self.root = NodeId(0);
        self.history.append(mv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use games_tictactoe::TicTacToe;
    use xqzero_core::Square;

    fn mv(cell: u8) -> Move {
        Move::new(Square::new(cell), Square::new(cell))
    }

    fn extend_with_cells(arena: &mut Arena, id: NodeId, cells: &[u8]) {
        arena.get_mut(id).create_edges(cells.iter().map(|&c| mv(c)));
    }

    fn visit(arena: &Arena, id: NodeId, v: f32) {
        let node = arena.get(id);
        node.increment_n_in_flight();
        node.finalize_score_update(v);
    }

    #[test]
    fn test_spawn_is_lazy_and_idempotent() {
        let tree = NodeTree::new(TicTacToe::new());
        let mut arena = write_arena(&tree.arena);
        extend_with_cells(&mut arena, NodeId(0), &[0, 1, 2]);
        assert_eq!(arena.len(), 1);

        let a = arena.get_or_spawn_child(NodeId(0), 1);
        let b = arena.get_or_spawn_child(NodeId(0), 1);
        assert_eq!(a, b);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a).parent(), NodeId(0));
        assert!(arena.get(NodeId(0)).child(0).is_none());
    }

    #[test]
    fn test_trim_keeps_chosen_subtree() {
        let mut tree = NodeTree::new(TicTacToe::new());
        {
            let mut arena = write_arena(&tree.arena);
            extend_with_cells(&mut arena, NodeId(0), &[0, 1]);
            let kept = arena.get_or_spawn_child(NodeId(0), 0);
            let dropped = arena.get_or_spawn_child(NodeId(0), 1);
            extend_with_cells(&mut arena, kept, &[1, 2]);
            let grandchild = arena.get_or_spawn_child(kept, 1);

            visit(&arena, NodeId(0), 0.0);
            visit(&arena, kept, 0.25);
            visit(&arena, kept, 0.75);
            visit(&arena, dropped, -1.0);
            visit(&arena, grandchild, 0.5);
        }

        tree.trim_tree_at_head(mv(0));

        let arena = tree.nodes();
        // Old root and the unchosen sibling are gone.
        assert_eq!(arena.len(), 2);
        let root = arena.get(tree.root_id());
        assert_eq!(root.n(), 2);
        assert!((root.q() - 0.5).abs() < 1e-6);
        assert!(root.parent().is_none());

        // Grandchild stats survive with remapped indices.
        let child = root.child(1);
        assert!(child.is_some());
        let child = arena.get(child);
        assert_eq!(child.n(), 1);
        assert!((child.q() - 0.5).abs() < 1e-6);
        assert_eq!(child.parent(), tree.root_id());
    }

    #[test]
    fn test_trim_unexplored_move_resets() {
        let mut tree = NodeTree::new(TicTacToe::new());
        {
            let mut arena = write_arena(&tree.arena);
            extend_with_cells(&mut arena, NodeId(0), &[0, 1]);
            visit(&arena, NodeId(0), 0.0);
        }

        // Edge 1 exists but was never spawned.
        tree.trim_tree_at_head(mv(1));
        let arena = tree.nodes();
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get(tree.root_id()).n(), 0);
        drop(arena);
        assert_eq!(tree.played_history().ply(), 1);
    }

    #[test]
    fn test_trim_advances_history() {
        let mut tree = NodeTree::new(TicTacToe::new());
        tree.trim_tree_at_head(mv(4));
        tree.trim_tree_at_head(mv(0));
        assert_eq!(tree.played_history().ply(), 2);
        assert_eq!(tree.played_history().last().cell(4), Some(xqzero_core::Color::Red));
    }
}
