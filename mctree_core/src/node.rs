//! Tree nodes and their pool

use crate::types::{Key, NodeId, SetId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    /// Member set, `None` while the leaf is empty.
    Leaf(Option<SetId>),
    /// Children for the split bit fixed to 0 and to 1.
    Split { bit: u32, children: [NodeId; 2] },
}

#[derive(Debug, Clone)]
pub struct Node {
    /// Accumulated constraint: every key below this node agrees with it
    /// wherever both are masked.
    pub key: Key,
    pub kind: NodeKind,
}

impl Node {
    #[inline]
    pub fn is_split(&self) -> bool {
        matches!(self.kind, NodeKind::Split { .. })
    }

    #[inline]
    pub fn children(&self) -> Option<[NodeId; 2]> {
        match self.kind {
            NodeKind::Split { children, .. } => Some(children),
            NodeKind::Leaf(_) => None,
        }
    }

    #[inline]
    pub fn set(&self) -> Option<SetId> {
        match self.kind {
            NodeKind::Leaf(set) => set,
            NodeKind::Split { .. } => None,
        }
    }
}

#[derive(Debug)]
struct NodeSlot {
    node: Option<Node>,
    generation: u32,
}

#[derive(Debug, Default)]
pub struct NodePool {
    slots: Vec<NodeSlot>,
    free: Vec<u32>,
    live: usize,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.live += 1;
        match self.free.pop() {
            Some(i) => {
                let s = &mut self.slots[i as usize];
                s.node = Some(node);
                NodeId::new(i, s.generation)
            }
            None => {
                let i = self.slots.len() as u32;
                self.slots.push(NodeSlot { node: Some(node), generation: 0 });
                NodeId::new(i, 0)
            }
        }
    }

    /// Returns the freed node so the caller can release what it holds.
    pub fn free(&mut self, id: NodeId) -> Node {
        let s = self.slot_mut(id);
        let node = s.node.take().expect("slot checked live");
        s.generation = s.generation.wrapping_add(1);
        self.free.push(id.index());
        self.live -= 1;
        node
    }

    #[inline]
    fn slot_mut(&mut self, id: NodeId) -> &mut NodeSlot {
        match self.slots.get_mut(id.index() as usize) {
            Some(s) if s.node.is_some() && s.generation == id.generation() => s,
            _ => panic!("stale node handle {}", id.index()),
        }
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        match self.slots.get(id.index() as usize) {
            Some(NodeSlot { node: Some(n), generation }) if *generation == id.generation() => n,
            _ => panic!("stale node handle {}", id.index()),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.slot_mut(id).node.as_mut().expect("slot checked live")
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|s| s.node.is_some() && s.generation == id.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pair;

    fn leaf() -> Node {
        Node { key: vec![Pair::wildcard()].into(), kind: NodeKind::Leaf(None) }
    }

    #[test]
    fn alloc_free_reuse_with_new_generation() {
        let mut p = NodePool::new();
        let a = p.alloc(leaf());
        let b = p.alloc(leaf());
        assert_eq!(p.live(), 2);
        p.free(a);
        assert!(!p.is_live(a));
        let c = p.alloc(leaf());
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert!(p.is_live(b) && p.is_live(c));
        assert_eq!(p.live(), 2);
    }

    #[test]
    #[should_panic(expected = "stale node handle")]
    fn freed_handle_panics() {
        let mut p = NodePool::new();
        let a = p.alloc(leaf());
        p.free(a);
        p.get(a);
    }
}
