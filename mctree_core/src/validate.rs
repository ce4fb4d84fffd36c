//! Full consistency check of both tree generations.

use crate::cost::TreeCost;
use crate::errors::InvariantViolation;
use crate::helpers::{branch, child_key, is_masked, is_under};
use crate::node::NodeKind;
use crate::types::{Key, KeyDisplay, KeyHandle, NodeId, Pair, SetId};
use crate::{McTree, Tree};
use hashbrown::{HashMap, HashSet};
use log::debug;

#[derive(Default)]
struct Walk {
    nodes: HashSet<NodeId>,
    set_refs: HashMap<SetId, u32>,
}

impl McTree {
    /// Checks node keys, leaf membership, incremental cost, member-set
    /// reference counts, pool accounting and the key store.  Any error means
    /// the structure is corrupt.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut walk = Walk::default();
        self.validate_tree(&self.trees.baseline, &mut walk)?;
        if let Some(w) = &self.trees.working {
            self.validate_tree(w, &mut walk)?;
        }

        if walk.nodes.len() != self.nodes.live() {
            return Err(InvariantViolation::NodeLeak {
                pool: self.nodes.live(),
                reachable: walk.nodes.len(),
            });
        }
        for (&id, &referenced) in &walk.set_refs {
            let stored = self.sets.refs(id);
            if stored != referenced {
                return Err(InvariantViolation::RefCount { index: id.index(), stored, referenced });
            }
        }
        if walk.set_refs.len() != self.sets.live() {
            return Err(InvariantViolation::SetLeak {
                pool: self.sets.live(),
                referenced: walk.set_refs.len(),
            });
        }
        self.keys.check().map_err(InvariantViolation::KeyStore)?;

        debug!(
            "[VALIDATE] ok: {} nodes, {} member sets, {} keys",
            walk.nodes.len(),
            walk.set_refs.len(),
            self.keys.len()
        );
        Ok(())
    }

    fn validate_tree(&self, tree: &Tree, walk: &mut Walk) -> Result<(), InvariantViolation> {
        let root_key: Key = vec![Pair::wildcard(); self.n_words].into();
        let mut actual = TreeCost::default();
        self.validate_node(tree.root, &root_key, walk, &mut actual)?;
        actual.compute_cost(self.keys.len());

        let tracked = tree.cost;
        let fields = [
            ("occupancy", tracked.occupancy, actual.occupancy),
            ("occupancy2", tracked.occupancy2, actual.occupancy2),
            ("non-empty leaves", tracked.non_empty_leaves, actual.non_empty_leaves),
            ("cost", tracked.cost, actual.cost),
        ];
        for (what, tracked, actual) in fields {
            if tracked != actual {
                return Err(InvariantViolation::Cost { what, tracked, actual });
            }
        }

        for h in self.keys.handles() {
            self.validate_routing(tree.root, h)?;
        }
        Ok(())
    }

    fn validate_node(
        &self,
        id: NodeId,
        want: &[Pair],
        walk: &mut Walk,
        cost: &mut TreeCost,
    ) -> Result<(), InvariantViolation> {
        if !self.nodes.is_live(id) {
            return Err(InvariantViolation::DeadNode { index: id.index() });
        }
        if !walk.nodes.insert(id) {
            return Err(InvariantViolation::SharedNode { index: id.index() });
        }
        let node = self.nodes.get(id);
        if *node.key != *want {
            return Err(InvariantViolation::NodeKey {
                index: id.index(),
                got: KeyDisplay(&node.key).to_string(),
                want: KeyDisplay(want).to_string(),
            });
        }

        match node.kind {
            NodeKind::Split { bit, children } => {
                if bit >= self.config.key_bits || is_masked(want, bit) {
                    return Err(InvariantViolation::RepeatedSplitBit { index: id.index(), bit });
                }
                for (side, &c) in children.iter().enumerate() {
                    self.validate_node(c, &child_key(want, bit, side), walk, cost)?;
                }
            }
            NodeKind::Leaf(None) => {}
            NodeKind::Leaf(Some(set)) => {
                if !self.sets.is_live(set) {
                    return Err(InvariantViolation::DeadSet { index: set.index() });
                }
                *walk.set_refs.entry(set).or_insert(0) += 1;

                let members = self.sets.get(set);
                let mut seen = HashSet::with_capacity(members.len());
                for h in members.iter() {
                    let (node, handle) = (id.index(), h.0);
                    if !self.keys.is_live(h) {
                        return Err(InvariantViolation::DeadKey { node, handle });
                    }
                    if !seen.insert(h) {
                        return Err(InvariantViolation::DuplicateMember { node, handle });
                    }
                    if !is_under(self.keys.resolve(h), want) {
                        return Err(InvariantViolation::WrongLeaf { node, handle });
                    }
                }
                let l = members.len() as f64;
                cost.occupancy += l;
                cost.occupancy2 += l * l;
                if l > 0.0 {
                    cost.non_empty_leaves += 1.0;
                }
            }
        }
        Ok(())
    }

    /// Every leaf `h` routes to must list it.
    fn validate_routing(&self, id: NodeId, h: KeyHandle) -> Result<(), InvariantViolation> {
        match self.nodes.get(id).kind {
            NodeKind::Split { bit, children } => {
                let go = branch(self.keys.resolve(h), bit);
                for side in 0..2 {
                    if go[side] {
                        self.validate_routing(children[side], h)?;
                    }
                }
                Ok(())
            }
            NodeKind::Leaf(set) => {
                if set.is_some_and(|s| self.sets.get(s).contains(h)) {
                    Ok(())
                } else {
                    Err(InvariantViolation::MissingMember { node: id.index(), handle: h.0 })
                }
            }
        }
    }
}
