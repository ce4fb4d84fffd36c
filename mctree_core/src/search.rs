//! Local search: random split / join moves on the working tree with a
//! Metropolis acceptance rule.

use crate::constants::{STEP_MAX_TRIES, WORD_BITS};
use crate::helpers::{branch, child_key, is_masked};
use crate::member_set::MemberSet;
use crate::node::{Node, NodeKind};
use crate::types::NodeId;
use crate::{McTree, Tree};
use log::{debug, error, trace};
use metrics::counter;

impl McTree {
    /// One search iteration.  Returns true when it produced a tree of
    /// strictly lower cost, which then becomes the accepted tree.
    pub fn step(&mut self) -> bool {
        self.step_count += 1;

        let mut w = match self.trees.working.take() {
            Some(w) => w,
            None => {
                let b = self.trees.baseline;
                Tree { root: self.clone_tree(b.root), cost: b.cost, steps: 0 }
            }
        };

        // Never more leaves than distinct keys.
        let max_leaves = self.config.max_leaves.min(self.keys.len()) as f64;

        let mut accepted = false;
        for _ in 0..STEP_MAX_TRIES {
            let (leaf, parent) = self.random_leaf(w.root);
            if self.random.bit() != 0 {
                if let Some(p) = parent.filter(|&p| self.is_joinable(p)) {
                    accepted = self.join(&mut w, p);
                    break;
                }
            }
            if w.cost.non_empty_leaves + 1.0 <= max_leaves
                && self.leaf_len(leaf) >= self.config.min_pairs_for_split
            {
                match self.random_masked_bit(leaf) {
                    Some(bit) => {
                        accepted = self.split(&mut w, leaf, bit);
                        break;
                    }
                    None => {
                        self.stats.split.attempted += 1;
                        counter!("mctree_split_attempted_total").increment(1);
                    }
                }
            }
        }

        w.steps += 1;
        let improved = accepted && w.cost.cost < self.trees.baseline.cost.cost;
        if improved {
            let old = std::mem::replace(&mut self.trees.baseline, Tree { steps: 0, ..w });
            self.free_tree(old.root);
            self.sequence += 1;
            self.stats.promotions += 1;
            counter!("mctree_promotions_total").increment(1);
            debug!(
                "[STEP] promoted sequence={} cost={:e} leaves={}",
                self.sequence, w.cost.cost, w.cost.non_empty_leaves
            );
        } else if self.config.restart_after_steps > 0 && w.steps > self.config.restart_after_steps {
            self.free_tree(w.root);
            self.stats.restarts += 1;
            counter!("mctree_restarts_total").increment(1);
            debug!("[STEP] restart after {} steps without improvement", w.steps);
        } else {
            self.trees.working = Some(w);
        }

        let every = self.config.validate_interval;
        if every > 0 && self.step_count % every == 0 {
            if let Err(e) = self.validate() {
                error!("[STEP] validation failed at step {}: {e}", self.step_count);
                panic!("mctree invariant violated: {e}");
            }
        }
        improved
    }

    /// Metropolis criterion for a move that does not lower cost.
    fn accept_cost_change(&mut self, dcost: f64) -> bool {
        let t = self.config.temperature;
        if t <= 0.0 {
            return false;
        }
        self.random.unit() < (-dcost / t).exp()
    }

    /// Random descent to a leaf; also returns the leaf's parent.
    fn random_leaf(&mut self, root: NodeId) -> (NodeId, Option<NodeId>) {
        let mut id = root;
        let mut parent = None;
        while let NodeKind::Split { children, .. } = self.nodes.get(id).kind {
            parent = Some(id);
            id = children[self.random.bit()];
        }
        (id, parent)
    }

    fn is_joinable(&self, parent: NodeId) -> bool {
        self.nodes
            .get(parent)
            .children()
            .is_some_and(|c| c.iter().all(|&n| !self.nodes.get(n).is_split()))
    }

    /// A bit that a random member of the leaf fixes but the leaf's key does
    /// not.  Such a bit separates at least that member.
    fn random_masked_bit(&mut self, leaf: NodeId) -> Option<u32> {
        let node = self.nodes.get(leaf);
        let h = self.sets.get(node.set()?).random_member(&mut self.random)?;
        let key = self.keys.resolve(h);

        let free: Vec<u32> = key.iter().zip(node.key.iter()).map(|(p, n)| p.mask & !n.mask).collect();
        let total: u32 = free.iter().map(|m| m.count_ones()).sum();
        if total == 0 {
            return None;
        }
        let mut pick = self.random.below(total as usize) as u32;
        for (w, &m) in free.iter().enumerate() {
            let n = m.count_ones();
            if pick >= n {
                pick -= n;
                continue;
            }
            let mut m = m;
            for _ in 0..pick {
                m &= m - 1;
            }
            return Some(w as u32 * WORD_BITS + m.trailing_zeros());
        }
        None
    }

    /// Try splitting `leaf` on `bit`.  On acceptance the leaf becomes a split
    /// node with two fresh leaf children.
    pub(crate) fn split(&mut self, w: &mut Tree, leaf: NodeId, bit: u32) -> bool {
        self.stats.split.attempted += 1;
        counter!("mctree_split_attempted_total").increment(1);

        let Some(set) = self.nodes.get(leaf).set() else {
            return false;
        };
        let mut sides = [self.sets.take_buffer(), self.sets.take_buffer()];
        for h in self.sets.get(set).iter() {
            let go = branch(self.keys.resolve(h), bit);
            for side in 0..2 {
                if go[side] {
                    sides[side].push(h);
                }
            }
        }

        let l = self.sets.get(set).len();
        let (l0, l1) = (sides[0].len(), sides[1].len());
        let candidate = w.cost.replace_leaves(&[l], &[l0, l1], self.keys.len());
        let dcost = candidate.cost - w.cost.cost;

        let mut accept = dcost < 0.0;
        if accept {
            self.stats.split.advanced += 1;
        } else if l0 > 0 && l1 > 0 {
            accept = self.accept_cost_change(dcost);
        }
        if !accept {
            let [s0, s1] = sides;
            self.sets.return_buffer(s0);
            self.sets.return_buffer(s1);
            return false;
        }

        self.stats.split.accepted += 1;
        counter!("mctree_split_accepted_total").increment(1);
        if cfg!(feature = "trace") {
            trace!("[SPLIT] node={} bit={} {} -> {}/{} dcost={:e}", leaf.index(), bit, l, l0, l1, dcost);
        }

        let parent_key = self.nodes.get(leaf).key.clone();
        let mut children = [leaf; 2];
        for (side, buf) in sides.into_iter().enumerate() {
            let kind = if buf.is_empty() {
                self.sets.return_buffer(buf);
                NodeKind::Leaf(None)
            } else {
                NodeKind::Leaf(Some(self.sets.allocate(MemberSet::from_vec(buf))))
            };
            children[side] = self.nodes.alloc(Node { key: child_key(&parent_key, bit, side), kind });
        }
        self.sets.release(set);
        self.nodes.get_mut(leaf).kind = NodeKind::Split { bit, children };
        w.cost = candidate;
        true
    }

    /// Try merging the two leaf children of `parent` back into one leaf.
    pub(crate) fn join(&mut self, w: &mut Tree, parent: NodeId) -> bool {
        self.stats.join.attempted += 1;
        counter!("mctree_join_attempted_total").increment(1);

        let NodeKind::Split { bit, children } = self.nodes.get(parent).kind else {
            return false;
        };
        let [s0, s1] = children.map(|c| match self.nodes.get(c).kind {
            NodeKind::Leaf(set) => set,
            NodeKind::Split { .. } => panic!("join split node {}", c.index()),
        });

        // Members not fixing `bit` sit in both children; take them from child 0 only.
        let mut merged = self.sets.take_buffer();
        if let Some(s) = s0 {
            merged.extend(self.sets.get(s).iter());
        }
        if let Some(s) = s1 {
            merged.extend(
                self.sets
                    .get(s)
                    .iter()
                    .filter(|&h| is_masked(self.keys.resolve(h), bit)),
            );
        }

        let (l0, l1, l) = (self.leaf_len(children[0]), self.leaf_len(children[1]), merged.len());
        let candidate = w.cost.replace_leaves(&[l0, l1], &[l], self.keys.len());
        let dcost = candidate.cost - w.cost.cost;

        let mut accept = dcost < 0.0;
        if accept {
            self.stats.join.advanced += 1;
        } else {
            accept = self.accept_cost_change(dcost);
        }
        if !accept {
            self.sets.return_buffer(merged);
            return false;
        }

        self.stats.join.accepted += 1;
        counter!("mctree_join_accepted_total").increment(1);
        if cfg!(feature = "trace") {
            trace!("[JOIN] node={} bit={} {}/{} -> {} dcost={:e}", parent.index(), bit, l0, l1, l, dcost);
        }

        self.free_tree(children[0]);
        self.free_tree(children[1]);
        let kind = if merged.is_empty() {
            self.sets.return_buffer(merged);
            NodeKind::Leaf(None)
        } else {
            NodeKind::Leaf(Some(self.sets.allocate(MemberSet::from_vec(merged))))
        };
        self.nodes.get_mut(parent).kind = kind;
        w.cost = candidate;
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{Key, Pair};
    use crate::{Config, McTree};

    fn tree(max_leaves: usize, min_pairs: usize, seed: u64) -> McTree {
        McTree::new(Config {
            max_leaves,
            min_pairs_for_split: min_pairs,
            validate_interval: 1,
            seed: Some(seed),
            ..Config::default()
        })
        .unwrap()
    }

    fn sorted(mut v: Vec<Key>) -> Vec<Key> {
        v.sort();
        v
    }

    #[test]
    fn four_keys_settle_within_the_leaf_cap() {
        let mut t = tree(4, 2, 11);
        for v in [0b0001, 0b0010, 0b0100, 0b1000] {
            t.add(&[Pair::exact(v)]).unwrap();
        }
        let mut last = t.cost().cost;
        for _ in 0..200 {
            if t.step() {
                let now = t.cost().cost;
                assert!(now < last, "{now} !< {last}");
                last = now;
            }
        }
        assert!(t.cost().non_empty_leaves <= 4.0);
        assert!(t.sequence() > 0);
        assert!(t.cost().cost < 1.0);
        t.validate().unwrap();
    }

    #[test]
    fn wildcard_key_reaches_every_leaf() {
        let mut t = tree(16, 2, 3);
        for v in 0..8u32 {
            t.add(&[Pair::exact(v << 4)]).unwrap();
        }
        t.add(&[Pair::wildcard()]).unwrap();
        for _ in 0..300 {
            t.step();
        }
        let leaves = t.leaf_members();
        assert!(leaves.len() > 1, "no split was accepted");
        let wildcard: Key = vec![Pair::wildcard()].into();
        for (_, members) in leaves {
            assert!(members.contains(&wildcard));
        }
    }

    #[test]
    fn join_then_split_restores_children() {
        let mut t = tree(16, 1, 5);
        let keys = [
            Pair::exact(0b000),
            Pair::exact(0b001),
            Pair::new(0b110, 0b010),
            Pair::new(0b010, 0b000),
            Pair::wildcard(),
        ];
        for p in keys {
            t.add(&[p]).unwrap();
        }

        // Hot enough that every move is accepted.
        t.config.temperature = 1e9;
        let mut w = t.trees.baseline;
        let root = w.root;
        while !t.split(&mut w, root, 0) {}
        t.trees.baseline = w;
        let before = sorted_children(&t);
        assert_eq!(before.len(), 2);

        let mut w = t.trees.baseline;
        while !t.join(&mut w, root) {}
        while !t.split(&mut w, root, 0) {}
        t.trees.baseline = w;
        assert_eq!(sorted_children(&t), before);
        t.validate().unwrap();
    }

    fn sorted_children(t: &McTree) -> Vec<Vec<Key>> {
        t.leaf_members().into_iter().map(|(_, m)| sorted(m)).collect()
    }

    #[test]
    fn restart_discards_working_tree() {
        let mut t = McTree::new(Config {
            restart_after_steps: 1,
            seed: Some(9),
            ..Config::default()
        })
        .unwrap();
        // A single key admits no improving move.
        t.add(&[Pair::exact(7)]).unwrap();
        t.step();
        assert!(t.has_working_tree());
        t.step();
        assert!(!t.has_working_tree());
        assert_eq!(t.search_stats().restarts, 1);
        t.validate().unwrap();
    }

    #[test]
    fn membership_change_cancels_search() {
        let mut t = tree(16, 1, 2);
        t.add(&[Pair::exact(1)]).unwrap();
        t.add(&[Pair::exact(2)]).unwrap();
        t.step();
        if t.has_working_tree() {
            t.add(&[Pair::exact(3)]).unwrap();
            assert!(!t.has_working_tree());
        }
        t.validate().unwrap();
    }
}
