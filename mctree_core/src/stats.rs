//! Search counters, per-level tree statistics and the printable report

use crate::constants::HISTOGRAM_BUCKETS;
use crate::node::NodeKind;
use crate::types::{KeyDisplay, NodeId};
use crate::McTree;
use std::fmt::{self, Write as _};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveStats {
    pub attempted: u64,
    /// Accepted for any reason.
    pub accepted: u64,
    /// Accepted because the move lowered cost.
    pub advanced: u64,
}

impl fmt::Display for MoveStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted {} accepted {} advanced {}",
            self.attempted, self.accepted, self.advanced
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub split: MoveStats,
    pub join: MoveStats,
    pub restarts: u64,
    pub promotions: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub leaves: usize,
    pub members: usize,
    pub min_members: usize,
    pub max_members: usize,
}

/// Non-empty leaves grouped by depth, plus a log2 histogram of leaf sizes.
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    pub levels: Vec<LevelStats>,
    pub histogram: [u32; HISTOGRAM_BUCKETS],
}

impl TreeStats {
    fn count(&mut self, depth: usize, members: usize) {
        if members == 0 {
            return;
        }
        if self.levels.len() <= depth {
            self.levels.resize(depth + 1, LevelStats::default());
        }
        let v = &mut self.levels[depth];
        v.leaves += 1;
        v.members += members;
        v.max_members = v.max_members.max(members);
        if v.min_members == 0 || members < v.min_members {
            v.min_members = members;
        }
        // Bucket i holds sizes in (2^(i-1), 2^i].
        let bucket = (usize::BITS - (members - 1).leading_zeros()) as usize;
        self.histogram[bucket.min(HISTOGRAM_BUCKETS - 1)] += 1;
    }
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (l, v) in self.levels.iter().enumerate() {
            if v.leaves > 0 {
                writeln!(
                    f,
                    "level {:2}: {:6} leafs {:6} pairs ave/min/max {:.2}/{}/{}",
                    l,
                    v.leaves,
                    v.members,
                    v.members as f64 / v.leaves as f64,
                    v.min_members,
                    v.max_members
                )?;
            }
        }

        let sum: u32 = self.histogram.iter().sum();
        let mut running = 0u32;
        for i in (0..HISTOGRAM_BUCKETS).rev() {
            let h = self.histogram[i];
            if h == 0 {
                continue;
            }
            running += h;
            let n_max = 1u64 << i;
            writeln!(
                f,
                "  leafs with {:3} < pairs <= {:3}: {:4} {:.2} {:.2}",
                n_max / 2,
                n_max,
                h,
                h as f64 / sum as f64,
                running as f64 / sum as f64
            )?;
        }
        Ok(())
    }
}

/// `num / den`, or 0 for an empty tree.
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

impl McTree {
    /// Level and size statistics of the accepted tree.
    pub fn tree_stats(&self) -> TreeStats {
        let mut ts = TreeStats::default();
        let mut stack: Vec<(NodeId, usize)> = vec![(self.trees.baseline.root, 0)];
        while let Some((id, depth)) = stack.pop() {
            match self.nodes.get(id).kind {
                NodeKind::Split { children, .. } => {
                    stack.push((children[1], depth + 1));
                    stack.push((children[0], depth + 1));
                }
                NodeKind::Leaf(_) => ts.count(depth, self.leaf_len(id)),
            }
        }
        ts
    }

    /// Multi-line report on the accepted tree and the search so far.
    pub fn print_stats(&self) -> String {
        let c = &self.trees.baseline.cost;
        let n_keys = self.keys.len() as f64;
        let mut s = String::new();
        let _ = writeln!(
            s,
            "tree sequence {} cost {:e} leafs {} per leaf {:.3} q {:.3} occupancy {:.3} keys {} member sets {}",
            self.sequence,
            c.cost,
            c.non_empty_leaves,
            ratio(c.occupancy, c.non_empty_leaves),
            self.compute_q(),
            ratio(c.occupancy, n_keys),
            self.keys.len(),
            self.sets.live(),
        );
        let _ = writeln!(
            s,
            "  join {} | split {} | restarts {} promotions {}",
            self.stats.join, self.stats.split, self.stats.restarts, self.stats.promotions
        );
        let _ = write!(s, "{}", self.tree_stats());
        s
    }

    /// Every non-empty leaf as `[depth] key size`, sorted by key.
    pub fn dump(&self) -> String {
        let mut leaves = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = vec![(self.trees.baseline.root, 0)];
        while let Some((id, depth)) = stack.pop() {
            let node = self.nodes.get(id);
            match node.kind {
                NodeKind::Split { children, .. } => {
                    stack.push((children[1], depth + 1));
                    stack.push((children[0], depth + 1));
                }
                NodeKind::Leaf(_) => {
                    let n = self.leaf_len(id);
                    if n > 0 {
                        leaves.push((node.key.clone(), depth, n));
                    }
                }
            }
        }
        leaves.sort_by(|a, b| a.0.iter().map(|p| p.value).cmp(b.0.iter().map(|p| p.value)));

        let mut s = String::new();
        for (key, depth, n) in leaves {
            let _ = writeln!(s, "[{}] {} {} pairs", depth, KeyDisplay(&key), n);
        }
        s
    }
}
