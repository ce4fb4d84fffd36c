//! Incrementally maintained tree cost.
//!
//! With `N` distinct keys, leaf sizes `l`, `occupancy = Σl` and
//! `occupancy2 = Σl²`, the cost is `(Σl² / N²) · (Σl / N)`: the expected
//! leaf scan for a uniformly chosen key, scaled by how often keys are
//! duplicated across leaves.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TreeCost {
    /// Total leaf membership; a key reaching k leaves counts k times.
    pub occupancy: f64,
    /// Sum of squared leaf sizes.
    pub occupancy2: f64,
    pub non_empty_leaves: f64,
    pub cost: f64,
}

impl TreeCost {
    /// Cost of a tree holding `l` members in a single leaf.
    pub fn single_leaf(l: usize) -> Self {
        let fl = l as f64;
        TreeCost {
            occupancy: fl,
            occupancy2: fl * fl,
            non_empty_leaves: if l > 0 { 1.0 } else { 0.0 },
            cost: 0.0,
        }
    }

    pub fn compute_cost(&mut self, n_keys: usize) {
        if n_keys == 0 {
            self.cost = 0.0;
            return;
        }
        let n = n_keys as f64;
        self.cost = self.occupancy2 / (n * n) * (self.occupancy / n);
        if self.cost < 0.0 {
            panic!("negative cost {}", self.cost);
        }
    }

    /// One member added to (or removed from) a leaf that held `l` members.
    pub fn add_del_occupancy(&mut self, l: usize, is_del: bool, n_keys: usize) {
        let fl = l as f64;
        if is_del {
            // l² -> (l-1)² = l² - 2l + 1
            self.occupancy -= 1.0;
            self.occupancy2 += 1.0 - 2.0 * fl;
            if l == 1 {
                self.non_empty_leaves -= 1.0;
            }
        } else {
            if l == 0 {
                self.non_empty_leaves += 1.0;
            }
            // l² -> (l+1)² = l² + 2l + 1
            self.occupancy += 1.0;
            self.occupancy2 += 1.0 + 2.0 * fl;
        }
        self.compute_cost(n_keys);
    }

    /// Replace leaves of sizes `old` with leaves of sizes `new`.
    pub fn replace_leaves(&self, old: &[usize], new: &[usize], n_keys: usize) -> TreeCost {
        let mut c = *self;
        for &l in old {
            let fl = l as f64;
            c.occupancy -= fl;
            c.occupancy2 -= fl * fl;
            if l > 0 {
                c.non_empty_leaves -= 1.0;
            }
        }
        for &l in new {
            let fl = l as f64;
            c.occupancy += fl;
            c.occupancy2 += fl * fl;
            if l > 0 {
                c.non_empty_leaves += 1.0;
            }
        }
        c.compute_cost(n_keys);
        c
    }

    /// log2 of (members per non-empty leaf) / (ideal members per leaf).
    /// 0 for an empty tree.
    pub fn compute_q(&self, n_keys: usize, max_leaves: usize) -> f64 {
        if n_keys == 0 || self.non_empty_leaves == 0.0 {
            return 0.0;
        }
        let have = self.occupancy / self.non_empty_leaves;
        let max_leaves = max_leaves.min(n_keys);
        let ideal = n_keys as f64 / max_leaves as f64;
        (have / ideal).log2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_direct() {
        let mut c = TreeCost::default();
        // Leaf sizes 0 -> 1 -> 2 -> 3 -> 2.
        for l in 0..3 {
            c.add_del_occupancy(l, false, 3);
        }
        c.add_del_occupancy(3, true, 3);
        let mut d = TreeCost::single_leaf(2);
        d.compute_cost(3);
        assert_eq!(c, d);
    }

    #[test]
    fn balanced_split_lowers_cost() {
        let mut one = TreeCost::single_leaf(4);
        one.compute_cost(4);
        let two = one.replace_leaves(&[4], &[2, 2], 4);
        assert_eq!(one.cost, 1.0);
        assert_eq!(two.cost, 0.5);
        assert_eq!(two.non_empty_leaves, 2.0);

        // Duplicating every member into both children is a loss.
        let dup = one.replace_leaves(&[4], &[4, 4], 4);
        assert!(dup.cost > one.cost);
    }

    #[test]
    fn empty_tree_costs_nothing() {
        let mut c = TreeCost::default();
        c.compute_cost(0);
        assert_eq!(c.cost, 0.0);
    }

    #[test]
    fn q_is_zero_at_ideal_occupancy() {
        let mut c = TreeCost::single_leaf(8);
        c.compute_cost(8);
        let c = c.replace_leaves(&[8], &[4, 4], 8);
        assert_eq!(c.compute_q(8, 2), 0.0);
    }
}
