pub mod config;
pub mod constants;
pub mod cost;
pub mod errors;
pub mod handle_registry;
pub mod helpers;
pub mod key_store;
pub mod member_pool;
pub mod member_set;
pub mod node;
pub mod persist;
pub mod random;
pub mod search;
pub mod stats;
pub mod telemetry;
pub mod types;
pub mod validate;

pub use crate::config::Config;
pub use crate::cost::TreeCost;
pub use crate::errors::{Error, InvariantViolation};
pub use crate::persist::Topology;
pub use crate::stats::{MoveStats, SearchStats, TreeStats};
pub use crate::types::{Key, KeyHandle, Pair, Word};

use crate::constants::WORD_BITS;
use crate::helpers::branch;
use crate::key_store::KeyStore;
use crate::member_pool::MemberPool;
use crate::member_set::MemberSet;
use crate::node::{Node, NodeKind, NodePool};
use crate::random::RandomSource;
use crate::types::{NodeId, SetId};
use log::{info, warn};
use metrics::{counter, gauge};
use once_cell::sync::OnceCell;

/// One generation of the tree: a root plus its incrementally kept cost.
#[derive(Debug, Clone, Copy)]
pub struct Tree {
    pub root: NodeId,
    pub cost: TreeCost,
    /// Search steps taken on this tree since it was cloned.
    pub steps: u64,
}

/// The accepted tree, and the candidate under search if one exists.
#[derive(Debug)]
pub struct Trees {
    pub baseline: Tree,
    pub working: Option<Tree>,
}

/// Masked-key classification tree.
///
/// `add` / `delete` edit the baseline tree.  `step` runs one local-search
/// move on a copy-on-write clone of it and promotes the clone once its cost
/// is strictly lower.  Not thread-safe; callers serialize access.
pub struct McTree {
    config: Config,
    n_words: usize,
    nodes: NodePool,
    keys: KeyStore,
    sets: MemberPool,
    trees: Trees,
    random: RandomSource,
    stats: SearchStats,
    // Bumped on every promotion.
    sequence: u64,
    step_count: u64,
}

impl McTree {
    // ---- logging -------------------------------------------------------------
    fn ensure_logging() {
        static INIT: OnceCell<()> = OnceCell::new();
        INIT.get_or_init(|| {
            // A host that installed its own logger wins.
            let _ = env_logger::builder()
                .format_timestamp(None)
                .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
                .try_init();
        });
    }

    /// Empty tree: a single empty root leaf.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::ensure_logging();
        config.check()?;

        let n_words = config.words_per_key();
        let mut nodes = NodePool::new();
        let root = nodes.alloc(Node {
            key: vec![Pair::wildcard(); n_words].into(),
            kind: NodeKind::Leaf(None),
        });
        info!(
            "[NEW] key_bits={} max_leaves={} min_pairs_for_split={} temperature={:e}",
            config.key_bits, config.max_leaves, config.min_pairs_for_split, config.temperature
        );
        Ok(Self {
            random: RandomSource::new(config.seed),
            keys: KeyStore::new(n_words),
            config,
            n_words,
            nodes,
            sets: MemberPool::new(),
            trees: Trees {
                baseline: Tree { root, cost: TreeCost::default(), steps: 0 },
                working: None,
            },
            stats: SearchStats::default(),
            sequence: 0,
            step_count: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Distinct live keys.
    #[inline]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Cost of the accepted tree.
    #[inline]
    pub fn cost(&self) -> TreeCost {
        self.trees.baseline.cost
    }

    /// Number of promotions so far.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn search_stats(&self) -> SearchStats {
        self.stats
    }

    #[inline]
    pub fn has_working_tree(&self) -> bool {
        self.trees.working.is_some()
    }

    pub fn compute_q(&self) -> f64 {
        self.trees
            .baseline
            .cost
            .compute_q(self.keys.len(), self.config.max_leaves)
    }

    /// How many times `key` is currently added (0 if absent).
    pub fn key_refs(&self, key: &[Pair]) -> u32 {
        self.keys.get(key).map_or(0, |h| self.keys.refs(h))
    }

    fn check_key(&self, key: &[Pair]) -> Result<(), Error> {
        if key.len() != self.n_words {
            return Err(Error::WrongKeyLength { got: key.len(), want: self.n_words });
        }
        let tail = self.config.key_bits % WORD_BITS;
        for (i, p) in key.iter().enumerate() {
            let beyond = i + 1 == self.n_words && tail != 0 && p.mask >> tail != 0;
            if !p.is_canonical() || beyond {
                return Err(Error::InvalidPair { index: i });
            }
        }
        Ok(())
    }

    /// Adds one reference to `key`.  Returns true when the key is new, in
    /// which case it is routed into every baseline leaf it reaches.
    pub fn add(&mut self, key: &[Pair]) -> Result<bool, Error> {
        self.add_del(key, false)
    }

    /// Drops one reference to `key`.  Returns true when that was the last
    /// one and the key left the tree.
    pub fn delete(&mut self, key: &[Pair]) -> Result<bool, Error> {
        self.add_del(key, true)
    }

    pub fn add_del(&mut self, key: &[Pair], is_del: bool) -> Result<bool, Error> {
        if let Err(e) = self.check_key(key) {
            warn!("[ADD_DEL] rejected key: {e}");
            return Err(e);
        }
        // Search state never straddles a membership change.
        self.cancel_working();

        let root = self.trees.baseline.root;
        let changed = if is_del {
            let Some(h) = self.keys.get(key) else {
                warn!("[ADD_DEL] delete of unknown key");
                return Err(Error::KeyNotFound);
            };
            let last = self.keys.refs(h) == 1;
            if last {
                self.add_del_member(root, key, h, true);
            }
            self.keys.remove(key)?;
            counter!("mctree_keys_deleted_total").increment(1);
            last
        } else {
            let (h, existed) = self.keys.intern(key);
            if !existed {
                self.add_del_member(root, key, h, false);
            }
            counter!("mctree_keys_added_total").increment(1);
            !existed
        };

        self.trees.baseline.cost.compute_cost(self.keys.len());
        Ok(changed)
    }

    fn add_del_member(&mut self, id: NodeId, key: &[Pair], h: KeyHandle, is_del: bool) {
        match self.nodes.get(id).kind {
            NodeKind::Split { bit, children } => {
                let go = branch(key, bit);
                for side in 0..2 {
                    if go[side] {
                        self.add_del_member(children[side], key, h, is_del);
                    }
                }
            }
            NodeKind::Leaf(set) => self.add_del_leaf(id, set, h, is_del),
        }
    }

    fn add_del_leaf(&mut self, id: NodeId, set: Option<SetId>, h: KeyHandle, is_del: bool) {
        let set = match set {
            Some(s) => self.sets.make_unique(s),
            None if is_del => panic!("key handle {} missing from empty leaf {}", h.0, id.index()),
            None => {
                let buf = self.sets.take_buffer();
                self.sets.allocate(MemberSet::from_vec(buf))
            }
        };

        let members = self.sets.get_mut(set);
        let l = members.len();
        let done = if is_del { members.remove(h) } else { members.insert(h) };
        if !done {
            panic!(
                "key handle {} {} leaf {}",
                h.0,
                if is_del { "missing from" } else { "already in" },
                id.index()
            );
        }

        let kind = if members.is_empty() {
            self.sets.release(set);
            NodeKind::Leaf(None)
        } else {
            NodeKind::Leaf(Some(set))
        };
        self.nodes.get_mut(id).kind = kind;
        self.trees
            .baseline
            .cost
            .add_del_occupancy(l, is_del, self.keys.len());
    }

    /// Discard the working tree, if any.
    pub(crate) fn cancel_working(&mut self) {
        if let Some(w) = self.trees.working.take() {
            self.free_tree(w.root);
        }
    }

    pub(crate) fn free_tree(&mut self, id: NodeId) {
        let node = self.nodes.free(id);
        match node.kind {
            NodeKind::Split { children, .. } => {
                self.free_tree(children[0]);
                self.free_tree(children[1]);
            }
            NodeKind::Leaf(Some(set)) => {
                self.sets.release(set);
            }
            NodeKind::Leaf(None) => {}
        }
    }

    /// Copies node topology; leaf sets are shared, not copied.
    pub(crate) fn clone_tree(&mut self, id: NodeId) -> NodeId {
        let mut node = self.nodes.get(id).clone();
        match node.kind {
            NodeKind::Split { bit, children } => {
                let c0 = self.clone_tree(children[0]);
                let c1 = self.clone_tree(children[1]);
                node.kind = NodeKind::Split { bit, children: [c0, c1] };
            }
            NodeKind::Leaf(Some(set)) => self.sets.add_reference(set),
            NodeKind::Leaf(None) => {}
        }
        self.nodes.alloc(node)
    }

    #[inline]
    pub(crate) fn leaf_len(&self, id: NodeId) -> usize {
        self.nodes.get(id).set().map_or(0, |s| self.sets.get(s).len())
    }

    /// Leaves of the accepted tree in pre-order: accumulated key and member keys.
    pub fn leaf_members(&self) -> Vec<(Key, Vec<Key>)> {
        let mut out = Vec::new();
        let mut stack = vec![self.trees.baseline.root];
        while let Some(id) = stack.pop() {
            let node = self.nodes.get(id);
            match node.kind {
                NodeKind::Split { children, .. } => {
                    stack.push(children[1]);
                    stack.push(children[0]);
                }
                NodeKind::Leaf(set) => {
                    let members: Vec<Key> = set
                        .map(|s| {
                            self.sets
                                .get(s)
                                .iter()
                                .map(|h| Key::from(self.keys.resolve(h)))
                                .collect()
                        })
                        .unwrap_or_default();
                    out.push((node.key.clone(), members));
                }
            }
        }
        out
    }

    /// Split bits of the accepted tree in pre-order.
    pub fn split_bits(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut stack = vec![self.trees.baseline.root];
        while let Some(id) = stack.pop() {
            if let NodeKind::Split { bit, children } = self.nodes.get(id).kind {
                out.push(bit);
                stack.push(children[1]);
                stack.push(children[0]);
            }
        }
        out
    }

    /// Emit gauges (caller decides cadence).
    pub fn report_metrics(&self) {
        let c = &self.trees.baseline.cost;
        gauge!("mctree_cost").set(c.cost);
        gauge!("mctree_leaves").set(c.non_empty_leaves);
        gauge!("mctree_keys").set(self.keys.len() as f64);
    }
}

// Public module for C API functions
pub mod public_api;

// Re-export all public API functions at the crate root
pub use public_api::*;
