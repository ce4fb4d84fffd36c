//! Topology save / restore.
//!
//! Only the shape of the accepted tree is written: a pre-order bitset with a
//! 1 for each split node, then the split bits in the same order.  Leaf
//! membership is rebuilt by re-adding keys after `restore`.
//!
//! ```text
//! u64  magic            "MCTREETP"
//! u16  version
//! u32  key_bits
//! u32  node count
//! u32  split count
//! [u8] ceil(nodes / 8)  bit i set = node i (pre-order) is a split
//! [u32] split bits      pre-order
//! ```
//! All integers little-endian.

use crate::constants::{TOPOLOGY_MAGIC, TOPOLOGY_VERSION};
use crate::cost::TreeCost;
use crate::errors::Error;
use crate::helpers::{child_key, is_masked};
use crate::node::{Node, NodeKind};
use crate::types::{NodeId, Pair};
use crate::{McTree, Tree};
use log::{info, warn};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Pre-order shape of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Topology {
    pub key_bits: u32,
    /// One entry per node.
    pub is_split: Vec<bool>,
    /// One entry per split node.
    pub split_bits: Vec<u32>,
}

impl Topology {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(&TOPOLOGY_MAGIC.to_le_bytes())?;
        w.write_all(&TOPOLOGY_VERSION.to_le_bytes())?;
        w.write_all(&self.key_bits.to_le_bytes())?;
        w.write_all(&(self.is_split.len() as u32).to_le_bytes())?;
        w.write_all(&(self.split_bits.len() as u32).to_le_bytes())?;

        let mut bitset = vec![0u8; self.is_split.len().div_ceil(8)];
        for (i, _) in self.is_split.iter().enumerate().filter(|&(_, &s)| s) {
            bitset[i / 8] |= 1 << (i % 8);
        }
        w.write_all(&bitset)?;
        for b in &self.split_bits {
            w.write_all(&b.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let magic = u64::from_le_bytes(read_array(r)?);
        if magic != TOPOLOGY_MAGIC {
            return Err(Error::TopologyFormat(format!("bad magic {magic:#018x}")));
        }
        let version = u16::from_le_bytes(read_array(r)?);
        if version != TOPOLOGY_VERSION {
            return Err(Error::TopologyFormat(format!("unsupported version {version}")));
        }
        let key_bits = u32::from_le_bytes(read_array(r)?);
        let n_nodes = u32::from_le_bytes(read_array(r)?) as usize;
        let n_splits = u32::from_le_bytes(read_array(r)?) as usize;
        // A binary tree with s splits has 2s + 1 nodes.
        if n_nodes != 2 * n_splits + 1 {
            return Err(Error::TopologyFormat(format!(
                "{n_nodes} nodes cannot hold {n_splits} splits"
            )));
        }

        let mut bitset = vec![0u8; n_nodes.div_ceil(8)];
        r.read_exact(&mut bitset).map_err(truncated)?;
        let is_split: Vec<bool> = (0..n_nodes).map(|i| bitset[i / 8] >> (i % 8) & 1 != 0).collect();
        if is_split.iter().filter(|&&s| s).count() != n_splits {
            return Err(Error::TopologyFormat("split bitset disagrees with split count".into()));
        }

        let mut split_bits = Vec::with_capacity(n_splits);
        for _ in 0..n_splits {
            let b = u32::from_le_bytes(read_array(r)?);
            if b >= key_bits {
                return Err(Error::TopologyFormat(format!("split bit {b} >= key_bits {key_bits}")));
            }
            split_bits.push(b);
        }
        Ok(Self { key_bits, is_split, split_bits })
    }
}

fn truncated(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::TopologyFormat("truncated".into())
    } else {
        Error::Io(e)
    }
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N], Error> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

struct Rebuild<'a> {
    topo: &'a Topology,
    node: usize,
    split: usize,
}

impl McTree {
    /// Shape of the accepted tree.
    pub fn topology(&self) -> Topology {
        let mut t = Topology { key_bits: self.config.key_bits, ..Default::default() };
        let mut stack = vec![self.trees.baseline.root];
        while let Some(id) = stack.pop() {
            match self.nodes.get(id).kind {
                NodeKind::Split { bit, children } => {
                    t.is_split.push(true);
                    t.split_bits.push(bit);
                    stack.push(children[1]);
                    stack.push(children[0]);
                }
                NodeKind::Leaf(_) => t.is_split.push(false),
            }
        }
        t
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let topo = self.topology();
        let mut w = BufWriter::new(File::create(path)?);
        topo.write_to(&mut w)?;
        w.flush()?;
        info!(
            "[SAVE] {} nodes, {} splits -> {}",
            topo.is_split.len(),
            topo.split_bits.len(),
            path.display()
        );
        Ok(())
    }

    pub fn restore(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let topo = Topology::read_from(&mut BufReader::new(File::open(path)?))?;
        self.apply_topology(&topo)?;
        info!(
            "[RESTORE] {} nodes, {} splits <- {}",
            topo.is_split.len(),
            topo.split_bits.len(),
            path.display()
        );
        Ok(())
    }

    /// Replace the accepted tree with empty leaves shaped like `topo`.
    /// Only allowed while the tree holds no keys.
    pub fn apply_topology(&mut self, topo: &Topology) -> Result<(), Error> {
        if !self.keys.is_empty() {
            warn!("[RESTORE] refused: tree holds {} keys", self.keys.len());
            return Err(Error::RestoreNotEmpty);
        }
        if topo.key_bits != self.config.key_bits {
            return Err(Error::TopologyFormat(format!(
                "saved key_bits {} != tree key_bits {}",
                topo.key_bits, self.config.key_bits
            )));
        }
        if topo.is_split.len() != 2 * topo.split_bits.len() + 1
            || topo.split_bits.iter().any(|&b| b >= self.config.key_bits)
        {
            return Err(Error::TopologyFormat("inconsistent topology".into()));
        }

        let root_key: Vec<Pair> = vec![Pair::wildcard(); self.n_words];
        let mut at = Rebuild { topo, node: 0, split: 0 };
        let root = self.build_node(&mut at, &root_key)?;
        if at.node != topo.is_split.len() {
            self.free_tree(root);
            return Err(Error::TopologyFormat("trailing nodes after tree".into()));
        }

        self.cancel_working();
        let old = std::mem::replace(
            &mut self.trees.baseline,
            Tree { root, cost: TreeCost::default(), steps: 0 },
        );
        self.free_tree(old.root);
        Ok(())
    }

    /// Depth is bounded by `key_bits`: every split must fix a bit that is
    /// still free on its path.
    fn build_node(&mut self, at: &mut Rebuild<'_>, key: &[Pair]) -> Result<NodeId, Error> {
        let short = || Error::TopologyFormat("pre-order bitset is not a full tree".into());
        let split = *at.topo.is_split.get(at.node).ok_or_else(short)?;
        at.node += 1;
        if !split {
            return Ok(self.nodes.alloc(Node { key: key.into(), kind: NodeKind::Leaf(None) }));
        }
        let bit = *at.topo.split_bits.get(at.split).ok_or_else(short)?;
        at.split += 1;
        if is_masked(key, bit) {
            return Err(Error::TopologyFormat(format!(
                "split {} repeats bit {bit} already fixed on its path",
                at.split - 1
            )));
        }

        let c0 = self.build_node(at, &child_key(key, bit, 0))?;
        let c1 = match self.build_node(at, &child_key(key, bit, 1)) {
            Ok(c) => c,
            Err(e) => {
                self.free_tree(c0);
                return Err(e);
            }
        };
        Ok(self.nodes.alloc(Node { key: key.into(), kind: NodeKind::Split { bit, children: [c0, c1] } }))
    }
}
