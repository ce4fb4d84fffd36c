//! Constants and configuration defaults for the classification tree

/// Bits per key word.  A key of `key_bits` bits is stored as
/// `ceil(key_bits / WORD_BITS)` (mask, value) pairs.
pub const WORD_BITS: u32 = 32;

/// Random bits handed out per 64-bit draw (top bit discarded).
pub const BITS_PER_DRAW: u32 = 63;

/// Leaves tried by one `step` before it gives up without a move.
pub const STEP_MAX_TRIES: usize = 64;

/// Leaf-size histogram buckets (log2 of size).
pub const HISTOGRAM_BUCKETS: usize = 32;

pub const DEFAULT_KEY_BITS: u32 = 32;
pub const DEFAULT_MAX_LEAVES: usize = 16 << 10;
pub const DEFAULT_MIN_PAIRS_FOR_SPLIT: usize = 4;
pub const DEFAULT_TEMPERATURE: f64 = 1e-6;

pub const TOPOLOGY_MAGIC: u64 = 0x4D43_5452_4545_5450; // "MCTREETP"
pub const TOPOLOGY_VERSION: u16 = 1;
