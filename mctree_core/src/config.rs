//! Tree and search configuration

use crate::constants::*;
use crate::errors::Error;
use crate::helpers::words_for_bits;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Key width in bits (32 for IPv4, 128 for IPv6, ...).
    pub key_bits: u32,
    /// Upper bound on non-empty leaves the search may create.
    pub max_leaves: usize,
    /// Leaves smaller than this are never split.
    pub min_pairs_for_split: usize,
    /// Discard the working tree after this many steps without promotion (0 = never).
    pub restart_after_steps: u64,
    /// Run `validate` every this many steps (0 = never).
    pub validate_interval: u64,
    /// Annealing temperature; fixed for the life of the tree.
    pub temperature: f64,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_KEY_BITS,
            max_leaves: DEFAULT_MAX_LEAVES,
            min_pairs_for_split: DEFAULT_MIN_PAIRS_FOR_SPLIT,
            restart_after_steps: 0,
            validate_interval: 0,
            temperature: DEFAULT_TEMPERATURE,
            seed: None,
        }
    }
}

impl Config {
    pub fn check(&self) -> Result<(), Error> {
        if self.key_bits == 0 {
            return Err(Error::InvalidConfig("key_bits must be non-zero".into()));
        }
        if self.max_leaves == 0 {
            return Err(Error::InvalidConfig("max_leaves must be non-zero".into()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "temperature {} must be finite and >= 0",
                self.temperature
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn words_per_key(&self) -> usize {
        words_for_bits(self.key_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = Config::default();
        assert!(c.check().is_ok());
        assert_eq!(c.words_per_key(), 1);
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            Config { key_bits: 0, ..Config::default() },
            Config { max_leaves: 0, ..Config::default() },
            Config { temperature: -1.0, ..Config::default() },
            Config { temperature: f64::NAN, ..Config::default() },
        ];
        for c in bad {
            assert!(matches!(c.check(), Err(Error::InvalidConfig(_))), "{c:?}");
        }
        let wide = Config { key_bits: 104, ..Config::default() };
        assert_eq!(wide.words_per_key(), 4);
    }
}
