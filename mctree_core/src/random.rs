//! Seeded random source with a batched bit buffer.
//!
//! Most search decisions are single coin flips; one 64-bit draw is split into
//! 63 of them.

use crate::constants::BITS_PER_DRAW;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct RandomSource {
    rng: StdRng,
    bits: u64,
    remaining: u32,
}

impl RandomSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Self { rng, bits: 0, remaining: 0 }
    }

    /// One fair random bit.
    #[inline]
    pub fn bit(&mut self) -> usize {
        if self.remaining == 0 {
            self.bits = self.rng.random::<u64>() >> 1;
            self.remaining = BITS_PER_DRAW;
        }
        let b = (self.bits & 1) as usize;
        self.bits >>= 1;
        self.remaining -= 1;
        b
    }

    /// Uniform in `0..n`; `n` must be non-zero.
    #[inline]
    pub fn below(&mut self, n: usize) -> usize {
        self.rng.random_range(0..n)
    }

    /// Uniform in `[0, 1)`.
    #[inline]
    pub fn unit(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_sources_agree() {
        let mut a = RandomSource::new(Some(42));
        let mut b = RandomSource::new(Some(42));
        let xa: Vec<usize> = (0..200).map(|_| a.bit()).collect();
        let xb: Vec<usize> = (0..200).map(|_| b.bit()).collect();
        assert_eq!(xa, xb);
        assert_eq!(a.below(1000), b.below(1000));
    }

    #[test]
    fn bits_are_roughly_fair() {
        let mut r = RandomSource::new(Some(7));
        let ones: usize = (0..63 * 200).map(|_| r.bit()).sum();
        assert!((5000..7600).contains(&ones), "ones = {ones}");
    }

    #[test]
    fn ranges_hold() {
        let mut r = RandomSource::new(Some(1));
        for _ in 0..1000 {
            assert!(r.below(3) < 3);
            let u = r.unit();
            assert!((0.0..1.0).contains(&u));
        }
    }
}
