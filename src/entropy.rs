//! Physical Entropy Collection
//!
//! Converts a fixed count of die rolls or coin flips into a 256-bit seed.
//! The raw outcomes are whitened through SHA-256 so that biased physical
//! randomness still yields a uniform seed.
//!
//! SECURITY: outcomes and the finalized seed are zeroized on drop. Nothing
//! is cached between sessions; cancelling a collection discards everything.

use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Die rolls needed for ~256 bits of raw entropy (99 * log2(6) ≈ 255.9).
pub const DICE_ROLLS_REQUIRED: usize = 99;
/// Coin flips needed for 256 bits of raw entropy.
pub const COIN_FLIPS_REQUIRED: usize = 256;

/// Entropy collection errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EntropyError {
    #[error("Die value {0} out of range (expected 1-6)")]
    InvalidDieValue(u8),

    #[error("Outcome does not match the collection method in progress")]
    SourceMismatch,

    #[error("Collection already has all {0} outcomes")]
    SequenceFull(usize),

    #[error("Collection incomplete: {have}/{need} outcomes")]
    Incomplete { have: usize, need: usize },
}

/// Result type for entropy operations
pub type EntropyResult<T> = Result<T, EntropyError>;

/// Which physical randomness source is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropySource {
    /// Six-sided die, 99 rolls
    Dice,
    /// Fair coin, 256 flips
    Coin,
}

impl EntropySource {
    /// Number of outcomes required before the collector can finalize.
    pub fn required(&self) -> usize {
        match self {
            EntropySource::Dice => DICE_ROLLS_REQUIRED,
            EntropySource::Coin => COIN_FLIPS_REQUIRED,
        }
    }
}

/// A finalized 256-bit seed. Immutable; zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct SeedEntropy([u8; 32]);

impl SeedEntropy {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SeedEntropy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never reveal seed bytes through Debug formatting
        f.write_str("SeedEntropy(..)")
    }
}

/// Accumulates physical random events until enough are present to
/// produce a [`SeedEntropy`].
pub struct EntropyCollector {
    source: EntropySource,
    outcomes: Vec<u8>,
}

impl EntropyCollector {
    pub fn new(source: EntropySource) -> Self {
        Self {
            source,
            outcomes: Vec::with_capacity(source.required()),
        }
    }

    pub fn source(&self) -> EntropySource {
        self.source
    }

    /// Outcomes collected so far.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcomes still needed before [`finalize`](Self::finalize) succeeds.
    pub fn remaining(&self) -> usize {
        self.source.required().saturating_sub(self.outcomes.len())
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.len() >= self.source.required()
    }

    /// Record one die roll (1-6).
    pub fn add_die_roll(&mut self, value: u8) -> EntropyResult<()> {
        if self.source != EntropySource::Dice {
            return Err(EntropyError::SourceMismatch);
        }
        if !(1..=6).contains(&value) {
            return Err(EntropyError::InvalidDieValue(value));
        }
        if self.is_complete() {
            return Err(EntropyError::SequenceFull(self.source.required()));
        }
        self.outcomes.push(value);
        Ok(())
    }

    /// Record one coin flip.
    pub fn add_coin_flip(&mut self, heads: bool) -> EntropyResult<()> {
        if self.source != EntropySource::Coin {
            return Err(EntropyError::SourceMismatch);
        }
        if self.is_complete() {
            return Err(EntropyError::SequenceFull(self.source.required()));
        }
        self.outcomes.push(heads as u8);
        Ok(())
    }

    /// Remove the most recent outcome. Returns false when empty.
    pub fn undo_last(&mut self) -> bool {
        match self.outcomes.pop() {
            Some(mut v) => {
                v.zeroize();
                true
            }
            None => false,
        }
    }

    /// Hash the completed sequence into 32 bytes of seed entropy,
    /// consuming the collector.
    pub fn finalize(mut self) -> EntropyResult<SeedEntropy> {
        if !self.is_complete() {
            return Err(EntropyError::Incomplete {
                have: self.outcomes.len(),
                need: self.source.required(),
            });
        }

        let raw: Zeroizing<Vec<u8>> = Zeroizing::new(match self.source {
            // One byte per roll, value shifted to 0-5
            EntropySource::Dice => self.outcomes.iter().map(|v| v - 1).collect(),
            // Bit-packed, 8 flips per byte, first flip in the high bit
            EntropySource::Coin => self
                .outcomes
                .chunks(8)
                .map(|bits| {
                    bits.iter()
                        .enumerate()
                        .fold(0u8, |acc, (i, b)| acc | (b << (7 - i)))
                })
                .collect(),
        });

        let digest = Sha256::digest(raw.as_slice());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        self.outcomes.zeroize();
        Ok(SeedEntropy(seed))
    }
}

impl Drop for EntropyCollector {
    fn drop(&mut self) {
        self.outcomes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_dice(values: &[u8]) -> EntropyCollector {
        let mut c = EntropyCollector::new(EntropySource::Dice);
        for &v in values {
            c.add_die_roll(v).unwrap();
        }
        c
    }

    #[test]
    fn dice_finalize_is_deterministic() {
        let seed1 = collect_dice(&[3u8; 99]).finalize().unwrap();
        let seed2 = collect_dice(&[3u8; 99]).finalize().unwrap();
        assert_eq!(seed1.as_bytes(), seed2.as_bytes());
    }

    #[test]
    fn single_outcome_changes_seed() {
        let mut values = [3u8; 99];
        let base = collect_dice(&values).finalize().unwrap();
        values[50] = 4;
        let changed = collect_dice(&values).finalize().unwrap();
        assert_ne!(base.as_bytes(), changed.as_bytes());
    }

    #[test]
    fn coin_finalize_is_deterministic() {
        let mut a = EntropyCollector::new(EntropySource::Coin);
        let mut b = EntropyCollector::new(EntropySource::Coin);
        for i in 0..COIN_FLIPS_REQUIRED {
            a.add_coin_flip(i % 3 == 0).unwrap();
            b.add_coin_flip(i % 3 == 0).unwrap();
        }
        assert_eq!(
            a.finalize().unwrap().as_bytes(),
            b.finalize().unwrap().as_bytes()
        );
    }

    #[test]
    fn rejects_out_of_range_die() {
        let mut c = EntropyCollector::new(EntropySource::Dice);
        assert_eq!(c.add_die_roll(0), Err(EntropyError::InvalidDieValue(0)));
        assert_eq!(c.add_die_roll(7), Err(EntropyError::InvalidDieValue(7)));
    }

    #[test]
    fn rejects_mismatched_source() {
        let mut c = EntropyCollector::new(EntropySource::Coin);
        assert_eq!(c.add_die_roll(3), Err(EntropyError::SourceMismatch));
    }

    #[test]
    fn rejects_extra_outcomes() {
        let mut c = collect_dice(&[1u8; 99]);
        assert_eq!(c.add_die_roll(1), Err(EntropyError::SequenceFull(99)));
    }

    #[test]
    fn incomplete_collection_cannot_finalize() {
        let c = collect_dice(&[2u8; 50]);
        assert_eq!(
            c.finalize().err(),
            Some(EntropyError::Incomplete { have: 50, need: 99 })
        );
    }

    #[test]
    fn undo_pops_most_recent() {
        let mut c = collect_dice(&[1, 2, 3]);
        assert_eq!(c.len(), 3);
        assert!(c.undo_last());
        assert_eq!(c.len(), 2);
        c.add_die_roll(6).unwrap();
        assert_eq!(c.len(), 3);
        let mut empty = EntropyCollector::new(EntropySource::Dice);
        assert!(!empty.undo_last());
    }

    #[test]
    fn coin_bit_packing_differs_from_dice_bytes() {
        // 256 tails pack to 32 zero bytes; hash of that must differ from
        // the hash of 99 zero bytes from all-ones dice.
        let mut coin = EntropyCollector::new(EntropySource::Coin);
        for _ in 0..COIN_FLIPS_REQUIRED {
            coin.add_coin_flip(false).unwrap();
        }
        let coin_seed = coin.finalize().unwrap();
        let dice_seed = collect_dice(&[1u8; 99]).finalize().unwrap();
        assert_ne!(coin_seed.as_bytes(), dice_seed.as_bytes());
    }
}
