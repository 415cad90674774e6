//! LT Fountain Codes
//!
//! Erasure coding for multi-frame QR transmission: the receiver can
//! reconstruct the payload from any sufficiently large subset of parts,
//! so missed camera frames only delay completion instead of forcing a
//! restart.
//!
//! The first K parts (one per source fragment) are the fragments
//! themselves; later parts XOR a pseudo-random subset, chosen
//! deterministically from the sequence number so a cycling sender is
//! reproducible. Decoding is belief-propagation peeling: degree-one parts
//! recover a fragment directly, and each recovery is XORed out of the
//! stored mixed parts until they become degree-one themselves.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::{QrError, QrResult};

/// A single fountain-encoded part.
#[derive(Debug, Clone, PartialEq)]
pub struct FountainPart {
    /// Sequence number this part was emitted as
    pub seq: u32,
    /// Source fragment indexes XORed into `data`
    pub indexes: Vec<u32>,
    /// XOR of the selected fragments, padded to fragment size
    pub data: Vec<u8>,
}

/// Fountain encoder over a fixed payload.
pub struct FountainEncoder {
    fragments: Vec<Vec<u8>>,
    fragment_size: usize,
    message_len: usize,
    seed: u64,
}

impl FountainEncoder {
    pub fn new(message: &[u8], fragment_size: usize) -> Self {
        let fragment_count = message.len().div_ceil(fragment_size).max(1);

        let mut fragments = Vec::with_capacity(fragment_count);
        for i in 0..fragment_count {
            let start = i * fragment_size;
            let end = (start + fragment_size).min(message.len());
            let mut fragment = vec![0u8; fragment_size];
            if start < message.len() {
                fragment[..end - start].copy_from_slice(&message[start..end]);
            }
            fragments.push(fragment);
        }

        // Seed from the payload checksum so the part sequence is stable
        // across encoder instances for the same message.
        let seed = u64::from(crc32fast::hash(message));

        Self {
            fragments,
            fragment_size,
            message_len: message.len(),
            seed,
        }
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    pub fn message_len(&self) -> usize {
        self.message_len
    }

    /// Produce the part for a sequence number. Sequence numbers below the
    /// fragment count yield the plain fragments in order; higher ones
    /// yield deterministic mixtures.
    pub fn part(&self, seq: u32) -> FountainPart {
        let k = self.fragments.len();

        let indexes: Vec<u32> = if (seq as usize) < k {
            vec![seq]
        } else {
            let mut rng = ChaCha20Rng::seed_from_u64(self.seed.wrapping_add(u64::from(seq)));
            let degree = sample_degree(&mut rng, k);
            let mut available: Vec<u32> = (0..k as u32).collect();
            let mut chosen = Vec::with_capacity(degree);
            for _ in 0..degree {
                let i = rng.gen_range(0..available.len());
                chosen.push(available.swap_remove(i));
            }
            chosen.sort_unstable();
            chosen
        };

        let mut data = vec![0u8; self.fragment_size];
        for &idx in &indexes {
            xor_into(&mut data, &self.fragments[idx as usize]);
        }

        FountainPart { seq, indexes, data }
    }
}

/// Soliton-ish degree distribution, weighted toward low degrees.
fn sample_degree(rng: &mut ChaCha20Rng, k: usize) -> usize {
    let r: f64 = rng.gen();
    let degree = if r < 0.5 {
        1
    } else if r < 0.8 {
        2
    } else if r < 0.95 {
        3
    } else {
        rng.gen_range(4..=10)
    };
    degree.min(k)
}

/// Fountain decoder using iterative peeling.
pub struct FountainDecoder {
    fragment_count: usize,
    fragment_size: usize,
    message_len: usize,
    /// Mixed parts awaiting further simplification
    pending: Vec<FountainPart>,
    recovered: Vec<Option<Vec<u8>>>,
    complete: bool,
}

impl FountainDecoder {
    pub fn new(fragment_count: usize, fragment_size: usize, message_len: usize) -> Self {
        Self {
            fragment_count,
            fragment_size,
            message_len,
            pending: Vec::new(),
            recovered: vec![None; fragment_count],
            complete: false,
        }
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    pub fn recovered_count(&self) -> usize {
        self.recovered.iter().filter(|r| r.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feed one part into the decoder.
    pub fn receive(&mut self, part: FountainPart) -> QrResult<()> {
        if self.complete {
            return Ok(());
        }
        if part.data.len() != self.fragment_size {
            return Err(QrError::InvalidData(format!(
                "fragment size {} does not match transmission ({})",
                part.data.len(),
                self.fragment_size
            )));
        }
        if part
            .indexes
            .iter()
            .any(|&i| i as usize >= self.fragment_count)
        {
            return Err(QrError::InvalidData(
                "fragment index out of range".to_string(),
            ));
        }

        let simplified = self.simplify(part);
        match simplified.indexes.len() {
            // Fully redundant against what we already have
            0 => {}
            1 => {
                let idx = simplified.indexes[0] as usize;
                if self.recovered[idx].is_none() {
                    self.recovered[idx] = Some(simplified.data);
                    self.propagate(idx);
                }
            }
            _ => self.pending.push(simplified),
        }

        if self.recovered.iter().all(|r| r.is_some()) {
            self.complete = true;
            self.pending.clear();
        }
        Ok(())
    }

    /// XOR already-recovered fragments out of an incoming part.
    fn simplify(&self, mut part: FountainPart) -> FountainPart {
        let mut remaining = Vec::with_capacity(part.indexes.len());
        for idx in std::mem::take(&mut part.indexes) {
            if let Some(fragment) = &self.recovered[idx as usize] {
                xor_into(&mut part.data, fragment);
            } else {
                remaining.push(idx);
            }
        }
        part.indexes = remaining;
        part
    }

    /// Push a newly recovered fragment through the pending mixed parts.
    fn propagate(&mut self, recovered_idx: usize) {
        let mut queue = vec![recovered_idx];
        while let Some(idx) = queue.pop() {
            let fragment = match &self.recovered[idx] {
                Some(f) => f.clone(),
                None => continue,
            };
            let mut i = 0;
            while i < self.pending.len() {
                if self.pending[i].indexes.contains(&(idx as u32)) {
                    xor_into(&mut self.pending[i].data, &fragment);
                    self.pending[i].indexes.retain(|&x| x != idx as u32);

                    match self.pending[i].indexes.len() {
                        0 => {
                            self.pending.swap_remove(i);
                            continue;
                        }
                        1 => {
                            let part = self.pending.swap_remove(i);
                            let new_idx = part.indexes[0] as usize;
                            if self.recovered[new_idx].is_none() {
                                self.recovered[new_idx] = Some(part.data);
                                queue.push(new_idx);
                            }
                            continue;
                        }
                        _ => {}
                    }
                }
                i += 1;
            }
        }
    }

    /// The reconstructed payload, trimmed to the original length.
    pub fn message(&self) -> QrResult<Vec<u8>> {
        if !self.complete {
            return Err(QrError::DecodingIncomplete);
        }
        let mut message = Vec::with_capacity(self.fragment_count * self.fragment_size);
        for fragment in &self.recovered {
            let fragment = fragment.as_ref().ok_or(QrError::DecodingIncomplete)?;
            message.extend_from_slice(fragment);
        }
        message.truncate(self.message_len);
        Ok(message)
    }
}

fn xor_into(target: &mut [u8], source: &[u8]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t ^= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder_for(encoder: &FountainEncoder) -> FountainDecoder {
        FountainDecoder::new(
            encoder.fragment_count(),
            encoder.fragment_size(),
            encoder.message_len(),
        )
    }

    #[test]
    fn sequential_parts_roundtrip() {
        let message: Vec<u8> = (0..=255u8).cycle().take(487).collect();
        let encoder = FountainEncoder::new(&message, 100);
        assert_eq!(encoder.fragment_count(), 5);

        let mut decoder = decoder_for(&encoder);
        for seq in 0..5 {
            decoder.receive(encoder.part(seq)).unwrap();
        }
        assert!(decoder.is_complete());
        assert_eq!(decoder.message().unwrap(), message);
    }

    #[test]
    fn recovers_with_half_the_parts_lost() {
        let message = b"fountain codes survive arbitrarily dropped frames during scanning";
        let encoder = FountainEncoder::new(message, 7);
        let mut decoder = decoder_for(&encoder);

        for seq in (0..200).filter(|s| s % 2 == 1) {
            decoder.receive(encoder.part(seq)).unwrap();
            if decoder.is_complete() {
                break;
            }
        }
        assert!(decoder.is_complete());
        assert_eq!(decoder.message().unwrap(), message.to_vec());
    }

    #[test]
    fn out_of_order_delivery() {
        let message: Vec<u8> = (0..300u16).map(|i| (i % 251) as u8).collect();
        let encoder = FountainEncoder::new(&message, 50);
        let mut decoder = decoder_for(&encoder);

        for seq in (0..encoder.fragment_count() as u32).rev() {
            decoder.receive(encoder.part(seq)).unwrap();
        }
        assert!(decoder.is_complete());
        assert_eq!(decoder.message().unwrap(), message);
    }

    #[test]
    fn parts_are_deterministic_per_seq() {
        let message = vec![0xAB; 950];
        let a = FountainEncoder::new(&message, 100);
        let b = FountainEncoder::new(&message, 100);
        for seq in 0..40 {
            assert_eq!(a.part(seq), b.part(seq));
        }
    }

    #[test]
    fn rejects_foreign_geometry() {
        let encoder = FountainEncoder::new(b"0123456789", 4);
        let mut decoder = decoder_for(&encoder);

        let mut wrong_size = encoder.part(0);
        wrong_size.data.push(0);
        assert!(decoder.receive(wrong_size).is_err());

        let out_of_range = FountainPart {
            seq: 9,
            indexes: vec![99],
            data: vec![0u8; 4],
        };
        assert!(decoder.receive(out_of_range).is_err());
    }

    #[test]
    fn incomplete_decoder_has_no_message() {
        let encoder = FountainEncoder::new(&[1u8; 64], 16);
        let mut decoder = decoder_for(&encoder);
        decoder.receive(encoder.part(0)).unwrap();
        assert!(matches!(
            decoder.message(),
            Err(QrError::DecodingIncomplete)
        ));
    }

    #[test]
    fn single_fragment_message() {
        let encoder = FountainEncoder::new(b"tiny", 100);
        assert_eq!(encoder.fragment_count(), 1);
        let mut decoder = decoder_for(&encoder);
        decoder.receive(encoder.part(0)).unwrap();
        assert_eq!(decoder.message().unwrap(), b"tiny".to_vec());
    }
}
