use std::hash::Hasher;

const MAX_PRIME: u64 = 11_400_714_819_323_198_549u64;

fn fold(state: u64, bytes: &[u8]) -> u64 {
    bytes.iter().fold(state, |acc, &byte| {
        (acc.rotate_left(8) ^ byte as u64).wrapping_mul(MAX_PRIME)
    })
}

/// A hasher optimized for hashing property type IDs.
///
/// Type IDs are already well distributed, so the hash is the ID itself.
#[derive(Default)]
pub struct PropertyTypeIdHasher(u64);

impl Hasher for PropertyTypeIdHasher {
    fn finish(&self) -> u64 { self.0 }

    fn write(&mut self, bytes: &[u8]) { self.0 = fold(self.0, bytes); }

    fn write_u64(&mut self, i: u64) { self.0 = i; }
}

/// A hasher optimized for hashing types that are represented as a u64.
#[derive(Default)]
pub struct U64Hasher(u64);

impl Hasher for U64Hasher {
    fn finish(&self) -> u64 { self.0 }

    fn write(&mut self, bytes: &[u8]) { self.0 = fold(self.0, bytes); }

    fn write_u64(&mut self, seed: u64) { self.0 = MAX_PRIME.wrapping_mul(seed); }
}
