use crate::block_hash::BLOCK_SIZE;

const MODULUS_MASK: u32 = 0xFFFF;

/// Two-component rolling checksum over the last `BLOCK_SIZE` bytes fed to it.
///
/// `beta1` is the plain byte sum and `beta2` the position-weighted sum, both
/// mod 2^16, combined as `beta1 + 2^16 * beta2`. A circular buffer of one
/// block remembers which byte leaves the window once it is full, so every
/// update is O(1).
pub struct RollingHash {
    beta1: u32,
    beta2: u32,
    buffer: Box<[u8]>,
    /// Total bytes pushed since the last reset.
    head: usize,
    /// Bytes evicted since the last reset.
    tail: usize,
}

impl RollingHash {
    pub fn new() -> Self {
        Self {
            beta1: 0,
            beta2: 0,
            buffer: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Checksum of one block (up to `BLOCK_SIZE` bytes) without manual reset/update.
    pub fn hash_of(block: &[u8]) -> u32 {
        let mut rolling = Self::new();
        let mut digest = rolling.digest();
        for &byte in block {
            digest = rolling.update(byte);
        }
        digest
    }

    /// Push one byte, evicting the oldest if the window already holds a full block.
    pub fn update(&mut self, byte: u8) -> u32 {
        let window_len = self.head - self.tail;
        let slot = self.head % BLOCK_SIZE;

        let pushed = byte as u32;
        let popped = if window_len >= BLOCK_SIZE {
            self.buffer[slot] as u32
        } else {
            0
        };
        self.buffer[slot] = byte;

        self.beta1 = self.beta1.wrapping_sub(popped).wrapping_add(pushed) & MODULUS_MASK;
        self.beta2 = self
            .beta2
            .wrapping_sub((window_len as u32).wrapping_mul(popped))
            .wrapping_add(self.beta1)
            & MODULUS_MASK;

        self.head += 1;
        if self.head - self.tail > BLOCK_SIZE {
            self.tail += 1;
        }

        self.digest()
    }

    /// Clear the window. Buffer contents are stale until overwritten.
    pub fn reset(&mut self) {
        self.beta1 = 0;
        self.beta2 = 0;
        self.head = 0;
        self.tail = 0;
    }

    /// Number of bytes currently inside the window.
    pub fn window_len(&self) -> usize {
        self.head - self.tail
    }

    pub fn digest(&self) -> u32 {
        self.beta1 + (self.beta2 << 16)
    }
}

impl Default for RollingHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_of_deterministic() {
        let data = b"Hello, World!";
        assert_eq!(RollingHash::hash_of(data), RollingHash::hash_of(data));
    }

    #[test]
    fn test_different_data_different_hash() {
        assert_ne!(RollingHash::hash_of(b"Hello"), RollingHash::hash_of(b"World"));
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(RollingHash::hash_of(&[]), 0);
        assert_eq!(RollingHash::new().digest(), 0);
    }

    #[test]
    fn test_known_small_value() {
        // "ab": beta1 = 97 + 98, beta2 = 2*97 + 98
        let expected = (97 + 98) + ((2 * 97 + 98) << 16);
        assert_eq!(RollingHash::hash_of(b"ab"), expected);
    }

    #[test]
    fn test_rolling_equals_fresh_hash_of_last_block() {
        let data: Vec<u8> = (0..BLOCK_SIZE + 300)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
            .collect();

        let mut rolling = RollingHash::new();
        let mut digest = 0;
        for &b in &data {
            digest = rolling.update(b);
        }

        assert_eq!(rolling.window_len(), BLOCK_SIZE);
        assert_eq!(digest, RollingHash::hash_of(&data[300..]));
    }

    #[test]
    fn test_reset_starts_fresh() {
        let mut rolling = RollingHash::new();
        for b in 0..200u8 {
            rolling.update(b);
        }
        rolling.reset();
        assert_eq!(rolling.window_len(), 0);
        let mut digest = 0;
        for &b in b"fresh" {
            digest = rolling.update(b);
        }
        assert_eq!(digest, RollingHash::hash_of(b"fresh"));
    }
}
