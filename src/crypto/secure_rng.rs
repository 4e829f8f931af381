// OS-backed randomness for identifiers and signing keys
use anyhow::{anyhow, Result};
use ring::rand::{SecureRandom, SystemRandom};

/// Ring-based system random (uses OS facilities)
#[derive(Debug)]
pub struct RingSystemRNG {
    rng: SystemRandom,
}

impl Default for RingSystemRNG {
    fn default() -> Self {
        Self::new()
    }
}

impl RingSystemRNG {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    pub fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        self.rng
            .fill(dest)
            .map_err(|_| anyhow!("Ring SystemRandom failed"))
    }

    /// `len` random bytes as uppercase hex (two characters per byte)
    pub fn hex_token(&self, len: usize) -> Result<String> {
        let mut bytes = vec![0u8; len];
        self.fill_bytes(&mut bytes)?;
        Ok(hex::encode_upper(bytes))
    }
}

/// Fill `dest` from the operating system's secure generator
pub fn secure_random_bytes(dest: &mut [u8]) -> Result<()> {
    RingSystemRNG::new().fill_bytes(dest)
}

/// Shannon entropy in bits per byte
pub fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }

    let length = data.len() as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let probability = count as f64 / length;
            -probability * probability.log2()
        })
        .sum()
}
