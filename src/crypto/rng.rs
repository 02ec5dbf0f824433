//! Secure randomness for salts, headers and page nonces.
//!
//! - `RandomSource` - явная зависимость кодека (тесты подставляют детерминированный источник).
//! - `ChaChaRng` - ChaCha20 keystream под Mutex; сид из OS entropy (`rand::rngs::OsRng`),
//!   пересев после RESEED_BLOCKS блоков. Каждый выданный блок сразу стирается из буфера.
//! - Отказ источника энтропии фатален: error! + abort, без деградации.

use std::sync::{Arc, Mutex, OnceLock};

use log::error;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use super::chacha20::{chacha20_block, CHACHA20_BLOCK_LEN, CHACHA20_NONCE_LEN};

/// Blocks produced between reseeds from the OS.
const RESEED_BLOCKS: u32 = 1 << 16;

/// A cryptographically secure byte source. Thread-safe.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

struct KeystreamState {
    key: [u8; 32],
    nonce: [u8; CHACHA20_NONCE_LEN],
    counter: u32,
    block: [u8; CHACHA20_BLOCK_LEN],
    available: usize,
    seeded: bool,
}

impl KeystreamState {
    fn empty() -> Self {
        Self {
            key: [0; 32],
            nonce: [0; CHACHA20_NONCE_LEN],
            counter: 0,
            block: [0; CHACHA20_BLOCK_LEN],
            available: 0,
            seeded: false,
        }
    }

    fn seed(&mut self, material: &[u8; 44]) {
        self.key.copy_from_slice(&material[..32]);
        self.nonce.copy_from_slice(&material[32..]);
        self.counter = 0;
        self.available = 0;
        self.seeded = true;
    }

    fn refill(&mut self) {
        self.block = chacha20_block(&self.key, &self.nonce, self.counter);
        self.counter = self.counter.wrapping_add(1);
        self.available = CHACHA20_BLOCK_LEN;
    }
}

impl Drop for KeystreamState {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
        self.block.zeroize();
    }
}

enum Seeding {
    Os,
    /// Детерминированный поток (только тесты/воспроизводимость).
    Fixed,
}

pub struct ChaChaRng {
    state: Mutex<KeystreamState>,
    seeding: Seeding,
}

impl ChaChaRng {
    /// Lazily seeded from OS entropy on first use.
    pub fn from_os_entropy() -> Self {
        Self {
            state: Mutex::new(KeystreamState::empty()),
            seeding: Seeding::Os,
        }
    }

    /// Reproducible stream, never touches the OS. Not for production files.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let mut material = [0u8; 44];
        material[..32].copy_from_slice(&seed);
        let mut st = KeystreamState::empty();
        st.seed(&material);
        Self {
            state: Mutex::new(st),
            seeding: Seeding::Fixed,
        }
    }

    fn reseed(&self, st: &mut KeystreamState) {
        match self.seeding {
            Seeding::Os => {
                let mut material = [0u8; 44];
                if let Err(e) = OsRng.try_fill_bytes(&mut material) {
                    error!("entropy source failed: {}; aborting", e);
                    std::process::abort();
                }
                st.seed(&material);
                material.zeroize();
            }
            Seeding::Fixed => {
                // перекрутить ключ из собственного потока
                st.refill();
                let mut material = [0u8; 44];
                material.copy_from_slice(&st.block[..44]);
                st.seed(&material);
                material.zeroize();
            }
        }
    }
}

impl RandomSource for ChaChaRng {
    fn fill(&self, buf: &mut [u8]) {
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !st.seeded {
            self.reseed(&mut st);
        }
        let mut off = 0;
        while off < buf.len() {
            if st.available == 0 {
                if st.counter >= RESEED_BLOCKS {
                    self.reseed(&mut st);
                }
                st.refill();
            }
            let start = CHACHA20_BLOCK_LEN - st.available;
            let n = st.available.min(buf.len() - off);
            buf[off..off + n].copy_from_slice(&st.block[start..start + n]);
            st.block[start..start + n].zeroize();
            st.available -= n;
            off += n;
        }
    }
}

/// Process-wide generator shared by every connection.
pub fn system_random() -> Arc<dyn RandomSource> {
    static SYSTEM: OnceLock<Arc<ChaChaRng>> = OnceLock::new();
    let rng = SYSTEM.get_or_init(|| Arc::new(ChaChaRng::from_os_entropy()));
    rng.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_seed_is_reproducible() {
        let a = ChaChaRng::from_seed([3; 32]);
        let b = ChaChaRng::from_seed([3; 32]);
        let mut x = [0u8; 100];
        let mut y = [0u8; 100];
        a.fill(&mut x[..7]);
        a.fill(&mut x[7..]);
        b.fill(&mut y);
        assert_eq!(x, y);
    }

    #[test]
    fn consecutive_outputs_differ() {
        let rng = system_random();
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        rng.fill(&mut a);
        rng.fill(&mut b);
        assert_ne!(a, b);
        assert_ne!(a, [0u8; 16]);
    }

    #[test]
    fn fixed_stream_survives_reseed_boundary() {
        let rng = ChaChaRng::from_seed([9; 32]);
        {
            let mut st = rng.state.lock().unwrap();
            st.counter = RESEED_BLOCKS;
        }
        let mut a = [0u8; 64];
        rng.fill(&mut a);
        assert_ne!(a, [0u8; 64]);
        assert!(rng.state.lock().unwrap().counter < RESEED_BLOCKS);
    }
}
