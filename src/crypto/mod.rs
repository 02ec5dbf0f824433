//! crypto - примитивы кодека страниц.
//!
//! - chacha20 - потоковый шифр (32-битный wrapping счётчик блоков).
//! - poly1305 - одноразовый MAC + константное по времени сравнение тегов.
//! - kdf      - PBKDF2-HMAC-SHA256 (sha2 + hmac), предвычисленные состояния HMAC.
//! - rng      - RandomSource (ChaCha20 keystream, сид из OS entropy).
//! - secret   - CipherKey/Passphrase, обнуляются в Drop (zeroize).
//!
//! Примитивы не возвращают ошибок: это чистые преобразования.

pub mod chacha20;
pub mod kdf;
pub mod poly1305;
pub mod rng;
pub mod secret;

pub use self::chacha20::{chacha20_block, chacha20_xor};
pub use self::kdf::{derive_key, pbkdf2_hmac_sha256};
pub use self::poly1305::{poly1305_tag, tag_eq};
pub use self::rng::{system_random, ChaChaRng, RandomSource};
pub use self::secret::{CipherKey, Passphrase};
