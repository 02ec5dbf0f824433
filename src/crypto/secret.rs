//! Secret wrappers: zeroed on drop, redacted in Debug.

use std::fmt;

use zeroize::Zeroize;

use crate::consts::KEY_LEN;

/// 32-байтный ключ шифрования страниц.
#[derive(Clone)]
pub struct CipherKey {
    bytes: [u8; KEY_LEN],
}

impl CipherKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw key material; `None` unless exactly 32 bytes.
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        if raw.len() != KEY_LEN {
            return None;
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(raw);
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl Drop for CipherKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(<redacted>)")
    }
}

/// Caller-supplied key bytes kept until the KDF has run (a passphrase, or a raw
/// 32-byte key when `kdf=none`).
#[derive(Clone)]
pub struct Passphrase {
    bytes: Vec<u8>,
}

impl Passphrase {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase(<{} bytes redacted>)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let k = CipherKey::from_bytes([0x41; 32]);
        let p = Passphrase::new(b"hunter2");
        assert!(!format!("{:?}", k).contains("41"));
        assert!(!format!("{:?}", p).contains("hunter2"));
    }

    #[test]
    fn from_slice_requires_exact_length() {
        assert!(CipherKey::from_slice(&[0u8; 31]).is_none());
        assert!(CipherKey::from_slice(&[0u8; 33]).is_none());
        assert!(CipherKey::from_slice(&[0u8; 32]).is_some());
    }
}
