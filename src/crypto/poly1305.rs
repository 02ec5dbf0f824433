//! Poly1305 one-time authenticator.
//!
//! Ключ одноразовый: r (clamped) || s, берётся из otk-блока страницы.
//! Сравнение тегов - только через `tag_eq`.

use poly1305::universal_hash::KeyInit;
use poly1305::{Key, Poly1305};
use subtle::ConstantTimeEq;

pub const POLY1305_KEY_LEN: usize = 32;
pub const POLY1305_TAG_LEN: usize = 16;

/// One-shot tag over `msg`; the last partial block is padded per RFC 8439.
pub fn poly1305_tag(key: &[u8; POLY1305_KEY_LEN], msg: &[u8]) -> [u8; POLY1305_TAG_LEN] {
    let tag = Poly1305::new(Key::from_slice(key)).compute_unpadded(msg);
    let mut out = [0u8; POLY1305_TAG_LEN];
    out.copy_from_slice(&tag);
    out
}

/// Constant-time tag comparison.
pub fn tag_eq(a: &[u8; POLY1305_TAG_LEN], b: &[u8; POLY1305_TAG_LEN]) -> bool {
    a[..].ct_eq(&b[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc8439_vector() {
        let key: [u8; 32] = hex::decode("85d6be7857556d337f4452fe42d506a80103808afb0db2fd4abff6af4149f51b")
            .unwrap()
            .try_into()
            .unwrap();
        let tag = poly1305_tag(&key, b"Cryptographic Forum Research Group");
        assert_eq!(hex::encode(tag), "a8061dc1305136c6c22b8baf0c0127a9");
    }

    #[test]
    fn key_change_changes_tag() {
        let mut rng = oorandom::Rand32::new(1305);
        let mut key = [0u8; 32];
        key.iter_mut().for_each(|b| *b = rng.rand_u32() as u8);
        let msg: Vec<u8> = (0..1040).map(|_| rng.rand_u32() as u8).collect();
        let t = poly1305_tag(&key, &msg);
        key[20] ^= 1;
        assert!(!tag_eq(&t, &poly1305_tag(&key, &msg)));
    }

    #[test]
    fn tag_eq_detects_any_position() {
        let a = [0x5au8; 16];
        assert!(tag_eq(&a, &a));
        for i in 0..16 {
            for bit in 0..8 {
                let mut b = a;
                b[i] ^= 1 << bit;
                assert!(!tag_eq(&a, &b));
            }
        }
    }
}
