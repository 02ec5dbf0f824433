//! PBKDF2-HMAC-SHA256.
//!
//! Ключ HMAC нормализуется в 64-байтовый блок один раз; внутреннее/внешнее
//! состояние `Hmac<Sha256>` клонируется на каждой итерации вместо повторного
//! хеширования ipad/opad. Результат идентичен наивному HMAC.

use hmac::digest::generic_array::GenericArray;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::secret::CipherKey;
use crate::consts::KEY_LEN;

type HmacSha256 = Hmac<Sha256>;

const SHA256_BLOCK_LEN: usize = 64;
const SHA256_OUT_LEN: usize = 32;

/// HMAC keyed with `passphrase`; long keys are hashed first, short ones zero-padded.
fn keyed_prf(passphrase: &[u8]) -> HmacSha256 {
    let mut block = [0u8; SHA256_BLOCK_LEN];
    if passphrase.len() > SHA256_BLOCK_LEN {
        let mut digest = Sha256::digest(passphrase);
        block[..SHA256_OUT_LEN].copy_from_slice(&digest);
        digest.as_mut_slice().zeroize();
    } else {
        block[..passphrase.len()].copy_from_slice(passphrase);
    }
    let prf = <HmacSha256 as KeyInit>::new(GenericArray::from_slice(&block));
    block.zeroize();
    prf
}

/// Fill `out` with PBKDF2-HMAC-SHA256(passphrase, salt, iterations).
/// `iterations == 0` is treated as 1.
pub fn pbkdf2_hmac_sha256(passphrase: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
    let prf = keyed_prf(passphrase);
    for (i, chunk) in out.chunks_mut(SHA256_OUT_LEN).enumerate() {
        let mut mac = prf.clone();
        mac.update(salt);
        mac.update(&(i as u32 + 1).to_be_bytes());
        let mut u = mac.finalize().into_bytes();
        let mut t = u;

        for _ in 1..iterations {
            let mut mac = prf.clone();
            mac.update(&u);
            u.as_mut_slice().zeroize();
            u = mac.finalize().into_bytes();
            for (a, b) in t.iter_mut().zip(u.iter()) {
                *a ^= *b;
            }
        }

        chunk.copy_from_slice(&t[..chunk.len()]);
        u.as_mut_slice().zeroize();
        t.as_mut_slice().zeroize();
    }
}

/// Stretch a passphrase into the 32-byte page key.
pub fn derive_key(passphrase: &[u8], salt: &[u8], iterations: u32) -> CipherKey {
    let mut raw = [0u8; KEY_LEN];
    pbkdf2_hmac_sha256(passphrase, salt, iterations, &mut raw);
    let key = CipherKey::from_bytes(raw);
    raw.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(b: &[u8]) -> String {
        b.iter().map(|x| format!("{:02x}", x)).collect()
    }

    fn naive(pass: &[u8], salt: &[u8], c: u32) -> [u8; 32] {
        let hmac = |data: &[u8]| {
            let mut m = <HmacSha256 as Mac>::new_from_slice(pass).unwrap();
            m.update(data);
            m.finalize().into_bytes()
        };
        let mut s1 = salt.to_vec();
        s1.extend_from_slice(&1u32.to_be_bytes());
        let mut u = hmac(&s1);
        let mut t = u;
        for _ in 1..c {
            u = hmac(&u);
            for (a, b) in t.iter_mut().zip(u.iter()) {
                *a ^= *b;
            }
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&t);
        out
    }

    #[test]
    fn rfc7914_style_vectors() {
        let mut out = [0u8; 32];
        pbkdf2_hmac_sha256(b"password", b"salt", 1, &mut out);
        assert_eq!(hex(&out), "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b");
        pbkdf2_hmac_sha256(b"password", b"salt", 2, &mut out);
        assert_eq!(hex(&out), "ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43");
        pbkdf2_hmac_sha256(b"password", b"salt", 4096, &mut out);
        assert_eq!(hex(&out), "c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a");
    }

    #[test]
    fn precomputed_state_equals_naive_hmac() {
        let long_pass = vec![0xabu8; 131];
        for (pass, salt, c) in [
            (&b"correct horse"[..], &[7u8; 16][..], 1u32),
            (&b"correct horse"[..], &[7u8; 16][..], 37),
            (&long_pass[..], &b"NaCl"[..], 12),
            (&b""[..], &[0u8; 16][..], 5),
        ] {
            let mut ours = [0u8; 32];
            pbkdf2_hmac_sha256(pass, salt, c, &mut ours);
            assert_eq!(ours, naive(pass, salt, c));

            let mut oracle = [0u8; 32];
            pbkdf2::pbkdf2_hmac::<Sha256>(pass, salt, c, &mut oracle);
            assert_eq!(ours, oracle);
        }
    }

    #[test]
    fn multi_block_output_matches_oracle() {
        let mut ours = [0u8; 80];
        let mut oracle = [0u8; 80];
        pbkdf2_hmac_sha256(b"pw", b"salt-salt", 3, &mut ours);
        pbkdf2::pbkdf2_hmac::<Sha256>(b"pw", b"salt-salt", 3, &mut oracle);
        assert_eq!(ours[..], oracle[..]);
    }

    #[test]
    fn salt_bit_flip_changes_key() {
        let salt = [0x11u8; 16];
        let mut salt2 = salt;
        salt2[15] ^= 1;
        let a = derive_key(b"secret", &salt, 100);
        let b = derive_key(b"secret", &salt, 100);
        let c = derive_key(b"secret", &salt2, 100);
        assert_eq!(a.as_bytes(), b.as_bytes());
        let differing = a
            .as_bytes()
            .iter()
            .zip(c.as_bytes().iter())
            .filter(|(x, y)| x != y)
            .count();
        assert!(differing > 16, "only {differing} bytes differ");
    }
}
