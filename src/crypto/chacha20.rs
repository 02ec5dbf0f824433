//! ChaCha20 stream cipher (20 rounds, 32-bit block counter, 96-bit nonce).
//!
//! Счётчик блоков 32-битный и оборачивается (wrapping) - так формируется
//! счётчик страницы `LE32(nonce[12..16]) ^ pgno`, и на диске это обязано
//! совпадать бит-в-бит.

use byteorder::{ByteOrder, LittleEndian};

pub const CHACHA20_BLOCK_LEN: usize = 64;
pub const CHACHA20_NONCE_LEN: usize = 12;

/// "expand 32-byte k"
const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

#[inline(always)]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(16);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(12);
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(8);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(7);
}

fn init_state(key: &[u8; 32], nonce: &[u8; CHACHA20_NONCE_LEN], counter: u32) -> [u32; 16] {
    let mut s = [0u32; 16];
    s[..4].copy_from_slice(&SIGMA);
    for i in 0..8 {
        s[4 + i] = LittleEndian::read_u32(&key[4 * i..4 * i + 4]);
    }
    s[12] = counter;
    for i in 0..3 {
        s[13 + i] = LittleEndian::read_u32(&nonce[4 * i..4 * i + 4]);
    }
    s
}

/// One 64-byte keystream block.
pub fn chacha20_block(
    key: &[u8; 32],
    nonce: &[u8; CHACHA20_NONCE_LEN],
    counter: u32,
) -> [u8; CHACHA20_BLOCK_LEN] {
    let input = init_state(key, nonce, counter);
    let mut x = input;
    for _ in 0..10 {
        // column round
        quarter_round(&mut x, 0, 4, 8, 12);
        quarter_round(&mut x, 1, 5, 9, 13);
        quarter_round(&mut x, 2, 6, 10, 14);
        quarter_round(&mut x, 3, 7, 11, 15);
        // diagonal round
        quarter_round(&mut x, 0, 5, 10, 15);
        quarter_round(&mut x, 1, 6, 11, 12);
        quarter_round(&mut x, 2, 7, 8, 13);
        quarter_round(&mut x, 3, 4, 9, 14);
    }
    let mut out = [0u8; CHACHA20_BLOCK_LEN];
    for i in 0..16 {
        LittleEndian::write_u32(&mut out[4 * i..4 * i + 4], x[i].wrapping_add(input[i]));
    }
    out
}

/// XOR `buf` in place with the keystream starting at block `counter`.
/// Последний неполный блок усекается; счётчик оборачивается после 2^32-1.
pub fn chacha20_xor(buf: &mut [u8], key: &[u8; 32], nonce: &[u8; CHACHA20_NONCE_LEN], counter: u32) {
    let mut ctr = counter;
    for chunk in buf.chunks_mut(CHACHA20_BLOCK_LEN) {
        let mut ks = chacha20_block(key, nonce, ctr);
        for (b, k) in chunk.iter_mut().zip(ks.iter()) {
            *b ^= *k;
        }
        ks.fill(0);
        ctr = ctr.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

    fn rfc_key() -> [u8; 32] {
        let mut k = [0u8; 32];
        for (i, b) in k.iter_mut().enumerate() {
            *b = i as u8;
        }
        k
    }

    #[test]
    fn rfc8439_encrypt_vector() {
        let key = rfc_key();
        let nonce = [0, 0, 0, 0, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let mut msg = b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip for the future, sunscreen would be it.".to_vec();
        chacha20_xor(&mut msg, &key, &nonce, 1);
        assert_eq!(
            &msg[..16],
            &[
                0x6e, 0x2e, 0x35, 0x9a, 0x25, 0x68, 0xf9, 0x80, 0x41, 0xba, 0x07, 0x28, 0xdd,
                0x0d, 0x69, 0x81
            ]
        );
    }

    #[test]
    fn matches_reference_for_partial_blocks() {
        let mut rng = oorandom::Rand32::new(7);
        for len in [0usize, 1, 63, 64, 65, 200, 4064] {
            let mut key = [0u8; 32];
            let mut nonce = [0u8; 12];
            key.iter_mut().for_each(|b| *b = rng.rand_u32() as u8);
            nonce.iter_mut().for_each(|b| *b = rng.rand_u32() as u8);
            let data: Vec<u8> = (0..len).map(|_| rng.rand_u32() as u8).collect();
            let counter = rng.rand_range(0..1000);

            let mut ours = data.clone();
            chacha20_xor(&mut ours, &key, &nonce, counter);

            let mut theirs = data.clone();
            let mut c = chacha20::ChaCha20::new(
                chacha20::Key::from_slice(&key),
                chacha20::Nonce::from_slice(&nonce),
            );
            c.seek(counter as u64 * 64);
            c.apply_keystream(&mut theirs);

            assert_eq!(ours, theirs, "len={len}");
        }
    }

    #[test]
    fn counter_wraps() {
        let key = rfc_key();
        let nonce = [9u8; 12];
        let mut two = [0u8; 128];
        chacha20_xor(&mut two, &key, &nonce, u32::MAX);
        assert_eq!(&two[..64], &chacha20_block(&key, &nonce, u32::MAX)[..]);
        assert_eq!(&two[64..], &chacha20_block(&key, &nonce, 0)[..]);
    }
}
