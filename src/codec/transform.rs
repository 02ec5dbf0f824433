//! Page transform.
//!
//! Страница размера P, n = P - 32:
//!   counter = LE32(nonce[12..16]) ^ pgno
//!   otk     = ChaCha20(master key, nonce[0..12], counter)   - 64 байта
//!   otk[0..32]  - ключ Poly1305, тег по [0 .. n+16)
//!   otk[32..64] - ключ ChaCha20 для данных [skip .. n), счётчик counter+1
//!
//! XOR номера страницы в счётчик привязывает тег к позиции страницы.
//! Чтение: сначала тег (constant-time), потом расшифровка; при несовпадении
//! буфер остаётся шифротекстом. Запись: копия во внутренний буфер, свежий nonce.

use std::any::Any;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use zeroize::Zeroize;

use crate::consts::{Pgno, HEADER_LEN, MAGIC_HEADER, PAGE_NONCE_LEN, PAGE_RESERVED_LEN};
use crate::crypto::{chacha20_block, chacha20_xor, poly1305_tag, tag_eq, CipherKey, RandomSource};
use crate::error::{Error, ErrorCode, Result};
use crate::metrics::{record_auth_failure, record_page_decrypted, record_page_encrypted};
use crate::pager::{DecodeMode, EncodeMode, PageTransform};

use super::context::KeyContext;
use super::{Codec, CodecState};

fn one_time_keys(key: &CipherKey, nonce: &[u8], pgno: Pgno) -> ([u8; 64], u32) {
    let counter = LittleEndian::read_u32(&nonce[PAGE_NONCE_LEN - 4..PAGE_NONCE_LEN]) ^ pgno;
    let mut n12 = [0u8; 12];
    n12.copy_from_slice(&nonce[..12]);
    (chacha20_block(key.as_bytes(), &n12, counter), counter)
}

#[inline]
fn effective_skip(skip: usize, pgno: Pgno, n: usize) -> usize {
    if pgno == 1 {
        skip.min(n)
    } else {
        0
    }
}

/// Verify and decrypt one page in place.
pub fn decrypt_page(key: &CipherKey, skip: usize, page: &mut [u8], pgno: Pgno) -> Result<()> {
    let n = page.len() - PAGE_RESERVED_LEN;
    let skip = effective_skip(skip, pgno, n);

    let mut nonce = [0u8; PAGE_NONCE_LEN];
    nonce.copy_from_slice(&page[n..n + PAGE_NONCE_LEN]);
    let (mut otk, counter) = one_time_keys(key, &nonce, pgno);

    let mut poly_key = [0u8; 32];
    poly_key.copy_from_slice(&otk[..32]);
    let tag = poly1305_tag(&poly_key, &page[..n + PAGE_NONCE_LEN]);
    let mut stored = [0u8; 16];
    stored.copy_from_slice(&page[n + PAGE_NONCE_LEN..]);
    poly_key.zeroize();

    if !tag_eq(&tag, &stored) {
        otk.zeroize();
        return Err(Error::Auth { pgno });
    }

    let mut data_key = [0u8; 32];
    data_key.copy_from_slice(&otk[32..]);
    otk.zeroize();
    let mut n12 = [0u8; 12];
    n12.copy_from_slice(&nonce[..12]);
    chacha20_xor(&mut page[skip..n], &data_key, &n12, counter.wrapping_add(1));
    data_key.zeroize();

    if pgno == 1 {
        page[..HEADER_LEN].copy_from_slice(MAGIC_HEADER);
    }
    Ok(())
}

/// Encrypt `src` into `out` (same length) with a fresh nonce from `rng`.
/// Page 1 gets `header` in its first 16 bytes.
pub fn encrypt_page(
    key: &CipherKey,
    skip: usize,
    header: &[u8; HEADER_LEN],
    src: &[u8],
    out: &mut [u8],
    pgno: Pgno,
    rng: &dyn RandomSource,
) {
    let n = src.len() - PAGE_RESERVED_LEN;
    let skip = effective_skip(skip, pgno, n);
    out.copy_from_slice(src);

    let mut nonce = [0u8; PAGE_NONCE_LEN];
    rng.fill(&mut nonce);
    out[n..n + PAGE_NONCE_LEN].copy_from_slice(&nonce);
    let (mut otk, counter) = one_time_keys(key, &nonce, pgno);

    let mut data_key = [0u8; 32];
    data_key.copy_from_slice(&otk[32..]);
    let mut n12 = [0u8; 12];
    n12.copy_from_slice(&nonce[..12]);
    chacha20_xor(&mut out[skip..n], &data_key, &n12, counter.wrapping_add(1));
    data_key.zeroize();

    if pgno == 1 {
        out[..HEADER_LEN].copy_from_slice(header);
    }

    let mut poly_key = [0u8; 32];
    poly_key.copy_from_slice(&otk[..32]);
    otk.zeroize();
    let tag = poly1305_tag(&poly_key, &out[..n + PAGE_NONCE_LEN]);
    poly_key.zeroize();
    out[n + PAGE_NONCE_LEN..].copy_from_slice(&tag);
}

fn check_page_len(ctx: &KeyContext, page: &[u8]) -> Result<()> {
    if page.len() != ctx.page_size || page.len() <= PAGE_RESERVED_LEN {
        return Err(Error::Internal(format!(
            "page buffer of {} bytes, codec page size {}",
            page.len(),
            ctx.page_size
        )));
    }
    Ok(())
}

impl PageTransform for Codec {
    fn decode(&mut self, page: &mut [u8], pgno: Pgno, mode: DecodeMode) -> Result<()> {
        let result = match self.state.reader_mut() {
            None => return Ok(()),
            Some(reader) => {
                check_page_len(reader, page)?;
                if pgno == 1 && !reader.has_key() {
                    debug!("page 1 read without a key: deriving from stored salt");
                    reader.derive_from_page1(page);
                }
                match reader.key() {
                    Some(key) => decrypt_page(key, reader.skip, page, pgno),
                    None => Err(Error::Internal("reader has no key".into())),
                }
            }
        };
        match result {
            Ok(()) => {
                record_page_decrypted();
                Ok(())
            }
            Err(e) => {
                if let Error::Auth { .. } = e {
                    record_auth_failure();
                    warn!("page {}: authentication failed ({:?})", pgno, mode);
                }
                self.error = Some(e.code());
                Err(e)
            }
        }
    }

    fn encode<'a>(&'a mut self, page: &'a [u8], pgno: Pgno, mode: EncodeMode) -> Result<&'a [u8]> {
        let Codec {
            state,
            pagebuf,
            rng,
            ..
        } = self;
        let ctx = match mode {
            EncodeMode::JournalPage => state.reader(),
            EncodeMode::DatabasePage => state.writer(),
        };
        let Some(ctx) = ctx else {
            return Ok(page);
        };
        check_page_len(ctx, page)?;
        let key = ctx
            .key()
            .ok_or_else(|| Error::Internal("encode without a derived key".into()))?;
        if pagebuf.len() < page.len() {
            return Err(Error::Internal(format!(
                "scratch page of {} bytes for a {}-byte page",
                pagebuf.len(),
                page.len()
            )));
        }
        let out = &mut pagebuf[..page.len()];
        encrypt_page(key, ctx.skip, &ctx.header, page, out, pgno, rng.as_ref());
        record_page_encrypted();
        Ok(&pagebuf[..page.len()])
    }

    fn reserved_bytes(&self) -> usize {
        Codec::reserved_bytes(self)
    }

    fn page_size(&self) -> usize {
        Codec::page_size(self)
    }

    fn page_size_changed(&mut self, new_page_size: usize, reserved: usize) -> Result<usize> {
        let current = Codec::page_size(self);
        if current == new_page_size {
            return Ok(current);
        }
        let expected = Codec::reserved_bytes(self);
        if expected <= reserved {
            debug!("keeping codec page size {} (requested {})", current, new_page_size);
            Ok(current)
        } else {
            warn!(
                "page size change to {} with {} reserved bytes: codec needs {}, disabled",
                new_page_size, reserved, expected
            );
            self.state = CodecState::Inactive;
            self.error = Some(ErrorCode::Misuse);
            Err(Error::misuse(format!(
                "reserved bytes {} below codec requirement {}",
                reserved, expected
            )))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ChaChaRng;

    fn key(b: u8) -> CipherKey {
        CipherKey::from_bytes([b; 32])
    }

    #[test]
    fn tag_binds_page_number() {
        let rng = ChaChaRng::from_seed([1; 32]);
        let src = vec![0x42u8; 1024];
        let mut out = vec![0u8; 1024];
        encrypt_page(&key(7), 0, &[0; 16], &src, &mut out, 3, &rng);
        let mut as4 = out.clone();
        assert!(matches!(decrypt_page(&key(7), 0, &mut as4, 4), Err(Error::Auth { pgno: 4 })));
        // неудачная проверка не трогает буфер
        assert_eq!(as4, out);
        let mut as3 = out;
        decrypt_page(&key(7), 0, &mut as3, 3).unwrap();
        assert_eq!(&as3[..992], &src[..992]);
    }

    #[test]
    fn skip_bytes_stay_plaintext() {
        let rng = ChaChaRng::from_seed([2; 32]);
        let mut src = vec![0u8; 512];
        src[..16].copy_from_slice(MAGIC_HEADER);
        for (i, b) in src.iter_mut().enumerate().skip(16).take(464) {
            *b = i as u8;
        }
        let header = *MAGIC_HEADER;
        let mut out = vec![0u8; 512];
        encrypt_page(&key(9), 24, &header, &src, &mut out, 1, &rng);
        assert_eq!(&out[..24], &src[..24]);
        assert_ne!(&out[24..480], &src[24..480]);
        decrypt_page(&key(9), 24, &mut out, 1).unwrap();
        assert_eq!(&out[..480], &src[..480]);
    }

    #[test]
    fn oversized_skip_is_clamped() {
        let rng = ChaChaRng::from_seed([3; 32]);
        let src = vec![5u8; 512];
        let mut out = vec![0u8; 512];
        encrypt_page(&key(1), 512, &[0; 16], &src, &mut out, 1, &rng);
        decrypt_page(&key(1), 512, &mut out, 1).unwrap();
        assert_eq!(&out[16..480], &src[16..480]);
    }
}
