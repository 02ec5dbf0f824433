//! URI-параметры кодека: `page_size`, `skip`, `kdf`, `salt`/`hexsalt`, `header`/`hexheader`.
//!
//! Параметр, заданный явно, "закрепляется" флагом в KeyContext и переживает
//! последующие разборы без этого параметра; пустое значение снимает закрепление.

use log::debug;

use crate::consts::{is_valid_page_size, HEADER_LEN, KEY_LEN, MAGIC_HEADER, SALT_LEN, SKIP_HEADER_BYTES};
use crate::crypto::RandomSource;
use crate::error::{Error, Result};
use crate::uri::{hex_val, UriParams};

use super::context::{Kdf, KeyContext, KeyFlags};

/// Outcome of reading a 16-byte parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriBytes {
    /// Value written to `out`.
    Set,
    /// Parameter present with an empty value.
    Empty,
    NotFound,
}

/// Read `name` (raw) or `hex<name>` into `out`, zero-padding short values.
///
/// Raw values take 1..=out.len() bytes. Hex values take 2..=2*out.len() digits;
/// an odd trailing digit fills the high nibble of the last byte.
pub fn uri_bytes(uri: &UriParams, name: &str, out: &mut [u8]) -> Result<UriBytes> {
    let hex_name = format!("hex{}", name);
    let raw = uri.get(name);
    let hex = uri.get(&hex_name);
    let max = out.len();

    match (raw, hex) {
        (Some(_), Some(_)) => Err(Error::misuse(format!("both {} and {} given", name, hex_name))),
        (Some(v), None) => {
            if v.is_empty() {
                return Ok(UriBytes::Empty);
            }
            if v.len() > max {
                return Err(Error::misuse(format!("{} longer than {} bytes", name, max)));
            }
            out.fill(0);
            out[..v.len()].copy_from_slice(v);
            Ok(UriBytes::Set)
        }
        (None, Some(v)) => {
            if v.is_empty() {
                return Ok(UriBytes::Empty);
            }
            if v.len() < 2 || v.len() > 2 * max {
                return Err(Error::misuse(format!("{}: {} hex digits", hex_name, v.len())));
            }
            let mut decoded = vec![0u8; max];
            for (i, c) in v.iter().enumerate() {
                let nib = hex_val(*c)
                    .ok_or_else(|| Error::misuse(format!("{}: non-hex character", hex_name)))?;
                if i % 2 == 0 {
                    decoded[i / 2] = nib << 4;
                } else {
                    decoded[i / 2] |= nib;
                }
            }
            out.copy_from_slice(&decoded);
            Ok(UriBytes::Set)
        }
        (None, None) => Ok(UriBytes::NotFound),
    }
}

/// Apply URI parameters to `ctx`. Fills a random salt (and header) when none is
/// pinned. On error `ctx` may be partially updated and must be discarded.
pub fn parse_uri_config(ctx: &mut KeyContext, uri: &UriParams, rng: &dyn RandomSource) -> Result<()> {
    // page_size
    let page_size = uri.int64("page_size", -1);
    if page_size > 0 {
        let ps = page_size as usize;
        if ps != ctx.page_size {
            if page_size > i64::from(u32::MAX) || !is_valid_page_size(ps) {
                return Err(Error::misuse(format!("page_size={} is not a power of two in 512..=65536", page_size)));
            }
            ctx.page_size = ps;
        }
        ctx.flags.insert(KeyFlags::HAS_PAGESIZE);
    } else if page_size == 0 {
        ctx.page_size = 0;
        ctx.flags.remove(KeyFlags::HAS_PAGESIZE);
    }

    // skip
    let mut skip_value = uri.get("skip");
    if skip_value.map(|v| v.is_empty()).unwrap_or(false) {
        ctx.flags.remove(KeyFlags::HAS_SKIP);
        skip_value = None;
    }
    let skip = if skip_value.is_some() { uri.int64("skip", -1) } else { -1 };
    if skip >= 0 {
        ctx.skip = skip as usize;
        ctx.flags.insert(KeyFlags::HAS_SKIP);
    } else if !ctx.flags.contains(KeyFlags::HAS_SKIP) {
        ctx.skip = SKIP_HEADER_BYTES;
    }
    let limit = if page_size > 0 { page_size as usize } else { ctx.page_size };
    if limit > 0 && ctx.skip > limit {
        return Err(Error::misuse(format!("skip={} exceeds page size {}", ctx.skip, limit)));
    }

    // kdf
    let mut kdf_value = uri.get("kdf");
    if kdf_value.map(|v| v.is_empty()).unwrap_or(false) {
        ctx.flags.remove(KeyFlags::HAS_KDF);
        kdf_value = None;
    }
    match kdf_value {
        None => {
            if !ctx.flags.contains(KeyFlags::HAS_KDF) {
                ctx.kdf = Kdf::Pbkdf2HmacSha256;
            }
        }
        Some(b"none") if ctx.passphrase_len() == Some(KEY_LEN) => {
            ctx.kdf = Kdf::None;
            ctx.flags.insert(KeyFlags::HAS_KDF);
        }
        Some(_) => {
            return Err(Error::misuse("kdf must be 'none' with a 32-byte key"));
        }
    }
    if ctx.kdf == Kdf::None {
        if let Some(len) = ctx.passphrase_len() {
            if len != KEY_LEN {
                return Err(Error::misuse(format!("kdf=none needs a {}-byte key, got {}", KEY_LEN, len)));
            }
        }
    }

    // salt
    let mut salt = [0u8; SALT_LEN];
    match uri_bytes(uri, "salt", &mut salt)? {
        UriBytes::Set => {
            if ctx.passphrase_len().is_none() {
                return Err(Error::misuse("salt given without a key"));
            }
            ctx.salt = salt;
            ctx.flags.insert(KeyFlags::HAS_SALT);
        }
        UriBytes::Empty => {
            rng.fill(&mut ctx.salt);
            ctx.flags.remove(KeyFlags::HAS_SALT);
        }
        UriBytes::NotFound => {
            if !ctx.flags.intersects(KeyFlags::HAS_KEY | KeyFlags::HAS_SALT) {
                rng.fill(&mut ctx.salt);
            }
        }
    }
    if ctx.kdf == Kdf::None && ctx.flags.contains(KeyFlags::HAS_SALT) {
        return Err(Error::misuse("salt is meaningless with kdf=none"));
    }

    // header
    let mut header = [0u8; HEADER_LEN];
    match uri_bytes(uri, "header", &mut header)? {
        UriBytes::Set => {
            if ctx.kdf == Kdf::None || ctx.flags.contains(KeyFlags::HAS_SALT) {
                ctx.header = header;
                ctx.flags.insert(KeyFlags::HAS_HEADER);
            } else {
                return Err(Error::misuse("header requires an explicit salt"));
            }
        }
        found => {
            if found == UriBytes::Empty {
                ctx.flags.remove(KeyFlags::HAS_HEADER);
            }
            if !ctx.flags.contains(KeyFlags::HAS_HEADER) {
                if ctx.kdf == Kdf::None {
                    let keep = ctx.skip.min(HEADER_LEN);
                    ctx.header[..keep].copy_from_slice(&MAGIC_HEADER[..keep]);
                    rng.fill(&mut ctx.header[keep..]);
                } else {
                    ctx.header = ctx.salt;
                }
            }
        }
    }

    debug!(
        "codec params: page_size={} skip={} kdf={:?} flags={:?}",
        ctx.page_size, ctx.skip, ctx.kdf, ctx.flags
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ChaChaRng;
    use crate::error::ErrorCode;

    fn rng() -> ChaChaRng {
        ChaChaRng::from_seed([11; 32])
    }

    fn parse(ctx: &mut KeyContext, uri: &str) -> Result<()> {
        parse_uri_config(ctx, &UriParams::parse(uri), &rng())
    }

    fn misuse(ctx: &mut KeyContext, uri: &str) {
        let err = parse(ctx, uri).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Misuse, "{}", uri);
    }

    #[test]
    fn raw_and_hex_bytes() {
        let mut out = [0xAAu8; 16];
        let u = UriParams::parse("file:x?salt=abc");
        assert_eq!(uri_bytes(&u, "salt", &mut out).unwrap(), UriBytes::Set);
        assert_eq!(&out[..4], b"abc\0");

        let u = UriParams::parse("file:x?hexsalt=0aFf1");
        assert_eq!(uri_bytes(&u, "salt", &mut out).unwrap(), UriBytes::Set);
        assert_eq!(&out[..4], &[0x0a, 0xff, 0x10, 0x00]);

        let u = UriParams::parse("file:x?salt=");
        assert_eq!(uri_bytes(&u, "salt", &mut out).unwrap(), UriBytes::Empty);
        let u = UriParams::parse("file:x");
        assert_eq!(uri_bytes(&u, "salt", &mut out).unwrap(), UriBytes::NotFound);
    }

    #[test]
    fn bad_bytes_are_misuse() {
        let mut out = [0u8; 16];
        for uri in [
            "file:x?salt=a&hexsalt=00",
            "file:x?salt=0123456789abcdefX",
            "file:x?hexsalt=0",
            "file:x?hexsalt=zz",
            "file:x?hexsalt=000000000000000000000000000000000",
        ] {
            let u = UriParams::parse(uri);
            assert!(uri_bytes(&u, "salt", &mut out).is_err(), "{}", uri);
        }
    }

    #[test]
    fn defaults_randomize_salt_and_copy_header() {
        let mut ctx = KeyContext::new(b"pw", 1);
        parse(&mut ctx, "file:x").unwrap();
        assert_ne!(ctx.salt, [0u8; 16]);
        assert_eq!(ctx.header, ctx.salt);
        assert_eq!(ctx.kdf, Kdf::Pbkdf2HmacSha256);
        assert_eq!(ctx.skip, SKIP_HEADER_BYTES);
        assert!(ctx.flags.is_empty());
    }

    #[test]
    fn page_size_rules() {
        let mut ctx = KeyContext::new(b"pw", 1);
        parse(&mut ctx, "file:x?page_size=8192").unwrap();
        assert_eq!(ctx.page_size, 8192);
        assert!(ctx.flags.contains(KeyFlags::HAS_PAGESIZE));
        // закреплённый размер не сбрасывается разбором без параметра
        parse(&mut ctx, "file:x").unwrap();
        assert_eq!(ctx.page_size, 8192);
        parse(&mut ctx, "file:x?page_size=0").unwrap();
        assert_eq!(ctx.page_size, 0);
        assert!(!ctx.flags.contains(KeyFlags::HAS_PAGESIZE));

        for bad in ["1000", "256", "131072"] {
            let mut ctx = KeyContext::new(b"pw", 1);
            misuse(&mut ctx, &format!("file:x?page_size={}", bad));
        }
    }

    #[test]
    fn skip_rules() {
        let mut ctx = KeyContext::new(b"pw", 1);
        parse(&mut ctx, "file:x?skip=32").unwrap();
        assert_eq!(ctx.skip, 32);
        parse(&mut ctx, "file:x").unwrap();
        assert_eq!(ctx.skip, 32);
        parse(&mut ctx, "file:x?skip=").unwrap();
        assert_eq!(ctx.skip, SKIP_HEADER_BYTES);

        let mut ctx = KeyContext::new(b"pw", 1);
        misuse(&mut ctx, "file:x?page_size=512&skip=513");
    }

    #[test]
    fn kdf_none_needs_raw_key() {
        let mut ctx = KeyContext::new(&[7u8; 32], 1);
        parse(&mut ctx, "file:x?kdf=none").unwrap();
        assert_eq!(ctx.kdf, Kdf::None);

        let mut ctx = KeyContext::new(&[7u8; 31], 1);
        misuse(&mut ctx, "file:x?kdf=none");
        let mut ctx = KeyContext::new(&[7u8; 32], 1);
        misuse(&mut ctx, "file:x?kdf=scrypt");
        let mut ctx = KeyContext::new(&[7u8; 32], 1);
        misuse(&mut ctx, "file:x?kdf=none&salt=abc");
    }

    #[test]
    fn kdf_none_header_keeps_magic_prefix() {
        let mut ctx = KeyContext::new(&[7u8; 32], 1);
        parse(&mut ctx, "file:x?kdf=none&skip=6").unwrap();
        assert_eq!(&ctx.header[..6], b"SQLite");
    }

    #[test]
    fn salt_and_header_rules() {
        let mut ctx = KeyContext::new(b"pw", 1);
        parse(&mut ctx, "file:x?salt=pepper&header=hdr").unwrap();
        assert_eq!(&ctx.salt[..7], b"pepper\0");
        assert_eq!(&ctx.header[..4], b"hdr\0");
        assert!(ctx.flags.contains(KeyFlags::HAS_SALT | KeyFlags::HAS_HEADER));

        let mut ctx = KeyContext::new(b"pw", 1);
        misuse(&mut ctx, "file:x?header=hdr");

        let mut ctx = KeyContext::new(b"pw", 1).inherit();
        misuse(&mut ctx, "file:x?salt=abc");
    }

    #[test]
    fn empty_salt_regenerates() {
        let r = rng();
        let mut ctx = KeyContext::new(b"pw", 1);
        parse_uri_config(&mut ctx, &UriParams::parse("file:x?salt=fixed"), &r).unwrap();
        parse_uri_config(&mut ctx, &UriParams::parse("file:x?salt="), &r).unwrap();
        let first = ctx.salt;
        assert!(!ctx.flags.contains(KeyFlags::HAS_SALT));
        parse_uri_config(&mut ctx, &UriParams::parse("file:x?salt="), &r).unwrap();
        assert_ne!(first, ctx.salt);
    }

    #[test]
    fn derived_key_keeps_salt() {
        let mut ctx = KeyContext::new(b"pw", 1);
        parse(&mut ctx, "file:x").unwrap();
        ctx.run_kdf();
        let salt = ctx.salt;
        parse(&mut ctx, "file:x").unwrap();
        assert_eq!(salt, ctx.salt);
    }
}
