//! Константы формата страниц и кодека.
//!
//! Зашифрованная страница размера P:
//!   [0 .. P-32)      - шифротекст (для page 1 первые `skip` байт - открытый текст)
//!   [P-32 .. P-16)   - 16-байтовый nonce
//!   [P-16 .. P)      - 16-байтовый тег Poly1305

/// Page number (1-based, as the host pager counts them).
pub type Pgno = u32;

/// Plaintext magic string at the start of page 1 of every database.
pub const MAGIC_HEADER: &[u8; 16] = b"SQLite format 3\0";

// ----- Page geometry -----
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 65536;

/// Size of the database header on page 1.
pub const DB_HEADER_SIZE: usize = 100;

// ----- Reserved trailer -----
pub const PAGE_NONCE_LEN: usize = 16;
pub const PAGE_TAG_LEN: usize = 16;
pub const PAGE_RESERVED_LEN: usize = PAGE_NONCE_LEN + PAGE_TAG_LEN;

// ----- Key material -----
pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const HEADER_LEN: usize = 16;

/// Leading bytes of page 1 left unencrypted unless `skip=` overrides it.
pub const SKIP_HEADER_BYTES: usize = 0;

/// PBKDF2-HMAC-SHA256 iteration count used by default.
pub const PBKDF2_ITERATIONS: u32 = 12345;

/// Byte offset of the host engine's lock byte range; the page holding it is never used.
pub const PENDING_BYTE: u64 = 0x4000_0000;

// ----- Storage-format version stamped into header bytes [96..100) -----
pub const FORMAT_VERSION_NUMBER: u32 = 3_046_000;
pub const FORMAT_VERSION_MIN: u32 = 3_000_000;
pub const FORMAT_VERSION_MAX: u32 = 4_000_000;

/// Номер страницы, занятой PENDING_BYTE, для заданного размера страницы.
#[inline]
pub fn pending_byte_page(page_size: usize) -> Pgno {
    (PENDING_BYTE / page_size as u64) as Pgno + 1
}

/// Power of two within [MIN_PAGE_SIZE, MAX_PAGE_SIZE].
#[inline]
pub fn is_valid_page_size(page_size: usize) -> bool {
    (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) && page_size.is_power_of_two()
}
