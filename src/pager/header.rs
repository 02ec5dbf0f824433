//! Заголовок базы (первые 100 байт страницы 1), big-endian:
//!
//!   [0..16)   magic "SQLite format 3\0"
//!   [16..18)  page size (1 => 65536)
//!   [18], [19] write/read format version (1)
//!   [20]      reserved bytes per page
//!   [21..24)  64, 32, 32
//!   [24..28)  file change counter
//!   [28..32)  page count
//!   [72..80)  row count (u64)
//!   [80..88)  row stream length (u64)
//!   [96..100) format version number

use byteorder::{BigEndian, ByteOrder};

use crate::consts::{
    is_valid_page_size, DB_HEADER_SIZE, FORMAT_VERSION_MAX, FORMAT_VERSION_MIN,
    FORMAT_VERSION_NUMBER, MAGIC_HEADER,
};

const OFF_PAGE_SIZE: usize = 16;
const OFF_WRITE_VERSION: usize = 18;
const OFF_READ_VERSION: usize = 19;
const OFF_RESERVED: usize = 20;
const OFF_PAYLOAD_FRACTIONS: usize = 21;
const OFF_CHANGE_COUNTER: usize = 24;
const OFF_PAGE_COUNT: usize = 28;
const OFF_ROW_COUNT: usize = 72;
const OFF_STREAM_LEN: usize = 80;
const OFF_VERSION_NUMBER: usize = 96;

const PAYLOAD_FRACTIONS: [u8; 3] = [64, 32, 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHeader {
    pub page_size: usize,
    pub reserved: u8,
    pub change_counter: u32,
    pub page_count: u32,
    pub row_count: u64,
    pub stream_len: u64,
    pub version_number: u32,
}

impl DbHeader {
    pub fn new(page_size: usize, reserved: u8) -> Self {
        Self {
            page_size,
            reserved,
            change_counter: 0,
            page_count: 1,
            row_count: 0,
            stream_len: 0,
            version_number: FORMAT_VERSION_NUMBER,
        }
    }

    /// Decode without validation (see `looks_valid`).
    pub fn read(page: &[u8]) -> Self {
        let raw_ps = BigEndian::read_u16(&page[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 2]) as usize;
        Self {
            page_size: decode_page_size(raw_ps),
            reserved: page[OFF_RESERVED],
            change_counter: BigEndian::read_u32(&page[OFF_CHANGE_COUNTER..OFF_CHANGE_COUNTER + 4]),
            page_count: BigEndian::read_u32(&page[OFF_PAGE_COUNT..OFF_PAGE_COUNT + 4]),
            row_count: BigEndian::read_u64(&page[OFF_ROW_COUNT..OFF_ROW_COUNT + 8]),
            stream_len: BigEndian::read_u64(&page[OFF_STREAM_LEN..OFF_STREAM_LEN + 8]),
            version_number: BigEndian::read_u32(&page[OFF_VERSION_NUMBER..OFF_VERSION_NUMBER + 4]),
        }
    }

    pub fn write(&self, page: &mut [u8]) {
        page[..16].copy_from_slice(MAGIC_HEADER);
        BigEndian::write_u16(
            &mut page[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 2],
            encode_page_size(self.page_size),
        );
        page[OFF_WRITE_VERSION] = 1;
        page[OFF_READ_VERSION] = 1;
        page[OFF_RESERVED] = self.reserved;
        page[OFF_PAYLOAD_FRACTIONS..OFF_PAYLOAD_FRACTIONS + 3].copy_from_slice(&PAYLOAD_FRACTIONS);
        BigEndian::write_u32(&mut page[OFF_CHANGE_COUNTER..OFF_CHANGE_COUNTER + 4], self.change_counter);
        BigEndian::write_u32(&mut page[OFF_PAGE_COUNT..OFF_PAGE_COUNT + 4], self.page_count);
        BigEndian::write_u64(&mut page[OFF_ROW_COUNT..OFF_ROW_COUNT + 8], self.row_count);
        BigEndian::write_u64(&mut page[OFF_STREAM_LEN..OFF_STREAM_LEN + 8], self.stream_len);
        BigEndian::write_u32(&mut page[OFF_VERSION_NUMBER..OFF_VERSION_NUMBER + 4], self.version_number);
    }

    /// Usable bytes per page for row data.
    pub fn usable_size(&self) -> usize {
        self.page_size - self.reserved as usize
    }
}

#[inline]
fn decode_page_size(raw: usize) -> usize {
    if raw == 1 {
        65536
    } else {
        raw
    }
}

#[inline]
fn encode_page_size(ps: usize) -> u16 {
    if ps == 65536 {
        1
    } else {
        ps as u16
    }
}

/// Recognition check applied to a decoded page 1: magic, power-of-two page size
/// equal to `expected_page_size`, payload fractions, version number range.
pub fn looks_valid(page: &[u8], expected_page_size: usize) -> bool {
    if page.len() < DB_HEADER_SIZE || &page[..16] != MAGIC_HEADER {
        return false;
    }
    let raw_ps = BigEndian::read_u16(&page[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 2]) as usize;
    let ps = decode_page_size(raw_ps);
    if !is_valid_page_size(ps) || ps != expected_page_size {
        return false;
    }
    if page[OFF_PAYLOAD_FRACTIONS..OFF_PAYLOAD_FRACTIONS + 3] != PAYLOAD_FRACTIONS {
        return false;
    }
    let version = BigEndian::read_u32(&page[OFF_VERSION_NUMBER..OFF_VERSION_NUMBER + 4]);
    (FORMAT_VERSION_MIN..FORMAT_VERSION_MAX).contains(&version)
}

/// Page size recorded in a plaintext page-1 image, if it is one.
pub fn plaintext_page_size(raw: &[u8]) -> Option<usize> {
    if raw.len() < DB_HEADER_SIZE || &raw[..16] != MAGIC_HEADER {
        return None;
    }
    let ps = decode_page_size(BigEndian::read_u16(&raw[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 2]) as usize);
    is_valid_page_size(ps).then_some(ps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_validate() {
        let mut page = vec![0u8; 4096];
        let mut h = DbHeader::new(4096, 32);
        h.row_count = 7;
        h.stream_len = 1234;
        h.write(&mut page);
        assert!(looks_valid(&page, 4096));
        assert!(!looks_valid(&page, 1024));
        let back = DbHeader::read(&page);
        assert_eq!(back, h);
        assert_eq!(back.usable_size(), 4064);
    }

    #[test]
    fn page_size_one_means_65536() {
        let mut page = vec![0u8; 65536];
        DbHeader::new(65536, 0).write(&mut page);
        assert_eq!(&page[16..18], &[0, 1]);
        assert!(looks_valid(&page, 65536));
        assert_eq!(plaintext_page_size(&page), Some(65536));
    }

    #[test]
    fn rejects_bad_fields() {
        let mut page = vec![0u8; 512];
        DbHeader::new(512, 0).write(&mut page);

        let mut p = page.clone();
        p[22] = 31;
        assert!(!looks_valid(&p, 512));

        let mut p = page.clone();
        BigEndian::write_u32(&mut p[96..100], 4_000_000);
        assert!(!looks_valid(&p, 512));

        let mut p = page.clone();
        BigEndian::write_u16(&mut p[16..18], 768);
        assert!(!looks_valid(&p, 768));

        let mut p = page;
        p[0] ^= 1;
        assert!(!looks_valid(&p, 512));
    }
}
