//! db/rows - минимальное хранилище строк поверх страниц.
//!
//! Строки - последовательность записей `[len u32 BE][bytes]`, уложенная в поток
//! по полезной области страниц (page_size - reserved):
//!   page 1: [100 .. usable), далее страницы 2, 3, ... целиком до usable;
//!   страница PENDING_BYTE пропускается.
//! Заголовок хранит число строк и длину потока.

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::consts::{pending_byte_page, Pgno, DB_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::pager::{DbHeader, FilePager};

const LEN_PREFIX: usize = 4;

/// Mapping of stream offsets onto pages for one page size / reserve.
#[derive(Debug, Clone, Copy)]
pub struct StreamLayout {
    page_size: usize,
    usable: usize,
}

impl StreamLayout {
    pub fn new(page_size: usize, reserved: usize) -> Self {
        Self {
            page_size,
            usable: page_size - reserved,
        }
    }

    pub fn for_header(h: &DbHeader) -> Self {
        Self::new(h.page_size, h.reserved as usize)
    }

    fn first_capacity(&self) -> usize {
        self.usable - DB_HEADER_SIZE
    }

    /// Page and in-page offset holding stream byte `off`.
    pub fn locate(&self, off: u64) -> (Pgno, usize) {
        let cap1 = self.first_capacity() as u64;
        if off < cap1 {
            return (1, DB_HEADER_SIZE + off as usize);
        }
        let rem = off - cap1;
        let mut pgno = 2 + (rem / self.usable as u64) as Pgno;
        if pgno >= pending_byte_page(self.page_size) {
            pgno += 1;
        }
        (pgno, (rem % self.usable as u64) as usize)
    }

    /// Pages needed to hold a stream of `len` bytes (at least page 1).
    pub fn pages_for(&self, len: u64) -> Pgno {
        if len == 0 {
            return 1;
        }
        self.locate(len - 1).0
    }

    /// Contiguous chunk `(pgno, start, len)` at stream offset `off`, at most `want` bytes.
    fn chunk(&self, off: u64, want: usize) -> (Pgno, usize, usize) {
        let (pgno, start) = self.locate(off);
        (pgno, start, want.min(self.usable - start))
    }
}

/// Raw row stream of the database (empty for an empty database).
pub(crate) fn read_stream(pager: &mut FilePager, header: &DbHeader) -> Result<Vec<u8>> {
    let layout = StreamLayout::for_header(header);
    let total = header.stream_len;
    let mut out = Vec::with_capacity(total as usize);
    let mut off = 0u64;
    while off < total {
        let (pgno, start, n) = layout.chunk(off, (total - off) as usize);
        let page = pager.read(pgno)?;
        out.extend_from_slice(&page[start..start + n]);
        off += n as u64;
    }
    Ok(out)
}

/// Write `bytes` at stream offset `off`. Requires a write transaction.
pub(crate) fn write_stream(pager: &mut FilePager, layout: &StreamLayout, mut off: u64, bytes: &[u8]) -> Result<()> {
    let mut rest = bytes;
    while !rest.is_empty() {
        let (pgno, start, n) = layout.chunk(off, rest.len());
        let page = pager.write(pgno)?;
        page[start..start + n].copy_from_slice(&rest[..n]);
        rest = &rest[n..];
        off += n as u64;
    }
    Ok(())
}

/// Split a row stream into rows.
pub(crate) fn decode_rows(stream: &[u8], expected: u64) -> Result<Vec<Vec<u8>>> {
    let mut rows = Vec::with_capacity(expected as usize);
    let mut p = 0usize;
    while p < stream.len() {
        if p + LEN_PREFIX > stream.len() {
            return Err(Error::Corrupt(format!("truncated row length at stream offset {}", p)));
        }
        let len = BigEndian::read_u32(&stream[p..p + LEN_PREFIX]) as usize;
        p += LEN_PREFIX;
        if p + len > stream.len() {
            return Err(Error::Corrupt(format!("row of {} bytes overruns stream at offset {}", len, p)));
        }
        rows.push(stream[p..p + len].to_vec());
        p += len;
    }
    if rows.len() as u64 != expected {
        return Err(Error::Corrupt(format!(
            "header says {} rows, stream holds {}",
            expected,
            rows.len()
        )));
    }
    Ok(rows)
}

pub(crate) fn encode_rows<I, R>(rows: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for row in rows {
        let row = row.as_ref();
        let len = u32::try_from(row.len()).map_err(|_| Error::misuse("row larger than 4 GiB"))?;
        let mut prefix = [0u8; LEN_PREFIX];
        BigEndian::write_u32(&mut prefix, len);
        out.extend_from_slice(&prefix);
        out.extend_from_slice(row);
    }
    Ok(out)
}

/// All rows, in insertion order.
pub fn read_rows(pager: &mut FilePager) -> Result<Vec<Vec<u8>>> {
    pager.shared_lock()?;
    let result = match pager.header() {
        Ok(Some(h)) => read_stream(pager, &h).and_then(|s| decode_rows(&s, h.row_count)),
        Ok(None) => Ok(Vec::new()),
        Err(e) => Err(e),
    };
    pager.unlock_if_unused();
    result
}

/// Append rows in one write transaction; returns the new row count.
pub fn append_rows<I, R>(pager: &mut FilePager, rows: I) -> Result<u64>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[u8]>,
{
    let (bytes, added) = {
        let mut n = 0u64;
        let bytes = encode_rows(rows.into_iter().inspect(|_| n += 1))?;
        (bytes, n)
    };
    pager.begin_write()?;
    match append_in_txn(pager, &bytes, added) {
        Ok(count) => match pager.commit() {
            Ok(()) => {
                pager.unlock_if_unused();
                Ok(count)
            }
            Err(e) => {
                let _ = pager.rollback();
                pager.unlock_if_unused();
                Err(e)
            }
        },
        Err(e) => {
            let _ = pager.rollback();
            pager.unlock_if_unused();
            Err(e)
        }
    }
}

fn append_in_txn(pager: &mut FilePager, bytes: &[u8], added: u64) -> Result<u64> {
    pager.init_database()?;
    let mut header = pager
        .header()?
        .ok_or_else(|| Error::Internal("page 1 missing after init".into()))?;
    let layout = StreamLayout::for_header(&header);
    write_stream(pager, &layout, header.stream_len, bytes)?;
    header.stream_len += bytes.len() as u64;
    header.row_count += added;
    pager.set_header(&header)?;
    debug!(
        "{}: appended {} row(s), stream now {} bytes",
        pager.path().display(),
        added,
        header.stream_len
    );
    Ok(header.row_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_skips_header_and_pending_page() {
        let l = StreamLayout::new(512, 32);
        assert_eq!(l.locate(0), (1, 100));
        assert_eq!(l.locate(379), (1, 479));
        assert_eq!(l.locate(380), (2, 0));
        assert_eq!(l.locate(380 + 480), (3, 0));
        assert_eq!(l.pages_for(0), 1);
        assert_eq!(l.pages_for(380), 1);
        assert_eq!(l.pages_for(381), 2);

        let pending = pending_byte_page(512);
        let before = 380 + (pending as u64 - 3) * 480;
        assert_eq!(l.locate(before).0, pending - 1);
        assert_eq!(l.locate(before + 480).0, pending + 1);
    }

    #[test]
    fn row_codec() {
        let rows: Vec<&[u8]> = vec![b"a", b"", b"hello"];
        let s = encode_rows(rows.iter()).unwrap();
        assert_eq!(s.len(), 4 * 3 + 6);
        let back = decode_rows(&s, 3).unwrap();
        assert_eq!(back, vec![b"a".to_vec(), Vec::new(), b"hello".to_vec()]);
        assert!(decode_rows(&s, 2).is_err());
        assert!(decode_rows(&s[..s.len() - 1], 3).is_err());
    }
}
