//! pager/journal - rollback-журнал `<db>-journal`.
//!
//! Формат:
//!   header (16 байт): magic "SLTJRNL1" | page_size u32 BE | orig_pages u32 BE
//!   records:          pgno u32 BE | образ страницы (page_size байт)
//!
//! Образы записываются в режиме JournalPage (ключ читателя), т.е. это валидные
//! страницы файла до начала транзакции. Неполная хвостовая запись игнорируется.
//! Журнал, найденный при взятии shared lock, - "горячий": он проигрывается
//! в основной файл и удаляется.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use log::{info, warn};

use crate::consts::{is_valid_page_size, Pgno};
use crate::error::Result;

use super::core::FilePager;
use super::DecodeMode;

pub const JOURNAL_MAGIC: &[u8; 8] = b"SLTJRNL1";
const JOURNAL_HEADER_LEN: usize = 16;

pub(crate) struct Journal {
    file: File,
    path: PathBuf,
    page_size: usize,
    records: u32,
}

impl Journal {
    pub(crate) fn create(path: &Path, page_size: usize, orig_pages: Pgno) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut hdr = [0u8; JOURNAL_HEADER_LEN];
        hdr[..8].copy_from_slice(JOURNAL_MAGIC);
        BigEndian::write_u32(&mut hdr[8..12], page_size as u32);
        BigEndian::write_u32(&mut hdr[12..16], orig_pages);
        file.write_all(&hdr)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            records: 0,
        })
    }

    pub(crate) fn append(&mut self, pgno: Pgno, image: &[u8]) -> Result<()> {
        debug_assert_eq!(image.len(), self.page_size);
        let mut pg = [0u8; 4];
        BigEndian::write_u32(&mut pg, pgno);
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&pg)?;
        self.file.write_all(image)?;
        self.records += 1;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn records(&self) -> u32 {
        self.records
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) struct HotJournal {
    pub page_size: usize,
    pub orig_pages: Pgno,
    pub records: Vec<(Pgno, Vec<u8>)>,
}

/// Parse a journal file; `None` if absent, empty or not a journal.
pub(crate) fn read_journal(path: &Path) -> Result<Option<HotJournal>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() < JOURNAL_HEADER_LEN || &bytes[..8] != JOURNAL_MAGIC {
        return Ok(None);
    }
    let page_size = BigEndian::read_u32(&bytes[8..12]) as usize;
    let orig_pages = BigEndian::read_u32(&bytes[12..16]);
    if !is_valid_page_size(page_size) {
        return Ok(None);
    }
    let rec_len = 4 + page_size;
    let records = bytes[JOURNAL_HEADER_LEN..]
        .chunks_exact(rec_len)
        .map(|r| (BigEndian::read_u32(&r[..4]), r[4..].to_vec()))
        .collect();
    Ok(Some(HotJournal {
        page_size,
        orig_pages,
        records,
    }))
}

impl FilePager {
    /// Restore the database file from `<db>-journal`, then delete the journal.
    /// Records are validated through the codec (JournalDecrypt) when it operates on
    /// the journal's page size; a record that fails validation aborts playback and
    /// leaves the journal in place.
    pub(crate) fn playback_journal(&mut self) -> Result<bool> {
        let Some(hot) = read_journal(&self.journal_path)? else {
            if self.journal_path.exists() {
                std::fs::remove_file(&self.journal_path)?;
            }
            return Ok(false);
        };

        let validate = self
            .codec
            .as_ref()
            .map(|c| c.page_size() == hot.page_size)
            .unwrap_or(false);

        for (pgno, image) in &hot.records {
            if *pgno == 0 || *pgno > hot.orig_pages {
                continue;
            }
            if validate {
                if let Some(codec) = self.codec.as_mut() {
                    let mut scratch = image.clone();
                    if let Err(e) = codec.decode(&mut scratch, *pgno, DecodeMode::JournalDecrypt) {
                        warn!(
                            "{}: journal record for page {} rejected: {}",
                            self.journal_path.display(),
                            pgno,
                            e
                        );
                        return Err(e);
                    }
                }
            }
            let off = (*pgno as u64 - 1) * hot.page_size as u64;
            self.file.seek(SeekFrom::Start(off))?;
            self.file.write_all(image)?;
        }
        self.file.set_len(hot.orig_pages as u64 * hot.page_size as u64)?;
        self.file.sync_all()?;
        std::fs::remove_file(&self.journal_path)?;
        info!(
            "{}: rolled back {} page(s) from journal",
            self.path.display(),
            hot.records.len()
        );
        Ok(true)
    }
}
