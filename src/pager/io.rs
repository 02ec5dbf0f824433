//! pager/io - чтение/запись страниц:
//! - read: кэш → файл → decode (Load), ошибка кодека не попадает в кэш;
//! - write: страница помечается dirty, исходный образ уходит в журнал (JournalPage);
//! - truncate / init_database / header helpers;
//! - write_page_to_file: encode (DatabasePage) + запись, точка инъекции сбоя.

use std::io::{Read, Seek, SeekFrom, Write};

use log::{debug, warn};

use crate::consts::{pending_byte_page, Pgno};
use crate::error::{Error, Result};

use super::core::{FilePager, WriteFault};
use super::header::DbHeader;
use super::{DecodeMode, EncodeMode};

impl FilePager {
    /// Decoded contents of page `pgno` (1-based).
    pub fn read(&mut self, pgno: Pgno) -> Result<&[u8]> {
        self.load_page(pgno, DecodeMode::Load)?;
        self.cache
            .get(&pgno)
            .map(|p| p.as_slice())
            .ok_or_else(|| Error::Internal(format!("page {} missing from cache", pgno)))
    }

    /// Writable contents of page `pgno`; extends the database when `pgno` is past the end.
    /// Requires a write transaction.
    pub fn write(&mut self, pgno: Pgno) -> Result<&mut [u8]> {
        self.prepare_write(pgno)?;
        self.cache
            .get_mut(&pgno)
            .map(|p| p.as_mut_slice())
            .ok_or_else(|| Error::Internal(format!("page {} missing from cache", pgno)))
    }

    /// Mark a page dirty without touching its contents (forces a rewrite on commit).
    pub fn mark_dirty(&mut self, pgno: Pgno) -> Result<()> {
        self.prepare_write(pgno)
    }

    /// Shrink the database to `pages` pages at commit.
    pub fn truncate(&mut self, pages: Pgno) -> Result<()> {
        if self.txn.is_none() {
            return Err(Error::misuse("truncate outside a write transaction"));
        }
        if pages >= self.db_size {
            return Ok(());
        }
        let orig = self.txn.as_ref().map(|t| t.orig_size).unwrap_or(0);
        let pending = pending_byte_page(self.page_size);
        for pgno in pages + 1..=self.db_size.min(orig) {
            if pgno != pending {
                self.journal_page(pgno)?;
            }
        }
        for pgno in pages + 1..=self.db_size {
            self.cache.remove(&pgno);
            self.dirty.remove(&pgno);
        }
        self.db_size = pages;
        Ok(())
    }

    /// Create page 1 with a fresh header if the database is empty.
    pub fn init_database(&mut self) -> Result<()> {
        if self.db_size > 0 {
            return Ok(());
        }
        let header = DbHeader::new(self.page_size, self.reserved as u8);
        let page = self.write(1)?;
        header.write(page);
        Ok(())
    }

    /// Header of page 1, `None` for an empty database.
    pub fn header(&mut self) -> Result<Option<DbHeader>> {
        if self.db_size == 0 {
            return Ok(None);
        }
        Ok(Some(DbHeader::read(self.read(1)?)))
    }

    pub fn set_header(&mut self, header: &DbHeader) -> Result<()> {
        let page = self.write(1)?;
        header.write(page);
        Ok(())
    }

    // ---------------------- internals ----------------------

    pub(crate) fn load_page(&mut self, pgno: Pgno, mode: DecodeMode) -> Result<()> {
        if self.cache.contains_key(&pgno) {
            return Ok(());
        }
        self.shared_lock()?;
        if pgno == 0 || pgno > self.db_size {
            return Err(Error::Corrupt(format!(
                "page {} out of range (database has {} pages)",
                pgno, self.db_size
            )));
        }
        let mut buf = vec![0u8; self.page_size];
        if pgno <= self.file_pages && self.read_raw(pgno, &mut buf)? {
            if let Some(codec) = self.codec.as_mut() {
                codec.decode(&mut buf, pgno, mode)?;
            }
        }
        self.cache.insert(pgno, buf);
        Ok(())
    }

    fn read_raw(&mut self, pgno: Pgno, buf: &mut [u8]) -> Result<bool> {
        let off = (pgno as u64 - 1) * self.page_size as u64;
        let len = self.file.metadata()?.len();
        if off + buf.len() as u64 > len {
            return Ok(false);
        }
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(buf)?;
        Ok(true)
    }

    fn prepare_write(&mut self, pgno: Pgno) -> Result<()> {
        if self.txn.is_none() {
            return Err(Error::misuse("page write outside a write transaction"));
        }
        if pgno == 0 || pgno == pending_byte_page(self.page_size) {
            return Err(Error::Internal(format!("page {} is not writable", pgno)));
        }
        if pgno > self.db_size {
            let pending = pending_byte_page(self.page_size);
            for p in self.db_size + 1..=pgno {
                self.cache.insert(p, vec![0u8; self.page_size]);
                // страница PENDING_BYTE остаётся дырой в файле
                if p != pending {
                    self.dirty.insert(p);
                }
            }
            self.db_size = pgno;
            return Ok(());
        }
        self.load_page(pgno, DecodeMode::Load)?;
        self.journal_page(pgno)?;
        self.dirty.insert(pgno);
        Ok(())
    }

    /// Append the pre-transaction image of `pgno` to the journal (once per transaction).
    pub(crate) fn journal_page(&mut self, pgno: Pgno) -> Result<()> {
        let needed = match self.txn.as_ref() {
            Some(t) => pgno <= t.orig_size && !t.journaled.contains(&pgno),
            None => false,
        };
        if !needed {
            return Ok(());
        }
        self.load_page(pgno, DecodeMode::Load)?;
        let FilePager {
            cache, codec, txn, ..
        } = self;
        let page = cache
            .get(&pgno)
            .ok_or_else(|| Error::Internal(format!("page {} missing from cache", pgno)))?;
        let image: &[u8] = match codec.as_mut() {
            Some(c) => c.encode(page, pgno, EncodeMode::JournalPage)?,
            None => page,
        };
        if let Some(t) = txn.as_mut() {
            t.journal.append(pgno, image)?;
            t.journaled.insert(pgno);
        }
        Ok(())
    }

    /// Encode a dirty page and write it at its file offset.
    pub(crate) fn write_page_to_file(&mut self, pgno: Pgno) -> Result<()> {
        let mut torn = false;
        if let Some((n, kind)) = self.write_fault {
            if n == 0 {
                self.write_fault = None;
                warn!("{}: injected write fault at page {}", self.path.display(), pgno);
                match kind {
                    WriteFault::Clean => return Err(injected_fault("injected write fault")),
                    WriteFault::Torn => torn = true,
                }
            } else {
                self.write_fault = Some((n - 1, kind));
            }
        }

        let off = (pgno as u64 - 1) * self.page_size as u64;
        let FilePager {
            cache, codec, file, txn, ..
        } = self;
        let page = cache
            .get(&pgno)
            .ok_or_else(|| Error::Internal(format!("dirty page {} missing from cache", pgno)))?;
        let image: &[u8] = match codec.as_mut() {
            Some(c) => c.encode(page, pgno, EncodeMode::DatabasePage)?,
            None => page,
        };
        // дальше файл может измениться даже при ошибке: откат только через журнал
        if let Some(t) = txn.as_mut() {
            t.db_written = true;
        }
        file.seek(SeekFrom::Start(off))?;
        if torn {
            file.write_all(&image[..image.len() / 2])?;
            return Err(injected_fault("injected torn write"));
        }
        file.write_all(image)?;
        Ok(())
    }

    /// After a rollback, refresh still-cached clean pages from disk.
    pub(crate) fn reload_cached(&mut self, pages: Vec<Pgno>) {
        for pgno in pages {
            if pgno > self.db_size {
                continue;
            }
            if let Err(e) = self.load_page(pgno, DecodeMode::Reload) {
                debug!("reload of page {} failed: {}", pgno, e);
                self.cache.remove(&pgno);
            }
        }
    }
}

fn injected_fault(msg: &str) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.to_string()))
}
