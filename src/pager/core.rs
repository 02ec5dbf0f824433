//! pager/core - ядро FilePager: структура, open(), раскладка страниц, кодек, блокировки.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;

use crate::consts::{is_valid_page_size, Pgno, DB_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::uri::UriParams;

use super::commit::WriteTxn;
use super::header::plaintext_page_size;
use super::lock::{BusyHandler, FileLock, LockMode};
use super::PageTransform;

/// Single-file page store with a decoded-page cache and a rollback journal.
pub struct FilePager {
    pub(crate) path: PathBuf,
    pub(crate) journal_path: PathBuf,
    pub(crate) uri: UriParams,
    pub(crate) file: File,

    pub(crate) page_size: usize,
    // Резерв в конце страницы для кодека (записывается в заголовок новых баз).
    pub(crate) reserved: usize,
    // Логическое число страниц (включая незакоммиченный рост).
    pub(crate) db_size: Pgno,
    // Число страниц, зафиксированных в файле.
    pub(crate) file_pages: Pgno,

    pub(crate) cache: HashMap<Pgno, Vec<u8>>,
    pub(crate) dirty: BTreeSet<Pgno>,
    pub(crate) txn: Option<WriteTxn>,

    pub(crate) lock: FileLock,
    pub(crate) busy: Option<Box<dyn BusyHandler>>,
    pub(crate) codec: Option<Box<dyn PageTransform>>,

    // Сбой N-й записи страницы в основной файл при следующем commit (тесты атомарности).
    pub(crate) write_fault: Option<(u32, WriteFault)>,
    pub(crate) data_fsync: bool,
}

/// How an injected page write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteFault {
    /// Error before the file is touched.
    Clean,
    /// Half the page reaches the file, then the error.
    Torn,
}

pub(crate) fn journal_path_for(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push("-journal");
    PathBuf::from(s)
}

impl FilePager {
    /// Open (creating if missing) the database file named by `uri`.
    /// `page_size` applies until a plaintext header or a codec says otherwise.
    pub fn open(uri: UriParams, page_size: usize, data_fsync: bool) -> Result<Self> {
        if !is_valid_page_size(page_size) {
            return Err(Error::misuse(format!("invalid page size {}", page_size)));
        }
        let path = uri.path().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let lock = FileLock::open(&path)?;
        let mut pager = Self {
            journal_path: journal_path_for(&path),
            path,
            uri,
            file,
            page_size,
            reserved: 0,
            db_size: 0,
            file_pages: 0,
            cache: HashMap::new(),
            dirty: BTreeSet::new(),
            txn: None,
            lock,
            busy: None,
            codec: None,
            write_fault: None,
            data_fsync,
        };
        pager.refresh()?;
        Ok(pager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uri(&self) -> &UriParams {
        &self.uri
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Number of pages in the database (including uncommitted growth).
    pub fn page_count(&self) -> Pgno {
        self.db_size
    }

    pub fn in_write_txn(&self) -> bool {
        self.txn.is_some()
    }

    pub fn set_data_fsync(&mut self, on: bool) {
        self.data_fsync = on;
    }

    pub fn set_busy_handler(&mut self, handler: Option<Box<dyn BusyHandler>>) {
        self.busy = handler;
    }

    /// Fail the `nth` (0-based) database-file page write of the next commit.
    pub fn inject_write_fault(&mut self, nth: u32) {
        self.write_fault = Some((nth, WriteFault::Clean));
    }

    /// Like `inject_write_fault`, but the failing write leaves half a page on disk.
    pub fn inject_torn_write(&mut self, nth: u32) {
        self.write_fault = Some((nth, WriteFault::Torn));
    }

    // ---------------------- codec ----------------------

    /// Install (or remove) the page transform; returns the previous one.
    pub fn set_codec(&mut self, codec: Option<Box<dyn PageTransform>>) -> Option<Box<dyn PageTransform>> {
        self.cache.clear();
        std::mem::replace(&mut self.codec, codec)
    }

    pub fn take_codec(&mut self) -> Option<Box<dyn PageTransform>> {
        self.set_codec(None)
    }

    pub fn codec(&self) -> Option<&dyn PageTransform> {
        self.codec.as_deref()
    }

    pub fn codec_mut(&mut self) -> Option<&mut (dyn PageTransform + 'static)> {
        self.codec.as_deref_mut()
    }

    /// Switch page size and trailer reservation. An installed codec whose page size
    /// differs is consulted first and may veto (MISUSE) or impose its own size.
    /// Whether `set_page_layout(page_size, reserved)` is acceptable, without changing anything.
    pub fn check_page_layout(&self, page_size: usize, reserved: usize) -> Result<()> {
        if !is_valid_page_size(page_size) {
            return Err(Error::misuse(format!("invalid page size {}", page_size)));
        }
        if reserved >= page_size / 2 {
            return Err(Error::misuse(format!("reserved {} too large for page size {}", reserved, page_size)));
        }
        if self.txn.is_some() && page_size != self.page_size {
            return Err(Error::misuse("page size cannot change inside a write transaction"));
        }
        Ok(())
    }

    pub fn set_page_layout(&mut self, page_size: usize, reserved: usize) -> Result<()> {
        let mut page_size = page_size;
        if let Some(codec) = self.codec.as_mut() {
            if codec.page_size() != page_size {
                page_size = codec.page_size_changed(page_size, reserved)?;
            }
        }
        self.check_page_layout(page_size, reserved)?;
        if page_size != self.page_size {
            debug!("{}: page size {} -> {}", self.path.display(), self.page_size, page_size);
            self.page_size = page_size;
            self.cache.clear();
            self.recount_pages()?;
        }
        self.reserved = reserved;
        Ok(())
    }

    // ---------------------- locking ----------------------

    /// Take the shared lock (busy-handler retries), play back a hot journal if one
    /// is found, and refresh the cached view of the file.
    pub fn shared_lock(&mut self) -> Result<()> {
        if self.lock.mode().is_some() {
            return Ok(());
        }
        self.lock.acquire(LockMode::Shared, &mut self.busy)?;

        if self.journal_path.exists() {
            if let Err(e) = self.lock.acquire(LockMode::Exclusive, &mut self.busy) {
                self.lock.release();
                return Err(e);
            }
            let played = self.playback_journal();
            self.lock.downgrade();
            if let Err(e) = played {
                self.lock.release();
                return Err(e);
            }
        }

        self.refresh()
    }

    /// Drop the lock unless a write transaction holds it.
    pub fn unlock_if_unused(&mut self) {
        if self.txn.is_none() {
            self.lock.release();
        }
    }

    pub fn clear_cache(&mut self) {
        if self.txn.is_none() {
            self.cache.clear();
        }
    }

    // ---------------------- helpers ----------------------

    fn recount_pages(&mut self) -> Result<()> {
        let len = self.file.metadata()?.len();
        self.file_pages = (len / self.page_size as u64) as Pgno;
        if self.txn.is_none() {
            self.db_size = self.file_pages;
        }
        Ok(())
    }

    /// Re-read file size; without a codec, learn the page size from a plaintext header.
    pub(crate) fn refresh(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Ok(());
        }
        self.cache.clear();
        if self.codec.is_none() {
            let len = self.file.metadata()?.len();
            if len >= DB_HEADER_SIZE as u64 {
                let mut head = [0u8; DB_HEADER_SIZE];
                self.file.seek(SeekFrom::Start(0))?;
                self.file.read_exact(&mut head)?;
                if let Some(ps) = plaintext_page_size(&head) {
                    self.page_size = ps;
                }
            }
        }
        self.recount_pages()
    }
}
