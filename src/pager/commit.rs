//! pager/commit - транзакция записи.
//!
//! begin_write: shared → exclusive lock, создание журнала, страница 1 сразу в журнал.
//! commit:
//!   1) проверка резерва кодека против заголовка (MISUSE),
//!   2) заголовок: change counter, page count,
//!   3) журнал: образы усекаемых страниц, fsync,
//!   4) dirty-страницы по возрастанию через кодек (DatabasePage),
//!   5) truncate + fsync файла, удаление журнала.
//! rollback: если в файл уже что-то записано - проигрывание журнала; иначе журнал просто удаляется
//! (файл не тронут, байт-в-байт).

use std::collections::HashSet;

use log::{debug, warn};

use crate::consts::{pending_byte_page, Pgno};
use crate::error::{Error, Result};

use super::core::FilePager;
use super::header::DbHeader;
use super::journal::Journal;
use super::lock::LockMode;

pub(crate) struct WriteTxn {
    pub(crate) journal: Journal,
    pub(crate) orig_size: Pgno,
    pub(crate) journaled: HashSet<Pgno>,
    pub(crate) db_written: bool,
}

impl FilePager {
    pub fn begin_write(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Ok(());
        }
        self.shared_lock()?;
        self.lock.acquire(LockMode::Exclusive, &mut self.busy)?;

        let journal = match Journal::create(&self.journal_path, self.page_size, self.db_size) {
            Ok(j) => j,
            Err(e) => {
                self.lock.downgrade();
                return Err(e);
            }
        };
        self.txn = Some(WriteTxn {
            journal,
            orig_size: self.db_size,
            journaled: HashSet::new(),
            db_written: false,
        });

        if self.db_size > 0 {
            if let Err(e) = self.mark_dirty(1) {
                let _ = self.rollback();
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let Some(orig_size) = self.txn.as_ref().map(|t| t.orig_size) else {
            return Ok(());
        };

        if self.db_size > 0 {
            let mut header = DbHeader::read(self.read(1)?);
            let required = self.codec.as_ref().map(|c| c.reserved_bytes()).unwrap_or(0);
            if required > header.reserved as usize {
                return Err(Error::misuse(format!(
                    "codec needs {} reserved bytes per page, database has {}",
                    required, header.reserved
                )));
            }
            header.change_counter = header.change_counter.wrapping_add(1);
            header.page_count = self.db_size;
            self.set_header(&header)?;
        }

        let pending = pending_byte_page(self.page_size);
        for pgno in self.db_size + 1..=orig_size.min(self.file_pages) {
            if pgno != pending {
                self.journal_page(pgno)?;
            }
        }
        if self.data_fsync {
            if let Some(t) = self.txn.as_mut() {
                t.journal.sync()?;
            }
        }

        let pages: Vec<Pgno> = self.dirty.iter().copied().filter(|p| *p <= self.db_size).collect();
        for pgno in &pages {
            self.write_page_to_file(*pgno)?;
        }
        if self.db_size < self.file_pages {
            if let Some(t) = self.txn.as_mut() {
                t.db_written = true;
            }
        }
        self.file.set_len(self.db_size as u64 * self.page_size as u64)?;
        if self.data_fsync {
            self.file.sync_all()?;
        }

        if let Some(txn) = self.txn.take() {
            debug!(
                "{}: committed {} page(s), {} journal record(s)",
                self.path.display(),
                pages.len(),
                txn.journal.records()
            );
            let jpath = txn.journal.path().to_path_buf();
            drop(txn);
            std::fs::remove_file(&jpath)?;
        }
        self.dirty.clear();
        self.file_pages = self.db_size;
        self.lock.downgrade();
        Ok(())
    }

    /// Abandon the write transaction, restoring the file from the journal if the
    /// commit had already started writing it.
    pub fn rollback(&mut self) -> Result<()> {
        let Some(txn) = self.txn.take() else {
            return Ok(());
        };
        let orig_size = txn.orig_size;
        let db_written = txn.db_written;
        drop(txn);

        let dirty: Vec<Pgno> = std::mem::take(&mut self.dirty).into_iter().collect();
        for pgno in &dirty {
            self.cache.remove(pgno);
        }
        self.cache.retain(|p, _| *p <= orig_size);
        self.db_size = orig_size;

        let result = if db_written {
            warn!("{}: rolling back partially written commit", self.path.display());
            let clean: Vec<Pgno> = self.cache.keys().copied().collect();
            self.cache.clear();
            let r = self.playback_journal().map(|_| ());
            self.file_pages = orig_size;
            if r.is_ok() {
                self.reload_cached(clean);
            }
            r
        } else {
            std::fs::remove_file(&self.journal_path).map_err(Error::from)
        };

        self.lock.downgrade();
        result
    }
}
