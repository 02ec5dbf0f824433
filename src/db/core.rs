//! db/core - Connection: список баз, поиск по имени, строки, статус.

use serde::Serialize;

use crate::attach::{codec_set_to, AttachState};
use crate::codec::codec_of;
use crate::config::SleetConfig;
use crate::error::{Error, Result};
use crate::pager::{BusyHandler, FilePager};

use super::rows::{append_rows, read_rows};

/// Name of the database opened by `Connection::open`.
pub const MAIN_DB: &str = "main";

/// One database file of a connection.
pub struct Database {
    pub(crate) name: String,
    pub(crate) pager: FilePager,
    pub(crate) state: AttachState,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    pub fn pager(&self) -> &FilePager {
        &self.pager
    }
}

pub struct Connection {
    // [0] - main
    pub(crate) dbs: Vec<Database>,
    pub(crate) cfg: SleetConfig,
    // Размер страницы для следующего ключа/attach (0 - не задан).
    pub(crate) next_page_size: usize,
}

/// Summary of one database, as printed by `sleet status`.
#[derive(Debug, Clone, Serialize)]
pub struct DbStatus {
    pub name: String,
    pub path: String,
    pub page_size: usize,
    pub pages: u32,
    pub reserved: usize,
    pub encrypted: bool,
    pub codec_state: String,
    pub attach_state: String,
    pub rows: Option<u64>,
}

impl Connection {
    pub fn config(&self) -> &SleetConfig {
        &self.cfg
    }

    /// Page size applied to the next keyed or attached database unless a
    /// `page_size` URI parameter pins one. 0 clears it.
    pub fn set_next_page_size(&mut self, page_size: usize) -> Result<()> {
        if page_size != 0 && !crate::consts::is_valid_page_size(page_size) {
            return Err(Error::misuse(format!("invalid page size {}", page_size)));
        }
        self.next_page_size = page_size;
        Ok(())
    }

    pub fn next_page_size(&self) -> usize {
        self.next_page_size
    }

    pub fn database_names(&self) -> Vec<&str> {
        self.dbs.iter().map(|d| d.name.as_str()).collect()
    }

    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.dbs.iter().position(|d| d.name == name)
    }

    pub(crate) fn index(&self, name: &str) -> Result<usize> {
        self.find(name).ok_or_else(|| Error::UnknownDb(name.to_string()))
    }

    pub fn database(&self, name: &str) -> Result<&Database> {
        let idx = self.index(name)?;
        Ok(&self.dbs[idx])
    }

    pub fn state(&self, name: &str) -> Result<AttachState> {
        Ok(self.database(name)?.state)
    }

    /// Direct pager access (tests, maintenance tools).
    pub fn pager_mut(&mut self, name: &str) -> Result<&mut FilePager> {
        let idx = self.index(name)?;
        Ok(&mut self.dbs[idx].pager)
    }

    pub fn set_busy_handler(&mut self, name: &str, handler: Option<Box<dyn BusyHandler>>) -> Result<()> {
        self.pager_mut(name)?.set_busy_handler(handler);
        Ok(())
    }

    /// Refuse I/O on a rejected database; verify a never-keyed one as plaintext.
    pub(crate) fn ensure_usable(&mut self, idx: usize) -> Result<()> {
        let db = &mut self.dbs[idx];
        match db.state {
            AttachState::Rejected(_) => Err(Error::NotADb),
            AttachState::Unattached => codec_set_to(&mut db.pager, None, &mut db.state),
            AttachState::Attaching | AttachState::Verified => Ok(()),
        }
    }

    // ---------------------- rows ----------------------

    pub fn insert(&mut self, name: &str, row: &[u8]) -> Result<u64> {
        self.insert_many(name, std::iter::once(row))
    }

    /// Append rows in one transaction; returns the database's row count.
    pub fn insert_many<I, R>(&mut self, name: &str, rows: I) -> Result<u64>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let idx = self.index(name)?;
        self.ensure_usable(idx)?;
        append_rows(&mut self.dbs[idx].pager, rows)
    }

    pub fn rows(&mut self, name: &str) -> Result<Vec<Vec<u8>>> {
        let idx = self.index(name)?;
        self.ensure_usable(idx)?;
        read_rows(&mut self.dbs[idx].pager)
    }

    pub fn status(&mut self, name: &str) -> Result<DbStatus> {
        let idx = self.index(name)?;
        let db = &mut self.dbs[idx];
        let rows = if db.state == AttachState::Verified {
            db.pager.shared_lock()?;
            let h = db.pager.header();
            db.pager.unlock_if_unused();
            h?.map(|h| h.row_count)
        } else {
            None
        };
        let codec = codec_of(&db.pager);
        Ok(DbStatus {
            name: db.name.clone(),
            path: db.pager.path().display().to_string(),
            page_size: db.pager.page_size(),
            pages: db.pager.page_count(),
            reserved: db.pager.reserved(),
            encrypted: codec.is_some(),
            codec_state: codec.map(|c| c.state().name()).unwrap_or("none").to_string(),
            attach_state: format!("{:?}", db.state),
            rows,
        })
    }
}
