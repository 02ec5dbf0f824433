//! pager - хост-пейджер: одна база = один файл страниц фиксированного размера.
//!
//! Подмодули:
//! - core.rs    - структура FilePager, open(), раскладка страниц, установка кодека.
//! - header.rs  - 100-байтовый заголовок базы на странице 1.
//! - lock.rs    - shared/exclusive блокировки (fs2) + BusyHandler.
//! - io.rs      - чтение/запись страниц через кодек, кэш страниц.
//! - commit.rs  - begin_write/commit/rollback.
//! - journal.rs - rollback-журнал `<db>-journal` и его проигрывание (hot journal).
//!
//! Каждая страница проходит через `PageTransform` до/после page cache:
//! decode на чтении, encode на записи (основной файл и журнал).

use std::any::Any;

use crate::consts::Pgno;
use crate::error::Result;

pub mod commit;
pub mod core;
pub mod header;
pub mod io;
pub mod journal;
pub mod lock;

pub use self::core::FilePager;
pub use header::DbHeader;
pub use lock::{BusyHandler, BusyTimeout};

/// Why a page is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Journal image validated during rollback/hot-journal playback.
    JournalDecrypt,
    /// Page re-read after a rollback invalidated the cached copy.
    Reload,
    /// Ordinary page load.
    Load,
}

/// Why a page is being encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Original image copied into the rollback journal (reader role).
    JournalPage,
    /// Page written to the database file (writer role).
    DatabasePage,
}

/// Pluggable page transform held by the pager.
pub trait PageTransform: Send {
    /// Decode `page` in place. On error the buffer must not be handed to the caller.
    fn decode(&mut self, page: &mut [u8], pgno: Pgno, mode: DecodeMode) -> Result<()>;

    /// Encode `page`; the caller's buffer is never modified. The result may borrow
    /// internal scratch space valid until the next call.
    fn encode<'a>(&'a mut self, page: &'a [u8], pgno: Pgno, mode: EncodeMode) -> Result<&'a [u8]>;

    /// Trailer bytes every page must leave free.
    fn reserved_bytes(&self) -> usize;

    /// Page size the transform operates on.
    fn page_size(&self) -> usize;

    /// Called when the pager is asked to switch to `new_page_size` with `reserved`
    /// trailer bytes. Returns the page size to use, or disables the transform.
    fn page_size_changed(&mut self, new_page_size: usize, reserved: usize) -> Result<usize>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}
