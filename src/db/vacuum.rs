//! db/vacuum - перезапись всей базы с новым резервом на странице.
//!
//! Все строки читаются в текущей раскладке (через кодек-читатель), затем в одной
//! транзакции поток укладывается заново с `reserved` байтами в конце каждой
//! страницы (через кодек-писатель), файл усекается или растёт. Используется при
//! включении (reserved = 32) и снятии (reserved = 0) шифрования.
//! Любая ошибка - rollback, файл остаётся прежним.

use log::info;

use crate::consts::pending_byte_page;
use crate::error::{Error, Result};
use crate::pager::{DbHeader, FilePager};

use super::rows::{read_stream, write_stream, StreamLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumSummary {
    pub pages_before: u32,
    pub pages_after: u32,
    pub rows: u64,
}

/// Rewrite the database with `reserved` trailer bytes per page.
/// An empty database is left alone.
pub fn vacuum(pager: &mut FilePager, reserved: usize) -> Result<VacuumSummary> {
    if reserved >= pager.page_size() / 2 {
        return Err(Error::misuse(format!("reserved {} too large", reserved)));
    }
    pager.shared_lock()?;
    let header = match pager.header() {
        Ok(Some(h)) => h,
        Ok(None) => {
            pager.unlock_if_unused();
            return Ok(VacuumSummary {
                pages_before: 0,
                pages_after: 0,
                rows: 0,
            });
        }
        Err(e) => {
            pager.unlock_if_unused();
            return Err(e);
        }
    };
    let stream = match read_stream(pager, &header) {
        Ok(s) => s,
        Err(e) => {
            pager.unlock_if_unused();
            return Err(e);
        }
    };
    let pages_before = pager.page_count();

    if let Err(e) = pager.begin_write() {
        pager.unlock_if_unused();
        return Err(e);
    }
    let result = rewrite(pager, &header, &stream, reserved).and_then(|pages| {
        pager.commit()?;
        Ok(pages)
    });
    let pages_after = match result {
        Ok(p) => p,
        Err(e) => {
            let _ = pager.rollback();
            pager.unlock_if_unused();
            return Err(e);
        }
    };

    let ps = pager.page_size();
    let layout = pager.set_page_layout(ps, reserved);
    pager.unlock_if_unused();
    layout?;

    info!(
        "{}: vacuum to {} reserved byte(s): {} -> {} pages, {} rows",
        pager.path().display(),
        reserved,
        pages_before,
        pages_after,
        header.row_count
    );
    Ok(VacuumSummary {
        pages_before,
        pages_after,
        rows: header.row_count,
    })
}

fn rewrite(pager: &mut FilePager, old: &DbHeader, stream: &[u8], reserved: usize) -> Result<u32> {
    let mut header = *old;
    header.reserved = reserved as u8;
    let layout = StreamLayout::for_header(&header);
    let needed = layout.pages_for(stream.len() as u64);
    let pending = pending_byte_page(pager.page_size());

    for pgno in 1..=needed {
        if pgno == pending {
            continue;
        }
        let page = pager.write(pgno)?;
        page.fill(0);
    }
    header.page_count = needed;
    pager.set_header(&header)?;
    write_stream(pager, &layout, 0, stream)?;
    pager.truncate(needed)?;
    Ok(needed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::rows::{append_rows, read_rows};
    use crate::uri::UriParams;

    fn unique_path(prefix: &str) -> std::path::PathBuf {
        let pid = std::process::id();
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("{}-{}-{}.db", prefix, pid, t))
    }

    #[test]
    fn vacuum_changes_reserve_and_keeps_rows() {
        let path = unique_path("sleet-vacuum");
        let mut pager = FilePager::open(UriParams::parse(path.to_str().unwrap()), 512, false).unwrap();
        let rows: Vec<Vec<u8>> = (0..200u32).map(|i| format!("row-{:05}", i).into_bytes()).collect();
        append_rows(&mut pager, rows.iter()).unwrap();
        let before = pager.page_count();

        let s = vacuum(&mut pager, 64).unwrap();
        assert_eq!(s.rows, 200);
        assert!(s.pages_after > before);
        assert_eq!(pager.header().unwrap().unwrap().reserved, 64);
        assert_eq!(read_rows(&mut pager).unwrap(), rows);

        let s = vacuum(&mut pager, 0).unwrap();
        assert_eq!(s.pages_after, before);
        assert_eq!(read_rows(&mut pager).unwrap(), rows);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_database_is_noop() {
        let path = unique_path("sleet-vacuum-empty");
        let mut pager = FilePager::open(UriParams::parse(path.to_str().unwrap()), 1024, false).unwrap();
        let s = vacuum(&mut pager, 32).unwrap();
        assert_eq!(s.pages_after, 0);
        assert_eq!(pager.page_count(), 0);
        let _ = std::fs::remove_file(&path);
    }
}
