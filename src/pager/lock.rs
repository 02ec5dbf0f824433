//! File-based locking for the pager.
//!
//! Cross-platform (fs2) advisory locks on `<db>-lock`:
//! - Shared: читатели (удерживается на время чтения / attach).
//! - Exclusive: единственный писатель (транзакция записи, проигрывание hot journal).
//!
//! Попытки неблокирующие; при конфликте вызывается BusyHandler, который решает,
//! повторять ли попытку. Без обработчика - сразу Error::Busy.
//! Lock is released on Drop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Decides whether a contended lock attempt is retried.
/// `attempts` counts previous busy callbacks for the same acquisition (0-based).
pub trait BusyHandler: Send {
    fn on_busy(&mut self, attempts: u32) -> bool;
}

impl<F> BusyHandler for F
where
    F: FnMut(u32) -> bool + Send,
{
    fn on_busy(&mut self, attempts: u32) -> bool {
        self(attempts)
    }
}

/// Sleeping handler with a total time budget.
pub struct BusyTimeout {
    budget: Duration,
    started: Option<Instant>,
}

impl BusyTimeout {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            started: None,
        }
    }
}

const BUSY_DELAYS_MS: [u64; 8] = [1, 2, 5, 10, 15, 20, 25, 50];

impl BusyHandler for BusyTimeout {
    fn on_busy(&mut self, attempts: u32) -> bool {
        if attempts == 0 {
            self.started = Some(Instant::now());
        }
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        if elapsed >= self.budget {
            return false;
        }
        let idx = (attempts as usize).min(BUSY_DELAYS_MS.len() - 1);
        let delay = Duration::from_millis(BUSY_DELAYS_MS[idx]).min(self.budget - elapsed);
        std::thread::sleep(delay);
        true
    }
}

pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
    mode: Option<LockMode>,
}

pub(crate) fn lock_file_path(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push("-lock");
    PathBuf::from(s)
}

impl FileLock {
    pub(crate) fn open(db_path: &Path) -> Result<Self> {
        let path = lock_file_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            mode: None,
        })
    }

    pub(crate) fn mode(&self) -> Option<LockMode> {
        self.mode
    }

    /// Ok(false) on contention, Err on any other failure.
    fn try_lock(&self, mode: LockMode) -> Result<bool> {
        let r = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&self.file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&self.file),
        };
        match r {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Acquire (or upgrade to) `mode`, consulting `busy` on contention.
    pub(crate) fn acquire(
        &mut self,
        mode: LockMode,
        busy: &mut Option<Box<dyn BusyHandler>>,
    ) -> Result<()> {
        if self.mode == Some(LockMode::Exclusive) || self.mode == Some(mode) {
            return Ok(());
        }
        // upgrade не атомарен (как и flock): сначала отпускаем shared
        let upgrading = self.mode == Some(LockMode::Shared);
        if upgrading {
            let _ = FileExt::unlock(&self.file);
            self.mode = None;
        }
        let mut attempts = 0u32;
        loop {
            if self.try_lock(mode)? {
                self.mode = Some(mode);
                return Ok(());
            }
            let retry = match busy.as_mut() {
                Some(h) => h.on_busy(attempts),
                None => false,
            };
            if !retry {
                debug!("lock {:?} on {} busy after {} retries", mode, self.path.display(), attempts);
                if upgrading && self.try_lock(LockMode::Shared)? {
                    self.mode = Some(LockMode::Shared);
                }
                return Err(Error::Busy);
            }
            attempts += 1;
        }
    }

    /// Exclusive -> shared (best effort; drops to unlocked if a writer slipped in).
    pub(crate) fn downgrade(&mut self) {
        if self.mode != Some(LockMode::Exclusive) {
            return;
        }
        let _ = FileExt::unlock(&self.file);
        self.mode = match self.try_lock(LockMode::Shared) {
            Ok(true) => Some(LockMode::Shared),
            _ => None,
        };
    }

    pub(crate) fn release(&mut self) {
        if self.mode.take().is_some() {
            // ошибка unlock не важна: файл всё равно закрывается
            let _ = FileExt::unlock(&self.file);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_handler_gives_up() {
        let mut h = BusyTimeout::new(Duration::from_millis(5));
        let mut n = 0;
        while h.on_busy(n) {
            n += 1;
            assert!(n < 100);
        }
        assert!(n >= 1);
    }

    #[test]
    fn closure_is_a_handler() {
        let mut calls = 0u32;
        let mut h = |a: u32| {
            calls += 1;
            a < 2
        };
        assert!(BusyHandler::on_busy(&mut h, 0));
        assert!(BusyHandler::on_busy(&mut h, 1));
        assert!(!BusyHandler::on_busy(&mut h, 2));
        assert_eq!(calls, 3);
    }
}
