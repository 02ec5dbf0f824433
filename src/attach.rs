//! Attach/verify: установка кодека (или его снятие) на пейджер базы.
//!
//! Unattached → Attaching → Verified | Rejected.
//! - shared lock (с busy-handler), раскладка страниц под кодек, установка кодека;
//! - непустая база: страница 1 читается через новый кодек и должна выглядеть
//!   как заголовок базы (magic, page size, версия), иначе кодек снимается;
//! - пустая база: проверять нечего, ключ выводится сразу.
//! Ошибки до установки кодека (MISUSE, BUSY, NOMEM) состояние не меняют,
//! прежний кодек остаётся на месте.

use log::{debug, info, warn};

use crate::codec::{codec_of_mut, Codec};
use crate::error::{Error, ErrorCode, Result};
use crate::metrics::{record_attach_rejected, record_attach_verified};
use crate::pager::header::looks_valid;
use crate::pager::FilePager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachState {
    #[default]
    Unattached,
    Attaching,
    Verified,
    /// Page 1 did not verify; the codec was removed.
    Rejected(ErrorCode),
}

impl AttachState {
    pub fn is_rejected(&self) -> bool {
        matches!(self, AttachState::Rejected(_))
    }
}

/// Install `codec` on `pager` (None = plaintext) and verify page 1.
pub fn codec_set_to(pager: &mut FilePager, codec: Option<Codec>, state: &mut AttachState) -> Result<()> {
    let previous = *state;
    *state = AttachState::Attaching;

    let mut codec = codec;
    if let Some(c) = codec.as_mut() {
        if let Err(e) = c.prepare(pager.page_size()) {
            *state = previous;
            return Err(e);
        }
    }

    if let Err(e) = pager.shared_lock() {
        debug!("{}: attach waiting for lock failed: {}", pager.path().display(), e);
        *state = previous;
        return Err(e);
    }

    let installed = install(pager, codec);
    if let Err(e) = installed {
        pager.unlock_if_unused();
        *state = previous;
        return Err(e);
    }

    let result = if pager.page_count() > 0 {
        verify_page1(pager)
    } else {
        if let Some(c) = codec_of_mut(pager) {
            c.ensure_key();
        }
        Ok(())
    };

    match result {
        Ok(()) => {
            *state = AttachState::Verified;
            record_attach_verified();
            info!(
                "{}: attached ({} pages, page size {}, {})",
                pager.path().display(),
                pager.page_count(),
                pager.page_size(),
                if pager.codec().is_some() { "encrypted" } else { "plaintext" }
            );
            pager.unlock_if_unused();
            Ok(())
        }
        Err(e) => {
            pager.take_codec();
            pager.unlock_if_unused();
            *state = AttachState::Rejected(e.code());
            record_attach_rejected();
            warn!("{}: attach rejected: {}", pager.path().display(), e);
            Err(e)
        }
    }
}

/// Swap the pager's codec. On error the previous codec and page layout stay in place.
fn install(pager: &mut FilePager, codec: Option<Codec>) -> Result<()> {
    if pager.in_write_txn() {
        return Err(Error::misuse("codec change inside a write transaction"));
    }
    if let Some(c) = codec.as_ref() {
        pager.check_page_layout(c.page_size(), c.reserved_bytes())?;
    }

    let layout = (pager.page_size(), pager.reserved());
    let previous = pager.set_codec(None);
    let result = match codec {
        Some(c) => pager.set_page_layout(c.page_size(), c.reserved_bytes()).map(|_| {
            pager.set_codec(Some(Box::new(c)));
        }),
        None => pager.refresh().and_then(|_| {
            let ps = pager.page_size();
            pager.set_page_layout(ps, 0)
        }),
    };
    if let Err(e) = result {
        pager.set_codec(previous);
        if let Err(le) = pager.set_page_layout(layout.0, layout.1) {
            warn!("{}: page layout not restored: {}", pager.path().display(), le);
        }
        return Err(e);
    }
    Ok(())
}

fn verify_page1(pager: &mut FilePager) -> Result<()> {
    pager.clear_cache();
    let page_size = pager.page_size();
    let read = match pager.read(1) {
        Ok(page) => Ok(looks_valid(page, page_size)),
        Err(e) => Err(e),
    };
    match read {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::NotADb),
        Err(e) => {
            let slot = codec_of_mut(pager).and_then(|c| c.last_error());
            match slot {
                Some(code) if code != e.code() => {
                    debug!("page 1 read failed ({}), codec reports {}", e, code);
                    Err(code_to_error(code, e))
                }
                _ => Err(e),
            }
        }
    }
}

// Ошибка кодека приоритетнее ошибки чтения.
fn code_to_error(code: ErrorCode, fallback: Error) -> Error {
    match code {
        ErrorCode::Auth => Error::Auth { pgno: 1 },
        ErrorCode::NotADb => Error::NotADb,
        ErrorCode::Misuse => Error::misuse(fallback.to_string()),
        _ => fallback,
    }
}
