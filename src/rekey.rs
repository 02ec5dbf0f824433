//! rekey - смена ключа базы.
//!
//! - decrypt (кодек есть, новый ключ пустой): писатель снимается, vacuum с
//!   reserved = 0, затем кодек убирается;
//! - encrypt (кодека нет, ключ непустой): кодек только с писателем, vacuum с
//!   reserved = 32, затем писатель становится и читателем;
//! - re-key (кодек есть, ключ непустой): старый ключ читает, новый пишет; одна
//!   транзакция помечает dirty каждую страницу (кроме PENDING_BYTE), commit
//!   переписывает всё новым ключом. Ошибка - rollback и возврат старого ключа.

use log::{info, warn};

use crate::attach::{codec_set_to, AttachState};
use crate::codec::{codec_of, codec_of_mut, parse_uri_config, take_codec, Codec, KeyContext};
use crate::consts::{pending_byte_page, PAGE_RESERVED_LEN};
use crate::crypto::system_random;
use crate::db::vacuum::vacuum;
use crate::error::{Error, Result};
use crate::metrics::{record_rekey_completed, record_rekey_rolled_back};
use crate::pager::FilePager;

/// Parameters a rekey takes from the connection.
#[derive(Debug, Clone, Copy)]
pub struct RekeyOptions {
    /// Page size for a newly keyed database unless `page_size` pins one (0 = keep).
    pub next_page_size: usize,
    pub kdf_iterations: u32,
}

/// Change the key of the database behind `pager`; an empty `key` removes encryption.
pub fn rekey(pager: &mut FilePager, key: &[u8], opts: RekeyOptions, state: &mut AttachState) -> Result<()> {
    if state.is_rejected() {
        return Err(Error::NotADb);
    }
    if pager.in_write_txn() {
        return Err(Error::misuse("rekey inside a write transaction"));
    }
    let has_codec = codec_of(pager).is_some();

    match (has_codec, key.is_empty()) {
        (false, true) => Ok(()),
        (true, true) => decrypt(pager, state),
        (has, false) => {
            let ctx = new_context(pager, key, opts)?;
            if has {
                change_key(pager, ctx, state)
            } else {
                encrypt(pager, ctx, state)
            }
        }
    }
}

fn new_context(pager: &mut FilePager, key: &[u8], opts: RekeyOptions) -> Result<KeyContext> {
    let mut ctx = match codec_of(pager).and_then(|c| c.reader()) {
        Some(reader) => reader.for_new_key(key),
        None => KeyContext::new(key, opts.kdf_iterations),
    };
    ctx.set_default_page_size(opts.next_page_size);
    let rng = system_random();
    parse_uri_config(&mut ctx, pager.uri(), rng.as_ref())?;
    if ctx.page_size == 0 {
        ctx.page_size = pager.page_size();
    }
    ctx.check_skip()?;
    ctx.run_kdf();
    pager.shared_lock()?;
    let pages = pager.page_count();
    pager.unlock_if_unused();
    if pages > 0 && ctx.page_size != pager.page_size() {
        return Err(Error::misuse(format!(
            "rekey cannot change page size {} -> {}",
            pager.page_size(),
            ctx.page_size
        )));
    }
    Ok(ctx)
}

fn decrypt(pager: &mut FilePager, state: &mut AttachState) -> Result<()> {
    if let Some(c) = codec_of_mut(pager) {
        c.detach_writer();
    }
    match vacuum(pager, 0) {
        Ok(summary) => {
            record_rekey_completed(summary.pages_after as u64);
            info!("{}: encryption removed", pager.path().display());
            codec_set_to(pager, None, state)
        }
        Err(e) => {
            if let Some(c) = codec_of_mut(pager) {
                c.reattach_writer();
            }
            record_rekey_rolled_back();
            warn!("{}: decrypting rekey failed: {}", pager.path().display(), e);
            Err(e)
        }
    }
}

fn encrypt(pager: &mut FilePager, ctx: KeyContext, state: &mut AttachState) -> Result<()> {
    codec_set_to(pager, Some(Codec::write_only(ctx)), state)?;
    match vacuum(pager, PAGE_RESERVED_LEN) {
        Ok(summary) => {
            if let Some(c) = codec_of_mut(pager) {
                c.promote_writer();
            }
            record_rekey_completed(summary.pages_after as u64);
            info!("{}: database encrypted ({} pages)", pager.path().display(), summary.pages_after);
            Ok(())
        }
        Err(e) => {
            record_rekey_rolled_back();
            warn!("{}: encrypting rekey failed: {}", pager.path().display(), e);
            // файл не тронут (rollback в vacuum): обратно к открытому тексту
            if let Err(re) = codec_set_to(pager, None, state) {
                warn!("{}: plaintext re-attach failed: {}", pager.path().display(), re);
            }
            Err(e)
        }
    }
}

fn change_key(pager: &mut FilePager, ctx: KeyContext, state: &mut AttachState) -> Result<()> {
    let ps = pager.page_size();
    match codec_of_mut(pager) {
        Some(c) => c.begin_transition(ctx, ps)?,
        None => return Err(Error::Internal("codec vanished before key change".into())),
    }

    let result = rewrite_all(pager);
    match result {
        Ok(pages) => {
            let Some(mut codec) = take_codec(pager) else {
                return Err(Error::Internal("codec vanished during key change".into()));
            };
            codec.finish_transition();
            record_rekey_completed(pages as u64);
            info!("{}: rekeyed {} page(s)", pager.path().display(), pages);
            codec_set_to(pager, Some(*codec), state)
        }
        Err(e) => {
            if let Some(c) = codec_of_mut(pager) {
                c.abort_transition();
            }
            if let Err(rb) = pager.rollback() {
                warn!("{}: rollback after failed rekey: {}", pager.path().display(), rb);
            }
            pager.unlock_if_unused();
            record_rekey_rolled_back();
            warn!("{}: rekey rolled back: {}", pager.path().display(), e);
            Err(e)
        }
    }
}

/// One transaction rewriting every page through the codec; returns pages written.
fn rewrite_all(pager: &mut FilePager) -> Result<u32> {
    pager.begin_write()?;
    let count = pager.page_count();
    let pending = pending_byte_page(pager.page_size());
    let mut written = 0u32;
    for pgno in 1..=count {
        if pgno == pending {
            continue;
        }
        pager.mark_dirty(pgno)?;
        written += 1;
    }
    pager.commit()?;
    Ok(written)
}
