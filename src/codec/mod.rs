//! codec - шифрование страниц (ChaCha20 + Poly1305) поверх пейджера.
//!
//! Подмодули:
//! - context.rs   - KeyContext: ключ, соль, заголовок, page size, skip, KDF.
//! - params.rs    - параметры из URI (`key`, `salt`, `header`, `kdf`, `skip`, `page_size`).
//! - transform.rs - формат зашифрованной страницы и `impl PageTransform for Codec`.
//!
//! У кодека две роли: читатель (расшифровка + журнал) и писатель (основной файл).
//! Обычно это один и тот же контекст; во время смены ключа - разные.

use std::sync::Arc;

use log::debug;
use zeroize::Zeroize;

use crate::crypto::{system_random, RandomSource};
use crate::error::{Error, ErrorCode, Result};
use crate::consts::PAGE_RESERVED_LEN;
use crate::pager::FilePager;

pub mod context;
pub mod params;
pub mod transform;

pub use context::{Kdf, KeyContext, KeyFlags};
pub use params::{parse_uri_config, uri_bytes, UriBytes};
pub use transform::{decrypt_page, encrypt_page};

/// Reader/writer roles of a codec.
#[derive(Debug)]
pub enum CodecState {
    /// Pages pass through untouched.
    Inactive,
    /// Decrypt on read, plaintext on write (removing encryption).
    ReadOnly(Box<KeyContext>),
    /// Plaintext on read, encrypt on write (adding encryption).
    WriteOnly(Box<KeyContext>),
    ReadWrite(Box<KeyContext>),
    /// Old key reads and journals, new key writes (key change in progress).
    Transitioning {
        old: Box<KeyContext>,
        new: Box<KeyContext>,
    },
}

impl CodecState {
    pub fn reader(&self) -> Option<&KeyContext> {
        match self {
            CodecState::ReadOnly(c) | CodecState::ReadWrite(c) => Some(c.as_ref()),
            CodecState::Transitioning { old, .. } => Some(old.as_ref()),
            CodecState::Inactive | CodecState::WriteOnly(_) => None,
        }
    }

    pub fn reader_mut(&mut self) -> Option<&mut KeyContext> {
        match self {
            CodecState::ReadOnly(c) | CodecState::ReadWrite(c) => Some(c.as_mut()),
            CodecState::Transitioning { old, .. } => Some(old.as_mut()),
            CodecState::Inactive | CodecState::WriteOnly(_) => None,
        }
    }

    pub fn writer(&self) -> Option<&KeyContext> {
        match self {
            CodecState::WriteOnly(c) | CodecState::ReadWrite(c) => Some(c.as_ref()),
            CodecState::Transitioning { new, .. } => Some(new.as_ref()),
            CodecState::Inactive | CodecState::ReadOnly(_) => None,
        }
    }

    fn contexts_mut(&mut self) -> Vec<&mut KeyContext> {
        match self {
            CodecState::Inactive => Vec::new(),
            CodecState::ReadOnly(c) | CodecState::WriteOnly(c) | CodecState::ReadWrite(c) => vec![c.as_mut()],
            CodecState::Transitioning { old, new } => vec![old.as_mut(), new.as_mut()],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecState::Inactive => "inactive",
            CodecState::ReadOnly(_) => "read-only",
            CodecState::WriteOnly(_) => "write-only",
            CodecState::ReadWrite(_) => "read-write",
            CodecState::Transitioning { .. } => "transitioning",
        }
    }
}

/// Page codec installed on a pager.
pub struct Codec {
    pub(crate) state: CodecState,
    // Буфер для зашифрованной копии страницы (encode не трогает страницу вызывающего).
    pub(crate) pagebuf: Vec<u8>,
    pub(crate) error: Option<ErrorCode>,
    pub(crate) rng: Arc<dyn RandomSource>,
}

impl Codec {
    /// Codec reading and writing with the same key.
    pub fn new(ctx: KeyContext) -> Self {
        Self::with_state(CodecState::ReadWrite(Box::new(ctx)))
    }

    /// Codec for a plaintext database that is about to be encrypted.
    pub fn write_only(ctx: KeyContext) -> Self {
        Self::with_state(CodecState::WriteOnly(Box::new(ctx)))
    }

    fn with_state(state: CodecState) -> Self {
        Self {
            state,
            pagebuf: Vec::new(),
            error: None,
            rng: system_random(),
        }
    }

    pub fn with_rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> &CodecState {
        &self.state
    }

    pub fn reader(&self) -> Option<&KeyContext> {
        self.state.reader()
    }

    pub fn writer(&self) -> Option<&KeyContext> {
        self.state.writer()
    }

    /// Error recorded by the last failed decode.
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.error
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn page_size(&self) -> usize {
        self.state
            .reader()
            .or_else(|| self.state.writer())
            .map(|c| c.page_size)
            .unwrap_or(0)
    }

    /// Trailer bytes the encrypted format needs; 0 when nothing is written encrypted.
    pub fn reserved_bytes(&self) -> usize {
        if self.state.writer().is_some() {
            PAGE_RESERVED_LEN
        } else {
            0
        }
    }

    /// Fill unset page sizes from the pager and allocate the scratch page.
    pub fn prepare(&mut self, pager_page_size: usize) -> Result<()> {
        let mut ps = 0;
        for ctx in self.state.contexts_mut() {
            if ctx.page_size == 0 {
                ctx.page_size = pager_page_size;
            }
            ctx.check_skip()?;
            ps = ps.max(ctx.page_size);
        }
        if ps == 0 {
            ps = pager_page_size;
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(ps).map_err(|_| Error::NoMem(ps))?;
        buf.resize(ps, 0);
        self.pagebuf.zeroize();
        self.pagebuf = buf;
        self.error = None;
        Ok(())
    }

    /// Derive keys still missing (new database: nothing on disk to take the salt from).
    pub fn ensure_key(&mut self) {
        for ctx in self.state.contexts_mut() {
            if !ctx.has_key() {
                ctx.run_kdf();
            }
        }
    }

    // ---------------------- role changes ----------------------

    /// Stop encrypting writes (decrypting rekey).
    pub fn detach_writer(&mut self) {
        self.state = match std::mem::replace(&mut self.state, CodecState::Inactive) {
            CodecState::ReadWrite(c) => CodecState::ReadOnly(c),
            other => other,
        };
        debug!("codec state: {}", self.state.name());
    }

    /// Undo `detach_writer`.
    pub fn reattach_writer(&mut self) {
        self.state = match std::mem::replace(&mut self.state, CodecState::Inactive) {
            CodecState::ReadOnly(c) => CodecState::ReadWrite(c),
            other => other,
        };
        debug!("codec state: {}", self.state.name());
    }

    /// Freshly encrypted database: the writer key now also reads.
    pub fn promote_writer(&mut self) {
        self.state = match std::mem::replace(&mut self.state, CodecState::Inactive) {
            CodecState::WriteOnly(c) => CodecState::ReadWrite(c),
            other => other,
        };
        debug!("codec state: {}", self.state.name());
    }

    /// Old key keeps reading; `new` writes. Prepares the scratch page for both;
    /// on error the codec is left read-write with the old key.
    pub fn begin_transition(&mut self, new: KeyContext, pager_page_size: usize) -> Result<()> {
        match std::mem::replace(&mut self.state, CodecState::Inactive) {
            CodecState::ReadWrite(old) => {
                self.state = CodecState::Transitioning {
                    old,
                    new: Box::new(new),
                };
            }
            other => {
                let name = other.name();
                self.state = other;
                return Err(Error::misuse(format!("key change from {} codec", name)));
            }
        }
        if let Err(e) = self.prepare(pager_page_size) {
            self.abort_transition();
            return Err(e);
        }
        debug!("codec state: {}", self.state.name());
        Ok(())
    }

    pub fn abort_transition(&mut self) {
        self.state = match std::mem::replace(&mut self.state, CodecState::Inactive) {
            CodecState::Transitioning { old, .. } => CodecState::ReadWrite(old),
            other => other,
        };
        debug!("codec state: {}", self.state.name());
    }

    pub fn finish_transition(&mut self) {
        self.state = match std::mem::replace(&mut self.state, CodecState::Inactive) {
            CodecState::Transitioning { new, .. } => CodecState::ReadWrite(new),
            other => other,
        };
        debug!("codec state: {}", self.state.name());
    }

    /// Reader context another database may inherit (attach without a key).
    pub fn inheritable(&self) -> Option<KeyContext> {
        self.state.reader().map(|c| c.inherit())
    }
}

impl Drop for Codec {
    fn drop(&mut self) {
        self.pagebuf.zeroize();
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("state", &self.state.name())
            .field("page_size", &self.page_size())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

// ---------------------- pager helpers ----------------------

pub fn codec_of(pager: &FilePager) -> Option<&Codec> {
    pager.codec().and_then(|c| c.as_any().downcast_ref::<Codec>())
}

pub fn codec_of_mut(pager: &mut FilePager) -> Option<&mut Codec> {
    pager.codec_mut().and_then(|c| c.as_any_mut().downcast_mut::<Codec>())
}

/// Remove the codec from the pager, if it is ours.
pub fn take_codec(pager: &mut FilePager) -> Option<Box<Codec>> {
    pager.take_codec().and_then(|c| c.into_any().downcast::<Codec>().ok())
}
