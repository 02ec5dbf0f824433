//! KeyContext - одна "роль" ключа (читатель или писатель): ключ, соль, заголовок,
//! размер страницы, skip, выбор KDF и флаги явно заданных параметров.

use std::fmt;

use bitflags::bitflags;
use zeroize::Zeroize;

use crate::consts::{HEADER_LEN, KEY_LEN, PBKDF2_ITERATIONS, SALT_LEN, SKIP_HEADER_BYTES};
use crate::crypto::{derive_key, CipherKey, Passphrase};
use crate::error::{Error, Result};
use crate::metrics::record_kdf_run;

bitflags! {
    /// Which parameters are set (key) or pinned by configuration (the rest).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyFlags: u8 {
        const HAS_KEY      = 0x01;
        const HAS_SALT     = 0x02;
        const HAS_HEADER   = 0x04;
        const HAS_PAGESIZE = 0x08;
        const HAS_SKIP     = 0x10;
        const HAS_KDF      = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kdf {
    /// Caller supplies the 32-byte key directly.
    None,
    Pbkdf2HmacSha256,
}

#[derive(Clone)]
pub struct KeyContext {
    pub(crate) flags: KeyFlags,
    pub(crate) key: Option<CipherKey>,
    pub(crate) passphrase: Option<Passphrase>,
    pub(crate) salt: [u8; SALT_LEN],
    pub(crate) header: [u8; HEADER_LEN],
    // 0 - взять у пейджера при установке кодека
    pub(crate) page_size: usize,
    pub(crate) skip: usize,
    pub(crate) kdf: Kdf,
    pub(crate) iterations: u32,
}

impl KeyContext {
    /// Fresh context for a caller-supplied passphrase (or raw key).
    pub fn new(passphrase: &[u8], iterations: u32) -> Self {
        Self {
            flags: KeyFlags::empty(),
            key: None,
            passphrase: Some(Passphrase::new(passphrase)),
            salt: [0; SALT_LEN],
            header: [0; HEADER_LEN],
            page_size: 0,
            skip: SKIP_HEADER_BYTES,
            kdf: Kdf::Pbkdf2HmacSha256,
            iterations: iterations.max(1),
        }
    }

    /// Same configuration, new passphrase, key not yet derived (key change).
    pub fn for_new_key(&self, passphrase: &[u8]) -> Self {
        let mut ctx = self.clone();
        ctx.key = None;
        ctx.flags.remove(KeyFlags::HAS_KEY);
        ctx.passphrase = Some(Passphrase::new(passphrase));
        ctx
    }

    /// Copy sharing the derived key, without the passphrase (attach without a key).
    pub fn inherit(&self) -> Self {
        let mut ctx = self.clone();
        ctx.passphrase = None;
        ctx
    }

    /// Derive the page key from the passphrase (PBKDF2) or take it verbatim (`kdf=none`).
    /// The passphrase is discarded afterwards.
    pub fn run_kdf(&mut self) {
        let pass = self.passphrase.take();
        let raw = pass.as_ref().map(|p| p.as_bytes()).unwrap_or(&[]);
        let key = match self.kdf {
            Kdf::Pbkdf2HmacSha256 => {
                record_kdf_run();
                derive_key(raw, &self.salt, self.iterations)
            }
            // длина 32 проверена парсером параметров
            Kdf::None => {
                let mut bytes = [0u8; KEY_LEN];
                let n = raw.len().min(KEY_LEN);
                bytes[..n].copy_from_slice(&raw[..n]);
                let key = CipherKey::from_bytes(bytes);
                bytes.zeroize();
                key
            }
        };
        self.key = Some(key);
        self.flags.insert(KeyFlags::HAS_KEY);
    }

    /// First read of page 1 without a key: take salt and header from the stored
    /// bytes unless pinned, then derive.
    pub(crate) fn derive_from_page1(&mut self, stored: &[u8]) {
        if !self.flags.contains(KeyFlags::HAS_SALT) {
            self.salt.copy_from_slice(&stored[..SALT_LEN]);
        }
        if !self.flags.contains(KeyFlags::HAS_HEADER) {
            self.header = self.salt;
        }
        self.run_kdf();
    }

    pub fn flags(&self) -> KeyFlags {
        self.flags
    }

    pub fn has_key(&self) -> bool {
        self.flags.contains(KeyFlags::HAS_KEY) && self.key.is_some()
    }

    pub fn key(&self) -> Option<&CipherKey> {
        self.key.as_ref()
    }

    pub fn passphrase_len(&self) -> Option<usize> {
        self.passphrase.as_ref().map(|p| p.len())
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn header(&self) -> &[u8; HEADER_LEN] {
        &self.header
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn kdf(&self) -> Kdf {
        self.kdf
    }

    /// `skip` must fit in the page once the page size is known.
    pub(crate) fn check_skip(&self) -> Result<()> {
        if self.page_size > 0 && self.skip > self.page_size {
            return Err(Error::misuse(format!(
                "skip={} exceeds page size {}",
                self.skip, self.page_size
            )));
        }
        Ok(())
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Override the page size unless a `page_size` parameter pinned it.
    pub fn set_default_page_size(&mut self, page_size: usize) {
        if !self.flags.contains(KeyFlags::HAS_PAGESIZE) && page_size != 0 {
            self.page_size = page_size;
        }
    }
}

impl Default for KeyContext {
    fn default() -> Self {
        Self::new(&[], PBKDF2_ITERATIONS)
    }
}

impl Drop for KeyContext {
    fn drop(&mut self) {
        self.salt.zeroize();
        self.header.zeroize();
    }
}

impl fmt::Debug for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyContext")
            .field("flags", &self.flags)
            .field("has_key", &self.key.is_some())
            .field("page_size", &self.page_size)
            .field("skip", &self.skip)
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}
