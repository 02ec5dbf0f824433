//! db/keys - точки входа управления ключами.
//!
//! - key / key_v2: установить ключ базы (пустой ключ - открытый текст);
//! - rekey / rekey_v2: сменить, добавить или снять шифрование;
//! - codec_key: какой ключ унаследует база, подключённая без ключа.
//! Неизвестное имя базы в key_v2/rekey_v2 означает `main`.

use log::debug;

use crate::attach::codec_set_to;
use crate::codec::{codec_of, parse_uri_config, Codec, KeyContext, KeyFlags};
use crate::crypto::system_random;
use crate::error::Result;
use crate::rekey::{rekey, RekeyOptions};

use super::core::{Connection, MAIN_DB};

/// Handle to a database whose encryption an attached database can share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InheritedKey {
    pub source: usize,
}

/// How to key a database at attach time.
#[derive(Debug, Clone, Copy)]
pub enum KeySpec<'a> {
    /// Passphrase or raw key; empty = plaintext.
    Key(&'a [u8]),
    /// Same scheme and derived key as another database of the connection.
    Inherit(InheritedKey),
}

impl Connection {
    /// Key the main database.
    pub fn key(&mut self, key: &[u8]) -> Result<()> {
        self.key_v2(MAIN_DB, key)
    }

    pub fn key_v2(&mut self, name: &str, key: &[u8]) -> Result<()> {
        let idx = self.find(name).unwrap_or(0);
        self.attach_codec(idx, KeySpec::Key(key))
    }

    pub fn rekey(&mut self, key: &[u8]) -> Result<()> {
        self.rekey_v2(MAIN_DB, key)
    }

    pub fn rekey_v2(&mut self, name: &str, key: &[u8]) -> Result<()> {
        let idx = self.find(name).unwrap_or(0);
        self.ensure_usable(idx)?;
        let opts = RekeyOptions {
            next_page_size: self.next_page_size,
            kdf_iterations: self.cfg.kdf_iterations,
        };
        let db = &mut self.dbs[idx];
        rekey(&mut db.pager, key, opts, &mut db.state)
    }

    /// Key-inheritance query: `Some` when database `idx` is encrypted.
    pub fn codec_key(&self, idx: usize) -> Option<InheritedKey> {
        let db = self.dbs.get(idx)?;
        codec_of(&db.pager)
            .and_then(|c| c.reader())
            .map(|_| InheritedKey { source: idx })
    }

    /// Install the codec described by `spec` on database `idx` and verify it.
    pub fn attach_codec(&mut self, idx: usize, spec: KeySpec<'_>) -> Result<()> {
        let rng = system_random();
        let ctx = match spec {
            KeySpec::Key(k) if k.is_empty() => None,
            KeySpec::Key(k) => {
                let mut ctx = KeyContext::new(k, self.cfg.kdf_iterations);
                ctx.page_size = self.next_page_size;
                parse_uri_config(&mut ctx, self.dbs[idx].pager.uri(), rng.as_ref())?;
                if ctx.flags().contains(KeyFlags::HAS_SALT) {
                    ctx.run_kdf();
                }
                Some(ctx)
            }
            KeySpec::Inherit(InheritedKey { source }) => {
                let inherited = self
                    .dbs
                    .get(source)
                    .and_then(|d| codec_of(&d.pager))
                    .and_then(|c| c.inheritable());
                match inherited {
                    Some(mut ctx) => {
                        ctx.set_default_page_size(self.next_page_size);
                        parse_uri_config(&mut ctx, self.dbs[idx].pager.uri(), rng.as_ref())?;
                        Some(ctx)
                    }
                    None => None,
                }
            }
        };
        debug!(
            "keying '{}': {}",
            self.dbs[idx].name,
            if ctx.is_some() { "encrypted" } else { "plaintext" }
        );
        let db = &mut self.dbs[idx];
        codec_set_to(&mut db.pager, ctx.map(|c| Codec::new(c).with_rng(rng)), &mut db.state)
    }
}
