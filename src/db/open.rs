//! db/open - открытие соединения и attach/detach дополнительных баз.

use std::time::Duration;

use log::{debug, info};

use crate::config::{ConnectionBuilder, SleetConfig};
use crate::error::{Error, Result};
use crate::pager::{BusyTimeout, FilePager};
use crate::uri::UriParams;

use super::core::{Connection, Database, MAIN_DB};
use super::keys::KeySpec;

fn open_pager(uri: &str, cfg: &SleetConfig) -> Result<FilePager> {
    let mut pager = FilePager::open(UriParams::parse(uri), cfg.default_page_size, cfg.data_fsync)?;
    if cfg.busy_timeout_ms > 0 {
        pager.set_busy_handler(Some(Box::new(BusyTimeout::new(Duration::from_millis(
            cfg.busy_timeout_ms,
        )))));
    }
    Ok(pager)
}

impl Connection {
    /// Builder with env defaults (`SLEET_*`).
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Open `uri` (plain path or `file:` URI) as `main` with env configuration.
    pub fn open(uri: &str) -> Result<Self> {
        Self::open_with_config(uri, SleetConfig::from_env())
    }

    pub fn open_with_config(uri: &str, cfg: SleetConfig) -> Result<Self> {
        let pager = open_pager(uri, &cfg)?;
        debug!("open {} with {}", pager.path().display(), cfg);
        Ok(Self {
            dbs: vec![Database {
                name: MAIN_DB.to_string(),
                pager,
                state: Default::default(),
            }],
            cfg,
            next_page_size: 0,
        })
    }

    /// Attach another database file as `name`.
    ///
    /// `key`: `None` inherits the main database's encryption (plaintext if main
    /// has none), `Some(b"")` forces plaintext, anything else is a new key.
    /// On failure the database is not attached.
    pub fn attach(&mut self, uri: &str, name: &str, key: Option<&[u8]>) -> Result<()> {
        if name.is_empty() || self.find(name).is_some() {
            return Err(Error::misuse(format!("database name '{}' in use", name)));
        }
        let pager = open_pager(uri, &self.cfg)?;
        self.dbs.push(Database {
            name: name.to_string(),
            pager,
            state: Default::default(),
        });
        let idx = self.dbs.len() - 1;

        let spec = match key {
            Some(k) => KeySpec::Key(k),
            None => match self.codec_key(0) {
                Some(inherited) => KeySpec::Inherit(inherited),
                None => KeySpec::Key(&[]),
            },
        };
        if let Err(e) = self.attach_codec(idx, spec) {
            self.dbs.pop();
            return Err(e);
        }
        info!("attached {} as '{}'", uri, name);
        Ok(())
    }

    pub fn detach(&mut self, name: &str) -> Result<()> {
        if name == MAIN_DB {
            return Err(Error::misuse("cannot detach main"));
        }
        let idx = self.index(name)?;
        let db = self.dbs.remove(idx);
        if db.pager.in_write_txn() {
            self.dbs.insert(idx, db);
            return Err(Error::Busy);
        }
        debug!("detached '{}'", name);
        Ok(())
    }
}
