//! Centralized configuration and builder for sleet connections.
//!
//! - SleetConfig::from_env() reads SLEET_* env vars.
//! - ConnectionBuilder returns a SleetConfig consumed by Connection::open_with_config.
//!
//! Defaults:
//! - kdf_iterations = 12345 (PBKDF2-HMAC-SHA256)
//! - default_page_size = 4096 (page size of newly created databases)
//! - busy_timeout_ms = 0 (no retry on a locked file unless a busy handler is installed)
//! - data_fsync = true (fsync journal and database file on commit)

use std::fmt;

use crate::consts::{is_valid_page_size, DEFAULT_PAGE_SIZE, PBKDF2_ITERATIONS};

#[derive(Clone, Debug)]
pub struct SleetConfig {
    /// PBKDF2 iteration count for passphrase keys.
    /// Env: SLEET_KDF_ITERATIONS (default 12345). Files are only readable with the same value.
    pub kdf_iterations: u32,

    /// Page size for newly created databases when no `page_size` URI parameter pins it.
    /// Env: SLEET_PAGE_SIZE (default 4096; ignored unless a power of two in 512..=65536)
    pub default_page_size: usize,

    /// Install a sleeping busy handler with this budget (0 = none).
    /// Env: SLEET_BUSY_TIMEOUT_MS (default 0)
    pub busy_timeout_ms: u64,

    /// fsync the journal and the database file on commit.
    /// Env: SLEET_DATA_FSYNC (default true; "0|false|off|no" => false)
    pub data_fsync: bool,
}

impl Default for SleetConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: PBKDF2_ITERATIONS,
            default_page_size: DEFAULT_PAGE_SIZE,
            busy_timeout_ms: 0,
            data_fsync: true,
        }
    }
}

impl SleetConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SLEET_KDF_ITERATIONS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                if n > 0 {
                    cfg.kdf_iterations = n;
                }
            }
        }

        if let Ok(v) = std::env::var("SLEET_PAGE_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if is_valid_page_size(n) {
                    cfg.default_page_size = n;
                }
            }
        }

        if let Ok(v) = std::env::var("SLEET_BUSY_TIMEOUT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.busy_timeout_ms = n;
            }
        }

        if let Ok(v) = std::env::var("SLEET_DATA_FSYNC") {
            let s = v.trim().to_ascii_lowercase();
            cfg.data_fsync = !(s == "0" || s == "false" || s == "off" || s == "no");
        }

        cfg
    }

    pub fn with_kdf_iterations(mut self, n: u32) -> Self {
        self.kdf_iterations = n.max(1);
        self
    }

    pub fn with_default_page_size(mut self, ps: usize) -> Self {
        self.default_page_size = ps;
        self
    }

    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn with_data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = on;
        self
    }
}

impl fmt::Display for SleetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SleetConfig {{ \
             kdf_iterations: {}, \
             default_page_size: {}, \
             busy_timeout_ms: {}, \
             data_fsync: {} \
             }}",
            self.kdf_iterations, self.default_page_size, self.busy_timeout_ms, self.data_fsync,
        )
    }
}

/// Builder that produces a SleetConfig. `Connection::builder()` returns this.
#[derive(Clone, Debug)]
pub struct ConnectionBuilder {
    cfg: SleetConfig,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: SleetConfig::from_env(),
        }
    }
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: SleetConfig::default(),
        }
    }

    pub fn kdf_iterations(mut self, n: u32) -> Self {
        self.cfg.kdf_iterations = n.max(1);
        self
    }

    pub fn default_page_size(mut self, ps: usize) -> Self {
        self.cfg.default_page_size = ps;
        self
    }

    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.cfg.busy_timeout_ms = ms;
        self
    }

    pub fn data_fsync(mut self, on: bool) -> Self {
        self.cfg.data_fsync = on;
        self
    }

    pub fn build(self) -> SleetConfig {
        self.cfg
    }
}
