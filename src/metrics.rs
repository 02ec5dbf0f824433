//! Lightweight global metrics for the codec.
//!
//! Потокобезопасные атомарные счётчики:
//! - страницы (encode/decode, ошибки аутентификации)
//! - KDF
//! - attach / rekey

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ----- Pages -----
static PAGES_ENCRYPTED: AtomicU64 = AtomicU64::new(0);
static PAGES_DECRYPTED: AtomicU64 = AtomicU64::new(0);
static AUTH_FAILURES: AtomicU64 = AtomicU64::new(0);

// ----- KDF -----
static KDF_RUNS: AtomicU64 = AtomicU64::new(0);

// ----- Attach / Rekey -----
static ATTACH_VERIFIED: AtomicU64 = AtomicU64::new(0);
static ATTACH_REJECTED: AtomicU64 = AtomicU64::new(0);
static REKEYS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static REKEYS_ROLLED_BACK: AtomicU64 = AtomicU64::new(0);
static PAGES_REWRITTEN: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub pages_encrypted: u64,
    pub pages_decrypted: u64,
    pub auth_failures: u64,

    pub kdf_runs: u64,

    pub attach_verified: u64,
    pub attach_rejected: u64,
    pub rekeys_completed: u64,
    pub rekeys_rolled_back: u64,
    pub pages_rewritten: u64,
}

impl MetricsSnapshot {
    pub fn auth_failure_ratio(&self) -> f64 {
        let total = self.pages_decrypted + self.auth_failures;
        if total == 0 {
            0.0
        } else {
            self.auth_failures as f64 / total as f64
        }
    }
}

// ----- Recorders (Pages) -----
pub fn record_page_encrypted() {
    PAGES_ENCRYPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_page_decrypted() {
    PAGES_DECRYPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_auth_failure() {
    AUTH_FAILURES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (KDF) -----
pub fn record_kdf_run() {
    KDF_RUNS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Attach / Rekey) -----
pub fn record_attach_verified() {
    ATTACH_VERIFIED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_attach_rejected() {
    ATTACH_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_rekey_completed(pages: u64) {
    REKEYS_COMPLETED.fetch_add(1, Ordering::Relaxed);
    PAGES_REWRITTEN.fetch_add(pages, Ordering::Relaxed);
}
pub fn record_rekey_rolled_back() {
    REKEYS_ROLLED_BACK.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        pages_encrypted: PAGES_ENCRYPTED.load(Ordering::Relaxed),
        pages_decrypted: PAGES_DECRYPTED.load(Ordering::Relaxed),
        auth_failures: AUTH_FAILURES.load(Ordering::Relaxed),

        kdf_runs: KDF_RUNS.load(Ordering::Relaxed),

        attach_verified: ATTACH_VERIFIED.load(Ordering::Relaxed),
        attach_rejected: ATTACH_REJECTED.load(Ordering::Relaxed),
        rekeys_completed: REKEYS_COMPLETED.load(Ordering::Relaxed),
        rekeys_rolled_back: REKEYS_ROLLED_BACK.load(Ordering::Relaxed),
        pages_rewritten: PAGES_REWRITTEN.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    PAGES_ENCRYPTED.store(0, Ordering::Relaxed);
    PAGES_DECRYPTED.store(0, Ordering::Relaxed);
    AUTH_FAILURES.store(0, Ordering::Relaxed);

    KDF_RUNS.store(0, Ordering::Relaxed);

    ATTACH_VERIFIED.store(0, Ordering::Relaxed);
    ATTACH_REJECTED.store(0, Ordering::Relaxed);
    REKEYS_COMPLETED.store(0, Ordering::Relaxed);
    REKEYS_ROLLED_BACK.store(0, Ordering::Relaxed);
    PAGES_REWRITTEN.store(0, Ordering::Relaxed);
}
