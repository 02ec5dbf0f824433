//! sleet - постраничное шифрование однофайловых хранилищ страниц.
//!
//! Страница: ChaCha20 + Poly1305 с nonce и тегом в последних 32 байтах,
//! ключ из пароля через PBKDF2-HMAC-SHA256. Пейджер видит кодек как
//! `PageTransform`: decode на чтении, encode на записи.

// Базовые модули
pub mod config;
pub mod consts;
pub mod error;
pub mod metrics;
pub mod uri;

// Криптография и кодек
pub mod codec;
pub mod crypto;

// Хост-пейджер
pub mod pager;

// Attach / rekey
pub mod attach;
pub mod rekey;

// Соединение, строки, ключи
pub mod db;

pub mod cli;

// Удобные реэкспорты
pub use attach::AttachState;
pub use codec::{Codec, CodecState, Kdf, KeyContext, KeyFlags};
pub use config::{ConnectionBuilder, SleetConfig};
pub use db::{Connection, InheritedKey, KeySpec, MAIN_DB};
pub use error::{Error, ErrorCode, Result};
pub use pager::{BusyHandler, BusyTimeout, FilePager};
