//! db - соединение: именованные базы (`main` + attached), ключи, строки.
//!
//! Разделение по подмодулям:
//! - core.rs   - Connection/Database, поиск базы по имени, статус
//! - open.rs   - open/open_with_config, attach/detach
//! - keys.rs   - key/key_v2, rekey/rekey_v2, наследование ключа при attach
//! - rows.rs   - поток строк поверх страниц (insert/rows)
//! - vacuum.rs - перезапись базы с другим резервом страниц (encrypt/decrypt rekey)

pub mod core;
pub mod keys;
pub mod open;
pub mod rows;
pub mod vacuum;

pub use self::core::{Connection, Database, DbStatus, MAIN_DB};
pub use keys::{InheritedKey, KeySpec};
pub use vacuum::{vacuum, VacuumSummary};
