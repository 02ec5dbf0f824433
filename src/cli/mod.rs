//! CLI `sleet`: init / insert / dump / rekey / verify / status.
//!
//! Ключ задаётся `--key` (или env SLEET_KEY):
//!   обычная строка - пароль (PBKDF2),
//!   `hex:...` / `base64:...` - произвольные байты (например, 32-байтовый ключ для `kdf=none`).
//! База задаётся путём или `file:` URI с параметрами кодека.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

pub use commands::parse_key;

#[derive(Parser, Debug)]
#[command(
    name = "sleet",
    version,
    about = "Page-level encryption for single-file page stores (ChaCha20-Poly1305, PBKDF2)",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create an empty database (encrypted when a key is given).
    Init {
        uri: String,
        #[arg(long, env = "SLEET_KEY", hide_env_values = true)]
        key: Option<String>,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Append rows.
    Insert {
        uri: String,
        #[arg(long, env = "SLEET_KEY", hide_env_values = true)]
        key: Option<String>,
        #[arg(required = true)]
        rows: Vec<String>,
    },
    /// Print all rows.
    Dump {
        uri: String,
        #[arg(long, env = "SLEET_KEY", hide_env_values = true)]
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Change, add (`--key` empty) or remove (`--new-key` empty) encryption.
    Rekey {
        uri: String,
        #[arg(long, env = "SLEET_KEY", hide_env_values = true)]
        key: Option<String>,
        #[arg(long)]
        new_key: String,
    },
    /// Check that the key opens the database and every page authenticates.
    Verify {
        uri: String,
        #[arg(long, env = "SLEET_KEY", hide_env_values = true)]
        key: Option<String>,
    },
    /// Database and codec summary, plus process metrics.
    Status {
        uri: String,
        #[arg(long, env = "SLEET_KEY", hide_env_values = true)]
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Init { uri, key, page_size } => commands::cmd_init(&uri, key.as_deref(), page_size),
        Cmd::Insert { uri, key, rows } => commands::cmd_insert(&uri, key.as_deref(), &rows),
        Cmd::Dump { uri, key, json } => commands::cmd_dump(&uri, key.as_deref(), json),
        Cmd::Rekey { uri, key, new_key } => commands::cmd_rekey(&uri, key.as_deref(), &new_key),
        Cmd::Verify { uri, key } => commands::cmd_verify(&uri, key.as_deref()),
        Cmd::Status { uri, key, json } => commands::cmd_status(&uri, key.as_deref(), json),
    }
}
