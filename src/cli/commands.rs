use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::Serialize;

use crate::consts::pending_byte_page;
use crate::db::{Connection, DbStatus, MAIN_DB};
use crate::metrics::{self, MetricsSnapshot};

/// Key bytes from CLI text: `hex:...`, `base64:...`, otherwise the UTF-8 passphrase.
pub fn parse_key(text: &str) -> Result<Vec<u8>> {
    if let Some(h) = text.strip_prefix("hex:") {
        hex::decode(h.trim()).context("hex key")
    } else if let Some(b) = text.strip_prefix("base64:") {
        base64::engine::general_purpose::STANDARD
            .decode(b.trim())
            .context("base64 key")
    } else {
        Ok(text.as_bytes().to_vec())
    }
}

fn open_keyed(uri: &str, key: Option<&str>) -> Result<Connection> {
    let mut conn = Connection::open(uri).with_context(|| format!("open {}", uri))?;
    if let Some(k) = key {
        let bytes = parse_key(k)?;
        conn.key(&bytes).with_context(|| format!("key {}", uri))?;
    }
    Ok(conn)
}

fn display_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => format!("(binary {} B) {}", bytes.len(), hex::encode(bytes)),
    }
}

pub fn cmd_init(uri: &str, key: Option<&str>, page_size: Option<usize>) -> Result<()> {
    let mut conn = Connection::open(uri).with_context(|| format!("open {}", uri))?;
    if let Some(ps) = page_size {
        conn.set_next_page_size(ps)?;
    }
    match key {
        Some(k) => conn.key(&parse_key(k)?).context("key new database")?,
        None => conn.key(&[]).context("attach new database")?,
    }
    conn.insert_many(MAIN_DB, std::iter::empty::<&[u8]>())
        .context("write page 1")?;
    let st = conn.status(MAIN_DB)?;
    println!(
        "Initialized {} (page_size={}, {})",
        st.path,
        st.page_size,
        if st.encrypted { "encrypted" } else { "plaintext" }
    );
    Ok(())
}

pub fn cmd_insert(uri: &str, key: Option<&str>, rows: &[String]) -> Result<()> {
    let mut conn = open_keyed(uri, key)?;
    let total = conn
        .insert_many(MAIN_DB, rows.iter().map(|r| r.as_bytes()))
        .context("insert rows")?;
    println!("Inserted {} row(s), {} total", rows.len(), total);
    Ok(())
}

#[derive(Serialize)]
struct RowOut {
    index: usize,
    len: usize,
    hex: String,
}

pub fn cmd_dump(uri: &str, key: Option<&str>, json: bool) -> Result<()> {
    let mut conn = open_keyed(uri, key)?;
    let rows = conn.rows(MAIN_DB).context("read rows")?;
    if json {
        let out: Vec<RowOut> = rows
            .iter()
            .enumerate()
            .map(|(index, r)| RowOut {
                index,
                len: r.len(),
                hex: hex::encode(r),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("(no rows)");
        return Ok(());
    }
    for (i, r) in rows.iter().enumerate() {
        println!("{:>6}: {}", i, display_text(r));
    }
    Ok(())
}

pub fn cmd_rekey(uri: &str, key: Option<&str>, new_key: &str) -> Result<()> {
    let mut conn = open_keyed(uri, key)?;
    let bytes = parse_key(new_key)?;
    conn.rekey(&bytes).context("rekey")?;
    let st = conn.status(MAIN_DB)?;
    println!(
        "Rekeyed {}: {} pages, {}",
        st.path,
        st.pages,
        if st.encrypted { "encrypted" } else { "plaintext" }
    );
    Ok(())
}

pub fn cmd_verify(uri: &str, key: Option<&str>) -> Result<()> {
    let mut conn = open_keyed(uri, key)?;
    let rows = conn.rows(MAIN_DB).context("read rows")?;
    let pager = conn.pager_mut(MAIN_DB)?;
    pager.shared_lock()?;
    let pending = pending_byte_page(pager.page_size());
    let count = pager.page_count();
    let mut bad = Vec::new();
    for pgno in 1..=count {
        if pgno == pending {
            continue;
        }
        if let Err(e) = pager.read(pgno) {
            bad.push((pgno, e));
        }
    }
    pager.unlock_if_unused();
    if bad.is_empty() {
        println!("OK: {} page(s), {} row(s)", count, rows.len());
        return Ok(());
    }
    for (pgno, e) in &bad {
        println!("page {}: {} ({})", pgno, e, e.code());
    }
    Err(anyhow!("{} of {} page(s) failed verification", bad.len(), count))
}

#[derive(Serialize)]
struct StatusOut {
    database: DbStatus,
    metrics: MetricsSnapshot,
}

pub fn cmd_status(uri: &str, key: Option<&str>, json: bool) -> Result<()> {
    let mut conn = open_keyed(uri, key)?;
    if key.is_none() {
        // проверка как открытого текста; отказ - тоже статус
        let _ = conn.rows(MAIN_DB);
    }
    let st = conn.status(MAIN_DB)?;
    let m = metrics::snapshot();
    if json {
        let out = StatusOut {
            database: st,
            metrics: m,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    println!("Database '{}' at {}", st.name, st.path);
    println!("  page_size    = {} bytes", st.page_size);
    println!("  pages        = {}", st.pages);
    println!("  reserved     = {}", st.reserved);
    println!("  encrypted    = {}", st.encrypted);
    println!("  codec        = {}", st.codec_state);
    println!("  attach       = {}", st.attach_state);
    match st.rows {
        Some(n) => println!("  rows         = {}", n),
        None => println!("  rows         = (unavailable)"),
    }
    println!("  pages enc/dec = {}/{}", m.pages_encrypted, m.pages_decrypted);
    println!(
        "  auth failures = {} ({:.1}%)",
        m.auth_failures,
        m.auth_failure_ratio() * 100.0
    );
    Ok(())
}
