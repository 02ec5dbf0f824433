use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use fs2::FileExt;

use sleet::{AttachState, Connection, ErrorCode, SleetConfig, MAIN_DB};

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("sleet-{}-{}-{}", prefix, pid, t))
}

fn cfg() -> SleetConfig {
    SleetConfig::default()
        .with_kdf_iterations(16)
        .with_default_page_size(1024)
        .with_data_fsync(false)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn sample_rows(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("journal-{:04}", i).into_bytes()).collect()
}

#[test]
fn hot_journal_is_played_back_on_attach() -> Result<()> {
    let root = unique_root("hotjournal");
    fs::create_dir_all(&root)?;
    let path = root.join("j.db");
    let uri = path.to_str().unwrap().to_string();
    let rows = sample_rows(150);

    {
        let mut conn = Connection::open_with_config(&uri, cfg())?;
        conn.key(b"alpha")?;
        conn.insert_many(MAIN_DB, rows.iter())?;
    }
    let before = fs::read(&path)?;
    assert!(before.len() >= 3 * 1024);

    {
        let mut conn = Connection::open_with_config(&uri, cfg())?;
        conn.key(b"alpha")?;
        let pager = conn.pager_mut(MAIN_DB)?;
        pager.begin_write()?;
        pager.write(2)?.fill(0xEE);
        pager.mark_dirty(3)?;
        pager.inject_write_fault(1);
        assert!(pager.commit().is_err());
        // соединение закрывается без rollback: журнал остаётся «горячим»
    }
    assert!(sidecar(&path, "-journal").exists());
    assert_ne!(fs::read(&path)?, before);

    let mut conn = Connection::open_with_config(&uri, cfg())?;
    conn.key(b"alpha")?;
    assert!(!sidecar(&path, "-journal").exists());
    // образы в журнале перешифрованы тем же ключом: размер тот же, байты - нет
    assert_eq!(fs::metadata(&path)?.len(), before.len() as u64);
    assert_eq!(conn.rows(MAIN_DB)?, rows);
    Ok(())
}

#[test]
fn rollback_restores_cached_pages() -> Result<()> {
    let root = unique_root("rollback");
    fs::create_dir_all(&root)?;
    let path = root.join("rb.db");
    let uri = path.to_str().unwrap().to_string();
    let rows = sample_rows(80);

    let mut conn = Connection::open_with_config(&uri, cfg())?;
    conn.key(b"alpha")?;
    conn.insert_many(MAIN_DB, rows.iter())?;

    let pager = conn.pager_mut(MAIN_DB)?;
    pager.begin_write()?;
    pager.write(2)?.fill(0);
    pager.rollback()?;
    pager.unlock_if_unused();
    assert!(!sidecar(&path, "-journal").exists());
    assert_eq!(conn.rows(MAIN_DB)?, rows);
    Ok(())
}

#[test]
fn torn_commit_write_is_restored_from_journal() -> Result<()> {
    let root = unique_root("torn");
    fs::create_dir_all(&root)?;
    let path = root.join("t.db");
    let uri = path.to_str().unwrap().to_string();
    let rows = sample_rows(80);

    let mut conn = Connection::open_with_config(&uri, cfg())?;
    conn.key(b"alpha")?;
    conn.insert_many(MAIN_DB, rows.iter())?;

    let pager = conn.pager_mut(MAIN_DB)?;
    pager.begin_write()?;
    pager.write(2)?.fill(0x11);
    pager.inject_torn_write(0);
    assert!(pager.commit().is_err());
    pager.rollback()?;
    pager.unlock_if_unused();

    assert!(!sidecar(&path, "-journal").exists());
    assert_eq!(conn.rows(MAIN_DB)?, rows);
    drop(conn);

    let mut again = Connection::open_with_config(&uri, cfg())?;
    again.key(b"alpha")?;
    assert_eq!(again.rows(MAIN_DB)?, rows);
    Ok(())
}

#[test]
fn busy_handler_decides_retries() -> Result<()> {
    let root = unique_root("busy");
    fs::create_dir_all(&root)?;
    let path = root.join("b.db");
    let uri = path.to_str().unwrap().to_string();
    {
        let mut conn = Connection::open_with_config(&uri, cfg())?;
        conn.insert(MAIN_DB, b"row")?;
    }

    let holder = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(sidecar(&path, "-lock"))?;
    FileExt::lock_exclusive(&holder)?;

    // без обработчика - сразу BUSY
    let mut conn = Connection::open_with_config(&uri, cfg())?;
    assert_eq!(conn.rows(MAIN_DB).unwrap_err().code(), ErrorCode::Busy);
    assert_eq!(conn.state(MAIN_DB)?, AttachState::Unattached);

    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    conn.set_busy_handler(
        MAIN_DB,
        Some(Box::new(move |attempts: u32| {
            seen.fetch_add(1, Ordering::SeqCst);
            attempts < 3
        })),
    )?;
    assert_eq!(conn.rows(MAIN_DB).unwrap_err().code(), ErrorCode::Busy);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    // обработчик сам отпускает чужую блокировку на третьем вызове
    let mut held = Some(holder);
    conn.set_busy_handler(
        MAIN_DB,
        Some(Box::new(move |attempts: u32| {
            if attempts == 2 {
                if let Some(f) = held.take() {
                    let _ = FileExt::unlock(&f);
                }
            }
            attempts < 10
        })),
    )?;
    assert_eq!(conn.rows(MAIN_DB)?, vec![b"row".to_vec()]);
    assert_eq!(conn.state(MAIN_DB)?, AttachState::Verified);
    Ok(())
}

#[test]
fn timeout_handler_from_config_gives_up() -> Result<()> {
    let root = unique_root("busy-timeout");
    fs::create_dir_all(&root)?;
    let path = root.join("t.db");
    let uri = path.to_str().unwrap().to_string();
    {
        let mut conn = Connection::open_with_config(&uri, cfg())?;
        conn.insert(MAIN_DB, b"row")?;
    }
    let holder = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(sidecar(&path, "-lock"))?;
    FileExt::lock_exclusive(&holder)?;

    let started = std::time::Instant::now();
    let mut conn = Connection::open_with_config(&uri, cfg().with_busy_timeout_ms(60))?;
    assert_eq!(conn.rows(MAIN_DB).unwrap_err().code(), ErrorCode::Busy);
    assert!(started.elapsed() >= std::time::Duration::from_millis(60));

    FileExt::unlock(&holder)?;
    assert_eq!(conn.rows(MAIN_DB)?.len(), 1);
    Ok(())
}
