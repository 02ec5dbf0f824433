use anyhow::Result;
use std::fs;
use std::path::PathBuf;

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

fn uri_of(root: &std::path::Path, name: &str) -> String {
    root.join(name).to_str().unwrap().to_string()
}

#[test]
fn attached_database_inherits_main_key() -> Result<()> {
    let root = unique_root("inherit");
    fs::create_dir_all(&root)?;
    let main = uri_of(&root, "main.db");
    let aux = uri_of(&root, "aux.db");

    {
        let mut conn = Connection::open_with_config(&main, cfg())?;
        conn.key(b"alpha")?;
        conn.insert(MAIN_DB, b"in main")?;

        assert_eq!(conn.codec_key(0).map(|k| k.source), Some(0));
        conn.attach(&aux, "aux", None)?;
        assert_eq!(conn.state("aux")?, AttachState::Verified);
        assert!(conn.status("aux")?.encrypted);
        conn.insert("aux", b"in aux")?;
        conn.detach("aux")?;
        assert_eq!(conn.database_names(), vec![MAIN_DB]);
    }

    let raw = fs::read(&aux)?;
    assert!(!raw.windows(6).any(|w| w == b"in aux"));

    // тот же пароль открывает базу и отдельно: соль берётся с её страницы 1
    let mut alone = Connection::open_with_config(&aux, cfg())?;
    alone.key(b"alpha")?;
    assert_eq!(alone.rows(MAIN_DB)?, vec![b"in aux".to_vec()]);

    let mut conn = Connection::open_with_config(&main, cfg())?;
    conn.key(b"alpha")?;
    conn.attach(&aux, "aux", None)?;
    assert_eq!(conn.rows("aux")?, vec![b"in aux".to_vec()]);
    assert_eq!(conn.rows(MAIN_DB)?, vec![b"in main".to_vec()]);
    Ok(())
}

#[test]
fn plaintext_attach_and_rejections() -> Result<()> {
    let root = unique_root("attach-plain");
    fs::create_dir_all(&root)?;
    let main = uri_of(&root, "main.db");
    let plain = uri_of(&root, "plain.db");

    {
        let mut p = Connection::open_with_config(&plain, cfg())?;
        p.insert(MAIN_DB, b"visible")?;
    }
    let raw = fs::read(&plain)?;
    assert!(raw.windows(7).any(|w| w == b"visible"));

    let mut conn = Connection::open_with_config(&main, cfg())?;
    conn.key(b"alpha")?;
    conn.insert(MAIN_DB, b"secret")?;

    // без ключа attach наследует шифрование main и не узнаёт открытый файл
    let err = conn.attach(&plain, "p", None).unwrap_err();
    assert!(matches!(err.code(), ErrorCode::Auth | ErrorCode::NotADb), "{:?}", err);
    assert!(conn.database("p").is_err());

    // пустой ключ - открытый текст
    conn.attach(&plain, "p", Some(&b""[..]))?;
    assert_eq!(conn.rows("p")?, vec![b"visible".to_vec()]);
    assert!(!conn.status("p")?.encrypted);

    let err = conn.attach(&plain, "p", Some(&b""[..])).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Misuse);

    let err = conn.attach(&main, "other", Some(&b"wrong"[..])).unwrap_err();
    assert!(matches!(err.code(), ErrorCode::Auth | ErrorCode::NotADb));
    assert_eq!(conn.database_names(), vec![MAIN_DB, "p"]);
    Ok(())
}

#[test]
fn key_v2_unknown_name_means_main() -> Result<()> {
    let root = unique_root("keyv2");
    fs::create_dir_all(&root)?;
    let main = uri_of(&root, "main.db");

    let mut conn = Connection::open_with_config(&main, cfg())?;
    conn.key_v2("no-such-db", b"alpha")?;
    conn.insert(MAIN_DB, b"x")?;
    assert!(conn.status(MAIN_DB)?.encrypted);
    assert!(conn.rows("no-such-db").is_err());
    Ok(())
}

#[test]
fn misuse_leaves_state_untouched() -> Result<()> {
    let root = unique_root("misuse");
    fs::create_dir_all(&root)?;
    let path = root.join("m.db");

    for (query, key) in [
        ("kdf=none", &b"short"[..]),
        ("page_size=1000", &b"alpha"[..]),
        ("header=abc", &b"alpha"[..]),
        ("page_size=512&skip=600", &b"alpha"[..]),
    ] {
        let uri = format!("file:{}?{}", path.display(), query);
        let mut conn = Connection::open_with_config(&uri, cfg())?;
        let err = conn.key(key).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Misuse, "{}", query);
        assert_eq!(conn.state(MAIN_DB)?, AttachState::Unattached);
    }
    Ok(())
}

#[test]
fn key_change_inside_write_txn_keeps_codec() -> Result<()> {
    let root = unique_root("txn-key");
    fs::create_dir_all(&root)?;
    let main = uri_of(&root, "main.db");

    let mut conn = Connection::open_with_config(&main, cfg())?;
    conn.key(b"alpha")?;
    conn.insert(MAIN_DB, b"kept")?;

    conn.pager_mut(MAIN_DB)?.begin_write()?;
    let err = conn.key(b"beta").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Misuse);
    assert_eq!(conn.state(MAIN_DB)?, AttachState::Verified);
    assert!(conn.codec_key(0).is_some());

    let pager = conn.pager_mut(MAIN_DB)?;
    pager.rollback()?;
    pager.unlock_if_unused();
    assert!(conn.status(MAIN_DB)?.encrypted);
    assert_eq!(conn.rows(MAIN_DB)?, vec![b"kept".to_vec()]);
    Ok(())
}

#[test]
fn next_page_size_applies_to_new_key() -> Result<()> {
    let root = unique_root("nextps");
    fs::create_dir_all(&root)?;
    let main = uri_of(&root, "main.db");

    {
        let mut conn = Connection::open_with_config(&main, cfg())?;
        conn.set_next_page_size(4096)?;
        conn.key(b"alpha")?;
        conn.insert(MAIN_DB, b"x")?;
        assert_eq!(conn.status(MAIN_DB)?.page_size, 4096);
    }
    assert_eq!(fs::metadata(&main)?.len(), 4096);

    // без подсказки размера (по умолчанию 1024) страница 1 не распознаётся
    let mut conn = Connection::open_with_config(&main, cfg())?;
    assert!(conn.key(b"alpha").is_err());
    conn.set_next_page_size(4096)?;
    conn.key(b"alpha")?;
    assert_eq!(conn.rows(MAIN_DB)?, vec![b"x".to_vec()]);

    assert_eq!(conn.set_next_page_size(3000).unwrap_err().code(), ErrorCode::Misuse);
    Ok(())
}
