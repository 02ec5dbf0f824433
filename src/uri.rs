//! Connection URIs.
//!
//! Поддерживается:
//! - обычный путь: `/tmp/a.db` (без параметров);
//! - `file:` URI: `file:/tmp/a.db?page_size=1024&hexsalt=00ff...#frag`,
//!   `file:///tmp/a.db?...`, `file://localhost/tmp/a.db?...`.
//!
//! Значения параметров проходят percent-decoding и хранятся как байты
//! (сырая соль/заголовок может быть не-UTF8). Параметр без `=` имеет пустое значение.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct UriParams {
    path: PathBuf,
    params: Vec<(String, Vec<u8>)>,
}

impl UriParams {
    pub fn parse(uri: &str) -> Self {
        let Some(rest) = uri.strip_prefix("file:") else {
            return Self {
                path: PathBuf::from(uri),
                params: Vec::new(),
            };
        };

        // отрезать #fragment
        let rest = match rest.find('#') {
            Some(i) => &rest[..i],
            None => rest,
        };
        let (raw_path, query) = match rest.find('?') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };

        let raw_path = if let Some(p) = raw_path.strip_prefix("//localhost") {
            p
        } else if let Some(p) = raw_path.strip_prefix("//") {
            // file://host/path - authority, кроме localhost, не поддерживается; берём путь
            match p.find('/') {
                Some(i) => &p[i..],
                None => p,
            }
        } else {
            raw_path
        };
        let path = PathBuf::from(String::from_utf8_lossy(&percent_decode(raw_path)).into_owned());

        let mut params = Vec::new();
        if let Some(q) = query {
            for pair in q.split('&').filter(|s| !s.is_empty()) {
                let (k, v) = match pair.find('=') {
                    Some(i) => (&pair[..i], &pair[i + 1..]),
                    None => (pair, ""),
                };
                let key = String::from_utf8_lossy(&percent_decode(k)).into_owned();
                params.push((key, percent_decode(v)));
            }
        }

        Self { path, params }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First value of `name`, if present (possibly empty).
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Integer value of `name` (decimal, or `0x` hex); `default` when absent or malformed.
    pub fn int64(&self, name: &str, default: i64) -> i64 {
        let Some(s) = self.get_str(name) else {
            return default;
        };
        let s = s.trim();
        let parsed = if let Some(h) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u64::from_str_radix(h, 16).ok().map(|v| v as i64)
        } else {
            s.parse::<i64>().ok()
        };
        parsed.unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

pub(crate) fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// `%XX` → байт; некорректные последовательности остаются как есть.
fn percent_decode(s: &str) -> Vec<u8> {
    let b = s.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'%' && i + 2 < b.len() {
            if let (Some(h), Some(l)) = (hex_val(b[i + 1]), hex_val(b[i + 2])) {
                out.push((h << 4) | l);
                i += 3;
                continue;
            }
        }
        out.push(b[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_has_no_params() {
        let u = UriParams::parse("/tmp/x.db");
        assert_eq!(u.path(), Path::new("/tmp/x.db"));
        assert!(u.get("salt").is_none());
        assert_eq!(u.int64("page_size", -1), -1);
    }

    #[test]
    fn file_uri_params() {
        let u = UriParams::parse("file:///tmp/a%20b.db?page_size=1024&salt=&kdf=none&skip#frag");
        assert_eq!(u.path(), Path::new("/tmp/a b.db"));
        assert_eq!(u.int64("page_size", -1), 1024);
        assert_eq!(u.get("salt"), Some(&b""[..]));
        assert_eq!(u.get_str("kdf"), Some("none"));
        assert_eq!(u.get("skip"), Some(&b""[..]));
        assert_eq!(u.int64("skip", -1), -1);
        assert!(u.get("frag").is_none());
    }

    #[test]
    fn percent_decoding_yields_raw_bytes() {
        let u = UriParams::parse("file:db?header=%00%ffab%zz%4");
        assert_eq!(u.get("header"), Some(&[0x00, 0xff, b'a', b'b', b'%', b'z', b'z', b'%', b'4'][..]));
    }

    #[test]
    fn first_occurrence_wins_and_hex_ints() {
        let u = UriParams::parse("file:localhost.db?skip=0x10&skip=3");
        assert_eq!(u.path(), Path::new("localhost.db"));
        assert_eq!(u.int64("skip", -1), 16);
    }
}
