// Data file path utilities.
// Each dataset key owns `<key>.json`, `<key>.json.new` and `<key>.json.old` in the data directory,
// with the key percent-encoded so distinct keys never share a file.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

const CURRENT_EXT: &str = ".json";
const STAGING_SUFFIX: &str = ".new";
const PREVIOUS_SUFFIX: &str = ".old";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "datafiles")
}

/// Default directory for persisted datasets (~/.local/share/datafiles/data on Linux).
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("data"))
}

/// Default location of the configuration file.
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("datafiles.toml"))
}

/// File name of the current value for a key.
pub fn current_file_name(key: &str) -> String {
    format!("{}{}", encode_name(key), CURRENT_EXT)
}

/// Path to the current value for a key.
pub fn current_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(current_file_name(key))
}

/// Path to the staging file written before rotation.
pub fn staging_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}{}", current_file_name(key), STAGING_SUFFIX))
}

/// Path to the previous value kept while rotation is in progress.
pub fn previous_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}{}", current_file_name(key), PREVIOUS_SUFFIX))
}

/// Recover the key from a leftover staging or previous file name.
/// Returns `None` for current files, unrelated entries and malformed escapes.
pub fn leftover_key(file_name: &str) -> Option<String> {
    file_name
        .strip_suffix(STAGING_SUFFIX)
        .or_else(|| file_name.strip_suffix(PREVIOUS_SUFFIX))
        .and_then(|name| name.strip_suffix(CURRENT_EXT))
        .filter(|name| !name.is_empty())
        .and_then(decode_name)
}

fn is_reserved(c: char) -> bool {
    matches!(
        c,
        '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%'
    ) || c.is_control()
}

/// Encode a key for use in filesystem paths.
/// Reserved characters and `%` become `%XX` escapes so distinct keys never share a file.
fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for c in name.chars() {
        if is_reserved(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        } else {
            encoded.push(c);
        }
    }
    encoded
}

/// Inverse of `encode_name`.
fn decode_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
