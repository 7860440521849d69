//! Utility functions

use crate::error::{ForgeError, ForgeIoError};
use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// A regex that matches the first semver-looking token in a tool's version
/// banner, e.g. `clang version 17.0.6 (...)` => `17.0.6`.
pub static RE_TOOL_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<version>\d+\.\d+(?:\.\d+)?)").unwrap());

/// A regex that matches a C function prototype in a cgo-generated header with
/// the named groups "ret", "name" and "params".
pub static RE_C_PROTOTYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*extern\s+(?P<ret>[A-Za-z_][\w\s\*]*?)\s+(?P<name>[A-Za-z_]\w*)\s*\((?P<params>[^)]*)\)\s*;")
        .unwrap()
});

/// Returns an iterator that yields all files under `root` (or `root` itself,
/// if it is a file) whose extension is in `extensions`.
///
/// This also follows symlinks.
pub fn source_files_iter<'a>(
    root: &Path,
    extensions: &'a [&'a str],
) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path().extension().map(|ext| extensions.iter().any(|e| ext == *e)).unwrap_or_default()
        })
        .map(|e| e.path().into())
}

/// Returns a sorted list of absolute paths to all source files under `root`
/// matching the given extensions.
///
/// The result is sorted so that fingerprints derived from it are
/// deterministic.
pub fn source_files(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<_> = source_files_iter(root, extensions).collect();
    files.sort();
    files
}

/// Canonicalize the path, platform-agnostic.
///
/// On windows this will ensure the path only consists of `/` separators.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf, ForgeIoError> {
    let path = path.as_ref();
    let res = dunce::canonicalize(path);
    #[cfg(windows)]
    let res = res.map(|p| {
        use path_slash::PathBufExt;
        PathBuf::from(p.to_slash_lossy().as_ref())
    });
    res.map_err(|err| ForgeIoError::new(err, path))
}

/// Returns the same path config but with canonicalized paths.
///
/// This will take care of errors due to symlinked directories by
/// keeping the original path on failure.
pub fn canonicalized(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    canonicalize(&path).unwrap_or(path)
}

/// Reads the json file and deserialize it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ForgeError> {
    let bytes = fs::read(path).map_err(|err| ForgeError::io(err, path))?;
    serde_json::from_slice(&bytes).map_err(Into::into)
}

/// Reads a descriptor file that may contain `//` line comments and trailing
/// commas, strips both and deserializes the remainder.
///
/// `forge.json` and `module.json` are read through this, plain machine
/// written json (cache, interfaces) is not.
pub fn read_jsonc_file<T: DeserializeOwned>(path: &Path) -> Result<T, ForgeError> {
    let content = fs::read_to_string(path).map_err(|err| ForgeError::io(err, path))?;
    serde_json::from_str(&strip_jsonc(&content)).map_err(Into::into)
}

/// Writes serializes the provided value to JSON and writes it to a file.
pub fn write_json_file<T: Serialize>(
    value: &T,
    path: &Path,
    capacity: usize,
) -> Result<(), ForgeError> {
    let file = fs::File::create(path).map_err(|err| ForgeError::io(err, path))?;
    let mut writer = std::io::BufWriter::with_capacity(capacity, file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|e| ForgeError::io(e, path))
}

/// Creates the parent directory of the `file` and all its ancestors if it does
/// not exist.
pub fn create_parent_dir_all(file: &Path) -> Result<(), ForgeError> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            ForgeError::msg(format!(
                "Failed to create parent folder \"{}\": {}",
                parent.display(),
                err
            ))
        })?;
    }
    Ok(())
}

/// Removes `//` line comments and trailing commas from descriptor content.
///
/// String literals are respected, including escaped quotes. Block comments are
/// not part of the descriptor dialect.
pub fn strip_jsonc(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ',' => {
                // a comma directly followed by `]`/`}` (ignoring whitespace and
                // comments) is dropped
                let mut lookahead = chars.clone();
                let mut closes = false;
                while let Some(&n) = lookahead.peek() {
                    if n.is_whitespace() {
                        lookahead.next();
                    } else if n == '/' {
                        let mut probe = lookahead.clone();
                        probe.next();
                        if probe.peek() == Some(&'/') {
                            for c in probe.by_ref() {
                                if c == '\n' {
                                    break;
                                }
                            }
                            lookahead = probe;
                        } else {
                            break;
                        }
                    } else {
                        closes = n == ']' || n == '}';
                        break;
                    }
                }
                if !closes {
                    out.push(',');
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex-encoded SHA-256 of the given bytes.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Incremental SHA-256 over multiple chunks, hex-encoded.
pub fn sha256_chunks_hex<I, B>(chunks: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// Attempts to find a semver version in a tool's version banner.
pub fn parse_tool_version(banner: &str) -> Result<Version, ForgeError> {
    let m = RE_TOOL_VERSION
        .captures(banner)
        .and_then(|cap| cap.name("version"))
        .ok_or_else(|| ForgeError::msg(format!("no version found in output: {banner:?}")))?;
    let raw = m.as_str();
    // tools like `go` report `1.21`, pad to a full semver
    let padded = if raw.matches('.').count() == 1 { format!("{raw}.0") } else { raw.to_string() };
    Ok(Version::parse(&padded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_line_comments_and_trailing_commas() {
        let input = r#"{
            // project descriptor
            "name": "demo", // inline
            "modules": ["a", "b",],
            "url": "https://example.com//not-a-comment",
        }"#;
        let value: serde_json::Value = serde_json::from_str(&strip_jsonc(input)).unwrap();
        assert_eq!(value["name"], "demo");
        assert_eq!(value["modules"].as_array().unwrap().len(), 2);
        assert_eq!(value["url"], "https://example.com//not-a-comment");
    }

    #[test]
    fn trailing_comma_before_comment_is_stripped() {
        let input = "{\n\"a\": 1, // last\n}";
        let value: serde_json::Value = serde_json::from_str(&strip_jsonc(input)).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parses_tool_versions() {
        assert_eq!(
            parse_tool_version("clang version 17.0.6 (Fedora 17.0.6-2)").unwrap(),
            Version::new(17, 0, 6)
        );
        assert_eq!(parse_tool_version("go version go1.21 linux/amd64").unwrap(), Version::new(1, 21, 0));
        assert!(parse_tool_version("no digits here").is_err());
    }

    #[test]
    fn source_files_are_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.c", "a.c", "c.h", "ignore.txt"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let files = source_files(tmp.path(), &["c", "h"]);
        let names: Vec<_> =
            files.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["a.c", "b.c", "c.h"]);
    }
}
