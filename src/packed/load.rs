//! Loading and validating a ready-built pack file.

use std::fs::File as FsFile;
use std::os::unix::fs::FileExt;

use prost::Message;

use crate::error::{Error, Result};
use crate::packed::{Directory, FileData, Header, HEADER_LEN, MAGIC, VERSION};

/// Load a pack from an open file: decode and validate the header, then
/// decode the directory and run the consistency check.
///
/// The directory is checked for consistency (offsets, paths) but not
/// integrity: payload bytes are not read or checksummed here.
pub fn load(f: &FsFile) -> Result<(Header, Directory)> {
    let hdr = load_header(f)?;
    let dir = load_directory(f, &hdr)?;
    Ok((hdr, dir))
}

/// Read and decode the fixed-size header at offset 0, checking the magic
/// and version numbers.
fn load_header(f: &FsFile) -> Result<Header> {
    let mut raw = [0u8; HEADER_LEN];
    f.read_exact_at(&mut raw, 0)
        .map_err(|e| Error::io("read pack header", e))?;

    let hdr = Header::decode(&raw[..]).map_err(|source| Error::HeaderUnmarshal { source })?;

    if hdr.magic != MAGIC {
        return Err(Error::MagicMismatch { found: hdr.magic });
    }
    if hdr.version < VERSION {
        return Err(Error::VersionTooOld { found: hdr.version });
    }
    if hdr.version > VERSION {
        return Err(Error::VersionTooNew { found: hdr.version });
    }

    Ok(hdr)
}

/// Read and decode the directory blob located by `hdr`, then verify it
/// against the file size.
fn load_directory(f: &FsFile, hdr: &Header) -> Result<Directory> {
    let file_size = f
        .metadata()
        .map_err(|e| Error::io("stat pack file", e))?
        .len();

    match hdr.directory_offset.checked_add(hdr.directory_length) {
        Some(end) if end <= file_size => {}
        _ => return Err(Error::BadOffset { path: None }),
    }

    let mut raw = vec![0u8; hdr.directory_length as usize];
    f.read_exact_at(&mut raw, hdr.directory_offset)
        .map_err(|e| Error::io("read pack directory", e))?;

    let dir = Directory::decode(&raw[..]).map_err(|source| Error::DirectoryUnmarshal { source })?;

    check_directory(&dir, file_size)?;
    Ok(dir)
}

/// Verify directory consistency: every path is absolute and canonical, the
/// uncompressed variant is present, and every variant lies within the file.
///
/// Path uniqueness holds by construction: the wire directory decodes into a
/// map, so a duplicate key cannot survive decoding.
fn check_directory(dir: &Directory, file_size: u64) -> Result<()> {
    for (path, info) in &dir.files {
        if !path.starts_with('/') {
            return Err(Error::invalid_path(path, "relative path"));
        }
        if clean_path(path) != *path {
            return Err(Error::invalid_path(path, "non-canonical path"));
        }

        let uncompressed = info
            .uncompressed
            .as_ref()
            .ok_or_else(|| Error::MissingUncompressed { path: path.clone() })?;

        check_bounds(path, uncompressed, file_size)?;
        if let Some(gzip) = &info.gzip {
            check_bounds(path, gzip, file_size)?;
        }
        if let Some(brotli) = &info.brotli {
            check_bounds(path, brotli, file_size)?;
        }
    }
    Ok(())
}

fn check_bounds(path: &str, data: &FileData, file_size: u64) -> Result<()> {
    data.offset
        .checked_add(data.length)
        .filter(|end| *end <= file_size)
        .map(|_| ())
        .ok_or_else(|| Error::BadOffset {
            path: Some(path.to_string()),
        })
}

/// Lexically canonicalize a slash-separated path: collapse repeated
/// separators, resolve `.` and `..` segments, and drop any trailing slash
/// (except for the root itself).
///
/// Rooted paths never escape the root: leading `..` segments are dropped.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }

    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::File;

    fn entry(offset: u64, length: u64) -> File {
        File {
            content_type: "text/plain".to_string(),
            etag: "\"1--00\"".to_string(),
            uncompressed: Some(FileData { offset, length }),
            gzip: None,
            brotli: None,
        }
    }

    fn dir_with(path: &str, file: File) -> Directory {
        let mut dir = Directory::default();
        dir.files.insert(path.to_string(), file);
        dir
    }

    #[test]
    fn clean_path_cases() {
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("/a/b"), "/a/b");
        assert_eq!(clean_path("/a//b/"), "/a/b");
        assert_eq!(clean_path("/a/./b"), "/a/b");
        assert_eq!(clean_path("/a/../b"), "/b");
        assert_eq!(clean_path("/../b"), "/b");
        assert_eq!(clean_path("/a/.."), "/");
        assert_eq!(clean_path(""), ".");
        assert_eq!(clean_path("a/b/.."), "a");
        assert_eq!(clean_path("../a"), "../a");
    }

    #[test]
    fn check_accepts_valid_directory() {
        let dir = dir_with("/hello.txt", entry(4096, 6));
        assert!(check_directory(&dir, 8192).is_ok());
    }

    #[test]
    fn check_rejects_relative_path() {
        let dir = dir_with("hello.txt", entry(4096, 6));
        match check_directory(&dir, 8192) {
            Err(Error::InvalidPath { path, reason }) => {
                assert_eq!(path, "hello.txt");
                assert_eq!(reason, "relative path");
            }
            other => panic!("expected InvalidPath, got {other:?}"),
        }
    }

    #[test]
    fn check_rejects_non_canonical_path() {
        for bad in ["/a/../b", "/a//b", "/a/", "/a/./b"] {
            let dir = dir_with(bad, entry(4096, 6));
            assert!(
                matches!(check_directory(&dir, 8192), Err(Error::InvalidPath { .. })),
                "expected rejection of {bad:?}"
            );
        }
    }

    #[test]
    fn check_rejects_missing_uncompressed() {
        let mut file = entry(4096, 6);
        file.uncompressed = None;
        let dir = dir_with("/a", file);
        match check_directory(&dir, 8192) {
            Err(Error::MissingUncompressed { path }) => assert_eq!(path, "/a"),
            other => panic!("expected MissingUncompressed, got {other:?}"),
        }
    }

    #[test]
    fn check_rejects_out_of_bounds_variant() {
        let mut file = entry(4096, 6);
        file.gzip = Some(FileData {
            offset: 8192,
            length: 1,
        });
        let dir = dir_with("/a", file);
        match check_directory(&dir, 8192) {
            Err(Error::BadOffset { path }) => assert_eq!(path.as_deref(), Some("/a")),
            other => panic!("expected BadOffset, got {other:?}"),
        }
    }

    #[test]
    fn check_rejects_offset_overflow() {
        let dir = dir_with("/a", entry(u64::MAX, 2));
        assert!(matches!(
            check_directory(&dir, 8192),
            Err(Error::BadOffset { .. })
        ));
    }
}
