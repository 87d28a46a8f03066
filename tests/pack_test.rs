//! Build→load invariants for the pack format.

mod common;

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;

use prost::Message;
use sha2::{Digest, Sha384};

use htpack::error::Error;
use htpack::packed::{self, Directory, FileData, Header};

use common::{build_fixture_pack, fixture_manifest, HELLO};

#[test]
fn loaded_pack_matches_manifest() {
    let fixture = build_fixture_pack();
    let f = File::open(&fixture.pack_path).unwrap();
    let (hdr, dir) = packed::load(&f).unwrap();

    assert_eq!(hdr.magic, packed::MAGIC);
    assert_eq!(hdr.version, packed::VERSION);

    let mut paths: Vec<&String> = dir.files.keys().collect();
    paths.sort();
    assert_eq!(
        paths,
        ["/docs/index.html", "/hello.txt", "/noise.bin", "/style.css"]
    );
}

#[test]
fn uncompressed_bytes_round_trip() {
    let fixture = build_fixture_pack();
    let f = File::open(&fixture.pack_path).unwrap();
    let (_, dir) = packed::load(&f).unwrap();

    for (path, source) in [
        ("/hello.txt", HELLO.to_vec()),
        ("/style.css", fixture.style_css.clone()),
        ("/noise.bin", fixture.noise_bin.clone()),
    ] {
        let data = dir.files[path].uncompressed.unwrap();
        assert_eq!(data.length, source.len() as u64, "{path}");

        let mut got = vec![0u8; data.length as usize];
        f.read_exact_at(&mut got, data.offset).unwrap();
        assert_eq!(got, source, "{path}");
    }
}

#[test]
fn payloads_are_page_aligned() {
    let fixture = build_fixture_pack();
    let f = File::open(&fixture.pack_path).unwrap();
    let (hdr, dir) = packed::load(&f).unwrap();

    assert_eq!(hdr.directory_offset % packed::PAGE_SIZE, 0);
    for (path, info) in &dir.files {
        for data in [&info.uncompressed, &info.gzip, &info.brotli]
            .into_iter()
            .flatten()
        {
            assert_eq!(data.offset % packed::PAGE_SIZE, 0, "{path}");
        }
    }
}

#[test]
fn etag_is_quoted_sha384_and_deterministic() {
    let first = build_fixture_pack();
    let second = build_fixture_pack();

    let load = |pack: &std::path::Path| {
        let f = File::open(pack).unwrap();
        packed::load(&f).unwrap().1
    };
    let dir_a = load(&first.pack_path);
    let dir_b = load(&second.pack_path);

    let expected = format!("\"1--{}\"", hex::encode(Sha384::digest(HELLO)));
    assert_eq!(dir_a.files["/hello.txt"].etag, expected);

    for (path, info) in &dir_a.files {
        assert_eq!(info.etag, dir_b.files[path].etag, "{path}");
    }
}

#[test]
fn savings_gate_decides_gzip_presence() {
    let fixture = build_fixture_pack();
    let f = File::open(&fixture.pack_path).unwrap();
    let (_, dir) = packed::load(&f).unwrap();

    // Highly compressible: the variant must exist and must decode to the
    // original bytes.
    let css = &dir.files["/style.css"];
    let gz = css.gzip.expect("compressible file should carry gzip");
    assert!(gz.length + 128 <= fixture.style_css.len() as u64);

    let mut raw = vec![0u8; gz.length as usize];
    f.read_exact_at(&mut raw, gz.offset).unwrap();
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(&raw[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, fixture.style_css);

    // Incompressible: discarded by the gate.
    assert!(dir.files["/noise.bin"].gzip.is_none());
    // Tiny: can never save 128 bytes.
    assert!(dir.files["/hello.txt"].gzip.is_none());
}

#[test]
fn content_types_survive_packing() {
    let fixture = build_fixture_pack();
    let f = File::open(&fixture.pack_path).unwrap();
    let (_, dir) = packed::load(&f).unwrap();

    assert_eq!(dir.files["/style.css"].content_type, "text/css");
    assert_eq!(
        dir.files["/docs/index.html"].content_type,
        "text/html; charset=utf-8"
    );
    assert_eq!(
        dir.files["/hello.txt"].content_type,
        "text/plain; charset=utf-8"
    );
    assert_eq!(
        dir.files["/noise.bin"].content_type,
        "application/octet-stream"
    );
}

#[test]
fn brotli_variant_packed_when_tool_present() {
    if !htpack::packer::compress::brotli_available() {
        eprintln!("brotli tool not installed; skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let css = dir.path().join("style.css");
    std::fs::write(&css, common::compressible_css()).unwrap();

    let mut files = htpack::packer::FilesToPack::new();
    files.insert(
        "/style.css".to_string(),
        htpack::packer::FileToPack {
            filename: css,
            ..Default::default()
        },
    );
    let out = dir.path().join("br.htpack");
    htpack::packer::pack(&files, &out).unwrap();

    let f = File::open(&out).unwrap();
    let (_, loaded) = packed::load(&f).unwrap();
    let info = &loaded.files["/style.css"];

    let br = info.brotli.expect("brotli variant expected");
    assert_eq!(br.offset % packed::PAGE_SIZE, 0);
    assert!(br.length + 128 <= common::compressible_css().len() as u64);
    assert!(info.gzip.is_some());
}

#[test]
fn failed_build_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let mut files = fixture_manifest(&src);

    // Point one entry at a file that does not exist.
    files.get_mut("/hello.txt").unwrap().filename = src.join("vanished.txt");

    let out = dir.path().join("broken.htpack");
    let err = htpack::packer::pack(&files, &out).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "unexpected: {err:?}");
    assert!(!out.exists(), "failed build must not leave a pack behind");
}

// ---------------------------------------------------------------------------
// Loader rejection taxonomy, against hand-crafted packs
// ---------------------------------------------------------------------------

/// Write a pack consisting of a header and a directory, with the directory
/// placed immediately after the header.
fn write_pack(dir: &Directory, magic: u64, version: u64) -> tempfile::NamedTempFile {
    let dir_bytes = dir.encode_to_vec();
    let hdr = Header {
        magic,
        version,
        directory_offset: packed::HEADER_LEN as u64,
        directory_length: dir_bytes.len().max(1) as u64,
    };

    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().write_all_at(&hdr.encode_to_vec(), 0).unwrap();
    tmp.as_file()
        .write_all_at(&dir_bytes, packed::HEADER_LEN as u64)
        .unwrap();
    tmp
}

fn one_entry(path: &str, uncompressed: Option<FileData>) -> Directory {
    let mut dir = Directory::default();
    dir.files.insert(
        path.to_string(),
        packed::File {
            content_type: "text/plain".to_string(),
            etag: "\"1--00\"".to_string(),
            uncompressed,
            gzip: None,
            brotli: None,
        },
    );
    dir
}

fn valid_entry() -> Option<FileData> {
    // Offset/length inside the header+directory region; the loader only
    // bounds-checks against file size.
    Some(FileData {
        offset: 0,
        length: 8,
    })
}

#[test]
fn loader_rejects_wrong_magic() {
    let tmp = write_pack(&one_entry("/a", valid_entry()), 0x1234, packed::VERSION);
    match packed::load(tmp.as_file()) {
        Err(Error::MagicMismatch { found }) => assert_eq!(found, 0x1234),
        other => panic!("expected MagicMismatch, got {other:?}"),
    }
}

#[test]
fn loader_rejects_wrong_version() {
    let tmp = write_pack(&one_entry("/a", valid_entry()), packed::MAGIC, 2);
    match packed::load(tmp.as_file()) {
        Err(Error::VersionTooNew { found }) => assert_eq!(found, 2),
        other => panic!("expected VersionTooNew, got {other:?}"),
    }
}

#[test]
fn loader_rejects_directory_past_eof() {
    let hdr = Header {
        magic: packed::MAGIC,
        version: packed::VERSION,
        directory_offset: 1 << 20,
        directory_length: 64,
    };
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().write_all_at(&hdr.encode_to_vec(), 0).unwrap();

    assert!(matches!(
        packed::load(tmp.as_file()),
        Err(Error::BadOffset { path: None })
    ));
}

#[test]
fn loader_rejects_relative_and_non_canonical_paths() {
    for bad in ["a", "/a/../b", "/a/"] {
        let tmp = write_pack(&one_entry(bad, valid_entry()), packed::MAGIC, packed::VERSION);
        assert!(
            matches!(packed::load(tmp.as_file()), Err(Error::InvalidPath { .. })),
            "expected rejection of {bad:?}"
        );
    }
}

#[test]
fn loader_rejects_missing_uncompressed() {
    let tmp = write_pack(&one_entry("/a", None), packed::MAGIC, packed::VERSION);
    match packed::load(tmp.as_file()) {
        Err(Error::MissingUncompressed { path }) => assert_eq!(path, "/a"),
        other => panic!("expected MissingUncompressed, got {other:?}"),
    }
}

#[test]
fn loader_rejects_entry_past_eof() {
    let entry = Some(FileData {
        offset: 1 << 20,
        length: 16,
    });
    let tmp = write_pack(&one_entry("/a", entry), packed::MAGIC, packed::VERSION);
    match packed::load(tmp.as_file()) {
        Err(Error::BadOffset { path }) => assert_eq!(path.as_deref(), Some("/a")),
        other => panic!("expected BadOffset, got {other:?}"),
    }
}

#[test]
fn loader_rejects_undecodable_header() {
    // Field 1 with a fixed32 wire type: mismatches the declared fixed64.
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file()
        .write_all_at(&[0x0du8; packed::HEADER_LEN], 0)
        .unwrap();

    assert!(matches!(
        packed::load(tmp.as_file()),
        Err(Error::HeaderUnmarshal { .. })
    ));
}

#[test]
fn loader_rejects_truncated_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().write_all_at(b"short", 0).unwrap();

    assert!(matches!(
        packed::load(tmp.as_file()),
        Err(Error::Io { .. })
    ));
}

#[test]
fn loader_rejects_undecodable_directory() {
    // Directory bytes that declare a length-delimited field running past
    // the end of the blob.
    let dir_bytes = [0x0au8, 0x7f, 0x01];
    let hdr = Header {
        magic: packed::MAGIC,
        version: packed::VERSION,
        directory_offset: packed::HEADER_LEN as u64,
        directory_length: dir_bytes.len() as u64,
    };
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().write_all_at(&hdr.encode_to_vec(), 0).unwrap();
    tmp.as_file()
        .write_all_at(&dir_bytes, packed::HEADER_LEN as u64)
        .unwrap();

    assert!(matches!(
        packed::load(tmp.as_file()),
        Err(Error::DirectoryUnmarshal { .. })
    ));
}
