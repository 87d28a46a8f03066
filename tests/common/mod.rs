//! Shared test harness.
//!
//! Builds a scratch pack from a small fixture tree in a temp directory and
//! boots the real server (accept loop, zero-copy path and all) on a random
//! port. Brotli is disabled for every fixture entry so results do not
//! depend on the external tool being installed.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use htpack::packer::{self, FileToPack, FilesToPack};
use htpack::{server, Handler, HandlerBuilder, Mount, PackService};

/// The bytes of each fixture file, shared with assertions.
pub const HELLO: &[u8] = b"hello\n";
pub const DOCS_INDEX: &[u8] = b"<!doctype html><html><body>docs</body></html>\n";

/// A built fixture pack plus the source files it was packed from.
pub struct TestPack {
    dir: TempDir,
    pub pack_path: PathBuf,
    pub style_css: Vec<u8>,
    pub noise_bin: Vec<u8>,
}

impl TestPack {
    pub fn src_dir(&self) -> PathBuf {
        self.dir.path().join("src")
    }
}

/// A highly compressible stylesheet, large enough to clear the savings
/// gate by a wide margin.
pub fn compressible_css() -> Vec<u8> {
    b".section { margin: 0 auto; padding: 16px; color: #333333; }\n".repeat(256)
}

/// Incompressible bytes from a fixed xorshift sequence, so gzip output is
/// larger than the savings gate allows.
pub fn incompressible_bytes(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// Write the fixture tree and return its manifest.
pub fn fixture_manifest(src: &Path) -> FilesToPack {
    std::fs::create_dir_all(src.join("docs")).unwrap();
    std::fs::write(src.join("hello.txt"), HELLO).unwrap();
    std::fs::write(src.join("docs/index.html"), DOCS_INDEX).unwrap();
    std::fs::write(src.join("style.css"), compressible_css()).unwrap();
    std::fs::write(src.join("noise.bin"), incompressible_bytes(8 * 1024)).unwrap();

    let entry = |name: &str| FileToPack {
        filename: src.join(name),
        disable_brotli: true,
        ..FileToPack::default()
    };

    let mut files = FilesToPack::new();
    files.insert("/hello.txt".to_string(), entry("hello.txt"));
    files.insert("/docs/index.html".to_string(), entry("docs/index.html"));
    files.insert("/style.css".to_string(), entry("style.css"));
    files.insert("/noise.bin".to_string(), entry("noise.bin"));
    files
}

/// Build the fixture pack in a fresh temp directory.
pub fn build_fixture_pack() -> TestPack {
    let dir = tempfile::tempdir().expect("create temp dir");
    let src = dir.path().join("src");
    let files = fixture_manifest(&src);

    let pack_path = dir.path().join("fixture.htpack");
    packer::pack(&files, &pack_path).expect("pack fixture");

    TestPack {
        dir,
        pack_path,
        style_css: compressible_css(),
        noise_bin: incompressible_bytes(8 * 1024),
    }
}

/// A running server; shuts down when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    cancel: CancellationToken,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Serve a single pack at `/`, with the builder customized by the caller.
pub async fn serve_pack(
    pack: &Path,
    configure: impl FnOnce(HandlerBuilder) -> HandlerBuilder,
) -> TestServer {
    let handler = configure(HandlerBuilder::new(pack))
        .build()
        .expect("build handler");
    serve_mounts(vec![Mount::new("/", Arc::new(handler))]).await
}

/// Serve an arbitrary set of mounts on a random port.
pub async fn serve_mounts(mounts: Vec<Mount>) -> TestServer {
    let service = Arc::new(PackService::new(mounts).expect("build service"));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind random port");
    let addr = listener.local_addr().expect("local addr");

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        server::serve(listener, service, server_cancel).await.ok();
    });

    TestServer { addr, cancel }
}

/// Build a handler for a pack without serving it.
pub fn load_handler(pack: &Path) -> Handler {
    HandlerBuilder::new(pack).build().expect("build handler")
}
