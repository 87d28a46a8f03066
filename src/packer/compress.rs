//! Compressed variant production.
//!
//! Each variant is written to a scratch file first, then appended to the
//! pack only if it clears the savings gate. Gzip is produced in-process
//! with a maximum-effort encoder; brotli by invoking the external `brotli`
//! tool, when one is installed.

use std::fs::File;
use std::io::BufWriter;
use std::num::NonZeroU64;
use std::path::Path;
use std::process::Command;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// A compressed variant is only worth keeping if it saves at least this
/// many bytes outright: the `Content-Encoding` header and client-side
/// decompression are not free.
const MIN_SAVINGS: u64 = 128;

/// Relative floor, as a right-shift of the uncompressed size: compression
/// must save at least `uncompressed >> MIN_SAVINGS_SHIFT` bytes (1/128) or
/// decompression overhead outweighs the transmission win.
const MIN_SAVINGS_SHIFT: u32 = 7;

/// Inputs above this size get a reduced iteration count; maximum-effort
/// encoding is quadratic enough to hurt on big assets.
const GZIP_EFFORT_CUTOFF: usize = 10 << 20;

/// Name of the external brotli encoder.
const BROTLI_TOOL: &str = "brotli";

/// Decide whether a compressed variant earns its place in the pack.
///
/// Both floors must hold: `compressed + 128 ≤ uncompressed` and
/// `compressed + uncompressed/128 ≤ uncompressed`.
pub fn worth_keeping(compressed: u64, uncompressed: u64) -> bool {
    compressed.saturating_add(MIN_SAVINGS) <= uncompressed
        && compressed.saturating_add(uncompressed >> MIN_SAVINGS_SHIFT) <= uncompressed
}

/// Gzip-compress `data` at maximum effort into an anonymous scratch file.
///
/// Uses 15 search iterations, dropping to 5 for inputs over 10 MiB.
pub fn gzip_to_scratch(data: &[u8]) -> Result<File> {
    let mut options = zopfli::Options::default();
    if data.len() > GZIP_EFFORT_CUTOFF {
        options.iteration_count = NonZeroU64::new(5).unwrap();
    }

    let scratch = tempfile::tempfile().map_err(|e| Error::io("create gzip scratch file", e))?;
    let mut writer = BufWriter::new(&scratch);
    zopfli::compress(options, zopfli::Format::Gzip, data, &mut writer)
        .and_then(|()| {
            use std::io::Write;
            writer.flush()
        })
        .map_err(|e| Error::io("gzip compress", e))?;
    drop(writer);

    Ok(scratch)
}

/// Probe whether the external brotli encoder is runnable.
pub fn brotli_available() -> bool {
    Command::new(BROTLI_TOOL)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Brotli-compress the file at `input` into a named scratch file by
/// invoking the external encoder. A non-zero exit surfaces the tool's
/// stderr.
pub fn brotli_to_scratch(input: &Path) -> Result<NamedTempFile> {
    let scratch = NamedTempFile::new().map_err(|e| Error::io("create brotli scratch file", e))?;

    let output = Command::new(BROTLI_TOOL)
        .arg("-f")
        .arg("-o")
        .arg(scratch.path())
        .arg(input)
        .output()
        .map_err(|e| Error::io(format!("spawn {BROTLI_TOOL}"), e))?;

    if !output.status.success() {
        return Err(Error::tool(
            BROTLI_TOOL,
            format!(
                "{} (process reported: {})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    Ok(scratch)
}
