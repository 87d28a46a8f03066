//! Pack manifests: which files end up at which URL paths.
//!
//! A manifest is a YAML mapping from URL path to a [`FileToPack`] record.
//! One can also be generated from plain files and directories, in which
//! case content types are pre-sniffed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::packer::sniff;

/// URL path → file to pack, ordered so builds are deterministic.
pub type FilesToPack = BTreeMap<String, FileToPack>;

/// One manifest entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileToPack {
    /// Path of the input file on disk.
    pub filename: PathBuf,
    /// Content type to serve. Sniffed from the file when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    /// Skip every compressed variant for this file.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_compression: bool,
    /// Skip the gzip variant for this file.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_gzip: bool,
    /// Skip the brotli variant for this file.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_brotli: bool,
}

/// Parse a YAML manifest file.
pub fn from_yaml_file(path: &Path) -> Result<FilesToPack> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("read manifest {}", path.display()), e))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| Error::Manifest(format!("parsing {}: {e}", path.display())))
}

/// Serialize a manifest to YAML.
pub fn to_yaml(files: &FilesToPack) -> Result<String> {
    serde_yaml::to_string(files).map_err(|e| Error::Manifest(e.to_string()))
}

/// Build a manifest from a list of files and directories.
///
/// A plain file `f` is served as `/f` (basename only). A directory's
/// contents are merged into `/`, so a directory holding `a` and `c/d`
/// yields `/a` and `/c/d`. Symlinks are followed.
pub fn from_inputs(inputs: &[PathBuf]) -> Result<FilesToPack> {
    let mut files = FilesToPack::new();

    for input in inputs {
        let meta = std::fs::metadata(input)
            .map_err(|e| Error::io(format!("stat {}", input.display()), e))?;

        if meta.is_file() {
            let serve_path = format!(
                "/{}",
                input
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| Error::Manifest(format!(
                        "{}: filename is not valid UTF-8",
                        input.display()
                    )))?
            );
            insert_entry(&mut files, serve_path, input.clone())?;
            continue;
        }

        for entry in walkdir::WalkDir::new(input).follow_links(true) {
            let entry =
                entry.map_err(|e| Error::Manifest(format!("walking {}: {e}", input.display())))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(input)
                .map_err(|e| Error::Manifest(format!("{}: {e}", entry.path().display())))?;
            let rel = rel.to_str().ok_or_else(|| {
                Error::Manifest(format!("{}: path is not valid UTF-8", entry.path().display()))
            })?;

            insert_entry(&mut files, format!("/{rel}"), entry.path().to_path_buf())?;
        }
    }

    Ok(files)
}

fn insert_entry(files: &mut FilesToPack, serve_path: String, filename: PathBuf) -> Result<()> {
    let content_type = sniff_file(&filename)?;
    files.insert(
        serve_path,
        FileToPack {
            filename,
            content_type,
            ..FileToPack::default()
        },
    );
    Ok(())
}

fn sniff_file(path: &Path) -> Result<String> {
    let mut head = [0u8; sniff::SNIFF_LEN];
    let mut f =
        File::open(path).map_err(|e| Error::io(format!("open {}", path.display()), e))?;
    let mut filled = 0;
    loop {
        let n = f
            .read(&mut head[filled..])
            .map_err(|e| Error::io(format!("read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == head.len() {
            break;
        }
    }
    Ok(sniff::detect(path, &head[..filled]))
}
