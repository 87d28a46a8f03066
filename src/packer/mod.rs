//! Pack builder.
//!
//! Writes every asset (and any compressed variants that earn their place)
//! into a temp file in the destination directory, then the directory blob,
//! then rewrites the real header at offset 0 and atomically renames into
//! place. No partially-written pack is ever visible at the target path.

pub mod compress;
pub mod manifest;
pub mod sniff;

pub use manifest::{FileToPack, FilesToPack};

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::Mmap;
use prost::Message;
use sha2::{Digest, Sha384};

use crate::error::{Error, Result};
use crate::packed::{self, Directory, FileData, Header};

/// `sendfile(2)` ceiling for a single call.
const MAX_COPY_CHUNK: u64 = 1 << 30;

/// Build a pack at `output` from the given manifest.
///
/// Inputs are processed in manifest (path) order. Any failure removes the
/// temp file and leaves `output` untouched.
pub fn pack(files: &FilesToPack, output: &Path) -> Result<()> {
    let dest_dir = match output.parent() {
        Some(p) if p != Path::new("") => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::NamedTempFile::new_in(dest_dir)
        .map_err(|e| Error::io(format!("create temp file in {}", dest_dir.display()), e))?;

    let brotli_available = compress::brotli_available();
    if !brotli_available {
        tracing::warn!("brotli tool not found; packs will carry gzip variants only");
    }

    let mut writer = PackWriter::new(tmp.as_file());

    // Placeholder header: right size, wrong offsets. Overwritten once the
    // body and directory are in place.
    writer.write(&Header::placeholder().encode_to_vec())?;

    let mut dir = Directory::default();
    for (path, file_to_pack) in files {
        tracing::debug!(path, file = %file_to_pack.filename.display(), "packing");
        let info = pack_one(&mut writer, file_to_pack, brotli_available)?;
        dir.files.insert(path.clone(), info);
    }

    writer.pad()?;
    let dir_bytes = dir.encode_to_vec();
    let hdr = Header {
        magic: packed::MAGIC,
        version: packed::VERSION,
        directory_offset: writer.pos(),
        directory_length: dir_bytes.len() as u64,
    };
    writer.write(&dir_bytes)?;

    // Positional write: the body is complete, so the real header can land
    // at offset 0 without disturbing the write position.
    tmp.as_file()
        .write_all_at(&hdr.encode_to_vec(), 0)
        .map_err(|e| Error::io("write pack header", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io("sync pack file", e))?;

    tmp.persist(output)
        .map_err(|e| Error::io(format!("rename into {}", output.display()), e.error))?;

    tracing::info!(files = files.len(), output = %output.display(), "pack complete");
    Ok(())
}

/// Append one asset and its variants; returns the directory entry.
fn pack_one(
    writer: &mut PackWriter<'_>,
    file_to_pack: &FileToPack,
    brotli_available: bool,
) -> Result<packed::File> {
    writer.pad()?;

    let input_name = file_to_pack.filename.display();
    let input = File::open(&file_to_pack.filename)
        .map_err(|e| Error::io(format!("open {input_name}"), e))?;
    let input_len = input
        .metadata()
        .map_err(|e| Error::io(format!("stat {input_name}"), e))?
        .len();

    // Map the input read-only for hashing, sniffing and gzip; the payload
    // copy itself goes fd-to-fd.
    let map = if input_len > 0 {
        Some(
            // SAFETY: mapped read-only; the builder is the only writer of
            // the output and never mutates inputs.
            unsafe { Mmap::map(&input) }
                .map_err(|e| Error::io(format!("mmap {input_name}"), e))?,
        )
    } else {
        None
    };
    let data: &[u8] = map.as_deref().unwrap_or(&[]);

    let mut info = packed::File {
        etag: etag(data),
        content_type: if file_to_pack.content_type.is_empty() {
            sniff::detect(&file_to_pack.filename, data)
        } else {
            file_to_pack.content_type.clone()
        },
        uncompressed: None,
        gzip: None,
        brotli: None,
    };

    let uncompressed = FileData {
        offset: writer.pos(),
        length: input_len,
    };
    writer.copy_from(&input, input_len)?;
    info.uncompressed = Some(uncompressed);

    if file_to_pack.disable_compression {
        return Ok(info);
    }

    if !file_to_pack.disable_gzip {
        let scratch = compress::gzip_to_scratch(data)?;
        writer.pad()?;
        let offset = writer.pos();
        if let Some(length) = writer.copy_if_saving(&scratch, input_len)? {
            info.gzip = Some(FileData { offset, length });
        }
    }

    if brotli_available && !file_to_pack.disable_brotli {
        let scratch = compress::brotli_to_scratch(&file_to_pack.filename)?;
        // Reopen by path: the tool may have replaced the inode behind the
        // scratch handle.
        let scratch_file = File::open(scratch.path())
            .map_err(|e| Error::io("open brotli scratch file", e))?;
        writer.pad()?;
        let offset = writer.pos();
        if let Some(length) = writer.copy_if_saving(&scratch_file, input_len)? {
            info.brotli = Some(FileData { offset, length });
        }
    }

    Ok(info)
}

/// Strong validator: SHA-384 over the full contents, rendered as
/// `"1--<hex>"` with the quotes included.
fn etag(data: &[u8]) -> String {
    format!("\"1--{}\"", hex::encode(Sha384::digest(data)))
}

/// Append-only writer over the pack temp file, tracking the write position
/// and page alignment.
struct PackWriter<'a> {
    f: &'a File,
    pos: u64,
}

impl<'a> PackWriter<'a> {
    fn new(f: &'a File) -> Self {
        PackWriter { f, pos: 0 }
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.f
            .write_all_at(buf, self.pos)
            .map_err(|e| Error::io("write to pack", e))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Advance the position to the next page boundary. The gap becomes a
    /// hole in the (sparse) temp file; it reads back as zeroes.
    fn pad(&mut self) -> Result<()> {
        let rem = self.pos % packed::PAGE_SIZE;
        if rem != 0 {
            self.pos += packed::PAGE_SIZE - rem;
        }
        Ok(())
    }

    /// Append `len` bytes from the start of `src` with a kernel fd-to-fd
    /// copy, in chunks no larger than [`MAX_COPY_CHUNK`].
    fn copy_from(&mut self, src: &File, len: u64) -> Result<()> {
        // The kernel copy writes at the fd's file offset; line it up with
        // our tracked position (they diverge after pad()).
        let mut f = self.f;
        f.seek(SeekFrom::Start(self.pos))
            .map_err(|e| Error::io("seek in pack", e))?;

        let mut src_offset: u64 = 0;
        while src_offset < len {
            let chunk = (len - src_offset).min(MAX_COPY_CHUNK);
            let copied = copy_chunk(self.f, src, src_offset, chunk)
                .map_err(|e| Error::io("copy data into pack", e))?;
            if copied == 0 {
                return Err(Error::io(
                    "copy data into pack",
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "source truncated"),
                ));
            }
            src_offset += copied;
        }

        self.pos += len;
        Ok(())
    }

    /// Append the scratch file's contents only if they clear the savings
    /// gate; returns the appended length, or `None` when discarded.
    fn copy_if_saving(&mut self, scratch: &File, uncompressed_len: u64) -> Result<Option<u64>> {
        let len = scratch
            .metadata()
            .map_err(|e| Error::io("stat scratch file", e))?
            .len();

        if !compress::worth_keeping(len, uncompressed_len) {
            return Ok(None);
        }

        self.copy_from(scratch, len)?;
        Ok(Some(len))
    }
}

/// One kernel-mediated copy step from `src[offset..offset+len]` to the
/// current write position of `dst`.
#[cfg(target_os = "linux")]
fn copy_chunk(dst: &File, src: &File, offset: u64, len: u64) -> std::io::Result<u64> {
    use std::os::fd::AsRawFd;

    let mut off = offset as libc::off64_t;
    loop {
        let ret = unsafe {
            libc::sendfile64(dst.as_raw_fd(), src.as_raw_fd(), &mut off, len as usize)
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(ret as u64);
    }
}

#[cfg(not(target_os = "linux"))]
fn copy_chunk(dst: &File, src: &File, offset: u64, len: u64) -> std::io::Result<u64> {
    use std::io::{Read, Write};

    let mut buf = vec![0u8; len.min(1 << 16) as usize];
    let n = src.read_at(&mut buf, offset)?;
    if n > 0 {
        let mut dst = dst;
        dst.write_all(&buf[..n])?;
    }
    Ok(n as u64)
}
