//! On-disk pack format.
//!
//! A pack file is three regions: a fixed-size [`Header`] at offset 0, a body
//! of page-aligned payloads, and a tail-placed [`Directory`] located by the
//! header. All structures use the protobuf wire format so third-party
//! tooling can decode a pack with nothing but the schema.

mod load;

pub use load::{clean_path, load};

use std::collections::HashMap;

/// Magic number identifying a pack file.
pub const MAGIC: u64 = 0xb6e6_1a4b_415e_d33b;

/// Current (and only supported) format version.
pub const VERSION: u64 = 1;

/// Payload alignment boundary. Payloads start on page boundaries so that
/// mapped reads and `sendfile` transfers stay page-aligned.
pub const PAGE_SIZE: u64 = 4096;

/// Encoded size of [`Header`]: four fields, each a 1-byte tag plus a
/// fixed64. The loader reads exactly this many bytes at offset 0, which is
/// why every header field must be present (non-zero) on the wire.
pub const HEADER_LEN: usize = 36;

/// Pack file header. Fixed-size; locates the directory.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Header {
    /// Must equal [`MAGIC`].
    #[prost(fixed64, tag = "1")]
    pub magic: u64,
    /// Must equal [`VERSION`].
    #[prost(fixed64, tag = "2")]
    pub version: u64,
    /// Byte position of the directory blob.
    #[prost(fixed64, tag = "3")]
    pub directory_offset: u64,
    /// Byte length of the directory blob.
    #[prost(fixed64, tag = "4")]
    pub directory_length: u64,
}

impl Header {
    /// Placeholder written while the body is being built. Every field is a
    /// non-zero sentinel so the encoding still occupies [`HEADER_LEN`]
    /// bytes and can be overwritten in place once the real offsets are
    /// known.
    pub fn placeholder() -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            directory_offset: 1,
            directory_length: 1,
        }
    }
}

/// Tail-placed index mapping URL paths to pack entries.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Directory {
    /// Absolute, canonical URL path → entry.
    #[prost(map = "string, message", tag = "1")]
    pub files: HashMap<String, File>,
}

/// A single packed asset: content metadata plus up to three encodings.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct File {
    /// MIME type served as `Content-Type`.
    #[prost(string, tag = "1")]
    pub content_type: String,
    /// Strong validator, `"1--<sha384-hex>"` with the quotes included.
    #[prost(string, tag = "2")]
    pub etag: String,
    /// The identity encoding. Mandatory.
    #[prost(message, optional, tag = "3")]
    pub uncompressed: Option<FileData>,
    /// Gzip encoding, present only when it cleared the savings gate.
    #[prost(message, optional, tag = "4")]
    pub gzip: Option<FileData>,
    /// Brotli encoding, present only when it cleared the savings gate.
    #[prost(message, optional, tag = "5")]
    pub brotli: Option<FileData>,
}

/// Location of one encoding's bytes within the pack.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct FileData {
    /// Byte position in the pack. Always a multiple of [`PAGE_SIZE`].
    #[prost(fixed64, tag = "1")]
    pub offset: u64,
    /// Byte length of this encoding.
    #[prost(fixed64, tag = "2")]
    pub length: u64,
}
