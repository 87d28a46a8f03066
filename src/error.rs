//! Unified error type for htpack.
//!
//! Pack-loading failures form a closed taxonomy: callers are expected to
//! match on the variant, not the message text. Build-side failures carry a
//! context string (what was being done, to which file) and the underlying
//! cause.

use crate::packed;

/// Unified error type covering pack loading, pack building, and serving
/// setup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The 36 bytes at the head of the file do not decode as a pack header.
    #[error("not a pack file (header does not decode) [{source}]")]
    HeaderUnmarshal {
        /// The underlying decode error.
        #[source]
        source: prost::DecodeError,
    },

    /// The directory blob does not decode.
    #[error("pack corrupt (directory does not decode) [{source}]")]
    DirectoryUnmarshal {
        /// The underlying decode error.
        #[source]
        source: prost::DecodeError,
    },

    /// An I/O operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted (e.g. "open input.css").
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The recorded magic number is not [`packed::MAGIC`].
    #[error("magic number mismatch (found {found:#018x}, expected {:#018x})", packed::MAGIC)]
    MagicMismatch {
        /// Magic number as read from the file.
        found: u64,
    },

    /// The file's version number predates the oldest supported version.
    #[error("pack version too old (found {found}; supported: {})", packed::VERSION)]
    VersionTooOld {
        /// Version as read from the file.
        found: u64,
    },

    /// The file's version number is ahead of what this crate can read.
    #[error("pack version too new (found {found}; supported: {})", packed::VERSION)]
    VersionTooNew {
        /// Version as read from the file.
        found: u64,
    },

    /// The header or directory points outside the file.
    #[error("file corrupt/truncated (offset past end of file){}", fmt_opt_path(.path))]
    BadOffset {
        /// Pack entry the bad offset belongs to, when known.
        path: Option<String>,
    },

    /// A directory entry has a path that is not absolute and canonical.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A directory entry is missing its mandatory uncompressed variant.
    #[error("missing uncompressed data (path {path:?})")]
    MissingUncompressed {
        /// The offending path.
        path: String,
    },

    /// An external tool (brotli) failed.
    #[error("{tool}: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Exit status and captured stderr.
        message: String,
    },

    /// The pack manifest could not be parsed or is inconsistent.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Server configuration (mounts, headers) is invalid.
    #[error("config error: {0}")]
    Config(String),
}

fn fmt_opt_path(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(" (path {p:?})"),
        None => String::new(),
    }
}

impl Error {
    /// Convenience constructor for [`Error::Io`].
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::InvalidPath`].
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
