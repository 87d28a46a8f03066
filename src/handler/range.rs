//! Single-part byte range parsing.
//!
//! Only the exact `bytes=FROM-TO` form is honoured: both bounds present,
//! no suffix or open-ended ranges, no multi-range. Anything else (bad
//! syntax or bounds outside the selected variant) degrades to a full
//! response rather than an error.

/// Resolved byte window into one variant's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileRange {
    /// Offset into the variant's byte stream.
    pub offset: u64,
    /// Number of bytes to serve.
    pub length: u64,
    /// Whether a Range header was honoured (response becomes a 206).
    pub is_partial: bool,
}

/// Resolve an optional `Range` header against a variant of `data_len`
/// bytes. Note the bounds index the *selected variant's* bytes, not the
/// uncompressed file.
pub(crate) fn file_range(header: Option<&str>, data_len: u64) -> FileRange {
    let full = FileRange {
        offset: 0,
        length: data_len,
        is_partial: false,
    };

    let Some(spec) = header.and_then(|h| h.strip_prefix("bytes=")) else {
        return full;
    };
    let Some((from, to)) = spec.split_once('-') else {
        return full;
    };
    let (Ok(from), Ok(to)) = (from.parse::<u64>(), to.parse::<u64>()) else {
        return full;
    };

    if from > to || from >= data_len || to >= data_len {
        return full;
    }

    FileRange {
        offset: from,
        length: to - from + 1,
        is_partial: true,
    }
}
