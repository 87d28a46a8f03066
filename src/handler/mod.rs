//! Request handling over a loaded pack.
//!
//! [`HandlerBuilder`] captures everything configurable (custom headers,
//! index-file aliasing) and produces an immutable [`Handler`]: the route
//! table, memory mapping and pack fd never change after construction, so
//! request workers share it without locks.
//!
//! The handler itself is transport-agnostic. [`Handler::plan`] resolves a
//! request into a [`ResponsePlan`] — status, ordered headers, and the pack
//! byte window to transmit — which the server layer realizes either with a
//! raw-socket `sendfile` or by writing mapped bytes through the framework.

mod range;

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::packed::{self, clean_path, FileData};

const ENCODING_GZIP: &str = "gzip";
const ENCODING_BROTLI: &str = "br";

/// One servable asset. Unlike the wire type, the uncompressed variant is
/// mandatory here; the loader's directory check guarantees it exists.
#[derive(Debug, Clone)]
struct Asset {
    content_type: String,
    etag: String,
    uncompressed: FileData,
    gzip: Option<FileData>,
    brotli: Option<FileData>,
}

/// Configuration for a [`Handler`]. Headers and index-file aliases are
/// fixed before the first request is served.
pub struct HandlerBuilder {
    pack: PathBuf,
    headers: Vec<(String, String)>,
    index_file: Option<String>,
}

impl HandlerBuilder {
    /// Start building a handler for the given pack file. Standard security
    /// headers are pre-set and can be overridden or removed via
    /// [`header`](Self::header).
    pub fn new(pack: impl Into<PathBuf>) -> Self {
        HandlerBuilder {
            pack: pack.into(),
            headers: vec![
                ("X-Frame-Options".to_string(), "sameorigin".to_string()),
                ("X-Content-Type-Options".to_string(), "nosniff".to_string()),
            ],
            index_file: None,
        }
    }

    /// Set a custom header emitted on every response, success or error.
    /// Replaces an existing header of the same name; an empty value removes
    /// it altogether.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        if !value.is_empty() {
            self.headers.push((name, value));
        }
        self
    }

    /// Nominate an index filename (e.g. `index.html`): every directory
    /// containing a file of that name also serves it at the directory path
    /// itself. Existing routes are never shadowed.
    pub fn index_file(mut self, name: impl Into<String>) -> Self {
        self.index_file = Some(name.into());
        self
    }

    /// Open, map and validate the pack, returning the immutable handler.
    pub fn build(self) -> Result<Handler> {
        let file = File::open(&self.pack)
            .map_err(|e| Error::io(format!("open {}", self.pack.display()), e))?;
        // SAFETY: read-only shared mapping of a pack that is immutable once
        // built (written via temp-file-and-rename).
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::io(format!("mmap {}", self.pack.display()), e))?;

        let (_, dir) = packed::load(&file)?;

        let mut routes: HashMap<String, Arc<Asset>> = HashMap::with_capacity(dir.files.len());
        for (path, info) in dir.files {
            let uncompressed = info
                .uncompressed
                .ok_or_else(|| Error::MissingUncompressed { path: path.clone() })?;
            routes.insert(
                path,
                Arc::new(Asset {
                    content_type: info.content_type,
                    etag: info.etag,
                    uncompressed,
                    gzip: info.gzip,
                    brotli: info.brotli,
                }),
            );
        }

        if let Some(index) = &self.index_file {
            register_index_routes(&mut routes, index);
        }

        tracing::info!(
            pack = %self.pack.display(),
            routes = routes.len(),
            "pack loaded"
        );

        Ok(Handler {
            file,
            map,
            routes,
            headers: self.headers,
            start_time: Utc::now(),
        })
    }
}

/// Alias each `/dir/<index>` entry at `/dir`. First registration wins, and
/// real entries are never displaced.
fn register_index_routes(routes: &mut HashMap<String, Arc<Asset>>, index: &str) {
    let aliases: Vec<(String, Arc<Asset>)> = routes
        .iter()
        .filter(|(path, _)| path.rsplit('/').next() == Some(index))
        .map(|(path, asset)| {
            let parent = match path.rfind('/') {
                Some(0) | None => "/".to_string(),
                Some(pos) => path[..pos].to_string(),
            };
            (parent, asset.clone())
        })
        .collect();

    for (parent, asset) in aliases {
        routes.entry(parent).or_insert(asset);
    }
}

/// Immutable request handler over a memory-mapped pack.
///
/// The pack fd is retained for zero-copy transmission; the mapping backs
/// the write-through fallback. Both live as long as the handler.
pub struct Handler {
    file: File,
    map: Mmap,
    routes: HashMap<String, Arc<Asset>>,
    headers: Vec<(String, String)>,
    start_time: DateTime<Utc>,
}

/// The request fields the handler cares about, already extracted from
/// whichever transport produced them.
#[derive(Debug, Default, Clone, Copy)]
pub struct Request<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub if_none_match: Option<&'a str>,
    pub if_modified_since: Option<&'a str>,
    pub accept_encoding: Option<&'a str>,
    pub range: Option<&'a str>,
}

/// Byte window into the pack to serve as the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyRange {
    /// Absolute offset into the pack file.
    pub offset: u64,
    /// Number of bytes to transmit.
    pub length: u64,
}

/// A fully-resolved response: what to send, in emission order.
#[derive(Debug)]
pub struct ResponsePlan {
    pub status: StatusCode,
    /// Headers in emission order; custom headers come first so they appear
    /// even on error responses.
    pub headers: Vec<(String, String)>,
    /// Pack bytes to transmit; `None` for bodiless responses.
    pub body: Option<BodyRange>,
    /// HEAD request: emit headers as planned but no body bytes.
    pub head_only: bool,
}

impl Handler {
    /// Resolve a request against the pack.
    pub fn plan(&self, req: &Request<'_>) -> ResponsePlan {
        let mut headers = self.headers.clone();
        let head_only = req.method == "HEAD";

        if req.method != "GET" && req.method != "HEAD" {
            headers.push(("Allow".to_string(), "GET, HEAD".to_string()));
            headers.push(("Content-Length".to_string(), "0".to_string()));
            return ResponsePlan {
                status: StatusCode::METHOD_NOT_ALLOWED,
                headers,
                body: None,
                head_only: false,
            };
        }

        let Some(asset) = self.routes.get(&clean_path(req.path)) else {
            headers.push(("Content-Length".to_string(), "0".to_string()));
            return ResponsePlan {
                status: StatusCode::NOT_FOUND,
                headers,
                body: None,
                head_only,
            };
        };

        headers.push(("Vary".to_string(), "Accept-Encoding".to_string()));
        headers.push(("ETag".to_string(), asset.etag.clone()));
        headers.push(("Content-Type".to_string(), asset.content_type.clone()));
        headers.push(("Accept-Ranges".to_string(), "bytes".to_string()));

        if client_has_cached(
            &asset.etag,
            self.start_time,
            req.if_none_match,
            req.if_modified_since,
        ) {
            return ResponsePlan {
                status: StatusCode::NOT_MODIFIED,
                headers,
                body: None,
                head_only,
            };
        }

        let (gzip, brotli) = accepted_encodings(req.accept_encoding);
        let mut data = asset.uncompressed;
        if let (true, Some(variant)) = (brotli, asset.brotli) {
            data = variant;
            headers.push(("Content-Encoding".to_string(), ENCODING_BROTLI.to_string()));
        } else if let (true, Some(variant)) = (gzip, asset.gzip) {
            data = variant;
            headers.push(("Content-Encoding".to_string(), ENCODING_GZIP.to_string()));
        }

        let range = range::file_range(req.range, data.length);
        if range.is_partial {
            headers.push((
                "Content-Range".to_string(),
                format!(
                    "bytes {}-{}/{}",
                    range.offset,
                    range.offset + range.length - 1,
                    data.length
                ),
            ));
        }

        headers.push(("Content-Length".to_string(), range.length.to_string()));

        ResponsePlan {
            status: if range.is_partial {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            },
            headers,
            body: Some(BodyRange {
                offset: data.offset + range.offset,
                length: range.length,
            }),
            head_only,
        }
    }

    /// The mapped bytes for a planned body, for the write-through fallback.
    pub fn bytes(&self, body: &BodyRange) -> &[u8] {
        &self.map[body.offset as usize..(body.offset + body.length) as usize]
    }

    /// The pack file, for zero-copy transmission.
    pub fn pack_file(&self) -> &File {
        &self.file
    }
}

/// Whether the client already holds the current version. `If-None-Match`
/// is authoritative when present (a presented-but-stale set of etags must
/// not fall through to the date check); otherwise `If-Modified-Since` is
/// compared against the handler's start time.
fn client_has_cached(
    etag: &str,
    start_time: DateTime<Utc>,
    if_none_match: Option<&str>,
    if_modified_since: Option<&str>,
) -> bool {
    if let Some(candidates) = if_none_match {
        return candidates.split(',').any(|c| c.trim() == etag);
    }

    if let Some(date) = if_modified_since {
        if let Ok(cached) = DateTime::parse_from_rfc2822(date) {
            return cached.with_timezone(&Utc) > start_time;
        }
    }

    false
}

/// Which compressed encodings the client accepts. Tokens are matched by
/// presence; quality values are ignored.
fn accepted_encodings(accept_encoding: Option<&str>) -> (bool, bool) {
    let (mut gzip, mut brotli) = (false, false);
    for token in accept_encoding.unwrap_or_default().split(',') {
        match token.split(';').next().unwrap_or_default().trim() {
            ENCODING_GZIP => gzip = true,
            ENCODING_BROTLI => brotli = true,
            _ => {}
        }
    }
    (gzip, brotli)
}
