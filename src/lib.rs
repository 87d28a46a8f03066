//! htpack: pack a static file tree into a single page-aligned file and
//! serve it over HTTP with kernel zero-copy transmission.
//!
//! A pack bundles every asset together with pre-computed gzip/brotli
//! variants and a strong validator, so the serving path never compresses,
//! hashes, or stats anything: it memory-maps the pack once, resolves each
//! request against an immutable in-memory directory, and pushes payload
//! bytes from the pack file descriptor straight to the client socket.
//!
//! - [`packer`] builds packs from a YAML manifest or a file tree.
//! - [`packed`] defines the on-disk format and the validating loader.
//! - [`handler`] resolves requests (negotiation, conditionals, ranges)
//!   into response plans.
//! - [`server`] runs the accept loop with the zero-copy fast path and the
//!   framework fallback.

pub mod error;
pub mod handler;
pub mod packed;
pub mod packer;
pub mod server;

pub use error::{Error, Result};
pub use handler::{Handler, HandlerBuilder};
pub use server::{Mount, PackService};
