//! HTTP server over one or more loaded packs.
//!
//! The accept loop peeks at each new connection: a plain `GET` goes to the
//! raw-socket zero-copy path (see [`sendfile`]), everything else — HEAD,
//! other methods, or any connection the peek cannot classify — is handed
//! to an axum/hyper service that realizes the same response plan by
//! writing mapped bytes. Semantics are identical on both paths.

mod sendfile;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::error::{Error, Result};
use crate::handler::{Handler, Request};
use crate::packed::clean_path;

/// A pack mounted at a URL prefix. Requests under the prefix are resolved
/// against the pack with the prefix stripped.
pub struct Mount {
    prefix: String,
    handler: Arc<Handler>,
}

impl Mount {
    /// Mount a handler at `prefix` (`/` serves the pack at the root).
    pub fn new(prefix: impl Into<String>, handler: Arc<Handler>) -> Self {
        Mount {
            prefix: prefix.into(),
            handler,
        }
    }
}

/// The set of mounted packs a server dispatches to, longest prefix first.
pub struct PackService {
    mounts: Vec<Mount>,
}

impl PackService {
    /// Validate prefixes (absolute, canonical, unique) and build the
    /// dispatch table.
    pub fn new(mut mounts: Vec<Mount>) -> Result<Self> {
        for mount in &mounts {
            let p = &mount.prefix;
            if !p.starts_with('/') || clean_path(p) != *p {
                return Err(Error::Config(format!(
                    "prefix {p:?} must be an absolute, canonical path"
                )));
            }
        }
        mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        for pair in mounts.windows(2) {
            if pair[0].prefix == pair[1].prefix {
                return Err(Error::Config(format!(
                    "prefix {:?} used by more than one pack",
                    pair[0].prefix
                )));
            }
        }
        Ok(PackService { mounts })
    }

    /// Find the mount serving `path`: longest matching prefix wins. Returns
    /// the handler and the path with the prefix stripped.
    pub(crate) fn resolve(&self, path: &str) -> Option<(&Handler, String)> {
        for mount in &self.mounts {
            if mount.prefix == "/" {
                return Some((&mount.handler, path.to_string()));
            }
            if let Some(rest) = path.strip_prefix(&mount.prefix) {
                if rest.is_empty() {
                    return Some((&mount.handler, "/".to_string()));
                }
                if rest.starts_with('/') {
                    return Some((&mount.handler, rest.to_string()));
                }
            }
        }
        None
    }
}

/// Run the server on an already-bound listener until the token fires or a
/// termination signal arrives.
pub async fn serve(
    listener: tokio::net::TcpListener,
    service: Arc<PackService>,
    cancel: CancellationToken,
) -> Result<()> {
    let app = router(service.clone());

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let service = service.clone();
                        let app = app.clone();
                        tokio::spawn(handle_connection(stream, service, app));
                    }
                    Err(e) => {
                        tracing::debug!("accept error: {e}");
                    }
                }
            }
            _ = shutdown_signal(cancel.clone()) => break,
        }
    }

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Peek the first bytes of a connection: `GET` requests take the raw
/// zero-copy path; anything else (or a failed peek/takeover) goes through
/// the framework.
async fn handle_connection(stream: tokio::net::TcpStream, service: Arc<PackService>, app: Router) {
    let mut peek_buf = [0u8; 8];

    if let Ok(n) = stream.peek(&mut peek_buf).await {
        if peek_buf[..n].starts_with(b"GET ") {
            match stream.into_std() {
                Ok(std_stream) => {
                    // tokio sockets are non-blocking; sendfile(2) should
                    // park instead of spinning on EAGAIN.
                    let _ = std_stream.set_nonblocking(false);
                    let _ = std_stream
                        .set_read_timeout(Some(std::time::Duration::from_secs(5)));
                    let _ = std_stream
                        .set_write_timeout(Some(std::time::Duration::from_secs(60)));

                    let _ = tokio::task::spawn_blocking(move || {
                        if let Err(e) = sendfile::handle(std_stream, &service) {
                            // Disconnects mid-body are routine; there is no
                            // response left to send.
                            if e.kind() == std::io::ErrorKind::BrokenPipe {
                                tracing::trace!("client disconnected: {e}");
                            } else {
                                tracing::debug!("zero-copy serve error: {e}");
                            }
                        }
                    })
                    .await;
                    return;
                }
                Err(e) => {
                    tracing::debug!("could not take over socket: {e}");
                    return;
                }
            }
        }
    }

    // Framework path: HEAD, other methods, unparseable peeks.
    let io = TokioIo::new(stream);
    let hyper_service = hyper::service::service_fn(move |request| {
        let app = app.clone();
        async move { app.oneshot(request).await }
    });
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, hyper_service)
        .await
    {
        tracing::debug!("connection error: {e}");
    }
}

/// The framework-path service: a single fallback route resolving against
/// the mounted packs.
fn router(service: Arc<PackService>) -> Router {
    Router::new().fallback(fallback).with_state(service)
}

/// Serve one request by writing mapped pack bytes through the framework.
async fn fallback(
    State(service): State<Arc<PackService>>,
    req: axum::extract::Request,
) -> Response {
    let headers = req.headers();
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let Some((handler, local_path)) = service.resolve(req.uri().path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let plan = handler.plan(&Request {
        method: req.method().as_str(),
        path: &local_path,
        if_none_match: header("if-none-match"),
        if_modified_since: header("if-modified-since"),
        accept_encoding: header("accept-encoding"),
        range: header("range"),
    });

    let mut builder = Response::builder().status(plan.status);
    for (name, value) in &plan.headers {
        builder = builder.header(name, value);
    }

    let body = match (&plan.body, plan.head_only) {
        (Some(range), false) => Body::from(handler.bytes(range).to_vec()),
        _ => Body::empty(),
    };

    builder.body(body).unwrap_or_else(|e| {
        tracing::error!("building response failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Wait for SIGINT, SIGTERM, or an explicit cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("shutdown signal received");
}
