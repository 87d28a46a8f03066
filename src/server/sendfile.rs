//! Raw-socket GET service.
//!
//! Connections whose first bytes spell a `GET` request are taken away from
//! the framework at accept time: the request head is parsed with a minimal
//! blocking reader, the response head is written by hand, and the body is
//! pushed from the pack file descriptor straight to the socket with
//! `sendfile(2)` — no user-space copy of payload bytes.
//!
//! Transport failures after the head has been written are unrecoverable
//! (there is no status line left to send), so the connection is dropped
//! silently.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;

use crate::handler::Request;
use crate::server::PackService;

/// `sendfile(2)` can move at most this many bytes per call.
const MAX_SEND_CHUNK: u64 = 1 << 30;

/// Upper bound on a request head we are willing to buffer.
const MAX_HEADER_BYTES: usize = 8192;

/// The request fields the pack handler consumes, owned because they are
/// extracted from the connection's read buffer.
struct ParsedRequest {
    path: String,
    if_none_match: Option<String>,
    if_modified_since: Option<String>,
    accept_encoding: Option<String>,
    range: Option<String>,
}

/// Serve one GET request on a hijacked connection, then close it.
pub(crate) fn handle(mut stream: TcpStream, service: &PackService) -> io::Result<()> {
    let req = read_request_head(&mut stream)?;

    let Some((handler, local_path)) = service.resolve(&req.path) else {
        stream.write_all(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )?;
        return Ok(());
    };

    let plan = handler.plan(&Request {
        method: "GET",
        path: &local_path,
        if_none_match: req.if_none_match.as_deref(),
        if_modified_since: req.if_modified_since.as_deref(),
        accept_encoding: req.accept_encoding.as_deref(),
        range: req.range.as_deref(),
    });

    let sock_fd = stream.as_raw_fd();
    let _ = set_tcp_cork(sock_fd, true);

    let mut head = String::with_capacity(256);
    head.push_str("HTTP/1.1 ");
    head.push_str(plan.status.as_str());
    head.push(' ');
    head.push_str(plan.status.canonical_reason().unwrap_or(""));
    head.push_str("\r\n");
    for (name, value) in &plan.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes())?;

    if let Some(body) = plan.body {
        send_range(
            sock_fd,
            handler.pack_file().as_raw_fd(),
            body.offset,
            body.length,
        )?;
    }

    let _ = set_tcp_cork(sock_fd, false);
    Ok(())
}

/// Read the request head (through `\r\n\r\n`) and extract the path and the
/// conditional/negotiation headers. The method is already known to be GET
/// from the accept-time peek.
fn read_request_head(stream: &mut TcpStream) -> io::Result<ParsedRequest> {
    let mut buf = Vec::with_capacity(2048);
    let mut tmp = [0u8; 4096];

    loop {
        let n = match stream.read(&mut tmp) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-request",
                ))
            }
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        buf.extend_from_slice(&tmp[..n]);
        if buf.len() >= 4 {
            let scan_start = buf.len().saturating_sub(n + 3);
            if buf[scan_start..].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }

    let head = std::str::from_utf8(&buf)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 request head"))?;
    let mut lines = head.lines();

    // Request line: "GET /path HTTP/1.1".
    let request_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty request"))?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next();
    let target = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing request path"))?;
    let path = target.split('?').next().unwrap_or(target).to_owned();

    let mut req = ParsedRequest {
        path,
        if_none_match: None,
        if_modified_since: None,
        accept_encoding: None,
        range: None,
    };

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "if-none-match" => req.if_none_match = Some(value.to_owned()),
                "if-modified-since" => req.if_modified_since = Some(value.to_owned()),
                "accept-encoding" => req.accept_encoding = Some(value.to_owned()),
                "range" => req.range = Some(value.to_owned()),
                _ => {}
            }
        }
    }

    Ok(req)
}

/// Push `[offset, offset+remaining)` of `file_fd` to `sock_fd` with
/// `sendfile(2)`, in chunks of at most [`MAX_SEND_CHUNK`]. A partial send
/// resumes from the tracked offset; `EAGAIN` waits for the socket to drain
/// and retries the same chunk.
#[cfg(target_os = "linux")]
fn send_range(
    sock_fd: std::os::fd::RawFd,
    file_fd: std::os::fd::RawFd,
    offset: u64,
    remaining: u64,
) -> io::Result<()> {
    let mut off = offset as libc::off64_t;
    let mut remaining = remaining;

    while remaining > 0 {
        let count = remaining.min(MAX_SEND_CHUNK) as usize;
        let ret = unsafe { libc::sendfile64(sock_fd, file_fd, &mut off, count) };

        if ret == -1 {
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    // Socket buffer full; give the client a moment to drain.
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    continue;
                }
                _ => return Err(err),
            }
        }

        let sent = ret as u64;
        if sent == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "sendfile returned 0",
            ));
        }
        remaining -= sent;
    }

    Ok(())
}

/// Portable stand-in: positional reads from the pack fd, written to the
/// socket. Semantically identical, one copy slower.
#[cfg(not(target_os = "linux"))]
fn send_range(
    sock_fd: std::os::fd::RawFd,
    file_fd: std::os::fd::RawFd,
    offset: u64,
    remaining: u64,
) -> io::Result<()> {
    use std::os::fd::FromRawFd;

    // SAFETY: fds outlive this call; ManuallyDrop keeps ownership with the
    // caller.
    let file = std::mem::ManuallyDrop::new(unsafe { std::fs::File::from_raw_fd(file_fd) });
    let mut sock = std::mem::ManuallyDrop::new(unsafe { TcpStream::from_raw_fd(sock_fd) });

    let mut buf = vec![0u8; 64 * 1024];
    let mut offset = offset;
    let mut remaining = remaining;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = std::os::unix::fs::FileExt::read_at(&*file, &mut buf[..want], offset)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "pack truncated",
            ));
        }
        sock.write_all(&buf[..n])?;
        offset += n as u64;
        remaining -= n as u64;
    }
    Ok(())
}

/// Toggle `TCP_CORK` so the response head and the first payload pages
/// leave in full segments.
#[cfg(target_os = "linux")]
fn set_tcp_cork(fd: std::os::fd::RawFd, enabled: bool) -> io::Result<()> {
    let val: libc::c_int = if enabled { 1 } else { 0 };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_CORK,
            &val as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_tcp_cork(_fd: std::os::fd::RawFd, _enabled: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // send_range must complete on a non-blocking socket: EAGAIN with no
    // forward progress has to retry, not error out.
    #[cfg(target_os = "linux")]
    #[test]
    fn send_range_completes_despite_eagain() {
        use std::os::unix::net::UnixStream;

        let data_len: usize = 256 * 1024;
        let data: Vec<u8> = (0..data_len).map(|i| (i % 251) as u8).collect();

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &data).unwrap();
        let file = std::fs::File::open(tmp.path()).unwrap();

        let (sender, receiver) = UnixStream::pair().unwrap();
        sender.set_nonblocking(true).unwrap();

        let reader = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(data_len);
            let mut buf = [0u8; 8192];
            loop {
                match Read::read(&mut &receiver, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => panic!("reader error: {e}"),
                }
            }
            received
        });

        send_range(sender.as_raw_fd(), file.as_raw_fd(), 0, data_len as u64)
            .expect("send_range must retry through EAGAIN");

        drop(sender);
        let received = reader.join().expect("reader thread panicked");
        assert_eq!(received, data);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn send_range_honours_offset_window() {
        use std::os::unix::net::UnixStream;

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"0123456789").unwrap();
        let file = std::fs::File::open(tmp.path()).unwrap();

        let (sender, receiver) = UnixStream::pair().unwrap();
        let reader = std::thread::spawn(move || {
            let mut received = Vec::new();
            Read::read_to_end(&mut &receiver, &mut received).unwrap();
            received
        });

        send_range(sender.as_raw_fd(), file.as_raw_fd(), 3, 4).unwrap();
        drop(sender);
        assert_eq!(reader.join().unwrap(), b"3456");
    }
}
