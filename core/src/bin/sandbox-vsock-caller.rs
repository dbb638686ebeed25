// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Host-side vsock connector invoked by the microVM backend.
//!
//! Firecracker exposes a guest's vsock ports on the host as a single UNIX
//! domain socket: connecting and writing `CONNECT <port>\n` yields an `OK
//! <assigned-port>\n` reply, after which the connection is a raw duplex
//! stream to that vsock port inside the guest. This binary speaks exactly
//! that handshake, then forwards one line each way.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

fn main() -> io::Result<()> {
    let uds_path = std::env::var("MAS_VSOCK_UDS")
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "MAS_VSOCK_UDS not set"))?;
    let port: u32 = std::env::var("MAS_VSOCK_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "MAS_VSOCK_PORT not set"))?;

    let mut request_line = String::new();
    io::stdin().read_to_string(&mut request_line)?;
    if !request_line.ends_with('\n') {
        request_line.push('\n');
    }

    let mut stream = UnixStream::connect(&uds_path)?;
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    stream.set_write_timeout(Some(Duration::from_secs(30)))?;

    stream.write_all(format!("CONNECT {port}\n").as_bytes())?;
    let mut ack = [0u8; 64];
    let mut total = 0;
    loop {
        let n = stream.read(&mut ack[total..])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "vsock proxy closed before ack"));
        }
        total += n;
        if ack[..total].contains(&b'\n') {
            break;
        }
    }
    let ack_line = String::from_utf8_lossy(&ack[..total]);
    if !ack_line.trim_start().starts_with("OK") {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("vsock proxy rejected connect: {}", ack_line.trim()),
        ));
    }

    stream.write_all(request_line.as_bytes())?;

    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.contains(&b'\n') {
            break;
        }
    }

    io::stdout().write_all(&response)?;
    if !response.ends_with(b"\n") {
        io::stdout().write_all(b"\n")?;
    }
    Ok(())
}
