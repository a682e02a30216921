//! Listen-socket acquisition for the repo server (spec §6 "CLI surface
//! (repo server)"): either an explicit local port, a port file, or exactly
//! one socket handed in by the service manager. Grounded on
//! `containers-bootc`'s `daemon::systemd_activation`, which does the same
//! `libsystemd::activation::receive_descriptors` dance for its own
//! single-socket IPC listener.

use std::net::TcpListener;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("advertising updates is disabled in configuration")]
    AdvertisingDisabled,
    #[error("no listen sockets available")]
    NoListenSockets,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Resolve the listener to actually bind/adopt.
///
/// `--local-port` takes precedence, then `--port-file` (a fresh ephemeral
/// port, written to the file for callers to discover), then systemd
/// socket activation.
pub fn bind_listener(local_port: Option<u16>, port_file: Option<&Path>) -> Result<TcpListener, ListenError> {
    if let Some(port) = local_port {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        if let Some(path) = port_file {
            std::fs::write(path, listener.local_addr()?.port().to_string())?;
        }
        return Ok(listener);
    }

    if let Some(path) = port_file {
        let listener = TcpListener::bind(("0.0.0.0", 0))?;
        std::fs::write(path, listener.local_addr()?.port().to_string())?;
        return Ok(listener);
    }

    let mut fds = libsystemd::activation::receive_descriptors(true)
        .map_err(|_| ListenError::NoListenSockets)?;
    let fd = fds.pop().ok_or(ListenError::NoListenSockets)?;
    if !fds.is_empty() {
        return Err(ListenError::NoListenSockets);
    }
    Ok(unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) })
}
