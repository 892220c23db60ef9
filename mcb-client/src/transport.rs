//! Socket setup for sessions.
//!
//! `Dialer` is the seam between a session and the network: the default
//! `NetDialer` opens TCP or Unix sockets, tests substitute scripted ones.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use tracing::debug;

use crate::config::{Config, Scheme, ServerAddr};

/// Byte stream to one server.
pub trait Transport: Read + Write + Send {
    /// Closes both directions of the stream.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn shutdown(&mut self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Opens transports for sessions.
pub trait Dialer: Send + Sync {
    fn dial(&self, server: &ServerAddr, config: &Config) -> io::Result<Box<dyn Transport>>;
}

/// Dials real sockets with the configured timeouts and TCP options.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetDialer;

impl Dialer for NetDialer {
    fn dial(&self, server: &ServerAddr, config: &Config) -> io::Result<Box<dyn Transport>> {
        match server.scheme {
            Scheme::Tcp => Ok(Box::new(dial_tcp(&server.address, config)?)),
            Scheme::Unix => dial_unix(&server.address, config),
        }
    }
}

fn dial_tcp(address: &str, config: &Config) -> io::Result<TcpStream> {
    let mut last_err = None;
    // Try each resolved address in turn, like `TcpStream::connect`.
    for addr in address.to_socket_addrs()? {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if config.tcp_keep_alive {
            let keepalive = TcpKeepalive::new().with_time(config.tcp_keep_alive_period);
            socket.set_tcp_keepalive(&keepalive)?;
        }
        socket.set_nodelay(config.tcp_no_delay)?;

        match socket.connect_timeout(&SockAddr::from(addr), config.connect_timeout) {
            Ok(()) => {
                socket.set_read_timeout(Some(config.read_timeout))?;
                socket.set_write_timeout(Some(config.write_timeout))?;
                debug!(%addr, "tcp connection established");
                return Ok(TcpStream::from(socket));
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} did not resolve to any address", address),
        )
    }))
}

#[cfg(unix)]
fn dial_unix(path: &str, config: &Config) -> io::Result<Box<dyn Transport>> {
    let stream = std::os::unix::net::UnixStream::connect(path)?;
    stream.set_read_timeout(Some(config.read_timeout))?;
    stream.set_write_timeout(Some(config.write_timeout))?;
    debug!(path, "unix connection established");
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
fn dial_unix(path: &str, _config: &Config) -> io::Result<Box<dyn Transport>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unix sockets are not supported on this platform: {}", path),
    ))
}
