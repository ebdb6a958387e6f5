//! Connection handle to the capture service.
//!
//! A [`ServiceLocator`] knows how to check for and open the service; the
//! [`Handle`] it produces owns the open transport and closes it exactly once,
//! either through [`Handle::release`] or on drop.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use dvr_proto::protocol::{read_frame, write_frame, Request, Response};
use tracing::{debug, info, warn};

use crate::error::{ControlError, IpcError};
use crate::registry::ServiceRegistry;

/// One open connection able to carry command round trips.
pub trait Transport {
    /// Send `command` with `payload` and wait for the service's reply.
    fn dispatch(&mut self, command: u32, payload: &[u8]) -> Result<Response, IpcError>;

    /// Whether the underlying link is currently up.  A transport that lost
    /// its link may still recover on a later `dispatch`.
    fn is_connected(&self) -> bool {
        true
    }

    /// Close the connection.  Called at most once per transport.
    fn close(&mut self);
}

pub trait ServiceLocator {
    type Transport: Transport;

    /// Whether the service is registered and running.  A `false` here is the
    /// normal "service not started" case, not a fault.
    fn is_running(&self, service: &str) -> bool;

    fn open(&self, service: &str) -> Result<Self::Transport, IpcError>;
}

pub struct Handle<T: Transport> {
    service: String,
    transport: T,
    closed: bool,
}

impl<T: Transport> Handle<T> {
    /// Check the registry, then open the service.
    pub fn acquire<L>(locator: &L, service: &str) -> Result<Self, ControlError>
    where
        L: ServiceLocator<Transport = T>,
    {
        if !locator.is_running(service) {
            info!("Service {} is not running", service);
            return Err(ControlError::ServiceUnavailable(service.to_string()));
        }

        let transport = locator.open(service).map_err(|e| {
            warn!("Service {} is registered but could not be opened: {}", service, e);
            ControlError::Ipc(e)
        })?;

        info!("Opened session with {}", service);
        Ok(Self {
            service: service.to_string(),
            transport,
            closed: false,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// False once the link dropped, until a dispatch brings it back.
    pub fn is_open(&self) -> bool {
        !self.closed && self.transport.is_connected()
    }

    pub fn dispatch(&mut self, command: u32, payload: &[u8]) -> Result<Response, IpcError> {
        let response = self.transport.dispatch(command, payload)?;
        if !response.is_success() {
            return Err(IpcError::Rejected {
                command,
                code: response.result,
            });
        }
        Ok(response)
    }

    /// Dispatch a payload-less query whose reply is a single `u32`.
    pub fn query_u32(&mut self, command: u32) -> Result<u32, IpcError> {
        let response = self.dispatch(command, &[])?;
        response
            .value_u32()
            .map_err(|source| IpcError::Frame { command, source })
    }

    pub fn release(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
            info!("Closed session with {}", self.service);
        }
    }
}

impl<T: Transport> Drop for Handle<T> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── TCP ──────────────────────────────────────────────────────────────────────

/// Blocking TCP connection carrying length-prefixed frames.
///
/// Any failed exchange leaves the stream in an unknown position (a late reply
/// may still arrive), so the stream is shut down and dropped.  The next
/// dispatch dials the same peer again.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    timeout: Duration,
}

impl TcpTransport {
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, IpcError> {
        let connect_err = |source: io::Error| IpcError::Connect {
            address: address.to_string(),
            source,
        };

        let peer = address
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "address resolved to nothing",
                ))
            })?;

        let stream = open_stream(peer, timeout).map_err(connect_err)?;
        Ok(Self {
            stream: Some(stream),
            peer,
            timeout,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn take_stream(&mut self) -> Result<TcpStream, IpcError> {
        if let Some(stream) = self.stream.take() {
            return Ok(stream);
        }
        info!("Reconnecting to {}", self.peer);
        open_stream(self.peer, self.timeout).map_err(|source| IpcError::Connect {
            address: self.peer.to_string(),
            source,
        })
    }
}

fn open_stream(peer: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&peer, timeout)?;
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_write_timeout(Some(timeout)).ok();
    stream.set_nodelay(true).ok();
    Ok(stream)
}

fn exchange(stream: &mut TcpStream, command: u32, payload: &[u8]) -> Result<Response, IpcError> {
    let io_err = |source: io::Error| IpcError::Io { command, source };

    let request = Request::with_payload(command, payload);
    write_frame(stream, &request.encode()).map_err(io_err)?;

    let frame = read_frame(stream).map_err(io_err)?;
    let (response, _) =
        Response::decode(&frame).map_err(|source| IpcError::Frame { command, source })?;
    Ok(response)
}

impl Transport for TcpTransport {
    fn dispatch(&mut self, command: u32, payload: &[u8]) -> Result<Response, IpcError> {
        let mut stream = self.take_stream()?;
        match exchange(&mut stream, command, payload) {
            Ok(response) => {
                debug!(
                    "{} command {} -> result {:#x} ({} payload bytes)",
                    self.peer,
                    command,
                    response.result,
                    response.payload.len()
                );
                self.stream = Some(stream);
                Ok(response)
            }
            Err(e) => {
                warn!("Dropping connection to {}: {}", self.peer, e);
                let _ = stream.shutdown(Shutdown::Both);
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Locates the service through a registry and reaches it over TCP.
pub struct TcpLocator<R: ServiceRegistry> {
    address: String,
    timeout: Duration,
    registry: R,
}

impl<R: ServiceRegistry> TcpLocator<R> {
    pub fn new(address: impl Into<String>, timeout: Duration, registry: R) -> Self {
        Self {
            address: address.into(),
            timeout,
            registry,
        }
    }
}

impl<R: ServiceRegistry> ServiceLocator for TcpLocator<R> {
    type Transport = TcpTransport;

    fn is_running(&self, service: &str) -> bool {
        self.registry.is_running(service)
    }

    fn open(&self, _service: &str) -> Result<TcpTransport, IpcError> {
        TcpTransport::connect(&self.address, self.timeout)
    }
}
