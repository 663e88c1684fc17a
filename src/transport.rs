//! Transport collaborator
//!
//! The engine only needs a handful of remote calls: connect, disconnect,
//! one ROP round trip, and the async-notification calls. [`Transport`]
//! names them; [`TcpTransport`] implements them over the framed TLS
//! connection in [`crate::connection`].

use crate::config::ConnectionConfig;
use crate::connection::{self, ClientStream};
use crate::error::{Error, Result};
use crate::status;
use crate::wire::{Reader, Writer, to_u16};
use serde::Serialize;
use std::future::Future;
use tracing::{debug, info, warn};

/// Call codes of the client frame header.
pub mod call {
    pub const CONNECT: u8 = 0x01;
    pub const DISCONNECT: u8 = 0x02;
    pub const EXECUTE: u8 = 0x03;
    pub const ASYNC_CONNECT: u8 = 0x04;
    pub const ASYNC_WAIT: u8 = 0x05;
    pub const REGISTER_PUSH: u8 = 0x06;

    /// Name used in errors and logs.
    #[must_use]
    pub const fn name(code: u8) -> &'static str {
        match code {
            CONNECT => "Connect",
            DISCONNECT => "Disconnect",
            EXECUTE => "Execute",
            ASYNC_CONNECT => "AsyncConnect",
            ASYNC_WAIT => "AsyncWait",
            REGISTER_PUSH => "RegisterPush",
            _ => "Unknown",
        }
    }
}

/// `AsyncWait` output flag: a notification is waiting to be drained.
pub const NOTIFICATION_PENDING: u32 = 0x0000_0001;

/// Raw result of one `Execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTrip {
    pub status: u32,
    pub response: Vec<u8>,
}

/// Handle for the asynchronous notification context of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AsyncContextHandle(pub u32);

/// Address family of a push-notification callback address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum AddressFamily {
    Inet = 2,
    Inet6 = 23,
}

impl AddressFamily {
    /// # Errors
    ///
    /// Returns `Config` for unknown family numbers.
    pub fn from_raw(raw: u16) -> Result<Self> {
        match raw {
            2 => Ok(Self::Inet),
            23 => Ok(Self::Inet6),
            other => Err(Error::Config(format!("unknown address family {other}"))),
        }
    }
}

/// Remote calls the engine is built on.
///
/// Implementations own exactly one server session context. Every method
/// takes `&mut self`: calls on one transport never overlap.
pub trait Transport: Send {
    /// Open the session. `Ok(false)` means the server rejected the
    /// credentials.
    fn connect(&mut self, config: &ConnectionConfig) -> impl Future<Output = Result<bool>> + Send;

    /// Release the session context. `Ok(false)` if there was none.
    fn disconnect(&mut self) -> impl Future<Output = Result<bool>> + Send;

    /// Send one request buffer and return the status and response buffer.
    fn round_trip(
        &mut self,
        request: &[u8],
        max_response_size: u32,
    ) -> impl Future<Output = Result<RoundTrip>> + Send;

    /// Bind an asynchronous notification context to the session.
    fn async_connect(&mut self) -> impl Future<Output = Result<AsyncContextHandle>> + Send;

    /// Long-poll until a notification is pending or the server gives up.
    /// Returns the raw output flags.
    fn async_wait(
        &mut self,
        handle: AsyncContextHandle,
    ) -> impl Future<Output = Result<u32>> + Send;

    /// Register a datagram callback on the client's address and `port`.
    /// Returns the server's notification handle.
    fn register_push(
        &mut self,
        family: AddressFamily,
        port: u16,
        opaque: &[u8],
    ) -> impl Future<Output = Result<u32>> + Send;
}

/// [`Transport`] over a framed TLS connection.
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<ClientStream>,
    context: Option<u32>,
}

impl TcpTransport {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stream: None,
            context: None,
        }
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some() && self.context.is_some()
    }

    /// One request/reply exchange.
    ///
    /// The stream is taken out for the duration of the call, so a call that
    /// fails or is abandoned mid-flight leaves the transport disconnected
    /// rather than out of step with the server.
    async fn exchange(&mut self, code: u8, payload: &[u8]) -> Result<(u32, Vec<u8>)> {
        let mut stream = self.stream.take().ok_or(Error::NotConnected)?;
        connection::write_request(&mut stream, code, payload).await?;
        let reply = connection::read_reply(&mut stream).await?;
        self.stream = Some(stream);
        debug!(
            "{} returned status {:#010x} with {} bytes",
            call::name(code),
            reply.0,
            reply.1.len()
        );
        Ok(reply)
    }

    /// Exchange and turn a non-zero status into `Error::Rpc`.
    async fn checked(&mut self, code: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let (status, reply) = self.exchange(code, payload).await?;
        if status != status::SUCCESS {
            return Err(Error::Rpc {
                call: call::name(code),
                status,
            });
        }
        Ok(reply)
    }

    fn context(&self) -> Result<u32> {
        self.context.ok_or(Error::NotConnected)
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<bool> {
        self.stream = Some(connection::connect(&config.host, config.port).await?);

        let mut w = Writer::new();
        w.ascii_z(&config.user_dn);
        w.ascii_z(&config.username);
        w.ascii_z(&config.password);
        let (status, reply) = self.exchange(call::CONNECT, &w.into_inner()).await?;
        match status {
            status::SUCCESS => {
                let cxh = Reader::new(&reply).u32()?;
                self.context = Some(cxh);
                info!("Session context {:#010x} established", cxh);
                Ok(true)
            }
            status::LOGIN_FAILURE => {
                warn!("Server rejected credentials for {}", config.username);
                self.stream = None;
                Ok(false)
            }
            status => Err(Error::Rpc {
                call: call::name(call::CONNECT),
                status,
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<bool> {
        let Some(cxh) = self.context.take() else {
            self.stream = None;
            return Ok(false);
        };
        let result = self.checked(call::DISCONNECT, &cxh.to_le_bytes()).await;
        self.stream = None;
        result?;
        info!("Session context {:#010x} released", cxh);
        Ok(true)
    }

    async fn round_trip(&mut self, request: &[u8], max_response_size: u32) -> Result<RoundTrip> {
        let mut w = Writer::with_capacity(request.len() + 8);
        w.u32(self.context()?);
        w.u32(max_response_size);
        w.bytes(request);
        let (status, response) = self.exchange(call::EXECUTE, &w.into_inner()).await?;
        Ok(RoundTrip { status, response })
    }

    async fn async_connect(&mut self) -> Result<AsyncContextHandle> {
        let cxh = self.context()?;
        let reply = self.checked(call::ASYNC_CONNECT, &cxh.to_le_bytes()).await?;
        Ok(AsyncContextHandle(Reader::new(&reply).u32()?))
    }

    async fn async_wait(&mut self, handle: AsyncContextHandle) -> Result<u32> {
        let reply = self.checked(call::ASYNC_WAIT, &handle.0.to_le_bytes()).await?;
        Ok(Reader::new(&reply).u32()?)
    }

    async fn register_push(
        &mut self,
        family: AddressFamily,
        port: u16,
        opaque: &[u8],
    ) -> Result<u32> {
        let mut w = Writer::new();
        w.u32(self.context()?);
        w.u16(family as u16);
        w.u16(port);
        w.u16(to_u16(opaque.len(), "OpaqueSize")?);
        w.bytes(opaque);
        let reply = self.checked(call::REGISTER_PUSH, &w.into_inner()).await?;
        Ok(Reader::new(&reply).u32()?)
    }
}
