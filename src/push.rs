//! Push datagram listener
//!
//! A push datagram only says "something is queued, drain now". It may be
//! lost or duplicated; losing one is never an error.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::transport::AddressFamily;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Largest datagram a listener reads.
const MAX_DATAGRAM: usize = 2048;

/// Receives push datagrams for the engine.
pub trait PushListener {
    /// Wait for one datagram on `port`. `Ok(None)` when none arrived in
    /// time.
    fn received_datagram(
        &self,
        family: AddressFamily,
        port: u16,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}

/// UDP listener with a per-datagram timeout.
///
/// Built with [`UdpPushListener::bind`] it keeps its socket between calls,
/// so datagrams sent while nobody is waiting are not lost. Otherwise each
/// call binds the requested port for the duration of the wait.
#[derive(Debug)]
pub struct UdpPushListener {
    socket: Option<UdpSocket>,
    timeout: Duration,
}

impl UdpPushListener {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            socket: None,
            timeout,
        }
    }

    /// Listener using `PushNotificationTimeout`.
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.push_timeout)
    }

    /// Bind `port` (0 for any) once and keep the socket.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the port cannot be bound.
    pub async fn bind(family: AddressFamily, port: u16, timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(any_addr(family, port)).await?;
        debug!("Push listener bound to {}", socket.local_addr()?);
        Ok(Self {
            socket: Some(socket),
            timeout,
        })
    }

    /// Port of the kept socket, if any.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.socket
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(|addr| addr.port())
    }

    async fn receive(&self, socket: &UdpSocket) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0; MAX_DATAGRAM];
        match tokio::time::timeout(self.timeout, socket.recv_from(&mut buf)).await {
            Ok(received) => {
                let (len, from) = received?;
                debug!("Push datagram of {} bytes from {}", len, from);
                buf.truncate(len);
                Ok(Some(buf))
            }
            Err(_) => Ok(None),
        }
    }
}

const fn any_addr(family: AddressFamily, port: u16) -> SocketAddr {
    match family {
        AddressFamily::Inet => SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        AddressFamily::Inet6 => SocketAddr::new(std::net::IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
    }
}

impl PushListener for UdpPushListener {
    async fn received_datagram(&self, family: AddressFamily, port: u16) -> Result<Option<Vec<u8>>> {
        if let Some(socket) = &self.socket
            && self.local_port() == Some(port)
        {
            return self.receive(socket).await;
        }
        let socket = UdpSocket::bind(any_addr(family, port)).await?;
        self.receive(&socket).await
    }
}
