use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::{pool::BufferPool, router::Router, split::SplitBytes, telemetry::Telemetry};

/// Creates a UDP socket bound to `addr`.
///
/// The kernel receive buffer is sized to `recv_buffer_size` on a best-effort basis: if the kernel refuses, a warning
/// is logged and the default size is kept. When `reuse_port` is set, the socket is marked so that several sockets
/// can bind the same address and have the kernel balance datagrams across them.
pub(crate) fn bind_socket(
    addr: SocketAddr,
    recv_buffer_size: usize,
    reuse_port: bool,
    read_timeout: Duration,
) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    if reuse_port {
        socket.set_reuse_address(true)?;
        set_reuse_port(&socket)?;
    }

    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
        warn!(error = %e, requested_size = recv_buffer_size, "Could not set socket receive buffer size.");
    }

    socket.bind(&addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(read_timeout))?;

    Ok(socket)
}

#[cfg(unix)]
fn set_reuse_port(socket: &Socket) -> io::Result<()> {
    socket.set_reuse_port(true)
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &Socket) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "SO_REUSEPORT is not supported on this platform"))
}

/// Reads datagrams from one socket and hands every line to the router.
pub(crate) struct SocketReader {
    id: usize,
    socket: UdpSocket,
    pool: BufferPool,
    router: Arc<Router>,
    telemetry: Telemetry,
    shutdown: Arc<AtomicBool>,
}

impl SocketReader {
    pub fn new(
        id: usize,
        socket: UdpSocket,
        pool: BufferPool,
        router: Arc<Router>,
        telemetry: Telemetry,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self { id, socket, pool, router, telemetry, shutdown }
    }

    /// Runs the read loop until shutdown is requested.
    ///
    /// Read errors are logged and counted, and never end the loop.
    pub fn run(self) {
        if let Ok(addr) = self.socket.local_addr() {
            info!(reader = self.id, address = %addr, "UDP server listening.");
        }

        while !self.shutdown.load(Ordering::Acquire) {
            let mut buf = self.pool.checkout();

            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
                Err(e) => {
                    error!(reader = self.id, error = %e, "Error reading from UDP socket.");
                    self.telemetry.track_read_error();
                    continue;
                }
            };

            for line in SplitBytes::new(&buf[..n], b'\n') {
                self.router.handle_packet(line);
            }
            self.telemetry.track_datagram(n);
        }

        debug!(reader = self.id, "UDP reader stopped.");
    }
}
