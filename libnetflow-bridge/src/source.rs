use libnetflow_tools::{CaptureReplay, Config, Error};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{trace, warn};

pub const DEFAULT_LISTEN_PORT: u16 = 12000;
/// Requested kernel receive buffer (1 MiB)
pub const DEFAULT_RECV_BUFFER: usize = 1024 * 1024;

/// Read timeout, so the receive loop can notice a shutdown request
const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Source of raw datagrams for the dispatcher
pub trait DatagramSource {
    /// Receive one datagram into `buf`, and return its length
    ///
    /// `Ok(None)` means the source is exhausted. A timeout error
    /// (see [`Error::is_timeout`]) means no datagram is available yet.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error>;
}

/// Live UDP socket
pub struct UdpSource {
    socket: UdpSocket,
}

impl UdpSource {
    /// Bind a UDP socket on `addr`
    ///
    /// The receive buffer size is only a request, a failure to set it is logged.
    pub fn bind(addr: SocketAddr, recv_buffer: usize) -> Result<Self, Error> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
            warn!("could not set receive buffer size to {}: {}", recv_buffer, e);
        }
        socket.bind(&addr.into())?;
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        Ok(UdpSource { socket })
    }

    /// Bind using `listen.address`, `listen.port` and `listen.recv_buffer`
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let address = match config.get("listen.address") {
            Some(s) => s
                .parse::<IpAddr>()
                .map_err(|_| Error::Config(format!("invalid listen address '{s}'")))?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let port = match config.get_i64("listen.port") {
            Some(p) => u16::try_from(p)
                .map_err(|_| Error::Config(format!("invalid listen port {p}")))?,
            None => DEFAULT_LISTEN_PORT,
        };
        let recv_buffer = config
            .get_usize("listen.recv_buffer")
            .unwrap_or(DEFAULT_RECV_BUFFER);
        UdpSource::bind(SocketAddr::new(address, port), recv_buffer)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

impl DatagramSource for UdpSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let (len, peer) = self.socket.recv_from(buf)?;
        trace!("received {} bytes from {}", len, peer);
        Ok(Some(len))
    }
}

impl DatagramSource for CaptureReplay {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        self.next_datagram(buf)
    }
}
