//! Socket abstraction used by the sender and receiver engines.
//!
//! The engines talk to the network through these two traits, so tests (and
//! embedders with unusual transports) can swap in their own implementation.
//! The real implementations are plain UDP sockets built with [socket2].

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// How long a blocking receive waits before handing control back to the
/// worker loop, so it can observe its enable flag and run the timeout sweep.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// The longest packet in the sACN standard is a universe discovery page
/// with the full 512 universes.
const MAX_PACKET_SIZE: usize = 1144;

/// Receive side of the socket facade.
pub trait ReceiverSocket: Send + Sync {
    /// Receives one datagram. A timeout is reported as an [io::Error] of
    /// kind [io::ErrorKind::WouldBlock] or [io::ErrorKind::TimedOut]; it is
    /// a control flow signal, not a failure.
    fn recv(&self) -> io::Result<Vec<u8>>;

    /// Joins an IPv4 multicast group.
    fn join_multicast(&self, group: Ipv4Addr) -> io::Result<()>;

    /// Leaves an IPv4 multicast group.
    fn leave_multicast(&self, group: Ipv4Addr) -> io::Result<()>;
}

/// Send side of the socket facade.
pub trait SenderSocket: Send + Sync {
    /// Sends a datagram to a single destination.
    fn send_unicast(&self, data: &[u8], destination: SocketAddr) -> io::Result<()>;

    /// Sends a datagram to a multicast group with the given TTL.
    fn send_multicast(&self, data: &[u8], group: SocketAddr, ttl: u32) -> io::Result<()>;

    /// Sends a datagram to the local broadcast address on the given port.
    fn send_broadcast(&self, data: &[u8], port: u16) -> io::Result<()>;
}

fn ipv4_interface(ip: IpAddr) -> io::Result<Ipv4Addr> {
    match ip {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => {
            Err(io::Error::new(io::ErrorKind::Unsupported, "sACN only supports IPv4"))
        }
    }
}

/// A [ReceiverSocket] on a UDP socket of the OS.
pub struct UdpReceiverSocket {
    socket: Socket,
    /// The interface the socket is bound on; multicast membership is managed
    /// on the same interface.
    interface: Ipv4Addr,
}

impl UdpReceiverSocket {
    /// Creates a UDP socket bound to the given address, with a 100 ms read
    /// timeout.
    pub fn bind(ip: IpAddr, port: u16) -> io::Result<Self> {
        let interface = ipv4_interface(ip)?;
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        // Not all systems support multiple sockets on the same port and interface.
        socket.set_reuse_address(true).ok();
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;

        let addr = SocketAddr::new(ip, port);
        socket.bind(&addr.into())?;
        log::info!("bound sACN receiver socket on {addr}");

        Ok(Self { socket, interface })
    }
}

impl ReceiverSocket for UdpReceiverSocket {
    fn recv(&self) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(MAX_PACKET_SIZE);
        let received = self.socket.recv(data.spare_capacity_mut())?;

        // SAFETY: `recv` initialized the first `received` bytes.
        unsafe {
            data.set_len(received);
        }
        Ok(data)
    }

    fn join_multicast(&self, group: Ipv4Addr) -> io::Result<()> {
        self.socket.join_multicast_v4(&group, &self.interface)
    }

    fn leave_multicast(&self, group: Ipv4Addr) -> io::Result<()> {
        self.socket.leave_multicast_v4(&group, &self.interface)
    }
}

/// A [SenderSocket] on a UDP socket of the OS.
pub struct UdpSenderSocket {
    socket: Socket,
}

impl UdpSenderSocket {
    /// Creates a UDP socket bound to the given address, with broadcast
    /// permission for universe discovery.
    pub fn bind(ip: IpAddr, port: u16) -> io::Result<Self> {
        ipv4_interface(ip)?;
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true).ok();
        socket.set_broadcast(true)?;

        let addr = SocketAddr::new(ip, port);
        socket.bind(&addr.into())?;
        log::info!("bound sACN sender socket on {addr}");

        Ok(Self { socket })
    }
}

impl SenderSocket for UdpSenderSocket {
    fn send_unicast(&self, data: &[u8], destination: SocketAddr) -> io::Result<()> {
        self.socket.send_to(data, &destination.into())?;
        Ok(())
    }

    fn send_multicast(&self, data: &[u8], group: SocketAddr, ttl: u32) -> io::Result<()> {
        self.socket.set_multicast_ttl_v4(ttl)?;
        self.socket.send_to(data, &group.into())?;
        Ok(())
    }

    fn send_broadcast(&self, data: &[u8], port: u16) -> io::Result<()> {
        let destination = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port);
        self.socket.send_to(data, &destination.into())?;
        Ok(())
    }
}
