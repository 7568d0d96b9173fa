use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Address a client was trying to reach before its connection was
/// redirected to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OriginalDestination(SocketAddr);

impl OriginalDestination {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddr> for OriginalDestination {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for OriginalDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Asks the kernel for the pre-NAT destination of a redirected IPv4 socket.
#[cfg(target_os = "linux")]
pub fn original_destination<S: std::os::fd::AsRawFd>(
    socket: &S,
) -> io::Result<OriginalDestination> {
    use std::net::{Ipv4Addr, SocketAddrV4};

    // linux/netfilter_ipv4.h
    const SO_ORIGINAL_DST: libc::c_int = 80;

    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    // SAFETY: `addr` and `len` are valid for writes and `len` holds the
    // size of the buffer behind `addr`.
    let rc = unsafe {
        libc::getsockopt(
            socket.as_raw_fd(),
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            (&mut addr as *mut libc::sockaddr_in).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    if addr.sin_family as libc::c_int != libc::AF_INET {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "original destination is not an IPv4 address",
        ));
    }

    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    let port = u16::from_be(addr.sin_port);
    Ok(OriginalDestination(SocketAddr::V4(SocketAddrV4::new(ip, port))))
}

#[cfg(not(target_os = "linux"))]
pub fn original_destination<S>(_socket: &S) -> io::Result<OriginalDestination> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "original destination lookup requires linux netfilter",
    ))
}

#[cfg(test)]
mod tests {
    use std::net::{SocketAddr, TcpListener, TcpStream};

    use super::{OriginalDestination, original_destination};

    #[test]
    fn displays_as_socket_address() {
        let addr: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let destination = OriginalDestination::from(addr);
        assert_eq!(destination.to_string(), "10.0.0.1:443");
        assert_eq!(destination.port(), 443);
    }

    #[test]
    fn unredirected_socket_has_no_original_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        assert!(original_destination(&accepted).is_err());
    }
}
