use crate::scoped_fd::ScopedFd;
use nix::{
    errno::Errno,
    sys::socket::{
        bind, listen, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
    },
};
use std::{mem, net::Ipv4Addr, slice, str::FromStr};

#[derive(Copy, Clone, Eq, PartialEq)]
pub enum ProbePort {
    DontProbe,
    ProbePort,
}

const MAX_PROBE_TRIES: u32 = 100;

/// Bind and listen on `host:port`. With `ProbePort`, successive ports are
/// tried until one binds; `port` is updated to the port actually bound.
/// Infallible: either a listening socket is returned or we abort.
pub fn open_socket(host: &str, port: &mut u16, probe: ProbePort) -> ScopedFd {
    let listen_fd = match socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    ) {
        Ok(fd) => ScopedFd::from_raw(fd),
        Err(e) => fatal!("Couldn't create socket: {}", e),
    };
    // Keep probed ports reusable so a quick restart of the server can land
    // on the same port the client was told about.
    setsockopt(listen_fd.as_raw(), sockopt::ReuseAddr, &true).unwrap_or(());

    let ip = match Ipv4Addr::from_str(host) {
        Ok(ip) => ip,
        Err(_) => fatal!("Couldn't parse listen address `{}`", host),
    };

    let mut tries = 0;
    loop {
        let addr = SockaddrIn::from(std::net::SocketAddrV4::new(ip, *port));
        match bind(listen_fd.as_raw(), &addr).and_then(|_| listen(listen_fd.as_raw(), 1)) {
            Ok(()) => return listen_fd,
            Err(e) => {
                tries += 1;
                let recoverable =
                    e == Errno::EADDRINUSE || e == Errno::EACCES || e == Errno::EINVAL;
                if probe == ProbePort::DontProbe || !recoverable || tries >= MAX_PROBE_TRIES {
                    fatal!("Couldn't bind to port {}: {}", *port, e);
                }
                *port = port.wrapping_add(1);
                if *port < 1024 {
                    // Skip the privileged range; an unprivileged server can
                    // never bind there.
                    *port = 1024;
                }
            }
        }
    }
}

/// View a sized value as raw bytes.
pub fn u8_slice<T: Sized>(data: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(data as *const T as *const u8, mem::size_of::<T>()) }
}

pub fn u8_slice_mut<T: Sized>(data: &mut T) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(data as *mut T as *mut u8, mem::size_of::<T>()) }
}
