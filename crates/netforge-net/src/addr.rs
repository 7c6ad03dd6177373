//! Socket address resolution helpers.

use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use netforge_core::{ErrorCode, Result, net_error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketFamily {
    Ipv4,
    Ipv6,
}

/// Resolves a host string of the supported forms to a bindable or
/// connectable address. Recognized specials: "localhost", "0.0.0.0",
/// "::", plus literal dotted-quad and colon-hex addresses; anything
/// else goes through name resolution, filtered by family.
pub fn resolve(family: SocketFamily, host: &str, port: u16) -> Result<SocketAddr> {
    match family {
        SocketFamily::Ipv4 => {
            let ip = match host {
                "localhost" => Ipv4Addr::LOCALHOST,
                "0.0.0.0" | "" => Ipv4Addr::UNSPECIFIED,
                other => match other.parse::<Ipv4Addr>() {
                    Ok(ip) => ip,
                    Err(_) => return lookup(family, other, port),
                },
            };
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        SocketFamily::Ipv6 => {
            let ip = match host {
                "localhost" => Ipv6Addr::LOCALHOST,
                "::" | "" => Ipv6Addr::UNSPECIFIED,
                other => match other.parse::<Ipv6Addr>() {
                    Ok(ip) => ip,
                    Err(_) => return lookup(family, other, port),
                },
            };
            Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)))
        }
    }
}

fn lookup(family: SocketFamily, host: &str, port: u16) -> Result<SocketAddr> {
    use std::net::ToSocketAddrs;

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| net_error!(ErrorCode::NotFound, "resolve {host}: {e}"))?;
    addrs
        .into_iter()
        .find(|addr| family_of(addr) == family)
        .ok_or_else(|| net_error!(ErrorCode::NotFound, "no {family:?} address for {host}"))
}

/// Guesses the family of a host string: digits and dots mean IPv4,
/// anything else IPv6. Used by servers that take a bare host string.
pub fn sniff_family(host: &str) -> SocketFamily {
    if !host.is_empty() && host.bytes().all(|b| b == b'.' || b.is_ascii_digit()) {
        SocketFamily::Ipv4
    } else {
        SocketFamily::Ipv6
    }
}

pub fn family_of(addr: &SocketAddr) -> SocketFamily {
    match addr {
        SocketAddr::V4(_) => SocketFamily::Ipv4,
        SocketAddr::V6(_) => SocketFamily::Ipv6,
    }
}

pub(crate) fn sockaddr_from_std(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write((&raw mut storage).cast::<libc::sockaddr_in>(), sin);
            }
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write((&raw mut storage).cast::<libc::sockaddr_in6>(), sin6);
            }
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

pub(crate) fn sockaddr_to_std(storage: &libc::sockaddr_storage) -> Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        other => Err(net_error!(ErrorCode::NotSupported, "address family {other}")),
    }
}

pub(crate) fn ip_family(addr: &SocketAddr) -> libc::c_int {
    match addr.ip() {
        IpAddr::V4(_) => libc::AF_INET,
        IpAddr::V6(_) => libc::AF_INET6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_specials() {
        assert_eq!(
            resolve(SocketFamily::Ipv4, "localhost", 80).unwrap(),
            "127.0.0.1:80".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve(SocketFamily::Ipv4, "0.0.0.0", 0).unwrap(),
            "0.0.0.0:0".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve(SocketFamily::Ipv6, "::1", 443).unwrap(),
            "[::1]:443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve(SocketFamily::Ipv6, "localhost", 1).unwrap(),
            "[::1]:1".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn rejects_family_mismatch() {
        assert!(resolve(SocketFamily::Ipv4, "::1", 80).is_err());
        assert!(resolve(SocketFamily::Ipv6, "127.0.0.1", 80).is_err());
    }

    #[test]
    fn family_sniffing() {
        assert_eq!(sniff_family("192.168.0.1"), SocketFamily::Ipv4);
        assert_eq!(sniff_family("::1"), SocketFamily::Ipv6);
        assert_eq!(sniff_family("localhost"), SocketFamily::Ipv6);
    }

    #[test]
    fn raw_roundtrip() {
        for addr in ["127.0.0.1:8080", "[::1]:9090"] {
            let addr: SocketAddr = addr.parse().unwrap();
            let (raw, _) = sockaddr_from_std(&addr);
            assert_eq!(sockaddr_to_std(&raw).unwrap(), addr);
        }
    }
}
