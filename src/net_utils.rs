use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::{io, mem, ptr};

/// Lowers a `SocketAddr` into the storage/length pair the socket syscalls
/// expect.
pub(crate) fn socketaddr_to_raw(
  addr: &SocketAddr,
) -> (libc::sockaddr_storage, libc::socklen_t) {
  // SAFETY: sockaddr_storage is a plain C struct; all-zero is a valid value
  // for every field.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

  let len = match addr {
    SocketAddr::V4(v4) => {
      let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
      sin.sin_family = libc::AF_INET as libc::sa_family_t;
      sin.sin_port = v4.port().to_be();
      sin.sin_addr = libc::in_addr { s_addr: u32::from(*v4.ip()).to_be() };
      // SAFETY: sockaddr_in fits inside sockaddr_storage; both pointers are
      // valid, aligned stack locations that do not overlap.
      unsafe {
        ptr::copy_nonoverlapping(
          &sin as *const _ as *const u8,
          &mut storage as *mut _ as *mut u8,
          mem::size_of::<libc::sockaddr_in>(),
        );
      }
      mem::size_of::<libc::sockaddr_in>()
    }
    SocketAddr::V6(v6) => {
      let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
      sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
      sin6.sin6_port = v6.port().to_be();
      sin6.sin6_addr = libc::in6_addr { s6_addr: v6.ip().octets() };
      sin6.sin6_flowinfo = v6.flowinfo();
      sin6.sin6_scope_id = v6.scope_id();
      // SAFETY: as above, with sockaddr_in6.
      unsafe {
        ptr::copy_nonoverlapping(
          &sin6 as *const _ as *const u8,
          &mut storage as *mut _ as *mut u8,
          mem::size_of::<libc::sockaddr_in6>(),
        );
      }
      mem::size_of::<libc::sockaddr_in6>()
    }
  };

  (storage, len as libc::socklen_t)
}

/// Reads the address a syscall wrote into a `sockaddr_storage` back out as
/// a `SocketAddr`. Fails with `EAFNOSUPPORT` for families the resolver
/// never yields.
pub(crate) fn raw_to_socketaddr(
  storage: &libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
  if storage.ss_family == libc::AF_INET as libc::sa_family_t {
    // SAFETY: the family says this storage holds a sockaddr_in.
    let sin =
      unsafe { *(storage as *const _ as *const libc::sockaddr_in) };
    let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
    let port = u16::from_be(sin.sin_port);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
  } else if storage.ss_family == libc::AF_INET6 as libc::sa_family_t {
    // SAFETY: the family says this storage holds a sockaddr_in6.
    let sin6 =
      unsafe { *(storage as *const _ as *const libc::sockaddr_in6) };
    let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
    let port = u16::from_be(sin6.sin6_port);
    Ok(SocketAddr::V6(SocketAddrV6::new(
      ip,
      port,
      sin6.sin6_flowinfo,
      sin6.sin6_scope_id,
    )))
  } else {
    Err(io::Error::from_raw_os_error(libc::EAFNOSUPPORT))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn v4_round_trips() {
    let addr: SocketAddr = "192.0.2.7:4242".parse().unwrap();
    let (storage, len) = socketaddr_to_raw(&addr);
    assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());
    assert_eq!(raw_to_socketaddr(&storage).unwrap(), addr);
  }

  #[test]
  fn v6_round_trips() {
    let addr: SocketAddr = "[2001:db8::1]:9000".parse().unwrap();
    let (storage, len) = socketaddr_to_raw(&addr);
    assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in6>());
    assert_eq!(raw_to_socketaddr(&storage).unwrap(), addr);
  }

  #[test]
  fn unknown_family_is_rejected() {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    storage.ss_family = libc::AF_UNIX as libc::sa_family_t;
    let err = raw_to_socketaddr(&storage).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EAFNOSUPPORT));
  }
}
