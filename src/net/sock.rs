//! Low-level descriptor plumbing shared by the façades.

use std::net::{IpAddr, SocketAddr};
use std::os::fd::RawFd;
use std::{io, mem};

use crate::error::Error;
use crate::net_utils;

/// The blocking/non-blocking state of a descriptor.
///
/// Tracked as an explicit field with a single writer, the owning façade:
/// scheduled operations flip to non-blocking before registering, and the
/// completion flips back before its one real syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
  Blocking,
  NonBlocking,
}

/// Creates an IPv4/IPv6 stream socket matching the family of `target`.
pub(crate) fn stream_socket(target: IpAddr) -> Result<RawFd, Error> {
  socket(family_of(target), libc::SOCK_STREAM)
}

/// Creates an IPv4 datagram socket.
pub(crate) fn dgram_socket() -> Result<RawFd, Error> {
  socket(libc::AF_INET, libc::SOCK_DGRAM)
}

fn socket(family: libc::c_int, ty: libc::c_int) -> Result<RawFd, Error> {
  syscall!(socket(family, ty, 0))
    .map_err(|source| Error::SocketCreation { source })
}

fn family_of(addr: IpAddr) -> libc::c_int {
  match addr {
    IpAddr::V4(_) => libc::AF_INET,
    IpAddr::V6(_) => libc::AF_INET6,
  }
}

/// Flips `O_NONBLOCK` on a descriptor we own.
pub(crate) fn set_mode(fd: RawFd, mode: Mode) -> io::Result<()> {
  let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
  let flags = match mode {
    Mode::NonBlocking => flags | libc::O_NONBLOCK,
    Mode::Blocking => flags & !libc::O_NONBLOCK,
  };
  syscall!(fcntl(fd, libc::F_SETFL, flags))?;
  Ok(())
}

pub(crate) fn set_reuse_addr(fd: RawFd) -> io::Result<()> {
  let yes: libc::c_int = 1;
  syscall!(setsockopt(
    fd,
    libc::SOL_SOCKET,
    libc::SO_REUSEADDR,
    &yes as *const _ as *const libc::c_void,
    mem::size_of::<libc::c_int>() as libc::socklen_t
  ))?;
  Ok(())
}

pub(crate) fn bind(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
  let (storage, len) = net_utils::socketaddr_to_raw(&addr);
  syscall!(bind(
    fd,
    &storage as *const _ as *const libc::sockaddr,
    len
  ))?;
  Ok(())
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
  // SAFETY: zeroed storage is valid; getsockname fills it.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
  syscall!(getsockname(
    fd,
    &mut storage as *mut _ as *mut libc::sockaddr,
    &mut len
  ))?;
  net_utils::raw_to_socketaddr(&storage)
}

pub(crate) fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
  // SAFETY: zeroed storage is valid; getpeername fills it.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
  syscall!(getpeername(
    fd,
    &mut storage as *mut _ as *mut libc::sockaddr,
    &mut len
  ))?;
  net_utils::raw_to_socketaddr(&storage)
}

/// Shuts both directions down and releases the descriptor. The shutdown
/// result is ignored: an unconnected socket reports `ENOTCONN` here and
/// that is fine.
pub(crate) fn shutdown_and_close(fd: RawFd) {
  let _ = syscall!(shutdown(fd, libc::SHUT_RDWR));
  let _ = syscall!(close(fd));
}

pub(crate) fn close(fd: RawFd) {
  let _ = syscall!(close(fd));
}
