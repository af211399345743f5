//! Datagram façades.
//!
//! Connectionless: every transfer names its peer explicitly, and reads
//! report who sent the datagram. The asynchronous calls mirror the TCP
//! client's (one-shot registration, completion inside a later poll,
//! blocking-mode restore before the real syscall), with `sendto` and
//! `recvfrom` carrying the address.

use std::cell::RefCell;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::io;

use crate::error::Error;
use crate::net::sock::{self, Mode};
use crate::net_utils;
use crate::registration::Registration;
use crate::service::Service;

struct DgramInner {
  service: Service,
  fd: Option<RawFd>,
  mode: Mode,
  local: Option<SocketAddr>,
  pending_read: bool,
  pending_write: bool,
}

impl DgramInner {
  fn set_mode(&mut self, mode: Mode) {
    if self.mode == mode {
      return;
    }
    if let Some(fd) = self.fd {
      sock::set_mode(fd, mode).expect("fcntl on owned descriptor");
      self.mode = mode;
    }
  }

  fn close(&mut self) {
    if let Some(fd) = self.fd.take() {
      log::debug!("closing datagram fd {fd}");
      sock::close(fd);
    }
  }
}

impl Drop for DgramInner {
  fn drop(&mut self) {
    self.close();
  }
}

/// An unbound datagram façade for sending to arbitrary peers.
///
/// # Examples
///
/// ```no_run
/// use pollnet::{Service, net::{UdpClient, UdpServer}};
///
/// let service = Service::new();
/// let server = UdpServer::bind(&service, 0)?;
/// let client = UdpClient::open(&service)?;
///
/// let target = server.local_addr();
/// client.write(b"ping", target)?;
///
/// let mut buf = vec![0u8; 64];
/// let (n, sender) = server.read(&mut buf)?;
/// println!("{n} bytes from {sender}");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct UdpClient {
  inner: Rc<RefCell<DgramInner>>,
}

/// A datagram façade bound to the wildcard address at construction.
///
/// Its bound address, carrying the OS-assigned port when bound to port
/// 0, is available from [`UdpServer::local_addr`] so peers know where
/// to reply.
pub struct UdpServer {
  inner: Rc<RefCell<DgramInner>>,
}

impl UdpClient {
  /// Creates the datagram descriptor.
  pub fn open(service: &Service) -> Result<Self, Error> {
    let fd = sock::dgram_socket()?;
    Ok(Self { inner: new_inner(service.clone(), fd, None) })
  }

  /// One blocking `sendto` of `data` to `peer`.
  pub fn write(&self, data: &[u8], peer: SocketAddr) -> io::Result<usize> {
    dgram_write(&self.inner, data, peer)
  }

  /// One blocking `recvfrom`, returning the byte count and the sender.
  pub fn read(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    dgram_read(&self.inner, buf)
  }

  /// Schedules an asynchronous `sendto`; see
  /// [`Client::write_async`](crate::net::Client::write_async) for the
  /// completion contract.
  pub fn write_async<F>(
    &self,
    data: Vec<u8>,
    peer: SocketAddr,
    callback: F,
  ) -> Result<(), Error>
  where
    F: FnOnce(&mut UdpClient, usize, Vec<u8>) + 'static,
  {
    dgram_write_async(&self.inner, wrap_client, data, peer, callback)
  }

  /// Schedules an asynchronous `recvfrom`. The completion receives the
  /// byte count, the buffer handed back, and the sender's address
  /// (`None` on the error path).
  pub fn read_async<F>(&self, buf: Vec<u8>, callback: F) -> Result<(), Error>
  where
    F: FnOnce(&mut UdpClient, usize, Vec<u8>, Option<SocketAddr>) + 'static,
  {
    dgram_read_async(&self.inner, wrap_client, buf, callback)
  }

  /// Releases the descriptor. Idempotent.
  pub fn close(&self) {
    self.inner.borrow_mut().close();
  }
}

impl UdpServer {
  /// Creates the datagram descriptor and binds the wildcard address on
  /// `port` (0 for an OS-assigned port).
  pub fn bind(service: &Service, port: u16) -> Result<Self, Error> {
    let fd = sock::dgram_socket()?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let bound = sock::bind(fd, addr)
      .and_then(|()| sock::local_addr(fd));
    match bound {
      Ok(local) => {
        log::debug!("datagram fd {fd} bound to {local}");
        Ok(Self { inner: new_inner(service.clone(), fd, Some(local)) })
      }
      Err(source) => {
        sock::close(fd);
        Err(Error::Bind { port, source })
      }
    }
  }

  /// The bound wildcard address, carrying the real port for replies.
  pub fn local_addr(&self) -> SocketAddr {
    self
      .inner
      .borrow()
      .local
      .expect("bound at construction")
  }

  /// One blocking `sendto` of `data` to `peer`.
  pub fn write(&self, data: &[u8], peer: SocketAddr) -> io::Result<usize> {
    dgram_write(&self.inner, data, peer)
  }

  /// One blocking `recvfrom`, returning the byte count and the sender.
  pub fn read(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    dgram_read(&self.inner, buf)
  }

  /// Schedules an asynchronous `sendto`; see
  /// [`Client::write_async`](crate::net::Client::write_async) for the
  /// completion contract.
  pub fn write_async<F>(
    &self,
    data: Vec<u8>,
    peer: SocketAddr,
    callback: F,
  ) -> Result<(), Error>
  where
    F: FnOnce(&mut UdpServer, usize, Vec<u8>) + 'static,
  {
    dgram_write_async(&self.inner, wrap_server, data, peer, callback)
  }

  /// Schedules an asynchronous `recvfrom`. The completion receives the
  /// byte count, the buffer handed back, and the sender's address
  /// (`None` on the error path).
  pub fn read_async<F>(&self, buf: Vec<u8>, callback: F) -> Result<(), Error>
  where
    F: FnOnce(&mut UdpServer, usize, Vec<u8>, Option<SocketAddr>) + 'static,
  {
    dgram_read_async(&self.inner, wrap_server, buf, callback)
  }

  /// Releases the descriptor. Idempotent.
  pub fn close(&self) {
    self.inner.borrow_mut().close();
  }
}

fn new_inner(
  service: Service,
  fd: RawFd,
  local: Option<SocketAddr>,
) -> Rc<RefCell<DgramInner>> {
  Rc::new(RefCell::new(DgramInner {
    service,
    fd: Some(fd),
    mode: Mode::Blocking,
    local,
    pending_read: false,
    pending_write: false,
  }))
}

fn wrap_client(inner: Rc<RefCell<DgramInner>>) -> UdpClient {
  UdpClient { inner }
}

fn wrap_server(inner: Rc<RefCell<DgramInner>>) -> UdpServer {
  UdpServer { inner }
}

fn dgram_write(
  inner: &Rc<RefCell<DgramInner>>,
  data: &[u8],
  peer: SocketAddr,
) -> io::Result<usize> {
  let fd = blocking_fd(inner)?;
  let (storage, len) = net_utils::socketaddr_to_raw(&peer);
  let n = syscall!(sendto(
    fd,
    data.as_ptr() as *const libc::c_void,
    data.len(),
    0,
    &storage as *const _ as *const libc::sockaddr,
    len
  ))?;
  Ok(n as usize)
}

fn dgram_read(
  inner: &Rc<RefCell<DgramInner>>,
  buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
  let fd = blocking_fd(inner)?;
  // SAFETY: zeroed storage is valid; recvfrom fills in the sender.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
  let n = syscall!(recvfrom(
    fd,
    buf.as_mut_ptr() as *mut libc::c_void,
    buf.len(),
    0,
    &mut storage as *mut _ as *mut libc::sockaddr,
    &mut len
  ))?;
  let sender = net_utils::raw_to_socketaddr(&storage)?;
  Ok((n as usize, sender))
}

fn blocking_fd(inner: &Rc<RefCell<DgramInner>>) -> io::Result<RawFd> {
  let mut state = inner.borrow_mut();
  let Some(fd) = state.fd else {
    return Err(io::Error::from(io::ErrorKind::NotConnected));
  };
  state.set_mode(Mode::Blocking);
  Ok(fd)
}

/// Admission check shared by the scheduled datagram operations.
fn schedule(
  inner: &Rc<RefCell<DgramInner>>,
  read: bool,
) -> Result<(RawFd, Service), Error> {
  let mut state = inner.borrow_mut();
  let Some(fd) = state.fd else {
    return Err(Error::NotConnected);
  };
  let pending =
    if read { &mut state.pending_read } else { &mut state.pending_write };
  if mem::replace(pending, true) {
    return Err(Error::OperationPending);
  }
  state.set_mode(Mode::NonBlocking);
  Ok((fd, state.service.clone()))
}

fn dgram_write_async<T, F>(
  inner: &Rc<RefCell<DgramInner>>,
  wrap: fn(Rc<RefCell<DgramInner>>) -> T,
  data: Vec<u8>,
  peer: SocketAddr,
  callback: F,
) -> Result<(), Error>
where
  T: 'static,
  F: FnOnce(&mut T, usize, Vec<u8>) + 'static,
{
  let (fd, service) = schedule(inner, false)?;
  let shared = Rc::new(RefCell::new(Some((callback, data))));

  let on_writable = {
    let inner = Rc::clone(inner);
    let shared = Rc::clone(&shared);
    move || {
      let (cb, data) =
        shared.borrow_mut().take().expect("write completion fired twice");
      let fd = {
        let mut state = inner.borrow_mut();
        state.pending_write = false;
        state.set_mode(Mode::Blocking);
        state.fd
      };
      let count = match fd {
        Some(fd) => {
          let (storage, len) = net_utils::socketaddr_to_raw(&peer);
          syscall!(sendto(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0,
            &storage as *const _ as *const libc::sockaddr,
            len
          ))
          .map(|n| n as usize)
          .unwrap_or(0)
        }
        None => 0,
      };
      let mut facade = wrap(Rc::clone(&inner));
      cb(&mut facade, count, data);
    }
  };
  let on_error = {
    let inner = Rc::clone(inner);
    let shared = Rc::clone(&shared);
    move || {
      let (cb, data) =
        shared.borrow_mut().take().expect("write completion fired twice");
      {
        let mut state = inner.borrow_mut();
        state.pending_write = false;
        state.set_mode(Mode::Blocking);
      }
      let mut facade = wrap(Rc::clone(&inner));
      cb(&mut facade, 0, data);
    }
  };

  service.add_handler(
    Registration::new(fd).on_writable(on_writable).on_error(on_error),
  );
  Ok(())
}

fn dgram_read_async<T, F>(
  inner: &Rc<RefCell<DgramInner>>,
  wrap: fn(Rc<RefCell<DgramInner>>) -> T,
  buf: Vec<u8>,
  callback: F,
) -> Result<(), Error>
where
  T: 'static,
  F: FnOnce(&mut T, usize, Vec<u8>, Option<SocketAddr>) + 'static,
{
  let (fd, service) = schedule(inner, true)?;
  let shared = Rc::new(RefCell::new(Some((callback, buf))));

  let on_readable = {
    let inner = Rc::clone(inner);
    let shared = Rc::clone(&shared);
    move || {
      let (cb, mut buf) =
        shared.borrow_mut().take().expect("read completion fired twice");
      let fd = {
        let mut state = inner.borrow_mut();
        state.pending_read = false;
        state.set_mode(Mode::Blocking);
        state.fd
      };
      let (count, sender) = match fd {
        Some(fd) => {
          // SAFETY: zeroed storage is valid; recvfrom fills in the sender.
          let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
          let mut len =
            mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
          match syscall!(recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len
          )) {
            Ok(n) => {
              (n as usize, net_utils::raw_to_socketaddr(&storage).ok())
            }
            Err(_) => (0, None),
          }
        }
        None => (0, None),
      };
      let mut facade = wrap(Rc::clone(&inner));
      cb(&mut facade, count, buf, sender);
    }
  };
  let on_error = {
    let inner = Rc::clone(inner);
    let shared = Rc::clone(&shared);
    move || {
      let (cb, buf) =
        shared.borrow_mut().take().expect("read completion fired twice");
      {
        let mut state = inner.borrow_mut();
        state.pending_read = false;
        state.set_mode(Mode::Blocking);
      }
      let mut facade = wrap(Rc::clone(&inner));
      cb(&mut facade, 0, buf, None);
    }
  };

  service.add_handler(
    Registration::new(fd).on_readable(on_readable).on_error(on_error),
  );
  Ok(())
}
