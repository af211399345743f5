use std::cell::RefCell;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::{io, mem};

use crate::error::Error;
use crate::net::sock::{self, Mode};
use crate::registration::Registration;
use crate::resolve;
use crate::service::Service;

/// Where a [`Client`] is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
  Unopened,
  Connecting,
  Connected,
  Closed,
}

struct ClientInner {
  service: Service,
  fd: Option<RawFd>,
  state: ClientState,
  mode: Mode,
  peer_ip: Option<String>,
  pending_read: bool,
  pending_write: bool,
}

impl ClientInner {
  fn set_mode(&mut self, mode: Mode) {
    if self.mode == mode {
      return;
    }
    if let Some(fd) = self.fd {
      sock::set_mode(fd, mode).expect("fcntl on owned descriptor");
      self.mode = mode;
    }
  }

  /// Releases the descriptor after a failed connect so the caller can try
  /// again. A façade the user already closed stays closed.
  fn reset_after_failure(&mut self) {
    if let Some(fd) = self.fd.take() {
      sock::close(fd);
    }
    if self.state != ClientState::Closed {
      self.state = ClientState::Unopened;
    }
    self.peer_ip = None;
    self.mode = Mode::Blocking;
  }

  fn close(&mut self) {
    if let Some(fd) = self.fd.take() {
      log::debug!("closing client fd {fd}");
      sock::shutdown_and_close(fd);
    }
    self.state = ClientState::Closed;
    self.mode = Mode::Blocking;
  }
}

impl Drop for ClientInner {
  fn drop(&mut self) {
    if let Some(fd) = self.fd.take() {
      sock::shutdown_and_close(fd);
    }
  }
}

/// A TCP client façade owning one stream descriptor.
///
/// Blocking calls (`connect`, `read`, `write`) perform exactly one syscall
/// each. Asynchronous calls register a one-shot handler with the façade's
/// [`Service`] and return immediately; the completion callback runs
/// synchronously inside a later [`Service::do_poll`] that observed
/// readiness. At most one asynchronous read and one asynchronous write may
/// be pending per client; a duplicate is rejected with
/// [`Error::OperationPending`].
///
/// Completion callbacks hold the façade's state alive: dropping or closing
/// a client while an operation is pending routes that operation to its
/// error continuation on the next poll instead of dangling.
///
/// # Examples
///
/// ```no_run
/// use pollnet::{Service, net::Client};
///
/// let service = Service::new();
/// let client = Client::new(&service);
/// if client.connect("127.0.0.1", 7000)? {
///     client.write(b"hello")?;
///     let mut buf = vec![0u8; 1024];
///     let n = client.read(&mut buf)?;
///     println!("got {:?}", &buf[..n]);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Client {
  inner: Rc<RefCell<ClientInner>>,
}

impl Client {
  /// An unopened client scheduling on `service`.
  pub fn new(service: &Service) -> Self {
    Self::from_parts(service.clone(), None, ClientState::Unopened, None)
  }

  pub(crate) fn from_accepted(
    service: Service,
    fd: RawFd,
    peer: Option<SocketAddr>,
  ) -> Self {
    Self::from_parts(
      service,
      Some(fd),
      ClientState::Connected,
      peer.map(|addr| addr.ip().to_string()),
    )
  }

  fn from_parts(
    service: Service,
    fd: Option<RawFd>,
    state: ClientState,
    peer_ip: Option<String>,
  ) -> Self {
    Self {
      inner: Rc::new(RefCell::new(ClientInner {
        service,
        fd,
        state,
        mode: Mode::Blocking,
        peer_ip,
        pending_read: false,
        pending_write: false,
      })),
    }
  }

  /// Opens a blocking connection to `target:port`.
  ///
  /// Returns `Ok(true)` when the connection is established and `Ok(false)`
  /// when the connect syscall is refused, in which case the descriptor is
  /// released and the client may try again. Fails with
  /// [`Error::AlreadyConnected`] while a descriptor is open, and with
  /// [`Error::Resolution`]/[`Error::SocketCreation`] before any connect is
  /// attempted.
  pub fn connect(&self, target: &str, port: u16) -> Result<bool, Error> {
    if self.inner.borrow().fd.is_some() {
      return Err(Error::AlreadyConnected);
    }

    let ip = resolve::resolve_to_any(target)?;
    let addr = SocketAddr::new(ip, port);
    let fd = sock::stream_socket(ip)?;

    let (storage, len) = crate::net_utils::socketaddr_to_raw(&addr);
    match syscall!(connect(
      fd,
      &storage as *const _ as *const libc::sockaddr,
      len
    )) {
      Ok(_) => {
        let mut state = self.inner.borrow_mut();
        state.fd = Some(fd);
        state.state = ClientState::Connected;
        state.mode = Mode::Blocking;
        state.peer_ip = Some(ip.to_string());
        log::debug!("connected fd {fd} to {addr}");
        Ok(true)
      }
      Err(err) => {
        log::debug!("connect to {addr} refused: {err}");
        sock::close(fd);
        Ok(false)
      }
    }
  }

  /// Schedules a non-blocking connect to `target:port`.
  ///
  /// The call registers a one-shot handler and returns immediately; the
  /// caller must drive the façade's [`Service`] for `callback` to ever
  /// fire. On writability the connection is established and
  /// `callback(client, true)` runs; on an error condition the descriptor
  /// is released and `callback(client, false)` runs.
  ///
  /// An immediate connect failure other than "in progress" fails with
  /// [`Error::Connect`] and registers nothing.
  ///
  /// # Examples
  ///
  /// ```no_run
  /// use pollnet::{Service, net::Client};
  ///
  /// let service = Service::new();
  /// let client = Client::new(&service);
  /// client.connect_async("127.0.0.1", 7000, |client, ok| {
  ///     println!("connected: {ok} (peer {:?})", client.ip());
  /// })?;
  /// service.run(true)?;
  /// # Ok::<(), Box<dyn std::error::Error>>(())
  /// ```
  pub fn connect_async<F>(
    &self,
    target: &str,
    port: u16,
    callback: F,
  ) -> Result<(), Error>
  where
    F: FnOnce(&mut Client, bool) + 'static,
  {
    if self.inner.borrow().fd.is_some() {
      return Err(Error::AlreadyConnected);
    }

    let ip = resolve::resolve_to_any(target)?;
    let addr = SocketAddr::new(ip, port);
    let fd = sock::stream_socket(ip)?;
    sock::set_mode(fd, Mode::NonBlocking)
      .expect("fcntl on owned descriptor");

    let (storage, len) = crate::net_utils::socketaddr_to_raw(&addr);
    match syscall!(connect(
      fd,
      &storage as *const _ as *const libc::sockaddr,
      len
    )) {
      // Immediate success still goes through the handler: the descriptor
      // reports writable on the next poll.
      Ok(_) => {}
      Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
      Err(source) => {
        sock::close(fd);
        return Err(Error::Connect { addr, source });
      }
    }

    let service = {
      let mut state = self.inner.borrow_mut();
      state.fd = Some(fd);
      state.state = ClientState::Connecting;
      state.mode = Mode::NonBlocking;
      state.service.clone()
    };
    log::debug!("connect to {addr} in progress on fd {fd}");

    let shared = Rc::new(RefCell::new(Some(callback)));
    let on_writable = {
      let inner = Rc::clone(&self.inner);
      let shared = Rc::clone(&shared);
      move || {
        let ok = {
          let mut state = inner.borrow_mut();
          state.set_mode(Mode::Blocking);
          match state.fd.and_then(|fd| sock::peer_addr(fd).ok()) {
            Some(peer) => {
              state.state = ClientState::Connected;
              state.peer_ip = Some(peer.ip().to_string());
              true
            }
            None => false,
          }
        };
        if !ok {
          inner.borrow_mut().reset_after_failure();
        }
        if let Some(cb) = shared.borrow_mut().take() {
          let mut facade = Client { inner: Rc::clone(&inner) };
          cb(&mut facade, ok);
        }
      }
    };
    let on_error = {
      let inner = Rc::clone(&self.inner);
      let shared = Rc::clone(&shared);
      move || {
        inner.borrow_mut().reset_after_failure();
        if let Some(cb) = shared.borrow_mut().take() {
          let mut facade = Client { inner: Rc::clone(&inner) };
          cb(&mut facade, false);
        }
      }
    };

    service.add_handler(
      Registration::new(fd).on_writable(on_writable).on_error(on_error),
    );
    Ok(())
  }

  /// Performs exactly one blocking `send`, returning the bytes written.
  pub fn write(&self, data: &[u8]) -> io::Result<usize> {
    let fd = self.blocking_fd()?;
    let n = syscall!(send(
      fd,
      data.as_ptr() as *const libc::c_void,
      data.len(),
      0
    ))?;
    Ok(n as usize)
  }

  /// Performs exactly one blocking `recv`, returning the bytes read.
  /// `Ok(0)` signals the peer closed the connection.
  pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
    let fd = self.blocking_fd()?;
    let n = syscall!(recv(
      fd,
      buf.as_mut_ptr() as *mut libc::c_void,
      buf.len(),
      0
    ))?;
    Ok(n as usize)
  }

  /// Schedules an asynchronous write of `data`.
  ///
  /// Once the descriptor reports writable, the completion restores
  /// blocking mode, performs the one `send`, and invokes `callback` with
  /// the byte count and the buffer handed back. On the error path the
  /// count is 0. Fails with [`Error::OperationPending`] while another
  /// asynchronous write is outstanding.
  pub fn write_async<F>(&self, data: Vec<u8>, callback: F) -> Result<(), Error>
  where
    F: FnOnce(&mut Client, usize, Vec<u8>) + 'static,
  {
    let (fd, service) = self.schedule(Direction::Write)?;
    let shared = Rc::new(RefCell::new(Some((callback, data))));

    let on_writable = {
      let inner = Rc::clone(&self.inner);
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
          Some(fd) => syscall!(send(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0
          ))
          .map(|n| n as usize)
          .unwrap_or(0),
          None => 0,
        };
        let mut facade = Client { inner: Rc::clone(&inner) };
        cb(&mut facade, count, data);
      }
    };
    let on_error = {
      let inner = Rc::clone(&self.inner);
      let shared = Rc::clone(&shared);
      move || {
        let (cb, data) =
          shared.borrow_mut().take().expect("write completion fired twice");
        {
          let mut state = inner.borrow_mut();
          state.pending_write = false;
          state.set_mode(Mode::Blocking);
        }
        let mut facade = Client { inner: Rc::clone(&inner) };
        cb(&mut facade, 0, data);
      }
    };

    service.add_handler(
      Registration::new(fd).on_writable(on_writable).on_error(on_error),
    );
    Ok(())
  }

  /// Schedules an asynchronous read into `buf`.
  ///
  /// Once the descriptor reports readable, the completion restores
  /// blocking mode, performs the one `recv`, and invokes `callback` with
  /// the byte count and the buffer handed back. A count of 0 signals
  /// peer-closed or the error path. Fails with [`Error::OperationPending`]
  /// while another asynchronous read is outstanding.
  pub fn read_async<F>(&self, buf: Vec<u8>, callback: F) -> Result<(), Error>
  where
    F: FnOnce(&mut Client, usize, Vec<u8>) + 'static,
  {
    let (fd, service) = self.schedule(Direction::Read)?;
    let shared = Rc::new(RefCell::new(Some((callback, buf))));

    let on_readable = {
      let inner = Rc::clone(&self.inner);
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
        let count = match fd {
          Some(fd) => syscall!(recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0
          ))
          .map(|n| n as usize)
          .unwrap_or(0),
          None => 0,
        };
        let mut facade = Client { inner: Rc::clone(&inner) };
        cb(&mut facade, count, buf);
      }
    };
    let on_error = {
      let inner = Rc::clone(&self.inner);
      let shared = Rc::clone(&shared);
      move || {
        let (cb, buf) =
          shared.borrow_mut().take().expect("read completion fired twice");
        {
          let mut state = inner.borrow_mut();
          state.pending_read = false;
          state.set_mode(Mode::Blocking);
        }
        let mut facade = Client { inner: Rc::clone(&inner) };
        cb(&mut facade, 0, buf);
      }
    };

    service.add_handler(
      Registration::new(fd).on_readable(on_readable).on_error(on_error),
    );
    Ok(())
  }

  /// Shuts both directions down and releases the descriptor. Idempotent.
  pub fn close(&self) {
    self.inner.borrow_mut().close();
  }

  /// The cached peer IP, once connected.
  pub fn ip(&self) -> Option<String> {
    self.inner.borrow().peer_ip.clone()
  }

  /// The façade's position in its life cycle.
  pub fn state(&self) -> ClientState {
    self.inner.borrow().state
  }

  fn blocking_fd(&self) -> io::Result<RawFd> {
    let mut state = self.inner.borrow_mut();
    let Some(fd) = state.fd else {
      return Err(io::Error::from(io::ErrorKind::NotConnected));
    };
    state.set_mode(Mode::Blocking);
    Ok(fd)
  }

  /// Common admission check for the scheduled read/write paths: the
  /// client must be connected, the direction free, and the descriptor in
  /// non-blocking mode before the registration is made.
  fn schedule(&self, direction: Direction) -> Result<(RawFd, Service), Error> {
    let mut state = self.inner.borrow_mut();
    let Some(fd) = state.fd else {
      return Err(Error::NotConnected);
    };
    if state.state != ClientState::Connected {
      return Err(Error::NotConnected);
    }
    let pending = match direction {
      Direction::Read => &mut state.pending_read,
      Direction::Write => &mut state.pending_write,
    };
    if mem::replace(pending, true) {
      return Err(Error::OperationPending);
    }
    state.set_mode(Mode::NonBlocking);
    Ok((fd, state.service.clone()))
  }
}

enum Direction {
  Read,
  Write,
}
