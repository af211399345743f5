use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::error::Error;
use crate::net::client::Client;
use crate::net::sock;
use crate::registration::Registration;
use crate::service::Service;

struct ServerInner {
  service: Service,
  fd: Option<RawFd>,
  port: u16,
  pending_accept: bool,
}

impl Drop for ServerInner {
  fn drop(&mut self) {
    if let Some(fd) = self.fd.take() {
      sock::close(fd);
    }
  }
}

/// A TCP listener façade owning one listening descriptor.
///
/// Accepting is two-phase: [`Server::accept_async`] only signals that a
/// connection is ready; the caller retrieves it with a synchronous
/// [`Server::accept`] from inside the callback. The multiplexer never
/// touches the connection itself.
///
/// # Examples
///
/// ```no_run
/// use pollnet::{Service, net::Server};
///
/// let service = Service::new();
/// let server = Server::new(&service, 7000);
/// server.configure()?;
///
/// server.accept_async(|server, ready| {
///     if ready {
///         let peer = server.accept().expect("connection was announced");
///         println!("connection from {:?}", peer.ip());
///     }
/// })?;
/// service.run(true)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Server {
  inner: Rc<RefCell<ServerInner>>,
}

impl Server {
  /// An unconfigured server for `port`, scheduling on `service`.
  ///
  /// A `port` of 0 asks the OS for a free port; the one chosen is
  /// available from [`Server::port`] after [`Server::configure`].
  pub fn new(service: &Service, port: u16) -> Self {
    Self {
      inner: Rc::new(RefCell::new(ServerInner {
        service: service.clone(),
        fd: None,
        port,
        pending_accept: false,
      })),
    }
  }

  /// Creates the listening descriptor: socket, wildcard bind on the
  /// configured port, listen with the OS-maximum backlog.
  ///
  /// Fails with [`Error::AlreadyConfigured`] while a descriptor is open
  /// and with [`Error::Bind`] when the port cannot be bound.
  pub fn configure(&self) -> Result<(), Error> {
    let port = {
      let state = self.inner.borrow();
      if state.fd.is_some() {
        return Err(Error::AlreadyConfigured);
      }
      state.port
    };

    let fd = sock::stream_socket(Ipv4Addr::UNSPECIFIED.into())?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let configured = sock::set_reuse_addr(fd)
      .and_then(|()| sock::bind(fd, addr))
      .and_then(|()| {
        syscall!(listen(fd, libc::SOMAXCONN)).map(|_| ())
      });
    if let Err(source) = configured {
      sock::close(fd);
      return Err(Error::Bind { port, source });
    }

    let bound_port = match port {
      0 => sock::local_addr(fd)
        .map_err(|source| Error::Bind { port, source })?
        .port(),
      p => p,
    };

    let mut state = self.inner.borrow_mut();
    state.fd = Some(fd);
    state.port = bound_port;
    log::debug!("server fd {fd} listening on port {bound_port}");
    Ok(())
  }

  /// Performs one blocking `accept`, returning a [`Client`] façade that
  /// owns the accepted descriptor and shares this server's [`Service`].
  pub fn accept(&self) -> Result<Client, Error> {
    let (fd, service) = {
      let state = self.inner.borrow();
      let Some(fd) = state.fd else {
        return Err(Error::NotConfigured);
      };
      (fd, state.service.clone())
    };

    // SAFETY: zeroed storage is valid; accept fills in the peer address.
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len =
      std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let accepted = syscall!(accept(
      fd,
      &mut storage as *mut _ as *mut libc::sockaddr,
      &mut len
    ))
    .map_err(|source| Error::Accept { source })?;

    let peer = crate::net_utils::raw_to_socketaddr(&storage).ok();
    log::debug!("accepted fd {accepted} from {peer:?}");
    Ok(Client::from_accepted(service, accepted, peer))
  }

  /// Registers a one-shot handler that announces the next incoming
  /// connection.
  ///
  /// On readability `callback(server, true)` runs, signaling only that a
  /// connection is ready; the callback must retrieve it with
  /// [`Server::accept`]. On an error condition `callback(server, false)`
  /// runs. Fails with [`Error::OperationPending`] while an announcement is
  /// already outstanding.
  pub fn accept_async<F>(&self, callback: F) -> Result<(), Error>
  where
    F: FnOnce(&mut Server, bool) + 'static,
  {
    let (fd, service) = {
      let mut state = self.inner.borrow_mut();
      let Some(fd) = state.fd else {
        return Err(Error::NotConfigured);
      };
      if state.pending_accept {
        return Err(Error::OperationPending);
      }
      state.pending_accept = true;
      (fd, state.service.clone())
    };

    let shared = Rc::new(RefCell::new(Some(callback)));
    let on_readable = {
      let inner = Rc::clone(&self.inner);
      let shared = Rc::clone(&shared);
      move || {
        inner.borrow_mut().pending_accept = false;
        if let Some(cb) = shared.borrow_mut().take() {
          let mut facade = Server { inner: Rc::clone(&inner) };
          cb(&mut facade, true);
        }
      }
    };
    let on_error = {
      let inner = Rc::clone(&self.inner);
      let shared = Rc::clone(&shared);
      move || {
        inner.borrow_mut().pending_accept = false;
        if let Some(cb) = shared.borrow_mut().take() {
          let mut facade = Server { inner: Rc::clone(&inner) };
          cb(&mut facade, false);
        }
      }
    };

    service.add_handler(
      Registration::new(fd).on_readable(on_readable).on_error(on_error),
    );
    Ok(())
  }

  /// The configured (or OS-assigned) listening port.
  pub fn port(&self) -> u16 {
    self.inner.borrow().port
  }

  /// Releases the listening descriptor. Idempotent.
  pub fn close(&self) {
    let mut state = self.inner.borrow_mut();
    if let Some(fd) = state.fd.take() {
      log::debug!("closing server fd {fd}");
      sock::close(fd);
    }
  }
}
