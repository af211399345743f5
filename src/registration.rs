//! One-shot completion-handler registrations.
//!
//! A [`Registration`] binds one socket descriptor to up to three
//! continuations and lives in the [`Service`](crate::Service)'s pending set
//! until a readiness poll consumes it. Consumption is one-shot: a
//! registration fires at most once, then is discarded; re-arming is always
//! an explicit new registration made by whoever owns the completion.

use std::os::fd::RawFd;

/// What to do when the registered descriptor becomes ready.
///
/// Continuations run synchronously inside the poll that observed
/// readiness, so they must not block or run long.
pub type Continuation = Box<dyn FnOnce()>;

/// An interest registration for one descriptor.
///
/// Built with [`Registration::new`] plus the chained `on_*` setters, then
/// handed to [`Service::add_handler`](crate::Service::add_handler). The
/// poll interest is derived from which data continuations are present:
/// readable interest iff `on_readable` is set, writable interest iff
/// `on_writable` is set. Error conditions are always observed.
///
/// # Examples
///
/// ```no_run
/// use pollnet::{Registration, Service};
///
/// let service = Service::new();
/// # let fd = 0;
/// service.add_handler(
///   Registration::new(fd)
///     .on_readable(|| println!("readable"))
///     .on_error(|| println!("gone")),
/// );
/// ```
pub struct Registration {
  fd: RawFd,
  on_readable: Option<Continuation>,
  on_writable: Option<Continuation>,
  on_error: Option<Continuation>,
}

impl Registration {
  /// A registration for `fd` with no continuations attached yet.
  pub fn new(fd: RawFd) -> Self {
    Self { fd, on_readable: None, on_writable: None, on_error: None }
  }

  /// Attaches the continuation invoked when `fd` reports readable.
  pub fn on_readable(mut self, f: impl FnOnce() + 'static) -> Self {
    self.on_readable = Some(Box::new(f));
    self
  }

  /// Attaches the continuation invoked when `fd` reports writable.
  pub fn on_writable(mut self, f: impl FnOnce() + 'static) -> Self {
    self.on_writable = Some(Box::new(f));
    self
  }

  /// Attaches the continuation invoked when `fd` reports an error
  /// condition (`POLLERR`, `POLLHUP` or `POLLNVAL`).
  pub fn on_error(mut self, f: impl FnOnce() + 'static) -> Self {
    self.on_error = Some(Box::new(f));
    self
  }

  /// The registered descriptor.
  pub fn fd(&self) -> RawFd {
    self.fd
  }

  /// The poll events this registration asks for.
  pub(crate) fn interest(&self) -> libc::c_short {
    let mut events = 0;
    if self.on_readable.is_some() {
      events |= libc::POLLIN;
    }
    if self.on_writable.is_some() {
      events |= libc::POLLOUT;
    }
    events
  }

  /// Consumes the registration down the error path.
  pub(crate) fn fire_error(mut self) {
    if let Some(f) = self.on_error.take() {
      f();
    }
  }

  /// Consumes the registration down the data path, invoking the readable
  /// continuation first, then the writable one, as applicable.
  pub(crate) fn fire_ready(mut self, readable: bool, writable: bool) {
    if readable {
      if let Some(f) = self.on_readable.take() {
        f();
      }
    }
    if writable {
      if let Some(f) = self.on_writable.take() {
        f();
      }
    }
  }
}
