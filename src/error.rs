use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures surfaced by synchronous operations.
///
/// Asynchronous operations never fail across the registration boundary:
/// once a handler is registered, failure is reported through the error
/// continuation as `false` or a zero byte count, never as an `Error`.
///
/// Every I/O variant carries the underlying [`io::Error`], which preserves
/// the raw OS error code (see [`Error::os_error`]). The remaining variants
/// are misuse faults: they signal a call that the façade's state machine
/// rejects outright.
#[derive(Debug, Error)]
pub enum Error {
  /// Hostname lookup failed, or yielded no usable address.
  #[error("failed to resolve host `{host}`: {source}")]
  Resolution { host: String, source: io::Error },

  /// The `socket(2)` call failed.
  #[error("failed to create socket: {source}")]
  SocketCreation { source: io::Error },

  /// Binding or listening on the configured port failed.
  #[error("failed to bind port {port}: {source}")]
  Bind { port: u16, source: io::Error },

  /// A non-blocking connect failed before any handler was registered.
  #[error("failed to connect to {addr}: {source}")]
  Connect { addr: SocketAddr, source: io::Error },

  /// The blocking `accept(2)` call failed.
  #[error("failed to accept connection: {source}")]
  Accept { source: io::Error },

  /// The OS readiness wait itself failed.
  #[error("readiness poll failed: {source}")]
  Poll { source: io::Error },

  /// `connect`/`connect_async` on a client whose descriptor is still open.
  #[error("client is already connected")]
  AlreadyConnected,

  /// `configure` on a server whose descriptor is still open.
  #[error("server is already configured")]
  AlreadyConfigured,

  /// An asynchronous operation in the same direction is still pending on
  /// this descriptor.
  #[error("an asynchronous operation is already pending on this socket")]
  OperationPending,

  /// An operation that needs an open, connected descriptor found none.
  #[error("socket is not connected")]
  NotConnected,

  /// `accept`/`accept_async` on a server that was never configured.
  #[error("server is not configured")]
  NotConfigured,
}

impl Error {
  /// The raw OS error code behind this failure, where one exists.
  pub fn os_error(&self) -> Option<i32> {
    match self {
      Error::Resolution { source, .. }
      | Error::SocketCreation { source }
      | Error::Bind { source, .. }
      | Error::Connect { source, .. }
      | Error::Accept { source }
      | Error::Poll { source } => source.raw_os_error(),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn io_variants_expose_the_os_code() {
    let err = Error::Poll { source: io::Error::from_raw_os_error(libc::EINTR) };
    assert_eq!(err.os_error(), Some(libc::EINTR));
  }

  #[test]
  fn misuse_variants_have_no_os_code() {
    assert_eq!(Error::AlreadyConnected.os_error(), None);
    assert_eq!(Error::OperationPending.os_error(), None);
  }
}
