//! Hostname resolution.
//!
//! A thin, synchronous front over the system resolver. The returned
//! candidates keep the order the name service produced them in; callers
//! that only need one address take the first via [`resolve_to_any`].

use std::io;
use std::net::{IpAddr, ToSocketAddrs};

use crate::error::Error;

/// Resolves `host` to its ordered sequence of candidate addresses.
///
/// Numeric literals (`"127.0.0.1"`, `"::1"`) resolve without a
/// name-service round trip.
///
/// # Examples
///
/// ```no_run
/// let addrs = pollnet::resolve("localhost")?;
/// assert!(!addrs.is_empty());
/// # Ok::<(), pollnet::Error>(())
/// ```
pub fn resolve(host: &str) -> Result<Vec<IpAddr>, Error> {
  let addrs = (host, 0u16)
    .to_socket_addrs()
    .map_err(|source| Error::Resolution { host: host.to_string(), source })?;
  Ok(addrs.map(|addr| addr.ip()).collect())
}

/// Resolves `host` and picks the first candidate.
///
/// Fails with [`Error::Resolution`] when the lookup fails or returns an
/// empty sequence.
pub fn resolve_to_any(host: &str) -> Result<IpAddr, Error> {
  resolve(host)?.into_iter().next().ok_or_else(|| Error::Resolution {
    host: host.to_string(),
    source: io::Error::new(
      io::ErrorKind::NotFound,
      "lookup returned no addresses",
    ),
  })
}
