//! # pollnet: a minimal non-blocking network I/O layer
//!
//! pollnet provides hostname resolution, a single-threaded
//! readiness-multiplexing event loop, and TCP/UDP socket façades offering
//! both blocking and callback-based asynchronous operations atop that
//! loop. Lightweight async networking without a large I/O framework.
//!
//! ## Model
//!
//! - A [`Service`] owns the set of pending [`Registration`]s. Each call to
//!   [`Service::do_poll`] runs one bounded OS readiness wait, dispatches
//!   at most one event per registration, and drops what fired (one-shot).
//!   Untriggered registrations are retried unchanged on the next poll.
//! - A façade's `*_async` call flips its descriptor to non-blocking mode,
//!   registers a one-shot handler, and returns immediately. The completion
//!   restores blocking mode, performs the real syscall, and invokes the
//!   user callback, synchronously, inside the poll that observed
//!   readiness.
//! - Everything is single-threaded and cooperative: callbacks must not
//!   block, and nothing completes unless something drives the loop.
//!
//! ## Quick start
//!
//! ```no_run
//! use pollnet::{Service, net::{Client, Server}};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Service::new();
//!     let server = Server::new(&service, 0);
//!     server.configure()?;
//!
//!     let client = Client::new(&service);
//!     assert!(client.connect("127.0.0.1", server.port())?);
//!     let peer = server.accept()?;
//!
//!     client.write_async(b"ping".to_vec(), |_, sent, _| {
//!         println!("sent {sent} bytes");
//!     })?;
//!     service.run(true)?;
//!
//!     let mut buf = vec![0u8; 4];
//!     let n = peer.read(&mut buf)?;
//!     assert_eq!(&buf[..n], b"ping");
//!     Ok(())
//! }
//! ```
//!
//! ## Error handling
//!
//! Synchronous operations fail with [`Error`], whose I/O variants carry
//! the OS error code. Asynchronous operations never fail across the
//! registration boundary: error continuations report `false` or a zero
//! byte count instead.

#[macro_use]
mod macros;

mod error;
pub mod net;
mod net_utils;
mod registration;
mod resolve;
mod service;

pub use error::Error;
pub use registration::{Continuation, Registration};
pub use resolve::{resolve, resolve_to_any};
pub use service::Service;
