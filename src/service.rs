//! The readiness multiplexer.
//!
//! [`Service`] owns the set of pending [`Registration`]s and turns OS
//! readiness into continuation dispatch. It is strictly single-threaded:
//! the only suspension point is the bounded wait inside [`Service::do_poll`],
//! and forward progress depends entirely on something repeatedly invoking
//! `do_poll`, directly or via [`Service::run`].

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::registration::Registration;

/// Wait bound used by [`Service::run`] for each poll cycle.
const RUN_WAIT: Duration = Duration::from_millis(50);

/// A single-threaded readiness-multiplexing event loop.
///
/// `Service` hands out cheap clones that all view the same pending set,
/// the way the socket façades hold it. It is deliberately `!Send`: the
/// pending set is only ever touched from the thread driving the loop.
///
/// Dispatch is one-shot with resubmission: each poll snapshots the pending
/// set, fires each triggered registration at most once and drops it, and
/// re-inserts untriggered registrations unchanged for the next call.
/// Whatever should happen next is re-armed explicitly by the completion
/// that just ran, never by the multiplexer itself.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use pollnet::{Registration, Service};
///
/// let service = Service::new();
/// # let fd = 0;
/// service.add_handler(Registration::new(fd).on_readable(|| {
///   // perform the actual read here, re-register if more is expected
/// }));
///
/// while service.do_poll(Duration::from_millis(50))? {}
/// # Ok::<(), pollnet::Error>(())
/// ```
#[derive(Clone, Default)]
pub struct Service {
  pending: Rc<RefCell<Vec<Registration>>>,
}

impl Service {
  /// A service with an empty pending set.
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts a registration into the pending set.
  ///
  /// The insert is unconditional: duplicate descriptors are permitted and
  /// polled independently.
  pub fn add_handler(&self, registration: Registration) {
    log::trace!(
      "registering handler for fd {} (interest {:#06x})",
      registration.fd(),
      registration.interest()
    );
    self.pending.borrow_mut().push(registration);
  }

  /// Number of registrations currently awaiting readiness.
  pub fn pending_handlers(&self) -> usize {
    self.pending.borrow().len()
  }

  /// Runs one bounded readiness poll over the pending set.
  ///
  /// Returns `Ok(false)` immediately when nothing is pending, `Ok(true)`
  /// after a poll cycle, and [`Error::Poll`] when the OS wait itself
  /// fails. Registrations that report an error condition fire their error
  /// continuation; registrations that report readiness fire their
  /// readable and/or writable continuations; either way the registration
  /// is consumed. Within one registration the error path takes priority
  /// over the data path, and only one of the two ever runs. Registrations
  /// the poll did not trigger are re-inserted unchanged.
  ///
  /// Continuations run synchronously on this call stack, after the
  /// pending set has been snapshotted, so they are free to re-register.
  pub fn do_poll(&self, timeout: Duration) -> Result<bool, Error> {
    let snapshot = {
      let mut pending = self.pending.borrow_mut();
      if pending.is_empty() {
        return Ok(false);
      }
      mem::take(&mut *pending)
    };

    let mut fds: Vec<libc::pollfd> = snapshot
      .iter()
      .map(|registration| libc::pollfd {
        fd: registration.fd(),
        events: registration.interest(),
        revents: 0,
      })
      .collect();

    let timeout_ms: libc::c_int =
      timeout.as_millis().try_into().unwrap_or(libc::c_int::MAX);

    let triggered = match syscall!(poll(
      fds.as_mut_ptr(),
      fds.len() as libc::nfds_t,
      timeout_ms
    )) {
      Ok(n) => n,
      Err(source) => {
        // Keep the snapshot alive for a later attempt before failing.
        self.pending.borrow_mut().extend(snapshot);
        return Err(Error::Poll { source });
      }
    };
    log::trace!("poll woke with {triggered} of {} fds ready", fds.len());

    let mut untriggered = Vec::new();
    for (registration, pollfd) in snapshot.into_iter().zip(fds.iter()) {
      let revents = pollfd.revents;
      if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        log::warn!(
          "fd {} reported error condition {:#06x}",
          pollfd.fd,
          revents
        );
        registration.fire_error();
      } else if revents & (libc::POLLIN | libc::POLLOUT) != 0 {
        registration.fire_ready(
          revents & libc::POLLIN != 0,
          revents & libc::POLLOUT != 0,
        );
      } else {
        untriggered.push(registration);
      }
    }

    // Continuations may have re-armed while we dispatched; append the
    // survivors after whatever they added.
    if !untriggered.is_empty() {
      self.pending.borrow_mut().extend(untriggered);
    }

    Ok(true)
  }

  /// The blocking event-loop entry point.
  ///
  /// Repeatedly calls [`Service::do_poll`] with a fixed wait bound.
  /// Returns once the pending set is empty **and** `abort_on_empty` is
  /// set; otherwise loops forever, idling for the wait bound whenever
  /// nothing is pending.
  pub fn run(&self, abort_on_empty: bool) -> Result<(), Error> {
    loop {
      if !self.do_poll(RUN_WAIT)? {
        if abort_on_empty {
          return Ok(());
        }
        thread::sleep(RUN_WAIT);
      }
    }
  }
}
