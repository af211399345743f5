#![allow(dead_code)]

use std::time::Duration;

use pollnet::Service;

pub const POLL: Duration = Duration::from_millis(200);

/// Drives the service until `done` reports true, with a bounded number of
/// poll cycles so a broken completion fails the test instead of hanging it.
pub fn poll_until(service: &Service, done: impl Fn() -> bool) {
  for _ in 0..100 {
    if done() {
      return;
    }
    service.do_poll(POLL).expect("readiness poll failed");
  }
  panic!("condition not reached while driving the service");
}
