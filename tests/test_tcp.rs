mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::poll_until;
use pollnet::net::{Client, ClientState, Server};
use pollnet::{Error, Service};

fn connected_pair(service: &Service) -> (Server, Client, Client) {
  let server = Server::new(service, 0);
  server.configure().expect("configure");
  let client = Client::new(service);
  assert!(client.connect("127.0.0.1", server.port()).expect("connect"));
  let accepted = server.accept().expect("accept");
  (server, client, accepted)
}

#[test]
fn configure_connect_accept_ping() {
  let service = Service::new();
  let server = Server::new(&service, 0);
  server.configure().expect("configure");
  assert_ne!(server.port(), 0);

  let client = Client::new(&service);
  assert_eq!(client.state(), ClientState::Unopened);
  assert!(client.connect("127.0.0.1", server.port()).expect("connect"));
  assert_eq!(client.state(), ClientState::Connected);
  assert_eq!(client.ip().as_deref(), Some("127.0.0.1"));

  let peer = server.accept().expect("accept");
  assert_eq!(peer.state(), ClientState::Connected);
  assert_eq!(peer.ip().as_deref(), Some("127.0.0.1"));

  assert_eq!(client.write(b"ping").expect("write"), 4);
  let mut buf = vec![0u8; 16];
  let n = peer.read(&mut buf).expect("read");
  assert_eq!(&buf[..n], b"ping");
}

#[test]
fn second_connect_fails_already_connected() {
  let service = Service::new();
  let (_server, client, _peer) = connected_pair(&service);

  let err = client.connect("127.0.0.1", 1).unwrap_err();
  assert!(matches!(err, Error::AlreadyConnected), "got {err}");
  let err = client.connect_async("127.0.0.1", 1, |_, _| {}).unwrap_err();
  assert!(matches!(err, Error::AlreadyConnected), "got {err}");
}

#[test]
fn second_configure_fails_already_configured() {
  let service = Service::new();
  let server = Server::new(&service, 0);
  server.configure().expect("configure");
  let err = server.configure().unwrap_err();
  assert!(matches!(err, Error::AlreadyConfigured), "got {err}");
}

#[test]
fn close_twice_is_idempotent() {
  let service = Service::new();
  let (_server, client, peer) = connected_pair(&service);

  client.close();
  assert_eq!(client.state(), ClientState::Closed);
  client.close();
  assert_eq!(client.state(), ClientState::Closed);

  // The peer observes exactly one orderly shutdown.
  let mut buf = vec![0u8; 8];
  assert_eq!(peer.read(&mut buf).expect("read"), 0);
}

#[test]
fn round_trip_is_byte_identical_and_ordered() {
  let service = Service::new();
  let (_server, client, peer) = connected_pair(&service);

  let mut sizes = vec![0usize, 1, 7, 256, 1024, 4096, 8192];
  sizes.push(fastrand::usize(1..5000));

  for size in sizes {
    let payload: Vec<u8> = (0..size).map(|_| fastrand::u8(..)).collect();
    assert_eq!(client.write(&payload).expect("write"), size);

    let mut got = vec![0u8; size];
    let mut total = 0;
    while total < size {
      let n = peer.read(&mut got[total..]).expect("read");
      assert!(n > 0, "peer closed mid-payload");
      total += n;
    }
    assert_eq!(got, payload, "payload of {size} bytes came back different");
  }
}

#[test]
fn async_write_completes_exactly_once_with_positive_count() {
  let service = Service::new();
  let (_server, client, peer) = connected_pair(&service);

  let completions = Rc::new(Cell::new(0usize));
  let sent = Rc::new(Cell::new(0usize));
  {
    let completions = Rc::clone(&completions);
    let sent = Rc::clone(&sent);
    client
      .write_async(b"hello".to_vec(), move |_, count, _| {
        completions.set(completions.get() + 1);
        sent.set(count);
      })
      .expect("write_async");
  }
  assert_eq!(service.pending_handlers(), 1);

  poll_until(&service, || completions.get() > 0);
  assert_eq!(completions.get(), 1);
  assert_eq!(sent.get(), 5);
  assert_eq!(service.pending_handlers(), 0);

  // Extra polls must not revive the consumed registration.
  assert!(!service.do_poll(common::POLL).unwrap());
  assert_eq!(completions.get(), 1);

  let mut buf = vec![0u8; 8];
  let n = peer.read(&mut buf).expect("read");
  assert_eq!(&buf[..n], b"hello");
}

#[test]
fn async_read_receives_what_the_peer_wrote() {
  let service = Service::new();
  let (_server, client, peer) = connected_pair(&service);

  let got = Rc::new(RefCell::new(None));
  {
    let got = Rc::clone(&got);
    client
      .read_async(vec![0u8; 32], move |_, count, buf| {
        *got.borrow_mut() = Some(buf[..count].to_vec());
      })
      .expect("read_async");
  }

  peer.write(b"pong").expect("write");
  poll_until(&service, || got.borrow().is_some());
  assert_eq!(got.borrow().as_deref(), Some(&b"pong"[..]));
}

#[test]
fn duplicate_async_operations_are_rejected() {
  let service = Service::new();
  let (_server, client, _peer) = connected_pair(&service);

  client.read_async(vec![0u8; 8], |_, _, _| {}).expect("first read_async");
  let err = client.read_async(vec![0u8; 8], |_, _, _| {}).unwrap_err();
  assert!(matches!(err, Error::OperationPending), "got {err}");

  // The write direction is independent of the read direction.
  client.write_async(b"x".to_vec(), |_, _, _| {}).expect("write_async");
  let err = client.write_async(b"y".to_vec(), |_, _, _| {}).unwrap_err();
  assert!(matches!(err, Error::OperationPending), "got {err}");
}

#[test]
fn connect_async_reaches_connected_state() {
  let service = Service::new();
  let server = Server::new(&service, 0);
  server.configure().expect("configure");

  let client = Client::new(&service);
  let outcome = Rc::new(Cell::new(None));
  {
    let outcome = Rc::clone(&outcome);
    client
      .connect_async("127.0.0.1", server.port(), move |client, ok| {
        outcome.set(Some((ok, client.state())));
      })
      .expect("connect_async");
  }
  assert_eq!(client.state(), ClientState::Connecting);

  poll_until(&service, || outcome.get().is_some());
  assert_eq!(outcome.get(), Some((true, ClientState::Connected)));
  assert_eq!(client.ip().as_deref(), Some("127.0.0.1"));

  let peer = server.accept().expect("accept");
  assert_eq!(client.write(b"hi").expect("write"), 2);
  let mut buf = vec![0u8; 4];
  assert_eq!(peer.read(&mut buf).expect("read"), 2);
}

#[test]
fn connect_async_to_dead_port_reports_failure() {
  let service = Service::new();
  // Grab a port that was live a moment ago and is now closed.
  let dead_port = {
    let server = Server::new(&service, 0);
    server.configure().expect("configure");
    let port = server.port();
    server.close();
    port
  };

  let client = Client::new(&service);
  let outcome = Rc::new(Cell::new(None));
  let registered = {
    let outcome = Rc::clone(&outcome);
    client.connect_async("127.0.0.1", dead_port, move |_, ok| {
      outcome.set(Some(ok));
    })
  };

  match registered {
    // Loopback may refuse synchronously, before any handler exists.
    Err(Error::Connect { .. }) => {
      assert_eq!(service.pending_handlers(), 0);
    }
    Ok(()) => {
      poll_until(&service, || outcome.get().is_some());
      assert_eq!(outcome.get(), Some(false));
      assert_ne!(client.state(), ClientState::Connected);
    }
    Err(other) => panic!("unexpected error: {other}"),
  }
}

#[test]
fn accept_async_announces_then_caller_retrieves() {
  let service = Service::new();
  let server = Server::new(&service, 0);
  server.configure().expect("configure");

  let accepted = Rc::new(RefCell::new(None));
  {
    let accepted = Rc::clone(&accepted);
    server
      .accept_async(move |server, ready| {
        assert!(ready);
        // The announcement carries no connection; retrieval is an
        // explicit synchronous accept.
        *accepted.borrow_mut() = Some(server.accept().expect("accept"));
      })
      .expect("accept_async");
  }

  let client = Client::new(&service);
  assert!(client.connect("127.0.0.1", server.port()).expect("connect"));

  poll_until(&service, || accepted.borrow().is_some());
  assert_eq!(service.pending_handlers(), 0);

  client.write(b"ping").expect("write");
  let peer = accepted.borrow_mut().take().unwrap();
  let mut buf = vec![0u8; 8];
  let n = peer.read(&mut buf).expect("read");
  assert_eq!(&buf[..n], b"ping");
}
