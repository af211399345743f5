mod common;

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;

use common::poll_until;
use pollnet::net::{UdpClient, UdpServer};
use pollnet::{Error, Service};

fn reply_addr(server: &UdpServer) -> SocketAddr {
  // The server binds the wildcard address; peers reach it via loopback.
  SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()))
}

#[test]
fn bind_assigns_a_real_port() {
  let service = Service::new();
  let server = UdpServer::bind(&service, 0).expect("bind");
  assert_ne!(server.local_addr().port(), 0);
}

#[test]
fn blocking_round_trip_carries_the_sender() {
  let service = Service::new();
  let server = UdpServer::bind(&service, 0).expect("bind");
  let client = UdpClient::open(&service).expect("open");

  assert_eq!(client.write(b"ping", reply_addr(&server)).expect("write"), 4);

  let mut buf = vec![0u8; 16];
  let (n, sender) = server.read(&mut buf).expect("read");
  assert_eq!(&buf[..n], b"ping");
  assert!(sender.ip().is_loopback());

  // Reply to the reported sender.
  assert_eq!(server.write(b"pong", sender).expect("write"), 4);
  let (n, from) = client.read(&mut buf).expect("read");
  assert_eq!(&buf[..n], b"pong");
  assert_eq!(from.port(), server.local_addr().port());
}

#[test]
fn async_read_reports_the_sender() {
  let service = Service::new();
  let server = UdpServer::bind(&service, 0).expect("bind");
  let client = UdpClient::open(&service).expect("open");

  let got = Rc::new(RefCell::new(None));
  {
    let got = Rc::clone(&got);
    server
      .read_async(vec![0u8; 32], move |_, count, buf, sender| {
        *got.borrow_mut() = Some((buf[..count].to_vec(), sender));
      })
      .expect("read_async");
  }
  assert_eq!(service.pending_handlers(), 1);

  client.write(b"hello", reply_addr(&server)).expect("write");
  poll_until(&service, || got.borrow().is_some());

  let (payload, sender) = got.borrow_mut().take().unwrap();
  assert_eq!(payload, b"hello");
  let sender = sender.expect("data path reports the sender");
  assert!(sender.ip().is_loopback());
  assert_eq!(service.pending_handlers(), 0);
}

#[test]
fn async_write_completes_with_the_full_count() {
  let service = Service::new();
  let server = UdpServer::bind(&service, 0).expect("bind");
  let client = UdpClient::open(&service).expect("open");

  let sent = Rc::new(Cell::new(None));
  {
    let sent = Rc::clone(&sent);
    client
      .write_async(b"datagram".to_vec(), reply_addr(&server), move |_, count, _| {
        sent.set(Some(count));
      })
      .expect("write_async");
  }

  poll_until(&service, || sent.get().is_some());
  assert_eq!(sent.get(), Some(8));

  let mut buf = vec![0u8; 16];
  let (n, _) = server.read(&mut buf).expect("read");
  assert_eq!(&buf[..n], b"datagram");
}

#[test]
fn duplicate_async_reads_are_rejected() {
  let service = Service::new();
  let server = UdpServer::bind(&service, 0).expect("bind");

  server.read_async(vec![0u8; 8], |_, _, _, _| {}).expect("first read_async");
  let err = server.read_async(vec![0u8; 8], |_, _, _, _| {}).unwrap_err();
  assert!(matches!(err, Error::OperationPending), "got {err}");
}

#[test]
fn close_is_idempotent() {
  let service = Service::new();
  let client = UdpClient::open(&service).expect("open");
  client.close();
  client.close();

  let mut buf = vec![0u8; 4];
  assert!(client.read(&mut buf).is_err());
}
