//! Socket façades.
//!
//! Each façade wraps exactly one OS socket descriptor and schedules its
//! asynchronous operations on the [`Service`](crate::Service) it was
//! created with.

mod client;
mod server;
mod sock;
mod udp;

pub use client::{Client, ClientState};
pub use server::Server;
pub use udp::{UdpClient, UdpServer};
