//! Server side of the geerpc RPC framework.
//!
//! A [`Server`] owns a registry of [`Service`]s. Each service is a named
//! bundle of typed methods; registration wraps every method in a
//! type-erased handler so the dispatch path does not need to know argument
//! or reply types. Connections are accepted on a plain TCP listener
//! ([`Server::accept`]) or behind the HTTP `CONNECT` upgrade
//! ([`Server::serve_http`]).
//!
//! Per connection the server reads the handshake, then loops decoding
//! `(header, body)` frames and dispatching each request on its own task. A
//! per-connection send lock serializes responses, which may leave in a
//! different order than the requests arrived; clients match them up by
//! sequence number.
//!
//! # Example
//!
//! ```no_run
//! use geerpc_server::{Server, Service};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! # #[tokio::main]
//! # async fn main() -> geerpc_common::Result<()> {
//! let server = Server::default();
//! server.register(
//!     Service::new("Foo")?.method("Sum", |args: Args, reply: &mut i32| {
//!         *reply = args.num1 + args.num2;
//!         Ok(())
//!     }),
//! )?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9999").await?;
//! server.accept(listener).await;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod service;

pub use server::Server;
pub use service::{MethodType, Service};
