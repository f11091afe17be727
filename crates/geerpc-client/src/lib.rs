//! Client side of the geerpc RPC framework.
//!
//! A [`Client`] multiplexes any number of concurrent calls over one
//! connection. Each call gets a sequence number; a single background task
//! reads responses and completes the matching pending call, so replies may
//! arrive in any order. Calls can be fired asynchronously ([`Client::go`]),
//! awaited synchronously ([`Client::call`]) or raced against a cancel
//! future ([`Client::call_with_cancel`]).
//!
//! Connections are opened with [`dial`] (TCP), [`dial_unix`] (unix
//! sockets) or [`xdial`], which takes a `protocol@address` string and also
//! understands the HTTP `CONNECT` upgrade (`http@host:port`).
//!
//! # Example
//!
//! ```no_run
//! use geerpc_client::xdial;
//! use geerpc_common::Options;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! # #[tokio::main]
//! # async fn main() -> geerpc_common::Result<()> {
//! let client = xdial("tcp@127.0.0.1:9999", Options::default()).await?;
//! let reply: i32 = client.call("Foo.Sum", &Args { num1: 3, num2: 4 }).await?;
//! assert_eq!(reply, 7);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dial;

pub use client::{Call, Client};
pub use dial::{dial, dial_http, xdial};
#[cfg(unix)]
pub use dial::dial_unix;
