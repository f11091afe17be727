//! Protocol definitions shared by client and server.
//!
//! - [`header`] - the `(service_method, seq, error)` record sent before
//!   every body, in both directions.
//! - [`option`] - the handshake record and its fixed JSON-line encoding.
//! - [`http`] - constants and helpers for the HTTP `CONNECT` upgrade.
//! - [`error`] - the [`RpcError`](error::RpcError) taxonomy and `Result`
//!   alias used across the workspace.

pub mod error;
pub mod header;
pub mod http;
pub mod option;

pub use error::{Result, RpcError};
pub use header::Header;
pub use option::{Options, DEFAULT_CONNECT_TIMEOUT, MAGIC_NUMBER};
