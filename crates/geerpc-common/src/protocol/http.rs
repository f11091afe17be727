//! Constants and helpers for the HTTP `CONNECT` upgrade.
//!
//! A client may reach an RPC server that is mounted on an HTTP listener by
//! sending `CONNECT /_geerpc_ HTTP/1.0` and waiting for the fixed success
//! status; after that the connection is a plain RPC stream. The status line
//! is a fixed byte sequence, which is why both ends handle the head by hand
//! instead of going through an HTTP library.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::protocol::error::{Result, RpcError};

/// Path the RPC endpoint is mounted on.
pub const DEFAULT_RPC_PATH: &str = "/_geerpc_";

/// Status of a successful upgrade, as it appears after `HTTP/1.0 `.
pub const CONNECTED_STATUS: &str = "200 Connected to Gee RPC";

/// Body sent back for a non-CONNECT method on the RPC path.
pub const MUST_CONNECT_BODY: &str = "405 must CONNECT\n";

const MAX_HEAD_LINES: usize = 64;

/// Reads an HTTP head: all lines up to and including the blank line.
/// Returned lines have their line endings stripped; the blank line is not
/// included.
pub async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(RpcError::Connection(
                "connection closed while reading HTTP head".to_string(),
            ));
        }
        let line = line.trim_end();
        if line.is_empty() {
            return Ok(lines);
        }
        if lines.len() >= MAX_HEAD_LINES {
            return Err(RpcError::Connection("HTTP head too large".to_string()));
        }
        lines.push(line.to_string());
    }
}
