use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use geerpc_common::codec::{BoxedRead, BoxedWrite};
use geerpc_common::protocol::http::{read_head, CONNECTED_STATUS, DEFAULT_RPC_PATH};
use geerpc_common::{Options, Result, RpcError};

use crate::client::Client;

/// Connects over TCP and performs the handshake.
///
/// The whole sequence (connect plus client construction) is bounded by
/// `options.connect_timeout`; zero means no deadline. On expiry the
/// in-flight future is dropped, which closes the socket, and
/// [`RpcError::ConnectTimeout`] is returned.
pub async fn dial(addr: &str, options: Options) -> Result<Client> {
    let timeout = options.connect_timeout;
    let addr = addr.to_string();
    with_connect_timeout(timeout, async move {
        let stream = TcpStream::connect(&addr).await?;
        debug!(%addr, "connected");
        Client::new(stream, options).await
    })
    .await
}

/// Connects over TCP, upgrades via HTTP `CONNECT`, then proceeds as
/// [`dial`]. Bounded by the same connect timeout.
pub async fn dial_http(addr: &str, options: Options) -> Result<Client> {
    let timeout = options.connect_timeout;
    let addr = addr.to_string();
    with_connect_timeout(timeout, async move {
        let stream = TcpStream::connect(&addr).await?;
        debug!(%addr, "connected, upgrading");
        http_upgrade(stream, options).await
    })
    .await
}

/// Connects over a unix socket and performs the handshake.
#[cfg(unix)]
pub async fn dial_unix(path: &str, options: Options) -> Result<Client> {
    let timeout = options.connect_timeout;
    let path = path.to_string();
    with_connect_timeout(timeout, async move {
        let stream = UnixStream::connect(&path).await?;
        debug!(%path, "connected");
        Client::new(stream, options).await
    })
    .await
}

/// Dials a `protocol@address` string: `http@host:port` upgrades via HTTP
/// `CONNECT`, `tcp@host:port` and `unix@/path` open raw streams.
pub async fn xdial(rpc_addr: &str, options: Options) -> Result<Client> {
    let Some((protocol, addr)) = rpc_addr.split_once('@') else {
        return Err(RpcError::BadAddress(rpc_addr.to_string()));
    };
    match protocol {
        "http" => dial_http(addr, options).await,
        "tcp" => dial(addr, options).await,
        #[cfg(unix)]
        "unix" => dial_unix(addr, options).await,
        _ => Err(RpcError::BadAddress(rpc_addr.to_string())),
    }
}

async fn with_connect_timeout<F>(timeout: Duration, connect: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    if timeout.is_zero() {
        return connect.await;
    }
    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

/// Client half of the HTTP `CONNECT` upgrade: requires the fixed success
/// status before switching to the RPC protocol on the same stream.
async fn http_upgrade<S>(stream: S, options: Options) -> Result<Client>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read, write) = tokio::io::split(stream);
    let mut write: BoxedWrite = Box::new(write);

    let request = format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\n\n");
    write.write_all(request.as_bytes()).await?;
    write.flush().await?;

    let mut reader = BufReader::new(Box::new(read) as BoxedRead);
    let head = read_head(&mut reader).await?;
    let status_line = head.first().map(String::as_str).unwrap_or_default();
    let status = status_line.split_once(' ').map(|(_, s)| s).unwrap_or_default();
    if status != CONNECTED_STATUS {
        return Err(RpcError::Connection(format!(
            "unexpected HTTP response: {status_line}"
        )));
    }
    Client::with_parts(reader, write, options).await
}
