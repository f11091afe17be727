use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use geerpc_common::codec::{BoxedRead, BoxedWrite};
use geerpc_common::protocol::http::{
    read_head, CONNECTED_STATUS, DEFAULT_RPC_PATH, MUST_CONNECT_BODY,
};
use geerpc_common::{
    CodecType, FrameReader, FrameWriter, Header, Options, Result, RpcError, MAGIC_NUMBER,
};

use crate::service::{MethodType, Service};

/// The request dispatcher: a concurrent map of registered services plus the
/// per-connection serve loops.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct Server {
    services: Arc<RwLock<HashMap<String, Arc<Service>>>>,
}

impl Server {
    pub fn new() -> Server {
        Server::default()
    }

    /// Registers a service. The registry is insert-if-absent: registering a
    /// second service under the same name fails and leaves the first one in
    /// place.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        match services.entry(service.name().to_string()) {
            Entry::Occupied(e) => Err(RpcError::DuplicateService(e.key().clone())),
            Entry::Vacant(e) => {
                info!(service = %e.key(), "registered service");
                e.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Resolves a `"Service.Method"` name, splitting on the last dot.
    pub(crate) fn find(&self, service_method: &str) -> Result<Arc<MethodType>> {
        let Some((service_name, method_name)) = service_method.rsplit_once('.') else {
            return Err(RpcError::IllFormed(service_method.to_string()));
        };
        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        service
            .get_method(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))
    }

    /// Accept loop for raw RPC connections. Each accepted connection is
    /// served on its own task; accept errors are logged and the loop keeps
    /// going.
    pub async fn accept(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let server = self.clone();
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(err) => {
                    error!(error = %err, "accept failed");
                }
            }
        }
    }

    /// Serves a single connection: handshake, codec selection, request loop.
    /// Returns (and thereby closes the connection) when the stream ends or
    /// desynchronizes.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let reader = BufReader::new(Box::new(read) as BoxedRead);
        self.serve_stream(reader, Box::new(write)).await;
    }

    async fn serve_stream(&self, mut reader: BufReader<BoxedRead>, write: BoxedWrite) {
        let options = match Options::read_from(&mut reader).await {
            Ok(options) => options,
            Err(err) => {
                warn!(error = %err, "handshake decode failed");
                return;
            }
        };
        if options.magic != MAGIC_NUMBER {
            warn!(error = %RpcError::InvalidMagic(options.magic), "refusing connection");
            return;
        }
        let codec = match options.codec() {
            Ok(codec) => codec,
            Err(err) => {
                warn!(error = %err, "refusing connection");
                return;
            }
        };
        debug!(codec = %codec, handle_timeout = ?options.handle_timeout, "handshake complete");

        let reader = FrameReader::from_buffered(codec, reader);
        let writer = FrameWriter::new(codec, write);
        self.serve_codec(reader, writer, options.handle_timeout).await;
    }

    /// Request loop over an established codec. Owns the connection's send
    /// lock and waits for every spawned handler before closing.
    async fn serve_codec(
        &self,
        mut reader: FrameReader,
        writer: FrameWriter,
        handle_timeout: Duration,
    ) {
        let codec = reader.codec_type();
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(err) => {
                    match &err {
                        RpcError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
                            debug!("connection closed by peer")
                        }
                        _ => warn!(error = %err, "failed to read request header"),
                    }
                    break;
                }
            };
            // The body frame is consumed before the method is resolved, so a
            // bad name never desynchronizes the stream.
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(error = %err, seq = header.seq, "failed to read request body");
                    break;
                }
            };

            let method = match self.find(&header.service_method) {
                Ok(method) => method,
                Err(err) => {
                    debug!(error = %err, seq = header.seq, "cannot dispatch request");
                    let mut response = header;
                    response.error = err.to_string();
                    send_response(&writer, &response, &[]).await;
                    continue;
                }
            };

            handlers.spawn(handle_request(
                Arc::clone(&writer),
                codec,
                header,
                method,
                body,
                handle_timeout,
            ));
        }

        // Let in-flight handlers finish before tearing the connection down.
        while handlers.join_next().await.is_some() {}
        let close_result = writer.lock().await.close().await;
        if let Err(err) = close_result {
            debug!(error = %err, "error closing connection");
        }
    }

    /// HTTP accept loop: serves the `CONNECT` upgrade on
    /// [`DEFAULT_RPC_PATH`] and hands upgraded connections to the RPC loop.
    pub async fn serve_http(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted http connection");
                    let server = self.clone();
                    tokio::spawn(async move { server.serve_http_conn(stream).await });
                }
                Err(err) => {
                    error!(error = %err, "accept failed");
                }
            }
        }
    }

    /// Handles one HTTP connection. The head is parsed by hand: a
    /// successful upgrade answers with a fixed, non-standard status line
    /// and then speaks the RPC protocol on the same stream.
    pub async fn serve_http_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let mut reader = BufReader::new(Box::new(read) as BoxedRead);
        let mut write: BoxedWrite = Box::new(write);

        let head = match read_head(&mut reader).await {
            Ok(head) => head,
            Err(err) => {
                debug!(error = %err, "failed to read HTTP head");
                return;
            }
        };
        let request_line = head.first().map(String::as_str).unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        if path != DEFAULT_RPC_PATH {
            let _ = write.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n").await;
            let _ = write.shutdown().await;
            return;
        }
        if method != "CONNECT" {
            let response = format!(
                "HTTP/1.0 405 Method Not Allowed\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{MUST_CONNECT_BODY}"
            );
            let _ = write.write_all(response.as_bytes()).await;
            let _ = write.shutdown().await;
            return;
        }

        let status = format!("HTTP/1.0 {CONNECTED_STATUS}\n\n");
        if let Err(err) = write.write_all(status.as_bytes()).await {
            debug!(error = %err, "failed to answer CONNECT");
            return;
        }
        if let Err(err) = write.flush().await {
            debug!(error = %err, "failed to answer CONNECT");
            return;
        }

        self.serve_stream(reader, write).await;
    }
}

/// Runs one request: the invocation happens on a child task signalling
/// `called` and `sent`, while this task enforces the handler timeout.
///
/// On timeout a response with the timeout error is published immediately;
/// the child keeps running and its late real response is discarded by the
/// client's unknown-seq branch. The send lock keeps the two writes from
/// interleaving.
async fn handle_request(
    writer: Arc<Mutex<FrameWriter>>,
    codec: CodecType,
    header: Header,
    method: Arc<MethodType>,
    body: Vec<u8>,
    handle_timeout: Duration,
) {
    let (called_tx, called) = oneshot::channel::<()>();
    let (sent_tx, sent) = oneshot::channel::<()>();

    let child_writer = Arc::clone(&writer);
    let mut response = header.clone();
    tokio::spawn(async move {
        let result = method.call(codec, body).await;
        let _ = called_tx.send(());
        match result {
            Ok(reply) => send_response(&child_writer, &response, &reply).await,
            Err(err) => {
                response.error = err.to_string();
                send_response(&child_writer, &response, &[]).await;
            }
        }
        let _ = sent_tx.send(());
    });

    if handle_timeout.is_zero() {
        let _ = called.await;
        let _ = sent.await;
        return;
    }

    tokio::select! {
        _ = tokio::time::sleep(handle_timeout) => {
            warn!(seq = header.seq, timeout = ?handle_timeout, "request handle timeout");
            let mut response = header;
            response.error = RpcError::HandleTimeout(handle_timeout).to_string();
            send_response(&writer, &response, &[]).await;
        }
        _ = called => {
            let _ = sent.await;
        }
    }
}

async fn send_response(writer: &Mutex<FrameWriter>, header: &Header, body: &[u8]) {
    let mut writer = writer.lock().await;
    if let Err(err) = writer.write(header, body).await {
        error!(error = %err, seq = header.seq, "failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geerpc_common::CodecType;
    use serde::{Deserialize, Serialize};
    use tokio::io::{duplex, split};

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i32,
        num2: i32,
    }

    fn sum_server() -> Server {
        let server = Server::new();
        server
            .register(Service::new("Foo").unwrap().method(
                "Sum",
                |args: Args, reply: &mut i32| {
                    *reply = args.num1 + args.num2;
                    Ok(())
                },
            ))
            .unwrap();
        server
    }

    /// Drives the client side of the handshake over an in-memory stream and
    /// returns framed halves speaking to a running `serve_conn`.
    async fn connect(server: &Server, options: Options) -> (FrameReader, FrameWriter) {
        let (client_end, server_end) = duplex(64 * 1024);
        let srv = server.clone();
        tokio::spawn(async move { srv.serve_conn(server_end).await });

        let (read, write) = split(client_end);
        let mut write: BoxedWrite = Box::new(write);
        options.write_to(&mut write).await.unwrap();
        let codec = options.codec().unwrap();
        (
            FrameReader::new(codec, Box::new(read)),
            FrameWriter::new(codec, write),
        )
    }

    #[test]
    fn register_rejects_duplicates() {
        let server = sum_server();
        let err = server
            .register(Service::new("Foo").unwrap())
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateService(n) if n == "Foo"));
    }

    #[test]
    fn find_resolves_and_reports() {
        let server = sum_server();
        assert!(server.find("Foo.Sum").is_ok());

        let err = server.find("FooSum").unwrap_err();
        assert!(err.to_string().contains("ill-formed"));

        let err = server.find("Bar.Sum").unwrap_err();
        assert!(err.to_string().contains("can't find service Bar"));

        let err = server.find("Foo.Mul").unwrap_err();
        assert!(err.to_string().contains("can't find method Mul"));
    }

    #[test]
    fn find_splits_on_last_dot() {
        let server = Server::new();
        server
            .register(Service::new("Outer.Inner".to_string()).unwrap().method(
                "Get",
                |_: u64, reply: &mut u64| {
                    *reply = 1;
                    Ok(())
                },
            ))
            .unwrap();
        assert!(server.find("Outer.Inner.Get").is_ok());
    }

    #[tokio::test]
    async fn request_gets_response_with_same_seq() {
        let server = sum_server();
        let (mut reader, mut writer) = connect(&server, Options::default()).await;

        let codec = writer.codec_type();
        let body = codec.encode(&Args { num1: 3, num2: 4 }).unwrap();
        writer.write(&Header::request("Foo.Sum", 5), &body).await.unwrap();

        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 5);
        assert!(!header.has_error());
        let reply: i32 = codec.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(reply, 7);
    }

    #[tokio::test]
    async fn unknown_method_keeps_connection_usable() {
        let server = sum_server();
        let (mut reader, mut writer) = connect(&server, Options::default()).await;
        let codec = writer.codec_type();

        let body = codec.encode(&Args { num1: 1, num2: 2 }).unwrap();
        writer.write(&Header::request("Foo.Mul", 1), &body).await.unwrap();

        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 1);
        assert!(header.error.contains("can't find method Mul"));
        assert!(reader.read_body().await.unwrap().is_empty());

        // Same connection, next request still works.
        let body = codec.encode(&Args { num1: 1, num2: 2 }).unwrap();
        writer.write(&Header::request("Foo.Sum", 2), &body).await.unwrap();
        let header = reader.read_header().await.unwrap();
        assert_eq!(header.seq, 2);
        assert!(!header.has_error());
        let reply: i32 = codec.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(reply, 3);
    }

    #[tokio::test]
    async fn bad_magic_closes_without_reply() {
        let server = sum_server();
        let (client_end, server_end) = duplex(1024);
        let srv = server.clone();
        tokio::spawn(async move { srv.serve_conn(server_end).await });

        let (read, write) = split(client_end);
        let mut write: BoxedWrite = Box::new(write);
        let options = Options {
            magic: 0x123,
            ..Options::default()
        };
        options.write_to(&mut write).await.unwrap();

        let mut reader = FrameReader::new(CodecType::Gob, Box::new(read));
        assert!(reader.read_header().await.is_err());
    }

    #[tokio::test]
    async fn unknown_codec_closes_without_reply() {
        let server = sum_server();
        let (client_end, server_end) = duplex(1024);
        let srv = server.clone();
        tokio::spawn(async move { srv.serve_conn(server_end).await });

        let (read, write) = split(client_end);
        let mut write: BoxedWrite = Box::new(write);
        let options = Options {
            codec_type: "application/xml".to_string(),
            ..Options::default()
        };
        options.write_to(&mut write).await.unwrap();

        let mut reader = FrameReader::new(CodecType::Gob, Box::new(read));
        assert!(reader.read_header().await.is_err());
    }

    #[tokio::test]
    async fn http_upgrade_rejects_non_connect() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let server = sum_server();
        let (mut client_end, server_end) = duplex(1024);
        let srv = server.clone();
        tokio::spawn(async move { srv.serve_http_conn(server_end).await });

        client_end
            .write_all(format!("GET {DEFAULT_RPC_PATH} HTTP/1.0\n\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        client_end.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 405"));
        assert!(response.ends_with(MUST_CONNECT_BODY));
    }
}
