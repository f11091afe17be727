use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use geerpc_common::codec::{BoxedRead, BoxedWrite};
use geerpc_common::{
    CodecType, FrameReader, FrameWriter, Header, Options, Result, RpcError,
};

/// Terminal outcome delivered to a pending call: the encoded reply body, or
/// the error that ended it.
type CallOutcome = Result<Vec<u8>>;

/// Handle to one in-flight request, returned by [`Client::go`].
///
/// The completion signal is a one-shot channel: it accepts exactly one
/// outcome and never blocks the notifier, so the receive loop can complete
/// calls without waiting on their callers.
pub struct Call {
    pub seq: u64,
    pub service_method: String,
    codec: CodecType,
    done: oneshot::Receiver<CallOutcome>,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("seq", &self.seq)
            .field("service_method", &self.service_method)
            .finish()
    }
}

impl Call {
    /// Waits for the reply and decodes it.
    pub async fn done<Reply: DeserializeOwned>(self) -> Result<Reply> {
        match self.done.await {
            Ok(Ok(body)) => self.codec.decode(&body),
            Ok(Err(err)) => Err(err),
            // Sender dropped without completing; only happens when the
            // client itself is gone.
            Err(_) => Err(RpcError::Shutdown),
        }
    }
}

struct ClientState {
    /// Next sequence number to hand out; starts at 1 and only moves up.
    next_seq: u64,
    /// In-flight calls by sequence number. An entry exists iff no terminal
    /// outcome has been delivered yet.
    pending: HashMap<u64, oneshot::Sender<CallOutcome>>,
    /// User called [`Client::close`].
    closing: bool,
    /// Receive loop terminated and drained everything.
    shutdown: bool,
}

struct Inner {
    state: StdMutex<ClientState>,
}

impl Inner {
    /// Allocates a sequence number and parks the call in the pending map.
    fn register_call(&self) -> Result<(u64, oneshot::Receiver<CallOutcome>)> {
        let mut state = self.state.lock().unwrap();
        if state.closing || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let (done_tx, done) = oneshot::channel();
        state.pending.insert(seq, done_tx);
        Ok((seq, done))
    }

    fn remove_call(&self, seq: u64) -> Option<oneshot::Sender<CallOutcome>> {
        self.state.lock().unwrap().pending.remove(&seq)
    }

    /// Marks the client dead and completes every remaining pending call
    /// with the terminating error.
    fn terminate(&self, reason: String) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        for (_, done_tx) in state.pending.drain() {
            let _ = done_tx.send(Err(RpcError::Connection(reason.clone())));
        }
    }
}

/// Guarded by the send lock: the frame writer plus the header buffer it
/// reuses for every outgoing request.
struct SendState {
    writer: FrameWriter,
    header: Header,
}

/// A connection to an RPC server, shareable across tasks (`&self` methods;
/// wrap in `Arc` to call from several tasks).
///
/// Two locks, never nested the same way twice: the *send* lock serializes
/// writes on the connection, the *state* lock guards the pending map and
/// sequence counter and is never held across `await`.
pub struct Client {
    send: Mutex<SendState>,
    inner: Arc<Inner>,
    codec: CodecType,
    recv_handle: JoinHandle<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("codec", &self.codec).finish()
    }
}

impl Client {
    /// Performs the client half of the handshake on an established stream
    /// and spawns the receive loop.
    ///
    /// Fails with [`RpcError::InvalidCodec`] before writing anything if the
    /// codec identifier in `options` is not registered.
    pub async fn new<S>(stream: S, options: Options) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let reader = BufReader::new(Box::new(read) as BoxedRead);
        Self::with_parts(reader, Box::new(write), options).await
    }

    /// Constructor over already-split halves; the HTTP upgrade path lands
    /// here with a read half that was buffered while parsing the response
    /// head.
    pub(crate) async fn with_parts(
        reader: BufReader<BoxedRead>,
        mut write: BoxedWrite,
        options: Options,
    ) -> Result<Client> {
        let codec = options.codec()?;
        options.write_to(&mut write).await?;

        let inner = Arc::new(Inner {
            state: StdMutex::new(ClientState {
                next_seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });
        let frame_reader = FrameReader::from_buffered(codec, reader);
        let recv_handle = tokio::spawn(receive(Arc::clone(&inner), frame_reader));

        Ok(Client {
            send: Mutex::new(SendState {
                writer: FrameWriter::new(codec, write),
                header: Header::default(),
            }),
            inner,
            codec,
            recv_handle,
        })
    }

    /// Fires a call and returns its [`Call`] handle immediately; await
    /// [`Call::done`] for the reply.
    ///
    /// A send failure is delivered through the handle too, so the caller
    /// has a single place to look for the outcome.
    pub async fn go<Arg: Serialize>(&self, service_method: &str, arg: &Arg) -> Result<Call> {
        let body = self.codec.encode(arg)?;
        let (seq, done) = self.send(service_method, &body).await?;
        Ok(Call {
            seq,
            service_method: service_method.to_string(),
            codec: self.codec,
            done,
        })
    }

    /// Calls a remote method and waits for its reply.
    pub async fn call<Arg, Reply>(&self, service_method: &str, arg: &Arg) -> Result<Reply>
    where
        Arg: Serialize,
        Reply: DeserializeOwned,
    {
        self.go(service_method, arg).await?.done().await
    }

    /// Calls a remote method, racing the reply against `cancel`.
    ///
    /// If `cancel` completes first the pending entry is removed on the spot
    /// and the call fails with [`RpcError::Cancelled`]; whenever the server's
    /// reply eventually arrives it finds no pending call and is discarded.
    /// A deadline is just `cancel = tokio::time::sleep(d)`.
    pub async fn call_with_cancel<Arg, Reply, C>(
        &self,
        cancel: C,
        service_method: &str,
        arg: &Arg,
    ) -> Result<Reply>
    where
        Arg: Serialize,
        Reply: DeserializeOwned,
        C: Future<Output = ()>,
    {
        let mut call = self.go(service_method, arg).await?;
        let seq = call.seq;
        tokio::select! {
            _ = cancel => {
                self.inner.remove_call(seq);
                debug!(seq, method = service_method, "call cancelled");
                Err(RpcError::Cancelled("cancelled by caller".to_string()))
            }
            outcome = &mut call.done => match outcome {
                Ok(Ok(body)) => self.codec.decode(&body),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(RpcError::Shutdown),
            }
        }
    }

    /// Registers the call and writes its frame, holding the send lock for
    /// the whole operation so concurrent callers cannot interleave frames
    /// and the reusable header is never shared.
    async fn send(
        &self,
        service_method: &str,
        body: &[u8],
    ) -> Result<(u64, oneshot::Receiver<CallOutcome>)> {
        let mut send = self.send.lock().await;

        let (seq, done) = self.inner.register_call()?;

        send.header.service_method.clear();
        send.header.service_method.push_str(service_method);
        send.header.seq = seq;
        send.header.error.clear();

        let SendState { writer, header } = &mut *send;
        if let Err(err) = writer.write(header, body).await {
            // If the receive loop raced us and already completed the call,
            // there is nothing left to do.
            if let Some(done_tx) = self.inner.remove_call(seq) {
                let _ = done_tx.send(Err(err));
            }
        }
        Ok((seq, done))
    }

    /// Number of calls still waiting on a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    /// Closes the connection. The receive loop observes the closed stream,
    /// terminates, and fails whatever was still pending. Closing twice is
    /// an error.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        self.send.lock().await.writer.close().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.recv_handle.abort();
    }
}

/// The client's single background reader: completes pending calls by
/// sequence number until the stream dies, then drains the pending map.
async fn receive(inner: Arc<Inner>, mut reader: FrameReader) {
    let reason = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(err) => break err.to_string(),
        };
        let done_tx = inner.remove_call(header.seq);
        match reader.read_body().await {
            Err(err) => {
                // Transport failure mid-frame: finish this call, then drain.
                let reason = err.to_string();
                if let Some(done_tx) = done_tx {
                    let _ = done_tx.send(Err(err));
                }
                break reason;
            }
            Ok(body) => match done_tx {
                // Seq unknown: cancelled, timed out server-side, or already
                // failed on send. The body was consumed to keep the stream
                // in sync; the bytes are dropped.
                None => debug!(seq = header.seq, "no pending call for reply, discarding"),
                Some(done_tx) if header.has_error() => {
                    let _ = done_tx.send(Err(RpcError::Service(header.error)));
                }
                Some(done_tx) => {
                    let _ = done_tx.send(Ok(body));
                }
            },
        }
    };
    debug!(reason = %reason, "receive loop terminated");
    inner.terminate(reason);
}
