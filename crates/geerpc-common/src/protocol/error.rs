use std::time::Duration;

use thiserror::Error;

/// Error type shared by every geerpc crate.
///
/// The display strings of the timeout, cancellation and dispatch variants
/// are part of the observable behavior: they travel in response headers and
/// callers match on them.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Codec identifier not registered (client construction, server handshake).
    #[error("rpc: invalid codec type {0}")]
    InvalidCodec(String),

    /// Handshake carried the wrong magic number; the connection is refused.
    #[error("rpc server: invalid magic number {0:#x}")]
    InvalidMagic(i32),

    /// `xdial` address did not match `protocol@addr`, or the protocol is
    /// not one we can open a stream for.
    #[error("rpc client: wrong address format '{0}', expect protocol@addr")]
    BadAddress(String),

    /// Service names must be exported (leading ASCII uppercase).
    #[error("rpc server: {0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("rpc: service already defined: {0}")]
    DuplicateService(String),

    /// `Service.Method` string without a dot.
    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormed(String),

    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    /// A registered method returned an error or panicked; the text becomes
    /// the response header's `error` field.
    #[error("{0}")]
    Handler(String),

    /// Error text carried back in a response header, reconstructed on the
    /// client. Displayed verbatim: it already carries the server's prefix.
    #[error("{0}")]
    Service(String),

    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("rpc server: request handle timeout: expect within {0:?}")]
    HandleTimeout(Duration),

    /// The caller's cancel token fired before the reply arrived.
    #[error("rpc client: call failed: {0}")]
    Cancelled(String),

    /// The client was closed, or its receive loop has already terminated.
    #[error("rpc client: client is shut down")]
    Shutdown,

    #[error("connection error: {0}")]
    Connection(String),

    /// Length prefix above [`MAX_MESSAGE_SIZE`](crate::codec::MAX_MESSAGE_SIZE);
    /// rejected before allocating.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("serialization error: {0}")]
    Encode(#[from] postcard::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RpcError>;
