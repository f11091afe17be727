use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::error;

use super::CodecType;
use crate::protocol::error::{Result, RpcError};
use crate::protocol::header::Header;

/// Type-erased halves of a split connection, so the same reader/writer pair
/// serves TCP, unix sockets and in-memory test streams.
pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on a single length-delimited message (100 MB). Checked
/// before allocating the receive buffer.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Reading side of a framed connection.
///
/// Each message on the wire is `[u32 big-endian length][payload]`; a logical
/// frame is a header message followed immediately by a body message. Exactly
/// one task per connection owns the reader.
pub struct FrameReader {
    codec_type: CodecType,
    reader: BufReader<BoxedRead>,
}

impl FrameReader {
    pub fn new(codec_type: CodecType, read: BoxedRead) -> Self {
        Self::from_buffered(codec_type, BufReader::new(read))
    }

    /// Wraps a read half that was already buffered for the handshake,
    /// keeping whatever the buffer holds.
    pub fn from_buffered(codec_type: CodecType, reader: BufReader<BoxedRead>) -> Self {
        FrameReader { codec_type, reader }
    }

    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// Reads one message and decodes it as a [`Header`].
    pub async fn read_header(&mut self) -> Result<Header> {
        let bytes = self.read_message().await?;
        self.codec_type.decode(&bytes)
    }

    /// Reads one body message as raw payload bytes.
    ///
    /// Dropping the returned bytes is the discard path: the frame has been
    /// consumed either way, so the stream stays in sync.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        self.read_message().await
    }

    async fn read_message(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RpcError::FrameTooLarge(len));
        }
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Writing side of a framed connection.
///
/// Not internally synchronized: all writes on a connection go through one
/// writer behind an external send mutex, which is also what keeps the
/// header and body messages of a frame contiguous on the wire.
pub struct FrameWriter {
    codec_type: CodecType,
    writer: BufWriter<BoxedWrite>,
}

impl FrameWriter {
    pub fn new(codec_type: CodecType, write: BoxedWrite) -> Self {
        FrameWriter {
            codec_type,
            writer: BufWriter::new(write),
        }
    }

    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// Writes one frame and flushes it.
    ///
    /// On any write-path failure the connection is shut down and the first
    /// error propagated; errors from the shutdown itself are suppressed. The
    /// writer must not be used again after an error.
    pub async fn write(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        match self.write_frame(header, body).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(error = %err, "codec write failed, closing connection");
                let _ = self.writer.shutdown().await;
                Err(err)
            }
        }
    }

    async fn write_frame(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header_bytes = self.codec_type.encode(header)?;
        self.write_message(&header_bytes).await?;
        self.write_message(body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(RpcError::FrameTooLarge(payload.len()));
        }
        self.writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        self.writer.write_all(payload).await?;
        Ok(())
    }

    /// Flushes anything buffered and shuts the write half down.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
