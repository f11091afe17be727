use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecType;
use crate::protocol::error::{Result, RpcError};

/// Every connection opens with this magic number; anything else is refused.
pub const MAGIC_NUMBER: i32 = 0x8DF2CE;

/// Default bound on transport connect + handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake record, sent once by the client immediately after the
/// transport is established and before the first frame.
///
/// The wire form is a single JSON object terminated by `\n`: one fixed,
/// self-describing encoding for every deployment, so the server can read it
/// before it knows which codec the rest of the connection speaks. Durations
/// travel as integer milliseconds; zero means "no limit" for both timeouts.
///
/// # Example
///
/// ```
/// use geerpc_common::{CodecType, Options};
/// use std::time::Duration;
///
/// let opt = Options::default()
///     .with_codec(CodecType::Json)
///     .with_handle_timeout(Duration::from_millis(500));
/// assert_eq!(opt.codec_type, "application/json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub magic: i32,
    /// Codec identifier, e.g. `"application/gob"`. Kept as a string so an
    /// unregistered identifier can be observed and refused rather than
    /// failing to parse.
    pub codec_type: String,
    /// Bound on transport connect + client construction. Zero = no limit.
    #[serde(rename = "connect_timeout_ms", with = "duration_millis")]
    pub connect_timeout: Duration,
    /// Server-side bound on time-to-first-reply per request. Zero = no limit.
    #[serde(rename = "handle_timeout_ms", with = "duration_millis")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            magic: MAGIC_NUMBER,
            codec_type: CodecType::Gob.name().to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn with_codec(mut self, codec: CodecType) -> Self {
        self.codec_type = codec.name().to_string();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Resolves the codec identifier against the registered codecs.
    pub fn codec(&self) -> Result<CodecType> {
        CodecType::from_name(&self.codec_type)
            .ok_or_else(|| RpcError::InvalidCodec(self.codec_type.clone()))
    }

    /// Writes the handshake line and flushes it.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads exactly one handshake line.
    ///
    /// Must be called on the same buffered reader that is afterwards handed
    /// to the frame layer, so bytes the buffer already holds are not lost.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Options> {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(RpcError::Connection(
                "connection closed before handshake".to_string(),
            ));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
