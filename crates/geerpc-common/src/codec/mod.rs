//! Pluggable value encoding plus the framed reader/writer pair.
//!
//! Two codec identifiers are registered. `"application/gob"` is the
//! mandatory binary encoding (postcard under the hood) and the default;
//! `"application/json"` is the optional textual one. The identifier strings
//! are protocol constants: they are what travels in the handshake.
//!
//! Bodies cross this layer as raw bytes: the frame layer delimits them,
//! and whoever knows the concrete type ([`CodecType::decode`]) interprets
//! them. That split is what lets a server read and skip a body it cannot
//! type, keeping the stream in sync.

mod frame;

pub use frame::{BoxedRead, BoxedWrite, FrameReader, FrameWriter, MAX_MESSAGE_SIZE};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::Result;

/// A registered codec identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    /// `"application/gob"` - compact binary encoding. Mandatory.
    Gob,
    /// `"application/json"` - textual encoding. Optional.
    Json,
}

impl CodecType {
    /// Looks an identifier up in the registry. Unknown identifiers yield
    /// `None`; callers refuse the connection or fail construction.
    pub fn from_name(name: &str) -> Option<CodecType> {
        match name {
            "application/gob" => Some(CodecType::Gob),
            "application/json" => Some(CodecType::Json),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecType::Gob => "application/gob",
            CodecType::Json => "application/json",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::Gob => Ok(postcard::to_stdvec(value)?),
            CodecType::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::Gob => Ok(postcard::from_bytes(bytes)?),
            CodecType::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
