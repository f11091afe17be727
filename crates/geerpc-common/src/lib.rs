//! Shared protocol and codec layer for the geerpc RPC framework.
//!
//! This crate contains everything both sides of a connection have to agree
//! on:
//!
//! - **Protocol layer**: the per-frame [`Header`], the [`Options`] handshake
//!   record exchanged before the codec takes over, the HTTP `CONNECT`
//!   upgrade constants, and the [`RpcError`] taxonomy.
//! - **Codec layer**: the registered codec identifiers ([`CodecType`]) and
//!   the framed reader/writer pair ([`FrameReader`], [`FrameWriter`]) that
//!   move `(header, body)` pairs over a byte stream.
//!
//! # Wire format
//!
//! Each direction of a connection is two concatenated streams. First one
//! [`Options`] record as a single JSON line; the handshake encoding is
//! fixed so a server can parse it before it knows which codec to speak.
//! After that, repeated frames in the negotiated codec, each frame being an
//! encoded [`Header`] followed immediately by an encoded body, both as
//! length-delimited messages.
//!
//! # Example
//!
//! ```
//! use geerpc_common::{CodecType, Header, Options};
//!
//! let opt = Options::default().with_connect_timeout(std::time::Duration::from_secs(5));
//! let codec = CodecType::from_name(&opt.codec_type).unwrap();
//!
//! let header = Header::request("Foo.Sum", 1);
//! let bytes = codec.encode(&header).unwrap();
//! let back: Header = codec.decode(&bytes).unwrap();
//! assert_eq!(header, back);
//! ```

pub mod codec;
pub mod protocol;

pub use codec::{CodecType, FrameReader, FrameWriter};
pub use protocol::error::{Result, RpcError};
pub use protocol::header::Header;
pub use protocol::option::{Options, DEFAULT_CONNECT_TIMEOUT, MAGIC_NUMBER};
