use serde::{Deserialize, Serialize};

/// Frame header, sent before every body in both directions.
///
/// The field order is fixed: the binary codec serializes fields
/// positionally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Dot-joined `"Service.Method"` name.
    pub service_method: String,
    /// Sequence number chosen by the client; echoed back in the response.
    pub seq: u64,
    /// Error text, empty when none. Responses with a non-empty error carry
    /// an empty body.
    pub error: String,
}

impl Header {
    /// Header for an outgoing request (no error).
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Header {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecType;

    #[test]
    fn request_header_has_no_error() {
        let h = Header::request("Foo.Sum", 7);
        assert_eq!(h.service_method, "Foo.Sum");
        assert_eq!(h.seq, 7);
        assert!(!h.has_error());
    }

    #[test]
    fn round_trips_through_both_codecs() {
        let h = Header {
            service_method: "Foo.Sum".into(),
            seq: 42,
            error: "rpc server: can't find method Mul".into(),
        };
        for codec in [CodecType::Gob, CodecType::Json] {
            let bytes = codec.encode(&h).unwrap();
            let back: Header = codec.decode(&bytes).unwrap();
            assert_eq!(h, back);
        }
    }
}
