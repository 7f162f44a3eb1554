// Path: crates/networking/src/codec.rs

//! Framing of peer messages.
//!
//! A JSON message is sent as-is and always starts with `{`. A compact frame is
//!
//! ```text
//! MAGIC | flags | u32 BE body length | body | raw segment
//! ```
//!
//! where `body` is the SCALE [`WireMessage`], zstd-compressed when
//! `FLAG_ZSTD` is set, and the raw segment carries AS data when `FLAG_RAW`
//! is set.

use crate::wire::{WireAsDataResponse, WireConsentRequest, WireMessage};
use ndid_types::app::PeerMessage;
use ndid_types::config::WireConfig;
use parity_scale_codec::{DecodeAll, Encode};
use std::io::Read;
use thiserror::Error;

const MAGIC: u8 = 0xb7;
const FLAG_ZSTD: u8 = 0b01;
const FLAG_RAW: u8 = 0b10;
const HEADER_LEN: usize = 6;

/// Errors raised while framing or parsing a peer message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(String),
    #[error("scale: {0}")]
    Scale(String),
    #[error("compression: {0}")]
    Compression(String),
    #[error("frame truncated")]
    Truncated,
    #[error("unknown frame marker {0:#04x}")]
    UnknownFormat(u8),
    #[error("raw segment: {0}")]
    RawSegment(String),
}

impl ndid_types::error::ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Json(_) => "CODEC_JSON",
            Self::Scale(_) => "CODEC_SCALE",
            Self::Compression(_) => "CODEC_COMPRESSION",
            Self::Truncated => "CODEC_TRUNCATED",
            Self::UnknownFormat(_) => "CODEC_UNKNOWN_FORMAT",
            Self::RawSegment(_) => "CODEC_RAW_SEGMENT",
        }
    }
}

/// Encodes and decodes [`PeerMessage`]s.
#[derive(Debug, Clone)]
pub struct PeerCodec {
    cfg: WireConfig,
}

impl PeerCodec {
    pub fn new(cfg: WireConfig) -> Self {
        Self { cfg }
    }

    /// Encodes a message, choosing the compact frame where it applies.
    pub fn encode(&self, message: &PeerMessage) -> Result<Vec<u8>, CodecError> {
        match message {
            PeerMessage::ConsentRequest(m) => {
                self.frame(WireMessage::ConsentRequest(WireConsentRequest::from(m)), None)
            }
            PeerMessage::AsDataResponse(m) => {
                let split = m.data.len() > self.cfg.raw_segment_threshold_bytes;
                let wire = WireAsDataResponse::from_message(m, split);
                self.frame(
                    WireMessage::AsDataResponse(wire),
                    split.then(|| m.data.as_bytes()),
                )
            }
            other => serde_json::to_vec(other).map_err(|e| CodecError::Json(e.to_string())),
        }
    }

    fn frame(&self, body: WireMessage, raw: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
        let mut body = body.encode();
        let mut flags = 0u8;
        if body.len() > self.cfg.compression_threshold_bytes {
            body = zstd::encode_all(body.as_slice(), self.cfg.compression_level)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            flags |= FLAG_ZSTD;
        }
        if raw.is_some() {
            flags |= FLAG_RAW;
        }
        let body_len = u32::try_from(body.len()).map_err(|_| CodecError::Scale("body too large".into()))?;
        let raw = raw.unwrap_or_default();
        let mut out = Vec::with_capacity(HEADER_LEN + body.len() + raw.len());
        out.push(MAGIC);
        out.push(flags);
        out.extend_from_slice(&body_len.to_be_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(raw);
        Ok(out)
    }

    /// Decodes either encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<PeerMessage, CodecError> {
        match bytes.first() {
            Some(b'{') => serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string())),
            Some(&MAGIC) => self.unframe(bytes),
            Some(other) => Err(CodecError::UnknownFormat(*other)),
            None => Err(CodecError::Truncated),
        }
    }

    /// Decompresses `body`, refusing output past the configured cap.
    fn inflate(&self, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        let cap = self.cfg.max_decompressed_bytes;
        let limit = u64::try_from(cap).unwrap_or(u64::MAX).saturating_add(1);
        let decoder =
            zstd::stream::read::Decoder::new(body).map_err(|e| CodecError::Compression(e.to_string()))?;
        let mut out = Vec::new();
        decoder
            .take(limit)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        if out.len() > cap {
            return Err(CodecError::Compression(format!("body inflates past {cap} bytes")));
        }
        Ok(out)
    }

    fn unframe(&self, bytes: &[u8]) -> Result<PeerMessage, CodecError> {
        let header = bytes.get(..HEADER_LEN).ok_or(CodecError::Truncated)?;
        let (flags, len) = match header {
            [_, flags, a, b, c, d] => (*flags, u32::from_be_bytes([*a, *b, *c, *d]) as usize),
            _ => return Err(CodecError::Truncated),
        };
        let end = HEADER_LEN.checked_add(len).ok_or(CodecError::Truncated)?;
        let body = bytes.get(HEADER_LEN..end).ok_or(CodecError::Truncated)?;
        let raw = bytes.get(end..).unwrap_or_default();
        if flags & FLAG_RAW == 0 && !raw.is_empty() {
            return Err(CodecError::RawSegment(format!(
                "{} trailing bytes without a raw segment",
                raw.len()
            )));
        }

        let body = if flags & FLAG_ZSTD != 0 {
            self.inflate(body)?
        } else {
            body.to_vec()
        };
        let wire = WireMessage::decode_all(&mut body.as_slice())
            .map_err(|e| CodecError::Scale(e.to_string()))?;

        match wire {
            WireMessage::ConsentRequest(m) => {
                if flags & FLAG_RAW != 0 {
                    return Err(CodecError::RawSegment("consent request carries no raw data".into()));
                }
                Ok(PeerMessage::ConsentRequest(m.into()))
            }
            WireMessage::AsDataResponse(mut m) => {
                let data = match (m.data.take(), flags & FLAG_RAW != 0) {
                    (Some(data), false) => data,
                    (None, true) => String::from_utf8(raw.to_vec())
                        .map_err(|e| CodecError::RawSegment(e.to_string()))?,
                    (Some(_), true) => {
                        return Err(CodecError::RawSegment("data present in body and segment".into()))
                    }
                    (None, false) => return Err(CodecError::RawSegment("data missing".into())),
                };
                Ok(PeerMessage::AsDataResponse(m.into_message(data)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndid_types::app::{
        AsDataResponseMessage, ChallengeResponseMessage, ConsentRequestMessage,
        LedgerServiceRequest, Mode, NodeId, RequestId,
    };

    fn codec(compress_above: usize, split_above: usize) -> PeerCodec {
        PeerCodec::new(WireConfig {
            compression_threshold_bytes: compress_above,
            raw_segment_threshold_bytes: split_above,
            compression_level: 3,
            max_decompressed_bytes: 1024 * 1024,
        })
    }

    fn consent_request(message: &str) -> PeerMessage {
        PeerMessage::ConsentRequest(ConsentRequestMessage {
            request_id: RequestId::from("r1"),
            mode: Mode::Three,
            namespace: "citizen_id".into(),
            identifier: "1234567890123".into(),
            request_message: message.into(),
            request_message_salt: "salt".into(),
            min_idp: 1,
            min_ial: 2.3,
            min_aal: 1.1,
            request_timeout: 86_400,
            data_request_list: vec![LedgerServiceRequest {
                service_id: "bank_statement".into(),
                as_id_list: vec![NodeId::from("as1")],
                min_as: 1,
                request_params_hash: "ab".into(),
            }],
            rp_id: NodeId::from("rp1"),
            creation_time: 1_700_000_000_000,
            height: 100,
        })
    }

    fn data_response(data: &str) -> PeerMessage {
        PeerMessage::AsDataResponse(AsDataResponseMessage {
            request_id: RequestId::from("r1"),
            service_id: "bank_statement".into(),
            as_id: NodeId::from("as1"),
            data: data.into(),
            data_salt: "s".into(),
            signature: "c2ln".into(),
            height: 12,
        })
    }

    #[test]
    fn consent_request_uses_compact_frame_and_keeps_levels() {
        let c = codec(usize::MAX, usize::MAX);
        let msg = consent_request("please consent");
        let bytes = c.encode(&msg).unwrap();
        assert_eq!(bytes[0], MAGIC);
        assert_eq!(bytes[1], 0);
        assert_eq!(c.decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn large_body_is_compressed() {
        let c = codec(64, usize::MAX);
        let msg = consent_request(&"x".repeat(4096));
        let bytes = c.encode(&msg).unwrap();
        assert_eq!(bytes[1] & FLAG_ZSTD, FLAG_ZSTD);
        assert!(bytes.len() < 4096);
        assert_eq!(c.decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn large_data_moves_to_raw_segment() {
        let c = codec(usize::MAX, 16);
        let data = "d".repeat(100);
        let msg = data_response(&data);
        let bytes = c.encode(&msg).unwrap();
        assert_eq!(bytes[1] & FLAG_RAW, FLAG_RAW);
        assert!(bytes.ends_with(data.as_bytes()));
        assert_eq!(c.decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn other_messages_are_json() {
        let c = codec(0, 0);
        let msg = PeerMessage::ChallengeResponse(ChallengeResponseMessage {
            request_id: RequestId::from("r1"),
            rp_id: NodeId::from("rp1"),
            challenge: vec!["a".into(), "b".into()],
            height: 3,
        });
        let bytes = c.encode(&msg).unwrap();
        assert_eq!(bytes[0], b'{');
        assert_eq!(c.decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn truncated_and_unknown_frames_are_rejected() {
        let c = codec(usize::MAX, usize::MAX);
        let bytes = c.encode(&consent_request("m")).unwrap();
        assert_eq!(c.decode(&bytes[..bytes.len() - 1]), Err(CodecError::Truncated));
        assert_eq!(c.decode(&[0x01]), Err(CodecError::UnknownFormat(0x01)));
        assert_eq!(c.decode(&[]), Err(CodecError::Truncated));
    }

    #[test]
    fn trailing_bytes_need_the_raw_flag() {
        let c = codec(usize::MAX, usize::MAX);
        let mut bytes = c.encode(&data_response("inline")).unwrap();
        assert_eq!(bytes[1] & FLAG_RAW, 0);
        bytes.extend_from_slice(b"junk");
        assert!(matches!(c.decode(&bytes), Err(CodecError::RawSegment(_))));

        let mut bytes = c.encode(&consent_request("m")).unwrap();
        bytes.push(0);
        assert!(matches!(c.decode(&bytes), Err(CodecError::RawSegment(_))));
    }

    #[test]
    fn oversized_compressed_body_is_refused() {
        let big = consent_request(&"x".repeat(64 * 1024));
        let bytes = codec(64, usize::MAX).encode(&big).unwrap();
        assert_eq!(bytes[1] & FLAG_ZSTD, FLAG_ZSTD);
        assert!(bytes.len() < 8 * 1024);

        let small = PeerCodec::new(WireConfig {
            max_decompressed_bytes: 4 * 1024,
            ..WireConfig::default()
        });
        assert!(matches!(small.decode(&bytes), Err(CodecError::Compression(_))));
        assert_eq!(codec(64, usize::MAX).decode(&bytes).unwrap(), big);
    }
}
