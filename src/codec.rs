//! HSMS frame codec.
//!
//! Wire form is a fixed 10-byte header followed by raw ASCII content:
//!
//! ```text
//! +------+-----------+------+----------+----------------+
//! | 0x00 | stream BE | func | RR flag  | reserved (5)   |
//! +------+-----------+------+----------+----------------+
//!   byte0  bytes 1-2   byte3  byte4.b7   bytes 5-9
//! ```
//!
//! The header carries no length field; the peer emits one frame per socket
//! write, so a decode pass consumes the whole buffered read as one frame.
//!
//! The module also parses the `S<stream>F<function>:<content>` textual
//! shorthand accepted as an alternate send-time input.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{LinkError, Result};
use crate::types::{Message, Role, HEADER_LENGTH, REQUIRE_RESPONSE_BIT};

/// HSMS frame codec for one socket.
///
/// Constructed with the peer's identity so decoded frames arrive fully
/// attributed.
#[derive(Debug, Clone)]
pub struct HsmsCodec {
    sender_id: String,
    sender_role: Role,
}

impl HsmsCodec {
    /// Create a codec attributing decoded frames to `sender_id` / `sender_role`.
    pub fn new(sender_id: impl Into<String>, sender_role: Role) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_role,
        }
    }
}

impl Decoder for HsmsCodec {
    type Item = Message;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Message>, LinkError> {
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        // One socket read carries one frame; drain the whole buffer.
        let frame = src.split_to(src.len());
        let message = decode_frame(&frame, &self.sender_id, self.sender_role)?;
        Ok(Some(message))
    }
}

impl Encoder<Message> for HsmsCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> std::result::Result<(), LinkError> {
        dst.reserve(HEADER_LENGTH + item.content.len());
        write_frame(&item, dst);
        Ok(())
    }
}

fn write_frame(message: &Message, dst: &mut BytesMut) {
    dst.put_u8(0);
    dst.put_u16(message.stream);
    dst.put_u8(message.function);
    dst.put_u8(if message.require_response {
        REQUIRE_RESPONSE_BIT
    } else {
        0
    });
    dst.put_bytes(0, 5);
    dst.put_slice(message.content.as_bytes());
}

/// Encode a message into its wire form.
pub fn encode_frame(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LENGTH + message.content.len());
    write_frame(message, &mut buf);
    buf.freeze()
}

/// Decode one frame from a raw buffer.
///
/// Fails with [`LinkError::Format`] when fewer than 10 bytes are present.
/// Content is taken as ASCII and trimmed; the message type label is derived
/// from the (stream, function) pair.
pub fn decode_frame(bytes: &[u8], sender_id: &str, sender_role: Role) -> Result<Message> {
    if bytes.len() < HEADER_LENGTH {
        return Err(LinkError::format(format!(
            "frame too short: {} bytes, need {}",
            bytes.len(),
            HEADER_LENGTH
        )));
    }

    let stream = u16::from_be_bytes([bytes[1], bytes[2]]);
    let function = bytes[3];
    let require_response = bytes[4] & REQUIRE_RESPONSE_BIT != 0;
    let content = String::from_utf8_lossy(&bytes[HEADER_LENGTH..])
        .trim()
        .to_string();

    Ok(Message::incoming(
        stream,
        function,
        content,
        require_response,
        sender_id,
        sender_role,
    ))
}

/// Parse the `S<stream>F<function>:<content>` shorthand, case-insensitively.
///
/// Fails with [`LinkError::Format`] when the `:` separator is missing or the
/// `S`/`F` markers are malformed. An unparseable string is never sent as
/// literal content; callers reject the send instead.
pub fn parse_shorthand(input: &str) -> Result<(u16, u8, String)> {
    let (head, content) = input
        .split_once(':')
        .ok_or_else(|| LinkError::format(format!("missing ':' separator in {input:?}")))?;

    let head = head.trim();
    let rest = head
        .strip_prefix(['S', 's'])
        .ok_or_else(|| LinkError::format(format!("missing 'S' marker in {head:?}")))?;

    let f_pos = rest
        .find(['F', 'f'])
        .ok_or_else(|| LinkError::format(format!("missing 'F' marker in {head:?}")))?;

    let stream = rest[..f_pos]
        .parse::<u16>()
        .map_err(|_| LinkError::format(format!("invalid stream number in {head:?}")))?;
    let function = rest[f_pos + 1..]
        .parse::<u8>()
        .map_err(|_| LinkError::format(format!("invalid function number in {head:?}")))?;

    Ok((stream, function, content.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    #[test]
    fn test_header_layout() {
        let msg = Message::outgoing(6, 11, "EVENT_REPORT_SEND", true, "EQP1", Role::Server);
        let bytes = encode_frame(&msg);

        assert_eq!(bytes[0], 0);
        assert_eq!(u16::from_be_bytes([bytes[1], bytes[2]]), 6);
        assert_eq!(bytes[3], 11);
        assert_eq!(bytes[4], REQUIRE_RESPONSE_BIT);
        assert_eq!(&bytes[5..10], &[0, 0, 0, 0, 0]);
        assert_eq!(&bytes[10..], b"EVENT_REPORT_SEND");
    }

    #[test]
    fn test_roundtrip() {
        let original = Message::outgoing(1, 13, "ARE_YOU_THERE", true, "EQP1", Role::Client);
        let bytes = encode_frame(&original);
        let decoded = decode_frame(&bytes, "EQP1", Role::Client).unwrap();

        assert_eq!(decoded.stream, original.stream);
        assert_eq!(decoded.function, original.function);
        assert_eq!(decoded.require_response, original.require_response);
        assert_eq!(decoded.content, original.content);
        assert_eq!(decoded.direction, Direction::Incoming);
        assert_eq!(decoded.message_type, "Are You There");
    }

    #[test]
    fn test_roundtrip_no_response_flag() {
        let original = Message::outgoing(6, 12, "ACK", false, "HOST", Role::Client);
        let decoded = decode_frame(&encode_frame(&original), "HOST", Role::Client).unwrap();
        assert!(!decoded.require_response);
        assert_eq!(decoded.message_type, "Event Report Acknowledge");
    }

    #[test]
    fn test_decode_short_frame() {
        let err = decode_frame(&[0, 0, 1], "EQP1", Role::Client).unwrap_err();
        assert!(matches!(err, LinkError::Format(_)));
    }

    #[test]
    fn test_decode_header_only() {
        let msg = decode_frame(&[0, 0, 9, 1, 0, 0, 0, 0, 0, 0], "EQP1", Role::Client).unwrap();
        assert_eq!(msg.stream, 9);
        assert_eq!(msg.function, 1);
        assert_eq!(msg.content, "");
        assert_eq!(msg.message_type, "Unknown");
    }

    #[test]
    fn test_codec_waits_for_header() {
        let mut codec = HsmsCodec::new("peer", Role::Client);
        let mut buf = BytesMut::from(&[0u8, 0, 6][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[11, 0x80, 0, 0, 0, 0, 0]);
        buf.extend_from_slice(b"HELLO");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.sf_code(), "S6F11");
        assert_eq!(msg.content, "HELLO");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_encoder() {
        let mut codec = HsmsCodec::new("peer", Role::Server);
        let mut buf = BytesMut::new();
        let msg = Message::outgoing(5, 1, "ALARM_SET", true, "EQP1", Role::Server);
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..], &encode_frame(&msg)[..]);
    }

    #[test]
    fn test_shorthand_parse() {
        let (stream, function, content) = parse_shorthand("S1F13:ARE_YOU_THERE").unwrap();
        assert_eq!(stream, 1);
        assert_eq!(function, 13);
        assert_eq!(content, "ARE_YOU_THERE");
    }

    #[test]
    fn test_shorthand_case_insensitive() {
        let (stream, function, content) = parse_shorthand("s2f41:START_LOT").unwrap();
        assert_eq!(stream, 2);
        assert_eq!(function, 41);
        assert_eq!(content, "START_LOT");
    }

    #[test]
    fn test_shorthand_empty_content() {
        let (stream, function, content) = parse_shorthand("S1F1:").unwrap();
        assert_eq!((stream, function), (1, 1));
        assert_eq!(content, "");
    }

    #[test]
    fn test_shorthand_rejects_garbage() {
        assert!(matches!(parse_shorthand("garbage"), Err(LinkError::Format(_))));
        assert!(matches!(parse_shorthand("1F13:X"), Err(LinkError::Format(_))));
        assert!(matches!(parse_shorthand("S1G13:X"), Err(LinkError::Format(_))));
        assert!(matches!(parse_shorthand("SxFy:X"), Err(LinkError::Format(_))));
    }
}
