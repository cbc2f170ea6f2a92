//! Frame and message encoding.
//!
//! The codec assembles whole [`WireMessage`]s: frames are buffered internally
//! until one arrives with the `MORE` flag clear, so downstream code never
//! observes a torn message. Frame boundaries survive forwarding unchanged,
//! which is what lets the switch relay messages it does not understand.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{BusError, Result};

/// Flags bit 0: more frames follow in the same message.
const FLAG_MORE: u8 = 0x01;

/// Per-frame header: flags byte + big-endian u32 payload length.
const HEADER_LEN: usize = 5;

/// Hard cap on a single frame's payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Subscription-control opcode: add a topic prefix.
const OP_SUBSCRIBE: u8 = 0x01;

/// Subscription-control opcode: remove a topic prefix.
const OP_UNSUBSCRIBE: u8 = 0x00;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A complete multi-frame message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// The frames of this message, in order. Never empty.
    pub frames: Vec<Bytes>,
}

impl WireMessage {
    /// Build a message from raw frames.
    #[must_use]
    pub fn new(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    /// The first frame, by convention the topic of a publication.
    #[must_use]
    pub fn topic(&self) -> &[u8] {
        self.frames.first().map(Bytes::as_ref).unwrap_or(&[])
    }
}

/// A two-frame publication: topic plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Opaque topic bytes, matched by prefix at subscription time.
    pub topic: Bytes,
    /// The payload frame.
    pub payload: Bytes,
}

impl Envelope {
    /// Interpret a wire message as an envelope.
    ///
    /// Returns `None` unless the message has exactly two frames.
    #[must_use]
    pub fn from_message(msg: WireMessage) -> Option<Self> {
        let mut frames = msg.frames;
        if frames.len() != 2 {
            return None;
        }
        let payload = frames.pop().unwrap_or_default();
        let topic = frames.pop().unwrap_or_default();
        Some(Self { topic, payload })
    }

    /// Convert back into the wire representation.
    #[must_use]
    pub fn into_message(self) -> WireMessage {
        WireMessage::new(vec![self.topic, self.payload])
    }
}

/// Whether a control frame adds or removes a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOp {
    Subscribe,
    Unsubscribe,
}

/// A subscription-control message: opcode plus topic prefix.
///
/// An empty prefix subscribes to everything, as in classic XSUB semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub op: SubscriptionOp,
    pub prefix: Bytes,
}

impl SubscriptionUpdate {
    /// Build a subscribe update for the given prefix.
    #[must_use]
    pub fn subscribe(prefix: impl Into<Bytes>) -> Self {
        Self {
            op: SubscriptionOp::Subscribe,
            prefix: prefix.into(),
        }
    }

    /// Build an unsubscribe update for the given prefix.
    #[must_use]
    pub fn unsubscribe(prefix: impl Into<Bytes>) -> Self {
        Self {
            op: SubscriptionOp::Unsubscribe,
            prefix: prefix.into(),
        }
    }

    /// Encode as a single-frame wire message.
    #[must_use]
    pub fn into_message(self) -> WireMessage {
        let op = match self.op {
            SubscriptionOp::Subscribe => OP_SUBSCRIBE,
            SubscriptionOp::Unsubscribe => OP_UNSUBSCRIBE,
        };
        let mut buf = BytesMut::with_capacity(1 + self.prefix.len());
        buf.put_u8(op);
        buf.extend_from_slice(&self.prefix);
        WireMessage::new(vec![buf.freeze()])
    }

    /// Decode from a wire message.
    ///
    /// Errors unless the message is a single frame starting with a valid
    /// opcode byte.
    pub fn from_message(msg: &WireMessage) -> Result<Self> {
        if msg.frames.len() != 1 {
            return Err(BusError::MalformedSubscription);
        }
        let frame = &msg.frames[0];
        let op = match frame.first() {
            Some(&OP_SUBSCRIBE) => SubscriptionOp::Subscribe,
            Some(&OP_UNSUBSCRIBE) => SubscriptionOp::Unsubscribe,
            _ => return Err(BusError::MalformedSubscription),
        };
        Ok(Self {
            op,
            prefix: frame.slice(1..),
        })
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Frame codec yielding complete [`WireMessage`]s.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Frames of the message currently being assembled.
    pending: Vec<Bytes>,
}

impl MessageCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = WireMessage;
    type Error = BusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireMessage>> {
        loop {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let flags = src[0];
            let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(BusError::FrameTooLarge {
                    len,
                    max: MAX_FRAME_LEN,
                });
            }
            if src.len() < HEADER_LEN + len {
                src.reserve(HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let payload = src.split_to(len).freeze();
            self.pending.push(payload);

            if flags & FLAG_MORE == 0 {
                return Ok(Some(WireMessage::new(std::mem::take(&mut self.pending))));
            }
        }
    }
}

impl Encoder<WireMessage> for MessageCodec {
    type Error = BusError;

    fn encode(&mut self, msg: WireMessage, dst: &mut BytesMut) -> Result<()> {
        let last = msg.frames.len().saturating_sub(1);
        for (i, frame) in msg.frames.iter().enumerate() {
            if frame.len() > MAX_FRAME_LEN {
                return Err(BusError::FrameTooLarge {
                    len: frame.len(),
                    max: MAX_FRAME_LEN,
                });
            }
            dst.reserve(HEADER_LEN + frame.len());
            dst.put_u8(if i < last { FLAG_MORE } else { 0 });
            dst.put_u32(frame.len() as u32);
            dst.extend_from_slice(frame);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: WireMessage) -> WireMessage {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).expect("encode");
        codec
            .decode(&mut buf)
            .expect("decode")
            .expect("complete message")
    }

    #[test]
    fn two_frame_roundtrip() {
        let msg = WireMessage::new(vec![
            Bytes::from_static(b"TOPIC_DEMO"),
            Bytes::from_static(b"{\"request_id\":\"r1\"}"),
        ]);
        let decoded = roundtrip(msg.clone());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn single_frame_roundtrip() {
        let msg = WireMessage::new(vec![Bytes::from_static(b"\x01TOPIC")]);
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn decode_across_partial_reads() {
        let msg = WireMessage::new(vec![
            Bytes::from_static(b"topic"),
            Bytes::from_static(b"payload-bytes"),
        ]);
        let mut codec = MessageCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(msg.clone(), &mut wire).expect("encode");

        // Feed the encoded bytes one at a time; only the final byte completes
        // the message.
        let mut buf = BytesMut::new();
        let wire = wire.freeze();
        for (i, byte) in wire.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let out = codec.decode(&mut buf).expect("decode");
            if i + 1 < wire.len() {
                assert!(out.is_none(), "message completed early at byte {i}");
            } else {
                assert_eq!(out, Some(msg.clone()));
            }
        }
    }

    #[test]
    fn two_messages_in_one_buffer() {
        let a = WireMessage::new(vec![Bytes::from_static(b"a"), Bytes::from_static(b"1")]);
        let b = WireMessage::new(vec![Bytes::from_static(b"b"), Bytes::from_static(b"2")]);
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(a.clone(), &mut buf).expect("encode a");
        codec.encode(b.clone(), &mut buf).expect("encode b");

        assert_eq!(codec.decode(&mut buf).expect("decode"), Some(a));
        assert_eq!(codec.decode(&mut buf).expect("decode"), Some(b));
        assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u32(u32::MAX);
        buf.extend_from_slice(b"xxxx");
        let mut codec = MessageCodec::new();
        let err = codec.decode(&mut buf).expect_err("oversized frame");
        assert!(matches!(err, BusError::FrameTooLarge { .. }));
    }

    #[test]
    fn envelope_requires_two_frames() {
        let three = WireMessage::new(vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
        ]);
        assert!(Envelope::from_message(three).is_none());

        let two = WireMessage::new(vec![Bytes::from_static(b"t"), Bytes::from_static(b"p")]);
        let env = Envelope::from_message(two).expect("two frames");
        assert_eq!(&env.topic[..], b"t");
        assert_eq!(&env.payload[..], b"p");
    }

    #[test]
    fn subscription_update_roundtrip() {
        let sub = SubscriptionUpdate::subscribe(Bytes::from_static(b"TOPIC_A"));
        let msg = sub.clone().into_message();
        assert_eq!(SubscriptionUpdate::from_message(&msg).expect("parse"), sub);

        let unsub = SubscriptionUpdate::unsubscribe(Bytes::from_static(b""));
        let msg = unsub.clone().into_message();
        assert_eq!(
            SubscriptionUpdate::from_message(&msg).expect("parse"),
            unsub
        );
    }

    #[test]
    fn subscription_rejects_bad_opcode() {
        let msg = WireMessage::new(vec![Bytes::from_static(b"\x7fTOPIC")]);
        assert!(SubscriptionUpdate::from_message(&msg).is_err());

        let empty = WireMessage::new(vec![Bytes::new()]);
        assert!(SubscriptionUpdate::from_message(&empty).is_err());
    }
}
