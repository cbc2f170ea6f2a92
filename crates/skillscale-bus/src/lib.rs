//! Wire framing and pub/sub connection handles for the SkillScale fabric.
//!
//! Every SkillScale process speaks the same framed TCP protocol:
//!
//! - A *frame* is a flags byte, a big-endian `u32` length, and that many
//!   payload bytes. Bit 0 of the flags byte (`MORE`) marks that further
//!   frames belong to the same logical message.
//! - A *message* is the frame sequence up to and including the first frame
//!   with `MORE` clear. Envelopes are two-frame messages: an opaque topic
//!   frame followed by a payload frame.
//! - *Subscription-control* messages are single-frame messages carrying an
//!   opcode byte (subscribe/unsubscribe) followed by a topic prefix. They
//!   flow from subscribers towards publishers so that filtering can happen
//!   at the source.
//!
//! [`Publisher`] and [`Subscriber`] are owned connection handles.  They are
//! deliberately not `Clone`: a handle belongs to exactly one task, and
//! concurrency is achieved by opening more connections, never by sharing one.

mod client;
mod error;
mod frame;

pub use client::{Publisher, Subscriber};
pub use error::{BusError, Result};
pub use frame::{
    Envelope, MessageCodec, SubscriptionOp, SubscriptionUpdate, WireMessage, MAX_FRAME_LEN,
};
