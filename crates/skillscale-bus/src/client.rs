//! Publisher and subscriber connection handles.
//!
//! Both handles wrap a single TCP connection to the switch. A [`Publisher`]
//! connects to the switch's *upstream* endpoint and sends publications; the
//! switch pushes subscription-control messages back down the same connection
//! so the publisher can observe what the fabric is interested in. A
//! [`Subscriber`] connects to the *downstream* endpoint, announces its topic
//! prefixes, and receives matching publications.
//!
//! Neither handle is `Clone`. Publisher sockets in this protocol family are
//! not safe to share between tasks; workers that need to publish each open
//! their own connection.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{BusError, Result};
use crate::frame::{Envelope, MessageCodec, SubscriptionUpdate, WireMessage};

/// Inbound subscription updates buffered per publisher connection.
///
/// Subscription state is tiny; if a publisher never drains the channel the
/// reader task discards further updates rather than let the socket
/// back-pressure the switch.
const SUBSCRIPTION_BUFFER: usize = 1024;

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// A publishing connection to the switch's upstream endpoint.
pub struct Publisher {
    writer: FramedWrite<OwnedWriteHalf, MessageCodec>,
    subscriptions: mpsc::Receiver<SubscriptionUpdate>,
}

impl Publisher {
    /// Connect to the switch upstream endpoint (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        // Background reader keeps the socket drained even when the caller
        // never looks at subscription traffic.
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(drain_subscriptions(read_half, tx));

        tracing::debug!(addr = %addr, "publisher connected");
        Ok(Self {
            writer: FramedWrite::new(write_half, MessageCodec::new()),
            subscriptions: rx,
        })
    }

    /// Publish a two-frame envelope.
    ///
    /// Succeeds whether or not anything downstream is subscribed; filtering
    /// is the fabric's concern.
    pub async fn publish(&mut self, topic: impl Into<Bytes>, payload: impl Into<Bytes>) -> Result<()> {
        let envelope = Envelope {
            topic: topic.into(),
            payload: payload.into(),
        };
        self.writer.send(envelope.into_message()).await
    }

    /// Publish a raw multi-frame message, preserving frame boundaries.
    pub async fn publish_message(&mut self, msg: WireMessage) -> Result<()> {
        self.writer.send(msg).await
    }

    /// Wait for the next subscription-control message propagated by the
    /// switch. Returns `None` once the connection's read side has closed.
    pub async fn recv_subscription(&mut self) -> Option<SubscriptionUpdate> {
        self.subscriptions.recv().await
    }
}

/// Reader task for a publisher connection: parse inbound control messages and
/// hand them to the (bounded) subscription channel.
async fn drain_subscriptions(read_half: OwnedReadHalf, tx: mpsc::Sender<SubscriptionUpdate>) {
    let mut reader = FramedRead::new(read_half, MessageCodec::new());
    while let Some(next) = reader.next().await {
        match next {
            Ok(msg) => match SubscriptionUpdate::from_message(&msg) {
                Ok(update) => {
                    if tx.try_send(update).is_err() {
                        tracing::trace!("subscription buffer full, dropping update");
                    }
                }
                Err(_) => {
                    tracing::warn!("ignoring non-control message on publisher connection");
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "publisher read side closed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// A subscribing connection to the switch's downstream endpoint.
pub struct Subscriber {
    reader: FramedRead<OwnedReadHalf, MessageCodec>,
    writer: FramedWrite<OwnedWriteHalf, MessageCodec>,
}

impl Subscriber {
    /// Connect to the switch downstream endpoint (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        tracing::debug!(addr = %addr, "subscriber connected");
        Ok(Self {
            reader: FramedRead::new(read_half, MessageCodec::new()),
            writer: FramedWrite::new(write_half, MessageCodec::new()),
        })
    }

    /// Announce interest in a topic prefix. An empty prefix matches all
    /// topics.
    pub async fn subscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        self.writer
            .send(SubscriptionUpdate::subscribe(prefix.into()).into_message())
            .await
    }

    /// Withdraw interest in a topic prefix.
    pub async fn unsubscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        self.writer
            .send(SubscriptionUpdate::unsubscribe(prefix.into()).into_message())
            .await
    }

    /// Receive the next publication delivered to this connection.
    ///
    /// Cancel-safe: a partially received message stays buffered in the codec
    /// and is completed by the next call.
    pub async fn recv(&mut self) -> Result<WireMessage> {
        match self.reader.next().await {
            Some(msg) => msg,
            None => Err(BusError::ConnectionClosed),
        }
    }
}
