//! The forwarding core.
//!
//! One task per connection side: each accepted socket gets a reader task and
//! a writer task. Readers on the upstream side turn publications into
//! fan-out; readers on the downstream side turn subscription-control
//! messages into registry updates plus upstream propagation. Writers drain a
//! bounded per-connection queue; when a subscriber's queue is at the
//! high-water mark the newest message for that subscriber is dropped and
//! counted, never buffered further.
//!
//! A transport error on one connection is localized to that connection; the
//! switch neither retries nor persists.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use skillscale_bus::{MessageCodec, SubscriptionOp, SubscriptionUpdate, WireMessage};

use crate::config::SwitchConfig;
use crate::error::Result;
use crate::metrics::{serve_metrics, SwitchMetrics};

// ---------------------------------------------------------------------------
// Shared forwarding state
// ---------------------------------------------------------------------------

/// Live connection registry shared by all connection tasks.
struct Fabric {
    metrics: Arc<SwitchMetrics>,
    hwm: usize,
    next_id: AtomicU64,
    /// Downstream connections: prefix sets plus outbound queues.
    subscribers: DashMap<u64, SubscriberEntry>,
    /// Upstream connections: outbound queues for control traffic.
    publishers: DashMap<u64, mpsc::Sender<WireMessage>>,
}

struct SubscriberEntry {
    /// Active prefixes, duplicates allowed (unsubscribe removes one
    /// occurrence, matching publisher-side refcount semantics).
    prefixes: Mutex<Vec<Bytes>>,
    tx: mpsc::Sender<WireMessage>,
}

impl Fabric {
    fn new(metrics: Arc<SwitchMetrics>, hwm: usize) -> Self {
        Self {
            metrics,
            hwm,
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
            publishers: DashMap::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fan a publication out to every matching subscriber.
    fn forward_publication(&self, msg: WireMessage) {
        self.metrics.record_message();

        for entry in self.subscribers.iter() {
            let matched = match entry.prefixes.lock() {
                Ok(prefixes) => prefixes.iter().any(|p| msg.topic().starts_with(p)),
                Err(_) => false,
            };
            if !matched {
                continue;
            }
            if entry.tx.try_send(msg.clone()).is_err() {
                self.metrics.record_drop();
                tracing::debug!(
                    subscriber = *entry.key(),
                    "subscriber queue at high-water mark, dropping message"
                );
            }
        }
    }

    /// Update a subscriber's prefix set.
    fn apply_subscription(&self, id: u64, update: &SubscriptionUpdate) {
        let Some(entry) = self.subscribers.get(&id) else {
            return;
        };
        let Ok(mut prefixes) = entry.prefixes.lock() else {
            return;
        };
        match update.op {
            SubscriptionOp::Subscribe => prefixes.push(update.prefix.clone()),
            SubscriptionOp::Unsubscribe => {
                if let Some(pos) = prefixes.iter().position(|p| *p == update.prefix) {
                    prefixes.remove(pos);
                }
            }
        }
    }

    /// Propagate a control message to every live publisher connection.
    ///
    /// Verbose mode: duplicates from distinct subscribers are forwarded too,
    /// so publisher-side refcounts stay accurate.
    fn forward_subscription(&self, msg: &WireMessage) {
        self.metrics.record_subscription();
        for entry in self.publishers.iter() {
            if entry.value().try_send(msg.clone()).is_err() {
                tracing::warn!(
                    publisher = *entry.key(),
                    "publisher queue full, dropping subscription update"
                );
            }
        }
    }

    /// Send one subscribe message per currently-active prefix to a
    /// late-connecting publisher.
    fn replay_subscriptions(&self, tx: &mpsc::Sender<WireMessage>) {
        for entry in self.subscribers.iter() {
            let Ok(prefixes) = entry.prefixes.lock() else {
                continue;
            };
            for prefix in prefixes.iter() {
                let msg = SubscriptionUpdate::subscribe(prefix.clone()).into_message();
                if tx.try_send(msg).is_err() {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Switch
// ---------------------------------------------------------------------------

/// Entry point for running a switch.
pub struct Switch;

impl Switch {
    /// Bind both listeners (and the metrics endpoint, unless disabled) and
    /// start forwarding.
    ///
    /// The returned handle reports the bound addresses, which matters when
    /// binding port `0` for tests.
    pub async fn bind(config: SwitchConfig) -> Result<SwitchHandle> {
        let xsub_listener = TcpListener::bind(&config.xsub_bind).await?;
        let xpub_listener = TcpListener::bind(&config.xpub_bind).await?;
        let xsub_addr = xsub_listener.local_addr()?;
        let xpub_addr = xpub_listener.local_addr()?;

        let metrics = Arc::new(SwitchMetrics::default());
        let fabric = Arc::new(Fabric::new(Arc::clone(&metrics), config.hwm));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let metrics_addr = if config.metrics_port == 0 {
            None
        } else {
            let listener = TcpListener::bind(("0.0.0.0", config.metrics_port)).await?;
            let addr = listener.local_addr()?;
            tracker.spawn(serve_metrics(
                listener,
                Arc::clone(&metrics),
                cancel.clone(),
            ));
            Some(addr)
        };

        tracker.spawn(accept_loop(
            xsub_listener,
            Role::Publisher,
            Arc::clone(&fabric),
            cancel.clone(),
            tracker.clone(),
        ));
        tracker.spawn(accept_loop(
            xpub_listener,
            Role::Subscriber,
            Arc::clone(&fabric),
            cancel.clone(),
            tracker.clone(),
        ));

        tracing::info!(
            xsub = %xsub_addr,
            xpub = %xpub_addr,
            metrics = ?metrics_addr,
            hwm = config.hwm,
            "switch listening"
        );

        Ok(SwitchHandle {
            xsub_addr,
            xpub_addr,
            metrics_addr,
            metrics,
            cancel,
            tracker,
        })
    }
}

/// A running switch.
///
/// Dropping the handle does not stop the switch; call [`SwitchHandle::shutdown`]
/// then [`SwitchHandle::join`] for an orderly stop.
pub struct SwitchHandle {
    xsub_addr: SocketAddr,
    xpub_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    metrics: Arc<SwitchMetrics>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl SwitchHandle {
    /// Address publishers connect to.
    #[must_use]
    pub fn xsub_addr(&self) -> SocketAddr {
        self.xsub_addr
    }

    /// Address subscribers connect to.
    #[must_use]
    pub fn xpub_addr(&self) -> SocketAddr {
        self.xpub_addr
    }

    /// Address of the metrics endpoint, if enabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// The switch's counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<SwitchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Signal every listener and connection task to stop.
    pub fn shutdown(&self) {
        tracing::info!("switch shutdown requested");
        self.cancel.cancel();
    }

    /// Wait until both listeners and all connection tasks have stopped and
    /// released their sockets.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("switch stopped");
    }
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Role {
    Publisher,
    Subscriber,
}

async fn accept_loop(
    listener: TcpListener,
    role: Role,
    fabric: Arc<Fabric>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, role = ?role, "connection accepted");
                    let fabric = Arc::clone(&fabric);
                    let cancel = cancel.clone();
                    match role {
                        Role::Publisher => {
                            tracker.spawn(run_publisher(fabric, stream, peer, cancel));
                        }
                        Role::Subscriber => {
                            tracker.spawn(run_subscriber(fabric, stream, peer, cancel));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(role = ?role, error = %e, "accept failed");
                }
            }
        }
    }
}

/// Upstream connection: read publications, fan them out; feed propagated
/// subscription updates back down the socket.
async fn run_publisher(
    fabric: Arc<Fabric>,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    let id = fabric.next_id();
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
    }
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::channel(fabric.hwm);
    fabric.publishers.insert(id, tx.clone());
    // Replay after registration: a concurrent live update may be seen twice,
    // which verbose-mode refcounting tolerates; missing one would not be.
    fabric.replay_subscriptions(&tx);
    drop(tx);

    let writer = tokio::spawn(write_loop(write_half, rx, cancel.clone()));

    let mut reader = FramedRead::new(read_half, MessageCodec::new());
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(msg)) => fabric.forward_publication(msg),
                Some(Err(e)) => {
                    tracing::debug!(publisher = id, peer = %peer, error = %e, "publisher read error");
                    break;
                }
                None => break,
            }
        }
    }

    fabric.publishers.remove(&id);
    let _ = writer.await;
    tracing::debug!(publisher = id, peer = %peer, "publisher disconnected");
}

/// Downstream connection: read subscription-control messages, maintain the
/// prefix set, propagate upstream; deliver matching publications from the
/// bounded queue.
async fn run_subscriber(
    fabric: Arc<Fabric>,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    let id = fabric.next_id();
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
    }
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::channel(fabric.hwm);
    fabric.subscribers.insert(
        id,
        SubscriberEntry {
            prefixes: Mutex::new(Vec::new()),
            tx,
        },
    );

    let writer = tokio::spawn(write_loop(write_half, rx, cancel.clone()));

    let mut reader = FramedRead::new(read_half, MessageCodec::new());
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(msg)) => match SubscriptionUpdate::from_message(&msg) {
                    Ok(update) => {
                        tracing::trace!(
                            subscriber = id,
                            op = ?update.op,
                            prefix = %String::from_utf8_lossy(&update.prefix),
                            "subscription update"
                        );
                        fabric.apply_subscription(id, &update);
                        fabric.forward_subscription(&msg);
                    }
                    Err(e) => {
                        tracing::warn!(subscriber = id, error = %e, "ignoring malformed control message");
                    }
                },
                Some(Err(e)) => {
                    tracing::debug!(subscriber = id, peer = %peer, error = %e, "subscriber read error");
                    break;
                }
                None => break,
            }
        }
    }

    // Withdraw this connection's interest so publisher-side refcounts drop.
    if let Some((_, entry)) = fabric.subscribers.remove(&id) {
        let prefixes = match entry.prefixes.into_inner() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        for prefix in prefixes {
            let msg = SubscriptionUpdate::unsubscribe(prefix).into_message();
            fabric.forward_subscription(&msg);
        }
    }

    let _ = writer.await;
    tracing::debug!(subscriber = id, peer = %peer, "subscriber disconnected");
}

/// Drain a connection's bounded outbound queue into its socket.
async fn write_loop(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<WireMessage>,
    cancel: CancellationToken,
) {
    let mut writer = FramedWrite::new(write_half, MessageCodec::new());
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = writer.send(msg).await {
                        tracing::debug!(error = %e, "write failed, closing connection");
                        break;
                    }
                }
                None => break,
            }
        }
    }
}
