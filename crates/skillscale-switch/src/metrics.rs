//! Forwarding counters and their Prometheus-text export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Monotonic counters maintained by the switch.
///
/// All counters use relaxed ordering: they are statistics, not
/// synchronization.
#[derive(Debug, Default)]
pub struct SwitchMetrics {
    /// Publications forwarded from upstream, counted once per message
    /// regardless of fan-out width.
    messages_forwarded: AtomicU64,
    /// Subscription-control messages propagated upstream.
    subscriptions_forwarded: AtomicU64,
    /// Messages dropped because a subscriber queue was at its high-water
    /// mark.
    messages_dropped: AtomicU64,
}

impl SwitchMetrics {
    pub(crate) fn record_message(&self) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_subscription(&self) {
        self.subscriptions_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total publications forwarded so far.
    #[must_use]
    pub fn messages_forwarded(&self) -> u64 {
        self.messages_forwarded.load(Ordering::Relaxed)
    }

    /// Total subscription-control messages propagated so far.
    #[must_use]
    pub fn subscriptions_forwarded(&self) -> u64 {
        self.subscriptions_forwarded.load(Ordering::Relaxed)
    }

    /// Total messages dropped at subscriber queues so far.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Render the counters in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "# HELP skillscale_switch_messages_total Total messages forwarded\n\
             # TYPE skillscale_switch_messages_total counter\n\
             skillscale_switch_messages_total {}\n\
             # HELP skillscale_switch_subscriptions_total Total subscription updates propagated\n\
             # TYPE skillscale_switch_subscriptions_total counter\n\
             skillscale_switch_subscriptions_total {}\n\
             # HELP skillscale_switch_dropped_total Total messages dropped at high-water mark\n\
             # TYPE skillscale_switch_dropped_total counter\n\
             skillscale_switch_dropped_total {}\n",
            self.messages_forwarded(),
            self.subscriptions_forwarded(),
            self.messages_dropped(),
        )
    }
}

/// Serve `GET /metrics` until cancelled.
pub(crate) async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<SwitchMetrics>,
    cancel: CancellationToken,
) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { metrics.render() }
        }),
    );

    let shutdown = cancel.cancelled_owned();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::warn!(error = %e, "metrics endpoint terminated");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let metrics = SwitchMetrics::default();
        assert_eq!(metrics.messages_forwarded(), 0);
        metrics.record_message();
        metrics.record_message();
        assert_eq!(metrics.messages_forwarded(), 2);
        metrics.record_subscription();
        assert_eq!(metrics.subscriptions_forwarded(), 1);
        metrics.record_drop();
        assert_eq!(metrics.messages_dropped(), 1);
    }

    #[test]
    fn render_is_prometheus_text() {
        let metrics = SwitchMetrics::default();
        metrics.record_message();
        let body = metrics.render();
        assert!(body.contains("# TYPE skillscale_switch_messages_total counter"));
        assert!(body.contains("skillscale_switch_messages_total 1"));
        assert!(body.contains("skillscale_switch_dropped_total 0"));
    }
}
