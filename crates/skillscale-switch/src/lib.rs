//! Stateless XPUB/XSUB message switch.
//!
//! The switch sits at the center of the star topology. Publishers connect to
//! the *upstream* (XSUB-side) listener; subscribers connect to the
//! *downstream* (XPUB-side) listener. Every publication received upstream is
//! forwarded to the downstream connections whose prefix sets match its topic,
//! and every subscription-control message received downstream is forwarded to
//! every upstream connection, so filtering can happen at the source.
//!
//! The switch keeps no per-request state: correlation between requests and
//! responses is entirely end-to-end. Its only cross-connection state is the
//! live subscription registry needed for forwarding decisions and for
//! replaying active subscriptions to publishers that connect late.

mod config;
mod error;
mod metrics;
mod switch;

pub use config::SwitchConfig;
pub use error::{Result, SwitchError};
pub use metrics::SwitchMetrics;
pub use switch::{Switch, SwitchHandle};
