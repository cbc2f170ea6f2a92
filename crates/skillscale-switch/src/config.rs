//! Switch configuration.
//!
//! The switch is configured purely from the environment so that container
//! deployments can retarget it without a CLI surface.

use crate::error::{Result, SwitchError};

/// Default upstream (publisher-facing) bind address.
pub const DEFAULT_XSUB_BIND: &str = "0.0.0.0:5444";

/// Default downstream (subscriber-facing) bind address.
pub const DEFAULT_XPUB_BIND: &str = "0.0.0.0:5555";

/// Default metrics port. `0` disables the endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9100;

/// Default per-direction queue cap, in messages.
pub const DEFAULT_HWM: usize = 50_000;

/// Runtime configuration for the switch, built once at startup.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// Address the upstream listener binds; publishers connect here.
    pub xsub_bind: String,
    /// Address the downstream listener binds; subscribers connect here.
    pub xpub_bind: String,
    /// Port for the Prometheus-text counter export; `0` disables it.
    pub metrics_port: u16,
    /// Per-connection bounded queue cap (high-water mark), in messages.
    pub hwm: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            xsub_bind: DEFAULT_XSUB_BIND.to_owned(),
            xpub_bind: DEFAULT_XPUB_BIND.to_owned(),
            metrics_port: DEFAULT_METRICS_PORT,
            hwm: DEFAULT_HWM,
        }
    }
}

impl SwitchConfig {
    /// Build the configuration from `SKILLSCALE_XSUB_BIND`,
    /// `SKILLSCALE_XPUB_BIND`, `SKILLSCALE_METRICS_PORT`, and
    /// `SKILLSCALE_HWM`, falling back to the documented defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SKILLSCALE_XSUB_BIND") {
            config.xsub_bind = v;
        }
        if let Ok(v) = std::env::var("SKILLSCALE_XPUB_BIND") {
            config.xpub_bind = v;
        }
        if let Ok(v) = std::env::var("SKILLSCALE_METRICS_PORT") {
            config.metrics_port = v.parse().map_err(|e| SwitchError::InvalidConfig {
                var: "SKILLSCALE_METRICS_PORT",
                reason: format!("{e}"),
            })?;
        }
        if let Ok(v) = std::env::var("SKILLSCALE_HWM") {
            config.hwm = v.parse().map_err(|e| SwitchError::InvalidConfig {
                var: "SKILLSCALE_HWM",
                reason: format!("{e}"),
            })?;
        }

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SwitchConfig::default();
        assert_eq!(config.xsub_bind, DEFAULT_XSUB_BIND);
        assert_eq!(config.xpub_bind, DEFAULT_XPUB_BIND);
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(config.hwm, DEFAULT_HWM);
    }
}
