//! Driver configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::TransferTimeouts;

/// Runtime knobs of the driver core
///
/// The device match (VID/PID) is fixed and deliberately absent here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Bound on the outbound control transfer, in milliseconds
    pub control_timeout_ms: u64,
    /// Bound on the inbound interrupt transfer, in milliseconds
    pub interrupt_timeout_ms: u64,
    /// Take one reading while attaching so the cache starts warm
    pub prime_on_attach: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let nominal = protocol::DEFAULT_TRANSFER_TIMEOUT.as_millis() as u64;
        Self {
            control_timeout_ms: nominal,
            interrupt_timeout_ms: nominal,
            prime_on_attach: true,
        }
    }
}

impl DriverConfig {
    pub fn timeouts(&self) -> TransferTimeouts {
        TransferTimeouts {
            control: Duration::from_millis(self.control_timeout_ms),
            interrupt: Duration::from_millis(self.interrupt_timeout_ms),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> common::Result<()> {
        if self.control_timeout_ms == 0 || self.interrupt_timeout_ms == 0 {
            return Err(common::Error::Config(
                "transfer timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.control_timeout_ms, 2000);
        assert_eq!(config.interrupt_timeout_ms, 2000);
        assert!(config.prime_on_attach);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = DriverConfig {
            interrupt_timeout_ms: 0,
            ..DriverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_table_uses_defaults() {
        let config: DriverConfig = toml::from_str("prime_on_attach = false").unwrap();
        assert!(!config.prime_on_attach);
        assert_eq!(config.timeouts().control, Duration::from_secs(2));
    }
}
