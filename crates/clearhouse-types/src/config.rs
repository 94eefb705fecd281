//! Configuration for a clearing house settlement node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ClearingError, Result, constants};

/// Timing and concurrency settings for settlement runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Validity window attached to every settlement transaction.
    pub time_window: Duration,
    /// Bounded wait for each counterparty reply.
    pub session_timeout: Duration,
    /// Bounded wait for the ordering authority's verdict.
    pub commit_timeout: Duration,
    /// Request counterparty signatures concurrently instead of one by one.
    pub parallel_signature_collection: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            time_window: Duration::from_secs(constants::DEFAULT_TIME_WINDOW_SECS),
            session_timeout: Duration::from_millis(constants::DEFAULT_SESSION_TIMEOUT_MS),
            commit_timeout: Duration::from_millis(constants::DEFAULT_COMMIT_TIMEOUT_MS),
            parallel_signature_collection: true,
        }
    }
}

impl SettlementConfig {
    /// Reject configurations that could never complete a settlement.
    ///
    /// # Errors
    /// Returns [`ClearingError::Configuration`] if any duration is zero.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("time_window", self.time_window),
            ("session_timeout", self.session_timeout),
            ("commit_timeout", self.commit_timeout),
        ];
        for (name, value) in checks {
            if value.is_zero() {
                return Err(ClearingError::Configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// The validity window as a `chrono` duration.
    ///
    /// # Errors
    /// Returns [`ClearingError::Configuration`] if the window overflows.
    pub fn time_window_chrono(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.time_window)
            .map_err(|e| ClearingError::Configuration(format!("time_window: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SettlementConfig::default();
        assert_eq!(cfg.time_window.as_secs(), 60);
        assert_eq!(cfg.session_timeout.as_millis(), 30_000);
        assert_eq!(cfg.commit_timeout.as_millis(), 60_000);
        assert!(cfg.parallel_signature_collection);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = SettlementConfig {
            session_timeout: Duration::ZERO,
            ..SettlementConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ClearingError::Configuration(ref m) if m.contains("session_timeout")));
    }

    #[test]
    fn chrono_window_matches() {
        let cfg = SettlementConfig::default();
        assert_eq!(cfg.time_window_chrono().unwrap(), chrono::Duration::seconds(60));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = SettlementConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SettlementConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.time_window, back.time_window);
        assert_eq!(cfg.parallel_signature_collection, back.parallel_signature_collection);
    }
}
