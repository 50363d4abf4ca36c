//! Waiting for machines to come back (exponential backoff)

use crate::error::{DeployError, Result};
use crate::transport::{Target, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Backoff settings used while waiting for a machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    30
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl WaitConfig {
    /// Delay before retry number `attempt` (milliseconds)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        (delay as u64).min(self.max_delay_ms)
    }

    /// No waiting between attempts; used by tests and fake transports
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }
}

/// Probe the machine until a trivial command succeeds
pub async fn wait_for_reachable(
    transport: &dyn Transport,
    target: &Target,
    config: &WaitConfig,
) -> Result<()> {
    for attempt in 0..config.max_retries {
        match transport.run_command(target, "true").await {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => {
                tracing::debug!(machine = %target.machine, exit_code = output.exit_code, "Probe failed");
            }
            Err(e) if e.is_connection_failure() => {
                tracing::debug!(machine = %target.machine, attempt, "Not reachable yet");
            }
            Err(e) => return Err(e.into()),
        }

        if attempt + 1 < config.max_retries {
            sleep(Duration::from_millis(config.delay_for_attempt(attempt))).await;
        }
    }

    Err(DeployError::Unreachable {
        machine: target.machine.clone(),
        attempts: config.max_retries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let config = WaitConfig {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), 1000);
        assert_eq!(config.delay_for_attempt(1), 2000);
        assert_eq!(config.delay_for_attempt(3), 8000);
        assert_eq!(config.delay_for_attempt(4), 10000);
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let config = WaitConfig::immediate(3);
        assert_eq!(config.delay_for_attempt(2), 0);
    }
}
