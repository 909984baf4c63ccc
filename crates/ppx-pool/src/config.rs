use std::time::Duration;

use ppx_core::PoolError;

/// Sizing and timing parameters for a [`crate::Pool`].
///
/// `min`/`max`/`reserve`/`keep_alive_ms` are accepted as plain integers
/// (rather than `usize`) so that out-of-range values used in configuration
/// rejection tests — negative `min`, `reserve == max`, and so on — are
/// representable at all; [`PoolConfig::validate`] is what actually rejects
/// them, matching the teacher's `validate_config`-family pattern of one
/// function per invariant group.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "config-toml", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    min: i64,
    max: i64,
    reserve: i64,
    keep_alive_ms: i64,
    verbose: bool,
    command_deadline_ms: Option<u64>,
    terminate_grace_ms: u64,
}

impl PoolConfig {
    pub fn new(min: i64, max: i64, reserve: i64, keep_alive_ms: i64) -> Self {
        Self {
            min,
            max,
            reserve,
            keep_alive_ms,
            verbose: false,
            command_deadline_ms: None,
            terminate_grace_ms: 5_000,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_command_deadline(mut self, deadline: Duration) -> Self {
        self.command_deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Checks the invariants from the data model: `min >= 0`, `max >= 1`,
    /// `min <= max`, and `0 <= reserve < max`. Any `keep_alive_ms <= 0` is
    /// treated as "disabled" rather than rejected.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min < 0 {
            return Err(PoolError::ConfigurationError(format!("min must be >= 0, got {}", self.min)));
        }
        if self.max < 1 {
            return Err(PoolError::ConfigurationError(format!("max must be >= 1, got {}", self.max)));
        }
        if self.min > self.max {
            return Err(PoolError::ConfigurationError(format!(
                "min ({}) must be <= max ({})",
                self.min, self.max
            )));
        }
        if self.reserve < 0 {
            return Err(PoolError::ConfigurationError(format!("reserve must be >= 0, got {}", self.reserve)));
        }
        if self.reserve >= self.max {
            return Err(PoolError::ConfigurationError(format!(
                "reserve ({}) must be < max ({})",
                self.reserve, self.max
            )));
        }
        Ok(())
    }

    pub fn min(&self) -> usize {
        self.min.max(0) as usize
    }

    pub fn max(&self) -> usize {
        self.max.max(1) as usize
    }

    pub fn reserve(&self) -> usize {
        self.reserve.max(0) as usize
    }

    /// Normalized per the data model: any non-positive input means "no
    /// idle timeout".
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms.max(0) as u64)
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn command_deadline(&self) -> Option<Duration> {
        self.command_deadline_ms.map(Duration::from_millis)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// How many executors to spawn at construction, per §4.4's initial
    /// population rule.
    pub fn initial_population(&self) -> usize {
        self.min().max(self.reserve())
    }
}

#[cfg(feature = "config-toml")]
impl PoolConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, PoolError> {
        toml::from_str(text).map_err(|err| PoolError::ConfigurationError(err.to_string()))
    }
}
