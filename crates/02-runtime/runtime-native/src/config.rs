//! Per-process bus configuration loaded from TOML.
//!
//! ```toml
//! socket_path = "/tmp/sentry-core.sock"
//! fifo_framing = "nul"
//! poll_interval_ms = 5
//! ```
//!
//! Every key is optional; unknown keys are rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use transport::{align_forward, DEFAULT_ALIGNMENT, SLAB_HEADER_SIZE, SLAB_STACK_ENTRY_SIZE};
use transport_channel::{Framing, RetryPolicy};

/// Errors raised while loading or validating a [`BusConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is unusable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Paths, sizes and timings shared by every process on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Local socket endpoint served by the core.
    pub socket_path: PathBuf,
    /// Named pipe path.
    pub fifo_path: PathBuf,
    /// Terminator appended to named-pipe reads.
    pub fifo_framing: Framing,
    /// Size of the process backing buffer.
    pub region_bytes: usize,
    /// Payload size of every slab in the process recycling stack.
    pub slab_payload_bytes: usize,
    /// Number of slabs the recycling stack can hold.
    pub slab_stack_capacity: usize,
    /// Control-loop sleep between polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Socket connect attempts before giving up.
    pub connect_attempts: u32,
    /// Delay between connect attempts, in milliseconds.
    pub connect_delay_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/sentry-core.sock"),
            fifo_path: PathBuf::from("/tmp/sentry-core.fifo"),
            fifo_framing: Framing::Newline,
            region_bytes: 64 * 1024,
            slab_payload_bytes: 1024,
            slab_stack_capacity: 8,
            poll_interval_ms: 10,
            connect_attempts: 50,
            connect_delay_ms: 100,
        }
    }
}

impl BusConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BusConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        log::info!("loaded bus config from {}", path.display());
        Ok(config)
    }

    /// Rejects sizes that cannot produce a working process context.
    ///
    /// The region must hold the recycling stack entries followed by one
    /// slab, header and alignment padding included, and the padding must
    /// leave the slab more payload than it takes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_owned(),
            })
        };

        if self.region_bytes == 0 {
            return invalid("region_bytes", "must be non-zero");
        }
        if self.slab_payload_bytes == 0 {
            return invalid("slab_payload_bytes", "must be non-zero");
        }
        if self.slab_stack_capacity == 0 {
            return invalid("slab_stack_capacity", "must be non-zero");
        }
        if self.connect_attempts == 0 {
            return invalid("connect_attempts", "must be non-zero");
        }

        // Mirrors the carve order of `ProcessMemory`: stack entries first, then the slab.
        let header_end = self
            .slab_stack_capacity
            .checked_mul(SLAB_STACK_ENTRY_SIZE)
            .and_then(|stack_bytes| align_forward(stack_bytes, DEFAULT_ALIGNMENT))
            .and_then(|slab_start| slab_start.checked_add(SLAB_HEADER_SIZE));
        let Some(header_end) = header_end else {
            return invalid("slab_stack_capacity", "stack size overflows");
        };
        let padding =
            align_forward(header_end, DEFAULT_ALIGNMENT).map_or(0, |start| start - header_end);
        if padding >= self.slab_payload_bytes.saturating_sub(padding) {
            return Err(ConfigError::Invalid {
                field: "slab_payload_bytes",
                reason: format!(
                    "{padding} bytes of alignment padding leave too little of {} payload bytes",
                    self.slab_payload_bytes
                ),
            });
        }
        let needed = header_end.saturating_add(self.slab_payload_bytes);
        if needed > self.region_bytes {
            return Err(ConfigError::Invalid {
                field: "slab_payload_bytes",
                reason: format!(
                    "{} stack entries and one slab need {needed} bytes, region has {}",
                    self.slab_stack_capacity, self.region_bytes
                ),
            });
        }
        Ok(())
    }

    /// Sleep between two control-loop iterations.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Connect retry budget for the socket client.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts,
            delay: Duration::from_millis(self.connect_delay_ms),
        }
    }
}
