//! Multiplexer settings (`[mux]` in `tether.toml`)

use crate::error::{MuxError, MuxResult};
use serde::{Deserialize, Serialize};

/// Default ready-event buffer capacity
pub const DEFAULT_MAX_EVENT: usize = 64;

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 128;

/// Largest accepted `max_event`; the event buffer is allocated up front
pub const MAX_EVENT_LIMIT: usize = 65_536;

/// Sizing of an `EventMgr`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Most ready events a single `wait` reports
    pub max_event: usize,

    /// Backlog used when `listen` is called without one
    pub backlog: i32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_event: DEFAULT_MAX_EVENT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl MuxConfig {
    /// Check that both settings are in range
    pub fn validate(&self) -> MuxResult<()> {
        if self.max_event == 0 || self.max_event > MAX_EVENT_LIMIT {
            return Err(MuxError::Config {
                message: format!(
                    "max_event must be between 1 and {}, got {}",
                    MAX_EVENT_LIMIT, self.max_event
                ),
            });
        }
        if self.backlog <= 0 {
            return Err(MuxError::Config {
                message: format!("backlog must be positive, got {}", self.backlog),
            });
        }
        Ok(())
    }
}
