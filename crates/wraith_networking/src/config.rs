//! # Netcode Configuration
//!
//! Loaded once at startup from TOML. Every key is optional.
//!
//! ```toml
//! tick_rate = 60
//! max_frame_bytes = 1200
//! command_redundancy = 4
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{NetError, NetResult};
use crate::protocol::FrameHeader;

/// Largest frame the transport seam accepts.
pub const MAX_FRAME_LIMIT: usize = 64 * 1024;

/// Replication tuning shared by server and clients.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetcodeConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Maximum bytes per snapshot or command packet.
    pub max_frame_bytes: usize,
    /// Entries kept per ghost history.
    pub history_capacity: usize,
    /// Ticks a command stays buffered.
    pub command_retention_ticks: u32,
    /// Ticks of commands resent in every command packet.
    pub command_redundancy: u32,
    /// Ticks between resends of an unacknowledged static ghost.
    pub static_resend_interval: u32,
    /// Ticks a spawn request waits before the default classifier claims it.
    pub spawn_classification_delay: u32,
    /// Maximum spawn tick distance for matching a predicted spawn.
    pub predicted_spawn_tick_window: u32,
    /// Ticks an unconfirmed predicted spawn survives.
    pub predicted_spawn_timeout: u32,
    /// Despawn notices per frame.
    pub max_despawns_per_frame: usize,
}

impl Default for NetcodeConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::WRAITH_TICK_RATE,
            max_frame_bytes: crate::MAX_PACKET_SIZE,
            history_capacity: 32,
            command_retention_ticks: 64,
            command_redundancy: 4,
            static_resend_interval: 8,
            spawn_classification_delay: 0,
            predicted_spawn_tick_window: 5,
            predicted_spawn_timeout: 64,
            max_despawns_per_frame: 64,
        }
    }
}

impl NetcodeConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`NetError::Config`] on a parse error or an invalid value.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| NetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`NetError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NetError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded netcode config from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`NetError::Config`] naming the first invalid key.
    pub fn validate(&self) -> NetResult<()> {
        let fail = |msg: &str| Err(NetError::Config(msg.to_owned()));
        if self.tick_rate == 0 {
            return fail("tick_rate must be positive");
        }
        if self.max_frame_bytes <= FrameHeader::SIZE || self.max_frame_bytes > MAX_FRAME_LIMIT {
            return fail("max_frame_bytes must exceed the frame header and be at most 64 KiB");
        }
        if self.history_capacity == 0 {
            return fail("history_capacity must be positive");
        }
        if self.command_retention_ticks == 0 {
            return fail("command_retention_ticks must be positive");
        }
        if self.command_redundancy > self.command_retention_ticks {
            return fail("command_redundancy exceeds command_retention_ticks");
        }
        if self.static_resend_interval == 0 {
            return fail("static_resend_interval must be positive");
        }
        if self.max_despawns_per_frame == 0 {
            return fail("max_despawns_per_frame must be positive");
        }
        Ok(())
    }
}
