//! # Allocator Configuration
//!
//! Plain data, loaded once at startup (optionally from a TOML file).

use serde::{Deserialize, Serialize};

use crate::error::{InitError, PoolError, PoolResult};
use crate::tlsf::{BLOCK_OVERHEAD, MAX_SECOND_LEVEL_EXPONENT};

/// Tuning for one TLSF allocator core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsfConfig {
    /// log2 of the number of sub-buckets per size class (1..=5).
    ///
    /// Also fixes the minimum block size at `1 << second_level_exponent`.
    pub second_level_exponent: u32,
}

impl Default for TlsfConfig {
    fn default() -> Self {
        Self {
            second_level_exponent: 3,
        }
    }
}

impl TlsfConfig {
    /// Smallest payload a block can carry with this configuration.
    #[inline]
    #[must_use]
    pub const fn min_block_size(&self) -> u64 {
        1 << self.second_level_exponent
    }

    /// Smallest arena this configuration can bootstrap: two sentinels plus
    /// one minimum-size free block.
    #[inline]
    #[must_use]
    pub const fn min_arena_size(&self) -> u64 {
        3 * BLOCK_OVERHEAD as u64 + self.min_block_size()
    }

    /// Checks the exponent range.
    ///
    /// # Errors
    ///
    /// [`InitError::InvalidSecondLevelExponent`] for 0 or anything above 5.
    pub const fn validate(&self) -> Result<(), InitError> {
        if self.second_level_exponent == 0 || self.second_level_exponent > MAX_SECOND_LEVEL_EXPONENT {
            return Err(InitError::InvalidSecondLevelExponent {
                exponent: self.second_level_exponent,
                max: MAX_SECOND_LEVEL_EXPONENT,
            });
        }
        Ok(())
    }
}

/// Configuration for an [`crate::ArenaPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Arena size in bytes, reserved once when the pool is created.
    pub arena_size: u64,
    /// Second-level exponent handed to the allocator core.
    pub second_level_exponent: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            arena_size: 1024 * 1024, // 1 MiB
            second_level_exponent: TlsfConfig::default().second_level_exponent,
        }
    }
}

impl PoolConfig {
    /// Small arena for per-system scratch data (64 KiB).
    #[must_use]
    pub const fn small() -> Self {
        Self {
            arena_size: 64 * 1024,
            second_level_exponent: 3,
        }
    }

    /// Large arena for streaming assets (64 MiB), finer size classes to keep
    /// internal fragmentation down on big blocks.
    #[must_use]
    pub const fn large() -> Self {
        Self {
            arena_size: 64 * 1024 * 1024,
            second_level_exponent: 5,
        }
    }

    /// The core configuration carried by this pool configuration.
    #[inline]
    #[must_use]
    pub const fn tlsf(&self) -> TlsfConfig {
        TlsfConfig {
            second_level_exponent: self.second_level_exponent,
        }
    }

    /// Parses a pool configuration from TOML text.
    ///
    /// Missing keys fall back to [`PoolConfig::default`].
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfig`] if the text is not valid TOML for this
    /// structure.
    pub fn from_toml_str(text: &str) -> PoolResult<Self> {
        toml::from_str(text).map_err(|e| PoolError::InvalidConfig(format!("Failed to parse pool config: {e}")))
    }
}
