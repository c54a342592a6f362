use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use crumble_gen::coords::{check_biome_count, check_resolution};
use log::{error, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    /// Chunk slots per row, odd.
    pub grid_width: usize,
    /// Chunk slots per column, odd.
    pub grid_height: usize,
    /// Edge length of a chunk in world units.
    pub chunk_size: f32,
    /// Samples per chunk edge.
    pub resolution: u32,
    pub biome_count: u32,
    pub fetch_timeout_ms: u64,
    pub save_timeout_ms: u64,
    pub max_fetch_attempts: u32,
    pub max_concurrent_fetches: usize,
    pub colorize_per_tick: usize,
    pub max_batch_size: usize,
    pub save_interval_ticks: u32,
    pub snapshot_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:4000".to_string(),
            grid_width: 5,
            grid_height: 5,
            chunk_size: 256.0,
            resolution: 256,
            biome_count: 6,
            fetch_timeout_ms: 5000,
            save_timeout_ms: 5000,
            max_fetch_attempts: 5,
            max_concurrent_fetches: 8,
            colorize_per_tick: 2,
            max_batch_size: 8,
            save_interval_ticks: 60,
            snapshot_interval_ms: 5000,
        }
    }
}

impl ClientConfig {
    /// Read a TOML config. A missing file yields the defaults, so does a
    /// malformed one (after logging why).
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| toml::from_str::<ClientConfig>(&text).map_err(anyhow::Error::from))
            .and_then(|config| config.validate().map(|_| config));

        match parsed {
            Ok(config) => {
                info!("Loaded client config from {}", path.display());
                config
            }
            Err(e) => {
                error!("Failed to load {}: {:#}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_width % 2 == 0 || self.grid_height % 2 == 0 {
            bail!("grid must have odd dimensions, got {}x{}", self.grid_width, self.grid_height);
        }
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            bail!("chunk_size must be positive, got {}", self.chunk_size);
        }
        check_resolution(self.resolution)?;
        check_biome_count(self.biome_count)?;
        if self.max_fetch_attempts == 0 || self.max_concurrent_fetches == 0 || self.max_batch_size == 0 {
            bail!("fetch attempts, concurrent fetches and batch size must be at least 1");
        }
        Ok(())
    }

    pub fn half_width(&self) -> i32 {
        (self.grid_width / 2) as i32
    }

    pub fn half_height(&self) -> i32 {
        (self.grid_height / 2) as i32
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str("grid_width = 7\nresolution = 64\n").unwrap();
        assert_eq!(config.grid_width, 7);
        assert_eq!(config.resolution, 64);
        assert_eq!(config.grid_height, 5);
        assert_eq!(config.max_batch_size, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_even_grid_rejected() {
        let config = ClientConfig {
            grid_width: 4,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("crumble-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        assert_eq!(ClientConfig::load(&dir.join("missing.toml")), ClientConfig::default());

        let bad = dir.join("bad.toml");
        std::fs::write(&bad, "grid_width = \"wide\"").unwrap();
        assert_eq!(ClientConfig::load(&bad), ClientConfig::default());

        let good = dir.join("good.toml");
        std::fs::write(&good, "biome_count = 3").unwrap();
        assert_eq!(ClientConfig::load(&good).biome_count, 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
