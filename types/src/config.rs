//! Sequencer configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sesame_merkle::WorldStateConfig;
use std::path::Path;
use std::time::Duration;

/// Configuration for one sequencer pipeline instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Transactions per inner rollup (`K`). Underfilled time-triggered
    /// batches are padded with no-op transactions up to this count.
    pub num_inner_txs: usize,

    /// Inner rollups per outer rollup (`M`).
    pub num_outer_proofs: usize,

    /// Cut a batch this long after the oldest queued item arrived, even if
    /// underfilled. Bounds worst-case latency in low-traffic periods.
    pub publish_interval_ms: u64,

    /// Requeue a transaction at most this many times before marking it
    /// permanently rejected.
    pub max_tx_retries: u32,

    /// How many recent historical data roots a transaction proof may
    /// anchor to before it is rejected as stale.
    pub root_history_retention: usize,

    /// Worker pool size.
    pub worker_count: usize,

    /// Maximum multi-scalar-multiplication chunk per worker dispatch.
    pub msm_chunk_size: usize,

    /// FFT domains smaller than this run on a single worker.
    pub fft_parallel_threshold: usize,

    /// Maximum transactions queued in the intake queue.
    pub intake_capacity: usize,

    /// Bounded capacity of the chain-event channel.
    pub event_channel_capacity: usize,

    /// Initial publication retry backoff.
    pub publish_backoff_base_ms: u64,

    /// Publication retry backoff cap.
    pub publish_backoff_max_ms: u64,

    /// Accumulator depths.
    pub world_state: WorldStateConfig,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            num_inner_txs: 8,
            num_outer_proofs: 4,
            publish_interval_ms: 60_000,
            max_tx_retries: 3,
            root_history_retention: 64,
            worker_count: 4,
            msm_chunk_size: 1 << 14,
            fft_parallel_threshold: 1 << 10,
            intake_capacity: 1024,
            event_channel_capacity: 256,
            publish_backoff_base_ms: 500,
            publish_backoff_max_ms: 30_000,
            world_state: WorldStateConfig::default(),
        }
    }
}

impl SequencerConfig {
    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.num_inner_txs > 0, "num_inner_txs must be non-zero");
        anyhow::ensure!(self.num_outer_proofs > 0, "num_outer_proofs must be non-zero");
        anyhow::ensure!(self.worker_count > 0, "worker_count must be non-zero");
        anyhow::ensure!(self.intake_capacity > 0, "intake_capacity must be non-zero");
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn publish_backoff_base(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_base_ms)
    }

    pub fn publish_backoff_max(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SequencerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SequencerConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SequencerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.num_inner_txs, config.num_inner_txs);
        assert_eq!(
            parsed.world_state.data_tree_depth,
            config.world_state.data_tree_depth
        );
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = SequencerConfig {
            num_inner_txs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
