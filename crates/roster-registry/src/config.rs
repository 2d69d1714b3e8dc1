//! Registry configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the sourced registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Per-subscriber buffer capacity. A subscriber whose live tail falls
    /// this many notifications behind is terminated as a slow consumer.
    pub subscriber_buffer_high_watermark: usize,

    /// Synthetic eviction quota granted once when the controller starts,
    /// before the first grant arrives from the quota source.
    pub eviction_quota_initial: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_high_watermark: 1024,
            eviction_quota_initial: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RegistryConfig::default();
        assert!(config.subscriber_buffer_high_watermark > 0);
        assert_eq!(config.eviction_quota_initial, 0);
    }
}
