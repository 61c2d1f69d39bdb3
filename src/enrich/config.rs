//! Configuration for enrichment runs

use serde::{Deserialize, Serialize};

/// Number of retries after a first failed attempt (default: 3)
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for one enrichment orchestration pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Maximum number of lookups in flight at once (default: available parallelism)
    pub concurrency: usize,
    /// Retries after a transient failure before giving up on an address
    pub max_retries: u32,
    /// Optional cap on the number of addresses processed per run
    pub max_addresses: Option<usize>,
    /// Clear the whole cache before running, re-fetching everything
    pub force_refresh: bool,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_addresses: None,
            force_refresh: false,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

impl EnrichConfig {
    /// Create a new EnrichConfig builder
    pub fn builder() -> EnrichConfigBuilder {
        EnrichConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.max_addresses == Some(0) {
            return Err("max_addresses must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

/// Builder for EnrichConfig
pub struct EnrichConfigBuilder {
    config: EnrichConfig,
}

impl EnrichConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: EnrichConfig::default(),
        }
    }

    /// Set the in-flight lookup bound
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the retry budget per address
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Cap the number of addresses processed per run
    pub fn max_addresses(mut self, max: usize) -> Self {
        self.config.max_addresses = Some(max);
        self
    }

    /// Clear the cache before running
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.config.force_refresh = force;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<EnrichConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EnrichConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
