//! Sandbox and wallet configuration.

use std::str::FromStr;
use std::time::Duration;

use webz_primitives::Network;

use crate::error::SandboxError;

/// Bytes per linear memory page.
pub const WASM_PAGE_SIZE: u64 = 65_536;

/// Largest page count a 32-bit linear memory can address.
pub const MAX_ADDRESSABLE_PAGES: u32 = 65_536;

/// Configuration for the shared linear memory and its worker contexts.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Pages committed when the sandbox starts (1 page = 64 KiB).
    /// Default: 840 pages, a little over 52 MiB.
    pub initial_memory_pages: u32,

    /// Upper bound on memory growth.
    /// Default: 16384 pages = 1 GiB.
    pub max_memory_pages: u32,

    /// Stack size for each worker thread.
    pub worker_stack_size: usize,

    /// Worker threads are named `{prefix}{index}`.
    pub worker_name_prefix: String,

    /// Largest pool `init_thread_pool` will build.
    pub max_workers: usize,

    /// How long pool bootstrap waits for every worker to report ready.
    pub bootstrap_timeout: Duration,

    /// Text-format worker image to attach with instead of the built-in one.
    /// It must import `env.memory` as a shared memory and export
    /// `worker_attach` and `worker_detach`, both `(param i32)`.
    pub worker_image: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            initial_memory_pages: 840,
            max_memory_pages: 16_384,
            worker_stack_size: 2 * 1024 * 1024,
            worker_name_prefix: "webz-worker-".into(),
            max_workers: 256,
            bootstrap_timeout: Duration::from_secs(30),
            worker_image: None,
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.initial_memory_pages == 0 {
            return Err(SandboxError::Config("initial_memory_pages must be at least 1".into()));
        }
        if self.initial_memory_pages > self.max_memory_pages {
            return Err(SandboxError::Config(format!(
                "initial_memory_pages ({}) exceeds max_memory_pages ({})",
                self.initial_memory_pages, self.max_memory_pages
            )));
        }
        if self.max_memory_pages > MAX_ADDRESSABLE_PAGES {
            return Err(SandboxError::Config(format!(
                "max_memory_pages ({}) exceeds the 32-bit limit of {MAX_ADDRESSABLE_PAGES}",
                self.max_memory_pages
            )));
        }
        if self.max_workers == 0 {
            return Err(SandboxError::Config("max_workers must be at least 1".into()));
        }
        if self.worker_stack_size < 64 * 1024 {
            return Err(SandboxError::Config(format!(
                "worker_stack_size ({}) is below 64 KiB",
                self.worker_stack_size
            )));
        }
        Ok(())
    }
}

/// Configuration for one [`WebWallet`](crate::WebWallet).
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// `"main"` or `"test"`.
    pub network: String,

    /// Block-data service this wallet was pointed at. Informational; the
    /// connection itself is the [`BlockSource`](webz_hostapi::BlockSource)
    /// handed to the wallet.
    pub service_url: String,

    /// Confirmations before received funds count as spendable. Must be
    /// non-zero.
    pub min_confirmations: u32,

    /// Blocks fetched and scanned per sync step.
    pub scan_batch_size: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: "main".into(),
            service_url: "https://zcash-mainnet.chainsafe.dev".into(),
            min_confirmations: 10,
            scan_batch_size: 100,
        }
    }
}

impl WalletConfig {
    /// Defaults for the test network, pointed at `service_url`.
    pub fn testnet(service_url: impl Into<String>) -> Self {
        Self {
            network: "test".into(),
            service_url: service_url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        Network::from_str(&self.network).map_err(|e| SandboxError::Config(e.message))?;
        if self.min_confirmations == 0 {
            return Err(SandboxError::Config(
                "min_confirmations must be non-zero".into(),
            ));
        }
        if self.scan_batch_size == 0 {
            return Err(SandboxError::Config("scan_batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.initial_memory_pages, 840);
        assert_eq!(config.max_memory_pages, 16_384);
        assert!(config.worker_image.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_memory_bounds_validated() {
        let mut config = SandboxConfig::default();
        config.initial_memory_pages = 20_000;
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));

        let mut config = SandboxConfig::default();
        config.max_memory_pages = 70_000;
        assert!(config.validate().is_err());

        let mut config = SandboxConfig::default();
        config.initial_memory_pages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wallet_config_rejects_zero_confirmations() {
        let mut config = WalletConfig::testnet("http://localhost:9067");
        config.validate().unwrap();
        config.min_confirmations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_confirmations"));
    }

    #[test]
    fn test_wallet_config_rejects_unknown_network() {
        let config = WalletConfig {
            network: "regtest".into(),
            ..WalletConfig::default()
        };
        assert!(matches!(config.validate(), Err(SandboxError::Config(_))));
    }
}
