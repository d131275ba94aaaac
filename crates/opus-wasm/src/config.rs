//! Configuration for the codec runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OpusError, Result};

/// WASI capability grants for codec instances.
///
/// libopus needs nothing from the outside world, so everything starts
/// disabled. Stdio can be opened up to see diagnostics from debug builds of
/// the module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasiCapabilities {
    /// Allow access to stdout
    pub stdout: bool,

    /// Allow access to stderr
    pub stderr: bool,

    /// Environment variables to expose
    pub env_vars: Vec<(String, String)>,
}

impl WasiCapabilities {
    /// Create capabilities with nothing allowed (maximum isolation)
    pub fn none() -> Self {
        Self::default()
    }

    /// Create capabilities with stdout/stderr inherited from the host
    pub fn with_stdio() -> Self {
        Self {
            stdout: true,
            stderr: true,
            ..Default::default()
        }
    }

    /// Builder: enable stdout
    pub fn stdout(mut self, allow: bool) -> Self {
        self.stdout = allow;
        self
    }

    /// Builder: enable stderr
    pub fn stderr(mut self, allow: bool) -> Self {
        self.stderr = allow;
        self
    }

    /// Builder: add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

/// Configuration for a [`CodecContext`](crate::CodecContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// WASI capability configuration
    pub capabilities: WasiCapabilities,

    /// Maximum linear memory per instance in bytes (default = 64MB)
    pub max_memory: usize,

    /// Fuel budget granted to every single sandbox call
    pub fuel_limit: Option<u64>,

    /// Cranelift optimization level (0-3)
    pub optimization_level: u8,

    /// Enable SIMD support
    pub enable_simd: bool,

    /// Wasmtime cache configuration file for compiled modules
    pub cache_path: Option<PathBuf>,

    /// Number of instance slots; handles are spread across them
    pub pool_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            capabilities: WasiCapabilities::none(),
            max_memory: 64 * 1024 * 1024, // 64 MB
            fuel_limit: None,
            optimization_level: 2,
            enable_simd: true,
            cache_path: None,
            pool_size: 4,
        }
    }
}

impl RuntimeConfig {
    /// A single small instance with a per-call fuel budget
    pub fn minimal() -> Self {
        Self {
            max_memory: 16 * 1024 * 1024, // 16 MB
            fuel_limit: Some(500_000_000),
            pool_size: 1,
            ..Default::default()
        }
    }

    /// One slot per available core, fully optimized
    pub fn realtime() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            optimization_level: 3,
            pool_size: cores.clamp(1, 16),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OpusError::Config(format!("invalid runtime config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| OpusError::Config(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_json(&json)
    }

    /// Check invariants the runtime relies on.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(OpusError::Config("pool_size must be at least 1".to_string()));
        }
        if self.fuel_limit == Some(0) {
            return Err(OpusError::Config("fuel_limit of 0 would trap every call".to_string()));
        }
        Ok(())
    }

    /// Builder: set capabilities
    pub fn capabilities(mut self, caps: WasiCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set per-call fuel limit
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: enable SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Builder: set the number of instance slots
    pub fn pool_size(mut self, slots: usize) -> Self {
        self.pool_size = slots;
        self
    }
}
