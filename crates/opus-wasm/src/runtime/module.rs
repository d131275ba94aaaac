//! Engine setup, module compilation and instantiation.
//!
//! Uses wasmtime-wasi preview1 because wasi-sdk builds of libopus import it.

use std::path::Path;
use std::time::Instant;

use wasmtime::*;

use super::instance::{CodecInstance, HostState};
use super::protocol;
use crate::config::{RuntimeConfig, WasiCapabilities};
use crate::error::{OpusError, Result};

/// The compiled codec module together with the engine that owns it.
///
/// Immutable after construction and shared by every instance slot.
pub struct SandboxModule {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    config: RuntimeConfig,
}

impl SandboxModule {
    /// Create an engine for `config` and compile `bytes` (binary or WAT).
    pub fn compile(bytes: &[u8], config: &RuntimeConfig) -> Result<Self> {
        let engine = Self::build_engine(config)?;

        let start = Instant::now();
        let module = Module::new(&engine, bytes)
            .map_err(|e| OpusError::Compile(format!("module creation failed: {}", e)))?;
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            size = bytes.len(),
            "compiled codec module"
        );

        // Create linker and add WASI preview1 functions
        let mut linker: Linker<HostState> = Linker::new(&engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| state.preview1())
            .map_err(|e| OpusError::Instantiate(format!("WASI link failed: {}", e)))?;

        Ok(Self {
            engine,
            module,
            linker,
            config: config.clone(),
        })
    }

    /// Read a module from disk and compile it.
    pub fn from_file(path: impl AsRef<Path>, config: &RuntimeConfig) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| OpusError::Compile(format!("failed to read {:?}: {}", path, e)))?;
        Self::compile(&bytes, config)
    }

    fn build_engine(config: &RuntimeConfig) -> Result<Engine> {
        let mut engine_config = Config::new();

        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            _ => OptLevel::Speed,
        });
        engine_config.wasm_simd(config.enable_simd);

        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        Engine::new(&engine_config)
            .map_err(|e| OpusError::Compile(format!("engine creation failed: {}", e)))
    }

    /// Protocol entries that are absent or mistyped in this module.
    pub fn missing_exports(&self) -> Vec<String> {
        protocol::missing_exports(&self.module)
    }

    /// Instantiate the module with a fresh store for pool slot `slot`.
    pub fn instantiate(&self, slot: usize) -> Result<CodecInstance> {
        let start = Instant::now();
        let host_state = self.build_host_state(&self.config.capabilities);
        let mut store = Store::new(&self.engine, host_state);

        // Configure resource limits via the stored limiter
        store.limiter(|state| state.limits());

        let instance = self
            .linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| OpusError::Instantiate(format!("instantiation failed: {}", e)))?;

        let instance = CodecInstance::new(store, instance, self.config.fuel_limit, slot)?;
        tracing::debug!(
            slot,
            elapsed_us = start.elapsed().as_micros() as u64,
            "instantiated codec module"
        );
        Ok(instance)
    }

    /// Build host state from capabilities.
    fn build_host_state(&self, caps: &WasiCapabilities) -> HostState {
        let mut builder = wasmtime_wasi::WasiCtxBuilder::new();

        if caps.stdout {
            builder.inherit_stdout();
        }
        if caps.stderr {
            builder.inherit_stderr();
        }
        for (key, value) in &caps.env_vars {
            builder.env(key, value);
        }
        builder.args(&["opus"]);

        // Build the preview2 context and wrap it for preview1 compatibility
        let preview1 = builder.build_p1();

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .instances(1)
            .build();

        HostState::new(preview1, limits)
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }
}
