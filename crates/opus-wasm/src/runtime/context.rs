//! The shared execution context: one compiled module, a pool of instances,
//! the constants table and the error message cache.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use super::instance::CodecInstance;
use super::module::SandboxModule;
use super::pool::{InstanceGuard, InstancePool};
use super::protocol::{Entry, OpusConstants};
use crate::config::RuntimeConfig;
use crate::error::{CodecError, OpusError, Result};

/// How long release and close wait for a busy instance slot.
pub(crate) const SLOT_WAIT: Duration = Duration::from_secs(1);

/// Everything produced by the one-time startup sequence.
struct Bootstrap {
    module: SandboxModule,
    constants: OpusConstants,
    version: String,
    pool: InstancePool,
}

pub(crate) struct ContextInner {
    config: RuntimeConfig,
    source: Mutex<Option<Vec<u8>>>,
    boot: OnceLock<Result<Bootstrap>>,
    closed: AtomicBool,
    messages: Mutex<HashMap<i32, String>>,
}

/// Handle to a loaded codec module and its instance pool.
///
/// Cheap to clone; encoders and decoders keep a clone so the context outlives
/// them. Startup (compile, export validation, first instantiation, constant
/// loading) runs exactly once, either eagerly in [`open`](Self::open) or on
/// first use after [`new`](Self::new). A failed startup is remembered and the
/// same error is returned to every later caller.
#[derive(Clone)]
pub struct CodecContext {
    inner: Arc<ContextInner>,
}

impl CodecContext {
    /// Create a context that compiles `wasm` on first use.
    pub fn new(wasm: impl Into<Vec<u8>>, config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                source: Mutex::new(Some(wasm.into())),
                boot: OnceLock::new(),
                closed: AtomicBool::new(false),
                messages: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a context and run startup immediately.
    pub fn open(wasm: impl Into<Vec<u8>>, config: RuntimeConfig) -> Result<Self> {
        let context = Self::new(wasm, config);
        context.init()?;
        Ok(context)
    }

    /// Read a module from disk and [`open`](Self::open) it.
    pub fn from_file(path: impl AsRef<Path>, config: RuntimeConfig) -> Result<Self> {
        let path = path.as_ref();
        let wasm = std::fs::read(path)
            .map_err(|e| OpusError::Compile(format!("failed to read {:?}: {}", path, e)))?;
        Self::open(wasm, config)
    }

    /// Run startup if it has not happened yet. Idempotent.
    pub fn init(&self) -> Result<()> {
        self.inner.boot().map(|_| ())
    }

    /// Borrow any instance for raw calls, waiting if all of them are busy.
    ///
    /// A lease holds its instance's lock until dropped. Creating, using or
    /// releasing a handle bound to the same slot from the thread holding the
    /// lease cannot proceed: operations block on the lock, while release and
    /// [`close`](Self::close) give up after a bounded wait and report it.
    pub fn acquire(&self) -> Result<InstanceLease<'_>> {
        let boot = self.inner.boot()?;
        let guard = boot.pool.checkout_any(&boot.module)?;
        Ok(InstanceLease {
            guard,
            boot,
            context: &self.inner,
        })
    }

    /// Borrow the instance in a specific slot, instantiating it if needed.
    pub(crate) fn lease(&self, slot: usize) -> Result<InstanceLease<'_>> {
        let boot = self.inner.boot()?;
        let guard = boot.pool.checkout(slot, &boot.module)?;
        Ok(InstanceLease {
            guard,
            boot,
            context: &self.inner,
        })
    }

    /// Like [`lease`](Self::lease) but gives up after [`SLOT_WAIT`].
    pub(crate) fn lease_within(&self, slot: usize) -> Result<Option<InstanceLease<'_>>> {
        let boot = self.inner.boot()?;
        let guard = boot.pool.checkout_within(slot, &boot.module, SLOT_WAIT)?;
        Ok(guard.map(|guard| InstanceLease {
            guard,
            boot,
            context: &self.inner,
        }))
    }

    /// Bind a new handle to a slot.
    pub(crate) fn bind(&self) -> Result<usize> {
        Ok(self.inner.boot()?.pool.assign())
    }

    /// Give back a slot binding taken with [`bind`](Self::bind).
    pub(crate) fn unbind(&self, slot: usize) {
        if let Some(Ok(boot)) = self.inner.boot.get() {
            boot.pool.unassign(slot);
        }
    }

    /// Version string reported by the codec module.
    pub fn version(&self) -> Result<String> {
        Ok(self.inner.boot()?.version.clone())
    }

    /// Human readable description of a result code, via `opus_strerror`.
    ///
    /// Unlike [`CodecError::message`] this waits for an instance and reports
    /// failures instead of falling back to a placeholder.
    pub fn describe(&self, code: i32) -> Result<String> {
        if self.is_closed() {
            return Err(OpusError::ContextClosed);
        }
        if let Some(message) = self.inner.messages.lock().get(&code) {
            return Ok(message.clone());
        }

        let mut lease = self.acquire()?;
        let message = ContextInner::strerror(&mut lease, code)?;
        drop(lease);

        self.inner.messages.lock().insert(code, message.clone());
        Ok(message)
    }

    /// Numeric constants published by the module.
    pub fn constants(&self) -> Result<OpusConstants> {
        Ok(self.inner.boot()?.constants)
    }

    /// Drop every instance. Handles and leases taken afterwards fail with
    /// [`OpusError::ContextClosed`]; releasing a handle is still allowed.
    ///
    /// Waits for in-flight operations on each instance to complete. A slot
    /// still leased after about a second keeps its instance until the last
    /// clone of the context is dropped.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.source.lock().take();
        if let Some(Ok(boot)) = self.inner.boot.get() {
            boot.pool.close(SLOT_WAIT);
        }
        tracing::info!("codec context closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Configured number of instance slots.
    pub fn pool_size(&self) -> usize {
        self.inner.config.pool_size
    }

    /// Number of live handles bound to each slot. Empty before startup.
    pub fn slot_load(&self) -> Vec<usize> {
        match self.inner.boot.get() {
            Some(Ok(boot)) => boot.pool.load(),
            _ => Vec::new(),
        }
    }

    /// Runtime configuration the context was created with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }
}

impl fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.boot.get() {
            _ if self.is_closed() => "closed",
            Some(Ok(_)) => "ready",
            Some(Err(_)) => "failed",
            None => "pending",
        };
        f.debug_struct("CodecContext")
            .field("pool_size", &self.inner.config.pool_size)
            .field("state", &state)
            .finish()
    }
}

impl ContextInner {
    fn boot(&self) -> Result<&Bootstrap> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OpusError::ContextClosed);
        }

        let boot = self
            .boot
            .get_or_init(|| {
                let wasm = self.source.lock().take().ok_or(OpusError::ContextClosed)?;
                Self::bootstrap(&wasm, &self.config)
            })
            .as_ref()
            .map_err(|e| e.clone())?;

        // A close that raced with startup must still win.
        if self.closed.load(Ordering::Acquire) {
            boot.pool.close(SLOT_WAIT);
            return Err(OpusError::ContextClosed);
        }
        Ok(boot)
    }

    fn bootstrap(wasm: &[u8], config: &RuntimeConfig) -> Result<Bootstrap> {
        config.validate()?;

        let module = SandboxModule::compile(wasm, config)?;
        let missing = module.missing_exports();
        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), "codec module rejected");
            return Err(OpusError::MissingExports(missing));
        }

        let mut first = module.instantiate(0)?;
        let constants = OpusConstants::load(&mut first)?;
        let version_ptr = first.call(Entry::VersionString, &[])?;
        let version = first.read_c_string(version_ptr as u32)?;

        let pool = InstancePool::new(config.pool_size);
        pool.seed(first);

        tracing::info!(
            pool_size = config.pool_size,
            %version,
            max_memory = config.max_memory,
            fuel_limit = ?config.fuel_limit,
            "codec context ready"
        );

        Ok(Bootstrap {
            module,
            constants,
            version,
            pool,
        })
    }

    fn strerror(instance: &mut CodecInstance, code: i32) -> Result<String> {
        let ptr = instance.call(Entry::Strerror, &[code])?;
        instance.read_c_string(ptr as u32)
    }

    /// Resolve a message without ever blocking.
    ///
    /// Used from error formatting, which may run while the caller still holds
    /// a lease on some instance.
    pub(crate) fn try_describe(&self, code: i32) -> Option<String> {
        if let Some(message) = self.messages.lock().get(&code) {
            return Some(message.clone());
        }
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        let boot = self.boot.get()?.as_ref().ok()?;
        let mut guard = boot.pool.try_checkout_ready()?;
        let message = match Self::strerror(&mut guard, code) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(code, "could not resolve error message: {}", e);
                return None;
            }
        };
        drop(guard);

        self.messages.lock().insert(code, message.clone());
        Some(message)
    }
}

/// Exclusive use of one instance, released when dropped.
///
/// Dereferences to [`CodecInstance`] for raw calls and memory access. Do not
/// drive handles from the thread holding a lease; see
/// [`CodecContext::acquire`].
pub struct InstanceLease<'a> {
    guard: InstanceGuard<'a>,
    boot: &'a Bootstrap,
    context: &'a Arc<ContextInner>,
}

impl InstanceLease<'_> {
    /// Constants published by the module.
    pub fn constants(&self) -> &OpusConstants {
        &self.boot.constants
    }

    /// Turn a negative result code into an [`OpusError::Codec`], passing
    /// non-negative values through.
    pub fn check(&self, code: i32) -> Result<i32> {
        if code >= 0 {
            return Ok(code);
        }
        let kind = self.boot.constants.classify(code);
        tracing::debug!(code, %kind, slot = self.guard.slot(), "codec returned an error");
        Err(CodecError::new(code, kind, Arc::downgrade(self.context)).into())
    }
}

impl Deref for InstanceLease<'_> {
    type Target = CodecInstance;

    fn deref(&self) -> &CodecInstance {
        &self.guard
    }
}

impl DerefMut for InstanceLease<'_> {
    fn deref_mut(&mut self) -> &mut CodecInstance {
        &mut self.guard
    }
}
