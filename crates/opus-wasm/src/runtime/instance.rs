//! One live instantiation of the codec module.

use std::collections::HashMap;
use std::time::Instant;

use wasmtime::{Func, Instance, Memory, Store, StoreLimits, Trap, Val};

use super::protocol::{Entry, MEMORY_EXPORT};
use crate::error::{OpusError, Result};

/// Upper bound on C strings read back from the module.
const MAX_CSTRING_LEN: usize = 4096;

/// Host state for the wasm store, containing the WASI preview1 context.
pub struct HostState {
    preview1: wasmtime_wasi::preview1::WasiP1Ctx,
    limits: StoreLimits,
}

impl HostState {
    pub(crate) fn new(preview1: wasmtime_wasi::preview1::WasiP1Ctx, limits: StoreLimits) -> Self {
        Self { preview1, limits }
    }

    /// Get the preview1 context.
    pub(crate) fn preview1(&mut self) -> &mut wasmtime_wasi::preview1::WasiP1Ctx {
        &mut self.preview1
    }

    pub(crate) fn limits(&mut self) -> &mut StoreLimits {
        &mut self.limits
    }
}

/// Result of a sandbox call with timing information.
#[derive(Debug, Clone)]
pub struct CallResult<T> {
    /// The return value
    pub value: T,
    /// Execution time in microseconds
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

/// An instantiated codec module with its exports resolved.
///
/// Not reentrant: every method takes `&mut self`, and the pool hands out one
/// instance to one caller at a time.
pub struct CodecInstance {
    store: Store<HostState>,
    memory: Memory,
    funcs: Vec<Func>,
    live: HashMap<u32, usize>,
    fuel_per_call: Option<u64>,
    slot: usize,
}

impl CodecInstance {
    /// Resolve the memory and every protocol entry on a fresh instance.
    pub(crate) fn new(
        mut store: Store<HostState>,
        instance: Instance,
        fuel_per_call: Option<u64>,
        slot: usize,
    ) -> Result<Self> {
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| OpusError::MissingExports(vec![MEMORY_EXPORT.to_string()]))?;

        let mut funcs = Vec::with_capacity(Entry::ALL.len());
        let mut missing = Vec::new();
        for entry in Entry::ALL {
            match instance.get_func(&mut store, entry.name()) {
                Some(func) => funcs.push(func),
                None => missing.push(entry.name().to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(OpusError::MissingExports(missing));
        }

        Ok(Self {
            store,
            memory,
            funcs,
            live: HashMap::new(),
            fuel_per_call,
            slot,
        })
    }

    /// Pool slot this instance lives in.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Call an entry point and return its result, or 0 for `free`.
    pub fn call(&mut self, entry: Entry, args: &[i32]) -> Result<i32> {
        self.call_timed(entry, args).map(|result| result.value)
    }

    /// Call an entry point, reporting execution time and fuel.
    ///
    /// A trap (out of bounds access, `unreachable`, fuel exhaustion) only fails
    /// this call; the instance stays usable.
    pub fn call_timed(&mut self, entry: Entry, args: &[i32]) -> Result<CallResult<i32>> {
        if args.len() != entry.params() {
            return Err(OpusError::Protocol(format!(
                "`{}` takes {} arguments, {} given",
                entry.name(),
                entry.params(),
                args.len()
            )));
        }

        if let Some(fuel) = self.fuel_per_call {
            self.store
                .set_fuel(fuel)
                .map_err(|e| OpusError::Protocol(format!("fuel setup failed: {}", e)))?;
        }

        let func = self.funcs[entry as usize];
        let params: Vec<Val> = args.iter().map(|&arg| Val::I32(arg)).collect();
        let mut results = vec![Val::I32(0); usize::from(entry.returns_value())];

        let start = Instant::now();
        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| {
                let message = match e.downcast_ref::<Trap>() {
                    Some(Trap::OutOfFuel) => "fuel budget exhausted".to_string(),
                    Some(trap) => trap.to_string(),
                    None => format!("{:#}", e),
                };
                tracing::warn!(entry = entry.name(), slot = self.slot, %message, "sandbox call trapped");
                OpusError::Trap {
                    entry: entry.name(),
                    message,
                }
            })?;
        let execution_time_us = start.elapsed().as_micros() as u64;

        let fuel_consumed = self
            .fuel_per_call
            .zip(self.store.get_fuel().ok())
            .map(|(before, after)| before - after);

        let value = match results.first() {
            Some(val) => val.i32().ok_or_else(|| {
                OpusError::Protocol(format!("`{}` returned a non-i32 value", entry.name()))
            })?,
            None => 0,
        };

        tracing::trace!(
            entry = entry.name(),
            slot = self.slot,
            value,
            execution_time_us,
            ?fuel_consumed,
            "sandbox call"
        );

        Ok(CallResult {
            value,
            execution_time_us,
            fuel_consumed,
        })
    }

    /// Allocate `size` bytes with the module's own allocator.
    ///
    /// A null pointer for a non-zero request is an allocation failure. A zero
    /// sized request may legitimately return null.
    pub fn alloc(&mut self, size: usize) -> Result<u32> {
        let request = i32::try_from(size).map_err(|_| OpusError::AllocationFailed { size })?;
        let ptr = self.call(Entry::Malloc, &[request])? as u32;

        if ptr == 0 {
            if size > 0 {
                return Err(OpusError::AllocationFailed { size });
            }
            return Ok(0);
        }

        self.live.insert(ptr, size);
        Ok(ptr)
    }

    /// Release an allocation. Null is a no-op.
    ///
    /// Pointers this instance did not hand out are refused rather than passed
    /// to the guest allocator.
    pub fn free(&mut self, ptr: u32) -> Result<()> {
        if ptr == 0 {
            return Ok(());
        }
        if self.live.remove(&ptr).is_none() {
            return Err(OpusError::Protocol(format!(
                "free of 0x{:x} without a matching allocation",
                ptr
            )));
        }
        self.call(Entry::Free, &[ptr as i32])?;
        Ok(())
    }

    /// Allocate a buffer and copy `data` into it.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<u32> {
        let ptr = self.alloc(data.len())?;
        if data.is_empty() {
            return Ok(ptr);
        }

        if let Err(e) = self.write_at(ptr, data) {
            if let Err(free_err) = self.free(ptr) {
                tracing::warn!(slot = self.slot, "failed to free after bad write: {}", free_err);
            }
            return Err(e);
        }
        Ok(ptr)
    }

    /// Copy `data` into linear memory at `ptr`.
    pub fn write_at(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        self.memory
            .write(&mut self.store, ptr as usize, data)
            .map_err(|_| OpusError::OutOfBounds {
                ptr,
                len: data.len(),
            })
    }

    /// Read `len` bytes from linear memory at `ptr`.
    pub fn read_bytes(&mut self, ptr: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.memory
            .read(&self.store, ptr as usize, &mut buf)
            .map_err(|_| OpusError::OutOfBounds { ptr, len })?;
        Ok(buf)
    }

    /// Read a little-endian `i32` at `ptr`.
    pub fn read_i32(&mut self, ptr: u32) -> Result<i32> {
        let bytes = self.read_bytes(ptr, 4)?;
        crate::marshal::read_i32(&bytes)
    }

    /// Read a NUL-terminated string at `ptr`.
    pub fn read_c_string(&mut self, ptr: u32) -> Result<String> {
        let data = self.memory.data(&self.store);
        let start = ptr as usize;
        if start >= data.len() {
            return Err(OpusError::OutOfBounds { ptr, len: 1 });
        }

        let window = &data[start..data.len().min(start + MAX_CSTRING_LEN)];
        let end = window.iter().position(|&b| b == 0).ok_or_else(|| {
            OpusError::Protocol(format!("unterminated string at 0x{:x}", ptr))
        })?;
        Ok(String::from_utf8_lossy(&window[..end]).into_owned())
    }

    /// Number of allocations currently held through this instance.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Current size of linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Run `f` with a scratch scope whose allocations are freed when it ends,
    /// on success and error alike.
    pub fn scratch<R>(&mut self, f: impl FnOnce(&mut Scratch<'_>) -> Result<R>) -> Result<R> {
        let mut scratch = Scratch {
            instance: self,
            pointers: Vec::new(),
        };
        f(&mut scratch)
    }
}

/// Allocations staged for a single logical operation.
///
/// Dropping the scope frees everything it allocated, newest first.
pub struct Scratch<'a> {
    instance: &'a mut CodecInstance,
    pointers: Vec<u32>,
}

impl Scratch<'_> {
    /// Allocate `size` uninitialized bytes.
    pub fn alloc(&mut self, size: usize) -> Result<u32> {
        let ptr = self.instance.alloc(size)?;
        if ptr != 0 {
            self.pointers.push(ptr);
        }
        Ok(ptr)
    }

    /// Allocate a buffer holding `data`.
    pub fn write(&mut self, data: &[u8]) -> Result<u32> {
        let ptr = self.instance.write_bytes(data)?;
        if ptr != 0 {
            self.pointers.push(ptr);
        }
        Ok(ptr)
    }

    /// Call an entry point on the underlying instance.
    pub fn call(&mut self, entry: Entry, args: &[i32]) -> Result<i32> {
        self.instance.call(entry, args)
    }

    /// Read bytes from the underlying instance.
    pub fn read(&mut self, ptr: u32, len: usize) -> Result<Vec<u8>> {
        self.instance.read_bytes(ptr, len)
    }

    /// Read a little-endian `i32` from the underlying instance.
    pub fn read_i32(&mut self, ptr: u32) -> Result<i32> {
        self.instance.read_i32(ptr)
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        while let Some(ptr) = self.pointers.pop() {
            if let Err(e) = self.instance.free(ptr) {
                tracing::warn!(slot = self.instance.slot, "scratch free of 0x{:x} failed: {}", ptr, e);
            }
        }
    }
}
