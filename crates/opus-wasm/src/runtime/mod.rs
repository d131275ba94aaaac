//! Sandbox runtime hosting the codec module.
//!
//! The codec is a WebAssembly build of libopus plus a thin shim of control and
//! constant-getter exports. It runs under wasmtime with WASI preview1 linked in
//! and no capabilities granted unless configured.
//!
//! ## Execution Model
//!
//! - **One module, many instances**: the module is compiled once per
//!   [`CodecContext`]; a fixed pool of instances is created from it lazily
//! - **Slot binding**: an encoder or decoder keeps its state inside one
//!   instance's linear memory and always returns to that instance
//! - **Serialized instances**: an instance is never entered by two callers at
//!   once; different instances run in parallel
//! - **Contained failures**: a trap fails the current call only
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opus_wasm::{CodecContext, RuntimeConfig};
//! use opus_wasm::runtime::Entry;
//!
//! let ctx = CodecContext::from_file("opus.wasm", RuntimeConfig::default())?;
//! println!("{}", ctx.version()?);
//!
//! // Raw protocol access
//! let mut lease = ctx.acquire()?;
//! let size = lease.call(Entry::EncoderGetSize, &[2])?;
//! ```

pub(crate) mod context;
mod instance;
mod module;
mod pool;
mod protocol;

pub use context::{CodecContext, InstanceLease};
pub use instance::{CallResult, CodecInstance, HostState, Scratch};
pub use module::SandboxModule;
pub use pool::InstanceGuard;
pub use protocol::{missing_exports, Entry, OpusConstants, MEMORY_EXPORT};

#[cfg(test)]
mod tests;
