//! # opus-wasm
//!
//! Opus encoding and decoding through a sandboxed WebAssembly build of
//! libopus.
//!
//! The codec never runs as native code in the host process. It is compiled
//! once per [`CodecContext`] and executed by wasmtime in a small pool of
//! instances, each with its own linear memory, no WASI capabilities unless
//! configured, and an optional per-call fuel budget. Encoder and decoder state
//! lives inside an instance; this crate only moves samples and packets across
//! the boundary.
//!
//! ## Layers
//!
//! | Layer | Module | Role |
//! |-------|--------|------|
//! | Handles | [`codec`] | `Encoder` / `Decoder`, controls, typed settings |
//! | Runtime | [`runtime`] | Compile, instantiate, pool, raw calls, memory |
//! | Marshalling | [`marshal`] | PCM sample slices to and from LE bytes |
//! | Errors | [`error`] | Caller, bridge and codec failure tiers |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use opus_wasm::{Application, CodecContext, Decoder, Encoder, RuntimeConfig};
//!
//! let ctx = CodecContext::from_file("opus.wasm", RuntimeConfig::default())?;
//!
//! let mut encoder = Encoder::new(&ctx, 48_000, 2, Application::Audio)?;
//! let mut decoder = Decoder::new(&ctx, 48_000, 2)?;
//!
//! let pcm = vec![0i16; 960 * 2]; // 20 ms stereo
//! let packet = encoder.encode_to_vec(&pcm)?;
//!
//! let mut out = vec![0i16; 960 * 2];
//! let samples = decoder.decode(&packet, &mut out)?;
//! assert_eq!(samples, 960);
//!
//! ctx.close();
//! ```
//!
//! ## Module Contract
//!
//! The module must export `memory`, `malloc`/`free`, the libopus encoder and
//! decoder entry points, `bridge_*` control wrappers and `get_opus_*_address`
//! constant getters. See [`runtime::Entry`] for the full list; all of them are
//! checked before the context becomes usable.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod config;
pub mod error;
pub mod marshal;
pub mod runtime;

// Re-export main types
pub use codec::{Application, Bandwidth, Bitrate, Decoder, Encoder, MAX_ENCODED_FRAME_SIZE};
pub use config::{RuntimeConfig, WasiCapabilities};
pub use error::{CodecError, ErrorKind, OpusError, Result};
pub use runtime::{CodecContext, InstanceLease, OpusConstants};
