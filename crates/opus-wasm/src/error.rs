//! Error types for the codec bridge.
//!
//! Failures fall into three tiers:
//!
//! - caller input rejected on the host before anything crosses into the sandbox
//!   ([`OpusError::InvalidArgument`], [`OpusError::Released`]);
//! - bridge failures, where the module, its exports or its memory did not behave
//!   as the calling contract requires (compile/instantiate errors, traps,
//!   out-of-range memory, allocator exhaustion, a closed context);
//! - codec failures, negative result codes reported by libopus itself
//!   ([`OpusError::Codec`]).

use std::fmt;
use std::sync::{OnceLock, Weak};

use thiserror::Error;

use crate::runtime::context::ContextInner;

/// Classification of a libopus result code.
///
/// The numeric values behind each kind are read from the module at startup,
/// see [`OpusConstants::classify`](crate::OpusConstants::classify).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `OPUS_OK`
    Ok,
    /// `OPUS_BAD_ARG`: one or more invalid/out of range arguments
    BadArg,
    /// `OPUS_BUFFER_TOO_SMALL`: not enough bytes allocated in the buffer
    BufferTooSmall,
    /// `OPUS_INTERNAL_ERROR`
    InternalError,
    /// `OPUS_INVALID_PACKET`: the compressed data passed is corrupted
    InvalidPacket,
    /// `OPUS_UNIMPLEMENTED`: invalid/unsupported request number
    Unimplemented,
    /// `OPUS_INVALID_STATE`: a state struct passed is invalid or already freed
    InvalidState,
    /// `OPUS_ALLOC_FAIL`: memory allocation has failed
    AllocFail,
    /// A negative code the module does not publish a constant for
    Unknown,
}

impl ErrorKind {
    /// Short stable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Ok => "ok",
            ErrorKind::BadArg => "bad argument",
            ErrorKind::BufferTooSmall => "buffer too small",
            ErrorKind::InternalError => "internal error",
            ErrorKind::InvalidPacket => "invalid packet",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::AllocFail => "allocation failure",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A negative result code returned by the codec.
///
/// The human readable message is looked up through `opus_strerror` the first
/// time it is needed. If the owning context is gone, closed, or every instance
/// is busy, a generic placeholder is used instead.
#[derive(Clone)]
pub struct CodecError {
    code: i32,
    kind: ErrorKind,
    message: OnceLock<String>,
    context: Weak<ContextInner>,
}

impl CodecError {
    pub(crate) fn new(code: i32, kind: ErrorKind, context: Weak<ContextInner>) -> Self {
        Self {
            code,
            kind,
            message: OnceLock::new(),
            context,
        }
    }

    /// Create an error that is not attached to any context.
    ///
    /// Its message always resolves to the placeholder.
    pub fn detached(code: i32, kind: ErrorKind) -> Self {
        Self::new(code, kind, Weak::new())
    }

    /// Raw result code as returned by the module.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Classified kind of the code.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable description, resolved on first use.
    pub fn message(&self) -> String {
        if let Some(message) = self.message.get() {
            return message.clone();
        }

        match self
            .context
            .upgrade()
            .and_then(|context| context.try_describe(self.code))
        {
            Some(message) => self.message.get_or_init(|| message).clone(),
            None => format!("unresolved error code {} ({})", self.code, self.kind),
        }
    }
}

impl fmt::Debug for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecError")
            .field("code", &self.code)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opus: {}", self.message())
    }
}

impl std::error::Error for CodecError {}

/// Bridge error type
#[derive(Error, Debug, Clone)]
pub enum OpusError {
    /// Caller supplied arguments rejected before reaching the sandbox
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle was already released
    #[error("codec handle has been released")]
    Released,

    /// The wasm engine could not be created or the module failed to compile
    #[error("module compilation failed: {0}")]
    Compile(String),

    /// The module compiled but could not be instantiated
    #[error("module instantiation failed: {0}")]
    Instantiate(String),

    /// One or more protocol entry points are absent or have the wrong signature
    #[error("codec module is missing required exports: {}", .0.join(", "))]
    MissingExports(Vec<String>),

    /// A sandbox call trapped
    #[error("call to `{entry}` trapped: {message}")]
    Trap {
        /// Export that was being called
        entry: &'static str,
        /// Trap description from the runtime
        message: String,
    },

    /// A read or write fell outside the instance's linear memory
    #[error("linear memory access out of bounds: {len} bytes at 0x{ptr:x}")]
    OutOfBounds {
        /// Offset of the access
        ptr: u32,
        /// Length of the access
        len: usize,
    },

    /// The sandbox allocator returned null for a non-zero request
    #[error("sandbox allocator returned null for {size} bytes")]
    AllocationFailed {
        /// Requested size in bytes
        size: usize,
    },

    /// The module broke the calling contract in some other way
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The handle's instance stayed busy past the release wait, typically
    /// because the releasing thread itself holds a lease on it
    #[error("instance slot {slot} is busy")]
    SlotBusy {
        /// Pool slot the handle is bound to
        slot: usize,
    },

    /// The context was torn down
    #[error("codec context is closed")]
    ContextClosed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Negative result code reported by the codec
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl OpusError {
    /// True for errors reported by the codec itself.
    pub fn is_codec(&self) -> bool {
        matches!(self, OpusError::Codec(_))
    }

    /// True for caller input rejected on the host side.
    pub fn is_caller_input(&self) -> bool {
        matches!(self, OpusError::InvalidArgument(_) | OpusError::Released)
    }

    /// True for failures of the bridge itself (module, exports, memory, lifecycle).
    pub fn is_bridge(&self) -> bool {
        !self.is_codec() && !self.is_caller_input()
    }

    /// Kind of the codec error, if this is one.
    pub fn codec_kind(&self) -> Option<ErrorKind> {
        match self {
            OpusError::Codec(err) => Some(err.kind()),
            _ => None,
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, OpusError>;
