//! Opus encoder and decoder handles.
//!
//! Every value passed to the codec (application profiles, bandwidths, bitrate
//! sentinels) is translated through the [`OpusConstants`] the module published
//! at startup, never through numbers baked into this crate.

mod decoder;
mod encoder;
mod handle;

pub use decoder::Decoder;
pub use encoder::Encoder;

use crate::error::{OpusError, Result};
use crate::marshal::Sample;
use crate::runtime::{Entry, OpusConstants};

/// Largest packet the encoder can produce; sizes the `*_to_vec` helpers.
pub const MAX_ENCODED_FRAME_SIZE: usize = 10_000;

/// Sample rates the codec accepts.
pub const SAMPLE_RATES: [i32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Encoder tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Application {
    /// Best for most VoIP/videoconference applications where listening quality
    /// and intelligibility matter most
    Voip,
    /// Best for broadcast/high-fidelity application where the decoded audio
    /// should be as close as possible to the input
    Audio,
    /// Only use when lowest-achievable latency is what matters most
    RestrictedLowDelay,
}

impl Application {
    /// Module value for this profile.
    pub fn code(self, constants: &OpusConstants) -> i32 {
        match self {
            Application::Voip => constants.application_voip,
            Application::Audio => constants.application_audio,
            Application::RestrictedLowDelay => constants.application_restricted_lowdelay,
        }
    }
}

/// Audio bandwidth, as used by the maximum bandwidth control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bandwidth {
    /// 4 kHz passband
    Narrowband,
    /// 6 kHz passband
    Mediumband,
    /// 8 kHz passband
    Wideband,
    /// 12 kHz passband
    SuperWideband,
    /// 20 kHz passband
    Fullband,
}

impl Bandwidth {
    /// Module value for this bandwidth.
    pub fn code(self, constants: &OpusConstants) -> i32 {
        match self {
            Bandwidth::Narrowband => constants.bandwidth_narrowband,
            Bandwidth::Mediumband => constants.bandwidth_mediumband,
            Bandwidth::Wideband => constants.bandwidth_wideband,
            Bandwidth::SuperWideband => constants.bandwidth_superwideband,
            Bandwidth::Fullband => constants.bandwidth_fullband,
        }
    }

    /// Reverse of [`code`](Self::code).
    pub fn from_code(code: i32, constants: &OpusConstants) -> Option<Self> {
        [
            Bandwidth::Narrowband,
            Bandwidth::Mediumband,
            Bandwidth::Wideband,
            Bandwidth::SuperWideband,
            Bandwidth::Fullband,
        ]
        .into_iter()
        .find(|bw| bw.code(constants) == code)
    }
}

/// Target bitrate setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitrate {
    /// Let the encoder pick from the sample rate and channel count
    Auto,
    /// As many bits as the packet size allows
    Max,
    /// Explicit bits per second
    BitsPerSecond(i32),
}

impl Bitrate {
    /// Module value for this setting.
    pub fn code(self, constants: &OpusConstants) -> i32 {
        match self {
            Bitrate::Auto => constants.auto,
            Bitrate::Max => constants.bitrate_max,
            Bitrate::BitsPerSecond(bps) => bps,
        }
    }

    /// Interpret a value read back from the encoder.
    pub fn from_code(code: i32, constants: &OpusConstants) -> Self {
        if code == constants.auto {
            Bitrate::Auto
        } else if code == constants.bitrate_max {
            Bitrate::Max
        } else {
            Bitrate::BitsPerSecond(code)
        }
    }
}

/// Sample types with their matching encode/decode entry points.
pub(crate) trait PcmFormat: Sample {
    const ENCODE: Entry;
    const DECODE: Entry;
}

impl PcmFormat for i16 {
    const ENCODE: Entry = Entry::Encode;
    const DECODE: Entry = Entry::Decode;
}

impl PcmFormat for f32 {
    const ENCODE: Entry = Entry::EncodeFloat;
    const DECODE: Entry = Entry::DecodeFloat;
}

/// Reject buffers that are empty or not interleaved whole frames.
pub(crate) fn frame_size(len: usize, channels: usize, what: &str) -> Result<usize> {
    if len == 0 {
        return Err(OpusError::InvalidArgument(format!("{} buffer is empty", what)));
    }
    if len % channels != 0 {
        return Err(OpusError::InvalidArgument(format!(
            "{} buffer length {} is not a multiple of {} channels",
            what, len, channels
        )));
    }
    Ok(len / channels)
}

/// Convert a host length to the module's `i32` argument type.
pub(crate) fn as_arg(len: usize, what: &str) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| OpusError::InvalidArgument(format!("{} length {} is too large", what, len)))
}
