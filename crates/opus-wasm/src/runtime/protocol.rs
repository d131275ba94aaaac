//! The fixed catalogue of exports the codec module must provide.
//!
//! Every export takes and returns plain `i32`s. Pointers are offsets into the
//! instance's linear memory, out-parameters are passed as pointers to 4-byte
//! scratch slots, and every call that can fail returns a libopus result code.

use wasmtime::{ExternType, Module, ValType};

use super::instance::CodecInstance;
use crate::error::{ErrorKind, Result};

/// A named entry point of the codec module.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entry {
    // Allocator
    Malloc,
    Free,

    // Encoder lifecycle
    EncoderGetSize,
    EncoderInit,
    Encode,
    EncodeFloat,

    // Encoder controls
    EncoderSetDtx,
    EncoderGetDtx,
    EncoderGetInDtx,
    EncoderGetSampleRate,
    EncoderSetBitrate,
    EncoderGetBitrate,
    EncoderSetComplexity,
    EncoderGetComplexity,
    EncoderSetMaxBandwidth,
    EncoderGetMaxBandwidth,
    EncoderSetInbandFec,
    EncoderGetInbandFec,
    EncoderSetPacketLossPerc,
    EncoderGetPacketLossPerc,
    EncoderSetVbr,
    EncoderGetVbr,
    EncoderSetVbrConstraint,
    EncoderGetVbrConstraint,
    EncoderResetState,

    // Decoder
    DecoderGetSize,
    DecoderInit,
    Decode,
    DecodeFloat,
    DecoderGetLastPacketDuration,

    // Messages
    Strerror,
    VersionString,

    // Constant addresses
    ConstOk,
    ConstBadArg,
    ConstBufferTooSmall,
    ConstInternalError,
    ConstInvalidPacket,
    ConstUnimplemented,
    ConstInvalidState,
    ConstAllocFail,
    ConstBandwidthNarrowband,
    ConstBandwidthMediumband,
    ConstBandwidthWideband,
    ConstBandwidthSuperWideband,
    ConstBandwidthFullband,
    ConstAuto,
    ConstBitrateMax,
    ConstApplicationVoip,
    ConstApplicationAudio,
    ConstApplicationRestrictedLowdelay,
}

impl Entry {
    /// Every entry, in declaration order. `Entry::ALL[e as usize] == e`.
    pub const ALL: [Entry; 50] = [
        Entry::Malloc,
        Entry::Free,
        Entry::EncoderGetSize,
        Entry::EncoderInit,
        Entry::Encode,
        Entry::EncodeFloat,
        Entry::EncoderSetDtx,
        Entry::EncoderGetDtx,
        Entry::EncoderGetInDtx,
        Entry::EncoderGetSampleRate,
        Entry::EncoderSetBitrate,
        Entry::EncoderGetBitrate,
        Entry::EncoderSetComplexity,
        Entry::EncoderGetComplexity,
        Entry::EncoderSetMaxBandwidth,
        Entry::EncoderGetMaxBandwidth,
        Entry::EncoderSetInbandFec,
        Entry::EncoderGetInbandFec,
        Entry::EncoderSetPacketLossPerc,
        Entry::EncoderGetPacketLossPerc,
        Entry::EncoderSetVbr,
        Entry::EncoderGetVbr,
        Entry::EncoderSetVbrConstraint,
        Entry::EncoderGetVbrConstraint,
        Entry::EncoderResetState,
        Entry::DecoderGetSize,
        Entry::DecoderInit,
        Entry::Decode,
        Entry::DecodeFloat,
        Entry::DecoderGetLastPacketDuration,
        Entry::Strerror,
        Entry::VersionString,
        Entry::ConstOk,
        Entry::ConstBadArg,
        Entry::ConstBufferTooSmall,
        Entry::ConstInternalError,
        Entry::ConstInvalidPacket,
        Entry::ConstUnimplemented,
        Entry::ConstInvalidState,
        Entry::ConstAllocFail,
        Entry::ConstBandwidthNarrowband,
        Entry::ConstBandwidthMediumband,
        Entry::ConstBandwidthWideband,
        Entry::ConstBandwidthSuperWideband,
        Entry::ConstBandwidthFullband,
        Entry::ConstAuto,
        Entry::ConstBitrateMax,
        Entry::ConstApplicationVoip,
        Entry::ConstApplicationAudio,
        Entry::ConstApplicationRestrictedLowdelay,
    ];

    /// Name of the export in the module.
    pub fn name(self) -> &'static str {
        match self {
            Entry::Malloc => "malloc",
            Entry::Free => "free",
            Entry::EncoderGetSize => "opus_encoder_get_size",
            Entry::EncoderInit => "opus_encoder_init",
            Entry::Encode => "opus_encode",
            Entry::EncodeFloat => "opus_encode_float",
            Entry::EncoderSetDtx => "bridge_encoder_set_dtx",
            Entry::EncoderGetDtx => "bridge_encoder_get_dtx",
            Entry::EncoderGetInDtx => "bridge_encoder_get_in_dtx",
            Entry::EncoderGetSampleRate => "bridge_encoder_get_sample_rate",
            Entry::EncoderSetBitrate => "bridge_encoder_set_bitrate",
            Entry::EncoderGetBitrate => "bridge_encoder_get_bitrate",
            Entry::EncoderSetComplexity => "bridge_encoder_set_complexity",
            Entry::EncoderGetComplexity => "bridge_encoder_get_complexity",
            Entry::EncoderSetMaxBandwidth => "bridge_encoder_set_max_bandwidth",
            Entry::EncoderGetMaxBandwidth => "bridge_encoder_get_max_bandwidth",
            Entry::EncoderSetInbandFec => "bridge_encoder_set_inband_fec",
            Entry::EncoderGetInbandFec => "bridge_encoder_get_inband_fec",
            Entry::EncoderSetPacketLossPerc => "bridge_encoder_set_packet_loss_perc",
            Entry::EncoderGetPacketLossPerc => "bridge_encoder_get_packet_loss_perc",
            Entry::EncoderSetVbr => "bridge_encoder_set_vbr",
            Entry::EncoderGetVbr => "bridge_encoder_get_vbr",
            Entry::EncoderSetVbrConstraint => "bridge_encoder_set_vbr_constraint",
            Entry::EncoderGetVbrConstraint => "bridge_encoder_get_vbr_constraint",
            Entry::EncoderResetState => "bridge_encoder_reset_state",
            Entry::DecoderGetSize => "opus_decoder_get_size",
            Entry::DecoderInit => "opus_decoder_init",
            Entry::Decode => "opus_decode",
            Entry::DecodeFloat => "opus_decode_float",
            Entry::DecoderGetLastPacketDuration => "bridge_decoder_get_last_packet_duration",
            Entry::Strerror => "opus_strerror",
            Entry::VersionString => "opus_get_version_string",
            Entry::ConstOk => "get_opus_ok_address",
            Entry::ConstBadArg => "get_opus_bad_arg_address",
            Entry::ConstBufferTooSmall => "get_opus_buffer_too_small_address",
            Entry::ConstInternalError => "get_opus_internal_error_address",
            Entry::ConstInvalidPacket => "get_opus_invalid_packet_address",
            Entry::ConstUnimplemented => "get_opus_unimplemented_address",
            Entry::ConstInvalidState => "get_opus_invalid_state_address",
            Entry::ConstAllocFail => "get_opus_alloc_fail_address",
            Entry::ConstBandwidthNarrowband => "get_opus_bandwidth_narrowband_address",
            Entry::ConstBandwidthMediumband => "get_opus_bandwidth_mediumband_address",
            Entry::ConstBandwidthWideband => "get_opus_bandwidth_wideband_address",
            Entry::ConstBandwidthSuperWideband => "get_opus_bandwidth_superwideband_address",
            Entry::ConstBandwidthFullband => "get_opus_bandwidth_fullband_address",
            Entry::ConstAuto => "get_opus_auto_address",
            Entry::ConstBitrateMax => "get_opus_bitrate_max_address",
            Entry::ConstApplicationVoip => "get_opus_application_voip_address",
            Entry::ConstApplicationAudio => "get_opus_application_audio_address",
            Entry::ConstApplicationRestrictedLowdelay => {
                "get_opus_application_restricted_lowdelay_address"
            }
        }
    }

    /// Number of `i32` parameters the export takes.
    pub fn params(self) -> usize {
        match self {
            Entry::VersionString => 0,
            Entry::Malloc
            | Entry::Free
            | Entry::EncoderGetSize
            | Entry::DecoderGetSize
            | Entry::EncoderResetState
            | Entry::Strerror => 1,
            Entry::DecoderInit => 3,
            Entry::EncoderInit => 4,
            Entry::Encode | Entry::EncodeFloat => 5,
            Entry::Decode | Entry::DecodeFloat => 6,
            e if e.is_constant() => 0,
            // Controls: (state, value) or (state, out_ptr)
            _ => 2,
        }
    }

    /// Whether the export returns an `i32`. Only `free` returns nothing.
    pub fn returns_value(self) -> bool {
        !matches!(self, Entry::Free)
    }

    /// Whether this is one of the constant address getters.
    pub fn is_constant(self) -> bool {
        (self as usize) >= (Entry::ConstOk as usize)
    }
}

/// Name of the linear memory export.
pub const MEMORY_EXPORT: &str = "memory";

/// Check the module against the protocol table, returning one description
/// per missing or mistyped export. Empty means the module is usable.
pub fn missing_exports(module: &Module) -> Vec<String> {
    let mut missing = Vec::new();

    match module.get_export(MEMORY_EXPORT) {
        Some(ExternType::Memory(_)) => {}
        Some(_) => missing.push(format!("{} (not a memory)", MEMORY_EXPORT)),
        None => missing.push(MEMORY_EXPORT.to_string()),
    }

    for entry in Entry::ALL {
        match module.get_export(entry.name()) {
            Some(ExternType::Func(ty)) => {
                let params_ok = ty.params().len() == entry.params()
                    && ty.params().all(|p| matches!(p, ValType::I32));
                let expected_results = usize::from(entry.returns_value());
                let results_ok = ty.results().len() == expected_results
                    && ty.results().all(|r| matches!(r, ValType::I32));
                if !params_ok || !results_ok {
                    missing.push(format!("{} (signature mismatch)", entry.name()));
                }
            }
            Some(_) => missing.push(format!("{} (not a function)", entry.name())),
            None => missing.push(entry.name().to_string()),
        }
    }

    missing
}

/// Numeric values published by the module, read once at startup.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusConstants {
    pub ok: i32,
    pub bad_arg: i32,
    pub buffer_too_small: i32,
    pub internal_error: i32,
    pub invalid_packet: i32,
    pub unimplemented: i32,
    pub invalid_state: i32,
    pub alloc_fail: i32,
    pub bandwidth_narrowband: i32,
    pub bandwidth_mediumband: i32,
    pub bandwidth_wideband: i32,
    pub bandwidth_superwideband: i32,
    pub bandwidth_fullband: i32,
    pub auto: i32,
    pub bitrate_max: i32,
    pub application_voip: i32,
    pub application_audio: i32,
    pub application_restricted_lowdelay: i32,
}

impl OpusConstants {
    /// Call every constant getter and dereference the returned address.
    pub fn load(instance: &mut CodecInstance) -> Result<Self> {
        let mut read = |entry: Entry| -> Result<i32> {
            let ptr = instance.call(entry, &[])?;
            instance.read_i32(ptr as u32)
        };

        Ok(Self {
            ok: read(Entry::ConstOk)?,
            bad_arg: read(Entry::ConstBadArg)?,
            buffer_too_small: read(Entry::ConstBufferTooSmall)?,
            internal_error: read(Entry::ConstInternalError)?,
            invalid_packet: read(Entry::ConstInvalidPacket)?,
            unimplemented: read(Entry::ConstUnimplemented)?,
            invalid_state: read(Entry::ConstInvalidState)?,
            alloc_fail: read(Entry::ConstAllocFail)?,
            bandwidth_narrowband: read(Entry::ConstBandwidthNarrowband)?,
            bandwidth_mediumband: read(Entry::ConstBandwidthMediumband)?,
            bandwidth_wideband: read(Entry::ConstBandwidthWideband)?,
            bandwidth_superwideband: read(Entry::ConstBandwidthSuperWideband)?,
            bandwidth_fullband: read(Entry::ConstBandwidthFullband)?,
            auto: read(Entry::ConstAuto)?,
            bitrate_max: read(Entry::ConstBitrateMax)?,
            application_voip: read(Entry::ConstApplicationVoip)?,
            application_audio: read(Entry::ConstApplicationAudio)?,
            application_restricted_lowdelay: read(Entry::ConstApplicationRestrictedLowdelay)?,
        })
    }

    /// Map a result code to its kind.
    pub fn classify(&self, code: i32) -> ErrorKind {
        match code {
            c if c == self.ok => ErrorKind::Ok,
            c if c == self.bad_arg => ErrorKind::BadArg,
            c if c == self.buffer_too_small => ErrorKind::BufferTooSmall,
            c if c == self.internal_error => ErrorKind::InternalError,
            c if c == self.invalid_packet => ErrorKind::InvalidPacket,
            c if c == self.unimplemented => ErrorKind::Unimplemented,
            c if c == self.invalid_state => ErrorKind::InvalidState,
            c if c == self.alloc_fail => ErrorKind::AllocFail,
            _ => ErrorKind::Unknown,
        }
    }
}
