use super::handle::{check_channels, CodecHandle, HandleKind};
use super::{as_arg, frame_size, Application, Bandwidth, Bitrate, PcmFormat, MAX_ENCODED_FRAME_SIZE};
use crate::error::{OpusError, Result};
use crate::marshal::samples_to_bytes;
use crate::runtime::{CodecContext, Entry};

/// Opus encoder whose state lives inside the sandbox.
///
/// Input is interleaved PCM. Frame durations the codec accepts are 2.5, 5,
/// 10, 20, 40 and 60 ms; anything else is reported by the codec as a bad
/// argument.
pub struct Encoder {
    handle: CodecHandle,
}

impl Encoder {
    /// Create an encoder for `sample_rate` Hz and `channels` (1 or 2).
    pub fn new(
        ctx: &CodecContext,
        sample_rate: i32,
        channels: usize,
        application: Application,
    ) -> Result<Self> {
        // Checked ahead of `constants()`, which may run startup.
        check_channels(channels)?;
        let constants = ctx.constants()?;
        let handle = CodecHandle::create(
            ctx,
            HandleKind::Encoder,
            sample_rate,
            channels,
            &[application.code(&constants)],
        )?;
        Ok(Self { handle })
    }

    /// Encode one frame of `i16` PCM into `data`, returning the packet length.
    pub fn encode(&mut self, pcm: &[i16], data: &mut [u8]) -> Result<usize> {
        self.encode_with(pcm, data)
    }

    /// Encode one frame of `f32` PCM into `data`, returning the packet length.
    pub fn encode_float(&mut self, pcm: &[f32], data: &mut [u8]) -> Result<usize> {
        self.encode_with(pcm, data)
    }

    /// Encode into a freshly allocated packet.
    pub fn encode_to_vec(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        let mut packet = vec![0u8; MAX_ENCODED_FRAME_SIZE];
        let len = self.encode(pcm, &mut packet)?;
        packet.truncate(len);
        Ok(packet)
    }

    /// Float variant of [`encode_to_vec`](Self::encode_to_vec).
    pub fn encode_float_to_vec(&mut self, pcm: &[f32]) -> Result<Vec<u8>> {
        let mut packet = vec![0u8; MAX_ENCODED_FRAME_SIZE];
        let len = self.encode_float(pcm, &mut packet)?;
        packet.truncate(len);
        Ok(packet)
    }

    fn encode_with<S: PcmFormat>(&mut self, pcm: &[S], data: &mut [u8]) -> Result<usize> {
        let frame = as_arg(frame_size(pcm.len(), self.handle.channels(), "pcm")?, "frame")?;
        if data.is_empty() {
            return Err(OpusError::InvalidArgument(
                "no target buffer for encoded data".to_string(),
            ));
        }
        let capacity = as_arg(data.len(), "output")?;
        let input = samples_to_bytes(pcm);

        let packet = self.handle.with_instance(|lease, state| {
            let (code, packet) = lease.scratch(|scratch| {
                let pcm_ptr = scratch.write(&input)?;
                let out_ptr = scratch.alloc(capacity as usize)?;
                let code = scratch.call(
                    S::ENCODE,
                    &[state, pcm_ptr as i32, frame, out_ptr as i32, capacity],
                )?;
                if code < 0 {
                    return Ok((code, Vec::new()));
                }
                if code > capacity {
                    return Err(OpusError::Protocol(format!(
                        "{} reported {} bytes for a {} byte buffer",
                        S::ENCODE.name(),
                        code,
                        capacity
                    )));
                }
                Ok((code, scratch.read(out_ptr, code as usize)?))
            })?;
            lease.check(code)?;
            Ok(packet)
        })?;

        data[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    /// Enable or disable discontinuous transmission.
    pub fn set_dtx(&mut self, dtx: bool) -> Result<()> {
        self.handle.set_control(Entry::EncoderSetDtx, i32::from(dtx))
    }

    /// Whether discontinuous transmission is enabled.
    pub fn dtx(&self) -> Result<bool> {
        Ok(self.handle.get_control(Entry::EncoderGetDtx)? != 0)
    }

    /// Whether the last encoded frame was sent as DTX silence.
    pub fn in_dtx(&self) -> Result<bool> {
        Ok(self.handle.get_control(Entry::EncoderGetInDtx)? != 0)
    }

    /// Sample rate the encoder was created with.
    pub fn sample_rate(&self) -> i32 {
        self.handle.sample_rate()
    }

    /// Sample rate as reported by the encoder state inside the sandbox.
    pub fn queried_sample_rate(&self) -> Result<i32> {
        self.handle.get_control(Entry::EncoderGetSampleRate)
    }

    /// Set the target bitrate.
    pub fn set_bitrate(&mut self, bitrate: Bitrate) -> Result<()> {
        let constants = self.handle.constants()?;
        self.handle
            .set_control(Entry::EncoderSetBitrate, bitrate.code(&constants))
    }

    /// Current bitrate setting; sentinels come back as [`Bitrate::Auto`] and
    /// [`Bitrate::Max`].
    pub fn bitrate(&self) -> Result<Bitrate> {
        let constants = self.handle.constants()?;
        let code = self.handle.get_control(Entry::EncoderGetBitrate)?;
        Ok(Bitrate::from_code(code, &constants))
    }

    /// Set computational complexity, 0 through 10.
    pub fn set_complexity(&mut self, complexity: i32) -> Result<()> {
        self.handle.set_control(Entry::EncoderSetComplexity, complexity)
    }

    /// Current complexity.
    pub fn complexity(&self) -> Result<i32> {
        self.handle.get_control(Entry::EncoderGetComplexity)
    }

    /// Cap the bandwidth the encoder may select.
    pub fn set_max_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<()> {
        let constants = self.handle.constants()?;
        self.handle
            .set_control(Entry::EncoderSetMaxBandwidth, bandwidth.code(&constants))
    }

    /// Current bandwidth cap.
    pub fn max_bandwidth(&self) -> Result<Bandwidth> {
        let constants = self.handle.constants()?;
        let code = self.handle.get_control(Entry::EncoderGetMaxBandwidth)?;
        Bandwidth::from_code(code, &constants)
            .ok_or_else(|| OpusError::Protocol(format!("unknown bandwidth value {}", code)))
    }

    /// Enable or disable in-band forward error correction.
    pub fn set_inband_fec(&mut self, fec: bool) -> Result<()> {
        self.handle.set_control(Entry::EncoderSetInbandFec, i32::from(fec))
    }

    /// Whether in-band FEC is enabled.
    pub fn inband_fec(&self) -> Result<bool> {
        Ok(self.handle.get_control(Entry::EncoderGetInbandFec)? != 0)
    }

    /// Expected packet loss percentage, 0 through 100.
    pub fn set_packet_loss_perc(&mut self, percentage: i32) -> Result<()> {
        self.handle
            .set_control(Entry::EncoderSetPacketLossPerc, percentage)
    }

    /// Configured packet loss percentage.
    pub fn packet_loss_perc(&self) -> Result<i32> {
        self.handle.get_control(Entry::EncoderGetPacketLossPerc)
    }

    /// Switch between variable and constant bitrate.
    pub fn set_vbr(&mut self, vbr: bool) -> Result<()> {
        self.handle.set_control(Entry::EncoderSetVbr, i32::from(vbr))
    }

    /// Whether variable bitrate is enabled.
    pub fn vbr(&self) -> Result<bool> {
        Ok(self.handle.get_control(Entry::EncoderGetVbr)? != 0)
    }

    /// Enable or disable constrained VBR.
    pub fn set_vbr_constraint(&mut self, constrained: bool) -> Result<()> {
        self.handle
            .set_control(Entry::EncoderSetVbrConstraint, i32::from(constrained))
    }

    /// Whether constrained VBR is enabled.
    pub fn vbr_constraint(&self) -> Result<bool> {
        Ok(self.handle.get_control(Entry::EncoderGetVbrConstraint)? != 0)
    }

    /// Reset the codec state as if freshly initialized, keeping the settings.
    pub fn reset(&mut self) -> Result<()> {
        self.handle.with_instance(|lease, state| {
            let code = lease.call(Entry::EncoderResetState, &[state])?;
            lease.check(code).map(|_| ())
        })
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> usize {
        self.handle.channels()
    }

    /// Instance slot the encoder state lives in.
    pub fn slot(&self) -> usize {
        self.handle.slot()
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Free the sandbox-side state. Safe to call more than once; also runs on
    /// drop.
    pub fn release(&mut self) -> Result<()> {
        self.handle.release()
    }
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("sample_rate", &self.handle.sample_rate())
            .field("channels", &self.handle.channels())
            .field("slot", &self.handle.slot())
            .field("released", &self.handle.is_released())
            .finish()
    }
}
