use super::handle::{CodecHandle, HandleKind};
use super::{as_arg, frame_size, PcmFormat};
use crate::error::{OpusError, Result};
use crate::marshal::samples_from_bytes;
use crate::runtime::{CodecContext, Entry};

/// Opus decoder whose state lives inside the sandbox.
///
/// All decode variants write interleaved PCM into the caller's buffer and
/// return the number of samples decoded per channel. The buffer length fixes
/// the maximum frame size and must be a multiple of the channel count.
pub struct Decoder {
    handle: CodecHandle,
}

impl Decoder {
    /// Create a decoder for `sample_rate` Hz and `channels` (1 or 2).
    pub fn new(ctx: &CodecContext, sample_rate: i32, channels: usize) -> Result<Self> {
        let handle = CodecHandle::create(ctx, HandleKind::Decoder, sample_rate, channels, &[])?;
        Ok(Self { handle })
    }

    /// Decode a packet to `i16` PCM. An empty packet is treated as lost.
    pub fn decode(&mut self, data: &[u8], pcm: &mut [i16]) -> Result<usize> {
        self.decode_with(data, pcm, false)
    }

    /// Decode a packet to `f32` PCM.
    pub fn decode_float(&mut self, data: &[u8], pcm: &mut [f32]) -> Result<usize> {
        self.decode_with(data, pcm, false)
    }

    /// Recover the frame preceding `data` from its in-band FEC data.
    ///
    /// `pcm` must be sized for exactly the lost frame's duration.
    pub fn decode_fec(&mut self, data: &[u8], pcm: &mut [i16]) -> Result<usize> {
        self.decode_with(data, pcm, true)
    }

    /// Float variant of [`decode_fec`](Self::decode_fec).
    pub fn decode_fec_float(&mut self, data: &[u8], pcm: &mut [f32]) -> Result<usize> {
        self.decode_with(data, pcm, true)
    }

    /// Conceal a lost packet, filling `pcm` with a synthesized frame.
    pub fn decode_plc(&mut self, pcm: &mut [i16]) -> Result<usize> {
        self.decode_with(&[], pcm, false)
    }

    /// Float variant of [`decode_plc`](Self::decode_plc).
    pub fn decode_plc_float(&mut self, pcm: &mut [f32]) -> Result<usize> {
        self.decode_with(&[], pcm, false)
    }

    /// Shared decode path. An empty `data` passes a null packet, which asks
    /// the codec for loss concealment.
    fn decode_with<S: PcmFormat>(&mut self, data: &[u8], pcm: &mut [S], fec: bool) -> Result<usize> {
        let channels = self.handle.channels();
        let max_frame = frame_size(pcm.len(), channels, "pcm")?;
        let frame = as_arg(max_frame, "frame")?;
        let packet_len = as_arg(data.len(), "packet")?;
        let out_len = pcm.len() * S::WIDTH;

        let (samples, bytes) = self.handle.with_instance(|lease, state| {
            let (code, bytes) = lease.scratch(|scratch| {
                let data_ptr = if data.is_empty() { 0 } else { scratch.write(data)? };
                let out_ptr = scratch.alloc(out_len)?;
                let code = scratch.call(
                    S::DECODE,
                    &[state, data_ptr as i32, packet_len, out_ptr as i32, frame, i32::from(fec)],
                )?;
                if code < 0 {
                    return Ok((code, Vec::new()));
                }
                if code > frame {
                    return Err(OpusError::Protocol(format!(
                        "{} reported {} samples for a {} sample frame",
                        S::DECODE.name(),
                        code,
                        frame
                    )));
                }
                let len = code as usize * channels * S::WIDTH;
                Ok((code, scratch.read(out_ptr, len)?))
            })?;
            let samples = lease.check(code)?;
            Ok((samples as usize, bytes))
        })?;

        samples_from_bytes(&bytes, pcm)?;
        Ok(samples)
    }

    /// Duration in samples per channel of the last decoded packet.
    pub fn last_packet_duration(&self) -> Result<usize> {
        let duration = self
            .handle
            .get_control(Entry::DecoderGetLastPacketDuration)?;
        usize::try_from(duration)
            .map_err(|_| OpusError::Protocol(format!("negative packet duration {}", duration)))
    }

    /// Configured output sample rate.
    pub fn sample_rate(&self) -> i32 {
        self.handle.sample_rate()
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> usize {
        self.handle.channels()
    }

    /// Instance slot the decoder state lives in.
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

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("sample_rate", &self.handle.sample_rate())
            .field("channels", &self.handle.channels())
            .field("slot", &self.handle.slot())
            .field("released", &self.handle.is_released())
            .finish()
    }
}
