//! State block ownership shared by encoders and decoders.

use crate::error::{OpusError, Result};
use crate::runtime::{CodecContext, Entry, InstanceLease, OpusConstants};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Encoder,
    Decoder,
}

impl HandleKind {
    fn size_entry(self) -> Entry {
        match self {
            HandleKind::Encoder => Entry::EncoderGetSize,
            HandleKind::Decoder => Entry::DecoderGetSize,
        }
    }

    fn init_entry(self) -> Entry {
        match self {
            HandleKind::Encoder => Entry::EncoderInit,
            HandleKind::Decoder => Entry::DecoderInit,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            HandleKind::Encoder => "encoder",
            HandleKind::Decoder => "decoder",
        }
    }
}

/// Reject channel counts the codec cannot handle, without touching the context.
pub(crate) fn check_channels(channels: usize) -> Result<()> {
    if channels != 1 && channels != 2 {
        return Err(OpusError::InvalidArgument(format!(
            "number of channels must be 1 or 2: {}",
            channels
        )));
    }
    Ok(())
}

/// A codec state block living in one pool slot's linear memory.
///
/// The block is freed exactly once, by [`release`](Self::release) or on drop.
pub(crate) struct CodecHandle {
    ctx: CodecContext,
    kind: HandleKind,
    slot: usize,
    state: Option<u32>,
    channels: usize,
    sample_rate: i32,
}

impl CodecHandle {
    /// Allocate and initialize a state block.
    ///
    /// `extra` is appended to the `(state, rate, channels)` init arguments.
    pub(crate) fn create(
        ctx: &CodecContext,
        kind: HandleKind,
        sample_rate: i32,
        channels: usize,
        extra: &[i32],
    ) -> Result<Self> {
        check_channels(channels)?;

        let slot = ctx.bind()?;
        match Self::init_state(ctx, kind, slot, sample_rate, channels, extra) {
            Ok(state) => {
                tracing::debug!(kind = kind.as_str(), slot, sample_rate, channels, "codec handle created");
                Ok(Self {
                    ctx: ctx.clone(),
                    kind,
                    slot,
                    state: Some(state),
                    channels,
                    sample_rate,
                })
            }
            Err(e) => {
                ctx.unbind(slot);
                Err(e)
            }
        }
    }

    fn init_state(
        ctx: &CodecContext,
        kind: HandleKind,
        slot: usize,
        sample_rate: i32,
        channels: usize,
        extra: &[i32],
    ) -> Result<u32> {
        let mut lease = ctx.lease(slot)?;

        let size = lease.call(kind.size_entry(), &[channels as i32])?;
        let size = lease.check(size)?;
        if size == 0 {
            return Err(OpusError::Protocol(format!(
                "{} state size reported as zero",
                kind.as_str()
            )));
        }

        let state = lease.alloc(size as usize)?;

        let mut args = vec![state as i32, sample_rate, channels as i32];
        args.extend_from_slice(extra);
        let outcome = lease
            .call(kind.init_entry(), &args)
            .and_then(|code| lease.check(code));

        if let Err(e) = outcome {
            if let Err(free_err) = lease.free(state) {
                tracing::warn!(slot, "failed to free {} state after init error: {}", kind.as_str(), free_err);
            }
            return Err(e);
        }
        Ok(state)
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    pub(crate) fn sample_rate(&self) -> i32 {
        self.sample_rate
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub(crate) fn is_released(&self) -> bool {
        self.state.is_none()
    }

    pub(crate) fn constants(&self) -> Result<OpusConstants> {
        self.ctx.constants()
    }

    /// Run `f` against this handle's instance with the state pointer.
    pub(crate) fn with_instance<R>(
        &self,
        f: impl FnOnce(&mut InstanceLease<'_>, i32) -> Result<R>,
    ) -> Result<R> {
        let state = self.state.ok_or(OpusError::Released)?;
        let mut lease = self.ctx.lease(self.slot)?;
        f(&mut lease, state as i32)
    }

    /// Call a `(state, value)` control and check its result code.
    pub(crate) fn set_control(&self, entry: Entry, value: i32) -> Result<()> {
        self.with_instance(|lease, state| {
            let code = lease.call(entry, &[state, value])?;
            lease.check(code).map(|_| ())
        })
    }

    /// Call a `(state, out_ptr)` control and read back the value.
    pub(crate) fn get_control(&self, entry: Entry) -> Result<i32> {
        self.with_instance(|lease, state| {
            let (code, value) = lease.scratch(|scratch| {
                let out = scratch.alloc(4)?;
                let code = scratch.call(entry, &[state, out as i32])?;
                let value = if code >= 0 { scratch.read_i32(out)? } else { 0 };
                Ok((code, value))
            })?;
            lease.check(code)?;
            Ok(value)
        })
    }

    /// Free the state block. Repeat calls, and calls after the context was
    /// closed, do nothing.
    ///
    /// If the slot stays locked past the release wait the handle is left
    /// intact and [`OpusError::SlotBusy`] is returned.
    pub(crate) fn release(&mut self) -> Result<()> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };

        let result = match self.ctx.lease_within(self.slot) {
            Ok(Some(mut lease)) => lease.free(state),
            Ok(None) => {
                self.state = Some(state);
                return Err(OpusError::SlotBusy { slot: self.slot });
            }
            // The instance and its memory are already gone.
            Err(OpusError::ContextClosed) => Ok(()),
            Err(e) => Err(e),
        };
        self.ctx.unbind(self.slot);

        tracing::debug!(kind = self.kind.as_str(), slot = self.slot, "codec handle released");
        result
    }
}

impl Drop for CodecHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(kind = self.kind.as_str(), slot = self.slot, "release on drop failed: {}", e);
            // The state block stays in the instance; only the binding goes.
            if self.state.take().is_some() {
                self.ctx.unbind(self.slot);
            }
        }
    }
}
