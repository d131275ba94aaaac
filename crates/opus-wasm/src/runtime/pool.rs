//! Fixed arena of instance slots.
//!
//! A codec handle's state block lives in one instance's linear memory, so a
//! handle is bound to a slot for its whole life. Each slot is guarded by its
//! own mutex: operations against the same instance queue up, operations against
//! different instances run in parallel. Slots are instantiated on first use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use super::instance::CodecInstance;
use super::module::SandboxModule;
use crate::error::{OpusError, Result};

enum SlotState {
    Vacant,
    Ready(CodecInstance),
    Closed,
}

struct Slot {
    state: Mutex<SlotState>,
    handles: AtomicUsize,
}

/// Exclusive access to one instance for the duration of the guard.
pub type InstanceGuard<'a> = MappedMutexGuard<'a, CodecInstance>;

pub(crate) struct InstancePool {
    slots: Vec<Slot>,
    cursor: AtomicUsize,
}

impl InstancePool {
    pub(crate) fn new(size: usize) -> Self {
        let slots = (0..size)
            .map(|_| Slot {
                state: Mutex::new(SlotState::Vacant),
                handles: AtomicUsize::new(0),
            })
            .collect();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Place an already created instance into its slot.
    pub(crate) fn seed(&self, instance: CodecInstance) {
        let slot = instance.slot();
        *self.slots[slot].state.lock() = SlotState::Ready(instance);
    }

    /// Block until slot `slot` is free, instantiating it if still vacant.
    pub(crate) fn checkout<'a>(
        &'a self,
        slot: usize,
        module: &SandboxModule,
    ) -> Result<InstanceGuard<'a>> {
        let cell = self
            .slots
            .get(slot)
            .ok_or_else(|| OpusError::Protocol(format!("no instance slot {}", slot)))?;

        let mut guard = cell.state.lock();
        Self::fill(&mut guard, slot, module)?;
        Self::ready(guard)
    }

    /// Like [`checkout`](Self::checkout) but gives up after `wait`; `None` on timeout.
    pub(crate) fn checkout_within<'a>(
        &'a self,
        slot: usize,
        module: &SandboxModule,
        wait: Duration,
    ) -> Result<Option<InstanceGuard<'a>>> {
        let cell = self
            .slots
            .get(slot)
            .ok_or_else(|| OpusError::Protocol(format!("no instance slot {}", slot)))?;

        let Some(mut guard) = cell.state.try_lock_for(wait) else {
            return Ok(None);
        };
        Self::fill(&mut guard, slot, module)?;
        Self::ready(guard).map(Some)
    }

    /// Take whichever slot is free right now, otherwise wait on the next one
    /// in round-robin order.
    pub(crate) fn checkout_any<'a>(&'a self, module: &SandboxModule) -> Result<InstanceGuard<'a>> {
        for (index, cell) in self.slots.iter().enumerate() {
            if let Some(mut guard) = cell.state.try_lock() {
                if matches!(*guard, SlotState::Closed) {
                    return Err(OpusError::ContextClosed);
                }
                Self::fill(&mut guard, index, module)?;
                return Self::ready(guard);
            }
        }

        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.checkout(slot, module)
    }

    /// Non-blocking variant that never instantiates; `None` if nothing is idle.
    pub(crate) fn try_checkout_ready(&self) -> Option<InstanceGuard<'_>> {
        self.slots.iter().find_map(|cell| {
            let guard = cell.state.try_lock()?;
            Self::ready(guard).ok()
        })
    }

    /// Bind a new handle to the least loaded slot.
    pub(crate) fn assign(&self) -> usize {
        let slot = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, cell)| cell.handles.load(Ordering::Relaxed))
            .map(|(index, _)| index)
            .unwrap_or(0);
        self.slots[slot].handles.fetch_add(1, Ordering::Relaxed);
        slot
    }

    /// Undo an [`assign`](Self::assign) once the handle is gone.
    pub(crate) fn unassign(&self, slot: usize) {
        if let Some(cell) = self.slots.get(slot) {
            cell.handles.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Number of handles bound to each slot.
    pub(crate) fn load(&self) -> Vec<usize> {
        self.slots
            .iter()
            .map(|cell| cell.handles.load(Ordering::Relaxed))
            .collect()
    }

    /// Drop every instance, waiting up to `wait` per slot for in-flight
    /// operations. A slot still held after that is left to the pool's own drop.
    pub(crate) fn close(&self, wait: Duration) {
        for (slot, cell) in self.slots.iter().enumerate() {
            match cell.state.try_lock_for(wait) {
                Some(mut state) => *state = SlotState::Closed,
                None => tracing::warn!(slot, "instance slot still leased at close"),
            }
        }
    }

    fn fill(state: &mut SlotState, slot: usize, module: &SandboxModule) -> Result<()> {
        if matches!(state, SlotState::Vacant) {
            *state = SlotState::Ready(module.instantiate(slot)?);
        }
        Ok(())
    }

    fn ready(guard: MutexGuard<'_, SlotState>) -> Result<InstanceGuard<'_>> {
        MutexGuard::try_map(guard, |state| match state {
            SlotState::Ready(instance) => Some(instance),
            _ => None,
        })
        .map_err(|_| OpusError::ContextClosed)
    }
}
