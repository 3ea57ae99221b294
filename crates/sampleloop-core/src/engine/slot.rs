//! The slot holding the currently published buffer
//!
//! Both the audio thread and the control thread touch this slot, so it is
//! guarded by a spin lock rather than a blocking mutex:
//!
//! - **Audio thread**: only ever calls [`BufferSlot::try_acquire`], which uses
//!   `try_lock()` and gives up immediately if the control thread holds the
//!   lock. A failed acquire means one block of silence, never a stall.
//! - **Control thread**: calls [`BufferSlot::publish`] / [`BufferSlot::clear`],
//!   which spin until the lock is free. The audio side only holds the lock for
//!   one reference-count increment, so the wait is bounded.
//!
//! Inside the lock we only copy or swap an `Arc`. The previous buffer is
//! handed back to the caller and dropped outside the critical section, on the
//! control thread.

use spin::Mutex as SpinMutex;

use crate::buffer::SharedBuffer;

/// A buffer taken from the slot together with the publish generation it belongs to
#[derive(Debug, Clone)]
pub struct AcquiredBuffer {
    pub buffer: SharedBuffer,
    /// Increments on every publish and clear; a change means "restart at frame 0"
    pub generation: u64,
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<SharedBuffer>,
    generation: u64,
}

/// Single-entry holder for the active buffer
#[derive(Debug, Default)]
pub struct BufferSlot {
    state: SpinMutex<SlotState>,
}

impl BufferSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking read for the audio thread
    ///
    /// Returns `None` when the slot is empty *or* when the lock is contended.
    /// Never spins, never allocates, never frees.
    #[inline]
    pub fn try_acquire(&self) -> Option<AcquiredBuffer> {
        let state = self.state.try_lock()?;
        let buffer = state.current.as_ref()?.clone();
        Some(AcquiredBuffer {
            buffer,
            generation: state.generation,
        })
    }

    /// Replace the active buffer (control thread only)
    ///
    /// The previous buffer, if any, is returned to the caller. It must already
    /// be retained elsewhere (the retirement registry) so that dropping the
    /// returned handle is never the last release while the audio thread reads.
    #[must_use = "the previous buffer should be dropped on the control thread"]
    pub fn publish(&self, buffer: SharedBuffer) -> Option<SharedBuffer> {
        self.swap(Some(buffer))
    }

    /// Empty the slot (control thread only). Same discipline as `publish`.
    #[must_use = "the previous buffer should be dropped on the control thread"]
    pub fn clear(&self) -> Option<SharedBuffer> {
        self.swap(None)
    }

    /// Blocking snapshot of the active buffer for non-real-time callers
    pub fn current(&self) -> Option<SharedBuffer> {
        self.state.lock().current.clone()
    }

    /// Current publish generation
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().current.is_none()
    }

    fn swap(&self, next: Option<SharedBuffer>) -> Option<SharedBuffer> {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        std::mem::replace(&mut state.current, next)
    }

    /// Hold the lock for the duration of `f` (used to simulate contention)
    #[cfg(test)]
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.state.lock();
        f()
    }
}
