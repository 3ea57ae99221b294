//! Deferred reclamation of retired buffers
//!
//! `Arc` alone is not enough to keep deallocation off the audio thread: if the
//! control thread clears the slot while the audio callback holds a clone, the
//! callback's drop would be the last one and would free the storage right
//! there. The [`RetirementRegistry`] holds one extra strong reference to every
//! buffer that was ever published, so the audio thread's drop is never the
//! last. A background [`Sweeper`] periodically releases entries that nobody
//! else holds anymore, so the actual free happens on the sweep thread.
//!
//! ## Orphan threshold
//!
//! The holders a buffer can have are:
//! - the registry itself (exactly one reference, from `retain` until reclaimed)
//! - the buffer slot (at most one)
//! - the audio callback's acquired handle (at most one, for one block)
//! - loader/UI transients on the control side
//!
//! `sweep` borrows entries without cloning them, so a strong count of
//! [`ORPHANED_STRONG_COUNT`] means the registry is the sole owner. Any higher
//! count means someone, possibly the audio thread, can still read the buffer.
//! Once the count is at the threshold no new holder can appear: the buffer is
//! no longer in the slot, and the registry lock is held while we check.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::buffer::SharedBuffer;

/// Strong count at which a registry entry is considered orphaned
pub const ORPHANED_STRONG_COUNT: usize = 1;

/// Keep-alive list for every buffer that has been handed to the slot
#[derive(Debug, Default)]
pub struct RetirementRegistry {
    entries: Mutex<Vec<SharedBuffer>>,
}

impl RetirementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a strong reference; call before the buffer is published
    ///
    /// Retaining a buffer that is already registered is a no-op: a second
    /// entry would keep the first one's count above the threshold forever.
    pub fn retain(&self, buffer: &SharedBuffer) {
        let mut entries = self.entries();
        if !entries.iter().any(|b| Arc::ptr_eq(b, buffer)) {
            entries.push(Arc::clone(buffer));
        }
    }

    /// Release every entry the registry alone is keeping alive
    ///
    /// Returns how many buffers were reclaimed. The buffers are dropped after
    /// the registry lock is released, on the calling thread.
    pub fn sweep(&self) -> usize {
        let reclaimed: Vec<SharedBuffer> = {
            let mut entries = self.entries();
            let mut reclaimed = Vec::new();
            // Reverse so swap_remove only moves entries we've already checked
            for i in (0..entries.len()).rev() {
                if Arc::strong_count(&entries[i]) <= ORPHANED_STRONG_COUNT {
                    reclaimed.push(entries.swap_remove(i));
                }
            }
            reclaimed
        };

        let count = reclaimed.len();
        for buffer in &reclaimed {
            log::debug!("Sweep reclaiming buffer: {}", buffer.name());
        }
        drop(reclaimed);
        count
    }

    /// Number of buffers currently kept alive
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Whether this exact buffer is retained
    pub fn contains(&self, buffer: &SharedBuffer) -> bool {
        self.entries().iter().any(|b| Arc::ptr_eq(b, buffer))
    }

    fn entries(&self) -> MutexGuard<'_, Vec<SharedBuffer>> {
        // A panic while holding this lock can't leave the Vec half-modified
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for RetirementRegistry {
    /// Release orphans; leak anything still held elsewhere
    ///
    /// An entry with other holders may still be read by the audio thread.
    /// Dropping it here would hand the final release to that thread, so it is
    /// leaked until process exit instead.
    fn drop(&mut self) {
        let entries = std::mem::take(self.entries.get_mut().unwrap_or_else(|e| e.into_inner()));
        let mut leaked = 0usize;
        for buffer in entries {
            if Arc::strong_count(&buffer) <= ORPHANED_STRONG_COUNT {
                drop(buffer);
            } else {
                leaked += 1;
                std::mem::forget(buffer);
            }
        }
        if leaked > 0 {
            log::warn!("Registry dropped with {} buffer(s) still in use; leaking them", leaked);
        }
    }
}

/// Background thread that sweeps a registry on a fixed period
///
/// Dropping the handle stops the thread (after one final sweep) and joins it.
pub struct Sweeper {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the `buffer-sweep` thread
    pub fn spawn(registry: Arc<RetirementRegistry>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("buffer-sweep".to_string())
            .spawn(move || {
                log::info!("Buffer sweep thread started ({:?} period)", interval);
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let reclaimed = registry.sweep();
                            if reclaimed > 0 {
                                log::debug!("Sweep reclaimed {} buffer(s)", reclaimed);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let reclaimed = registry.sweep();
                log::info!(
                    "Buffer sweep thread stopping ({} reclaimed on exit, {} still held)",
                    reclaimed,
                    registry.len()
                );
            })?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to finish
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Buffer sweep thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
