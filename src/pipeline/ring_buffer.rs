//! Blocking byte ring buffer linking two adjacent elements.

use parking_lot::{Condvar, Mutex, MutexGuard};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use std::time::Instant;

use crate::{BufferError, Timeout};

/// Fixed-capacity byte FIFO with blocking reads and writes.
///
/// One writer thread and one reader thread use the buffer at a time. The
/// byte storage is a [`HeapRb`]; a single mutex guards it together with the
/// end-of-stream and abort flags, and two condition variables wake the
/// blocked side.
///
/// # Example
///
/// ```
/// use audio_pipeline::{RingBuffer, Timeout, BufferError};
///
/// let rb = RingBuffer::new(16);
/// assert_eq!(rb.write(b"abc", Timeout::Immediate), Ok(3));
/// rb.mark_done();
///
/// let mut out = [0u8; 8];
/// assert_eq!(rb.read(&mut out, Timeout::Immediate), Ok(3));
/// assert_eq!(&out[..3], b"abc");
/// assert_eq!(rb.read(&mut out, Timeout::Immediate), Err(BufferError::Done));
/// ```
pub struct RingBuffer {
    state: Mutex<BufferState>,
    /// Signalled when bytes arrive or a flag changes.
    readable: Condvar,
    /// Signalled when space frees up or a flag changes.
    writable: Condvar,
    capacity: usize,
}

struct BufferState {
    storage: HeapRb<u8>,
    done: bool,
    aborted: bool,
}

impl RingBuffer {
    /// Creates an empty buffer holding up to `capacity` bytes.
    ///
    /// A zero capacity is rounded up to one byte.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(BufferState {
                storage: HeapRb::new(capacity),
                done: false,
                aborted: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        }
    }

    /// Writes `bytes`, blocking while the buffer is full.
    ///
    /// Returns the number of bytes written. If the timeout expires after part
    /// of the slice went in, the partial count is returned; if nothing could
    /// be written, [`BufferError::Timeout`].
    ///
    /// # Errors
    ///
    /// - [`BufferError::Aborted`] once [`abort()`](Self::abort) was called
    /// - [`BufferError::Done`] if the producer already marked end of stream
    /// - [`BufferError::Timeout`] if no byte fit before the deadline
    pub fn write(&self, bytes: &[u8], timeout: Timeout) -> Result<usize, BufferError> {
        if bytes.is_empty() {
            return Ok(0);
        }

        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        let mut written = 0;
        let mut timed_out = false;

        loop {
            if state.aborted {
                return Err(BufferError::Aborted);
            }
            if state.done {
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(BufferError::Done)
                };
            }

            let pushed = state.storage.push_slice(&bytes[written..]);
            if pushed > 0 {
                written += pushed;
                self.readable.notify_one();
            }

            if written == bytes.len() {
                return Ok(written);
            }
            if timed_out {
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(BufferError::Timeout)
                };
            }

            timed_out = wait(&self.writable, &mut state, deadline);
        }
    }

    /// Reads up to `dest.len()` bytes, blocking while the buffer is empty.
    ///
    /// # Errors
    ///
    /// - [`BufferError::Done`] once the producer marked end of stream and every
    ///   byte written before it has been read; every later call reports it too
    /// - [`BufferError::Aborted`] once [`abort()`](Self::abort) was called
    /// - [`BufferError::Timeout`] if nothing arrived before the deadline
    pub fn read(&self, dest: &mut [u8], timeout: Timeout) -> Result<usize, BufferError> {
        if dest.is_empty() {
            return Ok(0);
        }

        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        let mut timed_out = false;

        loop {
            if state.aborted {
                return Err(BufferError::Aborted);
            }

            let popped = state.storage.pop_slice(dest);
            if popped > 0 {
                self.writable.notify_one();
                return Ok(popped);
            }

            if state.done {
                return Err(BufferError::Done);
            }
            if timed_out {
                return Err(BufferError::Timeout);
            }

            timed_out = wait(&self.readable, &mut state, deadline);
        }
    }

    /// Marks end of stream. Idempotent.
    ///
    /// Bytes already in the buffer stay readable; once they are drained,
    /// reads report [`BufferError::Done`].
    pub fn mark_done(&self) {
        let mut state = self.state.lock();
        if !state.done {
            state.done = true;
            self.readable.notify_all();
            self.writable.notify_all();
        }
    }

    /// Fails every blocked and future call with [`BufferError::Aborted`].
    ///
    /// Used during teardown to release workers blocked in I/O. Stays in
    /// effect until [`reset()`](Self::reset).
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if !state.aborted {
            state.aborted = true;
            self.readable.notify_all();
            self.writable.notify_all();
        }
    }

    /// Discards all data and clears the done and abort flags.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.storage.clear();
        state.done = false;
        state.aborted = false;
        self.writable.notify_all();
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes waiting to be read.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().storage.occupied_len()
    }

    /// Number of bytes that can be written without blocking.
    #[must_use]
    pub fn vacant(&self) -> usize {
        self.state.lock().storage.vacant_len()
    }

    /// Returns true once end of stream was marked.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// Returns true once the buffer was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("available", &state.storage.occupied_len())
            .field("done", &state.done)
            .field("aborted", &state.aborted)
            .finish()
    }
}

/// Blocks on `cv` until notified or `deadline` passes. Returns true on timeout.
fn wait(cv: &Condvar, guard: &mut MutexGuard<'_, BufferState>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            cv.wait(guard);
            false
        }
        Some(deadline) => {
            if Instant::now() >= deadline {
                return true;
            }
            cv.wait_until(guard, deadline).timed_out()
        }
    }
}
