//! Bounded reorder buffer between the render workers and the sink.
//!
//! Workers finish frames in any order. The buffer releases them strictly by
//! index and admits frame `i` only while `i < next_expected + window`, which
//! bounds memory to `window` frames. The frame at `next_expected` is always
//! admissible, so the worker holding it can never be blocked and the
//! pipeline cannot deadlock.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::frame::RenderedFrame;

/// How often blocked callers re-check the cancel flag.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a push or pop did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The buffer was closed or the job cancelled.
    #[error("ordering buffer stopped")]
    Stopped,

    /// A frame index was delivered twice or after it was already released.
    #[error("frame {index} delivered more than once")]
    Duplicate { index: u64 },
}

#[derive(Debug)]
struct BufferState {
    next_expected: u64,
    pending: BTreeMap<u64, RenderedFrame>,
    closed: bool,
    high_water: usize,
}

/// Reorders frames by index with a bounded look-ahead window.
#[derive(Debug)]
pub struct OrderingBuffer {
    window: usize,
    state: Mutex<BufferState>,
    frame_ready: Condvar,
    space_ready: Condvar,
    cancel: CancelToken,
}

impl OrderingBuffer {
    pub fn new(window: usize, cancel: CancelToken) -> Self {
        Self {
            window: window.max(1),
            state: Mutex::new(BufferState {
                next_expected: 0,
                pending: BTreeMap::new(),
                closed: false,
                high_water: 0,
            }),
            frame_ready: Condvar::new(),
            space_ready: Condvar::new(),
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopped(&self, state: &BufferState) -> bool {
        state.closed || self.cancel.is_cancelled()
    }

    /// Insert a finished frame, blocking while it lies beyond the window.
    pub fn push(&self, frame: RenderedFrame) -> Result<(), BufferError> {
        let index = frame.index();
        let mut state = self.lock();
        loop {
            if self.stopped(&state) {
                return Err(BufferError::Stopped);
            }
            if index < state.next_expected || state.pending.contains_key(&index) {
                return Err(BufferError::Duplicate { index });
            }
            if index < state.next_expected.saturating_add(self.window as u64) {
                break;
            }
            state = self
                .space_ready
                .wait_timeout(state, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        state.pending.insert(index, frame);
        state.high_water = state.high_water.max(state.pending.len());
        let ready = state.pending.contains_key(&state.next_expected);
        drop(state);
        if ready {
            self.frame_ready.notify_one();
        }
        Ok(())
    }

    /// Remove and return the frame at `next_expected`, blocking until it
    /// arrives.
    pub fn pop(&self) -> Result<RenderedFrame, BufferError> {
        let mut state = self.lock();
        loop {
            if self.stopped(&state) {
                return Err(BufferError::Stopped);
            }
            let next = state.next_expected;
            if let Some(frame) = state.pending.remove(&next) {
                state.next_expected += 1;
                drop(state);
                self.space_ready.notify_all();
                return Ok(frame);
            }
            state = self
                .frame_ready
                .wait_timeout(state, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Stop the buffer, drop every pending frame and wake all waiters.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        drop(state);
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded pending frames on close");
        }
        self.frame_ready.notify_all();
        self.space_ready.notify_all();
    }

    /// Frames currently held.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peak number of frames held at once.
    pub fn high_water(&self) -> usize {
        self.lock().high_water
    }

    /// Index the next `pop` will return.
    pub fn next_expected(&self) -> u64 {
        self.lock().next_expected
    }
}
