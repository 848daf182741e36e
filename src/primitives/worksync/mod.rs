#![forbid(unsafe_code)]

//! Work-synchronization queue.
//!
//! Producers enqueue update batches and block until their batch has been
//! applied to the listener. Whichever producer wins the flush lock drains the
//! whole queue, combines the pending batches into one, and applies the result
//! in a single listener invocation, so concurrently-applying transactions
//! coalesce into a bounded number of listener calls instead of one call per
//! record. `apply` returns only after the caller's batch is flushed.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::types::Result;

/// A combinable batch of work destined for listener `L`.
pub trait Work<L: ?Sized>: Send {
    /// Merges another batch into this one, preserving enqueue order.
    fn combine(self, other: Self) -> Self;
    /// Applies the combined batch to the listener.
    fn apply(self, listener: &L) -> Result<()>;
}

struct SyncState<W> {
    queue: VecDeque<(u64, W)>,
    next_ticket: u64,
    flushed: u64,
}

/// Queue plus single-flusher coordinator in front of one listener.
pub struct WorkSync<L: ?Sized, W> {
    listener: Arc<L>,
    flush: Mutex<()>,
    state: Mutex<SyncState<W>>,
    done: Condvar,
}

impl<L: ?Sized, W: Work<L>> WorkSync<L, W> {
    /// Wraps a listener behind a work queue.
    pub fn new(listener: Arc<L>) -> Self {
        Self {
            listener,
            flush: Mutex::new(()),
            state: Mutex::new(SyncState {
                queue: VecDeque::new(),
                next_ticket: 0,
                flushed: 0,
            }),
            done: Condvar::new(),
        }
    }

    /// The listener this queue feeds.
    pub fn listener(&self) -> &Arc<L> {
        &self.listener
    }

    /// Enqueues `work` and returns once it has been applied, either by this
    /// call acting as the flusher or by a concurrent one.
    ///
    /// If the listener fails, the error surfaces to whichever caller was
    /// flushing; batches drained together are considered consumed either way.
    pub fn apply(&self, work: W) -> Result<()> {
        let ticket = {
            let mut state = self.state.lock();
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.queue.push_back((ticket, work));
            ticket
        };
        loop {
            {
                let state = self.state.lock();
                if state.flushed >= ticket {
                    return Ok(());
                }
            }
            if let Some(_flush) = self.flush.try_lock() {
                let (batch, upto) = {
                    let mut state = self.state.lock();
                    let mut upto = state.flushed;
                    let mut combined: Option<W> = None;
                    while let Some((t, w)) = state.queue.pop_front() {
                        upto = t;
                        combined = Some(match combined {
                            None => w,
                            Some(acc) => acc.combine(w),
                        });
                    }
                    (combined, upto)
                };
                let drained = batch.is_some();
                let result = match batch {
                    Some(batch) => batch.apply(&self.listener),
                    None => Ok(()),
                };
                {
                    let mut state = self.state.lock();
                    if upto > state.flushed {
                        state.flushed = upto;
                    }
                }
                self.done.notify_all();
                if drained {
                    trace!(upto, "worksync.flush");
                }
                result?;
                if upto >= ticket {
                    return Ok(());
                }
            } else {
                let mut state = self.state.lock();
                if state.flushed >= ticket {
                    return Ok(());
                }
                self.done.wait(&mut state);
            }
        }
    }
}
