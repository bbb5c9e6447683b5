//! The consumer-facing side of a pipeline.
//!
//! [`Handle`] is the raw single-slot callback interface: each `get`
//! yields one batch or the terminal cause, `close` unsubscribes and
//! waits for cleanup. [`Downstream`] layers a [`futures_core::Stream`]
//! on top, flattening batches, surfacing errors, and suppressing `Kill`
//! at the boundary so a pipeline torn down by its consumer reads as a
//! clean end.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_core::Stream;
use parking_lot::Mutex;

use crate::cause::Cause;
use crate::runtime::driver::{CloseCb, GetCb};

/// The pull interface of a running pipeline: one batch per `get`, a
/// terminal cause once the program has halted and both producers are
/// done.
pub struct Handle<O> {
    get_fn: Arc<dyn Fn(GetCb<O>) + Send + Sync>,
    close_fn: Arc<dyn Fn(CloseCb) + Send + Sync>,
}

impl<O: Send + 'static> Handle<O> {
    pub(crate) fn from_parts(
        get_fn: Arc<dyn Fn(GetCb<O>) + Send + Sync>,
        close_fn: Arc<dyn Fn(CloseCb) + Send + Sync>,
    ) -> Handle<O> {
        Handle { get_fn, close_fn }
    }

    /// Ask for the next batch. `cb` fires exactly once, with a batch or
    /// the terminal cause. At most one `get` may be outstanding.
    pub fn get(&self, cb: impl FnOnce(Result<Vec<O>, Cause>) + Send + 'static) {
        (self.get_fn)(Box::new(cb));
    }

    /// Unsubscribe. Producers are cancelled, finalizers run, and `cb`
    /// fires once cleanup has completed.
    pub fn close(&self, cb: impl FnOnce() + Send + 'static) {
        (self.close_fn)(Box::new(cb));
    }

    /// Wrap the handle into a lazy stream of outputs.
    pub fn into_stream(self) -> Downstream<O> {
        Downstream {
            handle: self,
            slot: Arc::new(Mutex::new(Slot {
                delivered: None,
                waker: None,
                requested: false,
            })),
            buffer: VecDeque::new(),
            done: false,
        }
    }
}

impl<O> Clone for Handle<O> {
    fn clone(&self) -> Self {
        Handle {
            get_fn: self.get_fn.clone(),
            close_fn: self.close_fn.clone(),
        }
    }
}

impl<O> fmt::Debug for Handle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handle")
    }
}

struct Slot<O> {
    delivered: Option<Result<Vec<O>, Cause>>,
    waker: Option<Waker>,
    requested: bool,
}

/// A lazy stream over a pipeline's outputs.
///
/// Yields each emitted value in order; an `Error` cause is surfaced as
/// the final `Err` item, while `End` and `Kill` finish the stream
/// cleanly. Dropping an unfinished stream unsubscribes, so producer
/// finalizers run even when the consumer walks away.
#[must_use = "streams do nothing unless polled"]
pub struct Downstream<O> {
    handle: Handle<O>,
    slot: Arc<Mutex<Slot<O>>>,
    buffer: VecDeque<O>,
    done: bool,
}

impl<O: Send + 'static + Unpin> Stream for Downstream<O> {
    type Item = Result<O, crate::cause::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(value) = this.buffer.pop_front() {
            return Poll::Ready(Some(Ok(value)));
        }
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            let mut slot = this.slot.lock();
            if let Some(res) = slot.delivered.take() {
                slot.requested = false;
                drop(slot);
                match res {
                    Ok(batch) => {
                        this.buffer.extend(batch);
                        match this.buffer.pop_front() {
                            Some(value) => return Poll::Ready(Some(Ok(value))),
                            None => continue,
                        }
                    }
                    Err(Cause::Error(e)) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Err(_) => {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                }
            }
            slot.waker = Some(cx.waker().clone());
            if slot.requested {
                return Poll::Pending;
            }
            slot.requested = true;
            drop(slot);
            let slot = this.slot.clone();
            this.handle.get(move |res| {
                let waker = {
                    let mut slot = slot.lock();
                    slot.delivered = Some(res);
                    slot.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            // an inline executor may already have filled the slot
        }
    }
}

impl<O> Drop for Downstream<O> {
    fn drop(&mut self) {
        if !self.done {
            (self.handle.close_fn)(Box::new(|| {}));
        }
    }
}

impl<O> fmt::Debug for Downstream<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downstream")
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .finish()
    }
}
