//! Producers: cold sources the runtime pulls batches from.
//!
//! A [`Source`] is one step of a producer: reading it starts a single
//! asynchronous pull that completes with a batch plus the resumption, or
//! with a terminal [`Cause`]. Reads return a [`Cancel`] handle; a
//! cancelled read must still complete, with an early cause, so the
//! producer can release its resources.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use futures_core::Stream;
use parking_lot::Mutex;

use crate::cause::{Cause, EarlyCause};
use crate::executor::Executor;

/// One completed pull: a batch plus the producer's resumption, or the
/// terminal cause.
pub type Pull<A> = Result<(Vec<A>, Source<A>), Cause>;

/// Callback through which a read completes, invoked exactly once.
pub type PullCb<A> = Box<dyn FnOnce(Pull<A>) + Send>;

/// A cold producer of `A` batches.
pub struct Source<A> {
    read: Box<dyn FnOnce(PullCb<A>) -> Cancel + Send>,
    close: Box<dyn FnOnce(EarlyCause) + Send>,
}

impl<A: Send + 'static> Source<A> {
    /// A source from a read function alone; closing it releases nothing.
    pub fn new(read: impl FnOnce(PullCb<A>) -> Cancel + Send + 'static) -> Source<A> {
        Source::with_close(read, |_| {})
    }

    /// A source with an explicit close path, run when the runtime
    /// abandons the producer without reading it again.
    pub fn with_close(
        read: impl FnOnce(PullCb<A>) -> Cancel + Send + 'static,
        close: impl FnOnce(EarlyCause) + Send + 'static,
    ) -> Source<A> {
        Source {
            read: Box::new(read),
            close: Box::new(close),
        }
    }

    /// Start the read. `cb` will be called exactly once, possibly
    /// synchronously.
    pub fn read(self, cb: PullCb<A>) -> Cancel {
        (self.read)(cb)
    }

    /// Abandon the producer without reading, releasing its resources.
    pub fn close(self, cause: EarlyCause) {
        (self.close)(cause)
    }
}

impl<A> fmt::Debug for Source<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Source")
    }
}

/// Handle to force early completion of an in-flight read. The first
/// [`Cancel::kill`] wins; later calls are no-ops.
pub struct Cancel(Option<Box<dyn FnOnce(EarlyCause) + Send>>);

impl Cancel {
    /// A handle with nothing to cancel.
    pub fn noop() -> Cancel {
        Cancel(None)
    }

    /// A handle running `f` on the first kill.
    pub fn new(f: impl FnOnce(EarlyCause) + Send + 'static) -> Cancel {
        Cancel(Some(Box::new(f)))
    }

    /// Force the read to complete early with `cause`.
    pub fn kill(&mut self, cause: EarlyCause) {
        if let Some(f) = self.0.take() {
            f(cause);
        }
    }
}

impl fmt::Debug for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cancel").field(&self.0.is_some()).finish()
    }
}

/// A finite source delivering one value per read, completing with `End`.
pub fn from_iter<I>(values: I) -> Source<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    iter_then(values, Cause::End)
}

/// A finite source that completes with `terminal` once exhausted. Useful
/// for producers that fail after a prefix.
pub fn iter_then<I>(values: I, terminal: Cause) -> Source<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    fn go<It, A>(mut it: It, terminal: Cause) -> Source<A>
    where
        It: Iterator<Item = A> + Send + 'static,
        A: Send + 'static,
    {
        Source::new(move |cb| {
            match it.next() {
                Some(value) => cb(Ok((vec![value], go(it, terminal)))),
                None => cb(Err(terminal)),
            }
            Cancel::noop()
        })
    }
    go(values.into_iter(), terminal)
}

/// An endless source producing `f()` on every read.
pub fn repeat_with<A, F>(mut f: F) -> Source<A>
where
    A: Send + 'static,
    F: FnMut() -> A + Send + 'static,
{
    Source::new(move |cb| {
        let value = f();
        cb(Ok((vec![value], repeat_with(f))));
        Cancel::noop()
    })
}

struct ChannelInner<A> {
    queue: VecDeque<A>,
    waiting: Option<PullCb<A>>,
    closed: Option<Cause>,
}

/// The push half of [`channel`]. Dropping it completes the source with
/// `End`.
pub struct Sender<A> {
    inner: Arc<Mutex<ChannelInner<A>>>,
}

impl<A: Send + 'static> Sender<A> {
    /// Push one value; a parked read completes immediately.
    pub fn send(&self, value: A) {
        let mut inner = self.inner.lock();
        if inner.closed.is_some() {
            return;
        }
        match inner.waiting.take() {
            Some(cb) => {
                drop(inner);
                cb(Ok((vec![value], chan_source(self.inner.clone()))));
            }
            None => inner.queue.push_back(value),
        }
    }

    /// Terminate the source with `cause` once the queue drains.
    pub fn close(&self, cause: Cause) {
        let mut inner = self.inner.lock();
        if inner.closed.is_some() {
            return;
        }
        inner.closed = Some(cause.clone());
        if let Some(cb) = inner.waiting.take() {
            drop(inner);
            cb(Err(cause));
        }
    }
}

impl<A> fmt::Debug for Sender<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sender")
    }
}

impl<A> Drop for Sender<A> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.closed.is_none() {
            inner.closed = Some(Cause::End);
            if let Some(cb) = inner.waiting.take() {
                drop(inner);
                cb(Err(Cause::End));
            }
        }
    }
}

fn chan_source<A: Send + 'static>(inner: Arc<Mutex<ChannelInner<A>>>) -> Source<A> {
    let close_inner = inner.clone();
    Source::with_close(
        move |cb| {
            let mut guard = inner.lock();
            if let Some(value) = guard.queue.pop_front() {
                drop(guard);
                let next = chan_source(inner);
                cb(Ok((vec![value], next)));
                return Cancel::noop();
            }
            if let Some(cause) = guard.closed.clone() {
                drop(guard);
                cb(Err(cause));
                return Cancel::noop();
            }
            guard.waiting = Some(cb);
            drop(guard);
            Cancel::new(move |cause| {
                let cb = inner.lock().waiting.take();
                if let Some(cb) = cb {
                    cb(Err(cause.into()));
                }
            })
        },
        move |_cause| {
            let mut guard = close_inner.lock();
            guard.closed = Some(Cause::Kill);
            guard.queue.clear();
        },
    )
}

/// A push-driven source: values sent on the returned [`Sender`] are
/// delivered to whichever read is parked.
pub fn channel<A: Send + 'static>() -> (Sender<A>, Source<A>) {
    let inner = Arc::new(Mutex::new(ChannelInner {
        queue: VecDeque::new(),
        waiting: None,
        closed: None,
    }));
    (
        Sender {
            inner: inner.clone(),
        },
        chan_source(inner),
    )
}

struct StreamInner<A> {
    stream: Option<Pin<Box<dyn Stream<Item = A> + Send>>>,
    waiting: Option<PullCb<A>>,
}

struct StreamWaker<A> {
    shared: Arc<Mutex<StreamInner<A>>>,
    exec: Arc<dyn Executor>,
}

impl<A: Send + 'static> Wake for StreamWaker<A> {
    fn wake(self: Arc<Self>) {
        let shared = self.shared.clone();
        let exec = self.exec.clone();
        self.exec
            .submit(Box::new(move || poll_stream(shared, exec)));
    }
}

fn poll_stream<A: Send + 'static>(shared: Arc<Mutex<StreamInner<A>>>, exec: Arc<dyn Executor>) {
    let (cb, pull) = {
        let mut guard = shared.lock();
        if guard.waiting.is_none() {
            // read cancelled between scheduling and polling
            return;
        }
        let Some(mut stream) = guard.stream.take() else {
            return;
        };
        let waker = Waker::from(Arc::new(StreamWaker {
            shared: shared.clone(),
            exec: exec.clone(),
        }));
        let mut cx = Context::from_waker(&waker);
        match stream.as_mut().poll_next(&mut cx) {
            Poll::Ready(Some(value)) => {
                guard.stream = Some(stream);
                let cb = guard.waiting.take().expect("read checked in flight");
                let next = stream_source(shared.clone(), exec);
                (cb, Ok((vec![value], next)))
            }
            Poll::Ready(None) => {
                let cb = guard.waiting.take().expect("read checked in flight");
                (cb, Err(Cause::End))
            }
            Poll::Pending => {
                guard.stream = Some(stream);
                return;
            }
        }
    };
    cb(pull);
}

fn stream_source<A: Send + 'static>(
    shared: Arc<Mutex<StreamInner<A>>>,
    exec: Arc<dyn Executor>,
) -> Source<A> {
    let close_shared = shared.clone();
    Source::with_close(
        move |cb| {
            shared.lock().waiting = Some(cb);
            {
                let shared = shared.clone();
                let exec2 = exec.clone();
                exec.submit(Box::new(move || poll_stream(shared, exec2)));
            }
            Cancel::new(move |cause| {
                let (cb, stream) = {
                    let mut guard = shared.lock();
                    (guard.waiting.take(), guard.stream.take())
                };
                drop(stream);
                if let Some(cb) = cb {
                    cb(Err(cause.into()));
                }
            })
        },
        move |_cause| {
            let stream = close_shared.lock().stream.take();
            drop(stream);
        },
    )
}

/// Adapt any [`futures_core::Stream`] into a producer, polling it with
/// tasks on `exec`.
pub fn from_stream<S>(stream: S, exec: Arc<dyn Executor>) -> Source<S::Item>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    let shared = Arc::new(Mutex::new(StreamInner {
        stream: Some(Box::pin(stream) as Pin<Box<dyn Stream<Item = S::Item> + Send>>),
        waiting: None,
    }));
    stream_source(shared, exec)
}
