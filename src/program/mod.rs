//! The reified merge program: a coinductive tree of demands and emissions.
//!
//! A [`Wye`] describes what a two-input merge should do next: read from the
//! left producer, read from the right producer, race both, emit a batch
//! downstream, or terminate. Programs are pure values; the runtime in
//! [`crate::runtime`] interprets them against live producers, and the
//! rewrites in [`transform`] restructure them without inventing output.
//!
//! # Examples
//!
//! ```
//! use wye::{Cause, Wye};
//!
//! let program: Wye<i32, i32, i32> =
//!     Wye::receive_l(|n| Wye::emit(n * 2).then(|| Wye::halt(Cause::End)));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::cause::{Cause, EarlyCause, Error, ReceiveY};

pub mod combinators;
pub mod transform;

/// Receive closure for a one-sided await: gets the value, or the early
/// cause when that side can no longer produce.
pub type Recv<V, L, R, O> = Box<dyn FnOnce(Result<V, EarlyCause>) -> Wye<L, R, O> + Send>;

/// Receive closure for a two-sided await.
pub type RecvBoth<L, R, O> = Box<dyn FnOnce(ReceiveY<L, R>) -> Wye<L, R, O> + Send>;

/// A deferred continuation frame: given the cause the preceding segment
/// halted with, produce the next segment.
pub type Frame<L, R, O> = Box<dyn FnOnce(Cause) -> Wye<L, R, O> + Send>;

/// A merge program over a left input `L`, a right input `R`, and an
/// output `O`.
///
/// Leaves are [`Wye::Halt`]; interior nodes either emit a batch or demand
/// input from one or both sides. [`Wye::Append`] carries the stack of
/// pending continuations, so sequencing never nests closures unboundedly.
pub enum Wye<L, R, O> {
    /// Produce a finite batch downstream, then complete with `End`.
    Emit(Vec<O>),
    /// Demand one value from the left side.
    AwaitL(Recv<L, L, R, O>),
    /// Demand one value from the right side.
    AwaitR(Recv<R, L, R, O>),
    /// Demand whichever side resolves first.
    AwaitBoth(RecvBoth<L, R, O>),
    /// Terminate with a cause.
    Halt(Cause),
    /// A program followed by a stack of continuation frames, applied in
    /// order once the head halts.
    Append(Box<Wye<L, R, O>>, VecDeque<Frame<L, R, O>>),
}

impl<L, R, O> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    /// Emit a single value.
    pub fn emit(value: O) -> Self {
        Wye::Emit(vec![value])
    }

    /// Emit a batch of values.
    pub fn emit_all(values: Vec<O>) -> Self {
        Wye::Emit(values)
    }

    /// Terminate with `cause`.
    pub fn halt(cause: Cause) -> Self {
        Wye::Halt(cause)
    }

    /// Demand one value from the left side; `recv` is total over success
    /// and early termination.
    pub fn await_l(
        recv: impl FnOnce(Result<L, EarlyCause>) -> Self + Send + 'static,
    ) -> Self {
        Wye::AwaitL(Box::new(recv))
    }

    /// Demand one value from the right side; `recv` is total over success
    /// and early termination.
    pub fn await_r(
        recv: impl FnOnce(Result<R, EarlyCause>) -> Self + Send + 'static,
    ) -> Self {
        Wye::AwaitR(Box::new(recv))
    }

    /// Demand whichever side resolves first.
    pub fn await_both(recv: impl FnOnce(ReceiveY<L, R>) -> Self + Send + 'static) -> Self {
        Wye::AwaitBoth(Box::new(recv))
    }

    /// Demand a left value, halting with the early cause if the left side
    /// is gone.
    pub fn receive_l(on_value: impl FnOnce(L) -> Self + Send + 'static) -> Self {
        Self::receive_l_or(|early| Wye::Halt(early.into()), on_value)
    }

    /// Demand a left value, routing early termination to `fallback`.
    pub fn receive_l_or(
        fallback: impl FnOnce(EarlyCause) -> Self + Send + 'static,
        on_value: impl FnOnce(L) -> Self + Send + 'static,
    ) -> Self {
        Self::await_l(|res| match res {
            Ok(value) => on_value(value),
            Err(early) => fallback(early),
        })
    }

    /// Demand a right value, halting with the early cause if the right
    /// side is gone.
    pub fn receive_r(on_value: impl FnOnce(R) -> Self + Send + 'static) -> Self {
        Self::receive_r_or(|early| Wye::Halt(early.into()), on_value)
    }

    /// Demand a right value, routing early termination to `fallback`.
    pub fn receive_r_or(
        fallback: impl FnOnce(EarlyCause) -> Self + Send + 'static,
        on_value: impl FnOnce(R) -> Self + Send + 'static,
    ) -> Self {
        Self::await_r(|res| match res {
            Ok(value) => on_value(value),
            Err(early) => fallback(early),
        })
    }

    /// Demand both sides at once.
    pub fn receive_both(recv: impl FnOnce(ReceiveY<L, R>) -> Self + Send + 'static) -> Self {
        Self::await_both(recv)
    }

    /// Run `next` with whatever cause this program halts with.
    pub fn on_halt(self, next: impl FnOnce(Cause) -> Self + Send + 'static) -> Self {
        let frame: Frame<L, R, O> = Box::new(next);
        match self {
            Wye::Append(head, mut frames) => {
                frames.push_back(frame);
                Wye::Append(head, frames)
            }
            other => Wye::Append(Box::new(other), VecDeque::from([frame])),
        }
    }

    /// Sequence: once this program completes normally, continue with
    /// `next`. Early termination short-circuits.
    pub fn then(self, next: impl FnOnce() -> Self + Send + 'static) -> Self {
        self.on_halt(|cause| match cause {
            Cause::End => next(),
            early => Wye::Halt(early),
        })
    }

    /// Tag this program's termination with an outer `cause`; `End` leaves
    /// it untouched.
    pub fn caused_by(self, cause: Cause) -> Self {
        match cause {
            Cause::End => self,
            outer => self.on_halt(move |inner| Wye::Halt(inner.caused_by(outer))),
        }
    }

    /// Replace a terminal `Kill` with a clean end. Errors pass through.
    pub fn swallow_kill(self) -> Self {
        self.on_halt(|cause| match cause {
            Cause::Kill => Wye::Halt(Cause::End),
            other => Wye::Halt(other),
        })
    }

    /// Force this program to terminate with `Kill` once it halts, keeping
    /// an `Error` if one was the actual reason.
    pub fn kill(self) -> Self {
        self.on_halt(|cause| match cause {
            Cause::Error(e) => Wye::Halt(Cause::Error(e)),
            _ => Wye::Halt(Cause::Kill),
        })
    }

    /// Returns `true` if the program is a bare halt.
    pub fn is_halted(&self) -> bool {
        matches!(self, Wye::Halt(_))
    }

    /// Reduce to the next observable node.
    ///
    /// Stepping runs on an explicit frame stack: continuation frames are
    /// unfolded iteratively, so arbitrarily deep `Append` chains built by
    /// the structural transformers cannot grow the native stack. Empty
    /// emissions are discarded here. A frame or receive closure that
    /// panics becomes `Halt(Error(_))`.
    pub fn step(self) -> Step<L, R, O> {
        let mut cur = self;
        let mut pending: VecDeque<Frame<L, R, O>> = VecDeque::new();
        loop {
            match cur {
                Wye::Append(head, mut frames) => {
                    frames.append(&mut pending);
                    pending = frames;
                    cur = *head;
                }
                Wye::Emit(os) if os.is_empty() => match pending.pop_front() {
                    Some(frame) => cur = guarded(frame, Cause::End),
                    None => return Step::Halt(Cause::End),
                },
                Wye::Emit(os) => return Step::Emit(os, Cont { frames: pending }),
                Wye::AwaitL(recv) => return Step::AwaitL(recv, Cont { frames: pending }),
                Wye::AwaitR(recv) => return Step::AwaitR(recv, Cont { frames: pending }),
                Wye::AwaitBoth(recv) => return Step::AwaitBoth(recv, Cont { frames: pending }),
                Wye::Halt(cause) => match pending.pop_front() {
                    Some(frame) => cur = guarded(frame, cause),
                    None => return Step::Halt(cause),
                },
            }
        }
    }
}

impl<L, R, O> fmt::Debug for Wye<L, R, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wye::Emit(os) => f.debug_tuple("Emit").field(&os.len()).finish(),
            Wye::AwaitL(_) => f.write_str("AwaitL"),
            Wye::AwaitR(_) => f.write_str("AwaitR"),
            Wye::AwaitBoth(_) => f.write_str("AwaitBoth"),
            Wye::Halt(cause) => f.debug_tuple("Halt").field(cause).finish(),
            Wye::Append(head, frames) => f
                .debug_struct("Append")
                .field("head", head)
                .field("frames", &frames.len())
                .finish(),
        }
    }
}

/// Apply a boxed receive closure, converting a panic into `Halt(Error)`.
pub(crate) fn guarded<T, L, R, O>(
    f: Box<dyn FnOnce(T) -> Wye<L, R, O> + Send>,
    arg: T,
) -> Wye<L, R, O> {
    match panic::catch_unwind(AssertUnwindSafe(move || f(arg))) {
        Ok(next) => next,
        Err(payload) => Wye::Halt(Cause::Error(Error::from_panic(payload))),
    }
}

/// An ordered stack of pending continuation frames.
pub struct Cont<L, R, O> {
    frames: VecDeque<Frame<L, R, O>>,
}

impl<L, R, O> Cont<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    /// A continuation with no frames.
    pub fn empty() -> Self {
        Cont {
            frames: VecDeque::new(),
        }
    }

    /// Returns `true` if resuming would go straight to `Halt(End)`.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Run `program` first, then the frames of this continuation.
    pub fn prepend(self, program: Wye<L, R, O>) -> Wye<L, R, O> {
        if self.frames.is_empty() {
            return program;
        }
        match program {
            Wye::Append(head, mut frames) => {
                let mut tail = self.frames;
                frames.append(&mut tail);
                Wye::Append(head, frames)
            }
            other => Wye::Append(Box::new(other), self.frames),
        }
    }

    /// Resume the continuation as if the preceding segment completed
    /// normally.
    pub fn resume(self) -> Wye<L, R, O> {
        self.prepend(Wye::Halt(Cause::End))
    }
}

impl<L, R, O> fmt::Debug for Cont<L, R, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cont").field(&self.frames.len()).finish()
    }
}

/// The result of [`Wye::step`]: the next observable node plus the stack
/// of continuations behind it.
pub enum Step<L, R, O> {
    /// A non-empty batch to emit.
    Emit(Vec<O>, Cont<L, R, O>),
    /// Left demand.
    AwaitL(Recv<L, L, R, O>, Cont<L, R, O>),
    /// Right demand.
    AwaitR(Recv<R, L, R, O>, Cont<L, R, O>),
    /// Two-sided demand.
    AwaitBoth(RecvBoth<L, R, O>, Cont<L, R, O>),
    /// The program is done.
    Halt(Cause),
}

impl<L, R, O> Step<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    /// Reassemble the stepped node into a program.
    pub fn into_program(self) -> Wye<L, R, O> {
        match self {
            Step::Emit(os, cont) => cont.prepend(Wye::Emit(os)),
            Step::AwaitL(recv, cont) => cont.prepend(Wye::AwaitL(recv)),
            Step::AwaitR(recv, cont) => cont.prepend(Wye::AwaitR(recv)),
            Step::AwaitBoth(recv, cont) => cont.prepend(Wye::AwaitBoth(recv)),
            Step::Halt(cause) => Wye::Halt(cause),
        }
    }
}

impl<L, R, O> fmt::Debug for Step<L, R, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Emit(os, cont) => f.debug_tuple("Emit").field(&os.len()).field(cont).finish(),
            Step::AwaitL(_, cont) => f.debug_tuple("AwaitL").field(cont).finish(),
            Step::AwaitR(_, cont) => f.debug_tuple("AwaitR").field(cont).finish(),
            Step::AwaitBoth(_, cont) => f.debug_tuple("AwaitBoth").field(cont).finish(),
            Step::Halt(cause) => f.debug_tuple("Halt").field(cause).finish(),
        }
    }
}
