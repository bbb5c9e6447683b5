//! The single-input transformer composed in front of one side of a merge
//! program by [`crate::program::transform::attach_l`] and
//! [`crate::program::transform::attach_r`].
//!
//! Shaped like [`crate::Wye`] minus the two-sided await: it emits, awaits
//! one input (with the usual positive/negative delivery), or halts.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::cause::{Cause, EarlyCause, Error};

/// Receive closure of a one-input await.
pub type Recv1<I, O> = Box<dyn FnOnce(Result<I, EarlyCause>) -> Process1<I, O> + Send>;

/// A deferred continuation frame.
pub type Frame1<I, O> = Box<dyn FnOnce(Cause) -> Process1<I, O> + Send>;

/// A transformer from inputs `I` to outputs `O`.
pub enum Process1<I, O> {
    /// Produce a finite batch, then complete with `End`.
    Emit(Vec<O>),
    /// Demand one input.
    Await1(Recv1<I, O>),
    /// Terminate with a cause.
    Halt(Cause),
    /// A transformer followed by pending continuation frames.
    Append(Box<Process1<I, O>>, VecDeque<Frame1<I, O>>),
}

impl<I, O> Process1<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Emit a single value.
    pub fn emit(value: O) -> Self {
        Process1::Emit(vec![value])
    }

    /// Emit a batch of values.
    pub fn emit_all(values: Vec<O>) -> Self {
        Process1::Emit(values)
    }

    /// Terminate with `cause`.
    pub fn halt(cause: Cause) -> Self {
        Process1::Halt(cause)
    }

    /// Demand one input; `recv` is total over success and early
    /// termination.
    pub fn await1(recv: impl FnOnce(Result<I, EarlyCause>) -> Self + Send + 'static) -> Self {
        Process1::Await1(Box::new(recv))
    }

    /// Demand one input, halting with the early cause when the input is
    /// gone.
    pub fn receive1(on_value: impl FnOnce(I) -> Self + Send + 'static) -> Self {
        Self::await1(|res| match res {
            Ok(value) => on_value(value),
            Err(early) => Process1::Halt(early.into()),
        })
    }

    /// Run `next` with whatever cause this transformer halts with.
    pub fn on_halt(self, next: impl FnOnce(Cause) -> Self + Send + 'static) -> Self {
        let frame: Frame1<I, O> = Box::new(next);
        match self {
            Process1::Append(head, mut frames) => {
                frames.push_back(frame);
                Process1::Append(head, frames)
            }
            other => Process1::Append(Box::new(other), VecDeque::from([frame])),
        }
    }

    /// Sequence: continue with `next` on normal completion.
    pub fn then(self, next: impl FnOnce() -> Self + Send + 'static) -> Self {
        self.on_halt(|cause| match cause {
            Cause::End => next(),
            early => Process1::Halt(early),
        })
    }

    /// Reduce to the next observable node, discarding empty emissions.
    pub fn step(self) -> Step1<I, O> {
        let mut cur = self;
        let mut pending: VecDeque<Frame1<I, O>> = VecDeque::new();
        loop {
            match cur {
                Process1::Append(head, mut frames) => {
                    frames.append(&mut pending);
                    pending = frames;
                    cur = *head;
                }
                Process1::Emit(os) if os.is_empty() => match pending.pop_front() {
                    Some(frame) => cur = guarded1(frame, Cause::End),
                    None => return Step1::Halt(Cause::End),
                },
                Process1::Emit(os) => return Step1::Emit(os, Cont1 { frames: pending }),
                Process1::Await1(recv) => return Step1::Await1(recv, Cont1 { frames: pending }),
                Process1::Halt(cause) => match pending.pop_front() {
                    Some(frame) => cur = guarded1(frame, cause),
                    None => return Step1::Halt(cause),
                },
            }
        }
    }
}

impl<I, O> fmt::Debug for Process1<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process1::Emit(os) => f.debug_tuple("Emit").field(&os.len()).finish(),
            Process1::Await1(_) => f.write_str("Await1"),
            Process1::Halt(cause) => f.debug_tuple("Halt").field(cause).finish(),
            Process1::Append(head, frames) => f
                .debug_struct("Append")
                .field("head", head)
                .field("frames", &frames.len())
                .finish(),
        }
    }
}

/// Apply a boxed closure, converting a panic into `Halt(Error)`.
pub(crate) fn guarded1<T, I, O>(
    f: Box<dyn FnOnce(T) -> Process1<I, O> + Send>,
    arg: T,
) -> Process1<I, O> {
    match panic::catch_unwind(AssertUnwindSafe(move || f(arg))) {
        Ok(next) => next,
        Err(payload) => Process1::Halt(Cause::Error(Error::from_panic(payload))),
    }
}

/// An ordered stack of pending continuation frames.
pub struct Cont1<I, O> {
    frames: VecDeque<Frame1<I, O>>,
}

impl<I, O> Cont1<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Run `p` first, then the frames of this continuation.
    pub fn prepend(self, p: Process1<I, O>) -> Process1<I, O> {
        if self.frames.is_empty() {
            return p;
        }
        match p {
            Process1::Append(head, mut frames) => {
                let mut tail = self.frames;
                frames.append(&mut tail);
                Process1::Append(head, frames)
            }
            other => Process1::Append(Box::new(other), self.frames),
        }
    }

    /// Resume as if the preceding segment completed normally.
    pub fn resume(self) -> Process1<I, O> {
        self.prepend(Process1::Halt(Cause::End))
    }
}

impl<I, O> fmt::Debug for Cont1<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cont1").field(&self.frames.len()).finish()
    }
}

/// The result of [`Process1::step`].
pub enum Step1<I, O> {
    /// A non-empty batch to emit.
    Emit(Vec<O>, Cont1<I, O>),
    /// Input demand.
    Await1(Recv1<I, O>, Cont1<I, O>),
    /// The transformer is done.
    Halt(Cause),
}

impl<I, O> fmt::Debug for Step1<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step1::Emit(os, cont) => f.debug_tuple("Emit").field(&os.len()).field(cont).finish(),
            Step1::Await1(_, cont) => f.debug_tuple("Await1").field(cont).finish(),
            Step1::Halt(cause) => f.debug_tuple("Halt").field(cause).finish(),
        }
    }
}

/// The identity transformer.
pub fn id<I>() -> Process1<I, I>
where
    I: Send + 'static,
{
    Process1::receive1(|i| Process1::emit(i).then(id))
}

/// Apply `f` to every input.
pub fn lift<I, O, F>(mut f: F) -> Process1<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + 'static,
{
    Process1::receive1(move |i| {
        let out = f(i);
        Process1::emit(out).then(move || lift(f))
    })
}

/// Keep only inputs matching `pred`.
pub fn filter<I, F>(mut pred: F) -> Process1<I, I>
where
    I: Send + 'static,
    F: FnMut(&I) -> bool + Send + 'static,
{
    Process1::receive1(move |i| {
        if pred(&i) {
            Process1::emit(i).then(move || filter(pred))
        } else {
            filter(pred)
        }
    })
}

/// Pass through the first `n` inputs, then complete.
pub fn take<I>(n: usize) -> Process1<I, I>
where
    I: Send + 'static,
{
    if n == 0 {
        Process1::halt(Cause::End)
    } else {
        Process1::receive1(move |i| Process1::emit(i).then(move || take(n - 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mut p: Process1<i32, i32>, input: Vec<i32>) -> (Vec<i32>, Cause) {
        let mut input: VecDeque<i32> = input.into();
        let mut out = vec![];
        loop {
            match p.step() {
                Step1::Emit(os, cont) => {
                    out.extend(os);
                    p = cont.resume();
                }
                Step1::Await1(recv, cont) => match input.pop_front() {
                    Some(v) => p = cont.prepend(guarded1(recv, Ok(v))),
                    None => p = cont.prepend(guarded1(recv, Err(EarlyCause::Kill))),
                },
                Step1::Halt(cause) => return (out, cause),
            }
        }
    }

    #[test]
    fn lift_maps_inputs() {
        let (out, cause) = run(lift(|n| n * 2), vec![1, 2, 3]);
        assert_eq!(out, vec![2, 4, 6]);
        assert!(matches!(cause, Cause::Kill));
    }

    #[test]
    fn filter_drops_inputs() {
        let (out, _) = run(filter(|n| n % 2 == 0), vec![1, 2, 3, 4]);
        assert_eq!(out, vec![2, 4]);
    }

    #[test]
    fn take_completes_normally() {
        let (out, cause) = run(take(2), vec![1, 2, 3]);
        assert_eq!(out, vec![1, 2]);
        assert!(cause.is_end());
    }
}
