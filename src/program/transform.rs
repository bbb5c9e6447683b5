//! Structural rewrites over merge programs.
//!
//! Feeding drives a program synchronously with values as if they came
//! from one side; disconnecting rewrites a program to behave as if one
//! side were gone; flipping swaps the sides; attaching composes a
//! single-input transformer in front of a side. None of these invent
//! output: they only reroute what the program would have observed.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::cause::{Cause, EarlyCause, ReceiveY};
use crate::process1::{self, Process1, Step1};
use crate::program::{guarded, Step, Wye};

/// Prefix accumulated batches onto `rest`, tagging `rest` with whatever
/// cause the emission ends with.
fn prepend_batches<L, R, O>(out: SmallVec<[Vec<O>; 4]>, rest: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let flat: Vec<O> = out.into_iter().flatten().collect();
    if flat.is_empty() {
        rest
    } else {
        Wye::emit_all(flat).on_halt(move |cause| rest.caused_by(cause))
    }
}

/// Synchronously drive `y` with `values` as if delivered from the left.
///
/// Left demand consumes input directly; a two-sided demand observes a
/// left delivery; right demand flushes what has been emitted so far and
/// suspends the remaining input behind the right read.
pub fn feed_l<L, R, O>(values: impl IntoIterator<Item = L>, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    feed_l_deque(values.into_iter().collect(), y)
}

fn feed_l_deque<L, R, O>(mut input: VecDeque<L>, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let mut out: SmallVec<[Vec<O>; 4]> = SmallVec::new();
    let mut cur = y;
    loop {
        if input.is_empty() {
            return prepend_batches(out, cur);
        }
        match cur.step() {
            Step::Emit(os, cont) => {
                out.push(os);
                cur = cont.resume();
            }
            Step::AwaitL(recv, cont) => {
                let v = input.pop_front().expect("input checked non-empty");
                cur = cont.prepend(guarded(recv, Ok(v)));
            }
            Step::AwaitBoth(recv, cont) => {
                let v = input.pop_front().expect("input checked non-empty");
                cur = cont.prepend(guarded(recv, ReceiveY::ReceiveL(v)));
            }
            Step::AwaitR(recv, cont) => {
                let flushed: Vec<O> = out.into_iter().flatten().collect();
                return Wye::emit_all(flushed).on_halt(move |cause| match cause {
                    Cause::End => Wye::await_r(move |res| {
                        feed_l_deque(input, cont.prepend(guarded(recv, res)))
                    }),
                    other => unreachable!("bare emit_all only halts with End: {other:?}"),
                });
            }
            Step::Halt(cause) => {
                let flushed: Vec<O> = out.into_iter().flatten().collect();
                return Wye::emit_all(flushed).caused_by(cause);
            }
        }
    }
}

/// Synchronously drive `y` with `values` as if delivered from the right.
pub fn feed_r<L, R, O>(values: impl IntoIterator<Item = R>, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    feed_r_deque(values.into_iter().collect(), y)
}

fn feed_r_deque<L, R, O>(mut input: VecDeque<R>, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let mut out: SmallVec<[Vec<O>; 4]> = SmallVec::new();
    let mut cur = y;
    loop {
        if input.is_empty() {
            return prepend_batches(out, cur);
        }
        match cur.step() {
            Step::Emit(os, cont) => {
                out.push(os);
                cur = cont.resume();
            }
            Step::AwaitR(recv, cont) => {
                let v = input.pop_front().expect("input checked non-empty");
                cur = cont.prepend(guarded(recv, Ok(v)));
            }
            Step::AwaitBoth(recv, cont) => {
                let v = input.pop_front().expect("input checked non-empty");
                cur = cont.prepend(guarded(recv, ReceiveY::ReceiveR(v)));
            }
            Step::AwaitL(recv, cont) => {
                let flushed: Vec<O> = out.into_iter().flatten().collect();
                return Wye::emit_all(flushed).on_halt(move |cause| match cause {
                    Cause::End => Wye::await_l(move |res| {
                        feed_r_deque(input, cont.prepend(guarded(recv, res)))
                    }),
                    other => unreachable!("bare emit_all only halts with End: {other:?}"),
                });
            }
            Step::Halt(cause) => {
                let flushed: Vec<O> = out.into_iter().flatten().collect();
                return Wye::emit_all(flushed).caused_by(cause);
            }
        }
    }
}

/// Deliver a single left value.
pub fn feed1_l<L, R, O>(value: L, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    feed_l([value], y)
}

/// Deliver a single right value.
pub fn feed1_r<L, R, O>(value: R, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    feed_r([value], y)
}

/// Deliver one merge event: values are fed, a normal side end detaches
/// that side, and an early one disconnects it.
pub fn feed1<L, R, O>(event: ReceiveY<L, R>, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    match event {
        ReceiveY::ReceiveL(l) => feed1_l(l, y),
        ReceiveY::ReceiveR(r) => feed1_r(r, y),
        ReceiveY::HaltL(Cause::End) => detach1_l(y),
        ReceiveY::HaltL(cause) => disconnect_l(cause.kill(), y),
        ReceiveY::HaltR(Cause::End) => detach1_r(y),
        ReceiveY::HaltR(cause) => disconnect_r(cause.kill(), y),
    }
}

/// Rewrite `y` to behave as if the left side were gone: left demand
/// observes `cause` immediately, two-sided demand degrades to a right
/// demand, right demand survives with its result disconnected in turn.
pub fn disconnect_l<L, R, O>(cause: EarlyCause, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let mut cur = y;
    loop {
        match cur.step() {
            Step::AwaitL(recv, cont) => {
                cur = cont.prepend(guarded(recv, Err(cause.clone())));
            }
            Step::Emit(os, cont) => {
                return Wye::emit_all(os)
                    .on_halt(move |rsn| disconnect_l(cause, cont.prepend(Wye::Halt(rsn))));
            }
            Step::AwaitR(recv, cont) => {
                return Wye::await_r(move |res| {
                    disconnect_l(cause, cont.prepend(guarded(recv, res)))
                });
            }
            Step::AwaitBoth(recv, cont) => {
                return Wye::await_r(move |res| {
                    let event = match res {
                        Ok(r) => ReceiveY::ReceiveR(r),
                        Err(early) => ReceiveY::HaltR(early.into()),
                    };
                    disconnect_l(cause, cont.prepend(guarded(recv, event)))
                });
            }
            Step::Halt(rsn) => return Wye::Halt(rsn),
        }
    }
}

/// Rewrite `y` to behave as if the right side were gone.
pub fn disconnect_r<L, R, O>(cause: EarlyCause, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let mut cur = y;
    loop {
        match cur.step() {
            Step::AwaitR(recv, cont) => {
                cur = cont.prepend(guarded(recv, Err(cause.clone())));
            }
            Step::Emit(os, cont) => {
                return Wye::emit_all(os)
                    .on_halt(move |rsn| disconnect_r(cause, cont.prepend(Wye::Halt(rsn))));
            }
            Step::AwaitL(recv, cont) => {
                return Wye::await_l(move |res| {
                    disconnect_r(cause, cont.prepend(guarded(recv, res)))
                });
            }
            Step::AwaitBoth(recv, cont) => {
                return Wye::await_l(move |res| {
                    let event = match res {
                        Ok(l) => ReceiveY::ReceiveL(l),
                        Err(early) => ReceiveY::HaltL(early.into()),
                    };
                    disconnect_r(cause, cont.prepend(guarded(recv, event)))
                });
            }
            Step::Halt(rsn) => return Wye::Halt(rsn),
        }
    }
}

/// Disconnect the left side with `Kill`, suppressing the kill at the
/// outer boundary so a clean detach does not read as a failure.
pub fn detach1_l<L, R, O>(y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    disconnect_l(EarlyCause::Kill, y).swallow_kill()
}

/// Disconnect the right side with `Kill`, suppressing the kill at the
/// outer boundary.
pub fn detach1_r<L, R, O>(y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    disconnect_r(EarlyCause::Kill, y).swallow_kill()
}

/// The left side has terminated with `cause`: let a two-sided demand
/// observe it first, then disconnect the left side.
pub fn halt_l<L, R, O>(cause: Cause, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let ny = match y.step() {
        Step::AwaitBoth(recv, cont) => cont.prepend(guarded(recv, ReceiveY::HaltL(cause.clone()))),
        other => other.into_program(),
    };
    match cause {
        Cause::End => detach1_l(ny),
        early => disconnect_l(early.kill(), ny),
    }
}

/// The right side has terminated with `cause`.
pub fn halt_r<L, R, O>(cause: Cause, y: Wye<L, R, O>) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let ny = match y.step() {
        Step::AwaitBoth(recv, cont) => cont.prepend(guarded(recv, ReceiveY::HaltR(cause.clone()))),
        other => other.into_program(),
    };
    match cause {
        Cause::End => detach1_r(ny),
        early => disconnect_r(early.kill(), ny),
    }
}

/// Swap the two sides of `y` in place: left demand becomes right demand
/// and vice versa, and two-sided events are relabeled.
pub fn flip<L, R, O>(y: Wye<L, R, O>) -> Wye<R, L, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    match y.step() {
        Step::Emit(os, cont) => {
            Wye::emit_all(os).on_halt(move |rsn| flip(cont.prepend(Wye::Halt(rsn))))
        }
        Step::AwaitL(recv, cont) => {
            Wye::await_r(move |res| flip(cont.prepend(guarded(recv, res))))
        }
        Step::AwaitR(recv, cont) => {
            Wye::await_l(move |res| flip(cont.prepend(guarded(recv, res))))
        }
        Step::AwaitBoth(recv, cont) => Wye::await_both(move |ry: ReceiveY<R, L>| {
            flip(cont.prepend(guarded(recv, ry.flip())))
        }),
        Step::Halt(cause) => Wye::Halt(cause),
    }
}

/// Compose a single-input transformer in front of the left side: every
/// left arrival is pushed through `p1`, and `p1`'s emissions become the
/// left inputs of `y`. Termination of `p1` disconnects the left side.
pub fn attach_l<I0, L, R, O>(p1: Process1<I0, L>, y: Wye<L, R, O>) -> Wye<I0, R, O>
where
    I0: Send + 'static,
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    match y.step() {
        Step::Emit(os, cont) => {
            Wye::emit_all(os).on_halt(move |rsn| attach_l(p1, cont.prepend(Wye::Halt(rsn))))
        }
        Step::AwaitL(recv, cont) => {
            let y = cont.prepend(Wye::AwaitL(recv));
            match p1.step() {
                Step1::Emit(is, cont1) => attach_l(cont1.resume(), feed_l(is, y)),
                Step1::Await1(recv1, cont1) => Wye::await_l(move |res: Result<I0, EarlyCause>| {
                    attach_l(cont1.prepend(process1::guarded1(recv1, res)), y)
                }),
                Step1::Halt(cause) => {
                    attach_l(Process1::Halt(cause.clone()), disconnect_l(cause.kill(), y))
                }
            }
        }
        Step::AwaitR(recv, cont) => {
            Wye::await_r(move |res| attach_l(p1, cont.prepend(guarded(recv, res))))
        }
        Step::AwaitBoth(recv, cont) => {
            let y = cont.prepend(Wye::AwaitBoth(recv));
            match p1.step() {
                Step1::Emit(is, cont1) => attach_l(cont1.resume(), feed_l(is, y)),
                Step1::Await1(recv1, cont1) => {
                    Wye::await_both(move |ry: ReceiveY<I0, R>| match ry {
                        ReceiveY::ReceiveL(i0) => {
                            attach_l(cont1.prepend(process1::guarded1(recv1, Ok(i0))), y)
                        }
                        ReceiveY::ReceiveR(r) => {
                            attach_l(cont1.prepend(Process1::Await1(recv1)), feed1_r(r, y))
                        }
                        ReceiveY::HaltL(cause) => attach_l(
                            cont1.prepend(process1::guarded1(recv1, Err(cause.kill()))),
                            y,
                        ),
                        ReceiveY::HaltR(cause) => {
                            attach_l(cont1.prepend(Process1::Await1(recv1)), halt_r(cause, y))
                        }
                    })
                }
                Step1::Halt(cause) => {
                    attach_l(Process1::Halt(cause.clone()), disconnect_l(cause.kill(), y))
                }
            }
        }
        Step::Halt(cause) => Wye::Halt(cause),
    }
}

/// Compose a single-input transformer in front of the right side.
pub fn attach_r<I0, L, R, O>(p1: Process1<I0, R>, y: Wye<L, R, O>) -> Wye<L, I0, O>
where
    I0: Send + 'static,
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    flip(attach_l(p1, flip(y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::combinators::{either, merge, yip_with};
    use either::Either;

    fn drain<L, R, O>(mut p: Wye<L, R, O>) -> (Vec<O>, Wye<L, R, O>)
    where
        L: Send + 'static,
        R: Send + 'static,
        O: Send + 'static,
    {
        let mut out = vec![];
        loop {
            match p.step() {
                Step::Emit(os, cont) => {
                    out.extend(os);
                    p = cont.resume();
                }
                other => return (out, other.into_program()),
            }
        }
    }

    #[test]
    fn feed_l_consumes_left_demand() {
        let p = yip_with::<i32, i32, i32, _>(|l, r| l + r);
        let p = feed_l(vec![1, 2], p);
        // one left value paired, one buffered behind the right demand
        let p = feed_r(vec![10], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![11]);
        let p = feed_r(vec![20], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![22]);
    }

    #[test]
    fn feed_is_associative_over_concatenation() {
        let run = |p: Wye<i32, i32, i32>| {
            let (out, _) = drain(feed_r(vec![7], p));
            out
        };
        let once = feed_l(vec![1, 2, 3, 4], merge::<i32>());
        let twice = feed_l(vec![3, 4], feed_l(vec![1, 2], merge::<i32>()));
        assert_eq!(run(once), run(twice));
    }

    #[test]
    fn disconnect_l_is_idempotent() {
        let observe = |p: Wye<i32, i32, i32>| {
            let p = feed_r(vec![10, 20], p);
            drain(p).0
        };
        let once = disconnect_l(EarlyCause::Kill, merge::<i32>());
        let twice = disconnect_l(EarlyCause::Kill, disconnect_l(EarlyCause::Kill, merge::<i32>()));
        assert_eq!(observe(once), observe(twice));
    }

    #[test]
    fn disconnect_l_degrades_both_demand_to_right() {
        let p = disconnect_l(EarlyCause::Kill, merge::<i32>());
        assert!(matches!(p.step(), Step::AwaitR(..)));
    }

    #[test]
    fn detach_suppresses_the_kill() {
        // merge maps a left kill to a halt with that cause; detaching
        // instead reads as a clean end of the left side
        let p = detach1_l(merge::<i32>());
        let p = feed_r(vec![1], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![1]);
        let p = halt_r(Cause::End, p);
        let (_, p) = drain(p);
        assert!(matches!(p.step(), Step::Halt(Cause::End)));
    }

    #[test]
    fn flip_relabels_either() {
        let p = flip(either::<i32, i32>());
        let p = feed_l(vec![1], p);
        let (out, _) = drain(p);
        // a left delivery on the flipped program is a right delivery on
        // the original
        assert_eq!(out, vec![Either::Right(1)]);
    }

    #[test]
    fn flip_is_an_involution_on_outputs() {
        let observe = |p: Wye<i32, i32, i32>| {
            let p = feed_l(vec![1, 2], p);
            let p = feed_r(vec![10], p);
            drain(p).0
        };
        assert_eq!(
            observe(merge::<i32>()),
            observe(flip(flip(merge::<i32>())))
        );
    }

    #[test]
    fn attach_l_transforms_left_inputs() {
        let p = attach_l(process1::lift(|n: i32| n * 10), merge::<i32>());
        let p = feed_l(vec![1, 2], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![10, 20]);
    }

    #[test]
    fn attach_l_fuses_with_feeding() {
        let direct = {
            let p = feed_l(vec![2, 4, 6], merge::<i32>());
            drain(p).0
        };
        let attached = {
            let p = attach_l(process1::filter(|n: &i32| n % 2 == 0), merge::<i32>());
            let p = feed_l(vec![1, 2, 3, 4, 5, 6], p);
            drain(p).0
        };
        assert_eq!(direct, attached);
    }

    #[test]
    fn attach_r_mirrors_attach_l() {
        let p = attach_r(process1::lift(|n: i32| n + 1), merge::<i32>());
        let p = feed_r(vec![1, 2], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![2, 3]);
    }

    #[test]
    fn feed_flushes_emissions_before_suspending_on_the_other_side() {
        // yip pairs strictly; feeding two rights can only pair the first
        let p = yip_with::<i32, i32, i32, _>(|l, r| l + r);
        let p = feed_l(vec![1], p);
        let p = feed_r(vec![10, 20], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![11]);
        let p = feed_l(vec![2], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![22]);
    }
}
