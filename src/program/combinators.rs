//! Prebuilt merge programs.
//!
//! Each constructor returns a coinductively defined [`Wye`]: the program
//! for the next step is rebuilt from the value just observed, so
//! self-modifying behavior (`dynamic`, the queue buffers) needs no special
//! support from the runtime.

use std::collections::VecDeque;
use std::time::Duration;

use either::Either;

use crate::cause::{Cause, ReceiveY};
use crate::program::transform::flip;
use crate::program::Wye;

/// Echo the left side only.
fn pass_l<L, R>() -> Wye<L, R, L>
where
    L: Send + 'static,
    R: Send + 'static,
{
    Wye::receive_l(|l| Wye::emit(l).then(pass_l))
}

/// Echo the right side only.
fn pass_r<L, R>() -> Wye<L, R, R>
where
    L: Send + 'static,
    R: Send + 'static,
{
    Wye::receive_r(|r| Wye::emit(r).then(pass_r))
}

/// Emit each element of either side as soon as it is available.
///
/// If one side completes normally, the other is drained to completion;
/// any early termination on either side halts the merge with that cause.
pub fn merge<I>() -> Wye<I, I, I>
where
    I: Send + 'static,
{
    Wye::receive_both(|ry| match ry {
        ReceiveY::ReceiveL(i) | ReceiveY::ReceiveR(i) => Wye::emit(i).then(merge),
        ReceiveY::HaltL(Cause::End) => pass_r(),
        ReceiveY::HaltR(Cause::End) => pass_l(),
        ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
    })
}

/// Like [`merge`], but terminate as soon as the right side finishes,
/// even normally.
pub fn merge_halt_r<I>() -> Wye<I, I, I>
where
    I: Send + 'static,
{
    Wye::receive_both(|ry| match ry {
        ReceiveY::ReceiveL(i) | ReceiveY::ReceiveR(i) => Wye::emit(i).then(merge_halt_r),
        ReceiveY::HaltR(cause) => Wye::halt(cause),
        ReceiveY::HaltL(Cause::End) => pass_r(),
        ReceiveY::HaltL(cause) => Wye::halt(cause),
    })
}

/// Like [`merge`], but terminate as soon as the left side finishes,
/// even normally.
pub fn merge_halt_l<I>() -> Wye<I, I, I>
where
    I: Send + 'static,
{
    flip(merge_halt_r())
}

/// Like [`merge`], but terminate as soon as either side finishes.
pub fn merge_halt_both<I>() -> Wye<I, I, I>
where
    I: Send + 'static,
{
    Wye::receive_both(|ry| match ry {
        ReceiveY::ReceiveL(i) | ReceiveY::ReceiveR(i) => Wye::emit(i).then(merge_halt_both),
        ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
    })
}

/// Like [`merge`], but tag each value with the side it came from.
pub fn either<L, R>() -> Wye<L, R, Either<L, R>>
where
    L: Send + 'static,
    R: Send + 'static,
{
    fn left_only<L, R>() -> Wye<L, R, Either<L, R>>
    where
        L: Send + 'static,
        R: Send + 'static,
    {
        Wye::receive_l(|l| Wye::emit(Either::Left(l)).then(left_only))
    }
    fn right_only<L, R>() -> Wye<L, R, Either<L, R>>
    where
        L: Send + 'static,
        R: Send + 'static,
    {
        Wye::receive_r(|r| Wye::emit(Either::Right(r)).then(right_only))
    }
    Wye::receive_both(|ry| match ry {
        ReceiveY::ReceiveL(l) => Wye::emit(Either::Left(l)).then(either),
        ReceiveY::ReceiveR(r) => Wye::emit(Either::Right(r)).then(either),
        ReceiveY::HaltL(Cause::End) => right_only(),
        ReceiveY::HaltR(Cause::End) => left_only(),
        ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
    })
}

/// Emit right values only; any left delivery drains the queue by halting
/// the program normally.
pub fn unbounded_queue<L, R>() -> Wye<L, R, R>
where
    L: Send + 'static,
    R: Send + 'static,
{
    Wye::receive_both(|ry| match ry {
        ReceiveY::ReceiveL(_) => Wye::halt(Cause::End),
        ReceiveY::ReceiveR(r) => Wye::emit(r).then(unbounded_queue),
        ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
    })
}

/// Pair left and right one-for-one through `f`, with a left-side buffer
/// of size `n`.
///
/// Demand follows the buffer: empty buffer reads the left side only, a
/// buffer past `n` reads the right side only, anything in between races
/// both. `f` is invoked exactly once per pair.
pub fn yip_with_l<L, R, O, F>(n: usize, f: F) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
    F: FnMut(L, R) -> O + Send + 'static,
{
    fn go<L, R, O, F>(mut buf: VecDeque<L>, n: usize, mut f: F) -> Wye<L, R, O>
    where
        L: Send + 'static,
        R: Send + 'static,
        O: Send + 'static,
        F: FnMut(L, R) -> O + Send + 'static,
    {
        if buf.len() > n {
            Wye::receive_r(move |r| {
                let l = buf.pop_front().expect("buffer checked non-empty");
                let out = f(l, r);
                Wye::emit(out).then(move || go(buf, n, f))
            })
        } else if buf.is_empty() {
            Wye::receive_l(move |l| {
                buf.push_back(l);
                go(buf, n, f)
            })
        } else {
            Wye::receive_both(move |ry| match ry {
                ReceiveY::ReceiveL(l) => {
                    buf.push_back(l);
                    go(buf, n, f)
                }
                ReceiveY::ReceiveR(r) => {
                    let l = buf.pop_front().expect("buffer checked non-empty");
                    let out = f(l, r);
                    Wye::emit(out).then(move || go(buf, n, f))
                }
                ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
            })
        }
    }
    go(VecDeque::new(), n, f)
}

/// Pair left and right strictly one-for-one through `f`.
pub fn yip_with<L, R, O, F>(f: F) -> Wye<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
    F: FnMut(L, R) -> O + Send + 'static,
{
    fn go<L, R, O, F>(mut f: F) -> Wye<L, R, O>
    where
        L: Send + 'static,
        R: Send + 'static,
        O: Send + 'static,
        F: FnMut(L, R) -> O + Send + 'static,
    {
        Wye::receive_l(move |l| {
            Wye::receive_r(move |r| {
                let out = f(l, r);
                Wye::emit(out).then(move || go(f))
            })
        })
    }
    go(f)
}

/// Pair left and right one-for-one into tuples.
pub fn yip<L, R>() -> Wye<L, R, (L, R)>
where
    L: Send + 'static,
    R: Send + 'static,
{
    yip_with(|l, r| (l, r))
}

/// [`yip`] with a left-side buffer of size `n`.
pub fn yip_l<L, R>(n: usize) -> Wye<L, R, (L, R)>
where
    L: Send + 'static,
    R: Send + 'static,
{
    yip_with_l(n, |l, r| (l, r))
}

/// Echo the right side while letting up to `n` left values queue up
/// unconsumed.
pub fn drain_l<L, R>(n: usize) -> Wye<L, R, R>
where
    L: Send + 'static,
    R: Send + 'static,
{
    yip_with_l(n, |_, r| r)
}

/// Echo the left side while letting up to `n` right values queue up
/// unconsumed.
pub fn drain_r<L, R>(n: usize) -> Wye<L, R, L>
where
    L: Send + 'static,
    R: Send + 'static,
{
    flip(drain_l(n))
}

/// Emit right values, letting at most `n` left values arrive unconsumed
/// before the left side is blocked behind a right-side drain. Once the
/// right side completes normally the program passes its (empty) tail
/// through.
pub fn bounded_queue<L, R>(n: usize) -> Wye<L, R, R>
where
    L: Send + 'static,
    R: Send + 'static,
{
    yip_with_l(n, |_, r| r).then(pass_r)
}

/// Seed state from the first left value, then re-emit the latest left
/// value whenever the right side produces.
pub fn echo_left<A, R>() -> Wye<A, R, A>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    fn go<A, R>(a: A) -> Wye<A, R, A>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        Wye::receive_both(move |ry: ReceiveY<A, R>| match ry {
            ReceiveY::ReceiveL(l) => Wye::emit(l.clone()).then(move || go(l)),
            ReceiveY::ReceiveR(_) => Wye::emit(a.clone()).then(move || go(a)),
            ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
        })
    }
    Wye::receive_l(|a: A| Wye::emit(a.clone()).then(move || go(a)))
}

/// Forward right values until the left side delivers `true`, then
/// terminate normally. `false` deliveries are ignored.
pub fn interrupt<I>() -> Wye<bool, I, I>
where
    I: Send + 'static,
{
    Wye::receive_both(|ry| match ry {
        ReceiveY::ReceiveL(true) => Wye::halt(Cause::End),
        ReceiveY::ReceiveL(false) => interrupt(),
        ReceiveY::ReceiveR(i) => Wye::emit(i).then(interrupt),
        ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
    })
}

/// Emit each right value as it arrives while the left side carries
/// timestamps. The right side alone is read whenever more than
/// `max_size` timestamps are buffered or the incoming timestamp is more
/// than `d` past the buffered head; each right consumption drops the
/// oldest timestamp.
pub fn timed_queue<I>(d: Duration, max_size: usize) -> Wye<Duration, I, I>
where
    I: Send + 'static,
{
    fn go<I>(mut q: VecDeque<Duration>, d: Duration, max_size: usize) -> Wye<Duration, I, I>
    where
        I: Send + 'static,
    {
        Wye::receive_both(move |ry| match ry {
            ReceiveY::ReceiveL(t) => {
                let head = q.front().copied().unwrap_or(t);
                if q.len() >= max_size || t.saturating_sub(head) > d {
                    Wye::receive_r(move |i| {
                        q.pop_front();
                        Wye::emit(i).then(move || go(q, d, max_size))
                    })
                } else {
                    q.push_back(t);
                    go(q, d, max_size)
                }
            }
            ReceiveY::ReceiveR(i) => {
                q.pop_front();
                Wye::emit(i).then(move || go(q, d, max_size))
            }
            ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
        })
    }
    go(VecDeque::new(), d, max_size)
}

/// Which side a [`dynamic`] program demands next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    /// Read the left side only.
    L,
    /// Read the right side only.
    R,
    /// Race both sides.
    Both,
}

/// A self-modifying program: after each left value the next demand is
/// `f` of that value, after each right value it is `g` of that value.
/// Starts by reading the left side, and emits the raw [`ReceiveY`] event
/// for every input.
pub fn dynamic<L, R, F, G>(f: F, g: G) -> Wye<L, R, ReceiveY<L, R>>
where
    L: Send + 'static,
    R: Send + 'static,
    F: FnMut(&L) -> Request + Send + 'static,
    G: FnMut(&R) -> Request + Send + 'static,
{
    fn go<L, R, F, G>(req: Request, mut f: F, mut g: G) -> Wye<L, R, ReceiveY<L, R>>
    where
        L: Send + 'static,
        R: Send + 'static,
        F: FnMut(&L) -> Request + Send + 'static,
        G: FnMut(&R) -> Request + Send + 'static,
    {
        match req {
            Request::L => Wye::receive_l(move |l| {
                let next = f(&l);
                Wye::emit(ReceiveY::ReceiveL(l)).then(move || go(next, f, g))
            }),
            Request::R => Wye::receive_r(move |r| {
                let next = g(&r);
                Wye::emit(ReceiveY::ReceiveR(r)).then(move || go(next, f, g))
            }),
            Request::Both => Wye::receive_both(move |ry| match ry {
                ReceiveY::ReceiveL(l) => {
                    let next = f(&l);
                    Wye::emit(ReceiveY::ReceiveL(l)).then(move || go(next, f, g))
                }
                ReceiveY::ReceiveR(r) => {
                    let next = g(&r);
                    Wye::emit(ReceiveY::ReceiveR(r)).then(move || go(next, f, g))
                }
                ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
            }),
        }
    }
    go(Request::L, f, g)
}

/// [`dynamic`] specialized to one input type, emitting the bare values.
pub fn dynamic1<I, F>(f: F) -> Wye<I, I, I>
where
    I: Send + 'static,
    F: FnMut(&I) -> Request + Send + 'static,
{
    fn go<I, F>(req: Request, mut f: F) -> Wye<I, I, I>
    where
        I: Send + 'static,
        F: FnMut(&I) -> Request + Send + 'static,
    {
        match req {
            Request::L => Wye::receive_l(move |i| {
                let next = f(&i);
                Wye::emit(i).then(move || go(next, f))
            }),
            Request::R => Wye::receive_r(move |i| {
                let next = f(&i);
                Wye::emit(i).then(move || go(next, f))
            }),
            Request::Both => Wye::receive_both(move |ry| match ry {
                ReceiveY::ReceiveL(i) | ReceiveY::ReceiveR(i) => {
                    let next = f(&i);
                    Wye::emit(i).then(move || go(next, f))
                }
                ReceiveY::HaltL(cause) | ReceiveY::HaltR(cause) => Wye::halt(cause),
            }),
        }
    }
    go(Request::L, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::transform::{feed1, feed_l, feed_r, halt_l, halt_r};
    use crate::program::Step;

    /// Drain every immediately available emission, returning the values
    /// and the rest of the program.
    fn drain<O, L, R>(mut p: Wye<L, R, O>) -> (Vec<O>, Wye<L, R, O>)
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
    fn merge_emits_both_sides_and_survives_one_end() {
        let p = merge::<i32>();
        let p = feed_l(vec![1, 2], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![1, 2]);

        // left completes normally; right keeps flowing
        let p = halt_l(Cause::End, p);
        let p = feed_r(vec![10, 20], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![10, 20]);

        let p = halt_r(Cause::End, p);
        let (out, p) = drain(p);
        assert!(out.is_empty());
        assert!(matches!(p.step(), Step::Halt(Cause::End)));
    }

    #[test]
    fn merge_halts_on_early_cause() {
        let p = merge::<i32>();
        let p = halt_l(Cause::Error(crate::cause::Error::msg("boom")), p);
        let (out, p) = drain(p);
        assert!(out.is_empty());
        assert!(matches!(p.step(), Step::Halt(Cause::Error(_))));
    }

    #[test]
    fn merge_halt_both_stops_on_first_end() {
        let p = merge_halt_both::<i32>();
        let p = feed_r(vec![5], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![5]);
        let p = feed1(ReceiveY::HaltL(Cause::End), p);
        assert!(matches!(p.step(), Step::Halt(Cause::End)));
    }

    #[test]
    fn either_tags_sides() {
        let p = either::<i32, &str>();
        let p = feed_l(vec![1], p);
        let p = feed_r(vec!["a"], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![Either::Left(1), Either::Right("a")]);
    }

    #[test]
    fn unbounded_queue_halts_on_left_delivery() {
        let p = unbounded_queue::<(), i32>();
        let p = feed_r(vec![1, 2], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![1, 2]);
        let p = feed_l(vec![()], p);
        assert!(matches!(p.step(), Step::Halt(Cause::End)));
    }

    #[test]
    fn yip_with_l_demand_follows_buffer() {
        // empty buffer: left only
        let p = yip_with_l::<i32, i32, i32, _>(1, |l, r| l + r);
        assert!(matches!(p.step(), Step::AwaitL(..)));

        // one buffered value with n = 1: both sides
        let p = feed_l(vec![1], yip_with_l::<i32, i32, i32, _>(1, |l, r| l + r));
        assert!(matches!(p.step(), Step::AwaitBoth(..)));

        // buffer above n: right only
        let p = feed_l(vec![1, 2], yip_with_l::<i32, i32, i32, _>(1, |l, r| l + r));
        assert!(matches!(p.step(), Step::AwaitR(..)));
    }

    #[test]
    fn yip_with_pairs_in_order() {
        let p = yip_with::<i32, i32, i32, _>(|l, r| l + r);
        let p = feed_l(vec![1, 2, 3], p);
        let p = feed_r(vec![10, 20, 30], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![11, 22, 33]);
    }

    #[test]
    fn bounded_queue_passes_right_through() {
        let p = bounded_queue::<char, i32>(2);
        let p = feed_l(vec!['a', 'b'], p);
        let p = feed_r(vec![1, 2], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn echo_left_replays_last_left() {
        let p = echo_left::<i32, ()>();
        let p = feed_l(vec![7], p);
        let p = feed_r(vec![(), ()], p);
        let p = feed_l(vec![9], p);
        let p = feed_r(vec![()], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![7, 7, 7, 9, 9]);
    }

    #[test]
    fn interrupt_ignores_false_and_halts_on_true() {
        let p = interrupt::<i32>();
        let p = feed_l(vec![false], p);
        let p = feed_r(vec![1], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![1]);
        let p = feed_l(vec![true], p);
        assert!(matches!(p.step(), Step::Halt(Cause::End)));
    }

    #[test]
    fn timed_queue_blocks_right_side_only_when_stale_or_full() {
        let d = Duration::from_secs(5);
        let p = timed_queue::<i32>(d, 2);
        // two fresh timestamps buffer up
        let p = feed_l(vec![Duration::from_secs(1), Duration::from_secs(2)], p);
        let step = p.step();
        assert!(matches!(step, Step::AwaitBoth(..)));
        let p = step.into_program();
        // third timestamp exceeds max_size: only the right side may proceed
        let p = feed_l(vec![Duration::from_secs(3)], p);
        let step = p.step();
        assert!(matches!(step, Step::AwaitR(..)));
        let p = step.into_program();
        let p = feed_r(vec![42], p);
        let (out, _) = drain(p);
        assert_eq!(out, vec![42]);
    }

    #[test]
    fn timed_queue_age_window_trips() {
        let d = Duration::from_secs(5);
        let p = timed_queue::<i32>(d, 100);
        let p = feed_l(vec![Duration::from_secs(1)], p);
        // eleven seconds is more than five past the buffered head
        let p = feed_l(vec![Duration::from_secs(11)], p);
        assert!(matches!(p.step(), Step::AwaitR(..)));
    }

    #[test]
    fn dynamic1_redirects_demand() {
        let p = dynamic1::<i32, _>(|x| if *x < 0 { Request::R } else { Request::L });
        let p = feed_l(vec![1], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![1]);
        let step = p.step();
        assert!(matches!(step, Step::AwaitL(..)));
        let p = step.into_program();

        let p = feed_l(vec![-1], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![-1]);
        let step = p.step();
        assert!(matches!(step, Step::AwaitR(..)));
        let p = step.into_program();

        let p = feed_r(vec![9], p);
        let (out, p) = drain(p);
        assert_eq!(out, vec![9]);
        assert!(matches!(p.step(), Step::AwaitL(..)));
    }
}
