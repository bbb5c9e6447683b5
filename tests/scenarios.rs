//! End-to-end pipelines over the deterministic inline executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_lite::future::block_on;
use futures_lite::StreamExt;

use wye::executor::Trampoline;
use wye::source::{self, Cancel, Source};
use wye::{Cause, Downstream, Either, Request};

/// Count how often reads on a source are cancelled.
fn cancel_counted<A: Send + 'static>(src: Source<A>, count: Arc<AtomicUsize>) -> Source<A> {
    Source::new(move |cb| {
        let resume_count = count.clone();
        let mut inner = src.read(Box::new(move |pull| {
            cb(pull.map(|(batch, next)| (batch, cancel_counted(next, resume_count))))
        }));
        Cancel::new(move |cause| {
            count.fetch_add(1, Ordering::SeqCst);
            inner.kill(cause);
        })
    })
}

/// Count how often a source is abandoned without being read again.
fn close_counted<A: Send + 'static>(src: Source<A>, count: Arc<AtomicUsize>) -> Source<A> {
    let slot = Arc::new(Mutex::new(Some(src)));
    let close_slot = slot.clone();
    let close_count = count.clone();
    Source::with_close(
        move |cb| {
            let src = slot.lock().unwrap().take().expect("source read once");
            let resume_count = count.clone();
            src.read(Box::new(move |pull| {
                cb(pull.map(|(batch, next)| (batch, close_counted(next, resume_count))))
            }))
        },
        move |cause| {
            close_count.fetch_add(1, Ordering::SeqCst);
            if let Some(src) = close_slot.lock().unwrap().take() {
                src.close(cause);
            }
        },
    )
}

/// Drain a pipeline, separating values from a trailing error.
fn collect<O: Send + 'static + Unpin>(stream: Downstream<O>) -> (Vec<O>, Option<wye::Error>) {
    block_on(async {
        let mut stream = stream;
        let mut out = Vec::new();
        let mut err = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(value) => out.push(value),
                Err(e) => err = Some(e),
            }
        }
        (out, err)
    })
}

#[test]
fn merge_emits_every_value_from_both_sides() {
    let exec = Arc::new(Trampoline::new());
    let left = source::from_iter(vec![1, 2, 3]);
    let right = source::from_iter(vec![10, 20]);
    let (mut out, err) = collect(left.wye(right, wye::merge(), exec));
    assert!(err.is_none());
    assert_eq!(out.len(), 5);
    out.sort_unstable();
    assert_eq!(out, vec![1, 2, 3, 10, 20]);
}

/// Count read starts, recording how far this side's reads run ahead of
/// the other side's.
fn lead_watched<A: Send + 'static>(
    src: Source<A>,
    reads: Arc<AtomicUsize>,
    other: Arc<AtomicUsize>,
    max_lead: Arc<AtomicUsize>,
) -> Source<A> {
    Source::new(move |cb| {
        let mine = reads.fetch_add(1, Ordering::SeqCst) + 1;
        let lead = mine.saturating_sub(other.load(Ordering::SeqCst));
        max_lead.fetch_max(lead, Ordering::SeqCst);
        src.read(Box::new(move |pull| {
            cb(pull.map(|(batch, next)| (batch, lead_watched(next, reads, other, max_lead))))
        }))
    })
}

#[test]
fn bounded_queue_passes_the_right_side_through() {
    let exec = Arc::new(Trampoline::new());
    let left_reads = Arc::new(AtomicUsize::new(0));
    let right_reads = Arc::new(AtomicUsize::new(0));
    let max_lead = Arc::new(AtomicUsize::new(0));

    let left = lead_watched(
        source::from_iter(vec!['a', 'b', 'c', 'd', 'e']),
        left_reads,
        right_reads.clone(),
        max_lead.clone(),
    );
    let right = {
        fn tracked(src: Source<i32>, reads: Arc<AtomicUsize>) -> Source<i32> {
            Source::new(move |cb| {
                reads.fetch_add(1, Ordering::SeqCst);
                src.read(Box::new(move |pull| {
                    cb(pull.map(|(batch, next)| (batch, tracked(next, reads))))
                }))
            })
        }
        tracked(source::from_iter(vec![1, 2, 3, 4, 5]), right_reads)
    };

    let (out, err) = collect(left.wye(right, wye::bounded_queue(2), exec));
    assert!(err.is_none());
    assert_eq!(out, vec![1, 2, 3, 4, 5]);
    // a buffer of two admits at most three unconsumed left reads
    assert!(max_lead.load(Ordering::SeqCst) <= 3);
}

#[test]
fn interrupt_stops_the_right_side_and_cancels_its_read() {
    let exec = Arc::new(Trampoline::new());
    let (ltx, left) = source::channel::<bool>();
    let (rtx, right) = source::channel::<i32>();
    let cancels = Arc::new(AtomicUsize::new(0));
    let right = cancel_counted(right, cancels.clone());

    let mut stream = left.wye(right, wye::interrupt(), exec);
    block_on(async {
        rtx.send(1);
        rtx.send(2);
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        ltx.send(false);
        rtx.send(3);
        assert_eq!(stream.next().await.unwrap().unwrap(), 3);
        ltx.send(true);
        assert!(stream.next().await.is_none());
    });
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn yip_with_discards_the_unpaired_right_tail() {
    let exec = Arc::new(Trampoline::new());
    let closes = Arc::new(AtomicUsize::new(0));
    let left = source::from_iter(vec![1, 2, 3]);
    let right = close_counted(source::from_iter(vec![10, 20, 30, 40]), closes.clone());
    let (out, err) = collect(left.wye(right, wye::yip_with(|a, b| a + b), exec));
    assert!(err.is_none());
    assert_eq!(out, vec![11, 22, 33]);
    // the abandoned right side is released exactly once
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn either_surfaces_a_left_error_and_cancels_the_right() {
    let exec = Arc::new(Trampoline::new());
    let left = source::iter_then(vec![1], Cause::Error(wye::Error::msg("boom")));
    let (_rtx, right) = source::channel::<i32>();
    let cancels = Arc::new(AtomicUsize::new(0));
    let right = cancel_counted(right, cancels.clone());

    let (out, err) = collect(left.wye(right, wye::either(), exec));
    assert_eq!(out, vec![Either::Left(1)]);
    assert_eq!(err.expect("error must surface").to_string(), "boom");
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn dynamic1_follows_its_own_demand_decisions() {
    let exec = Arc::new(Trampoline::new());
    let left = source::from_iter(vec![1, -1, 2, 3]);
    let right = source::from_iter(vec![9, 8, 7]);
    let program = wye::dynamic1(|x: &i32| if *x < 0 { Request::R } else { Request::L });
    let (out, err) = collect(left.wye(right, program, exec));
    assert!(err.is_none());
    assert_eq!(out, vec![1, -1, 9, 2, 3]);
}

#[test]
fn dropping_the_stream_cancels_both_parked_reads() {
    let exec = Arc::new(Trampoline::new());
    let (ltx, left) = source::channel::<i32>();
    let (rtx, right) = source::channel::<i32>();
    let left_cancels = Arc::new(AtomicUsize::new(0));
    let right_cancels = Arc::new(AtomicUsize::new(0));
    let left = cancel_counted(left, left_cancels.clone());
    let right = cancel_counted(right, right_cancels.clone());

    let mut stream = left.wye(right, wye::merge(), exec);
    block_on(async {
        ltx.send(1);
        rtx.send(2);
        let a = stream.next().await.unwrap().unwrap();
        let b = stream.next().await.unwrap().unwrap();
        assert_eq!({ let mut v = vec![a, b]; v.sort_unstable(); v }, vec![1, 2]);
    });
    drop(stream);
    assert_eq!(left_cancels.load(Ordering::SeqCst), 1);
    assert_eq!(right_cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn a_second_pending_get_is_refused() {
    let exec = Arc::new(Trampoline::new());
    let (_ltx, left) = source::channel::<i32>();
    let (_rtx, right) = source::channel::<i32>();
    let handle = wye::connect(left, right, wye::merge(), exec);

    let first: Arc<Mutex<Option<Result<Vec<i32>, Cause>>>> = Arc::new(Mutex::new(None));
    let second: Arc<Mutex<Option<Result<Vec<i32>, Cause>>>> = Arc::new(Mutex::new(None));
    let first2 = first.clone();
    let second2 = second.clone();
    handle.get(move |res| *first2.lock().unwrap() = Some(res));
    handle.get(move |res| *second2.lock().unwrap() = Some(res));

    // both producers are parked: the first read is still waiting, the
    // second is refused outright
    assert!(first.lock().unwrap().is_none());
    assert!(matches!(
        second.lock().unwrap().take(),
        Some(Err(Cause::Error(_)))
    ));
}

#[test]
fn echo_left_replays_state_for_right_arrivals() {
    let exec = Arc::new(Trampoline::new());
    let (ltx, left) = source::channel::<i32>();
    let (rtx, right) = source::channel::<()>();
    let mut stream = left.wye(right, wye::echo_left(), exec);
    block_on(async {
        ltx.send(7);
        assert_eq!(stream.next().await.unwrap().unwrap(), 7);
        rtx.send(());
        assert_eq!(stream.next().await.unwrap().unwrap(), 7);
        ltx.send(9);
        assert_eq!(stream.next().await.unwrap().unwrap(), 9);
        rtx.send(());
        assert_eq!(stream.next().await.unwrap().unwrap(), 9);
    });
}

#[test]
fn from_stream_bridges_ecosystem_streams() {
    let exec = Arc::new(Trampoline::new());
    let left = source::from_stream(futures_lite::stream::iter(vec![1, 2]), exec.clone());
    let right = source::from_stream(futures_lite::stream::iter(vec![10]), exec.clone());
    let (mut out, err) = collect(left.wye(right, wye::merge(), exec));
    assert!(err.is_none());
    out.sort_unstable();
    assert_eq!(out, vec![1, 2, 10]);
}

#[test]
fn unbounded_queue_drains_on_left_delivery() {
    let exec = Arc::new(Trampoline::new());
    let (ltx, left) = source::channel::<()>();
    let (rtx, right) = source::channel::<i32>();
    let mut stream = left.wye(right, wye::unbounded_queue(), exec);
    block_on(async {
        rtx.send(1);
        rtx.send(2);
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        ltx.send(());
        assert!(stream.next().await.is_none());
    });
}
