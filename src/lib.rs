//! Two-input nondeterministic stream combinators.
//!
//! A [`Wye`] is a pure, reifiable description of how to fuse two
//! asynchronous producers into one output stream: read left, read right,
//! race both, emit, or halt. Programs are built from the combinators at
//! the crate root ([`merge`], [`either`], [`interrupt`], the queue and
//! zip families, [`dynamic`]), reshaped with the structural transformers
//! ([`feed_l`], [`disconnect_l`], [`flip`], [`attach_l`], …), and
//! executed by [`runtime::connect`] against two [`source::Source`]
//! producers on any stack-safe [`executor::Executor`].
//!
//! The runtime guarantees exactly-once delivery of every emitted batch,
//! cancels the losing side of an abandoned race, and runs producer
//! finalizers even when the consumer walks away.
//!
//! # Examples
//!
//! Merge two producers and consume the fused stream:
//!
//! ```
//! use std::sync::Arc;
//! use futures_lite::StreamExt;
//! use wye::executor::Trampoline;
//!
//! futures_lite::future::block_on(async {
//!     let exec = Arc::new(Trampoline::new());
//!     let left = wye::source::from_iter(vec![1u32, 2, 3]);
//!     let right = wye::source::from_iter(vec![10u32, 20]);
//!     let mut out: Vec<u32> = left
//!         .wye(right, wye::merge(), exec)
//!         .map(|r| r.unwrap())
//!         .collect()
//!         .await;
//!     out.sort_unstable();
//!     assert_eq!(out, vec![1, 2, 3, 10, 20]);
//! });
//! ```

#![deny(missing_debug_implementations, nonstandard_style)]
#![warn(missing_docs, unreachable_pub)]

pub mod cause;
pub mod executor;
pub mod process1;
pub mod program;
pub mod runtime;
pub mod source;

pub use either::Either;

pub use cause::{Cause, EarlyCause, Error, ReceiveY};
pub use program::combinators::{
    bounded_queue, drain_l, drain_r, dynamic, dynamic1, echo_left, either, interrupt, merge,
    merge_halt_both, merge_halt_l, merge_halt_r, timed_queue, unbounded_queue, yip, yip_l,
    yip_with, yip_with_l, Request,
};
pub use program::transform::{
    attach_l, attach_r, detach1_l, detach1_r, disconnect_l, disconnect_r, feed1, feed1_l, feed1_r,
    feed_l, feed_r, flip, halt_l, halt_r,
};
pub use program::{Cont, Step, Wye};
pub use runtime::{connect, Downstream, Handle};
pub use source::Source;

/// The wye prelude.
pub mod prelude {
    pub use crate::cause::{Cause, EarlyCause, Error, ReceiveY};
    pub use crate::executor::Executor as _;
    pub use crate::program::Wye;
    pub use crate::runtime::connect;
    pub use crate::source::Source;
}
