//! The concurrent runtime: drives a merge program against two live
//! producers and serves the consumer.
//!
//! One pipeline is one serialized actor owning the current program, both
//! producer handles, the pending downstream callback, and the read-start
//! bias. Producer reads race; whichever completes first is fed to the
//! program, and a losing in-flight read is cancelled when the program
//! halts.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use futures_lite::StreamExt;
//! use wye::executor::Trampoline;
//!
//! futures_lite::future::block_on(async {
//!     let exec = Arc::new(Trampoline::new());
//!     let left = wye::source::from_iter(vec![1, 2, 3]);
//!     let right = wye::source::from_iter(vec![10, 20]);
//!     let stream = left.wye(right, wye::merge(), exec);
//!     let mut out: Vec<i32> = stream.map(|r| r.unwrap()).collect().await;
//!     out.sort_unstable();
//!     assert_eq!(out, vec![1, 2, 3, 10, 20]);
//! });
//! ```

mod actor;
mod driver;
mod downstream;

pub use downstream::{Downstream, Handle};

use std::sync::Arc;

use actor::Actor;
use driver::{Driver, Msg};

use crate::executor::Executor;
use crate::program::Wye;
use crate::source::Source;

/// Connect two producers through a merge program, returning the raw pull
/// handle. Nothing runs until the first `get`.
pub fn connect<L, R, O>(
    left: Source<L>,
    right: Source<R>,
    program: Wye<L, R, O>,
    exec: Arc<dyn Executor>,
) -> Handle<O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    let actor = Actor::new(exec.clone(), |mailbox| {
        let mut driver = Driver::new(program, left, right, exec, mailbox);
        move |msg: Msg<L, R, O>| driver.handle(msg)
    });
    let get_actor = actor.clone();
    let close_actor = actor;
    Handle::from_parts(
        Arc::new(move |cb| get_actor.send(Msg::Get(cb))),
        Arc::new(move |cb| close_actor.send(Msg::Close(cb))),
    )
}

impl<A: Send + 'static> Source<A> {
    /// Fuse this producer with `right` under `program`, returning the
    /// output stream.
    pub fn wye<R, O>(
        self,
        right: Source<R>,
        program: Wye<A, R, O>,
        exec: Arc<dyn Executor>,
    ) -> Downstream<O>
    where
        R: Send + 'static,
        O: Send + 'static,
    {
        connect(self, right, program, exec).into_stream()
    }
}
