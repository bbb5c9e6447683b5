//! The step loop: interprets one merge program against two producers.
//!
//! All state here is owned by the actor's handler and mutated one
//! message at a time. Reads are started when the program demands a side
//! that is idle, results are folded back into the program with the feed
//! and halt rewrites, and a halt cancels whatever is still in flight.

use std::mem;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cause::{Cause, EarlyCause, Error};
use crate::executor::Executor;
use crate::program::transform::{disconnect_l, disconnect_r, feed_l, feed_r, halt_l, halt_r};
use crate::program::{Step, Wye};
use crate::runtime::actor::ActorRef;
use crate::source::{Cancel, Pull, Source};

/// Completion callback for one downstream read.
pub(crate) type GetCb<O> = Box<dyn FnOnce(Result<Vec<O>, Cause>) + Send>;

/// Acknowledgement callback for downstream unsubscription.
pub(crate) type CloseCb = Box<dyn FnOnce() + Send>;

/// Mailbox messages of one pipeline.
pub(crate) enum Msg<L, R, O> {
    /// The left producer completed a read.
    ReadyL(Pull<L>),
    /// The right producer completed a read.
    ReadyR(Pull<R>),
    /// The consumer asks for the next batch.
    Get(GetCb<O>),
    /// The consumer unsubscribed; clean up and acknowledge.
    Close(CloseCb),
}

/// State of one producer side.
enum SideState<A> {
    /// Terminated; no further reads possible.
    Done(Cause),
    /// A read is in flight; the handle cancels it at most once.
    Reading(Cancel),
    /// Quiet; the resumption can be read to start the next pull.
    Idle(Source<A>),
}

impl<A> SideState<A> {
    fn is_done(&self) -> bool {
        matches!(self, SideState::Done(_))
    }
}

/// The single-slot downstream callback.
enum Pending<O> {
    None,
    Get(GetCb<O>),
    Closing(CloseCb),
}

pub(crate) struct Driver<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    program: Wye<L, R, O>,
    left: SideState<L>,
    right: SideState<R>,
    pending: Pending<O>,
    left_bias: bool,
    exec: Arc<dyn Executor>,
    mailbox: ActorRef<Msg<L, R, O>>,
}

impl<L, R, O> Driver<L, R, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn new(
        program: Wye<L, R, O>,
        left: Source<L>,
        right: Source<R>,
        exec: Arc<dyn Executor>,
        mailbox: ActorRef<Msg<L, R, O>>,
    ) -> Self {
        Driver {
            program,
            left: SideState::Idle(left),
            right: SideState::Idle(right),
            pending: Pending::None,
            left_bias: true,
            exec,
            mailbox,
        }
    }

    pub(crate) fn handle(&mut self, msg: Msg<L, R, O>) {
        match msg {
            Msg::ReadyL(pull) => self.on_ready_l(pull),
            Msg::ReadyR(pull) => self.on_ready_r(pull),
            Msg::Get(cb) => self.on_get(cb),
            Msg::Close(cb) => self.on_close(cb),
        }
        self.run();
    }

    fn take_program(&mut self) -> Wye<L, R, O> {
        mem::replace(&mut self.program, Wye::Halt(Cause::Kill))
    }

    fn on_ready_l(&mut self, pull: Pull<L>) {
        match pull {
            Ok((batch, next)) => {
                if self.program.is_halted() {
                    // late delivery during cleanup: release and absorb
                    trace!(batch = batch.len(), "absorbing left batch after halt");
                    self.exec
                        .submit(Box::new(move || next.close(EarlyCause::Kill)));
                    self.left = SideState::Done(Cause::Kill);
                } else {
                    trace!(batch = batch.len(), "left delivered");
                    self.left = SideState::Idle(next);
                    let y = self.take_program();
                    self.program = feed_l(batch, y);
                }
            }
            Err(cause) => {
                trace!(?cause, "left terminated");
                self.left = SideState::Done(cause.clone());
                if !self.program.is_halted() {
                    let y = self.take_program();
                    self.program = halt_l(cause, y);
                }
            }
        }
    }

    fn on_ready_r(&mut self, pull: Pull<R>) {
        match pull {
            Ok((batch, next)) => {
                if self.program.is_halted() {
                    trace!(batch = batch.len(), "absorbing right batch after halt");
                    self.exec
                        .submit(Box::new(move || next.close(EarlyCause::Kill)));
                    self.right = SideState::Done(Cause::Kill);
                } else {
                    trace!(batch = batch.len(), "right delivered");
                    self.right = SideState::Idle(next);
                    let y = self.take_program();
                    self.program = feed_r(batch, y);
                }
            }
            Err(cause) => {
                trace!(?cause, "right terminated");
                self.right = SideState::Done(cause.clone());
                if !self.program.is_halted() {
                    let y = self.take_program();
                    self.program = halt_r(cause, y);
                }
            }
        }
    }

    fn on_get(&mut self, cb: GetCb<O>) {
        match &self.pending {
            Pending::None => self.pending = Pending::Get(cb),
            Pending::Get(_) => {
                // the slot holds at most one reader
                self.exec.submit(Box::new(move || {
                    cb(Err(Cause::Error(Error::msg("downstream read already pending"))))
                }));
            }
            Pending::Closing(_) => {
                self.exec.submit(Box::new(move || cb(Err(Cause::Kill))));
            }
        }
    }

    fn on_close(&mut self, cb: CloseCb) {
        match mem::replace(&mut self.pending, Pending::None) {
            Pending::Get(old) => {
                self.exec.submit(Box::new(move || old(Err(Cause::Kill))));
                self.pending = Pending::Closing(cb);
            }
            Pending::Closing(old) => {
                // already closing: keep the first acknowledgement slot
                self.pending = Pending::Closing(old);
                self.exec.submit(cb);
            }
            Pending::None => self.pending = Pending::Closing(cb),
        }
        if !self.program.is_halted() {
            debug!("downstream unsubscribed, disconnecting both sides");
            let y = self.take_program();
            self.program = disconnect_l(EarlyCause::Kill, disconnect_r(EarlyCause::Kill, y)).kill();
        }
    }

    /// Iterate the program until it blocks on input, output, or halts.
    fn run(&mut self) {
        loop {
            let y = self.take_program();
            match y.step() {
                Step::Emit(os, cont) => match mem::replace(&mut self.pending, Pending::None) {
                    Pending::Get(cb) => {
                        trace!(batch = os.len(), "delivering batch downstream");
                        self.exec.submit(Box::new(move || cb(Ok(os))));
                        self.program = cont.resume();
                    }
                    Pending::Closing(cb) => {
                        // cleanup drains the program; its output is dropped
                        self.pending = Pending::Closing(cb);
                        self.program = cont.resume();
                    }
                    Pending::None => {
                        // nobody is asking yet; hold the batch
                        self.program = cont.prepend(Wye::Emit(os));
                        return;
                    }
                },
                Step::AwaitL(recv, cont) => {
                    self.program = cont.prepend(Wye::AwaitL(recv));
                    self.left_bias = false;
                    self.start_left();
                    return;
                }
                Step::AwaitR(recv, cont) => {
                    self.program = cont.prepend(Wye::AwaitR(recv));
                    self.left_bias = true;
                    self.start_right();
                    return;
                }
                Step::AwaitBoth(recv, cont) => {
                    self.program = cont.prepend(Wye::AwaitBoth(recv));
                    if self.left_bias {
                        self.start_left();
                        self.start_right();
                    } else {
                        self.start_right();
                        self.start_left();
                    }
                    self.left_bias = !self.left_bias;
                    return;
                }
                Step::Halt(cause) => {
                    self.program = Wye::Halt(cause.clone());
                    self.kill_left();
                    self.kill_right();
                    if self.left.is_done() && self.right.is_done() {
                        match mem::replace(&mut self.pending, Pending::None) {
                            Pending::Get(cb) => {
                                debug!(?cause, "delivering terminal cause");
                                self.exec.submit(Box::new(move || cb(Err(cause))));
                            }
                            Pending::Closing(cb) => {
                                debug!("cleanup complete");
                                self.exec.submit(cb);
                            }
                            Pending::None => {}
                        }
                    }
                    return;
                }
            }
        }
    }

    fn start_left(&mut self) {
        match mem::replace(&mut self.left, SideState::Reading(Cancel::noop())) {
            SideState::Idle(source) => {
                trace!("starting left read");
                let mailbox = self.mailbox.clone();
                let cancel = source.read(Box::new(move |pull| mailbox.send(Msg::ReadyL(pull))));
                if let SideState::Reading(slot) = &mut self.left {
                    *slot = cancel;
                }
            }
            other => self.left = other,
        }
    }

    fn start_right(&mut self) {
        match mem::replace(&mut self.right, SideState::Reading(Cancel::noop())) {
            SideState::Idle(source) => {
                trace!("starting right read");
                let mailbox = self.mailbox.clone();
                let cancel = source.read(Box::new(move |pull| mailbox.send(Msg::ReadyR(pull))));
                if let SideState::Reading(slot) = &mut self.right {
                    *slot = cancel;
                }
            }
            other => self.right = other,
        }
    }

    fn kill_left(&mut self) {
        match mem::replace(&mut self.left, SideState::Done(Cause::Kill)) {
            SideState::Done(cause) => self.left = SideState::Done(cause),
            SideState::Reading(mut cancel) => {
                trace!("cancelling in-flight left read");
                cancel.kill(EarlyCause::Kill);
                // completion still arrives through the mailbox
                self.left = SideState::Reading(Cancel::noop());
            }
            SideState::Idle(source) => {
                trace!("closing idle left side");
                self.exec
                    .submit(Box::new(move || source.close(EarlyCause::Kill)));
            }
        }
    }

    fn kill_right(&mut self) {
        match mem::replace(&mut self.right, SideState::Done(Cause::Kill)) {
            SideState::Done(cause) => self.right = SideState::Done(cause),
            SideState::Reading(mut cancel) => {
                trace!("cancelling in-flight right read");
                cancel.kill(EarlyCause::Kill);
                self.right = SideState::Reading(Cancel::noop());
            }
            SideState::Idle(source) => {
                trace!("closing idle right side");
                self.exec
                    .submit(Box::new(move || source.close(EarlyCause::Kill)));
            }
        }
    }
}
