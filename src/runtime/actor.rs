//! A serialized mailbox: one message at a time, in arrival order.
//!
//! `send` enqueues and, if no drain is in flight, schedules one on the
//! executor. The drain task owns the only strong reference while work is
//! pending, so a pipeline stays alive exactly as long as messages can
//! still reach it: producer callbacks hold weak references and fall
//! silent once the consumer and the queue are gone.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::executor::Executor;

struct ActorShared<M> {
    exec: Arc<dyn Executor>,
    mailbox: Mutex<Mailbox<M>>,
    handler: Mutex<Option<Box<dyn FnMut(M) + Send>>>,
}

struct Mailbox<M> {
    queue: VecDeque<M>,
    draining: bool,
}

/// Strong handle to a serialized actor.
pub(crate) struct Actor<M: Send + 'static> {
    shared: Arc<ActorShared<M>>,
}

impl<M: Send + 'static> Actor<M> {
    /// Create an actor; `make_handler` receives the weak self-reference
    /// the handler can use to send itself messages.
    pub(crate) fn new<H>(
        exec: Arc<dyn Executor>,
        make_handler: impl FnOnce(ActorRef<M>) -> H,
    ) -> Actor<M>
    where
        H: FnMut(M) + Send + 'static,
    {
        let actor = Actor {
            shared: Arc::new(ActorShared {
                exec,
                mailbox: Mutex::new(Mailbox {
                    queue: VecDeque::new(),
                    draining: false,
                }),
                handler: Mutex::new(None),
            }),
        };
        let handler = make_handler(actor.downgrade());
        *actor.shared.handler.lock() = Some(Box::new(handler));
        actor
    }

    /// A weak handle that keeps the actor reachable without keeping it
    /// alive.
    pub(crate) fn downgrade(&self) -> ActorRef<M> {
        ActorRef {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Enqueue a message.
    pub(crate) fn send(&self, msg: M) {
        send_to(self.shared.clone(), msg);
    }
}

impl<M: Send + 'static> Clone for Actor<M> {
    fn clone(&self) -> Self {
        Actor {
            shared: self.shared.clone(),
        }
    }
}

/// Weak handle to a serialized actor; sends are dropped once the actor
/// is gone.
pub(crate) struct ActorRef<M: Send + 'static> {
    shared: Weak<ActorShared<M>>,
}

impl<M: Send + 'static> ActorRef<M> {
    pub(crate) fn send(&self, msg: M) {
        if let Some(shared) = self.shared.upgrade() {
            send_to(shared, msg);
        }
    }
}

impl<M: Send + 'static> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        ActorRef {
            shared: self.shared.clone(),
        }
    }
}

fn send_to<M: Send + 'static>(shared: Arc<ActorShared<M>>, msg: M) {
    {
        let mut mailbox = shared.mailbox.lock();
        mailbox.queue.push_back(msg);
        if mailbox.draining {
            return;
        }
        mailbox.draining = true;
    }
    let exec = shared.exec.clone();
    exec.submit(Box::new(move || drain(shared)));
}

fn drain<M: Send + 'static>(shared: Arc<ActorShared<M>>) {
    loop {
        let msg = {
            let mut mailbox = shared.mailbox.lock();
            match mailbox.queue.pop_front() {
                Some(msg) => msg,
                None => {
                    mailbox.draining = false;
                    return;
                }
            }
        };
        let mut handler = shared.handler.lock();
        if let Some(handler) = handler.as_mut() {
            handler(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Trampoline;

    #[test]
    fn messages_are_handled_in_order() {
        let exec = Arc::new(Trampoline::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let actor: Actor<i32> = Actor::new(exec, |_| {
            move |msg| seen2.lock().push(msg)
        });
        actor.send(1);
        actor.send(2);
        actor.send(3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn handler_can_send_to_itself_without_reentry() {
        let exec = Arc::new(Trampoline::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let actor: Actor<i32> = Actor::new(exec, |me| {
            move |msg| {
                seen2.lock().push(msg);
                if msg < 3 {
                    me.send(msg + 1);
                }
            }
        });
        actor.send(1);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn weak_sends_after_drop_are_ignored() {
        let exec = Arc::new(Trampoline::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let actor: Actor<i32> = Actor::new(exec, |_| {
            move |msg| seen2.lock().push(msg)
        });
        let weak = actor.downgrade();
        weak.send(1);
        drop(actor);
        weak.send(2);
        assert_eq!(*seen.lock(), vec![1]);
    }
}
