//! Termination causes and the events a merge program receives.

use std::any::Any;
use std::error;
use std::fmt;
use std::sync::Arc;

/// Why a stream, or one side of a merge, terminated.
///
/// `End` is normal completion. Everything else is an [`EarlyCause`]:
/// `Kill` is a forced shutdown (the consumer went away, or the peer side
/// halted the program), `Error` carries an opaque failure value.
#[derive(Clone, Debug)]
pub enum Cause {
    /// Normal completion.
    End,
    /// Forced early termination.
    Kill,
    /// A producer or a receive closure failed.
    Error(Error),
}

impl Cause {
    /// Returns `true` for normal completion.
    pub fn is_end(&self) -> bool {
        matches!(self, Cause::End)
    }

    /// Discriminate normal completion from early termination.
    pub fn fold<T>(self, on_end: impl FnOnce() -> T, on_early: impl FnOnce(EarlyCause) -> T) -> T {
        match self {
            Cause::End => on_end(),
            Cause::Kill => on_early(EarlyCause::Kill),
            Cause::Error(e) => on_early(EarlyCause::Error(e)),
        }
    }

    /// The early cause used when this termination must propagate as a
    /// forced shutdown. `End` hardens to `Kill`; an `Error` is kept so the
    /// original failure surfaces downstream.
    pub fn kill(self) -> EarlyCause {
        match self {
            Cause::End | Cause::Kill => EarlyCause::Kill,
            Cause::Error(e) => EarlyCause::Error(e),
        }
    }

    /// Combine two termination reasons, preferring the more informative
    /// one: an `Error` always wins over `Kill`, which wins over `End`.
    pub fn caused_by(self, other: Cause) -> Cause {
        match (self, other) {
            (Cause::End, other) => other,
            (this, Cause::End) => this,
            (Cause::Kill, other) => other,
            (this @ Cause::Error(_), _) => this,
        }
    }
}

impl From<EarlyCause> for Cause {
    fn from(early: EarlyCause) -> Cause {
        match early {
            EarlyCause::Kill => Cause::Kill,
            EarlyCause::Error(e) => Cause::Error(e),
        }
    }
}

/// A termination reason that is not normal completion.
#[derive(Clone, Debug)]
pub enum EarlyCause {
    /// Forced early termination.
    Kill,
    /// A failure carrying the original error value.
    Error(Error),
}

/// An opaque, cheaply clonable error value carried by [`Cause::Error`].
#[derive(Clone)]
pub struct Error(Arc<dyn error::Error + Send + Sync>);

impl Error {
    /// Wrap any error value.
    pub fn new(err: impl error::Error + Send + Sync + 'static) -> Error {
        Error(Arc::new(err))
    }

    /// An error that is nothing but a message.
    pub fn msg(msg: impl Into<String>) -> Error {
        Error(Arc::new(Message(msg.into())))
    }

    /// Convert a caught panic payload into an error value.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Error {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "receive closure panicked".to_string());
        Error::msg(msg)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

/// A merge event delivered to a program awaiting both sides.
#[derive(Clone, Debug)]
pub enum ReceiveY<L, R> {
    /// The left side delivered a value.
    ReceiveL(L),
    /// The right side delivered a value.
    ReceiveR(R),
    /// The left side terminated; the right side is still live.
    HaltL(Cause),
    /// The right side terminated; the left side is still live.
    HaltR(Cause),
}

impl<L, R> ReceiveY<L, R> {
    /// Swap the two sides of the event.
    pub fn flip(self) -> ReceiveY<R, L> {
        match self {
            ReceiveY::ReceiveL(l) => ReceiveY::ReceiveR(l),
            ReceiveY::ReceiveR(r) => ReceiveY::ReceiveL(r),
            ReceiveY::HaltL(cause) => ReceiveY::HaltR(cause),
            ReceiveY::HaltR(cause) => ReceiveY::HaltL(cause),
        }
    }

    /// Returns `true` if the event reports a terminated side.
    pub fn is_halt(&self) -> bool {
        matches!(self, ReceiveY::HaltL(_) | ReceiveY::HaltR(_))
    }
}
