//! Error taxonomy for fibers, schedulers, and the composition surface.

use thiserror::Error;

use crate::cancel::CancellationToken;

/// Errors produced by fibers, the scheduler, and the composition helpers.
///
/// A fiber body that returns [`Error::Canceled`] carrying its own token
/// terminates the fiber as canceled; any other error (including a
/// cancellation raised with a foreign token) terminates it as faulted and is
/// retained on the fiber for inspection.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Cooperative termination driven by a cancellation token.
    #[error("canceled")]
    Canceled {
        /// The token whose cancellation was observed.
        token: CancellationToken,
    },

    /// Any other failure raised by a fiber body, including captured panics.
    #[error("fiber fault: {0}")]
    Fault(String),

    /// Raised by the `when_all` / `when_any` / `delay` supervisors when their
    /// deadline passes before the watched condition holds.
    #[error("timed out")]
    Timeout,

    /// An operation was attempted against a fiber or scheduler in a state
    /// that cannot honor it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The scheduler has been disposed.
    #[error("scheduler disposed")]
    Disposed,

    /// Collected failures of `when_all` members, rethrown by the supervisor
    /// once every member has terminated.
    #[error("{} fiber(s) ended faulted or canceled", .0.len())]
    Aggregate(Vec<Error>),
}

impl Error {
    /// True when this is a cancellation raised with `token` itself.
    pub fn is_cancellation_of(&self, token: &CancellationToken) -> bool {
        match self {
            Error::Canceled { token: t } => t.same_as(token),
            _ => false,
        }
    }

    /// Render a panic payload into a fault. Panics escape fiber bodies as
    /// `Box<dyn Any>`; only `&str` and `String` payloads carry a message.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "fiber body panicked".to_string()
        };
        Error::Fault(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_matches_only_its_token() {
        let t1 = CancellationToken::new();
        let t2 = CancellationToken::new();
        let err = Error::Canceled { token: t1.clone() };

        assert!(err.is_cancellation_of(&t1));
        assert!(!err.is_cancellation_of(&t2));
        assert!(!Error::Timeout.is_cancellation_of(&t1));
    }

    #[test]
    fn panic_payload_messages() {
        let e = Error::from_panic(Box::new("boom"));
        assert!(matches!(e, Error::Fault(ref m) if m == "boom"));

        let e = Error::from_panic(Box::new(String::from("kaput")));
        assert!(matches!(e, Error::Fault(ref m) if m == "kaput"));

        let e = Error::from_panic(Box::new(17u32));
        assert!(matches!(e, Error::Fault(ref m) if m.contains("panicked")));
    }

    #[test]
    fn aggregate_display_counts() {
        let errs = Error::Aggregate(vec![Error::Timeout, Error::Fault("x".into())]);
        assert_eq!(errs.to_string(), "2 fiber(s) ended faulted or canceled");
    }
}
