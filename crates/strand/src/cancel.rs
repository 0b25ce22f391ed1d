//! Cooperative cancellation tokens.
//!
//! A token is a shared flag captured at fiber creation. Bodies poll it (or
//! call [`CancellationToken::err_if_canceled`]) at yield boundaries; the
//! scheduler also observes it before every step. Tokens carry identity: a
//! body raising a cancellation with a token *other* than the fiber's own is
//! treated as a fault, not a cancellation.

use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::sync::{AtomicBool, Ordering};

struct Inner {
    canceled: AtomicBool,
}

/// Shared cancellation signal. Cloning yields another handle to the same
/// signal; [`CancellationToken::none`] is the neutral token that can never
/// be canceled.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Option<Arc<Inner>>,
}

impl CancellationToken {
    /// A fresh, uncanceled token.
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                canceled: AtomicBool::new(false),
            })),
        }
    }

    /// The neutral token. Never signals; `cancel` on it is a no-op.
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// True for the neutral token.
    pub fn is_none(&self) -> bool {
        self.inner.is_none()
    }

    /// Signal cancellation. Idempotent; a no-op on the neutral token.
    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.canceled.store(true, Ordering::Release);
        }
    }

    /// True once `cancel` has been called on any handle to this token.
    pub fn is_canceled(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.canceled.load(Ordering::Acquire),
            None => false,
        }
    }

    /// Raise this token's cancellation if it has been signaled.
    ///
    /// Fiber bodies call this between yields; returning the error out of the
    /// body terminates the fiber as canceled when the token is the fiber's
    /// own, and as faulted otherwise.
    pub fn err_if_canceled(&self) -> Result<(), Error> {
        if self.is_canceled() {
            Err(Error::Canceled {
                token: self.clone(),
            })
        } else {
            Ok(())
        }
    }

    /// Identity comparison: two handles to the same signal. Neutral tokens
    /// have no identity and never match, not even each other.
    pub fn same_as(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("CancellationToken")
                .field("canceled", &inner.canceled.load(Ordering::Relaxed))
                .finish(),
            None => f.write_str("CancellationToken::none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observable_and_idempotent() {
        let t = CancellationToken::new();
        assert!(!t.is_canceled());
        assert!(t.err_if_canceled().is_ok());

        t.cancel();
        assert!(t.is_canceled());
        t.cancel(); // second call is a no-op
        assert!(t.is_canceled());
        assert!(matches!(
            t.err_if_canceled(),
            Err(Error::Canceled { ref token }) if token.same_as(&t)
        ));
    }

    #[test]
    fn clones_share_the_signal() {
        let t = CancellationToken::new();
        let c = t.clone();
        c.cancel();
        assert!(t.is_canceled());
        assert!(t.same_as(&c));
    }

    #[test]
    fn distinct_tokens_do_not_match() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        assert!(!a.same_as(&b));
    }

    #[test]
    fn neutral_token_never_cancels_and_never_matches() {
        let n = CancellationToken::none();
        n.cancel();
        assert!(!n.is_canceled());
        assert!(n.err_if_canceled().is_ok());
        assert!(!n.same_as(&CancellationToken::none()));
        assert!(!n.same_as(&CancellationToken::new()));
    }
}
