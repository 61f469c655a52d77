#![forbid(unsafe_code)]

//! Errors raised by middleware.
//!
//! An interceptor returns [`MiddlewareError`] to signal a fault. The chain
//! blocks the write, reports the fault through `tracing`, and never hands it
//! back to the caller of [`Store::set`](crate::Store::set).

use std::error::Error;
use std::fmt;

/// Fault raised by an interceptor.
#[derive(Debug)]
pub enum MiddlewareError {
    /// The interceptor refused the update with a reason.
    Rejected(String),
    /// The interceptor failed for an underlying reason.
    Failed(Box<dyn Error + 'static>),
    /// The interceptor panicked; the payload message when it was a string.
    Panicked(String),
}

impl MiddlewareError {
    /// Reject with a message.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Wrap an underlying error.
    #[must_use]
    pub fn failed(err: impl Error + 'static) -> Self {
        Self::Failed(Box::new(err))
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(message)
    }
}

impl fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "update rejected: {reason}"),
            Self::Failed(err) => write!(f, "middleware failed: {err}"),
            Self::Panicked(message) => write!(f, "middleware panicked: {message}"),
        }
    }
}

impl Error for MiddlewareError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            MiddlewareError::rejected("too large").to_string(),
            "update rejected: too large"
        );
        let io = std::io::Error::other("disk gone");
        let err = MiddlewareError::failed(io);
        assert_eq!(err.to_string(), "middleware failed: disk gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn panic_payloads_are_stringified() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(
            MiddlewareError::from_panic(boxed.as_ref()).to_string(),
            "middleware panicked: boom"
        );
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert!(matches!(
            MiddlewareError::from_panic(boxed.as_ref()),
            MiddlewareError::Panicked(m) if m == "bang"
        ));
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert!(MiddlewareError::from_panic(boxed.as_ref())
            .to_string()
            .contains("non-string"));
    }
}
