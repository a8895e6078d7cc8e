//! Published health signal.

use std::fmt;

/// Aggregate health state published by the gate and served by the responder.
///
/// Starts out [`Signal::Unset`]; the first write happens the instant the
/// startup phase succeeds, and every readiness pass rewrites it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    /// No signal published yet (startup still in progress).
    #[default]
    Unset,
    /// All checks passing.
    Green,
    /// One or more readiness checks failing.
    Yellow,
    /// Explicitly unhealthy.
    Red,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Unset => write!(f, "unset"),
            Signal::Green => write!(f, "green"),
            Signal::Yellow => write!(f, "yellow"),
            Signal::Red => write!(f, "red"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unset() {
        assert_eq!(Signal::default(), Signal::Unset);
    }

    #[test]
    fn test_display() {
        assert_eq!(Signal::Green.to_string(), "green");
        assert_eq!(Signal::Yellow.to_string(), "yellow");
        assert_eq!(Signal::Red.to_string(), "red");
        assert_eq!(Signal::Unset.to_string(), "unset");
    }
}
