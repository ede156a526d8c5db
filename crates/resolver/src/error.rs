//! Error types for resolution and validation.

use thiserror::Error;

/// Errors raised by the resolution engine and the state validator.
#[derive(Debug, Error)]
pub enum Error {
    /// Components were still pending once the retry budget ran out.
    ///
    /// This is how both dependency cycles and missing resources surface:
    /// neither is detected up front.
    #[error(
        "dependency loop after {rounds} rounds, usually caused by a missing resource; unresolved: {}",
        pending.join(", ")
    )]
    Unresolvable {
        /// Keys of the components that never resolved
        pending: Vec<String>,
        /// Rounds attempted before giving up
        rounds: usize,
    },

    /// A component in the state needs a resource nothing provides
    #[error("unmatched need in state: {component} - {need}")]
    UnmatchedNeed {
        /// Name of the component with the dangling need
        component: String,
        /// Identity key of the need
        need: String,
    },

    /// No compiled-in driver carries the requested name
    #[error("unsuitable driver: '{name}' (available: {})", available.join(", "))]
    UnknownDriver {
        /// Requested driver name
        name: String,
        /// Names of the registered drivers
        available: Vec<String>,
    },
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolvable_lists_pending() {
        let err = Error::Unresolvable {
            pending: vec!["component.web:a".into(), "component.web:b".into()],
            rounds: 51,
        };
        let msg = err.to_string();
        assert!(msg.contains("51 rounds"));
        assert!(msg.contains("component.web:a, component.web:b"));
    }

    #[test]
    fn test_unmatched_need_display() {
        let err = Error::UnmatchedNeed {
            component: "web".into(),
            need: "service.db:main".into(),
        };
        assert_eq!(err.to_string(), "unmatched need in state: web - service.db:main");
    }
}
