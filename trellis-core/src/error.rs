//! Error Taxonomy
//!
//! Every failure the engine can surface is a variant of [`Error`]. The
//! variants split into two families:
//!
//! - **Localized** errors (`BindingEval`, `PropWriteDenied`) affect a single
//!   binding or write. They are logged and the rest of the tree keeps
//!   updating.
//! - **Structural** errors (`DuplicateKey`, `CyclicDependency`,
//!   `WriteDuringComputed`, `FlushOverflow`, `Render`, `Compile`, `Backend`)
//!   halt the current flush or mount. Existing mounts are left intact.
//!
//! `Error` is `Clone` so a fault raised deep inside a computed value can be
//! recorded in the tracking context and surfaced again by the computed that
//! encloses it.

use thiserror::Error;

/// Errors raised by a [`Backend`](crate::backend::Backend) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend does not implement the requested operation
    /// (e.g. text nodes).
    #[error("operation not supported by backend")]
    Unsupported,

    /// The backend tried and failed.
    #[error("backend failure: {0}")]
    Failed(String),
}

/// Errors raised by the update engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The descriptor tree handed to the engine is malformed
    /// (e.g. `v-else` without a preceding `v-if`).
    #[error("compile error: {0}")]
    Compile(String),

    /// A component's render function failed, or a component reference
    /// could not be resolved.
    #[error("render error in {component}: {message}")]
    Render { component: String, message: String },

    /// An attribute or predicate expression failed during evaluation.
    #[error("binding `{binding}` failed: {message}")]
    BindingEval { binding: String, message: String },

    /// A keyed list produced the same key more than once.
    #[error("duplicate keys in list: {0}")]
    DuplicateKey(String),

    /// A computed value re-entered itself while computing.
    #[error("cyclic dependency detected in computed value")]
    CyclicDependency,

    /// A reactive write happened while a computed value was evaluating.
    #[error("reactive writes are not allowed inside a computed value")]
    WriteDuringComputed,

    /// The scheduler failed to quiesce within the configured number of rounds.
    #[error("flush did not settle after {0} rounds")]
    FlushOverflow(usize),

    /// A flush was requested after the scheduler halted.
    #[error("scheduler halted after a previous flush overflow")]
    Halted,

    /// Attempt to write to a component's props.
    #[error("props are read-only (attempted write to `{0}`)")]
    PropWriteDenied(String),

    /// A backend call failed while building the tree.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    /// Build a [`Error::BindingEval`] from anything printable.
    pub fn binding(binding: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::BindingEval {
            binding: binding.into(),
            message: message.to_string(),
        }
    }

    /// Build a [`Error::Render`] from anything printable.
    pub fn render(component: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Render {
            component: component.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error halts the current flush or mount.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Error::BindingEval { .. } | Error::PropWriteDenied(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_errors_are_localized() {
        assert!(!Error::binding("text", "boom").is_structural());
        assert!(!Error::PropWriteDenied("count".into()).is_structural());
    }

    #[test]
    fn structural_errors_halt() {
        assert!(Error::DuplicateKey("1".into()).is_structural());
        assert!(Error::CyclicDependency.is_structural());
        assert!(Error::FlushOverflow(1000).is_structural());
        assert!(Error::from(BackendError::Unsupported).is_structural());
    }

    #[test]
    fn messages_name_the_culprit() {
        let err = Error::render("Counter", "no such slot");
        assert_eq!(err.to_string(), "render error in Counter: no such slot");
    }
}
