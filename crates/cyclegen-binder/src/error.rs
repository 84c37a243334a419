use cyclegen_core::{ConfigError, CoreError};
use thiserror::Error;

/// Errors raised while building or querying binding functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BinderError {
    /// Combiner column spec is malformed.
    #[error("invalid combiner spec `{spec}`: {message}")]
    InvalidSpec {
        /// The full spec being parsed.
        spec: String,
        /// What is wrong with it.
        message: String,
    },

    /// Product of column cardinalities does not fit in a 64-bit ordinal.
    #[error("combiner spec `{spec}` has more combinations than fit in a 64-bit ordinal")]
    CardinalityOverflow {
        /// The spec that overflowed.
        spec: String,
    },

    /// Label does not belong to the combiner's space.
    #[error("cannot decode `{label}`: {message}")]
    InvalidLabel {
        /// The label given.
        label: String,
        /// Which column rejected it and why.
        message: String,
    },

    /// Index vector does not belong to the combiner's space.
    #[error("invalid index vector: {message}")]
    InvalidIndexes {
        /// Which column rejected it and why.
        message: String,
    },

    /// Binding function chain is malformed.
    #[error("invalid binding `{spec}`: {message}")]
    InvalidBinding {
        /// The binding spec.
        spec: String,
        /// What is wrong with it.
        message: String,
    },
}

impl BinderError {
    pub(crate) fn spec(spec: &str, message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn binding(spec: &str, message: impl Into<String>) -> Self {
        Self::InvalidBinding {
            spec: spec.to_string(),
            message: message.into(),
        }
    }
}

impl From<BinderError> for CoreError {
    fn from(err: BinderError) -> Self {
        CoreError::Config(ConfigError::single(err.to_string()))
    }
}

/// Result alias for binder operations.
pub type BinderResult<T> = Result<T, BinderError>;
