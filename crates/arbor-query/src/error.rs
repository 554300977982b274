//! Error types for arbor-query

use thiserror::Error;

/// The result type for arbor-query operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by tree construction, rebinding, and validation.
///
/// Rule predicates and transforms never raise on a non-match; "no match" is a
/// normal `None` return. These variants cover only the fatal conditions, all
/// of which are reported synchronously to the caller of the operation that
/// raised them and never retried internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Arity or result-type mismatch detected while constructing a node
    #[error("Structural error: {0}")]
    Structural(String),

    /// Rebinding could not resolve a name in the target catalog
    #[error("Metadata not found: {0}")]
    MetadataNotFound(String),

    /// A variable reference has no enclosing binding that establishes it
    #[error("Variable reference '{0}' is not valid in its scope")]
    ReferenceInvalid(String),

    /// A variable reference resolved to a binding of a different type
    #[error("Variable reference '{0}' does not match the type of its binding")]
    ReferenceTypeMismatch(String),

    /// The same parameter name is used with two different types in one tree
    #[error("Incompatible parameter references for '{0}'")]
    IncompatibleParameterReferences(String),

    /// A referenced metadata element belongs to the wrong data space
    #[error("Space violation: {element} does not belong to the {space} space")]
    SpaceViolation { element: String, space: String },

    /// Internal error (should not happen in normal usage)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a structural error
    pub fn structural(message: impl Into<String>) -> Self {
        Error::Structural(message.into())
    }

    /// Create a metadata-not-found error naming the missing element
    pub fn metadata_not_found(name: impl Into<String>) -> Self {
        Error::MetadataNotFound(name.into())
    }

    /// Create a reference-invalid error for a variable name
    pub fn reference_invalid(name: impl Into<String>) -> Self {
        Error::ReferenceInvalid(name.into())
    }

    /// Create a reference-type-mismatch error for a variable name
    pub fn reference_type_mismatch(name: impl Into<String>) -> Self {
        Error::ReferenceTypeMismatch(name.into())
    }

    /// Create an incompatible-parameter-references error
    pub fn incompatible_parameters(name: impl Into<String>) -> Self {
        Error::IncompatibleParameterReferences(name.into())
    }

    /// Create a space-violation error
    pub fn space_violation(element: impl Into<String>, space: impl Into<String>) -> Self {
        Error::SpaceViolation {
            element: element.into(),
            space: space.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}
