// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for minisched operations
#[derive(Error, Debug, Diagnostic)]
pub enum MiniSchedError {
    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(minisched::resource_not_found),
        help("Verify the resource name and namespace are correct")
    )]
    ResourceNotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// Resource already exists
    #[error("Resource already exists: {resource_key}")]
    #[diagnostic(
        code(minisched::resource_already_exists),
        help("Delete the existing resource first, or pick another name")
    )]
    ResourceAlreadyExists {
        #[allow(unused)]
        resource_key: String,
    },

    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(
        code(minisched::invalid_resource),
        help("{suggestion}")
    )]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(minisched::serialization_error),
        help("Ensure the watch event carries a valid Kubernetes object")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(minisched::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for minisched operations
pub type Result<T> = std::result::Result<T, MiniSchedError>;

impl MiniSchedError {
    /// Create a ResourceNotFound error
    pub fn resource_not_found(resource_key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ResourceAlreadyExists error
    pub fn resource_already_exists(resource_key: impl Into<String>) -> Self {
        Self::ResourceAlreadyExists {
            resource_key: resource_key.into(),
        }
    }

    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
