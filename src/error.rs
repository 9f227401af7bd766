//! Centralized error types for xroad-swa.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the xroad-swa library.
#[derive(Error, Debug)]
pub enum SwaError {
    /// A message-body schema was declared incorrectly.
    ///
    /// Raised while the schema is being built, never while handling a request.
    #[error("Invalid definition of '{class}.{field}': {reason}")]
    Definition {
        class: String,
        field: String,
        reason: String,
    },

    /// A field value failed occurrence, type or facet checks.
    #[error("Validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The multipart mimetype or its `boundary` parameter could not be located.
    #[error("Multipart boundary not found: {0}")]
    BoundaryNotFound(String),

    /// A part is missing its header/body separator or is otherwise unreadable.
    #[error("Malformed multipart body: {0}")]
    MalformedBody(String),

    /// An `attachment`-disposed part carries no `Content-ID`.
    #[error("Attachment part has no Content-ID: {0}")]
    MissingContentId(String),

    /// A storage fingerprint does not have the expected shape or registry.
    #[error("Malformed fingerprint: {0}")]
    MalformedFingerprint(String),

    /// The object behind a well-formed fingerprint has been released.
    #[error("File attachment is no longer available: {0}")]
    ObjectUnavailable(String),

    /// The XML layer rejected a document.
    #[error("XML error: {0}")]
    Xml(String),

    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, SwaError>`.
pub type Result<T> = std::result::Result<T, SwaError>;

impl SwaError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Validation` variant for a field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a `Definition` variant for a field of a message-body schema.
    pub fn definition(
        class: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Definition {
            class: class.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// `true` for errors in a schema declaration.
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::Definition { .. })
    }

    /// `true` for multipart structural errors.
    pub fn is_multipart_error(&self) -> bool {
        matches!(
            self,
            Self::BoundaryNotFound(_) | Self::MalformedBody(_) | Self::MissingContentId(_)
        )
    }

    /// `true` when the peer's data caused the error (a SOAP `Client` fault).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Definition { .. } | Self::Io { .. })
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `SwaError::io`).
impl From<std::io::Error> for SwaError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<quick_xml::Error> for SwaError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

/// Format the offending value the way every validation message carries it.
///
/// `"<reason> $$<value>$$"` keeps the payload easy to pull out of log lines.
pub fn with_value(reason: impl std::fmt::Display, value: impl std::fmt::Display) -> String {
    format!("{reason} $${value}$$")
}

/// Like [`with_value`] for context that is not the value itself (a Content-ID).
pub fn with_extra(reason: impl std::fmt::Display, extra: impl std::fmt::Display) -> String {
    format!("{reason}(extra)$${extra}$$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_value_shape() {
        assert_eq!(with_value("too long", "abcdef"), "too long $$abcdef$$");
        assert_eq!(
            with_extra("attachment not found", "cid:abc"),
            "attachment not found(extra)$$cid:abc$$"
        );
    }

    #[test]
    fn test_error_classes() {
        let def = SwaError::definition("Person", "age", "bad enum");
        assert!(def.is_definition_error());
        assert!(!def.is_client_error());

        let boundary = SwaError::BoundaryNotFound("no boundary".into());
        assert!(boundary.is_multipart_error());
        assert!(boundary.is_client_error());

        let gone = SwaError::ObjectUnavailable("fp".into());
        assert!(!gone.is_multipart_error());
        assert!(gone.is_client_error());
    }

    #[test]
    fn test_validation_display() {
        let e = SwaError::validation("name", with_value("length must be exactly 5", "abc"));
        assert_eq!(
            e.to_string(),
            "Validation failed for 'name': length must be exactly 5 $$abc$$"
        );
    }
}
