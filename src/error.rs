use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example, due to bad input - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The caller provided invalid input (a malformed record, a key that
    /// does not belong to the blob, an unknown session) or configuration.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Entropy or scheme failure while generating key material.
    KeyGenerationFailure,
    /// The authentication tag did not verify: wrong key, tampered or
    /// corrupted ciphertext.
    IntegrityFailure,
    /// None of the legacy decode strategies recovered a structured value.
    DecodingExhausted,
    /// A session identifier was not present in the key store (or expired).
    UnknownSession,
    /// A payload could not be represented as a canonical JSON mapping.
    SerializationFailure,
    /// A wrapped key, key or nested record is structurally invalid
    /// (bad base64, wrong length, missing section).
    MalformedRecord,
    /// Interaction with the filesystem or stdin/stdout failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct PqsealError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
    input: Option<String>,
}

impl PqsealError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
            input: None,
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
            input: None,
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
            input: None,
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
            input: None,
        }
    }

    /// Creates a `DecodingExhausted` error that keeps the input which could
    /// not be decoded, for diagnostics.
    pub fn decoding_exhausted(msg: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::User,
            kind: Some(ErrorKind::DecodingExhausted),
            source: None,
            msg: msg.into(),
            input: Some(input.into()),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// The input that could not be decoded, if the error carries one.
    pub fn offending_input(&self) -> Option<&str> {
        self.input.as_deref()
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Whether a caller may retry the operation unchanged.
    ///
    /// Cryptographic failures are never transient, so this is false for
    /// every error raised by this crate.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    ///
    /// The kind is carried over so callers can still branch on it.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
            input: None,
        }
    }

    /// Walks the `with_context` chain down to the innermost error carrying an
    /// offending input.
    pub fn root_input(&self) -> Option<&str> {
        if let Some(input) = self.offending_input() {
            return Some(input);
        }
        self.source
            .as_deref()
            .and_then(|s| s.downcast_ref::<PqsealError>())
            .and_then(PqsealError::root_input)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PqsealError>;
