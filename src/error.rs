//! Error types shared by the queue, the phases and the pipeline.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::pipeline::Phase;
use crate::types::ObjectId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChangeError>;

/// Failures surfaced by the recording queue and the commit pipeline.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// A touched object violated a business rule.
    #[error("validation failed for {object}: {tokens}")]
    Validation {
        /// Object that failed validation.
        object: ObjectId,
        /// Collected error tokens, at least one.
        tokens: ErrorTokens,
    },
    /// An inner or outer hook signalled an error.
    #[error("{phase} hook failed for {object}: {message}")]
    Hook {
        /// Object whose hook failed.
        object: ObjectId,
        /// Phase the hook ran in.
        phase: Phase,
        /// Failure description.
        message: String,
    },
    /// A registered post-process action failed.
    #[error("post-process action `{key}` failed: {message}")]
    PostProcess {
        /// Registration key of the action.
        key: String,
        /// Failure description.
        message: String,
    },
    /// Appending to a change log failed.
    #[error("change log append to {path} failed: {source}")]
    AuditIo {
        /// Target log file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The storage engine refused to commit or roll back.
    #[error("storage error: {0}")]
    Storage(String),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Caller passed an argument the queue cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ChangeError {
    /// Convenience constructor for hook failures.
    pub fn hook(object: ObjectId, phase: Phase, message: impl Into<String>) -> Self {
        ChangeError::Hook {
            object,
            phase,
            message: message.into(),
        }
    }

    /// Returns true for failures that leave the transaction non-committable.
    pub fn aborts_commit(&self) -> bool {
        match self {
            ChangeError::Validation { .. }
            | ChangeError::PostProcess { .. }
            | ChangeError::Storage(_)
            | ChangeError::InvalidArgument(_) => true,
            ChangeError::Hook { phase, .. } => *phase != Phase::OuterCallbacks,
            ChangeError::AuditIo { .. } | ChangeError::Config(_) => false,
        }
    }
}

/// One business-rule violation reported to an [`ErrorBuffer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorToken {
    /// Type or object the token refers to.
    pub object: String,
    /// Offending property, if the violation is field-specific.
    pub property: Option<String>,
    /// Machine-readable token, e.g. `must_not_be_empty`.
    pub token: String,
}

impl ErrorToken {
    /// Creates a token for `object`, optionally bound to a property.
    pub fn new(
        object: impl Into<String>,
        property: Option<&str>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            property: property.map(str::to_owned),
            token: token.into(),
        }
    }
}

impl fmt::Display for ErrorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}: {}", self.object, property, self.token),
            None => write!(f, "{}: {}", self.object, self.token),
        }
    }
}

/// Tokens captured from a failed validation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorTokens(pub Vec<ErrorToken>);

impl ErrorTokens {
    /// First token's property, i.e. the field the failure is attributed to.
    pub fn field(&self) -> Option<&str> {
        self.0.first().and_then(|t| t.property.as_deref())
    }
}

impl fmt::Display for ErrorTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("rejected");
        }
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// Error sink handed to hooks, validators and post-process actions.
#[derive(Debug, Default)]
pub struct ErrorBuffer {
    tokens: Vec<ErrorToken>,
}

impl ErrorBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation.
    pub fn add(&mut self, token: ErrorToken) {
        self.tokens.push(token);
    }

    /// Returns true if any violation has been recorded.
    pub fn has_error(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Number of recorded violations.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// All recorded violations, oldest first.
    pub fn tokens(&self) -> &[ErrorToken] {
        &self.tokens
    }

    /// Copies the tokens recorded since `mark` (a previous [`len`](Self::len)).
    pub(crate) fn since(&self, mark: usize) -> ErrorTokens {
        ErrorTokens(self.tokens.get(mark..).unwrap_or_default().to_vec())
    }
}
