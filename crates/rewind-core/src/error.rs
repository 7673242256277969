//! Error types for rewind operations.
//!
//! Every error carries a structured [`ErrorCode`] so callers can branch on
//! the failure class without matching on message text.

use thiserror::Error;

/// Result type alias for rewind operations.
pub type RewindResult<T> = Result<T, RewindError>;

/// Main error type for all rewind operations.
#[derive(Error, Debug)]
pub enum RewindError {
    /// A write would leave two open versions sharing a unique value.
    #[error("Uniqueness conflict on {entity}: {message}")]
    UniquenessConflict {
        entity: String,
        message: String,
        code: ErrorCode,
        /// The declared unique field set of the entity.
        fields: Vec<String>,
        /// The colliding field, when known.
        field: Option<String>,
        /// The colliding value, when known.
        value: Option<serde_json::Value>,
    },

    /// No current (or point-in-time valid) version exists.
    #[error("{entity} with id '{id}' not found")]
    NotFound {
        entity: String,
        id: String,
        code: ErrorCode,
    },

    /// Failure surfaced by the base store, propagated as is.
    #[error("Store error: {message}")]
    Store {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Caller input cannot be served.
    #[error("Validation error: {message}")]
    Validation { message: String, code: ErrorCode },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Uniqueness (UNQ_xxx)
    UnqBatchDuplicate,
    UnqStoreDuplicate,
    UnqAmbiguousUpdate,

    // Lookup (NF_xxx)
    NotFound,

    // Store (STORE_xxx)
    StoreConnectionFailed,
    StoreOperationFailed,
    StoreConstraintViolation,
    StoreDuplicateKey,

    // Validation (VAL_xxx)
    ValInvalidInput,

    // Configuration (CFG_xxx)
    CfgInvalid,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnqBatchDuplicate => "UNQ_001",
            ErrorCode::UnqStoreDuplicate => "UNQ_002",
            ErrorCode::UnqAmbiguousUpdate => "UNQ_003",
            ErrorCode::NotFound => "NF_001",
            ErrorCode::StoreConnectionFailed => "STORE_001",
            ErrorCode::StoreOperationFailed => "STORE_002",
            ErrorCode::StoreConstraintViolation => "STORE_003",
            ErrorCode::StoreDuplicateKey => "STORE_004",
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::CfgInvalid => "CFG_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl RewindError {
    /// Create a uniqueness conflict naming the entity and its unique fields.
    pub fn uniqueness(
        code: ErrorCode,
        entity: impl Into<String>,
        fields: &[String],
        message: impl Into<String>,
    ) -> Self {
        Self::UniquenessConflict {
            entity: entity.into(),
            message: message.into(),
            code,
            fields: fields.to_vec(),
            field: None,
            value: None,
        }
    }

    /// Attach the colliding field and value to a uniqueness conflict.
    pub fn with_collision(mut self, field_name: impl Into<String>, colliding: serde_json::Value) -> Self {
        if let Self::UniquenessConflict { field, value, .. } = &mut self {
            *field = Some(field_name.into());
            *value = Some(colliding);
        }
        self
    }

    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
            code: ErrorCode::NotFound,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            code: ErrorCode::StoreOperationFailed,
            source: None,
        }
    }

    /// Create a store error with an explicit code and source.
    pub fn store_with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            code,
            source: Some(Box::new(source)),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UniquenessConflict { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::Store { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::Configuration(_) => ErrorCode::CfgInvalid,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this is a uniqueness conflict.
    pub fn is_uniqueness_conflict(&self) -> bool {
        matches!(self, Self::UniquenessConflict { .. })
    }

    /// Whether this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::UniquenessConflict { code: ErrorCode::UnqAmbiguousUpdate, .. } => {
                Some("Narrow the update filter so it matches a single entity")
            }
            Self::UniquenessConflict { .. } => {
                Some("Close the entity currently holding the value or choose another value")
            }
            Self::NotFound { .. } => Some("Check the id, or query with a history or point-in-time option"),
            Self::Store { .. } => Some("Please check your base store connection settings"),
            _ => None,
        }
    }
}
