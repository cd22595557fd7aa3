use relmap_core_types::RequestId;
use thiserror::Error;

use crate::validation::Violation;

/// Result type alias using OrmError
pub type Result<T> = std::result::Result<T, OrmError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code usable for programmatic handling
/// and for log assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    /// Unknown type, unknown role, no mapper registered
    Configuration,
    /// Unsupported depth value or malformed parameter
    IllegalArgument,
    /// Write-path authorization denial
    Authorization,
    /// Wrapped storage failure (connect, query, insert/update/delete)
    Persistence,
    /// Aggregated attribute violations from a pre-save validation pass
    Validation,
    /// Commit loop stopped converging
    CommitRecursion,
    NotFound,
    /// Operation requires an active unit of work
    InactiveTransaction,
    Serialization,
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::IllegalArgument => "ERR_ILLEGAL_ARGUMENT",
            ExErrorKind::Authorization => "ERR_AUTHORIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Validation => "ERR_VALIDATION",
            ExErrorKind::CommitRecursion => "ERR_COMMIT_RECURSION",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::InactiveTransaction => "ERR_INACTIVE_TRANSACTION",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and the
/// statement/oid context needed when diagnosing a failed commit.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    oid: Option<String>,
    type_name: Option<String>,
    statement: Option<String>,
    request_id: Option<RequestId>,
    message: String,
    violations: Vec<Violation>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            oid: None,
            type_name: None,
            statement: None,
            request_id: None,
            message: String::new(),
            violations: Vec::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add object id context
    pub fn with_oid(mut self, oid: impl Into<String>) -> Self {
        self.oid = Some(oid.into());
        self
    }

    /// Add entity type context
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Add the offending SQL statement
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach per-attribute violations
    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn oid(&self) -> Option<&str> {
        self.oid.as_deref()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn statement(&self) -> Option<&str> {
        self.statement.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(oid) = &self.oid {
            write!(f, " (oid: {})", oid)?;
        }
        if let Some(type_name) = &self.type_name {
            write!(f, " (type: {})", type_name)?;
        }
        if let Some(statement) = &self.statement {
            write!(f, " (statement: {})", statement)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========

/// Error taxonomy for mapping, loading and committing entities
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrmError {
    // ===== Configuration Errors =====
    /// No mapper registered under this name (simple or qualified)
    #[error("Unknown type: {type_name}")]
    UnknownType { type_name: String },

    /// Role is not declared on the type
    #[error("Unknown role '{role}' on type {type_name}")]
    UnknownRole { type_name: String, role: String },

    /// A type is reachable through several roles and none was named
    #[error("Type {type_name} reaches {other_type} through several roles: {roles:?}")]
    AmbiguousRole {
        type_name: String,
        other_type: String,
        roles: Vec<String>,
    },

    /// Attribute is not declared on the type
    #[error("Unknown attribute '{attribute}' on type {type_name}")]
    UnknownAttribute {
        type_name: String,
        attribute: String,
    },

    /// Schema metadata is inconsistent (e.g. junction type lacks a role)
    #[error("Invalid mapping configuration: {reason}")]
    InvalidConfiguration { reason: String },

    // ===== Argument Errors =====
    /// Build depth value is not one of the supported constants
    #[error("Unsupported build depth: {value}")]
    IllegalDepth { value: i64 },

    #[error("Illegal argument: {reason}")]
    IllegalArgument { reason: String },

    // ===== Authorization =====
    /// Write-path denial (read-path denials never surface as errors)
    #[error("Authorization denied: {action} on {resource}")]
    AuthorizationDenied { resource: String, action: String },

    // ===== Persistence =====
    /// Wrapped storage failure
    #[error("Persistence error in {op}: {message}")]
    Persistence {
        op: String,
        statement: Option<String>,
        message: String,
    },

    /// Object id has no row in storage
    #[error("Object not found: {oid}")]
    NotFound { oid: String },

    // ===== Validation =====
    /// Every violation found during a full validation pass
    #[error("Validation failed with {} violation(s)", violations.len())]
    Validation { violations: Vec<Violation> },

    // ===== Unit of Work =====
    /// Commit loop made no progress while work remained
    #[error("Commit does not converge: {pending} object(s) still pending")]
    CommitRecursion { pending: usize },

    #[error("No active transaction for operation {op}")]
    InactiveTransaction { op: String },

    // ===== Generic Errors =====
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl OrmError {
    /// Shorthand for a persistence failure with the offending statement
    pub fn persistence(
        op: impl Into<String>,
        statement: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        OrmError::Persistence {
            op: op.into(),
            statement: statement.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn illegal_argument(reason: impl Into<String>) -> Self {
        OrmError::IllegalArgument {
            reason: reason.into(),
        }
    }

    /// Canonical kind of this error
    pub fn kind(&self) -> ExErrorKind {
        match self {
            OrmError::UnknownType { .. }
            | OrmError::UnknownRole { .. }
            | OrmError::AmbiguousRole { .. }
            | OrmError::UnknownAttribute { .. }
            | OrmError::InvalidConfiguration { .. } => ExErrorKind::Configuration,
            OrmError::IllegalDepth { .. } | OrmError::IllegalArgument { .. } => {
                ExErrorKind::IllegalArgument
            }
            OrmError::AuthorizationDenied { .. } => ExErrorKind::Authorization,
            OrmError::Persistence { .. } => ExErrorKind::Persistence,
            OrmError::NotFound { .. } => ExErrorKind::NotFound,
            OrmError::Validation { .. } => ExErrorKind::Validation,
            OrmError::CommitRecursion { .. } => ExErrorKind::CommitRecursion,
            OrmError::InactiveTransaction { .. } => ExErrorKind::InactiveTransaction,
            OrmError::Serialization { .. } => ExErrorKind::Serialization,
            OrmError::Internal { .. } => ExErrorKind::Internal,
        }
    }
}

/// Conversion from OrmError to the canonical ExError
impl From<OrmError> for ExError {
    fn from(err: OrmError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err {
            OrmError::UnknownType { type_name } => ExError::new(kind)
                .with_type_name(type_name)
                .with_message(message),

            OrmError::UnknownRole { type_name, .. }
            | OrmError::UnknownAttribute { type_name, .. }
            | OrmError::AmbiguousRole { type_name, .. } => ExError::new(kind)
                .with_type_name(type_name)
                .with_message(message),

            OrmError::AuthorizationDenied { resource, action } => ExError::new(kind)
                .with_oid(resource)
                .with_op(action)
                .with_message(message),

            OrmError::Persistence { op, statement, .. } => {
                let ex = ExError::new(kind).with_op(op).with_message(message);
                match statement {
                    Some(sql) => ex.with_statement(sql),
                    None => ex,
                }
            }

            OrmError::NotFound { oid } => ExError::new(kind).with_oid(oid).with_message(message),

            OrmError::Validation { violations } => ExError::new(kind)
                .with_op("validate")
                .with_message(message)
                .with_violations(violations),

            OrmError::CommitRecursion { .. } => {
                ExError::new(kind).with_op("commit").with_message(message)
            }

            OrmError::InactiveTransaction { op } => {
                ExError::new(kind).with_op(op).with_message(message)
            }

            OrmError::InvalidConfiguration { .. }
            | OrmError::IllegalDepth { .. }
            | OrmError::IllegalArgument { .. }
            | OrmError::Serialization { .. }
            | OrmError::Internal { .. } => ExError::new(kind).with_message(message),
        }
    }
}

/// Conversion from serde_json::Error to OrmError
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_codes() {
        let cases = [
            (ExErrorKind::Configuration, "ERR_CONFIGURATION"),
            (ExErrorKind::IllegalArgument, "ERR_ILLEGAL_ARGUMENT"),
            (ExErrorKind::Authorization, "ERR_AUTHORIZATION"),
            (ExErrorKind::Persistence, "ERR_PERSISTENCE"),
            (ExErrorKind::Validation, "ERR_VALIDATION"),
            (ExErrorKind::CommitRecursion, "ERR_COMMIT_RECURSION"),
        ];
        for (kind, expected_code) in cases {
            assert_eq!(kind.code(), expected_code, "Wrong code for {:?}", kind);
        }
    }

    #[test]
    fn test_persistence_conversion_keeps_statement() {
        let err = OrmError::persistence("insert", Some("INSERT INTO book"), "disk full");
        let ex: ExError = err.into();
        assert_eq!(ex.kind(), ExErrorKind::Persistence);
        assert_eq!(ex.statement(), Some("INSERT INTO book"));
        assert_eq!(ex.op(), Some("insert"));
    }

    #[test]
    fn test_validation_conversion_keeps_violations() {
        let err = OrmError::Validation {
            violations: vec![
                Violation::new("email", "does not match pattern"),
                Violation::new("name", "is required"),
            ],
        };
        assert_eq!(err.to_string(), "Validation failed with 2 violation(s)");
        let ex: ExError = err.into();
        assert_eq!(ex.violations().len(), 2);
    }

    #[test]
    fn test_display_includes_context() {
        let ex = ExError::new(ExErrorKind::NotFound)
            .with_oid("Person:42")
            .with_message("gone");
        let text = ex.to_string();
        assert!(text.starts_with("[ERR_NOT_FOUND]"));
        assert!(text.contains("Person:42"));
    }

    #[test]
    fn test_unknown_type_is_configuration_error() {
        let err = OrmError::UnknownType {
            type_name: "Ghost".into(),
        };
        assert_eq!(err.kind(), ExErrorKind::Configuration);
    }
}
