use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyErrorKind {
    InvalidPolicyId,
    InvalidDocument,
    InvalidTopology,
    DuplicateKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyError {
    pub kind: PolicyErrorKind,
    pub message: String,
}

impl PolicyError {
    pub fn new(kind: PolicyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PolicyError {}

pub fn invalid_policy_id(message: impl Into<String>) -> PolicyError {
    PolicyError::new(PolicyErrorKind::InvalidPolicyId, message)
}

pub fn invalid_document(message: impl Into<String>) -> PolicyError {
    PolicyError::new(PolicyErrorKind::InvalidDocument, message)
}

pub fn invalid_topology(message: impl Into<String>) -> PolicyError {
    PolicyError::new(PolicyErrorKind::InvalidTopology, message)
}

pub fn duplicate_key(message: impl Into<String>) -> PolicyError {
    PolicyError::new(PolicyErrorKind::DuplicateKey, message)
}
