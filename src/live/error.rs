use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveErrorKind {
    InvalidRule,
    UnknownUnit,
    UnknownCell,
    UnknownFunction,
    UnknownAllocator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveError {
    pub kind: LiveErrorKind,
    pub message: String,
}

impl LiveError {
    pub fn new(kind: LiveErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for LiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LiveError {}

pub fn invalid_rule(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorKind::InvalidRule, message)
}

pub fn unknown_unit(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorKind::UnknownUnit, message)
}

pub fn unknown_cell(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorKind::UnknownCell, message)
}

pub fn unknown_function(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorKind::UnknownFunction, message)
}

pub fn unknown_allocator(message: impl Into<String>) -> LiveError {
    LiveError::new(LiveErrorKind::UnknownAllocator, message)
}
