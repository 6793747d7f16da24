use serde::{Deserialize, Serialize};

pub const CODE_NONE: i32 = 0;
pub const CODE_CIRCUIT_BREAK: i32 = 1001;
pub const CODE_RATE_LIMIT: i32 = 1002;
pub const CODE_CONCURRENCY_LIMIT: i32 = 1003;
pub const CODE_LOAD_LIMIT: i32 = 1004;
pub const CODE_DRAINING: i32 = 1005;

/// Admission outcome handed back to the capture layer.
///
/// A denial is a value, not an error; mapping codes to protocol statuses is
/// left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub success: bool,
    pub error_code: i32,
    pub message: Option<String>,
}

impl Permission {
    pub fn success() -> Self {
        Self {
            success: true,
            error_code: CODE_NONE,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::failure_with_code(CODE_NONE, message)
    }

    pub fn failure_with_code(error_code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self::success()
    }
}
