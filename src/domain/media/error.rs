//! Media acquisition errors
//!
//! Each variant is a distinct user-facing category; the `Display` text is the
//! message shown to the user.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Access to the camera or microphone was denied")]
    PermissionDenied,

    #[error("No camera or microphone was found")]
    DeviceNotFound,

    #[error("The camera or microphone is already in use by another application")]
    DeviceBusy,

    #[error("The camera does not support the requested settings")]
    ConstraintsUnsupported,

    #[error("Media access is blocked by the security policy")]
    SecurityBlocked,

    #[error("Media access was aborted")]
    Aborted,

    #[error("This platform does not support media capture")]
    Unsupported,

    #[error("Could not access media devices: {0}")]
    Unknown(String),
}

impl MediaError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MediaError::PermissionDenied => "permission_denied",
            MediaError::DeviceNotFound => "device_not_found",
            MediaError::DeviceBusy => "device_busy",
            MediaError::ConstraintsUnsupported => "constraints_unsupported",
            MediaError::SecurityBlocked => "security_blocked",
            MediaError::Aborted => "aborted",
            MediaError::Unsupported => "unsupported",
            MediaError::Unknown(_) => "unknown",
        }
    }

    /// Whether a retry with relaxed constraints may succeed
    pub fn is_constraint_failure(&self) -> bool {
        matches!(self, MediaError::ConstraintsUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_have_distinct_messages() {
        let all = [
            MediaError::PermissionDenied,
            MediaError::DeviceNotFound,
            MediaError::DeviceBusy,
            MediaError::ConstraintsUnsupported,
            MediaError::SecurityBlocked,
            MediaError::Aborted,
            MediaError::Unsupported,
            MediaError::Unknown("driver crashed".to_string()),
        ];

        let mut messages: Vec<String> = all.iter().map(|e| e.to_string()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), all.len());

        let mut kinds: Vec<&str> = all.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }

    #[test]
    fn test_only_constraints_are_retryable() {
        assert!(MediaError::ConstraintsUnsupported.is_constraint_failure());
        assert!(!MediaError::DeviceBusy.is_constraint_failure());
        assert!(!MediaError::PermissionDenied.is_constraint_failure());
    }
}
