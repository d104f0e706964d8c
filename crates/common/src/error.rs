//! Common error types.

use thiserror::Error;

/// Main error type for the context core.
///
/// Driver failures that a caller can recover from (a context that could not be
/// made current, a mapping the driver refused) are not reported through this
/// type; they come back as ordinary values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GlError {
    /// API misuse, e.g. locking a context lock twice on the same thread.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Lock not owned by {caller}, owner is {owner}")]
    NotOwner { owner: String, caller: String },

    #[error("Lock contended: {caller} cannot lock, owned by {owner}")]
    LockContention { owner: String, caller: String },

    #[error("No context current on thread {0}")]
    NotCurrent(String),

    #[error("Unknown context: {0}")]
    UnknownContext(String),

    /// A share group still has created members when it was asked to unregister.
    #[error("Share set leak: {0}")]
    ShareSetLeak(String),

    #[error("Share set inconsistent: {0}")]
    ShareSetInconsistent(String),

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Buffer size of buffer {buffer} reported as zero for target {target:#06x}; probably a missing bind")]
    ZeroBufferSize { target: u32, buffer: u32 },

    #[error("Native error {code:#06x} after {call}")]
    Native { call: &'static str, code: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type GlResult<T> = Result<T, GlError>;

impl GlError {
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub fn not_current(thread: impl Into<String>) -> Self {
        Self::NotCurrent(thread.into())
    }

    pub fn unknown_context(msg: impl Into<String>) -> Self {
        Self::UnknownContext(msg.into())
    }

    pub fn leak(msg: impl Into<String>) -> Self {
        Self::ShareSetLeak(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::ShareSetInconsistent(msg.into())
    }

    pub fn buffer(msg: impl Into<String>) -> Self {
        Self::Buffer(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error reports API misuse rather than a driver problem.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::IllegalState(_)
                | Self::NotOwner { .. }
                | Self::NotCurrent(_)
                | Self::UnknownContext(_)
                | Self::ShareSetLeak(_)
                | Self::Buffer(_)
        )
    }
}

/// Human-readable name of the calling thread, used in lock diagnostics.
pub fn thread_label() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => format!("{} ({:?})", name, thread.id()),
        None => format!("{:?}", thread.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_message_names_owner() {
        let err = GlError::LockContention {
            owner: "loader".to_string(),
            caller: "main".to_string(),
        };
        assert!(err.to_string().contains("owned by loader"));
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_native_code_formatting() {
        let err = GlError::Native { call: "glBufferData", code: 0x0505 };
        assert_eq!(err.to_string(), "Native error 0x0505 after glBufferData");
    }

    #[test]
    fn test_thread_label_uses_name() {
        let label = std::thread::Builder::new()
            .name("gl-test".to_string())
            .spawn(thread_label)
            .unwrap()
            .join()
            .unwrap();
        assert!(label.starts_with("gl-test"));
    }
}
