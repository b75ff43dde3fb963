//! Error types for blkapply-core.

use thiserror::Error;

/// Main error type for apply-engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed transfer-list header or structure.
    #[error("transfer list error: {message}")]
    TransferList { message: String },

    /// Unrecognized verb or malformed command operands.
    #[error("command error: {message}")]
    Command { message: String },

    /// A block range is malformed (negative or inverted bounds).
    ///
    /// Raised when an I/O operation walks the ranges, not at parse time;
    /// the parser deliberately accepts such values.
    #[error("invalid block range: {message}")]
    InvalidRange { message: String },

    /// SHA-256 digest did not match the expected value.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    Verify { expected: String, actual: String },

    /// Binary patch is malformed or failed to apply.
    #[error("patch error: {message}")]
    Patch { message: String },

    /// Stash store operation failed.
    #[error("stash error: {message}")]
    Stash { message: String },

    /// The NEW-data stream is missing or exhausted.
    #[error("new-data stream error: {message}")]
    NewData { message: String },

    /// A command reported an unrecoverable failure; the apply is aborted.
    #[error("command failed: {line}")]
    CommandFailed { line: String },

    /// A command hit a transient fault; the whole apply should be retried.
    #[error("command needs retry: {line}")]
    NeedRetry { line: String },
}

impl Error {
    /// Returns true if this error is transient and a fresh apply attempt
    /// (driven by the persisted retry marker) may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::NeedRetry { .. })
    }

    /// Returns true if this error is fatal: the transfer list or package
    /// contents are broken and retrying the same apply cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::TransferList { .. }
                | Error::Command { .. }
                | Error::Verify { .. }
                | Error::Patch { .. }
                | Error::CommandFailed { .. }
        )
    }
}

/// Convenience result type for apply-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transfer_list() {
        let err = Error::TransferList {
            message: "header too short".into(),
        };
        assert_eq!(err.to_string(), "transfer list error: header too short");
    }

    #[test]
    fn error_display_verify() {
        let err = Error::Verify {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.to_string(), "hash mismatch: expected aa, got bb");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn transient_errors() {
        assert!(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "interrupted"
        ))
        .is_transient());
        assert!(Error::NeedRetry { line: "zero".into() }.is_transient());

        assert!(!Error::Verify {
            expected: "aa".into(),
            actual: "bb".into()
        }
        .is_transient());
    }

    #[test]
    fn fatal_errors() {
        assert!(Error::Command {
            message: "bad verb".into()
        }
        .is_fatal());
        assert!(Error::Patch {
            message: "bad magic".into()
        }
        .is_fatal());
        assert!(Error::CommandFailed {
            line: "move ...".into()
        }
        .is_fatal());

        assert!(!Error::NeedRetry { line: "zero".into() }.is_fatal());
        assert!(!Error::Io(std::io::Error::other("eio")).is_fatal());
    }
}
