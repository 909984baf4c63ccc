/// Cause of a submission's failure, delivered via `SubmissionFailed`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionFailure {
    #[error("process exited while submission was executing")]
    ProcessDied,

    #[error("failed to write instruction to process stdin: {0}")]
    WriteFailed(String),

    #[error("command reported error termination")]
    CommandErrorTermination,

    #[error("command exceeded its deadline without completing")]
    CommandTimedOut,

    #[error("a user callback panicked: {0}")]
    CallbackPanicked(String),
}

/// Error taxonomy for the process pool executor, per the error handling design.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    ConfigurationError(String),

    #[error("submission rejected: pool is shutting down")]
    RejectedExecution,

    #[error("process failed to start: {0}")]
    StartupFailed(String),

    #[error("submission failed: {0}")]
    SubmissionFailed(#[from] SubmissionFailure),

    #[error("submission was cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("blocking wait was interrupted")]
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_displays_message() {
        let err = PoolError::ConfigurationError("min > max".into());
        assert_eq!(err.to_string(), "invalid pool configuration: min > max");
    }

    #[test]
    fn submission_failed_wraps_cause() {
        let err: PoolError = SubmissionFailure::ProcessDied.into();
        assert_eq!(
            err.to_string(),
            "submission failed: process exited while submission was executing"
        );
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PoolError>();
    }
}
