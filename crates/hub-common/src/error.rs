use thiserror::Error;

/// Bridge error types covering GPIO acquisition, I2C transfers, framing, and threading faults.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HubError {
    /// GPIO chip, line, or signal acquisition failed.
    #[error("resource error: {0}")]
    Resource(String),

    /// I2C device open or ioctl failed.
    #[error("device error: {0}")]
    Device(String),

    /// Partial or failed I2C read/write.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Malformed or zero-length SHTP header.
    #[error("protocol framing: {0}")]
    ProtocolFraming(String),

    /// Operation attempted from a thread that must not perform it.
    #[error("threading fault: {0}")]
    ThreadingFault(String),

    /// Configuration or argument error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl HubError {
    /// Whether a later retry of the same operation may succeed.
    ///
    /// Transfer and framing errors self-heal on the next poll; resource and
    /// device errors are retryable by the caller after a fresh setup.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transfer(_) | Self::ProtocolFraming(_))
    }
}

/// Convenience type alias for bridge operations.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = HubError::Resource("gpiochip9: no such device".into());
        assert_eq!(err.to_string(), "resource error: gpiochip9: no such device");

        let err = HubError::InvalidStateTransition {
            from: "IDLE".into(),
            to: "RUNNING".into(),
        };
        assert_eq!(err.to_string(), "invalid state transition from IDLE to RUNNING");
    }

    #[test]
    fn test_transient_classification() {
        assert!(HubError::Transfer("short read".into()).is_transient());
        assert!(HubError::ProtocolFraming("zero length".into()).is_transient());
        assert!(!HubError::Resource("busy".into()).is_transient());
        assert!(!HubError::ThreadingFault("stop from watcher".into()).is_transient());
    }
}
