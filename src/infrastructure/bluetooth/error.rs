use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("platform Bluetooth error: {0}")]
    Platform(String),

    #[error("connection to {0} failed")]
    ConnectionFailed(String),

    #[error("GATT operation failed: {0}")]
    Gatt(String),

    #[error("characteristic write failed: {0}")]
    WriteFailed(String),

    #[error("no command channel: the command characteristic has not been discovered")]
    NoCommandChannel,

    #[error("no device selected")]
    NoDeviceSelected,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device enumeration is unavailable: {0}")]
    EnumerationUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            BleError::NoCommandChannel.to_string(),
            "no command channel: the command characteristic has not been discovered"
        );
        assert_eq!(
            BleError::WriteFailed("unreachable".to_string()).to_string(),
            "characteristic write failed: unreachable"
        );
    }
}
