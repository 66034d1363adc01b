//! Sample Device Protocol
//!
//! Wire-level helpers: how commands reach the command characteristic and how
//! services and characteristics are recognised.

use crate::domain::command::Command;
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::provider::CharacteristicWriter;
use tracing::{debug, trace};

impl Command {
    /// Serialize into a fresh buffer and write it. Write errors are returned
    /// as-is and never retried here.
    pub async fn send<W>(&self, channel: &W) -> Result<(), BleError>
    where
        W: CharacteristicWriter + ?Sized,
    {
        let bytes = self.to_bytes();
        debug!("Sending command {:?} ({} bytes)", self.id(), bytes.len());
        trace!("Command bytes: {:02X?}", bytes);
        channel.write_value(&bytes).await
    }
}

/// Service match: case-sensitive containment of the configured UUID in the
/// service name.
pub fn service_matches(service_name: &str, service_uuid: &str) -> bool {
    !service_uuid.is_empty() && service_name.contains(service_uuid)
}

/// Characteristic match: case-insensitive containment.
pub fn characteristic_matches(characteristic_uuid: &str, wanted: &str) -> bool {
    !wanted.is_empty()
        && characteristic_uuid
            .to_uppercase()
            .contains(&wanted.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::CommandId;
    use async_trait::async_trait;
    use std::cell::RefCell;

    #[derive(Default)]
    struct CapturingWriter {
        writes: RefCell<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait(?Send)]
    impl CharacteristicWriter for CapturingWriter {
        async fn write_value(&self, bytes: &[u8]) -> Result<(), BleError> {
            if self.fail {
                return Err(BleError::WriteFailed("unreachable".to_string()));
            }
            self.writes.borrow_mut().push(bytes.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_writes_serialized_buffer() {
        let writer = CapturingWriter::default();
        let command = Command::new(CommandId::GetBattery, 3).unwrap();
        command.send(&writer).await.unwrap();
        assert_eq!(*writer.writes.borrow(), vec![vec![0x0A, 0x00, 0x00]]);
    }

    #[tokio::test]
    async fn test_send_propagates_write_error() {
        let writer = CapturingWriter {
            fail: true,
            ..Default::default()
        };
        let err = Command::for_id(CommandId::MoveLeft)
            .send(&writer)
            .await
            .unwrap_err();
        assert!(matches!(err, BleError::WriteFailed(_)));
    }

    #[test]
    fn test_service_match_is_case_sensitive_containment() {
        let uuid = "358407F4-BF93-408A-B128-57515EBAF150";
        assert!(service_matches("{358407F4-BF93-408A-B128-57515EBAF150}", uuid));
        assert!(!service_matches("{358407f4-bf93-408a-b128-57515ebaf150}", uuid));
        assert!(!service_matches("anything", ""));
    }

    #[test]
    fn test_characteristic_match_ignores_case() {
        let uuid = "7042D954-39BF-4E4F-A24B-0F43C0FA6B94";
        assert!(characteristic_matches("7042d954-39bf-4e4f-a24b-0f43c0fa6b94", uuid));
        assert!(characteristic_matches("{7042D954-39BF-4E4F-A24B-0F43C0FA6B94}", uuid));
        assert!(!characteristic_matches("7CFF1AFE-A558-4B8F-81AC-ACF28A21FA89", uuid));
    }
}
