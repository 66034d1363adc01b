//! Device command framing
//!
//! How a command is laid out on the wire is decided by the device
//! manufacturer. The framing here only guarantees that byte 0 carries the
//! opcode and that the buffer is exactly the declared length.

use thiserror::Error;

/// Largest buffer a single characteristic write may carry.
pub const MAX_COMMAND_LENGTH: u8 = 20;

/// Opcodes understood by the sample device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    MoveLeft = 0x01,
    MoveRight = 0x02,
    GetBattery = 0x0A,
}

impl CommandId {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Buffer length used when the caller does not specify one.
    pub fn default_length(self) -> u8 {
        match self {
            Self::MoveLeft | Self::MoveRight | Self::GetBattery => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::MoveLeft => "Move Left",
            Self::MoveRight => "Move Right",
            Self::GetBattery => "Get Battery",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command length {0} is outside 1..={MAX_COMMAND_LENGTH}")]
    InvalidLength(u8),

    #[error("payload of {payload} bytes does not fit a {length}-byte command")]
    PayloadTooLong { payload: usize, length: u8 },
}

/// A single request to the device: opcode plus optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    id: CommandId,
    length: u8,
    payload: Vec<u8>,
}

impl Command {
    pub fn new(id: CommandId, length: u8) -> Result<Self, CommandError> {
        if length == 0 || length > MAX_COMMAND_LENGTH {
            return Err(CommandError::InvalidLength(length));
        }
        Ok(Self {
            id,
            length,
            payload: Vec::new(),
        })
    }

    pub fn for_id(id: CommandId) -> Self {
        Self {
            id,
            length: id.default_length(),
            payload: Vec::new(),
        }
    }

    /// Attach the bytes that follow the opcode.
    pub fn with_payload(mut self, payload: &[u8]) -> Result<Self, CommandError> {
        if payload.len() >= self.length as usize {
            return Err(CommandError::PayloadTooLong {
                payload: payload.len(),
                length: self.length,
            });
        }
        self.payload = payload.to_vec();
        Ok(self)
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    /// Fill `buffer` with the serialized command.
    ///
    /// # Panics
    ///
    /// Panics if `buffer.len()` differs from the declared length. Callers
    /// size the buffer from [`Command::length`], so a mismatch is a bug.
    pub fn populate(&self, buffer: &mut [u8]) {
        assert_eq!(
            buffer.len(),
            self.length as usize,
            "command buffer must be exactly {} bytes",
            self.length
        );
        buffer.fill(0);
        buffer[0] = self.id.code();
        buffer[1..=self.payload.len()].copy_from_slice(&self.payload);
    }

    /// Serialize into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; self.length as usize];
        self.populate(&mut buffer);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_lands_in_first_byte() {
        for id in [CommandId::MoveLeft, CommandId::MoveRight, CommandId::GetBattery] {
            let command = Command::new(id, 4).unwrap();
            let mut buffer = [0xFFu8; 4];
            command.populate(&mut buffer);
            assert_eq!(buffer[0], id.code());
            assert_eq!(&buffer[1..], &[0, 0, 0]);
        }
    }

    #[test]
    #[should_panic(expected = "command buffer must be exactly 3 bytes")]
    fn test_populate_rejects_wrong_buffer_size() {
        let command = Command::new(CommandId::MoveLeft, 3).unwrap();
        let mut buffer = [0u8; 2];
        command.populate(&mut buffer);
    }

    #[test]
    fn test_length_bounds() {
        assert_eq!(
            Command::new(CommandId::GetBattery, 0),
            Err(CommandError::InvalidLength(0))
        );
        assert_eq!(
            Command::new(CommandId::GetBattery, 21),
            Err(CommandError::InvalidLength(21))
        );
        assert!(Command::new(CommandId::GetBattery, 20).is_ok());
    }

    #[test]
    fn test_payload_follows_opcode() {
        let command = Command::new(CommandId::MoveRight, 5)
            .unwrap()
            .with_payload(&[0x10, 0x20])
            .unwrap();
        assert_eq!(command.to_bytes(), vec![0x02, 0x10, 0x20, 0x00, 0x00]);

        let err = Command::for_id(CommandId::MoveRight)
            .with_payload(&[0x01])
            .unwrap_err();
        assert_eq!(err, CommandError::PayloadTooLong { payload: 1, length: 1 });
    }

    #[test]
    fn test_default_length() {
        assert_eq!(Command::for_id(CommandId::GetBattery).to_bytes(), vec![0x0A]);
    }
}
