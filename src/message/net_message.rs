// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::{is_server_code, message_type, CODE_SIZE};
use super::PayloadReader;
use crate::{AppError, AppResult};

/// The unit of exchange between peers: a 64-bit code and an opaque payload.
///
/// The logical wire form is the code (8 bytes, little-endian) followed by the
/// payload. The frame codec adds the length prefix around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    code: u64,
    payload: BytesMut,
}

impl Message {
    /// An outgoing message with an empty payload, to be filled through
    /// [`payload_mut`](Message::payload_mut).
    pub fn new(code: u64) -> Self {
        Message {
            code,
            payload: BytesMut::new(),
        }
    }

    pub fn with_payload(code: u64, payload: impl Into<BytesMut>) -> Self {
        Message {
            code,
            payload: payload.into(),
        }
    }

    /// Decodes code + payload. Anything shorter than the code is rejected.
    pub fn decode(mut buffer: BytesMut) -> AppResult<Message> {
        if buffer.remaining() < CODE_SIZE {
            return Err(AppError::Protocol(format!(
                "message of {} bytes is too small to hold a code",
                buffer.remaining()
            )));
        }
        let code = buffer.get_u64_le();
        Ok(Message {
            code,
            payload: buffer,
        })
    }

    pub fn from_bytes(buffer: &[u8]) -> AppResult<Message> {
        Self::decode(BytesMut::from(buffer))
    }

    pub fn encode(&self, writer: &mut BytesMut) {
        writer.reserve(self.wire_size());
        writer.put_u64_le(self.code);
        writer.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(self.wire_size());
        self.encode(&mut buffer);
        buffer
    }

    /// Size of code + payload.
    pub fn wire_size(&self) -> usize {
        CODE_SIZE + self.payload.len()
    }

    pub fn code(&self) -> u64 {
        self.code
    }

    pub fn message_type(&self) -> u16 {
        message_type(self.code)
    }

    pub fn is_server_message(&self) -> bool {
        is_server_code(self.code)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.payload
    }

    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader::new(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, RngCore};
    use rstest::rstest;

    use super::*;
    use crate::message::{PayloadWriter, DEMAND_CONNECTION_SERVER};

    #[test]
    fn test_random_round_trip() -> AppResult<()> {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let code: u64 = rng.gen();
            let mut payload = vec![0u8; rng.gen_range(0..2048)];
            rng.fill_bytes(&mut payload);

            let message = Message::with_payload(code, &payload[..]);
            let decoded = Message::decode(message.to_bytes())?;
            assert_eq!(decoded.code(), code);
            assert_eq!(decoded.payload(), &payload[..]);
        }
        Ok(())
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(4)]
    #[case(7)]
    fn test_too_small(#[case] len: usize) {
        let buffer = vec![0xAAu8; len];
        assert!(matches!(
            Message::from_bytes(&buffer),
            Err(AppError::Protocol(_))
        ));
    }

    #[test]
    fn test_code_only() -> AppResult<()> {
        let message = Message::from_bytes(&123u64.to_le_bytes())?;
        assert_eq!(message.code(), 123);
        assert!(message.payload().is_empty());
        Ok(())
    }

    #[test]
    fn test_wire_layout() {
        let mut message = Message::new(DEMAND_CONNECTION_SERVER);
        message.payload_mut().put_i32_le(7);
        let bytes = message.to_bytes();
        assert_eq!(bytes.len(), message.wire_size());
        assert_eq!(&bytes[..8], &DEMAND_CONNECTION_SERVER.to_le_bytes());
        assert_eq!(&bytes[8..], &7i32.to_le_bytes());
        assert!(message.is_server_message());
        assert_eq!(message.message_type(), 1);
    }

    #[test]
    fn test_payload_fields() -> AppResult<()> {
        let mut message = Message::new(123);
        message.payload_mut().put_i32_le(1);
        message.payload_mut().put_f32_le(2.0);
        message.payload_mut().put_string("hello");

        let received = Message::decode(message.to_bytes())?;
        let mut reader = received.reader();
        assert_eq!(reader.get_i32()?, 1);
        assert_eq!(reader.get_f32()?, 2.0);
        assert_eq!(reader.get_string()?, "hello");
        Ok(())
    }
}
