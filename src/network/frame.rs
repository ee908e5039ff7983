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
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{Message, CODE_SIZE, FRAME_LENGTH_SIZE};
use crate::{AppError, AppResult};

/// Length-prefixed framing of [`Message`]s.
///
/// A frame is a big-endian u32 length followed by that many bytes of
/// code + payload. The length makes message boundaries independent of how the
/// transport splits or coalesces reads.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    /// `max_message_size` is capped at what the u32 length field can carry.
    pub fn new(max_message_size: usize) -> Self {
        MessageCodec {
            max_message_size: max_message_size.min(u32::MAX as usize),
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Returns the body length once a whole frame is buffered, `None` while
    /// more bytes are needed.
    fn check(&self, buffer: &mut BytesMut) -> AppResult<Option<usize>> {
        if buffer.remaining() < FRAME_LENGTH_SIZE {
            return Ok(None);
        }
        let mut length_bytes = [0u8; FRAME_LENGTH_SIZE];
        length_bytes.copy_from_slice(&buffer[..FRAME_LENGTH_SIZE]);
        let body_size = u32::from_be_bytes(length_bytes) as usize;
        if body_size < CODE_SIZE {
            return Err(AppError::Protocol(format!(
                "frame size {} less than message code size",
                body_size
            )));
        }
        if body_size > self.max_message_size {
            return Err(AppError::Protocol(format!(
                "frame of length {} is too large",
                body_size
            )));
        }
        if buffer.remaining() < body_size + FRAME_LENGTH_SIZE {
            buffer.reserve(body_size + FRAME_LENGTH_SIZE - buffer.remaining());
            return Ok(None);
        }
        Ok(Some(body_size))
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> AppResult<Option<Message>> {
        match self.check(src)? {
            Some(body_size) => {
                src.advance(FRAME_LENGTH_SIZE);
                let body = src.split_to(body_size);
                Message::decode(body).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = AppError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> AppResult<()> {
        <Self as Encoder<&Message>>::encode(self, &message, dst)
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = AppError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> AppResult<()> {
        let body_size = message.wire_size();
        if body_size > self.max_message_size {
            return Err(AppError::Protocol(format!(
                "message of length {} exceeds the limit of {}",
                body_size, self.max_message_size
            )));
        }
        dst.reserve(FRAME_LENGTH_SIZE + body_size);
        let length = u32::try_from(body_size).map_err(|_| {
            AppError::Protocol(format!("message of length {} has no frame length", body_size))
        })?;
        dst.put_u32(length);
        message.encode(dst);
        Ok(())
    }
}
