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

//! Message Format Constants
//!
//! # Frame Format
//!
//! Every message travels in one frame:
//! - 4-byte frame length, big-endian, counting code + payload
//! - 8-byte message code, little-endian
//! - Variable-length payload
//!
//! # Message Codes
//!
//! The low 16 bits of a code carry the message type id. Higher bits tag the
//! category, `SERVER_MASK` marking server/connection messages.

// Frame field lengths
pub const FRAME_LENGTH_SIZE: usize = 4;
pub const CODE_SIZE: usize = 8;
pub const FRAME_OVERHEAD: usize = FRAME_LENGTH_SIZE + CODE_SIZE;

// Message code layout
pub const CODE_MESSAGE_MASK: u64 = 0x0000_FFFF;
pub const SERVER_MASK: u64 = 0x0001_0000;

// Server connection messages
pub const DEMAND_CONNECTION_SERVER: u64 = SERVER_MASK | 0x0000_0001;
pub const VALIDATION_CONNECTION_SERVER: u64 = SERVER_MASK | 0x0000_0002;

/// Type id of a message code.
pub fn message_type(code: u64) -> u16 {
    (code & CODE_MESSAGE_MASK) as u16
}

/// Whether a code belongs to the server/connection category.
pub fn is_server_code(code: u64) -> bool {
    code & SERVER_MASK != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_layout() {
        assert_eq!(DEMAND_CONNECTION_SERVER, 0x0001_0001);
        assert_eq!(VALIDATION_CONNECTION_SERVER, 0x0001_0002);
        assert_eq!(message_type(DEMAND_CONNECTION_SERVER), 1);
        assert_eq!(message_type(VALIDATION_CONNECTION_SERVER), 2);
        assert!(is_server_code(DEMAND_CONNECTION_SERVER));
        assert!(!is_server_code(123));
        assert_eq!(message_type(0xABCD_0000_1234), 0x1234);
    }
}
