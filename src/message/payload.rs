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

use bytes::{Buf, BufMut};

use crate::{AppError, AppResult};

///
/// Stream-style writing of payload fields.
///
/// Fixed-size values go through the little-endian `BufMut::put_*_le` methods.
/// Variable-size values are prefixed with their length as a little-endian u64.
///
pub trait PayloadWriter: BufMut {
    fn put_string(&mut self, value: &str) {
        self.put_blob(value.as_bytes());
    }

    fn put_blob(&mut self, value: &[u8]) {
        self.put_u64_le(value.len() as u64);
        self.put_slice(value);
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }
}

impl<T: BufMut + ?Sized> PayloadWriter for T {}

///
/// Generate a checked little-endian getter: fail with a protocol error instead
/// of panicking when the payload is too short.
///
macro_rules! checked_get {
    ($name:ident, $type:ty, $read_method:ident, $size:expr) => {
        pub fn $name(&mut self) -> AppResult<$type> {
            self.ensure($size, stringify!($type))?;
            Ok(self.buffer.$read_method())
        }
    };
}

/// Reads payload fields in the order a [`PayloadWriter`] wrote them.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buffer: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        PayloadReader { buffer }
    }

    checked_get!(get_u8, u8, get_u8, 1);
    checked_get!(get_i8, i8, get_i8, 1);
    checked_get!(get_u16, u16, get_u16_le, 2);
    checked_get!(get_i16, i16, get_i16_le, 2);
    checked_get!(get_u32, u32, get_u32_le, 4);
    checked_get!(get_i32, i32, get_i32_le, 4);
    checked_get!(get_u64, u64, get_u64_le, 8);
    checked_get!(get_i64, i64, get_i64_le, 8);
    checked_get!(get_f32, f32, get_f32_le, 4);
    checked_get!(get_f64, f64, get_f64_le, 8);

    pub fn get_bool(&mut self) -> AppResult<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_blob(&mut self) -> AppResult<&'a [u8]> {
        let len = self.get_u64()?;
        let len = usize::try_from(len)
            .map_err(|_| AppError::Protocol(format!("blob length {} overflows usize", len)))?;
        self.ensure(len, "blob")?;
        let (blob, rest) = self.buffer.split_at(len);
        self.buffer = rest;
        Ok(blob)
    }

    pub fn get_string(&mut self) -> AppResult<String> {
        let blob = self.get_blob()?;
        String::from_utf8(blob.to_vec())
            .map_err(|e| AppError::Protocol(format!("string is not valid utf-8: {}", e)))
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn ensure(&self, size: usize, what: &str) -> AppResult<()> {
        if self.buffer.remaining() < size {
            return Err(AppError::Protocol(format!(
                "can not read a {}: {} bytes needed, {} left",
                what,
                size,
                self.buffer.remaining()
            )));
        }
        Ok(())
    }
}
