/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, ErrorCode};

/// A little-endian append buffer over a borrowed slice.
///
/// Writes grow the tail; the tail position can be captured with
/// [`WriteBuf::get_tail`] and later discarded back to with
/// [`WriteBuf::rewind_tail_to`], which is how partially encoded payloads
/// are dropped without copying.
pub struct WriteBuf<'a> {
    buf: &'a mut [u8],
    tail: usize,
}

impl<'a> WriteBuf<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, tail: 0 }
    }

    /// The current tail offset, usable as an anchor for a later rewind.
    pub fn get_tail(&self) -> usize {
        self.tail
    }

    /// Discard everything written after `anchor`.
    ///
    /// `anchor` must be a value previously returned by `get_tail`.
    pub fn rewind_tail_to(&mut self, anchor: usize) {
        self.tail = anchor;
    }

    /// The bytes written since `anchor`.
    pub fn since(&self, anchor: usize) -> &[u8] {
        &self.buf[anchor..self.tail]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.tail]
    }

    pub fn is_empty(&self) -> bool {
        self.tail == 0
    }

    pub fn free_space(&self) -> usize {
        self.buf.len() - self.tail
    }

    pub fn append(&mut self, src: &[u8]) -> Result<(), Error> {
        if self.free_space() < src.len() {
            Err(ErrorCode::NoSpace.into())
        } else {
            self.buf[self.tail..self.tail + src.len()].copy_from_slice(src);
            self.tail += src.len();
            Ok(())
        }
    }

    pub fn le_u8(&mut self, data: u8) -> Result<(), Error> {
        self.append(&[data])
    }

    pub fn le_u16(&mut self, data: u16) -> Result<(), Error> {
        self.le_uint(2, data as u64)
    }

    pub fn le_u32(&mut self, data: u32) -> Result<(), Error> {
        self.le_uint(4, data as u64)
    }

    pub fn le_u64(&mut self, data: u64) -> Result<(), Error> {
        self.le_uint(8, data)
    }

    pub fn le_uint(&mut self, nbytes: usize, data: u64) -> Result<(), Error> {
        if self.free_space() < nbytes {
            Err(ErrorCode::NoSpace.into())
        } else {
            LittleEndian::write_uint(&mut self.buf[self.tail..], data, nbytes);
            self.tail += nbytes;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WriteBuf;
    use crate::error::ErrorCode;

    #[test]
    fn test_append_le() {
        let mut raw: [u8; 20] = [0; 20];
        let mut wb = WriteBuf::new(&mut raw);

        wb.le_u8(0x01).unwrap();
        wb.le_u16(0x0302).unwrap();
        wb.le_u32(0x07060504).unwrap();
        assert_eq!(wb.as_slice(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_no_space() {
        let mut raw: [u8; 3] = [0; 3];
        let mut wb = WriteBuf::new(&mut raw);

        wb.le_u16(0xbeef).unwrap();
        assert_eq!(
            wb.le_u32(0).map_err(|e| e.code()),
            Err(ErrorCode::NoSpace)
        );
        // A failed write must not move the tail
        assert_eq!(wb.get_tail(), 2);
    }

    #[test]
    fn test_rewind() {
        let mut raw: [u8; 20] = [0; 20];
        let mut wb = WriteBuf::new(&mut raw);

        wb.le_u16(0x0201).unwrap();
        let anchor = wb.get_tail();

        wb.le_u32(0xdeadbeef).unwrap();
        assert_eq!(wb.since(anchor), &[0xef, 0xbe, 0xad, 0xde]);

        wb.rewind_tail_to(anchor);
        assert_eq!(wb.as_slice(), &[1, 2]);
        assert_eq!(wb.free_space(), 18);
    }
}
