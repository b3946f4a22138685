// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Cursor;
use std::io::Write;

use thiserror::Error;

use crate::codec::h264::nalu::Nalu;
use crate::codec::h264::parser::ParseError;

/// Iterator over the NAL units of a complete Annex B byte stream.
///
/// Iteration stops at the first unit that cannot be located, which for a
/// well-formed stream is the end of the buffer.
pub struct NalIterator<'a>(Cursor<&'a [u8]>);

impl<'a> NalIterator<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self(Cursor::new(stream))
    }
}

impl<'a> Iterator for NalIterator<'a> {
    type Item = Nalu<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match Nalu::next(&mut self.0) {
            Ok(nalu) => Some(nalu),
            Err(ParseError::NoNalFound) => None,
            Err(e) => {
                log::debug!("Stopping NAL iteration: {e}");
                None
            }
        }
    }
}

/// Iterator over the NAL units of a length prefixed (AVC) stream.
pub struct AvcNalIterator<'a> {
    data: &'a [u8],
    offset: usize,
    nal_length_size: usize,
}

impl<'a> AvcNalIterator<'a> {
    pub fn new(data: &'a [u8], nal_length_size: usize) -> Self {
        Self {
            data,
            offset: 0,
            nal_length_size,
        }
    }
}

impl<'a> Iterator for AvcNalIterator<'a> {
    type Item = Nalu<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        match Nalu::identify_avc(self.data, self.offset, self.nal_length_size) {
            Ok(nalu) => {
                self.offset = nalu.end();
                Some(nalu)
            }
            Err(e) => {
                log::debug!("Stopping NAL iteration at offset {}: {e}", self.offset);
                self.offset = self.data.len();
                None
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BitWriterError {
    #[error("invalid bit count")]
    InvalidBitCount,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BitWriterResult<T> = std::result::Result<T, BitWriterError>;

pub struct BitWriter<W: Write> {
    out: W,
    nth_bit: u8,
    curr_byte: u8,
    /// Number of bits accepted so far, pending ones included.
    position: u64,
}

impl<W: Write> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: writer,
            curr_byte: 0,
            nth_bit: 0,
            position: 0,
        }
    }

    /// Writes fixed bit size integer (up to 32 bit)
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> BitWriterResult<usize> {
        let value = value.into();

        if bits > 32 {
            return Err(BitWriterError::InvalidBitCount);
        }

        let mut written = 0;
        for bit in (0..bits).rev() {
            let bit = 1u32 << bit;

            self.write_bit((value & bit) == bit)?;
            written += 1;
        }

        Ok(written)
    }

    /// Takes a single bit that will be outputed to [`std::io::Write`]
    pub fn write_bit(&mut self, bit: bool) -> BitWriterResult<()> {
        self.curr_byte |= (bit as u8) << (7u8 - self.nth_bit);
        self.nth_bit += 1;
        self.position += 1;

        if self.nth_bit == 8 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        Ok(())
    }

    /// Immediately outputs any cached bits to [`std::io::Write`]. The pending
    /// byte is padded with zero bits.
    pub fn flush(&mut self) -> BitWriterResult<()> {
        if self.nth_bit != 0 {
            self.out.write_all(&[self.curr_byte])?;
            self.position += u64::from(8 - self.nth_bit);
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        self.out.flush()?;
        Ok(())
    }

    /// Returns `true` if ['Self`] hold data that wasn't written to [`std::io::Write`]
    pub fn has_data_pending(&self) -> bool {
        self.nth_bit != 0
    }

    /// Number of bits written so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<W: Write> Drop for BitWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Unable to flush bits {e:?}");
        }
    }
}
