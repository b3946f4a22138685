// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Cursor;

use bytes::Buf;
use thiserror::Error;

/// A bit reader for h264 bitstreams. It properly handles emulation-prevention
/// bytes and stop bits.
#[derive(Clone)]
pub struct NaluReader<'a> {
    /// A reference into the next unread byte in the stream.
    data: Cursor<&'a [u8]>,
    /// Contents of the current byte. First unread bit starting at position 8 -
    /// num_remaining_bits_in_curr_bytes.
    curr_byte: u8,
    /// Number of bits remaining in `curr_byte`
    num_remaining_bits_in_curr_byte: usize,
    /// Used in epb detection.
    prev_two_bytes: u16,
    /// Number of epbs (i.e. 0x000003) we found.
    num_epb: usize,
    /// Whether 0x000003 sequences are escapes to be dropped.
    needs_epb: bool,
    /// Number of logical (unescaped) bits consumed so far.
    position: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GetByteError {
    #[error("reader ran out of bits")]
    OutOfBits,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadBitsError {
    #[error("more than 32 ({0}) bits were requested")]
    TooManyBitsRequested(usize),
    #[error("failed to advance the current byte")]
    GetByte(#[from] GetByteError),
    #[error("failed to convert read input to target type")]
    ConversionFailed,
    #[error("invalid exp-golomb code")]
    InvalidExpGolomb,
    #[error("value out of bounds: expected {min} - {max}, got {value}")]
    OutOfBounds { min: i64, max: i64, value: i64 },
}

impl<'a> NaluReader<'a> {
    /// Creates a reader over `data`. With `needs_epb` set, every `0x03` byte
    /// following two zero bytes is dropped from the logical stream.
    pub fn new(data: &'a [u8], needs_epb: bool) -> Self {
        Self {
            data: Cursor::new(data),
            curr_byte: Default::default(),
            num_remaining_bits_in_curr_byte: Default::default(),
            prev_two_bytes: 0xffff,
            num_epb: Default::default(),
            needs_epb,
            position: 0,
        }
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool, ReadBitsError> {
        let bit = self.read_bits::<u32>(1)?;
        Ok(bit == 1)
    }

    /// Read up to 32 bits from the stream.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> Result<U, ReadBitsError> {
        if num_bits > 32 {
            return Err(ReadBitsError::TooManyBitsRequested(num_bits));
        }

        if num_bits == 0 {
            return U::try_from(0).map_err(|_| ReadBitsError::ConversionFailed);
        }

        let mut bits_left = num_bits;
        let mut out = 0u64;

        while self.num_remaining_bits_in_curr_byte < bits_left {
            out |= u64::from(self.curr_byte) << (bits_left - self.num_remaining_bits_in_curr_byte);
            bits_left -= self.num_remaining_bits_in_curr_byte;
            self.update_curr_byte()?;
        }

        out |= u64::from(self.curr_byte >> (self.num_remaining_bits_in_curr_byte - bits_left));
        out &= (1u64 << num_bits) - 1;
        self.num_remaining_bits_in_curr_byte -= bits_left;
        self.position += num_bits as u64;

        let out = u32::try_from(out).map_err(|_| ReadBitsError::ConversionFailed)?;
        U::try_from(out).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Reads a two's complement signed integer of length `num_bits`.
    pub fn read_bits_signed<U: TryFrom<i32>>(&mut self, num_bits: usize) -> Result<U, ReadBitsError> {
        if num_bits == 0 {
            return U::try_from(0).map_err(|_| ReadBitsError::ConversionFailed);
        }
        if num_bits > 31 {
            return Err(ReadBitsError::TooManyBitsRequested(num_bits));
        }

        let mut out = i64::from(self.read_bits::<u32>(num_bits)?);
        if out >> (num_bits - 1) != 0 {
            out -= 1i64 << num_bits;
        }

        let out = i32::try_from(out).map_err(|_| ReadBitsError::ConversionFailed)?;
        U::try_from(out).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Skip `num_bits` bits from the stream.
    pub fn skip_bits(&mut self, mut num_bits: usize) -> Result<(), ReadBitsError> {
        while num_bits > 0 {
            let n = std::cmp::min(num_bits, 32);
            self.read_bits::<u32>(n)?;
            num_bits -= n;
        }

        Ok(())
    }

    /// Returns the amount of bits left in the stream, escapes included.
    pub fn num_bits_left(&self) -> usize {
        self.data.remaining() * 8 + self.num_remaining_bits_in_curr_byte
    }

    /// Returns the number of emulation-prevention bytes read so far.
    pub fn num_epb(&self) -> usize {
        self.num_epb
    }

    /// Returns the number of logical bits consumed so far. Emulation
    /// prevention bytes are not counted.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.num_remaining_bits_in_curr_byte % 8 == 0
    }

    /// Whether the stream still has RBSP data. Implements more_rbsp_data().
    pub fn has_more_rsbp_data(&mut self) -> bool {
        if self.num_remaining_bits_in_curr_byte == 0 && self.update_curr_byte().is_err() {
            // no more data at all in the rbsp
            return false;
        }

        // If the next bit is the stop bit, then we should only see unset bits
        // until the end of the data.
        if (self.curr_byte & ((1 << (self.num_remaining_bits_in_curr_byte - 1)) - 1)) != 0 {
            return true;
        }

        self.data.chunk().iter().any(|&b| b != 0)
    }

    /// Reads an unsigned Exp-Golomb code, ue(v).
    pub fn read_ue<U: TryFrom<u32>>(&mut self) -> Result<U, ReadBitsError> {
        let mut num_bits = 0;

        while self.read_bits::<u32>(1)? == 0 {
            num_bits += 1;
            if num_bits > 31 {
                return Err(ReadBitsError::InvalidExpGolomb);
            }
        }

        let value = ((1u32 << num_bits) - 1)
            .checked_add(self.read_bits::<u32>(num_bits)?)
            .ok_or(ReadBitsError::InvalidExpGolomb)?;

        U::try_from(value).map_err(|_| ReadBitsError::ConversionFailed)
    }

    pub fn read_ue_bounded<U: TryFrom<u32>>(
        &mut self,
        min: u32,
        max: u32,
    ) -> Result<U, ReadBitsError> {
        let ue = self.read_ue::<u32>()?;
        if ue > max || ue < min {
            Err(ReadBitsError::OutOfBounds {
                min: min.into(),
                max: max.into(),
                value: ue.into(),
            })
        } else {
            U::try_from(ue).map_err(|_| ReadBitsError::ConversionFailed)
        }
    }

    pub fn read_ue_max<U: TryFrom<u32>>(&mut self, max: u32) -> Result<U, ReadBitsError> {
        self.read_ue_bounded(0, max)
    }

    /// Reads a signed Exp-Golomb code, se(v). Code numbers 0, 1, 2, 3, 4 map
    /// to 0, 1, -1, 2, -2.
    pub fn read_se<U: TryFrom<i32>>(&mut self) -> Result<U, ReadBitsError> {
        let ue = i64::from(self.read_ue::<u32>()?);

        let se = if ue % 2 == 0 { -(ue / 2) } else { ue / 2 + 1 };
        let se = i32::try_from(se).map_err(|_| ReadBitsError::ConversionFailed)?;

        U::try_from(se).map_err(|_| ReadBitsError::ConversionFailed)
    }

    pub fn read_se_bounded<U: TryFrom<i32>>(
        &mut self,
        min: i32,
        max: i32,
    ) -> Result<U, ReadBitsError> {
        let se = self.read_se::<i32>()?;
        if se < min || se > max {
            Err(ReadBitsError::OutOfBounds {
                min: min.into(),
                max: max.into(),
                value: se.into(),
            })
        } else {
            U::try_from(se).map_err(|_| ReadBitsError::ConversionFailed)
        }
    }

    fn get_byte(&mut self) -> Result<u8, GetByteError> {
        if self.data.remaining() == 0 {
            return Err(GetByteError::OutOfBits);
        }

        Ok(self.data.get_u8())
    }

    fn update_curr_byte(&mut self) -> Result<(), GetByteError> {
        let mut byte = self.get_byte()?;

        if self.needs_epb {
            if self.prev_two_bytes == 0 && byte == 0x03 {
                // We found an epb
                self.num_epb += 1;
                // Read another byte
                byte = self.get_byte()?;
                // We need another 3 bytes before another epb can happen.
                self.prev_two_bytes = 0xffff;
            }
            self.prev_two_bytes = (self.prev_two_bytes << 8) | u16::from(byte);
        }

        self.num_remaining_bits_in_curr_byte = 8;
        self.curr_byte = byte;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::nalu_writer::NaluWriter;

    // These tests are adapted from the chromium tests at media/video/h264_bit_reader_unitttest.cc

    #[test]
    fn read_stream_without_escape_and_trailing_zero_bytes() {
        const RBSP: [u8; 6] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xa0];

        let mut reader = NaluReader::new(&RBSP, true);
        assert_eq!(reader.read_bits::<u32>(1).unwrap(), 0);
        assert_eq!(reader.num_bits_left(), 47);
        assert!(reader.has_more_rsbp_data());

        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x02);
        assert_eq!(reader.num_bits_left(), 39);
        assert!(reader.has_more_rsbp_data());

        assert_eq!(reader.read_bits::<u32>(31).unwrap(), 0x23456789);
        assert_eq!(reader.num_bits_left(), 8);
        assert!(reader.has_more_rsbp_data());

        assert_eq!(reader.read_bits::<u32>(1).unwrap(), 1);
        assert_eq!(reader.num_bits_left(), 7);
        assert!(reader.has_more_rsbp_data());

        assert_eq!(reader.read_bits::<u32>(1).unwrap(), 0);
        assert_eq!(reader.num_bits_left(), 6);
        assert!(!reader.has_more_rsbp_data());
    }

    #[test]
    fn single_byte_stream() {
        const RBSP: [u8; 1] = [0x18];

        let mut reader = NaluReader::new(&RBSP, true);
        assert_eq!(reader.num_bits_left(), 8);
        assert!(reader.has_more_rsbp_data());
        assert_eq!(reader.read_bits::<u32>(4).unwrap(), 1);
        assert!(!reader.has_more_rsbp_data());
    }

    #[test]
    fn stop_bit_occupy_full_byte() {
        const RBSP: [u8; 2] = [0xab, 0x80];

        let mut reader = NaluReader::new(&RBSP, true);
        assert_eq!(reader.num_bits_left(), 16);
        assert!(reader.has_more_rsbp_data());

        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0xab);
        assert_eq!(reader.num_bits_left(), 8);

        assert!(!reader.has_more_rsbp_data());
    }

    #[test]
    fn read_32_bits() {
        let mut reader = NaluReader::new(&[0xde, 0xad, 0xbe, 0xef, 0x80], true);
        assert_eq!(reader.read_bits::<u32>(32).unwrap(), 0xdeadbeef);
        assert_eq!(reader.position(), 32);
        assert!(reader.read_bits::<u32>(33).is_err());
    }

    // Check that read_ue behaves properly with input at the limits.
    #[test]
    fn read_ue_limits() {
        let mut reader = NaluReader::new(&[0b0001_1010], true);
        assert_eq!(reader.read_ue::<u32>().unwrap(), 12);
        assert_eq!(reader.position(), 7);

        let mut reader = NaluReader::new(&[0b1000_0000], true);
        assert_eq!(reader.read_ue::<u32>().unwrap(), 0);

        // No prefix stop bit.
        let mut reader = NaluReader::new(&[0b0000_0000], true);
        reader.read_ue::<u32>().unwrap_err();

        // u32 max value: 31 0-bits, 1 bit marker, 31 bits 1-bits.
        let mut reader = NaluReader::new(
            &[
                0b0000_0000,
                0b0000_0000,
                0b0000_0000,
                0b0000_0001,
                0b1111_1111,
                0b1111_1111,
                0b1111_1111,
                0b1111_1110,
            ],
            false,
        );
        assert_eq!(reader.read_ue::<u32>().unwrap(), 0xffff_fffe);
        assert_eq!(reader.position(), 63);
    }

    #[test]
    fn read_se_mapping() {
        // Code numbers 0..=4: 1, 010, 011, 00100, 00101
        let mut reader = NaluReader::new(&[0b1010_0110, 0b0100_0010, 0b1000_0000], true);
        assert_eq!(reader.read_se::<i32>().unwrap(), 0);
        assert_eq!(reader.read_se::<i32>().unwrap(), 1);
        assert_eq!(reader.read_se::<i32>().unwrap(), -1);
        assert_eq!(reader.read_se::<i32>().unwrap(), 2);
        assert_eq!(reader.read_se::<i32>().unwrap(), -2);
    }

    #[test]
    fn bounded_reads() {
        // ue = 3
        let mut reader = NaluReader::new(&[0b0010_0000], true);
        assert!(matches!(
            reader.read_ue_max::<u8>(2),
            Err(ReadBitsError::OutOfBounds { value: 3, .. })
        ));

        // se = -2
        let mut reader = NaluReader::new(&[0b0010_1000], true);
        assert_eq!(reader.read_se_bounded::<i8>(-2, 2).unwrap(), -2);
    }

    #[test]
    fn exp_golomb_values_survive_the_writer() {
        let unsigned = [0u32, 1, 2, 7, 8, 255, 256, 4095, (1 << 20) - 1];
        let signed = [0i32, 1, -1, 2, -2, 1000, -1000, (1 << 19) - 1, -(1 << 19)];

        let mut buf = Vec::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            for &u in &unsigned {
                writer.write_ue(u).unwrap();
            }
            for &s in &signed {
                writer.write_se(s).unwrap();
            }
            writer.write_f(1, true).unwrap();
        }

        let mut reader = NaluReader::new(&buf, false);
        for &u in &unsigned {
            assert_eq!(reader.read_ue::<u32>().unwrap(), u);
        }
        for &s in &signed {
            assert_eq!(reader.read_se::<i32>().unwrap(), s);
        }
    }

    // Check that emulation prevention is being handled correctly.
    #[test]
    fn skip_epb_when_enabled() {
        let mut reader = NaluReader::new(&[0x00, 0x00, 0x03, 0x01], false);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x00);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x00);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x03);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x01);
        assert_eq!(reader.num_epb(), 0);

        let mut reader = NaluReader::new(&[0x00, 0x00, 0x03, 0x01], true);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x00);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x00);
        assert_eq!(reader.num_epb(), 0);
        assert_eq!(reader.read_bits::<u32>(8).unwrap(), 0x01);
        assert_eq!(reader.num_epb(), 1);
        assert_eq!(reader.position(), 24);
    }

    #[test]
    fn escaped_fields_match_unescaped() {
        // 16 zero bits, ue(0), ue(1), 5 zero bits, then 0x01 and 0x03 payload bytes.
        let rbsp = [0x00, 0x00, 0xa0, 0x00, 0x00, 0x01, 0x00, 0x00, 0x03, 0x80];
        let escaped = [
            0x00, 0x00, 0xa0, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x03, 0x80,
        ];

        let mut plain = NaluReader::new(&rbsp, false);
        let mut esc = NaluReader::new(&escaped, true);

        for _ in 0..2 {
            assert_eq!(
                plain.read_bits::<u32>(8).unwrap(),
                esc.read_bits::<u32>(8).unwrap()
            );
        }
        assert_eq!(plain.read_ue::<u32>().unwrap(), esc.read_ue::<u32>().unwrap());
        assert_eq!(plain.read_ue::<u32>().unwrap(), esc.read_ue::<u32>().unwrap());
        plain.skip_bits(5).unwrap();
        esc.skip_bits(5).unwrap();
        for _ in 0..6 {
            assert_eq!(
                plain.read_bits::<u32>(8).unwrap(),
                esc.read_bits::<u32>(8).unwrap()
            );
        }
        assert_eq!(esc.num_epb(), 2);
        assert_eq!(plain.position(), esc.position());
        assert!(!esc.has_more_rsbp_data());
    }

    #[test]
    fn read_signed_bits() {
        let mut reader = NaluReader::new(&[0b1111_0000], false);
        assert_eq!(reader.read_bits_signed::<i32>(4).unwrap(), -1);
        assert_eq!(reader.read_bits_signed::<i32>(4).unwrap(), 0);
    }
}
