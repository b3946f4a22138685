// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.
use std::io::Write;

use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;

/// Internal wrapper over [`std::io::Write`] for possible emulation prevention
struct EmulationPrevention<W: Write> {
    out: W,
    /// Number of consecutive zero bytes written so far.
    zeros: usize,

    /// Emulation prevention enabled.
    ep_enabled: bool,
}

impl<W: Write> EmulationPrevention<W> {
    fn new(writer: W, ep_enabled: bool) -> Self {
        Self {
            out: writer,
            zeros: 0,
            ep_enabled,
        }
    }

    fn write_byte(&mut self, curr_byte: u8) -> std::io::Result<()> {
        if self.zeros >= 2 && curr_byte <= 0x03 {
            self.out.write_all(&[0x03])?;
            self.zeros = 0;
        }

        self.out.write_all(&[curr_byte])?;
        self.zeros = if curr_byte == 0x00 { self.zeros + 1 } else { 0 };

        Ok(())
    }
}

impl<W: Write> Write for EmulationPrevention<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.ep_enabled {
            self.out.write_all(buf)?;
            return Ok(buf.len());
        }

        for byte in buf {
            self.write_byte(*byte)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

#[derive(Error, Debug)]
pub enum NaluWriterError {
    #[error("value increment caused value overflow")]
    Overflow,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BitWriterError(#[from] BitWriterError),
}

pub type NaluWriterResult<T> = std::result::Result<T, NaluWriterError>;

/// Number of bits `ue(v)` takes for `value`.
pub fn ue_bit_len(value: u32) -> usize {
    let value = u64::from(value) + 1;
    let bits = 64 - value.leading_zeros() as usize;
    2 * bits - 1
}

/// Number of bits `se(v)` takes for `value`.
pub fn se_bit_len(value: i32) -> usize {
    ue_bit_len(se_to_code_num(value))
}

fn se_to_code_num(value: i32) -> u32 {
    let abs_value = value.unsigned_abs();
    if value <= 0 {
        abs_value.wrapping_mul(2)
    } else {
        2 * abs_value - 1
    }
}

/// A writer for H.264 bitstream. It is capable of outputing bitstream with
/// emulation-prevention.
pub struct NaluWriter<W: Write>(BitWriter<EmulationPrevention<W>>);

impl<W: Write> NaluWriter<W> {
    pub fn new(writer: W, ep_enabled: bool) -> Self {
        Self(BitWriter::new(EmulationPrevention::new(writer, ep_enabled)))
    }

    /// Writes fixed bit size integer (up to 32 bit) output with emulation
    /// prevention if enabled. Corresponds to `f(n)` in H.264 spec.
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> NaluWriterResult<usize> {
        self.0
            .write_f(bits, value)
            .map_err(NaluWriterError::BitWriterError)
    }

    /// An alias to [`Self::write_f`] Corresponds to `u(n)` in H.264 spec.
    pub fn write_u<T: Into<u32>>(&mut self, bits: usize, value: T) -> NaluWriterResult<usize> {
        self.write_f(bits, value)
    }

    /// Writes a two's complement integer of `bits` length. Corresponds to
    /// `i(n)` in H.264 spec.
    pub fn write_i(&mut self, bits: usize, value: i32) -> NaluWriterResult<usize> {
        if bits == 0 {
            return Ok(0);
        }

        let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
        self.write_f(bits, (value as u32) & mask)
    }

    /// Writes a number in exponential golumb format.
    pub fn write_exp_golumb(&mut self, value: u32) -> NaluWriterResult<()> {
        let value = value.checked_add(1).ok_or(NaluWriterError::Overflow)?;
        let bits = 32 - value.leading_zeros() as usize;
        let zeros = bits - 1;

        self.write_f(zeros, 0u32)?;
        self.write_f(bits, value)?;

        Ok(())
    }

    /// Writes a unsigned integer in exponential golumb format.
    /// Coresponds to `ue(v)` in H.264 spec.
    pub fn write_ue<T: Into<u32>>(&mut self, value: T) -> NaluWriterResult<()> {
        let value = value.into();

        self.write_exp_golumb(value)
    }

    /// Writes a signed integer in exponential golumb format.
    /// Coresponds to `se(v)` in H.264 spec.
    pub fn write_se<T: Into<i32>>(&mut self, value: T) -> NaluWriterResult<()> {
        let value: i32 = value.into();
        if value == i32::MIN {
            return Err(NaluWriterError::Overflow);
        }

        self.write_ue(se_to_code_num(value))
    }

    /// Returns `true` if ['Self`] hold data that wasn't written to [`std::io::Write`]
    pub fn has_data_pending(&self) -> bool {
        self.0.has_data_pending()
    }

    /// Writes a H.264 NALU header byte. Framing (start code or length prefix)
    /// is left to the caller.
    pub fn write_header(&mut self, idc: u8, type_: u8) -> NaluWriterResult<()> {
        self.0.flush()?;
        self.write_f(8, ((idc & 0b11) << 5) | (type_ & 0b11111))?;
        Ok(())
    }

    /// Returns `true` if next bits will be aligned to 8
    pub fn aligned(&self) -> bool {
        !self.0.has_data_pending()
    }

    /// Number of bits written so far, not counting emulation prevention.
    pub fn position(&self) -> u64 {
        self.0.position()
    }
}
