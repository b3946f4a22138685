// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Locating H.264 NAL units in Annex-B byte streams and in length-prefixed
//! (AVC) streams.

use std::io::Cursor;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use enumn::N;

use crate::codec::h264::parser::ParseError;
use crate::codec::h264::parser::ParseResult;

#[derive(N, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NaluType {
    Unknown = 0,
    Slice = 1,
    SliceDpa = 2,
    SliceDpb = 3,
    SliceDpc = 4,
    SliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AuDelimiter = 9,
    SeqEnd = 10,
    StreamEnd = 11,
    FillerData = 12,
    SpsExt = 13,
    PrefixUnit = 14,
    SubsetSps = 15,
    DepthSps = 16,
    SliceAux = 19,
    SliceExt = 20,
    SliceDepth = 21,
}

impl NaluType {
    /// Whether the unit header continues with an SVC, MVC or 3D-AVC
    /// extension.
    pub fn has_header_extension(&self) -> bool {
        matches!(
            self,
            NaluType::PrefixUnit | NaluType::SliceExt | NaluType::SliceDepth
        )
    }

    /// Coded slices of the primary picture, IDR or not.
    pub fn is_slice(&self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SliceDpa
                | NaluType::SliceDpb
                | NaluType::SliceDpc
                | NaluType::SliceIdr
        )
    }
}

/// nal_unit_header_svc_extension()
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SvcHeaderExtension {
    pub idr_flag: bool,
    pub priority_id: u8,
    pub no_inter_layer_pred_flag: bool,
    pub dependency_id: u8,
    pub quality_id: u8,
    pub temporal_id: u8,
    pub use_ref_base_pic_flag: bool,
    pub discardable_flag: bool,
    pub output_flag: bool,
}

/// nal_unit_header_mvc_extension()
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvcHeaderExtension {
    pub non_idr_flag: bool,
    pub priority_id: u8,
    pub view_id: u16,
    pub temporal_id: u8,
    pub anchor_pic_flag: bool,
    pub inter_view_flag: bool,
}

/// nal_unit_header_3davc_extension()
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Avc3dHeaderExtension {
    pub view_idx: u8,
    pub depth_flag: bool,
    pub non_idr_flag: bool,
    pub temporal_id: u8,
    pub anchor_pic_flag: bool,
    pub inter_view_flag: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NaluHeaderExtension {
    Svc(SvcHeaderExtension),
    Mvc(MvcHeaderExtension),
    Avc3d(Avc3dHeaderExtension),
}

impl NaluHeaderExtension {
    /// Parses the extension following the first header byte of a unit of
    /// type `type_`. The leading flag selects SVC, or 3D-AVC for type 21.
    fn parse(type_: NaluType, data: &[u8]) -> Result<Self, bitreader::BitReaderError> {
        let mut r = bitreader::BitReader::new(data);
        let extension_flag = r.read_bool()?;

        if extension_flag && type_ == NaluType::SliceDepth {
            let ext = Avc3dHeaderExtension {
                view_idx: r.read_u8(8)?,
                depth_flag: r.read_bool()?,
                non_idr_flag: r.read_bool()?,
                temporal_id: r.read_u8(3)?,
                anchor_pic_flag: r.read_bool()?,
                inter_view_flag: r.read_bool()?,
            };
            Ok(NaluHeaderExtension::Avc3d(ext))
        } else if extension_flag {
            let ext = SvcHeaderExtension {
                idr_flag: r.read_bool()?,
                priority_id: r.read_u8(6)?,
                no_inter_layer_pred_flag: r.read_bool()?,
                dependency_id: r.read_u8(3)?,
                quality_id: r.read_u8(4)?,
                temporal_id: r.read_u8(3)?,
                use_ref_base_pic_flag: r.read_bool()?,
                discardable_flag: r.read_bool()?,
                output_flag: r.read_bool()?,
            };
            // reserved_three_2bits
            r.skip(2)?;
            Ok(NaluHeaderExtension::Svc(ext))
        } else {
            let ext = MvcHeaderExtension {
                non_idr_flag: r.read_bool()?,
                priority_id: r.read_u8(6)?,
                view_id: r.read_u16(10)?,
                temporal_id: r.read_u8(3)?,
                anchor_pic_flag: r.read_bool()?,
                inter_view_flag: r.read_bool()?,
            };
            // reserved_one_bit
            r.skip(1)?;
            Ok(NaluHeaderExtension::Mvc(ext))
        }
    }

    /// Number of bytes the extension takes.
    pub fn len(&self) -> usize {
        match self {
            NaluHeaderExtension::Svc(_) | NaluHeaderExtension::Mvc(_) => 3,
            NaluHeaderExtension::Avc3d(_) => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaluHeader {
    pub ref_idc: u8,
    pub type_: NaluType,
    pub idr_pic_flag: bool,
    pub extension: Option<NaluHeaderExtension>,
}

impl NaluHeader {
    /// Parses the header found at the start of `data`.
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let byte = *data
            .first()
            .ok_or_else(|| ParseError::BrokenData("empty NAL unit".into()))?;

        if byte & 0x80 != 0 {
            return Err(ParseError::BrokenData("forbidden_zero_bit is set".into()));
        }

        let ref_idc = (byte & 0x60) >> 5;
        let type_ = NaluType::n(byte & 0x1f).unwrap_or_else(|| {
            log::debug!("Reserved or unspecified NAL unit type {}", byte & 0x1f);
            NaluType::Unknown
        });

        let mut hdr = NaluHeader {
            ref_idc,
            type_,
            idr_pic_flag: matches!(type_, NaluType::SliceIdr),
            extension: None,
        };

        if type_.has_header_extension() {
            let ext = NaluHeaderExtension::parse(type_, &data[1..]).map_err(|e| {
                ParseError::BrokenData(format!("truncated NAL unit header extension: {e}"))
            })?;

            hdr.idr_pic_flag = match &ext {
                NaluHeaderExtension::Svc(svc) => svc.idr_flag,
                NaluHeaderExtension::Mvc(mvc) => !mvc.non_idr_flag,
                NaluHeaderExtension::Avc3d(avc_3d) => !avc_3d.non_idr_flag,
            };
            hdr.extension = Some(ext);
        }

        Ok(hdr)
    }

    /// Whether this header type indicates EOS.
    pub fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::SeqEnd | NaluType::StreamEnd)
    }

    /// The length of the header.
    pub fn len(&self) -> usize {
        1 + self.extension.as_ref().map_or(0, NaluHeaderExtension::len)
    }
}

/// How the caller vouches for the end of an Annex-B buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// The buffer ends on a NAL unit boundary: the last unit runs to the end
    /// of the buffer.
    Complete,
    /// More data may follow. A unit that is not followed by a start code is
    /// reported as [`ParseError::NalStartFoundNoEnd`].
    Partial,
}

/// How NAL units are delimited on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Start code prefixed, with a start code of 3 or 4 bytes.
    AnnexB(usize),
    /// Big endian length prefixed, with a length field of 1 to 4 bytes.
    Avc(usize),
}

impl Framing {
    /// Writes the start code or length field that introduces a NAL unit of
    /// `nalu_size` bytes.
    pub fn write_prefix(&self, nalu_size: usize, out: &mut Vec<u8>) -> ParseResult<()> {
        match *self {
            Framing::AnnexB(len @ (3 | 4)) => {
                out.extend(std::iter::repeat(0).take(len - 1));
                out.push(1);
            }
            Framing::Avc(len @ 1..=4) => {
                if nalu_size as u64 >= 1u64 << (8 * len) {
                    return Err(ParseError::BrokenData(format!(
                        "NAL unit of {nalu_size} bytes does not fit a {len} byte length"
                    )));
                }
                let mut buf = [0u8; 8];
                BigEndian::write_uint(&mut buf, nalu_size as u64, len);
                out.extend_from_slice(&buf[..len]);
            }
            _ => return Err(ParseError::BrokenData(format!("invalid framing {self:?}"))),
        }

        Ok(())
    }
}

/// A NAL unit located in a buffer. This is a view: the bytes stay in the
/// caller's buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nalu<'a> {
    pub header: NaluHeader,
    /// The buffer the unit was found in. Possibly shared with the other NALUs
    /// in the Access Unit.
    pub data: &'a [u8],
    /// Size of the unit, header included.
    pub size: usize,
    /// Offset of the unit header in `data`.
    pub offset: usize,
    /// Offset of the start code or length prefix in `data`.
    pub sc_offset: usize,
}

impl<'a> Nalu<'a> {
    fn find_start_code(data: &[u8], offset: usize) -> Option<usize> {
        data.get(offset..)?
            .windows(3)
            .position(|window| window == [0x00, 0x00, 0x01])
    }

    /// Locates the first Annex-B NAL unit at or after `offset`.
    pub fn identify(data: &'a [u8], offset: usize, kind: BufferKind) -> ParseResult<Self> {
        let current_nalu_offset =
            Nalu::find_start_code(data, offset).ok_or(ParseError::NoNalFound)?;

        let mut sc_offset = offset + current_nalu_offset;

        // If the preceding byte is 00, then we actually have a four byte SC,
        // i.e. 00 00 00 01 Where the first 00 is the "zero_byte()"
        if sc_offset > offset && data[sc_offset - 1] == 0x00 {
            sc_offset -= 1;
        }

        // The NALU offset is its offset + 3 bytes to skip the start code.
        let nalu_offset = offset + current_nalu_offset + 3;

        if nalu_offset >= data.len() {
            return match kind {
                BufferKind::Partial => Err(ParseError::NalStartFoundNoEnd { sc_offset }),
                BufferKind::Complete => Err(ParseError::BrokenData(
                    "start code at the end of the buffer".into(),
                )),
            };
        }

        let header = NaluHeader::parse(&data[nalu_offset..])?;

        if header.is_end() {
            return Ok(Nalu {
                header,
                data,
                size: 1,
                offset: nalu_offset,
                sc_offset,
            });
        }

        // Find the start of the subsequent NALU.
        let mut size = match Nalu::find_start_code(data, nalu_offset) {
            Some(size) => size,
            None if kind == BufferKind::Partial => {
                return Err(ParseError::NalStartFoundNoEnd { sc_offset })
            }
            // Whatever data is left must be part of the current NALU
            None => data.len() - nalu_offset,
        };

        while size > 0 && data[nalu_offset + size - 1] == 0x00 {
            // Discard trailing_zero_8bits
            size -= 1;
        }

        if size < header.len() {
            return Err(ParseError::BrokenData(format!(
                "NAL unit of {size} bytes cannot hold its {} byte header",
                header.len()
            )));
        }

        Ok(Nalu {
            header,
            data,
            size,
            offset: nalu_offset,
            sc_offset,
        })
    }

    /// Find the next Annex B encoded NAL unit, treating the cursor's buffer as
    /// complete. The cursor is left at the start of the returned unit.
    pub fn next(cursor: &mut Cursor<&'a [u8]>) -> ParseResult<Self> {
        let data = *cursor.get_ref();
        let pos = usize::try_from(cursor.position())
            .map_err(|_| ParseError::BrokenData("cursor position overflow".into()))?;

        let nalu = Nalu::identify(data, pos, BufferKind::Complete)?;
        cursor.set_position(nalu.offset as u64);

        Ok(nalu)
    }

    /// Locates the length-prefixed NAL unit whose length field starts at
    /// `offset`. `nal_length_size` is the width of the length field in bytes.
    pub fn identify_avc(data: &'a [u8], offset: usize, nal_length_size: usize) -> ParseResult<Self> {
        if !(1..=4).contains(&nal_length_size) {
            return Err(ParseError::BrokenData(format!(
                "invalid NAL length size {nal_length_size}"
            )));
        }

        let prefix = offset
            .checked_add(nal_length_size)
            .and_then(|end| data.get(offset..end))
            .ok_or_else(|| ParseError::BrokenData("truncated NAL length field".into()))?;
        let size = BigEndian::read_uint(prefix, nal_length_size) as usize;

        let nalu_offset = offset + nal_length_size;
        if size > data.len() - nalu_offset {
            return Err(ParseError::BrokenData(format!(
                "NAL unit of {size} bytes runs past the end of the buffer"
            )));
        }

        let header = NaluHeader::parse(&data[nalu_offset..nalu_offset + size])?;

        Ok(Nalu {
            header,
            data,
            size,
            offset: nalu_offset,
            sc_offset: offset,
        })
    }

    /// The unit's bytes after its header, still escaped.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.offset + self.header.len()..self.offset + self.size]
    }

    /// Offset of the first byte after this unit.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

impl<'a> AsRef<[u8]> for Nalu<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.size]
    }
}
