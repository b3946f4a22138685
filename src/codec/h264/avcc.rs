// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! AVCDecoderConfigurationRecord, ISO/IEC 14496-15 5.2.4.1.

use bitreader::BitReader;
use bitreader::BitReaderError;

use crate::codec::h264::nalu::Nalu;
use crate::codec::h264::parser::ParseError;
use crate::codec::h264::parser::ParseResult;

/// Parameter set lists of the record are prefixed with 16 bit lengths,
/// whatever the length size of the stream.
const DESCRIPTOR_LENGTH_SIZE: usize = 2;

fn broken(e: BitReaderError) -> ParseError {
    ParseError::BrokenData(format!("avcC: {e}"))
}

/// The trailer of the record for the High profiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AvcChromaInfo {
    pub chroma_format: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
}

/// A decoded `avcC` box. The parameter sets are views into the box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvcDecoderConfigurationRecord<'a> {
    pub configuration_version: u8,
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    /// Size of the NAL unit length fields of the stream, 1 to 4.
    pub nal_length_size: usize,
    pub sps: Vec<Nalu<'a>>,
    pub pps: Vec<Nalu<'a>>,
    /// Present for the High profiles when the trailer could be read.
    pub chroma_info: Option<AvcChromaInfo>,
    pub sps_ext: Vec<Nalu<'a>>,
}

impl<'a> AvcDecoderConfigurationRecord<'a> {
    /// Profiles whose records carry the chroma trailer.
    fn has_trailer(profile: u8) -> bool {
        matches!(profile, 100 | 110 | 122 | 144)
    }

    fn parse_descriptors(
        data: &'a [u8],
        offset: &mut usize,
        count: usize,
    ) -> ParseResult<Vec<Nalu<'a>>> {
        let mut nalus = Vec::with_capacity(count);
        for _ in 0..count {
            let nalu = Nalu::identify_avc(data, *offset, DESCRIPTOR_LENGTH_SIZE)?;
            *offset = nalu.end();
            nalus.push(nalu);
        }

        Ok(nalus)
    }

    fn parse_trailer(
        data: &'a [u8],
        mut offset: usize,
    ) -> ParseResult<(AvcChromaInfo, Vec<Nalu<'a>>)> {
        let trailer = data
            .get(offset..offset + 4)
            .ok_or_else(|| ParseError::BrokenData("truncated avcC trailer".into()))?;

        let mut r = BitReader::new(trailer);
        r.skip(6).map_err(broken)?;
        let chroma_format = r.read_u8(2).map_err(broken)?;
        r.skip(5).map_err(broken)?;
        let bit_depth_luma_minus8 = r.read_u8(3).map_err(broken)?;
        r.skip(5).map_err(broken)?;
        let bit_depth_chroma_minus8 = r.read_u8(3).map_err(broken)?;
        let num_sps_ext = r.read_u8(8).map_err(broken)?;
        offset += 4;

        let sps_ext = Self::parse_descriptors(data, &mut offset, usize::from(num_sps_ext))?;

        Ok((
            AvcChromaInfo {
                chroma_format,
                bit_depth_luma_minus8,
                bit_depth_chroma_minus8,
            },
            sps_ext,
        ))
    }

    /// Parses the body of an `avcC` box.
    ///
    /// Errors in the High profile trailer are not fatal: the record is
    /// returned without chroma information or SPS extensions.
    pub fn parse(data: &'a [u8]) -> ParseResult<Self> {
        let header = data
            .get(..6)
            .ok_or_else(|| ParseError::BrokenData("truncated avcC header".into()))?;

        let mut r = BitReader::new(header);
        let configuration_version = r.read_u8(8).map_err(broken)?;
        if configuration_version != 1 {
            return Err(ParseError::BrokenData(format!(
                "unsupported avcC version {configuration_version}"
            )));
        }

        let avc_profile_indication = r.read_u8(8).map_err(broken)?;
        let profile_compatibility = r.read_u8(8).map_err(broken)?;
        let avc_level_indication = r.read_u8(8).map_err(broken)?;
        // reserved
        r.skip(6).map_err(broken)?;
        let nal_length_size = usize::from(r.read_u8(2).map_err(broken)?) + 1;
        // reserved
        r.skip(3).map_err(broken)?;
        let num_sps = r.read_u8(5).map_err(broken)?;

        let mut offset = header.len();
        let sps = Self::parse_descriptors(data, &mut offset, usize::from(num_sps))?;

        let num_pps = *data
            .get(offset)
            .ok_or_else(|| ParseError::BrokenData("avcC without PPS count".into()))?;
        offset += 1;
        let pps = Self::parse_descriptors(data, &mut offset, usize::from(num_pps))?;

        let mut record = AvcDecoderConfigurationRecord {
            configuration_version,
            avc_profile_indication,
            profile_compatibility,
            avc_level_indication,
            nal_length_size,
            sps,
            pps,
            chroma_info: None,
            sps_ext: vec![],
        };

        if Self::has_trailer(avc_profile_indication) {
            match Self::parse_trailer(data, offset) {
                Ok((chroma_info, sps_ext)) => {
                    record.chroma_info = Some(chroma_info);
                    record.sps_ext = sps_ext;
                }
                Err(e) => log::debug!("Ignoring avcC trailer: {e}"),
            }
        }

        Ok(record)
    }

    /// Every parameter set of the record, in the order a decoder needs them.
    pub fn parameter_sets(&self) -> impl Iterator<Item = &Nalu<'a>> {
        self.sps.iter().chain(&self.sps_ext).chain(&self.pps)
    }
}
