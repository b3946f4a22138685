// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Dumps the high level syntax of an H.264 stream.
//!
//! The input is either an Annex B byte stream, or a length prefixed stream
//! together with the `avcC` box describing it.

use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;
use h264_bitstream::bitstream_utils::AvcNalIterator;
use h264_bitstream::bitstream_utils::NalIterator;
use h264_bitstream::codec::h264::avcc::AvcDecoderConfigurationRecord;
use h264_bitstream::codec::h264::nalu::Nalu;
use h264_bitstream::codec::h264::nalu::NaluType;
use h264_bitstream::codec::h264::parser::Parser;

/// Print the parameter sets, slice headers and SEI messages of an H.264 stream
#[derive(Debug, FromArgs)]
struct Args {
    /// input stream
    #[argh(positional)]
    input: PathBuf,

    /// body of the avcC box of a length prefixed input stream
    #[argh(option)]
    avcc: Option<PathBuf>,

    /// print the full slice headers
    #[argh(switch)]
    slices: bool,
}

fn dump_nalu(parser: &mut Parser, nalu: Nalu, slices: bool) {
    let type_ = nalu.header.type_;
    println!(
        "{:>8} {:?} ref_idc={} size={}",
        nalu.offset, type_, nalu.header.ref_idc, nalu.size
    );

    match type_ {
        NaluType::Sps | NaluType::SubsetSps | NaluType::Pps => {
            if let Err(e) = parser.parse_nalu(&nalu) {
                log::warn!("Failed to parse {type_:?}: {e}");
                return;
            }
            if type_ == NaluType::Pps {
                println!("{:#?}", parser.last_pps());
            } else {
                println!("{:#?}", parser.last_sps());
            }
        }
        NaluType::Sei => {
            let mut messages = vec![];
            if let Err(e) = parser.parse_sei(&nalu, &mut messages) {
                log::warn!("Failed to parse SEI: {e}");
            }
            for message in messages {
                println!("{message:#?}");
            }
        }
        _ if type_.is_slice() => match parser.parse_slice_header(nalu) {
            Ok(slice) if slices => println!("{:#?}", slice.header),
            Ok(slice) => println!(
                "    {:?} first_mb={} pps={} frame_num={}",
                slice.header.slice_type,
                slice.header.first_mb_in_slice,
                slice.header.pic_parameter_set_id,
                slice.header.frame_num
            ),
            Err(e) => log::warn!("Failed to parse slice header: {e}"),
        },
        _ => (),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let input = std::fs::read(&args.input)
        .with_context(|| format!("error reading {}", args.input.display()))?;

    let mut parser = Parser::default();

    match args.avcc {
        Some(path) => {
            let avcc =
                std::fs::read(&path).with_context(|| format!("error reading {}", path.display()))?;
            let record = AvcDecoderConfigurationRecord::parse(&avcc)
                .map_err(|e| anyhow::anyhow!("invalid avcC box: {e}"))?;

            println!(
                "avcC profile={} level={} nal_length_size={} chroma={:?}",
                record.avc_profile_indication,
                record.avc_level_indication,
                record.nal_length_size,
                record.chroma_info
            );
            for nalu in record.parameter_sets() {
                dump_nalu(&mut parser, nalu.clone(), args.slices);
            }
            for nalu in AvcNalIterator::new(&input, record.nal_length_size) {
                dump_nalu(&mut parser, nalu, args.slices);
            }
        }
        None => {
            for nalu in NalIterator::new(&input) {
                dump_nalu(&mut parser, nalu, args.slices);
            }
        }
    }

    Ok(())
}
