#![no_main]

use h264_bitstream::bitstream_utils::NalIterator;
use h264_bitstream::codec::h264::nalu::NaluType;
use h264_bitstream::codec::h264::parser::Parser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut parser = Parser::default();
    let mut messages = vec![];

    for nalu in NalIterator::new(data) {
        match nalu.header.type_ {
            NaluType::Sei => {
                messages.clear();
                let _ = parser.parse_sei(&nalu, &mut messages);
            }
            type_ if type_.is_slice() => {
                let _ = parser.parse_slice_header(nalu);
            }
            _ => {
                let _ = parser.parse_nalu(&nalu);
            }
        }
    }
});
