#![no_main]

use h264_bitstream::bitstream_utils::AvcNalIterator;
use h264_bitstream::codec::h264::avcc::AvcDecoderConfigurationRecord;
use h264_bitstream::codec::h264::parser::Parser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(record) = AvcDecoderConfigurationRecord::parse(data) else {
        return;
    };

    let mut parser = Parser::default();
    for nalu in record.parameter_sets() {
        let _ = parser.parse_nalu(nalu);
    }

    // Whatever follows the record doubles as a length prefixed stream.
    for nalu in AvcNalIterator::new(data, record.nal_length_size) {
        let _ = parser.parse_nalu(&nalu);
    }
});
