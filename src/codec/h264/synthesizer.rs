// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Serialization of parameter sets and SEI messages back to NAL units.

use std::io::Write;

use thiserror::Error;

use crate::bitstream_utils::AvcNalIterator;
use crate::bitstream_utils::NalIterator;
use crate::codec::h264::nalu::BufferKind;
use crate::codec::h264::nalu::Framing;
use crate::codec::h264::nalu::Nalu;
use crate::codec::h264::nalu::NaluType;
use crate::codec::h264::nalu_writer::ue_bit_len;
use crate::codec::h264::nalu_writer::NaluWriter;
use crate::codec::h264::nalu_writer::NaluWriterError;
use crate::codec::h264::parser::AspectRatioInfo;
use crate::codec::h264::parser::HrdParams;
use crate::codec::h264::parser::ParseError;
use crate::codec::h264::parser::ParseResult;
use crate::codec::h264::parser::PicOrderCnt;
use crate::codec::h264::parser::Pps;
use crate::codec::h264::parser::Profile;
use crate::codec::h264::parser::SliceGroupMap;
use crate::codec::h264::parser::SliceGroups;
use crate::codec::h264::parser::Sps;
use crate::codec::h264::parser::VuiParams;
use crate::codec::h264::parser::DEFAULT_4X4_INTER;
use crate::codec::h264::parser::DEFAULT_4X4_INTRA;
use crate::codec::h264::parser::DEFAULT_8X8_INTER;
use crate::codec::h264::parser::DEFAULT_8X8_INTRA;
use crate::codec::h264::sei::ClockTimestamp;
use crate::codec::h264::sei::FramePacking;
use crate::codec::h264::sei::PicStructTiming;
use crate::codec::h264::sei::PicTiming;
use crate::codec::h264::sei::SeiMessage;

mod private {
    pub trait NaluStruct {}
}

impl private::NaluStruct for Sps {}

impl private::NaluStruct for Pps {}

impl private::NaluStruct for [SeiMessage] {}

#[derive(Error, Debug)]
pub enum SynthesizerError {
    #[error("tried to synthesize unsupported settings: {0}")]
    Unsupported(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("SEI payload type {payload_type} declared {declared} bits but wrote {written}")]
    PayloadSize {
        payload_type: u32,
        declared: u64,
        written: u64,
    },
    #[error(transparent)]
    NaluWriter(#[from] NaluWriterError),
    #[error(transparent)]
    Framing(#[from] ParseError),
}

pub type SynthesizerResult<T> = Result<T, SynthesizerError>;

/// A helper to output typed NALUs to [`std::io::Write`] using [`NaluWriter`].
///
/// The output is an unframed NAL unit: header byte and escaped RBSP. Framing
/// is added by [`frame_nalu`].
pub struct Synthesizer<'n, N: private::NaluStruct + ?Sized, W: Write> {
    writer: NaluWriter<W>,
    nalu: &'n N,
}

impl<N: private::NaluStruct + ?Sized, W: Write> Synthesizer<'_, N, W> {
    fn u<T: Into<u32>>(&mut self, bits: usize, value: T) -> SynthesizerResult<()> {
        self.writer.write_u(bits, value)?;
        Ok(())
    }

    fn f<T: Into<u32>>(&mut self, bits: usize, value: T) -> SynthesizerResult<()> {
        self.writer.write_f(bits, value)?;
        Ok(())
    }

    fn i(&mut self, bits: usize, value: i32) -> SynthesizerResult<()> {
        self.writer.write_i(bits, value)?;
        Ok(())
    }

    fn ue<T: Into<u32>>(&mut self, value: T) -> SynthesizerResult<()> {
        self.writer.write_ue(value)?;
        Ok(())
    }

    fn se<T: Into<i32>>(&mut self, value: T) -> SynthesizerResult<()> {
        self.writer.write_se(value)?;
        Ok(())
    }

    /// Brings a scaling list delta into the -128..=127 range of
    /// delta_scale, relying on the modulo 256 of (7-7).
    fn wrap_delta(delta: i32) -> i32 {
        (delta + 128).rem_euclid(256) - 128
    }

    fn scaling_list(&mut self, list: &[u8], default: &[u8]) -> SynthesizerResult<()> {
        // H.264 7.3.2.1.1.1
        if list == default {
            // useDefaultScalingMatrixFlag
            self.se(-8)?;
            return Ok(());
        }

        if list.contains(&0) {
            return Err(SynthesizerError::InvalidValue("zero scaling list entry"));
        }

        // The number of list values we want to encode.
        let mut run = list.len();

        // Check how many values at the end of the matrix are the same,
        // so we can save on encoding those.
        for j in (1..list.len()).rev() {
            if list[j - 1] != list[j] {
                break;
            }
            run -= 1;
        }

        // Encode deltas.
        let mut last_scale = 8;
        for scale in &list[0..run] {
            let delta_scale = i32::from(*scale) - last_scale;
            self.se(Self::wrap_delta(delta_scale))?;
            last_scale = i32::from(*scale);
        }

        // Didn't encode all values, encode -|last_scale| to set decoder's
        // |next_scale| (H.264 7.3.2.1.1.1) to zero, i.e. decoder should repeat
        // last values in matrix.
        if run < list.len() {
            self.se(Self::wrap_delta(-last_scale))?;
        }

        Ok(())
    }

    /// Writes every list of a scaling matrix as present. `num_8x8` is the
    /// number of 8x8 lists the syntax carries.
    fn scaling_matrix(
        &mut self,
        lists_4x4: &[[u8; 16]; 6],
        lists_8x8: &[[u8; 64]; 6],
        num_8x8: usize,
    ) -> SynthesizerResult<()> {
        for (i, list) in lists_4x4.iter().enumerate() {
            // H.264 Table 7-2
            let default = if i < 3 {
                &DEFAULT_4X4_INTRA
            } else {
                &DEFAULT_4X4_INTER
            };
            self.u(1, /* scaling_list_present_flag */ true)?;
            self.scaling_list(list, default)?;
        }

        for (i, list) in lists_8x8.iter().take(num_8x8).enumerate() {
            let default = if i % 2 == 0 {
                &DEFAULT_8X8_INTRA
            } else {
                &DEFAULT_8X8_INTER
            };
            self.u(1, /* scaling_list_present_flag */ true)?;
            self.scaling_list(list, default)?;
        }

        Ok(())
    }

    fn rbsp_trailing_bits(&mut self) -> SynthesizerResult<()> {
        self.f(1, 1u32)?;

        while !self.writer.aligned() {
            self.f(1, 0u32)?;
        }

        Ok(())
    }
}

impl<'n, W: Write> Synthesizer<'n, Sps, W> {
    /// Writes `sps` as a SPS NAL unit. Subset SPSs are not supported.
    pub fn synthesize(
        ref_idc: u8,
        sps: &'n Sps,
        writer: W,
        ep_enabled: bool,
    ) -> SynthesizerResult<()> {
        if sps.extension.is_some() {
            return Err(SynthesizerError::Unsupported("subset SPS"));
        }

        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: sps,
        };

        s.writer.write_header(ref_idc, NaluType::Sps as u8)?;
        s.seq_parameter_set_data()?;
        s.rbsp_trailing_bits()
    }

    fn hrd_parameters(&mut self, hrd_params: &HrdParams) -> SynthesizerResult<()> {
        let cpb_cnt_minus1 = hrd_params
            .cpb_specs
            .len()
            .checked_sub(1)
            .ok_or(SynthesizerError::InvalidValue("HRD without CPB specification"))?;

        self.ue(cpb_cnt_minus1 as u32)?;
        self.u(4, hrd_params.bit_rate_scale)?;
        self.u(4, hrd_params.cpb_size_scale)?;

        for spec in &hrd_params.cpb_specs {
            self.ue(spec.bit_rate_value_minus1)?;
            self.ue(spec.cpb_size_value_minus1)?;
            self.u(1, spec.cbr_flag)?;
        }

        self.u(5, hrd_params.initial_cpb_removal_delay_length_minus1)?;
        self.u(5, hrd_params.cpb_removal_delay_length_minus1)?;
        self.u(5, hrd_params.dpb_output_delay_length_minus1)?;
        self.u(5, hrd_params.time_offset_length)?;

        Ok(())
    }

    fn vui_parameters(&mut self, vui_params: &VuiParams) -> SynthesizerResult<()> {
        // H.264 E.1.1
        self.u(1, vui_params.aspect_ratio_info.is_some())?;
        if let Some(aspect_ratio) = &vui_params.aspect_ratio_info {
            self.u(8, aspect_ratio.aspect_ratio_idc)?;
            if aspect_ratio.aspect_ratio_idc == AspectRatioInfo::EXTENDED_SAR {
                self.u(16, aspect_ratio.sar_width)?;
                self.u(16, aspect_ratio.sar_height)?;
            }
        }

        self.u(1, vui_params.overscan_appropriate_flag.is_some())?;
        if let Some(overscan_appropriate_flag) = vui_params.overscan_appropriate_flag {
            self.u(1, overscan_appropriate_flag)?;
        }

        self.u(1, vui_params.video_signal_type.is_some())?;
        if let Some(signal) = &vui_params.video_signal_type {
            self.u(3, signal.video_format)?;
            self.u(1, signal.video_full_range_flag)?;

            self.u(1, signal.colour_description.is_some())?;
            if let Some(colour) = &signal.colour_description {
                self.u(8, colour.colour_primaries)?;
                self.u(8, colour.transfer_characteristics)?;
                self.u(8, colour.matrix_coefficients)?;
            }
        }

        self.u(1, vui_params.chroma_loc_info.is_some())?;
        if let Some(chroma_loc) = &vui_params.chroma_loc_info {
            self.ue(chroma_loc.chroma_sample_loc_type_top_field)?;
            self.ue(chroma_loc.chroma_sample_loc_type_bottom_field)?;
        }

        self.u(1, vui_params.timing_info.is_some())?;
        if let Some(timing) = &vui_params.timing_info {
            self.u(32, timing.num_units_in_tick)?;
            self.u(32, timing.time_scale)?;
            self.u(1, timing.fixed_frame_rate_flag)?;
        }

        self.u(1, vui_params.nal_hrd_parameters.is_some())?;
        if let Some(hrd) = &vui_params.nal_hrd_parameters {
            self.hrd_parameters(hrd)?;
        }

        self.u(1, vui_params.vcl_hrd_parameters.is_some())?;
        if let Some(hrd) = &vui_params.vcl_hrd_parameters {
            self.hrd_parameters(hrd)?;
        }

        if vui_params.hrd_parameters().is_some() {
            self.u(1, vui_params.low_delay_hrd_flag)?;
        }

        self.u(1, vui_params.pic_struct_present_flag)?;

        self.u(1, vui_params.bitstream_restriction.is_some())?;
        if let Some(restriction) = &vui_params.bitstream_restriction {
            self.u(1, restriction.motion_vectors_over_pic_boundaries_flag)?;
            self.ue(restriction.max_bytes_per_pic_denom)?;
            self.ue(restriction.max_bits_per_mb_denom)?;
            self.ue(restriction.log2_max_mv_length_horizontal)?;
            self.ue(restriction.log2_max_mv_length_vertical)?;
            self.ue(restriction.max_num_reorder_frames)?;
            self.ue(restriction.max_dec_frame_buffering)?;
        }

        Ok(())
    }

    fn seq_parameter_set_data(&mut self) -> SynthesizerResult<()> {
        // H.264 7.3.2.1.1
        let sps = self.nalu;

        self.u(8, sps.profile_idc)?;
        self.u(1, sps.constraint_set0_flag)?;
        self.u(1, sps.constraint_set1_flag)?;
        self.u(1, sps.constraint_set2_flag)?;
        self.u(1, sps.constraint_set3_flag)?;
        self.u(1, sps.constraint_set4_flag)?;
        self.u(1, sps.constraint_set5_flag)?;
        self.u(2, /* reserved_zero_2bits */ 0u32)?;
        self.u(8, sps.level_idc as u8)?;
        self.ue(sps.seq_parameter_set_id)?;

        if Profile::has_chroma_info(sps.profile_idc) {
            self.ue(sps.chroma_format_idc)?;

            if sps.chroma_format_idc == 3 {
                self.u(1, sps.separate_colour_plane_flag)?;
            }

            self.ue(sps.bit_depth_luma_minus8)?;
            self.ue(sps.bit_depth_chroma_minus8)?;
            self.u(1, sps.qpprime_y_zero_transform_bypass_flag)?;
            self.u(1, sps.seq_scaling_matrix_present_flag)?;

            if sps.seq_scaling_matrix_present_flag {
                let num_8x8 = if sps.chroma_format_idc != 3 { 2 } else { 6 };
                self.scaling_matrix(&sps.scaling_lists_4x4, &sps.scaling_lists_8x8, num_8x8)?;
            }
        }

        self.ue(sps.log2_max_frame_num_minus4)?;
        self.ue(sps.pic_order_cnt.pic_order_cnt_type())?;

        match &sps.pic_order_cnt {
            PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4,
            } => self.ue(*log2_max_pic_order_cnt_lsb_minus4)?,
            PicOrderCnt::Type1 {
                delta_pic_order_always_zero_flag,
                offset_for_non_ref_pic,
                offset_for_top_to_bottom_field,
                offset_for_ref_frame,
                ..
            } => {
                self.u(1, *delta_pic_order_always_zero_flag)?;
                self.se(*offset_for_non_ref_pic)?;
                self.se(*offset_for_top_to_bottom_field)?;
                self.ue(offset_for_ref_frame.len() as u32)?;

                for offset in offset_for_ref_frame {
                    self.se(*offset)?;
                }
            }
            PicOrderCnt::Type2 => (),
        }

        self.ue(sps.max_num_ref_frames)?;
        self.u(1, sps.gaps_in_frame_num_value_allowed_flag)?;
        self.ue(sps.pic_width_in_mbs_minus1)?;
        self.ue(sps.pic_height_in_map_units_minus1)?;
        self.u(1, sps.frame_mbs_only_flag)?;
        if !sps.frame_mbs_only_flag {
            self.u(1, sps.mb_adaptive_frame_field_flag)?;
        }
        self.u(1, sps.direct_8x8_inference_flag)?;

        self.u(1, sps.frame_cropping.is_some())?;
        if let Some(crop) = &sps.frame_cropping {
            self.ue(crop.frame_crop_left_offset)?;
            self.ue(crop.frame_crop_right_offset)?;
            self.ue(crop.frame_crop_top_offset)?;
            self.ue(crop.frame_crop_bottom_offset)?;
        }

        self.u(1, sps.vui_parameters.is_some())?;
        if let Some(vui) = &sps.vui_parameters {
            self.vui_parameters(vui)?;
        }

        Ok(())
    }
}

impl<'n, W: Write> Synthesizer<'n, Pps, W> {
    /// Writes `pps` as a PPS NAL unit. `sps` is the SPS it refers to.
    pub fn synthesize(
        ref_idc: u8,
        pps: &'n Pps,
        sps: &Sps,
        writer: W,
        ep_enabled: bool,
    ) -> SynthesizerResult<()> {
        if pps.seq_parameter_set_id != sps.seq_parameter_set_id {
            return Err(SynthesizerError::InvalidValue("PPS written against another SPS"));
        }

        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: pps,
        };

        s.writer.write_header(ref_idc, NaluType::Pps as u8)?;
        s.pic_parameter_set_rbsp(sps)?;
        s.rbsp_trailing_bits()
    }

    fn slice_groups(&mut self, groups: &SliceGroups) -> SynthesizerResult<()> {
        let num_slice_groups = usize::from(groups.num_slice_groups_minus1) + 1;

        self.ue(groups.map.slice_group_map_type())?;

        match &groups.map {
            SliceGroupMap::Interleaved { run_length_minus1 } => {
                if run_length_minus1.len() != num_slice_groups {
                    return Err(SynthesizerError::InvalidValue("run_length_minus1 count"));
                }
                for run_length in run_length_minus1 {
                    self.ue(*run_length)?;
                }
            }
            SliceGroupMap::Dispersed => (),
            SliceGroupMap::Foreground {
                top_left,
                bottom_right,
            } => {
                if top_left.len() != num_slice_groups - 1 || bottom_right.len() != top_left.len()
                {
                    return Err(SynthesizerError::InvalidValue("foreground rectangle count"));
                }
                for (top_left, bottom_right) in top_left.iter().zip(bottom_right) {
                    self.ue(*top_left)?;
                    self.ue(*bottom_right)?;
                }
            }
            SliceGroupMap::Changing {
                slice_group_change_direction_flag,
                slice_group_change_rate_minus1,
                ..
            } => {
                self.u(1, *slice_group_change_direction_flag)?;
                self.ue(*slice_group_change_rate_minus1)?;
            }
            SliceGroupMap::Explicit { slice_group_id } => {
                let pic_size_in_map_units_minus1 = slice_group_id
                    .len()
                    .checked_sub(1)
                    .ok_or(SynthesizerError::InvalidValue("empty slice group map"))?;
                self.ue(pic_size_in_map_units_minus1 as u32)?;

                // Ceil(Log2(num_slice_groups_minus1 + 1))
                let bits = (u8::BITS - groups.num_slice_groups_minus1.leading_zeros()) as usize;
                for id in slice_group_id {
                    self.u(bits, *id)?;
                }
            }
        }

        Ok(())
    }

    fn pic_parameter_set_rbsp(&mut self, sps: &Sps) -> SynthesizerResult<()> {
        let pps = self.nalu;

        self.ue(pps.pic_parameter_set_id)?;
        self.ue(pps.seq_parameter_set_id)?;
        self.u(1, pps.entropy_coding_mode_flag)?;
        self.u(1, pps.bottom_field_pic_order_in_frame_present_flag)?;

        self.ue(pps.num_slice_groups_minus1())?;
        if let Some(groups) = &pps.slice_groups {
            self.slice_groups(groups)?;
        }

        self.ue(pps.num_ref_idx_l0_default_active_minus1)?;
        self.ue(pps.num_ref_idx_l1_default_active_minus1)?;
        self.u(1, pps.weighted_pred_flag)?;
        self.u(2, pps.weighted_bipred_idc)?;
        self.se(pps.pic_init_qp_minus26)?;
        self.se(pps.pic_init_qs_minus26)?;
        self.se(pps.chroma_qp_index_offset)?;
        self.u(1, pps.deblocking_filter_control_present_flag)?;
        self.u(1, pps.constrained_intra_pred_flag)?;
        self.u(1, pps.redundant_pic_cnt_present_flag)?;

        if !pps.has_trailing_fields() {
            return Ok(());
        }

        self.u(1, pps.transform_8x8_mode_flag)?;
        self.u(1, pps.pic_scaling_matrix_present_flag)?;

        if pps.pic_scaling_matrix_present_flag {
            let num_8x8 = match (pps.transform_8x8_mode_flag, sps.chroma_format_idc) {
                (false, _) => 0,
                (true, 3) => 6,
                (true, _) => 2,
            };
            self.scaling_matrix(&pps.scaling_lists_4x4, &pps.scaling_lists_8x8, num_8x8)?;
        }

        self.se(pps.second_chroma_qp_index_offset)?;

        Ok(())
    }
}

fn timestamp_bits(ts: &ClockTimestamp, time_offset_length: u8) -> u64 {
    // ct_type through n_frames
    let mut bits = 19;

    if ts.full_timestamp_flag {
        bits += 17;
    } else {
        // seconds_flag
        bits += 1;
        if ts.seconds_value.is_some() {
            // seconds_value, minutes_flag
            bits += 7;
            if ts.minutes_value.is_some() {
                // minutes_value, hours_flag
                bits += 7;
                if ts.hours_value.is_some() {
                    bits += 5;
                }
            }
        }
    }

    bits + u64::from(time_offset_length)
}

fn pic_timing_bits(pt: &PicTiming) -> u64 {
    let mut bits = 0;

    if let Some(delays) = &pt.delays {
        bits += u64::from(delays.cpb_removal_delay_length)
            + u64::from(delays.dpb_output_delay_length);
    }

    if let Some(pic_struct) = &pt.pic_struct {
        bits += 4;
        for ts in &pic_struct.clock_timestamps {
            // clock_timestamp_flag
            bits += 1;
            if let Some(ts) = ts {
                bits += timestamp_bits(ts, pic_struct.time_offset_length);
            }
        }
    }

    bits
}

fn frame_packing_bits(fp: &FramePacking) -> u64 {
    // frame_packing_arrangement_id, cancel and extension flags
    let mut bits = ue_bit_len(fp.frame_packing_arrangement_id) as u64 + 2;

    if let Some(arrangement) = &fp.arrangement {
        // type through frame1_self_contained_flag, then the reserved byte
        bits += 20 + 8;
        if arrangement.has_grid_positions() {
            bits += 16;
        }
        bits += ue_bit_len(arrangement.frame_packing_arrangement_repetition_period) as u64;
    }

    bits
}

/// Number of bits the payload of `message` takes, before the alignment to a
/// byte boundary. Must describe exactly what [`Synthesizer::sei_payload`]
/// writes.
fn sei_payload_bits(message: &SeiMessage) -> SynthesizerResult<u64> {
    let bits = match message {
        SeiMessage::RegisteredUserData(data) => {
            let extension = if data.itu_t_t35_country_code == 0xff { 8 } else { 0 };
            8 + extension + 8 * data.payload.len() as u64
        }
        SeiMessage::UnregisteredUserData(data) => 128 + 8 * data.payload.len() as u64,
        SeiMessage::FramePacking(fp) => frame_packing_bits(fp),
        SeiMessage::MasteringDisplayColourVolume(_) => 192,
        SeiMessage::ContentLightLevel(_) => 32,
        SeiMessage::PicTiming(pt) => pic_timing_bits(pt),
        _ => return Err(SynthesizerError::Unsupported("SEI payload type")),
    };

    Ok(bits)
}

impl<'n, W: Write> Synthesizer<'n, [SeiMessage], W> {
    /// Writes `messages` as a single SEI NAL unit.
    ///
    /// Registered and unregistered user data, frame packing, mastering
    /// display colour volume, content light level and picture timing
    /// messages can be written.
    pub fn synthesize(
        messages: &'n [SeiMessage],
        writer: W,
        ep_enabled: bool,
    ) -> SynthesizerResult<()> {
        if messages.is_empty() {
            return Err(SynthesizerError::InvalidValue("SEI without messages"));
        }

        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: messages,
        };

        s.writer.write_header(0, NaluType::Sei as u8)?;
        for message in s.nalu {
            s.sei_message(message)?;
        }
        s.rbsp_trailing_bits()
    }

    /// Writes a payloadType or payloadSize value as 0xff bytes followed by
    /// the remainder.
    fn ff_coded(&mut self, mut value: u32) -> SynthesizerResult<()> {
        while value >= 0xff {
            self.u(8, 0xffu32)?;
            value -= 0xff;
        }

        self.u(8, value)
    }

    fn sei_message(&mut self, message: &SeiMessage) -> SynthesizerResult<()> {
        let payload_type = message.payload_type();
        let bits = sei_payload_bits(message)?;
        let payload_size = bits.div_ceil(8);

        self.ff_coded(payload_type)?;
        self.ff_coded(
            u32::try_from(payload_size)
                .map_err(|_| SynthesizerError::InvalidValue("SEI payload too large"))?,
        )?;

        let start = self.writer.position();
        self.sei_payload(message)?;

        if !self.writer.aligned() {
            self.f(1, /* bit_equal_to_one */ 1u32)?;
            while !self.writer.aligned() {
                self.f(1, /* bit_equal_to_zero */ 0u32)?;
            }
        }

        let written = self.writer.position() - start;
        if written != payload_size * 8 {
            return Err(SynthesizerError::PayloadSize {
                payload_type,
                declared: payload_size * 8,
                written,
            });
        }

        Ok(())
    }

    fn pic_struct_timing(&mut self, timing: &PicStructTiming) -> SynthesizerResult<()> {
        if PicStructTiming::num_clock_ts(timing.pic_struct) != Some(timing.clock_timestamps.len())
        {
            return Err(SynthesizerError::InvalidValue(
                "clock timestamps do not match pic_struct",
            ));
        }

        self.u(4, timing.pic_struct)?;

        for ts in &timing.clock_timestamps {
            self.u(1, ts.is_some())?;
            let Some(ts) = ts else {
                continue;
            };

            self.u(2, ts.ct_type)?;
            self.u(1, ts.nuit_field_based_flag)?;
            self.u(5, ts.counting_type)?;
            self.u(1, ts.full_timestamp_flag)?;
            self.u(1, ts.discontinuity_flag)?;
            self.u(1, ts.cnt_dropped_flag)?;
            self.u(8, ts.n_frames)?;

            if ts.full_timestamp_flag {
                self.u(6, ts.seconds_value.unwrap_or_default())?;
                self.u(6, ts.minutes_value.unwrap_or_default())?;
                self.u(5, ts.hours_value.unwrap_or_default())?;
            } else {
                self.u(1, ts.seconds_value.is_some())?;
                if let Some(seconds) = ts.seconds_value {
                    self.u(6, seconds)?;
                    self.u(1, ts.minutes_value.is_some())?;
                    if let Some(minutes) = ts.minutes_value {
                        self.u(6, minutes)?;
                        self.u(1, ts.hours_value.is_some())?;
                        if let Some(hours) = ts.hours_value {
                            self.u(5, hours)?;
                        }
                    }
                }
            }

            self.i(usize::from(timing.time_offset_length), ts.time_offset)?;
        }

        Ok(())
    }

    fn frame_packing(&mut self, fp: &FramePacking) -> SynthesizerResult<()> {
        self.ue(fp.frame_packing_arrangement_id)?;
        self.u(1, /* frame_packing_arrangement_cancel_flag */ fp.arrangement.is_none())?;

        if let Some(arrangement) = &fp.arrangement {
            self.u(7, arrangement.frame_packing_arrangement_type)?;
            self.u(1, arrangement.quincunx_sampling_flag)?;
            self.u(6, arrangement.content_interpretation_type)?;
            self.u(1, arrangement.spatial_flipping_flag)?;
            self.u(1, arrangement.frame0_flipped_flag)?;
            self.u(1, arrangement.field_views_flag)?;
            self.u(1, arrangement.current_frame_is_frame0_flag)?;
            self.u(1, arrangement.frame0_self_contained_flag)?;
            self.u(1, arrangement.frame1_self_contained_flag)?;

            if arrangement.has_grid_positions() {
                let grid = arrangement.grid_positions.unwrap_or_default();
                self.u(4, grid.frame0_grid_position_x)?;
                self.u(4, grid.frame0_grid_position_y)?;
                self.u(4, grid.frame1_grid_position_x)?;
                self.u(4, grid.frame1_grid_position_y)?;
            }

            self.u(8, /* frame_packing_arrangement_reserved_byte */ 0u32)?;
            self.ue(arrangement.frame_packing_arrangement_repetition_period)?;
        }

        self.u(1, fp.frame_packing_arrangement_extension_flag)
    }

    fn sei_payload(&mut self, message: &SeiMessage) -> SynthesizerResult<()> {
        match message {
            SeiMessage::RegisteredUserData(data) => {
                self.u(8, data.itu_t_t35_country_code)?;
                if data.itu_t_t35_country_code == 0xff {
                    self.u(8, data.itu_t_t35_country_code_extension_byte.unwrap_or_default())?;
                }
                for byte in &data.payload {
                    self.u(8, *byte)?;
                }
            }
            SeiMessage::UnregisteredUserData(data) => {
                for byte in data.uuid_iso_iec_11578.iter().chain(&data.payload) {
                    self.u(8, *byte)?;
                }
            }
            SeiMessage::FramePacking(fp) => self.frame_packing(fp)?,
            SeiMessage::MasteringDisplayColourVolume(mdcv) => {
                for c in 0..3 {
                    self.u(16, mdcv.display_primaries_x[c])?;
                    self.u(16, mdcv.display_primaries_y[c])?;
                }
                self.u(16, mdcv.white_point_x)?;
                self.u(16, mdcv.white_point_y)?;
                self.u(32, mdcv.max_display_mastering_luminance)?;
                self.u(32, mdcv.min_display_mastering_luminance)?;
            }
            SeiMessage::ContentLightLevel(cll) => {
                self.u(16, cll.max_content_light_level)?;
                self.u(16, cll.max_pic_average_light_level)?;
            }
            SeiMessage::PicTiming(pt) => {
                if let Some(delays) = &pt.delays {
                    self.u(usize::from(delays.cpb_removal_delay_length), delays.cpb_removal_delay)?;
                    self.u(usize::from(delays.dpb_output_delay_length), delays.dpb_output_delay)?;
                }
                if let Some(timing) = &pt.pic_struct {
                    self.pic_struct_timing(timing)?;
                }
            }
            _ => return Err(SynthesizerError::Unsupported("SEI payload type")),
        }

        Ok(())
    }
}

/// Prefixes the unframed NAL unit `nalu` according to `framing`.
pub fn frame_nalu(nalu: &[u8], framing: Framing) -> ParseResult<Vec<u8>> {
    let mut out = Vec::with_capacity(nalu.len() + 4);
    framing.write_prefix(nalu.len(), &mut out)?;
    out.extend_from_slice(nalu);
    Ok(out)
}

/// Builds a complete SEI NAL unit carrying `messages`, framed with `framing`.
pub fn create_sei_nalu(messages: &[SeiMessage], framing: Framing) -> SynthesizerResult<Vec<u8>> {
    let mut nalu = Vec::new();
    Synthesizer::<'_, [SeiMessage], _>::synthesize(messages, &mut nalu, true)?;

    Ok(frame_nalu(&nalu, framing)?)
}

/// Returns a copy of the access unit `au` with the framed SEI NAL unit `sei`
/// spliced in before its first slice. Both use `framing`.
pub fn insert_sei(au: &[u8], sei: &[u8], framing: Framing) -> ParseResult<Vec<u8>> {
    let sei_nalu = match framing {
        Framing::AnnexB(_) => Nalu::identify(sei, 0, BufferKind::Complete)?,
        Framing::Avc(nal_length_size) => Nalu::identify_avc(sei, 0, nal_length_size)?,
    };

    if sei_nalu.header.type_ != NaluType::Sei {
        return Err(ParseError::BrokenData(format!(
            "expected a SEI NAL unit to insert, got {:?}",
            sei_nalu.header.type_
        )));
    }

    let is_slice = |nalu: &Nalu| nalu.header.type_.is_slice();
    let first_slice = match framing {
        Framing::AnnexB(_) => NalIterator::new(au).find(is_slice),
        Framing::Avc(nal_length_size) => AvcNalIterator::new(au, nal_length_size).find(is_slice),
    }
    .ok_or_else(|| ParseError::BrokenData("access unit without a slice".into()))?;

    let at = first_slice.sc_offset;
    let mut out = Vec::with_capacity(au.len() + sei.len());
    out.extend_from_slice(&au[..at]);
    out.extend_from_slice(sei);
    out.extend_from_slice(&au[at..]);

    Ok(out)
}
