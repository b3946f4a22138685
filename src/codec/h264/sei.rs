// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Supplemental enhancement information messages, Annex D.

use std::rc::Rc;

use enumn::N;

use crate::codec::h264::nalu::Nalu;
use crate::codec::h264::nalu::NaluType;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::parser::HrdParams;
use crate::codec::h264::parser::ParseError;
use crate::codec::h264::parser::ParseResult;
use crate::codec::h264::parser::Parser;
use crate::codec::h264::parser::Sps;

/// Payload types with a dedicated decoder.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SeiPayloadType {
    BufferingPeriod = 0,
    PicTiming = 1,
    RegisteredUserData = 4,
    UnregisteredUserData = 5,
    RecoveryPoint = 6,
    StereoVideoInfo = 21,
    FramePacking = 45,
    MasteringDisplayColourVolume = 137,
    ContentLightLevel = 144,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitialCpbRemoval {
    pub initial_cpb_removal_delay: u32,
    pub initial_cpb_removal_delay_offset: u32,
}

/// buffering_period(), D.1.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferingPeriod {
    pub seq_parameter_set_id: u8,
    /// One entry per CPB of the NAL HRD, present when the SPS has one.
    pub nal_initial_cpb_removal: Option<Vec<InitialCpbRemoval>>,
    /// One entry per CPB of the VCL HRD, present when the SPS has one.
    pub vcl_initial_cpb_removal: Option<Vec<InitialCpbRemoval>>,
}

/// The HRD delays of a picture timing message, with the widths they are
/// coded with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PicTimingDelays {
    pub cpb_removal_delay: u32,
    pub dpb_output_delay: u32,
    /// `cpb_removal_delay_length_minus1 + 1` of the HRD in use.
    pub cpb_removal_delay_length: u8,
    /// `dpb_output_delay_length_minus1 + 1` of the HRD in use.
    pub dpb_output_delay_length: u8,
}

/// clock_timestamp of a picture timing message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockTimestamp {
    pub ct_type: u8,
    pub nuit_field_based_flag: bool,
    pub counting_type: u8,
    pub full_timestamp_flag: bool,
    pub discontinuity_flag: bool,
    pub cnt_dropped_flag: bool,
    pub n_frames: u8,
    /// Always present with `full_timestamp_flag`. Otherwise minutes require
    /// seconds and hours require minutes.
    pub seconds_value: Option<u8>,
    pub minutes_value: Option<u8>,
    pub hours_value: Option<u8>,
    pub time_offset: i32,
}

/// The picture structure part of a picture timing message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicStructTiming {
    pub pic_struct: u8,
    /// NumClockTS entries, `None` where clock_timestamp_flag is unset.
    pub clock_timestamps: Vec<Option<ClockTimestamp>>,
    /// Width of `time_offset`, from the HRD in use. Zero without HRD.
    pub time_offset_length: u8,
}

/// pic_timing(), D.1.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicTiming {
    /// Present when the SPS signals HRD parameters.
    pub delays: Option<PicTimingDelays>,
    /// Present when the SPS sets pic_struct_present_flag.
    pub pic_struct: Option<PicStructTiming>,
}

impl PicStructTiming {
    /// NumClockTS of table D-1.
    pub fn num_clock_ts(pic_struct: u8) -> Option<usize> {
        match pic_struct {
            0..=2 => Some(1),
            3 | 4 | 7 => Some(2),
            5 | 6 | 8 => Some(3),
            _ => None,
        }
    }
}

/// user_data_registered_itu_t_t35(), D.1.6.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisteredUserData {
    pub itu_t_t35_country_code: u8,
    /// Present when `itu_t_t35_country_code` is 0xff.
    pub itu_t_t35_country_code_extension_byte: Option<u8>,
    pub payload: Vec<u8>,
}

/// user_data_unregistered(), D.1.7.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnregisteredUserData {
    pub uuid_iso_iec_11578: [u8; 16],
    pub payload: Vec<u8>,
}

/// recovery_point(), D.1.8.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryPoint {
    pub recovery_frame_cnt: u32,
    pub exact_match_flag: bool,
    pub broken_link_flag: bool,
    pub changing_slice_group_idc: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StereoViews {
    Fields {
        top_field_is_left_view_flag: bool,
    },
    Frames {
        current_frame_is_left_view_flag: bool,
        next_frame_is_second_view_flag: bool,
    },
}

/// stereo_video_info(), D.1.22.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StereoVideoInfo {
    pub views: StereoViews,
    pub left_view_self_contained_flag: bool,
    pub right_view_self_contained_flag: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameGridPositions {
    pub frame0_grid_position_x: u8,
    pub frame0_grid_position_y: u8,
    pub frame1_grid_position_x: u8,
    pub frame1_grid_position_y: u8,
}

/// The body of a frame packing arrangement that is not cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramePackingArrangement {
    pub frame_packing_arrangement_type: u8,
    pub quincunx_sampling_flag: bool,
    pub content_interpretation_type: u8,
    pub spatial_flipping_flag: bool,
    pub frame0_flipped_flag: bool,
    pub field_views_flag: bool,
    pub current_frame_is_frame0_flag: bool,
    pub frame0_self_contained_flag: bool,
    pub frame1_self_contained_flag: bool,
    /// Present unless quincunx sampling is used or the arrangement type is
    /// temporal interleaving (5).
    pub grid_positions: Option<FrameGridPositions>,
    pub frame_packing_arrangement_repetition_period: u32,
}

impl FramePackingArrangement {
    pub fn has_grid_positions(&self) -> bool {
        !self.quincunx_sampling_flag && self.frame_packing_arrangement_type != 5
    }
}

/// frame_packing_arrangement(), D.1.26.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FramePacking {
    pub frame_packing_arrangement_id: u32,
    /// `None` when frame_packing_arrangement_cancel_flag is set.
    pub arrangement: Option<FramePackingArrangement>,
    pub frame_packing_arrangement_extension_flag: bool,
}

/// mastering_display_colour_volume(), D.1.29.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MasteringDisplayColourVolume {
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

/// content_light_level_info(), D.1.31.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentLightLevel {
    pub max_content_light_level: u16,
    pub max_pic_average_light_level: u16,
}

/// A decoded SEI message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeiMessage {
    BufferingPeriod(BufferingPeriod),
    PicTiming(PicTiming),
    RegisteredUserData(RegisteredUserData),
    UnregisteredUserData(UnregisteredUserData),
    RecoveryPoint(RecoveryPoint),
    StereoVideoInfo(StereoVideoInfo),
    FramePacking(FramePacking),
    MasteringDisplayColourVolume(MasteringDisplayColourVolume),
    ContentLightLevel(ContentLightLevel),
    /// A payload without a decoder, kept as its raw bytes.
    Unhandled { payload_type: u32, payload: Vec<u8> },
}

impl SeiMessage {
    pub fn payload_type(&self) -> u32 {
        let known = match self {
            SeiMessage::BufferingPeriod(_) => SeiPayloadType::BufferingPeriod,
            SeiMessage::PicTiming(_) => SeiPayloadType::PicTiming,
            SeiMessage::RegisteredUserData(_) => SeiPayloadType::RegisteredUserData,
            SeiMessage::UnregisteredUserData(_) => SeiPayloadType::UnregisteredUserData,
            SeiMessage::RecoveryPoint(_) => SeiPayloadType::RecoveryPoint,
            SeiMessage::StereoVideoInfo(_) => SeiPayloadType::StereoVideoInfo,
            SeiMessage::FramePacking(_) => SeiPayloadType::FramePacking,
            SeiMessage::MasteringDisplayColourVolume(_) => {
                SeiPayloadType::MasteringDisplayColourVolume
            }
            SeiMessage::ContentLightLevel(_) => SeiPayloadType::ContentLightLevel,
            SeiMessage::Unhandled { payload_type, .. } => return *payload_type,
        };

        known as u32
    }
}

/// Reads a payloadType or payloadSize value: a run of 0xff bytes summed with
/// the byte that ends it.
fn read_ff_coded(r: &mut NaluReader) -> ParseResult<u32> {
    let mut value = 0u32;

    loop {
        let byte = r.read_bits::<u32>(8)?;
        value = value
            .checked_add(byte)
            .ok_or_else(|| ParseError::BrokenData("SEI payload value overflow".into()))?;

        if byte != 0xff {
            return Ok(value);
        }
    }
}

fn read_bytes(r: &mut NaluReader, len: usize) -> ParseResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        bytes.push(r.read_bits(8)?);
    }

    Ok(bytes)
}

fn parse_initial_cpb_removal(
    r: &mut NaluReader,
    hrd: &HrdParams,
) -> ParseResult<Vec<InitialCpbRemoval>> {
    let len = usize::from(hrd.initial_cpb_removal_delay_length_minus1) + 1;

    let mut removals = Vec::with_capacity(hrd.cpb_specs.len());
    for _ in &hrd.cpb_specs {
        removals.push(InitialCpbRemoval {
            initial_cpb_removal_delay: r.read_bits(len)?,
            initial_cpb_removal_delay_offset: r.read_bits(len)?,
        });
    }

    Ok(removals)
}

fn parse_clock_timestamp(r: &mut NaluReader, time_offset_length: u8) -> ParseResult<ClockTimestamp> {
    let mut ts = ClockTimestamp {
        ct_type: r.read_bits(2)?,
        nuit_field_based_flag: r.read_bit()?,
        counting_type: r.read_bits(5)?,
        full_timestamp_flag: r.read_bit()?,
        discontinuity_flag: r.read_bit()?,
        cnt_dropped_flag: r.read_bit()?,
        n_frames: r.read_bits(8)?,
        ..Default::default()
    };

    if ts.full_timestamp_flag {
        ts.seconds_value = Some(r.read_bits(6)?);
        ts.minutes_value = Some(r.read_bits(6)?);
        ts.hours_value = Some(r.read_bits(5)?);
    } else if r.read_bit()? {
        ts.seconds_value = Some(r.read_bits(6)?);
        if r.read_bit()? {
            ts.minutes_value = Some(r.read_bits(6)?);
            if r.read_bit()? {
                ts.hours_value = Some(r.read_bits(5)?);
            }
        }
    }

    ts.time_offset = r.read_bits_signed(usize::from(time_offset_length))?;

    Ok(ts)
}

fn parse_pic_timing(r: &mut NaluReader, sps: &Sps) -> ParseResult<PicTiming> {
    let vui = sps.vui_parameters.as_ref();
    let hrd = vui.and_then(|vui| vui.hrd_parameters());

    let mut pt = PicTiming::default();

    if let Some(hrd) = hrd {
        let cpb_removal_delay_length = hrd.cpb_removal_delay_length_minus1 + 1;
        let dpb_output_delay_length = hrd.dpb_output_delay_length_minus1 + 1;

        pt.delays = Some(PicTimingDelays {
            cpb_removal_delay: r.read_bits(usize::from(cpb_removal_delay_length))?,
            dpb_output_delay: r.read_bits(usize::from(dpb_output_delay_length))?,
            cpb_removal_delay_length,
            dpb_output_delay_length,
        });
    }

    if vui.is_some_and(|vui| vui.pic_struct_present_flag) {
        let pic_struct = r.read_bits(4)?;
        let num_clock_ts = PicStructTiming::num_clock_ts(pic_struct).ok_or_else(|| {
            ParseError::BrokenData(format!("reserved pic_struct {pic_struct}"))
        })?;
        let time_offset_length = hrd.map_or(0, |hrd| hrd.time_offset_length);

        let mut clock_timestamps = Vec::with_capacity(num_clock_ts);
        for _ in 0..num_clock_ts {
            clock_timestamps.push(if r.read_bit()? {
                Some(parse_clock_timestamp(r, time_offset_length)?)
            } else {
                None
            });
        }

        pt.pic_struct = Some(PicStructTiming {
            pic_struct,
            clock_timestamps,
            time_offset_length,
        });
    }

    Ok(pt)
}

fn parse_registered_user_data(r: &mut NaluReader, size: usize) -> ParseResult<RegisteredUserData> {
    if size == 0 {
        return Err(ParseError::BrokenData(
            "empty registered user data payload".into(),
        ));
    }

    let itu_t_t35_country_code = r.read_bits(8)?;
    let mut header_len = 1;
    let mut itu_t_t35_country_code_extension_byte = None;

    if itu_t_t35_country_code == 0xff {
        itu_t_t35_country_code_extension_byte = Some(r.read_bits(8)?);
        header_len += 1;
    }

    let payload_len = size.checked_sub(header_len).ok_or_else(|| {
        ParseError::BrokenData("registered user data payload too small".into())
    })?;

    Ok(RegisteredUserData {
        itu_t_t35_country_code,
        itu_t_t35_country_code_extension_byte,
        payload: read_bytes(r, payload_len)?,
    })
}

fn parse_unregistered_user_data(
    r: &mut NaluReader,
    size: usize,
) -> ParseResult<UnregisteredUserData> {
    let payload_len = size.checked_sub(16).ok_or_else(|| {
        ParseError::BrokenData("unregistered user data payload shorter than its UUID".into())
    })?;

    let mut uuid_iso_iec_11578 = [0u8; 16];
    for byte in uuid_iso_iec_11578.iter_mut() {
        *byte = r.read_bits(8)?;
    }

    Ok(UnregisteredUserData {
        uuid_iso_iec_11578,
        payload: read_bytes(r, payload_len)?,
    })
}

fn parse_stereo_video_info(r: &mut NaluReader) -> ParseResult<StereoVideoInfo> {
    let views = if r.read_bit()? {
        StereoViews::Fields {
            top_field_is_left_view_flag: r.read_bit()?,
        }
    } else {
        StereoViews::Frames {
            current_frame_is_left_view_flag: r.read_bit()?,
            next_frame_is_second_view_flag: r.read_bit()?,
        }
    };

    Ok(StereoVideoInfo {
        views,
        left_view_self_contained_flag: r.read_bit()?,
        right_view_self_contained_flag: r.read_bit()?,
    })
}

fn parse_frame_packing(r: &mut NaluReader) -> ParseResult<FramePacking> {
    let mut fp = FramePacking {
        frame_packing_arrangement_id: r.read_ue_max(u32::MAX - 1)?,
        ..Default::default()
    };

    if !r.read_bit()? {
        let mut arrangement = FramePackingArrangement {
            frame_packing_arrangement_type: r.read_bits(7)?,
            quincunx_sampling_flag: r.read_bit()?,
            content_interpretation_type: r.read_bits(6)?,
            spatial_flipping_flag: r.read_bit()?,
            frame0_flipped_flag: r.read_bit()?,
            field_views_flag: r.read_bit()?,
            current_frame_is_frame0_flag: r.read_bit()?,
            frame0_self_contained_flag: r.read_bit()?,
            frame1_self_contained_flag: r.read_bit()?,
            ..Default::default()
        };

        if arrangement.has_grid_positions() {
            arrangement.grid_positions = Some(FrameGridPositions {
                frame0_grid_position_x: r.read_bits(4)?,
                frame0_grid_position_y: r.read_bits(4)?,
                frame1_grid_position_x: r.read_bits(4)?,
                frame1_grid_position_y: r.read_bits(4)?,
            });
        }

        // frame_packing_arrangement_reserved_byte
        r.skip_bits(8)?;
        arrangement.frame_packing_arrangement_repetition_period = r.read_ue_max(16384)?;
        fp.arrangement = Some(arrangement);
    }

    fp.frame_packing_arrangement_extension_flag = r.read_bit()?;

    Ok(fp)
}

fn parse_mastering_display_colour_volume(
    r: &mut NaluReader,
) -> ParseResult<MasteringDisplayColourVolume> {
    let mut mdcv = MasteringDisplayColourVolume::default();

    for c in 0..3 {
        mdcv.display_primaries_x[c] = r.read_bits(16)?;
        mdcv.display_primaries_y[c] = r.read_bits(16)?;
    }

    mdcv.white_point_x = r.read_bits(16)?;
    mdcv.white_point_y = r.read_bits(16)?;
    mdcv.max_display_mastering_luminance = r.read_bits(32)?;
    mdcv.min_display_mastering_luminance = r.read_bits(32)?;

    Ok(mdcv)
}

impl Parser {
    fn parse_buffering_period(&mut self, r: &mut NaluReader) -> ParseResult<BufferingPeriod> {
        let seq_parameter_set_id = r.read_ue_max(31)?;
        let sps = self.get_sps(seq_parameter_set_id).ok_or_else(|| {
            ParseError::BrokenLink(format!(
                "buffering period refers to SPS {seq_parameter_set_id}, which has not been parsed"
            ))
        })?;
        let sps = Rc::clone(sps);
        let vui = sps.vui_parameters.as_ref();

        let mut bp = BufferingPeriod {
            seq_parameter_set_id,
            ..Default::default()
        };

        if let Some(hrd) = vui.and_then(|vui| vui.nal_hrd_parameters.as_ref()) {
            bp.nal_initial_cpb_removal = Some(parse_initial_cpb_removal(r, hrd)?);
        }

        if let Some(hrd) = vui.and_then(|vui| vui.vcl_hrd_parameters.as_ref()) {
            bp.vcl_initial_cpb_removal = Some(parse_initial_cpb_removal(r, hrd)?);
        }

        // The active SPS for the following picture timing messages.
        self.set_last_sps(seq_parameter_set_id);

        Ok(bp)
    }

    fn last_sps_for(&self, what: &str) -> ParseResult<Rc<Sps>> {
        self.last_sps().cloned().ok_or_else(|| {
            ParseError::BrokenLink(format!("{what} without an active SPS"))
        })
    }

    fn parse_sei_payload(
        &mut self,
        r: &mut NaluReader,
        payload_type: u32,
        payload_size: usize,
    ) -> ParseResult<SeiMessage> {
        let Some(known) = SeiPayloadType::n(payload_type) else {
            log::debug!("Keeping unhandled SEI payload type {payload_type}");
            return Ok(SeiMessage::Unhandled {
                payload_type,
                payload: read_bytes(r, payload_size)?,
            });
        };

        let message = match known {
            SeiPayloadType::BufferingPeriod => {
                SeiMessage::BufferingPeriod(self.parse_buffering_period(r)?)
            }
            SeiPayloadType::PicTiming => {
                let sps = self.last_sps_for("picture timing")?;
                SeiMessage::PicTiming(parse_pic_timing(r, &sps)?)
            }
            SeiPayloadType::RegisteredUserData => {
                SeiMessage::RegisteredUserData(parse_registered_user_data(r, payload_size)?)
            }
            SeiPayloadType::UnregisteredUserData => {
                SeiMessage::UnregisteredUserData(parse_unregistered_user_data(r, payload_size)?)
            }
            SeiPayloadType::RecoveryPoint => {
                let sps = self.last_sps_for("recovery point")?;
                let rp = RecoveryPoint {
                    recovery_frame_cnt: r.read_ue_max(sps.max_frame_num - 1)?,
                    exact_match_flag: r.read_bit()?,
                    broken_link_flag: r.read_bit()?,
                    changing_slice_group_idc: r.read_bits(2)?,
                };
                SeiMessage::RecoveryPoint(rp)
            }
            SeiPayloadType::StereoVideoInfo => {
                SeiMessage::StereoVideoInfo(parse_stereo_video_info(r)?)
            }
            SeiPayloadType::FramePacking => SeiMessage::FramePacking(parse_frame_packing(r)?),
            SeiPayloadType::MasteringDisplayColourVolume => {
                SeiMessage::MasteringDisplayColourVolume(parse_mastering_display_colour_volume(
                    r,
                )?)
            }
            SeiPayloadType::ContentLightLevel => SeiMessage::ContentLightLevel(ContentLightLevel {
                max_content_light_level: r.read_bits(16)?,
                max_pic_average_light_level: r.read_bits(16)?,
            }),
        };

        Ok(message)
    }

    /// Parses the messages of an SEI NAL unit into `messages`.
    ///
    /// Messages are appended as they are decoded: when a message fails to
    /// parse, the error is returned and the messages before it are kept.
    /// Picture timing and recovery point messages are decoded against the
    /// last SPS of the store. A buffering period message selects its SPS as
    /// the last one.
    pub fn parse_sei(&mut self, nalu: &Nalu, messages: &mut Vec<SeiMessage>) -> ParseResult<()> {
        if nalu.header.type_ != NaluType::Sei {
            return Err(ParseError::BrokenData(format!(
                "expected a SEI NAL unit, got {:?}",
                nalu.header.type_
            )));
        }

        let mut r = NaluReader::new(nalu.payload(), true);

        while r.has_more_rsbp_data() {
            let payload_type = read_ff_coded(&mut r)?;
            let payload_size = read_ff_coded(&mut r)? as usize;

            let declared_bits = payload_size as u64 * 8;
            if declared_bits > r.num_bits_left() as u64 {
                return Err(ParseError::BrokenData(format!(
                    "SEI payload type {payload_type} of {payload_size} bytes is truncated"
                )));
            }

            let start = r.position();
            let message = self.parse_sei_payload(&mut r, payload_type, payload_size)?;

            if !r.is_byte_aligned() {
                if !r.read_bit()? {
                    log::warn!("SEI payload type {payload_type}: bit_equal_to_one is 0");
                }
                while !r.is_byte_aligned() {
                    r.skip_bits(1)?;
                }
            }

            let consumed = r.position() - start;
            if consumed < declared_bits {
                r.skip_bits((declared_bits - consumed) as usize)?;
            } else if consumed > declared_bits {
                log::warn!(
                    "SEI payload type {payload_type} used {consumed} bits, {declared_bits} declared"
                );
            }

            messages.push(message);
        }

        Ok(())
    }
}
