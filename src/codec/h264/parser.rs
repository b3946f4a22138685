// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameter set and slice header decoding.
//!
//! [`Parser`] is the parameter set store: it keeps the last SPS and PPS seen
//! for every id and resolves the references slices and SEI messages make to
//! them.

use std::rc::Rc;

use enumn::N;
use thiserror::Error;

use crate::codec::h264::nalu::Nalu;
use crate::codec::h264::nalu::NaluHeaderExtension;
use crate::codec::h264::nalu::NaluType;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::nalu_reader::ReadBitsError;

pub const DEFAULT_4X4_INTRA: [u8; 16] = [
    6, 13, 13, 20, 20, 20, 28, 28, 28, 28, 32, 32, 32, 37, 37, 42,
];

pub const DEFAULT_4X4_INTER: [u8; 16] = [
    10, 14, 14, 20, 20, 20, 24, 24, 24, 24, 27, 27, 27, 30, 30, 34,
];

pub const DEFAULT_8X8_INTRA: [u8; 64] = [
    6, 10, 10, 13, 11, 13, 16, 16, 16, 16, 18, 18, 18, 18, 18, 23, 23, 23, 23, 23, 23, 25, 25, 25,
    25, 25, 25, 25, 27, 27, 27, 27, 27, 27, 27, 27, 29, 29, 29, 29, 29, 29, 29, 31, 31, 31, 31, 31,
    31, 33, 33, 33, 33, 33, 36, 36, 36, 36, 38, 38, 38, 40, 40, 42,
];

pub const DEFAULT_8X8_INTER: [u8; 64] = [
    9, 13, 13, 15, 13, 15, 17, 17, 17, 17, 19, 19, 19, 19, 19, 21, 21, 21, 21, 21, 21, 22, 22, 22,
    22, 22, 22, 22, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 27, 27, 27, 27, 27,
    27, 28, 28, 28, 28, 28, 30, 30, 30, 30, 32, 32, 32, 33, 33, 35,
];

/// Raster position of each coefficient of a 4x4 list in zigzag order.
const ZIGZAG_4X4: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// Raster position of each coefficient of an 8x8 list in zigzag order.
const ZIGZAG_8X8: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27, 20,
    13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58, 59,
    52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

pub const MAX_PPS_COUNT: usize = 256;
pub const MAX_SPS_COUNT: usize = 32;

/// The maximum number of pictures in the DPB, as per A.3.1, clause h)
pub const DPB_MAX_SIZE: usize = 16;

/// Upper bound on the memory management operations of a single slice header.
pub const MAX_MMCO_COUNT: usize = 66;

/// Upper bound on the entries of a reference picture list modification, end
/// marker excluded.
pub const MAX_REF_PIC_LIST_MODIFICATIONS: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no NAL unit found")]
    NoNalFound,
    #[error("NAL unit at {sc_offset} has no end in this buffer")]
    NalStartFoundNoEnd { sc_offset: usize },
    #[error("broken data: {0}")]
    BrokenData(String),
    #[error("broken link: {0}")]
    BrokenLink(String),
    #[error(transparent)]
    ReadBits(#[from] ReadBitsError),
    #[error("unsupported syntax: {0}")]
    Unsupported(&'static str),
}

pub type ParseResult<T> = Result<T, ParseError>;

fn zigzag_to_raster<const N: usize>(scan: &[usize; N], list: &[u8; N]) -> [u8; N] {
    let mut out = [0; N];
    for (coef, &pos) in list.iter().zip(scan.iter()) {
        out[pos] = *coef;
    }
    out
}

fn raster_to_zigzag<const N: usize>(scan: &[usize; N], list: &[u8; N]) -> [u8; N] {
    let mut out = [0; N];
    for (coef, &pos) in out.iter_mut().zip(scan.iter()) {
        *coef = list[pos];
    }
    out
}

/// Converts a 4x4 scaling list from bitstream (zigzag) order to raster order.
pub fn scaling_list_4x4_to_raster(list: &[u8; 16]) -> [u8; 16] {
    zigzag_to_raster(&ZIGZAG_4X4, list)
}

/// Converts a 4x4 scaling list from raster order to bitstream (zigzag) order.
pub fn scaling_list_4x4_to_zigzag(list: &[u8; 16]) -> [u8; 16] {
    raster_to_zigzag(&ZIGZAG_4X4, list)
}

/// Converts an 8x8 scaling list from bitstream (zigzag) order to raster order.
pub fn scaling_list_8x8_to_raster(list: &[u8; 64]) -> [u8; 64] {
    zigzag_to_raster(&ZIGZAG_8X8, list)
}

/// Converts an 8x8 scaling list from raster order to bitstream (zigzag) order.
pub fn scaling_list_8x8_to_zigzag(list: &[u8; 64]) -> [u8; 64] {
    raster_to_zigzag(&ZIGZAG_8X8, list)
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect<T> {
    pub min: Point<T>,
    pub max: Point<T>,
}

/// Representation of `MaxLongTermFrameIdx`.
///
/// `MaxLongTermFrameIdx` is derived from `max_long_term_frame_idx_plus1`, an unsigned integer with
/// a special value indicating "no long-term frame indices". This type allows easy conversion
/// between the actual and "plus1" representation, while ensuring that the special value is always
/// handled by the code.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MaxLongTermFrameIdx {
    #[default]
    NoLongTermFrameIndices,
    Idx(u32),
}

impl MaxLongTermFrameIdx {
    /// Create a value from `max_long_term_frame_idx_plus1`.
    pub fn from_value_plus1(max_long_term_frame_idx_plus1: u32) -> Self {
        match max_long_term_frame_idx_plus1 {
            0 => Self::NoLongTermFrameIndices,
            i @ 1.. => Self::Idx(i - 1),
        }
    }

    /// Convert this value to the representation used by `max_long_term_frame_idx_plus1`.
    pub fn to_value_plus1(self) -> u32 {
        match self {
            Self::NoLongTermFrameIndices => 0,
            Self::Idx(i) => i + 1,
        }
    }
}

impl PartialEq<u32> for MaxLongTermFrameIdx {
    fn eq(&self, other: &u32) -> bool {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => false,
            MaxLongTermFrameIdx::Idx(idx) => idx.eq(other),
        }
    }
}

impl PartialOrd<u32> for MaxLongTermFrameIdx {
    fn partial_cmp(&self, other: &u32) -> Option<std::cmp::Ordering> {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => Some(std::cmp::Ordering::Less),
            MaxLongTermFrameIdx::Idx(idx) => Some(idx.cmp(other)),
        }
    }
}

/// slice_type, modulo 5. See table 7-6.
#[derive(N, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceType {
    #[default]
    P = 0,
    B = 1,
    I = 2,
    Sp = 3,
    Si = 4,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-6 in the specification.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-6 in the specification.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-6 in the specification.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }

    /// Whether this is a SP slice. See table 7-6 in the specification.
    pub fn is_sp(&self) -> bool {
        matches!(self, SliceType::Sp)
    }

    /// Whether this is a SI slice. See table 7-6 in the specification.
    pub fn is_si(&self) -> bool {
        matches!(self, SliceType::Si)
    }
}

/// Well known values of profile_idc.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Profile {
    Cavlc444Intra = 44,
    Baseline = 66,
    Main = 77,
    ScalableBaseline = 83,
    ScalableHigh = 86,
    Extended = 88,
    High = 100,
    High10 = 110,
    MultiviewHigh = 118,
    High422P = 122,
    StereoHigh = 128,
    MfcHigh = 134,
    MfcDepthHigh = 135,
    MultiviewDepthHigh = 138,
    EnhancedMultiviewDepthHigh = 139,
    /// The High 4:4:4 profile, removed from later revisions of H.264 but still
    /// signalled by decoder configuration records.
    High444 = 144,
    High444P = 244,
}

impl Profile {
    /// Whether an SPS with this profile_idc carries the chroma format, bit
    /// depth and scaling matrix fields.
    pub fn has_chroma_info(profile_idc: u8) -> bool {
        matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        )
    }
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    #[default]
    L1 = 10,
    L1B = 9,
    L1_1 = 11,
    L1_2 = 12,
    L1_3 = 13,
    L2_0 = 20,
    L2_1 = 21,
    L2_2 = 22,
    L3 = 30,
    L3_1 = 31,
    L3_2 = 32,
    L4 = 40,
    L4_1 = 41,
    L4_2 = 42,
    L5 = 50,
    L5_1 = 51,
    L5_2 = 52,
    L6 = 60,
    L6_1 = 61,
    L6_2 = 62,
}

impl Level {
    /// Decodes a level_idc value.
    pub fn from_idc(level_idc: u8) -> ParseResult<Self> {
        Level::n(level_idc)
            .ok_or_else(|| ParseError::BrokenData(format!("unknown level_idc {level_idc}")))
    }

    /// MaxDpbMbs of table A-1.
    fn max_dpb_mbs(&self) -> u32 {
        match self {
            Level::L1 | Level::L1B => 396,
            Level::L1_1 => 900,
            Level::L1_2 | Level::L1_3 | Level::L2_0 => 2376,
            Level::L2_1 => 4752,
            Level::L2_2 | Level::L3 => 8100,
            Level::L3_1 => 18000,
            Level::L3_2 => 20480,
            Level::L4 | Level::L4_1 => 32768,
            Level::L4_2 => 34816,
            Level::L5 => 110400,
            Level::L5_1 | Level::L5_2 => 184320,
            Level::L6 | Level::L6_1 | Level::L6_2 => 696320,
        }
    }
}

/// Picture order count configuration of an SPS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PicOrderCnt {
    Type0 {
        log2_max_pic_order_cnt_lsb_minus4: u8,
    },
    Type1 {
        delta_pic_order_always_zero_flag: bool,
        offset_for_non_ref_pic: i32,
        offset_for_top_to_bottom_field: i32,
        /// One entry per reference frame of the POC cycle.
        offset_for_ref_frame: Vec<i32>,
        /// ExpectedDeltaPerPicOrderCntCycle, (7-12) in the specification.
        expected_delta_per_pic_order_cnt_cycle: i32,
    },
    Type2,
}

impl Default for PicOrderCnt {
    fn default() -> Self {
        PicOrderCnt::Type0 {
            log2_max_pic_order_cnt_lsb_minus4: 0,
        }
    }
}

impl PicOrderCnt {
    pub fn pic_order_cnt_type(&self) -> u8 {
        match self {
            PicOrderCnt::Type0 { .. } => 0,
            PicOrderCnt::Type1 { .. } => 1,
            PicOrderCnt::Type2 => 2,
        }
    }
}

/// Frame cropping offsets, in crop units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCropping {
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpbSpec {
    /// Together with bit_rate_scale, specifies the maximum input bit rate of
    /// this CPB when the CPB operates at the access unit level.
    pub bit_rate_value_minus1: u32,
    /// Together with cpb_size_scale, specifies the CPB size of this CPB.
    pub cpb_size_value_minus1: u32,
    /// false specifies that to decode this bitstream by the HRD using this CPB
    /// specification, the hypothetical stream delivery scheduler (HSS)
    /// operates in an intermittent bit rate mode. true specifies that the HSS
    /// operates in a constant bit rate (CBR) mode
    pub cbr_flag: bool,
}

/// hrd_parameters(), see E.1.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HrdParams {
    /// Together with bit_rate_value_minus1, specifies the maximum input bit
    /// rate of each CPB.
    pub bit_rate_scale: u8,
    /// Together with cpb_size_value_minus1, specifies the CPB size of each CPB.
    pub cpb_size_scale: u8,
    /// One entry per alternative CPB specification, cpb_cnt_minus1 + 1 of them.
    pub cpb_specs: Vec<CpbSpec>,

    /// Specifies the length in bits of the initial_cpb_removal_delay and
    /// initial_cpb_removal_delay_offset syntax elements.
    pub initial_cpb_removal_delay_length_minus1: u8,
    /// Specifies the length in bits of the cpb_removal_delay syntax element.
    pub cpb_removal_delay_length_minus1: u8,
    /// Specifies the length in bits of the dpb_output_delay syntax element.
    pub dpb_output_delay_length_minus1: u8,
    /// If greater than 0, specifies the length in bits of the time_offset
    /// syntax element. Equal to 0 specifies that the time_offset syntax element
    /// is not present
    pub time_offset_length: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AspectRatioInfo {
    pub aspect_ratio_idc: u8,
    /// Horizontal size of the sample aspect ratio. Taken from table E-1
    /// unless aspect_ratio_idc is Extended_SAR.
    pub sar_width: u16,
    /// Vertical size of the sample aspect ratio.
    pub sar_height: u16,
}

impl AspectRatioInfo {
    pub const EXTENDED_SAR: u8 = 255;

    /// Sample aspect ratio of table E-1, (0, 0) when unspecified or reserved.
    pub fn table_sar(aspect_ratio_idc: u8) -> (u16, u16) {
        const SAR: [(u16, u16); 17] = [
            (0, 0),
            (1, 1),
            (12, 11),
            (10, 11),
            (16, 11),
            (40, 33),
            (24, 11),
            (20, 11),
            (32, 11),
            (80, 33),
            (18, 11),
            (15, 11),
            (64, 33),
            (160, 99),
            (4, 3),
            (3, 2),
            (2, 1),
        ];

        SAR.get(usize::from(aspect_ratio_idc))
            .copied()
            .unwrap_or((0, 0))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoSignalType {
    /// Indicates the representation of the pictures as specified in Table E-2,
    /// before being coded in accordance with this Recommendation |
    /// International Standard.
    pub video_format: u8,
    /// Indicates the black level and range of the luma and chroma signals as
    /// derived from E′Y, E′PB, and E′PR or E′R, E′G, and E′B real-valued
    /// component signals.
    pub video_full_range_flag: bool,
    pub colour_description: Option<ColourDescription>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChromaLocInfo {
    pub chroma_sample_loc_type_top_field: u8,
    pub chroma_sample_loc_type_bottom_field: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimingInfo {
    /// The number of time units of a clock operating at the frequency
    /// time_scale Hz that corresponds to one increment (called a clock tick)
    /// of a clock tick counter.
    pub num_units_in_tick: u32,
    /// The number of time units that pass in one second.
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitstreamRestriction {
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    /// Indicates an upper bound for the number of frames buffers, in the
    /// decoded picture buffer (DPB), that are required for storing frames,
    /// complementary field pairs, and non-paired fields before output.
    pub max_num_reorder_frames: u32,
    /// Specifies the required size of the HRD decoded picture buffer (DPB) in
    /// units of frame buffers.
    pub max_dec_frame_buffering: u32,
}

/// vui_parameters(), see E.1.1. Every optional group of the syntax is an
/// `Option`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VuiParams {
    pub aspect_ratio_info: Option<AspectRatioInfo>,
    /// Present when overscan_info_present_flag is set.
    pub overscan_appropriate_flag: Option<bool>,
    pub video_signal_type: Option<VideoSignalType>,
    pub chroma_loc_info: Option<ChromaLocInfo>,
    pub timing_info: Option<TimingInfo>,
    pub nal_hrd_parameters: Option<HrdParams>,
    pub vcl_hrd_parameters: Option<HrdParams>,
    /// Only meaningful when either HRD block is present.
    pub low_delay_hrd_flag: bool,
    /// Whether picture timing SEI messages carry pic_struct.
    pub pic_struct_present_flag: bool,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

impl VuiParams {
    /// The HRD block whose delay lengths govern buffering period and picture
    /// timing SEI messages, NAL first.
    pub fn hrd_parameters(&self) -> Option<&HrdParams> {
        self.nal_hrd_parameters
            .as_ref()
            .or(self.vcl_hrd_parameters.as_ref())
    }
}

/// Inter-view dependencies of one view, G.7.3.2.1.4.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvcView {
    pub view_id: u16,
    pub anchor_refs_l0: Vec<u16>,
    pub anchor_refs_l1: Vec<u16>,
    pub non_anchor_refs_l0: Vec<u16>,
    pub non_anchor_refs_l1: Vec<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvcApplicableOp {
    pub temporal_id: u8,
    pub target_view_ids: Vec<u16>,
    pub num_views_minus1: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvcLevelValue {
    pub level_idc: u8,
    pub applicable_ops: Vec<MvcApplicableOp>,
}

/// seq_parameter_set_mvc_extension().
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvcSpsExtension {
    /// num_views_minus1 + 1 entries. The base view carries no references.
    pub views: Vec<MvcView>,
    pub level_values: Vec<MvcLevelValue>,
}

/// The extension carried by a subset SPS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpsExtension {
    Mvc(MvcSpsExtension),
}

/// A H264 Sequence Parameter Set. A syntax structure containing syntax elements
/// that apply to zero or more entire coded video sequences as determined by the
/// content of a seq_parameter_set_id syntax element found in the picture
/// parameter set referred to by the pic_parameter_set_id syntax element found
/// in each slice header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    /// Identifies the sequence parameter set that is referred to by the picture
    /// parameter set
    pub seq_parameter_set_id: u8,

    /// Profile to which the coded video sequence conforms
    pub profile_idc: u8,

    /// Retains the same meaning as in the specification. See 7.4.2.1.1
    pub constraint_set0_flag: bool,
    /// Retains the same meaning as in the specification. See 7.4.2.1.1
    pub constraint_set1_flag: bool,
    /// Retains the same meaning as in the specification. See 7.4.2.1.1
    pub constraint_set2_flag: bool,
    /// Retains the same meaning as in the specification. See 7.4.2.1.1
    pub constraint_set3_flag: bool,
    /// Retains the same meaning as in the specification. See 7.4.2.1.1
    pub constraint_set4_flag: bool,
    /// Retains the same meaning as in the specification. See 7.4.2.1.1
    pub constraint_set5_flag: bool,

    /// Level to which the coded video sequence conforms
    pub level_idc: Level,

    /// Specifies the chroma sampling relative to the luma sampling as specified
    /// in clause 6.2. Inferred to be 1 for profiles without chroma info.
    pub chroma_format_idc: u8,

    /// If true, specifies that the three colour components of the 4:4:4 chroma
    /// format are coded separately.
    pub separate_colour_plane_flag: bool,

    /// Specifies the bit depth of the samples of the luma array and the value
    /// of the luma quantization parameter range offset QpBdOffsetY.
    pub bit_depth_luma_minus8: u8,

    /// Specifies the bit depth of the samples of the chroma arrays and the
    /// value of the chroma quantization parameter range offset QpBdOffsetC.
    pub bit_depth_chroma_minus8: u8,

    /// qpprime_y_zero_transform_bypass_flag equal to 1 specifies that, when
    /// QP′Y is equal to 0, a transform bypass operation for the transform
    /// coefficient decoding process and picture construction process prior to
    /// deblocking filter process as specified in clause 8.5 shall be applied.
    pub qpprime_y_zero_transform_bypass_flag: bool,

    /// Whether `seq_scaling_list_present_flag[i]` for i = 0..7 or i = 0..11
    /// is present or whether the sequence level scaling list shall be
    /// Flat_4x4_16 and Flat_8x8_16.
    pub seq_scaling_matrix_present_flag: bool,

    /// 4x4 Scaling list as read with 7.3.2.1.1.1, in zigzag order, fallback
    /// rules applied.
    pub scaling_lists_4x4: [[u8; 16]; 6],
    /// 8x8 Scaling list as read with 7.3.2.1.1.1, in zigzag order, fallback
    /// rules applied.
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Specifies the value of the variable MaxFrameNum that is used in
    /// frame_num related derivations as follows: MaxFrameNum = 2 ^
    /// (log2_max_frame_num_minus4 + 4 )
    pub log2_max_frame_num_minus4: u8,

    pub pic_order_cnt: PicOrderCnt,

    /// Specifies the maximum number of short-term and long-term reference
    /// frames, complementary reference field pairs, and non-paired reference
    /// fields that may be used by the decoding process for inter prediction of
    /// any picture in the coded video sequence.
    pub max_num_ref_frames: u8,

    /// Specifies the allowed values of frame_num as specified in clause 7.4.3
    /// and the decoding process in case of an inferred gap between values of
    /// frame_num as specified in clause 8.2.5.2
    pub gaps_in_frame_num_value_allowed_flag: bool,

    /// Plus 1 specifies the width of each decoded picture in units of
    /// macroblocks.
    pub pic_width_in_mbs_minus1: u16,
    /// Plus 1 specifies the height in slice group map units of a decoded frame
    /// or field.
    pub pic_height_in_map_units_minus1: u16,

    /// If true,  specifies that every coded picture of the coded video sequence
    /// is a coded frame containing only frame macroblocks, else specifies that
    /// coded pictures of the coded video sequence may either be coded fields or
    /// coded frames.
    pub frame_mbs_only_flag: bool,

    /// If true, specifies the possible use of switching between frame and
    /// field macroblocks within frames, else, specifies no switching between
    /// frame and field macroblocks within a picture.
    pub mb_adaptive_frame_field_flag: bool,

    /// Specifies the method used in the derivation process for luma motion
    /// vectors for B_Skip, B_Direct_16x16 and B_8x8 as specified in clause
    /// 8.4.1.2.
    pub direct_8x8_inference_flag: bool,

    /// Present when frame_cropping_flag is set.
    pub frame_cropping: Option<FrameCropping>,

    /// Present when vui_parameters_present_flag is set.
    pub vui_parameters: Option<VuiParams>,

    /// Only set for subset SPS units.
    pub extension: Option<SpsExtension>,

    /// Coded width in luma samples. (7-13) through (7-17).
    pub width: u32,
    /// Coded height in luma samples.
    pub height: u32,
    /// The visible area of the coded picture, cropping applied.
    pub crop_rect: Rect<u32>,
    /// MaxFrameNum, (7-10).
    pub max_frame_num: u32,
    /// ChromaArrayType.
    pub chroma_array_type: u8,
}

impl Sps {
    /// Returns `SubWidthC` and `SubHeightC`.
    ///
    /// See table 6-1 in the specification.
    fn sub_width_height_c(&self) -> (u32, u32) {
        match (self.chroma_format_idc, self.separate_colour_plane_flag) {
            (1, false) => (2, 2),
            (2, false) => (2, 1),
            (3, false) => (1, 1),
            // undefined.
            _ => (1, 1),
        }
    }

    /// Returns `CropUnitX` and `CropUnitY`.
    ///
    /// See 7-19 through 7-22 in the specification.
    fn crop_unit_x_y(&self) -> (u32, u32) {
        match self.chroma_array_type {
            0 => (1, 2 - u32::from(self.frame_mbs_only_flag)),
            _ => {
                let (sub_width_c, sub_height_c) = self.sub_width_height_c();
                (
                    sub_width_c,
                    sub_height_c * (2 - u32::from(self.frame_mbs_only_flag)),
                )
            }
        }
    }

    fn visible_rectangle(&self) -> ParseResult<Rect<u32>> {
        let Some(crop) = &self.frame_cropping else {
            return Ok(Rect {
                min: Point { x: 0, y: 0 },
                max: Point {
                    x: self.width,
                    y: self.height,
                },
            });
        };

        let (crop_unit_x, crop_unit_y) = self.crop_unit_x_y();

        let crop_window = |offset_a: u32, offset_b: u32, unit: u32, size: u32| {
            let a = offset_a.checked_mul(unit)?;
            let b = offset_b.checked_mul(unit)?;
            // The visible area must keep at least one sample.
            let end = size.checked_sub(b)?;
            (a < end).then_some((a, end))
        };

        let (min_x, max_x) = crop_window(
            crop.frame_crop_left_offset,
            crop.frame_crop_right_offset,
            crop_unit_x,
            self.width,
        )
        .ok_or_else(|| ParseError::BrokenData("invalid frame crop width".into()))?;

        let (min_y, max_y) = crop_window(
            crop.frame_crop_top_offset,
            crop.frame_crop_bottom_offset,
            crop_unit_y,
            self.height,
        )
        .ok_or_else(|| ParseError::BrokenData("invalid frame crop height".into()))?;

        Ok(Rect {
            min: Point { x: min_x, y: min_y },
            max: Point { x: max_x, y: max_y },
        })
    }

    /// Computes the cached derived values. Fails if the cropping window does
    /// not fit the coded picture.
    fn compute_derived(&mut self) -> ParseResult<()> {
        self.chroma_array_type = match self.separate_colour_plane_flag {
            false => self.chroma_format_idc,
            true => 0,
        };
        self.max_frame_num = 1 << (u32::from(self.log2_max_frame_num_minus4) + 4);
        self.width = (u32::from(self.pic_width_in_mbs_minus1) + 1) * 16;
        self.height = (u32::from(self.pic_height_in_map_units_minus1) + 1)
            * 16
            * (2 - u32::from(self.frame_mbs_only_flag));
        self.crop_rect = self.visible_rectangle()?;

        Ok(())
    }

    pub fn pic_width_in_mbs(&self) -> u32 {
        u32::from(self.pic_width_in_mbs_minus1) + 1
    }

    /// PicSizeInMapUnits, (7-18).
    pub fn pic_size_in_map_units(&self) -> u64 {
        u64::from(self.pic_width_in_mbs()) * (u64::from(self.pic_height_in_map_units_minus1) + 1)
    }

    /// The bit depth of luma samples.
    pub fn bit_depth_luma(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }

    /// The bit depth of chroma samples.
    pub fn bit_depth_chroma(&self) -> u8 {
        self.bit_depth_chroma_minus8 + 8
    }

    pub fn profile(&self) -> Option<Profile> {
        Profile::n(self.profile_idc)
    }

    fn bitstream_restriction(&self) -> Option<&BitstreamRestriction> {
        self.vui_parameters.as_ref()?.bitstream_restriction.as_ref()
    }

    /// The number of frames the DPB must hold for this sequence. See A.3.1
    /// and A.3.2.
    pub fn max_dpb_frames(&self) -> usize {
        if let Some(restriction) = self.bitstream_restriction() {
            return std::cmp::max(1, restriction.max_dec_frame_buffering as usize);
        }

        let profile = self.profile_idc;
        let mut level = self.level_idc;

        // A.3.1 and A.3.2: Level 1b for Baseline, Constrained Baseline and Main
        // profile if level_idc == 11 and constraint_set3_flag == 1
        if matches!(level, Level::L1_1)
            && (profile == Profile::Baseline as u8 || profile == Profile::Main as u8)
            && self.constraint_set3_flag
        {
            level = Level::L1B;
        };

        let width_mb = u64::from(self.width / 16);
        let height_mb = u64::from(self.height / 16);
        let frame_mbs = std::cmp::max(1, width_mb * height_mb);

        let max_dpb_frames = std::cmp::min(
            u64::from(level.max_dpb_mbs()) / frame_mbs,
            DPB_MAX_SIZE as u64,
        ) as usize;

        std::cmp::max(max_dpb_frames, usize::from(self.max_num_ref_frames))
    }

    pub fn max_num_order_frames(&self) -> u32 {
        if let Some(restriction) = self.bitstream_restriction() {
            return restriction.max_num_reorder_frames;
        }

        if matches!(self.profile_idc, 44 | 86 | 100 | 110 | 122 | 244) && self.constraint_set3_flag
        {
            0
        } else {
            self.max_dpb_frames() as u32
        }
    }

    /// Frame rate as a `(numerator, denominator)` pair, derived from the VUI
    /// timing information.
    ///
    /// `pic_struct`, when known from a picture timing SEI message, selects the
    /// number of field periods a picture lasts. Otherwise a field picture
    /// lasts one field period and a frame two.
    pub fn framerate(&self, field_pic: bool, pic_struct: Option<u8>) -> Option<(u32, u32)> {
        // Field periods per picture, indexed by pic_struct. See table E-6.
        const FIELD_PERIODS: [u32; 9] = [2, 1, 1, 2, 2, 3, 3, 4, 6];

        let timing = self.vui_parameters.as_ref()?.timing_info.as_ref()?;

        let periods = match pic_struct {
            Some(pic_struct) => *FIELD_PERIODS.get(usize::from(pic_struct))?,
            None if field_pic => 1,
            None => 2,
        };

        let den = timing.num_units_in_tick.checked_mul(periods)?;
        if den == 0 || timing.time_scale == 0 {
            return None;
        }

        Some((timing.time_scale, den))
    }
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            seq_parameter_set_id: Default::default(),
            profile_idc: Default::default(),
            constraint_set0_flag: Default::default(),
            constraint_set1_flag: Default::default(),
            constraint_set2_flag: Default::default(),
            constraint_set3_flag: Default::default(),
            constraint_set4_flag: Default::default(),
            constraint_set5_flag: Default::default(),
            level_idc: Default::default(),
            chroma_format_idc: 1,
            separate_colour_plane_flag: Default::default(),
            bit_depth_luma_minus8: Default::default(),
            bit_depth_chroma_minus8: Default::default(),
            qpprime_y_zero_transform_bypass_flag: Default::default(),
            seq_scaling_matrix_present_flag: Default::default(),
            scaling_lists_4x4: [[16; 16]; 6],
            scaling_lists_8x8: [[16; 64]; 6],
            log2_max_frame_num_minus4: Default::default(),
            pic_order_cnt: Default::default(),
            max_num_ref_frames: Default::default(),
            gaps_in_frame_num_value_allowed_flag: Default::default(),
            pic_width_in_mbs_minus1: Default::default(),
            pic_height_in_map_units_minus1: Default::default(),
            frame_mbs_only_flag: true,
            mb_adaptive_frame_field_flag: Default::default(),
            direct_8x8_inference_flag: Default::default(),
            frame_cropping: Default::default(),
            vui_parameters: Default::default(),
            extension: Default::default(),
            width: 16,
            height: 16,
            crop_rect: Rect {
                min: Point { x: 0, y: 0 },
                max: Point { x: 16, y: 16 },
            },
            max_frame_num: 16,
            chroma_array_type: 1,
        }
    }
}

#[derive(Default)]
pub struct SpsBuilder(Sps);

impl SpsBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn seq_parameter_set_id(mut self, value: u8) -> Self {
        self.0.seq_parameter_set_id = value;
        self
    }

    pub fn profile_idc(mut self, value: Profile) -> Self {
        self.0.profile_idc = value as u8;
        self
    }

    pub fn level_idc(mut self, value: Level) -> Self {
        self.0.level_idc = value;
        self
    }

    pub fn chroma_format_idc(mut self, value: u8) -> Self {
        self.0.chroma_format_idc = value;
        self
    }

    /// Sets the coded size in macroblocks and crops it down to `width` x
    /// `height` luma samples. Assumes 4:2:0 frame coding.
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        const MB_SIZE: u32 = 16;

        let mb_width = (width + MB_SIZE - 1) / MB_SIZE;
        let mb_height = (height + MB_SIZE - 1) / MB_SIZE;
        self.0.pic_width_in_mbs_minus1 = (mb_width - 1) as u16;
        self.0.pic_height_in_map_units_minus1 = (mb_height - 1) as u16;

        let right = (mb_width * MB_SIZE - width) / 2;
        let bottom = (mb_height * MB_SIZE - height) / 2;
        self.0.frame_cropping = (right != 0 || bottom != 0).then_some(FrameCropping {
            frame_crop_right_offset: right,
            frame_crop_bottom_offset: bottom,
            ..Default::default()
        });

        self
    }

    pub fn max_num_ref_frames(mut self, value: u8) -> Self {
        self.0.max_num_ref_frames = value;
        self
    }

    pub fn frame_mbs_only_flag(mut self, value: bool) -> Self {
        self.0.frame_mbs_only_flag = value;
        self
    }

    pub fn direct_8x8_inference_flag(mut self, value: bool) -> Self {
        self.0.direct_8x8_inference_flag = value;
        self
    }

    pub fn log2_max_frame_num_minus4(mut self, value: u8) -> Self {
        self.0.log2_max_frame_num_minus4 = value;
        self
    }

    pub fn pic_order_cnt(mut self, value: PicOrderCnt) -> Self {
        self.0.pic_order_cnt = value;
        self
    }

    /// Sets explicit scaling lists, given in zigzag order.
    pub fn scaling_lists(mut self, lists_4x4: [[u8; 16]; 6], lists_8x8: [[u8; 64]; 6]) -> Self {
        self.0.seq_scaling_matrix_present_flag = true;
        self.0.scaling_lists_4x4 = lists_4x4;
        self.0.scaling_lists_8x8 = lists_8x8;
        self
    }

    pub fn vui_parameters(mut self, value: VuiParams) -> Self {
        self.0.vui_parameters = Some(value);
        self
    }

    pub fn timing_info(mut self, num_units_in_tick: u32, time_scale: u32, fixed: bool) -> Self {
        let vui = self.0.vui_parameters.get_or_insert_with(Default::default);
        vui.timing_info = Some(TimingInfo {
            num_units_in_tick,
            time_scale,
            fixed_frame_rate_flag: fixed,
        });
        self
    }

    pub fn build(mut self) -> ParseResult<Rc<Sps>> {
        self.0.compute_derived()?;
        Ok(Rc::new(self.0))
    }
}

/// The group change patterns of slice group map types 3 to 5.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceGroupChangeType {
    BoxOut = 3,
    RasterScan = 4,
    Wipe = 5,
}

/// The slice group map of a PPS, one variant per payload shape of
/// slice_group_map_type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SliceGroupMap {
    /// Type 0, one run length per slice group.
    Interleaved { run_length_minus1: Vec<u32> },
    /// Type 1.
    Dispersed,
    /// Type 2, one rectangle per slice group but the last one.
    Foreground {
        top_left: Vec<u32>,
        bottom_right: Vec<u32>,
    },
    /// Types 3 to 5.
    Changing {
        change_type: SliceGroupChangeType,
        slice_group_change_direction_flag: bool,
        slice_group_change_rate_minus1: u32,
    },
    /// Type 6, the slice group of every map unit.
    Explicit { slice_group_id: Vec<u8> },
}

impl SliceGroupMap {
    pub fn slice_group_map_type(&self) -> u8 {
        match self {
            SliceGroupMap::Interleaved { .. } => 0,
            SliceGroupMap::Dispersed => 1,
            SliceGroupMap::Foreground { .. } => 2,
            SliceGroupMap::Changing { change_type, .. } => *change_type as u8,
            SliceGroupMap::Explicit { .. } => 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceGroups {
    /// Plus 1 specifies the number of slice groups for a picture. Greater
    /// than 0.
    pub num_slice_groups_minus1: u8,
    pub map: SliceGroupMap,
}

/// A H264 Picture Parameter Set. A syntax structure containing syntax elements
/// that apply to zero or more entire coded pictures as determined by the
/// `pic_parameter_set_id` syntax element found in each slice header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    /// Identifies the picture parameter set that is referred to in the slice header.
    pub pic_parameter_set_id: u8,

    /// Refers to the active sequence parameter set. The SPS is looked up in
    /// the [`Parser`] by this id every time it is needed.
    pub seq_parameter_set_id: u8,

    /// Selects the entropy decoding method to be applied for the syntax
    /// elements for which two descriptors appear in the syntax tables as
    /// follows: If `entropy_coding_mode_flag` is false, the method specified by
    /// the left descriptor in the syntax table is applied (Exp-Golomb coded,
    /// see clause 9.1 or CAVLC, see clause 9.2). Otherwise
    /// (`entropy_coding_mode_flag` is true), the method specified by the right
    /// descriptor in the syntax table is applied (CABAC, see clause 9.3).
    pub entropy_coding_mode_flag: bool,

    /// If true, specifies that the syntax elements delta_pic_order_cnt_bottom
    /// (when `pic_order_cnt_type` is 0) or `delta_pic_order_cnt[1]` (when
    /// `pic_order_cnt_type` is 1), which are related to picture order counts
    /// for the bottom field of a coded frame, are present in the slice headers
    /// for coded frames as specified in clause 7.3.3. Otherwise, specifies that
    /// the syntax elements `delta_pic_order_cnt_bottom` and
    /// `delta_pic_order_cnt[1]` are not present in the slice headers.
    pub bottom_field_pic_order_in_frame_present_flag: bool,

    /// Present when num_slice_groups_minus1 is greater than 0.
    pub slice_groups: Option<SliceGroups>,

    /// Specifies how `num_ref_idx_l0_active_minus1` is inferred for P, SP, and
    /// B slices with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l0_default_active_minus1: u8,

    /// Specifies how `num_ref_idx_l1_active_minus1` is inferred for B slices
    /// with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l1_default_active_minus1: u8,

    /// If not set, specifies that the default weighted prediction shall be
    /// applied to P and SP slices. If set, specifies that explicit weighted
    /// prediction shall be applied to P and SP slices.
    pub weighted_pred_flag: bool,

    /// `weighted_bipred_idc` equal to 0 specifies that the default weighted
    /// prediction shall be applied to B slices. `weighted_bipred_idc` equal to
    /// 1 specifies that explicit weighted prediction shall be applied to B
    /// slices. `weighted_bipred_idc` equal to 2 specifies that implicit
    /// weighted prediction shall be applied to B slices
    pub weighted_bipred_idc: u8,

    /// Specifies the initial value minus 26 of SliceQPY for each slice. The
    /// initial value is modified at the slice layer when a non-zero value of
    /// `slice_qp_delta` is decoded, and is modified further when a non-zero
    /// value of `mb_qp_delta` is decoded at the macroblock layer.
    pub pic_init_qp_minus26: i8,

    /// Specifies the initial value minus 26 of SliceQSY for all macroblocks in
    /// SP or SI slices. The initial value is modified at the slice layer when a
    /// non-zero value of `slice_qs_delta` is decoded.
    pub pic_init_qs_minus26: i8,

    /// Specifies the offset that shall be added to QP Y and QSY for addressing
    /// the table of QPC values for the Cb chroma component.
    pub chroma_qp_index_offset: i8,

    /// If set, specifies that a set of syntax elements controlling the
    /// characteristics of the deblocking filter is present in the slice header.
    /// If not set, specifies that the set of syntax elements controlling the
    /// characteristics of the deblocking filter is not present in the slice
    /// headers and their inferred values are in effect.
    pub deblocking_filter_control_present_flag: bool,

    /// If not set, specifies that intra prediction allows usage of residual
    /// data and decoded samples of neighbouring macroblocks coded using Inter
    /// macroblock prediction modes for the prediction of macroblocks coded
    /// using Intra macroblock prediction modes. If set, specifies constrained
    /// intra prediction, in which case prediction of macroblocks coded using
    /// Intra macroblock prediction modes only uses residual data and decoded
    /// samples from I or SI macroblock types.
    pub constrained_intra_pred_flag: bool,

    /// If not set, specifies that the `redundant_pic_cnt` syntax element is not
    /// present in slice headers, coded slice data partition B NAL units, and
    /// coded slice data partition C NAL units that refer (either directly or by
    /// association with a corresponding coded slice data partition A NAL unit)
    /// to the picture parameter set. If set, specifies that the
    /// `redundant_pic_cnt` syntax element is present in all slice headers,
    /// coded slice data partition B NAL units, and coded slice data partition C
    /// NAL units that refer (either directly or by association with a
    /// corresponding coded slice data partition A NAL unit) to the picture
    /// parameter set.
    pub redundant_pic_cnt_present_flag: bool,

    /// If set, specifies that the 8x8 transform decoding process may be in use
    /// (see clause 8.5). If not set, specifies that the 8x8 transform decoding
    /// process is not in use.
    pub transform_8x8_mode_flag: bool,

    /// If set, specifies that parameters are present to modify the scaling
    /// lists specified in the sequence parameter set. If not set, specifies
    /// that the scaling lists used for the picture shall be inferred to be
    /// equal to those specified by the sequence parameter set.
    pub pic_scaling_matrix_present_flag: bool,

    /// 4x4 Scaling list as read with 7.3.2.1.1.1, in zigzag order, inherited
    /// from the SPS when the picture matrix is absent.
    pub scaling_lists_4x4: [[u8; 16]; 6],
    /// 8x8 Scaling list as read with 7.3.2.1.1.1, in zigzag order, inherited
    /// from the SPS when the picture matrix is absent.
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Specifies the offset that shall be added to QPY and QSY for addressing
    /// the table of QPC values for the Cr chroma component. When
    /// `second_chroma_qp_index_offset` is not present, it shall be inferred to
    /// be equal to `chroma_qp_index_offset`.
    pub second_chroma_qp_index_offset: i8,
}

impl Pps {
    pub fn num_slice_groups_minus1(&self) -> u8 {
        self.slice_groups
            .as_ref()
            .map_or(0, |groups| groups.num_slice_groups_minus1)
    }

    /// Whether the optional trailing fields of the PPS syntax must be coded
    /// to represent this PPS.
    pub fn has_trailing_fields(&self) -> bool {
        self.transform_8x8_mode_flag
            || self.pic_scaling_matrix_present_flag
            || self.second_chroma_qp_index_offset != self.chroma_qp_index_offset
    }
}

pub struct PpsBuilder(Pps);

impl PpsBuilder {
    /// Starts a PPS referring to `sps`, inheriting its scaling lists.
    pub fn new(sps: &Sps) -> Self {
        PpsBuilder(Pps {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: sps.seq_parameter_set_id,
            entropy_coding_mode_flag: false,
            bottom_field_pic_order_in_frame_present_flag: false,
            slice_groups: None,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            weighted_pred_flag: false,
            weighted_bipred_idc: 0,
            pic_init_qp_minus26: 0,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            deblocking_filter_control_present_flag: false,
            constrained_intra_pred_flag: false,
            redundant_pic_cnt_present_flag: false,
            transform_8x8_mode_flag: false,
            pic_scaling_matrix_present_flag: false,
            scaling_lists_4x4: sps.scaling_lists_4x4,
            scaling_lists_8x8: sps.scaling_lists_8x8,
            second_chroma_qp_index_offset: 0,
        })
    }

    pub fn pic_parameter_set_id(mut self, value: u8) -> Self {
        self.0.pic_parameter_set_id = value;
        self
    }

    pub fn entropy_coding_mode_flag(mut self, value: bool) -> Self {
        self.0.entropy_coding_mode_flag = value;
        self
    }

    pub fn pic_init_qp_minus26(mut self, value: i8) -> Self {
        self.0.pic_init_qp_minus26 = value;
        self
    }

    pub fn deblocking_filter_control_present_flag(mut self, value: bool) -> Self {
        self.0.deblocking_filter_control_present_flag = value;
        self
    }

    pub fn weighted_prediction(mut self, weighted_pred_flag: bool, weighted_bipred_idc: u8) -> Self {
        self.0.weighted_pred_flag = weighted_pred_flag;
        self.0.weighted_bipred_idc = weighted_bipred_idc;
        self
    }

    pub fn num_ref_idx_default_active_minus1(mut self, l0: u8, l1: u8) -> Self {
        self.0.num_ref_idx_l0_default_active_minus1 = l0;
        self.0.num_ref_idx_l1_default_active_minus1 = l1;
        self
    }

    pub fn slice_groups(mut self, num_slice_groups_minus1: u8, map: SliceGroupMap) -> Self {
        self.0.slice_groups = Some(SliceGroups {
            num_slice_groups_minus1,
            map,
        });
        self
    }

    pub fn transform_8x8_mode_flag(mut self, value: bool) -> Self {
        self.0.transform_8x8_mode_flag = value;
        self
    }

    /// Sets explicit picture scaling lists, given in zigzag order.
    pub fn scaling_lists(mut self, lists_4x4: [[u8; 16]; 6], lists_8x8: [[u8; 64]; 6]) -> Self {
        self.0.pic_scaling_matrix_present_flag = true;
        self.0.scaling_lists_4x4 = lists_4x4;
        self.0.scaling_lists_8x8 = lists_8x8;
        self
    }

    pub fn chroma_qp_index_offsets(mut self, first: i8, second: i8) -> Self {
        self.0.chroma_qp_index_offset = first;
        self.0.second_chroma_qp_index_offset = second;
        self
    }

    pub fn build(self) -> Rc<Pps> {
        Rc::new(self.0)
    }
}

/// One entry of ref_pic_list_modification() or
/// ref_pic_list_mvc_modification(), named after modification_of_pic_nums_idc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefPicListModification {
    /// 0: subtract `abs_diff_pic_num_minus1 + 1` from the picture number
    /// prediction value.
    SubtractShortTerm { abs_diff_pic_num_minus1: u32 },
    /// 1: add `abs_diff_pic_num_minus1 + 1` to the picture number prediction
    /// value.
    AddShortTerm { abs_diff_pic_num_minus1: u32 },
    /// 2: a long term picture.
    LongTerm { long_term_pic_num: u32 },
    /// 4: subtract `abs_diff_view_idx_minus1 + 1` from the inter-view
    /// reference index prediction value. MVC only.
    SubtractView { abs_diff_view_idx_minus1: u32 },
    /// 5: add `abs_diff_view_idx_minus1 + 1` to the inter-view reference
    /// index prediction value. MVC only.
    AddView { abs_diff_view_idx_minus1: u32 },
}

impl RefPicListModification {
    pub fn modification_of_pic_nums_idc(&self) -> u8 {
        match self {
            RefPicListModification::SubtractShortTerm { .. } => 0,
            RefPicListModification::AddShortTerm { .. } => 1,
            RefPicListModification::LongTerm { .. } => 2,
            RefPicListModification::SubtractView { .. } => 4,
            RefPicListModification::AddView { .. } => 5,
        }
    }
}

/// pred_weight_table(). Weights of references without explicit values hold
/// their inferred defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,

    pub luma_weight_l0: [i16; 32],
    pub luma_offset_l0: [i8; 32],

    pub chroma_weight_l0: [[i16; 2]; 32],
    pub chroma_offset_l0: [[i8; 2]; 32],

    pub luma_weight_l1: [i16; 32],
    pub luma_offset_l1: [i8; 32],

    pub chroma_weight_l1: [[i16; 2]; 32],
    pub chroma_offset_l1: [[i8; 2]; 32],
}

/// A memory management control operation, see 7.4.3.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryManagementOperation {
    /// 1: mark a short-term reference picture as unused for reference.
    MarkShortTermUnused { difference_of_pic_nums_minus1: u32 },
    /// 2: mark a long-term reference picture as unused for reference.
    MarkLongTermUnused { long_term_pic_num: u32 },
    /// 3: turn a short-term reference picture into a long-term one.
    AssignLongTerm {
        difference_of_pic_nums_minus1: u32,
        long_term_frame_idx: u32,
    },
    /// 4: set MaxLongTermFrameIdx.
    SetMaxLongTermFrameIdx(MaxLongTermFrameIdx),
    /// 5: mark all reference pictures as unused for reference.
    MarkAllUnused,
    /// 6: mark the current picture as a long-term reference.
    MarkCurrentLongTerm { long_term_frame_idx: u32 },
}

impl MemoryManagementOperation {
    pub fn memory_management_control_operation(&self) -> u8 {
        match self {
            MemoryManagementOperation::MarkShortTermUnused { .. } => 1,
            MemoryManagementOperation::MarkLongTermUnused { .. } => 2,
            MemoryManagementOperation::AssignLongTerm { .. } => 3,
            MemoryManagementOperation::SetMaxLongTermFrameIdx(_) => 4,
            MemoryManagementOperation::MarkAllUnused => 5,
            MemoryManagementOperation::MarkCurrentLongTerm { .. } => 6,
        }
    }
}

/// dec_ref_pic_marking().
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecRefPicMarking {
    /// Marking of an IDR picture.
    Idr {
        /// Specifies how the previously-decoded pictures in the decoded picture
        /// buffer are treated after decoding of an IDR picture. See Annex C.
        no_output_of_prior_pics_flag: bool,
        /// If unset, specifies that the MaxLongTermFrameIdx variable is set
        /// equal to "no long-term frame indices" and that the IDR picture is
        /// marked as "used for short-term reference". If set, specifies that
        /// the MaxLongTermFrameIdx variable is set equal to 0 and that the
        /// current IDR picture is marked "used for long-term reference" and is
        /// assigned LongTermFrameIdx equal to 0.
        long_term_reference_flag: bool,
    },
    /// adaptive_ref_pic_marking_mode_flag unset.
    SlidingWindow,
    /// adaptive_ref_pic_marking_mode_flag set, with the operations in stream
    /// order, the terminating operation 0 excluded.
    Adaptive(Vec<MemoryManagementOperation>),
}

/// A H264 slice header. See 7.3.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    /// Specifies the address of the first macroblock in the slice.
    pub first_mb_in_slice: u32,

    /// Specifies the coding type of the slice according to Table 7-6.
    pub slice_type: SliceType,

    // Specifies the picture parameter set in use
    pub pic_parameter_set_id: u8,

    /// Specifies the colour plane associated with the current slice RBSP when
    /// `separate_colour_plane_flag` is set.
    pub colour_plane_id: u8,

    /// Used as an identifier for pictures and shall be represented by
    /// `log2_max_frame_num_minus4 + 4` bits in the bitstream.
    pub frame_num: u16,

    /// If set, specifies that the slice is a slice of a coded field. If not
    /// set, specifies that the slice is a slice of a coded frame.
    pub field_pic_flag: bool,

    /// If set, specifies that the slice is part of a coded bottom field. If not
    /// set, specifies that the picture is a coded top field.
    pub bottom_field_flag: bool,

    /// Identifies an IDR picture. Present for IDR pictures only.
    pub idr_pic_id: Option<u16>,

    /// Specifies the picture order count modulo `MaxPicOrderCntLsb` for the top
    /// field of a coded frame or for a coded field. The length of the
    /// `pic_order_cnt_lsb` syntax element is
    /// `log2_max_pic_order_cnt_lsb_minus4` + 4 bits.
    pub pic_order_cnt_lsb: u16,

    /// Specifies the picture order count difference between the bottom field
    /// and the top field of a coded frame as follows
    pub delta_pic_order_cnt_bottom: i32,

    /// The first entry specifies the picture order count difference from the
    /// expected picture order count for the top field of a coded frame or for a
    /// coded field as specified in clause 8.2.1 The second entry specifies the
    /// picture order count difference from the expected picture order count for
    /// the bottom field of a coded frame specified in clause 8.2.1.
    pub delta_pic_order_cnt: [i32; 2],

    /// Shall be equal to 0 for slices and slice data partitions belonging to
    /// the primary coded picture. The value of `redundant_pic_cnt shall` be
    /// greater than 0 for coded slices or coded slice data partitions of a
    /// redundant coded picture
    pub redundant_pic_cnt: u8,

    /// Specifies the method used in the decoding process to derive motion
    /// vectors and reference indices for inter prediction >
    pub direct_spatial_mv_pred_flag: bool,

    /// If set, specifies that the syntax element `num_ref_idx_l0_active_minus1`
    /// is present for P, SP, and B slices and that the syntax element
    /// `num_ref_idx_l1_active_minus1` is present for B slices. If not set,
    /// specifies that the syntax elements `num_ref_idx_l0_active_minus1` and
    /// `num_ref_idx_l1_active_minus1` are not present.
    pub num_ref_idx_active_override_flag: bool,

    /// Specifies the maximum reference index for reference picture list 0 that
    /// shall be used to decode the slice.
    pub num_ref_idx_l0_active_minus1: u8,

    /// Specifies the maximum reference index for reference picture list 1 that
    /// shall be used to decode the slice.
    pub num_ref_idx_l1_active_minus1: u8,

    /// Present when ref_pic_list_modification_flag_l0 is set.
    pub ref_pic_list_modification_l0: Option<Vec<RefPicListModification>>,

    /// Present when ref_pic_list_modification_flag_l1 is set.
    pub ref_pic_list_modification_l1: Option<Vec<RefPicListModification>>,

    /// Present for explicitly weighted P, SP and B slices.
    pub pred_weight_table: Option<PredWeightTable>,

    /// Present for reference pictures (nal_ref_idc != 0).
    pub dec_ref_pic_marking: Option<DecRefPicMarking>,

    /// Specifies the index for determining the initialization table used in
    /// the initialization process for context variables.
    pub cabac_init_idc: u8,

    /// Specifies the initial value of QP Y to be used for all the macroblocks
    /// in the slice until modified by the value of `mb_qp_delta` in the
    /// macroblock layer. The initial QPY quantization parameter for the slice
    /// is computed using (7-30).
    pub slice_qp_delta: i8,

    /// Specifies the decoding process to be used to decode P macroblocks in an
    /// SP slice.
    pub sp_for_switch_flag: bool,

    /// Specifies the value of QSY for all the macroblocks in SP and SI slices.
    /// The QSY quantization parameter for the slice is computed using (7-31).
    pub slice_qs_delta: i8,

    /// Specifies whether the operation of the deblocking filter shall be
    /// disabled across some block edges of the slice and specifies for which
    /// edges the filtering is disabled.
    pub disable_deblocking_filter_idc: u8,

    /// Specifies the offset used in accessing the α and tC0 deblocking filter
    /// tables for filtering operations controlled by the macroblocks within the
    /// slice. From this value, the offset that shall be applied when addressing
    /// these tables shall be computed using (7-32).
    pub slice_alpha_c0_offset_div2: i8,

    /// Specifies the offset used in accessing the β deblocking filter table for
    /// filtering operations controlled by the macroblocks within the slice.
    /// From this value, the offset that is applied when addressing the β table
    /// of the deblocking filter shall be computed using (7-33).
    pub slice_beta_offset_div2: i8,

    /// Present for slice group map types 3 to 5.
    pub slice_group_change_cycle: Option<u32>,

    /// Same as `MaxPicNum` in the specification.
    pub max_pic_num: u32,

    /// Size of the slice_header() in bits, NAL unit header and emulation
    /// prevention bytes excluded.
    pub header_bit_size: usize,

    /// Number of emulation prevention bytes (EPB) in this slice_header().
    pub n_emulation_prevention_bytes: usize,

    /// Size of the picture order count fields in bits.
    pub pic_order_cnt_bit_size: usize,

    /// Size of dec_ref_pic_marking() in bits.
    pub dec_ref_pic_marking_bit_size: usize,
}

/// A H264 slice. An integer number of macroblocks or macroblock pairs ordered
/// consecutively in the raster scan within a particular slice group
#[derive(Debug)]
pub struct Slice<'a> {
    /// The slice header.
    pub header: SliceHeader,
    /// The NAL unit backing this slice.
    pub nalu: Nalu<'a>,
}

/// The parameter set store. Holds the SPS and PPS last seen for every id,
/// and the ids of the last SPS and PPS parsed.
#[derive(Debug)]
pub struct Parser {
    sps: Vec<Option<Rc<Sps>>>,
    pps: Vec<Option<Rc<Pps>>>,
    last_sps: Option<u8>,
    last_pps: Option<u8>,
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            sps: vec![None; MAX_SPS_COUNT],
            pps: vec![None; MAX_PPS_COUNT],
            last_sps: None,
            last_pps: None,
        }
    }
}

impl Parser {
    fn check_type(nalu: &Nalu, expected: NaluType) -> ParseResult<()> {
        if nalu.header.type_ != expected {
            return Err(ParseError::BrokenData(format!(
                "expected a {expected:?} NAL unit, got {:?}",
                nalu.header.type_
            )));
        }

        Ok(())
    }

    /// Reads one scaling_list(), 7.3.2.1.1.1. Returns whether
    /// useDefaultScalingMatrixFlag is set, in which case `list` is left
    /// untouched.
    fn parse_scaling_list(r: &mut NaluReader, list: &mut [u8]) -> ParseResult<bool> {
        let mut last_scale = 8i32;
        let mut next_scale = 8i32;

        for (j, coef) in list.iter_mut().enumerate() {
            if next_scale != 0 {
                let delta_scale = r.read_se_bounded::<i32>(-128, 127)?;
                next_scale = (last_scale + delta_scale + 256) % 256;
                if j == 0 && next_scale == 0 {
                    return Ok(true);
                }
            }

            *coef = if next_scale == 0 { last_scale } else { next_scale } as u8;
            last_scale = i32::from(*coef);
        }

        Ok(false)
    }

    /// Reads the scaling list flags and lists of an SPS or PPS, resolving the
    /// lists that are not signalled with the fallback rules of table 7-2.
    /// `fallback_4x4` and `fallback_8x8` hold the (intra, inter) lists of the
    /// applicable rule.
    fn parse_scaling_matrix(
        r: &mut NaluReader,
        num_8x8_signalled: usize,
        fallback_4x4: (&[u8; 16], &[u8; 16]),
        fallback_8x8: (&[u8; 64], &[u8; 64]),
        lists_4x4: &mut [[u8; 16]; 6],
        lists_8x8: &mut [[u8; 64]; 6],
    ) -> ParseResult<()> {
        for i in 0..6 {
            if r.read_bit()? {
                if Parser::parse_scaling_list(r, &mut lists_4x4[i])? {
                    lists_4x4[i] = if i < 3 {
                        DEFAULT_4X4_INTRA
                    } else {
                        DEFAULT_4X4_INTER
                    };
                }
            } else {
                lists_4x4[i] = match i {
                    0 => *fallback_4x4.0,
                    3 => *fallback_4x4.1,
                    _ => lists_4x4[i - 1],
                };
            }
        }

        for i in 0..6 {
            if i < num_8x8_signalled && r.read_bit()? {
                if Parser::parse_scaling_list(r, &mut lists_8x8[i])? {
                    lists_8x8[i] = if i % 2 == 0 {
                        DEFAULT_8X8_INTRA
                    } else {
                        DEFAULT_8X8_INTER
                    };
                }
            } else {
                lists_8x8[i] = match i {
                    0 => *fallback_8x8.0,
                    1 => *fallback_8x8.1,
                    _ => lists_8x8[i - 2],
                };
            }
        }

        Ok(())
    }

    fn parse_hrd(r: &mut NaluReader) -> ParseResult<HrdParams> {
        let cpb_cnt_minus1 = r.read_ue_max::<usize>(31)?;
        let mut hrd = HrdParams {
            bit_rate_scale: r.read_bits(4)?,
            cpb_size_scale: r.read_bits(4)?,
            cpb_specs: Vec::with_capacity(cpb_cnt_minus1 + 1),
            ..Default::default()
        };

        for _ in 0..=cpb_cnt_minus1 {
            hrd.cpb_specs.push(CpbSpec {
                bit_rate_value_minus1: r.read_ue_max(u32::MAX - 1)?,
                cpb_size_value_minus1: r.read_ue_max(u32::MAX - 1)?,
                cbr_flag: r.read_bit()?,
            });
        }

        hrd.initial_cpb_removal_delay_length_minus1 = r.read_bits(5)?;
        hrd.cpb_removal_delay_length_minus1 = r.read_bits(5)?;
        hrd.dpb_output_delay_length_minus1 = r.read_bits(5)?;
        hrd.time_offset_length = r.read_bits(5)?;
        Ok(hrd)
    }

    fn parse_vui(r: &mut NaluReader) -> ParseResult<VuiParams> {
        let mut vui = VuiParams::default();

        if r.read_bit()? {
            let aspect_ratio_idc: u8 = r.read_bits(8)?;
            let (sar_width, sar_height) = if aspect_ratio_idc == AspectRatioInfo::EXTENDED_SAR {
                (r.read_bits(16)?, r.read_bits(16)?)
            } else {
                AspectRatioInfo::table_sar(aspect_ratio_idc)
            };
            vui.aspect_ratio_info = Some(AspectRatioInfo {
                aspect_ratio_idc,
                sar_width,
                sar_height,
            });
        }

        if r.read_bit()? {
            vui.overscan_appropriate_flag = Some(r.read_bit()?);
        }

        if r.read_bit()? {
            let mut signal = VideoSignalType {
                video_format: r.read_bits(3)?,
                video_full_range_flag: r.read_bit()?,
                colour_description: None,
            };
            if r.read_bit()? {
                signal.colour_description = Some(ColourDescription {
                    colour_primaries: r.read_bits(8)?,
                    transfer_characteristics: r.read_bits(8)?,
                    matrix_coefficients: r.read_bits(8)?,
                });
            }
            vui.video_signal_type = Some(signal);
        }

        if r.read_bit()? {
            vui.chroma_loc_info = Some(ChromaLocInfo {
                chroma_sample_loc_type_top_field: r.read_ue_max(5)?,
                chroma_sample_loc_type_bottom_field: r.read_ue_max(5)?,
            });
        }

        if r.read_bit()? {
            let num_units_in_tick = r.read_bits::<u32>(32)?;
            if num_units_in_tick == 0 {
                return Err(ParseError::BrokenData(
                    "num_units_in_tick == 0, which is not allowed by E.2.1".into(),
                ));
            }

            let time_scale = r.read_bits::<u32>(32)?;
            if time_scale == 0 {
                return Err(ParseError::BrokenData(
                    "time_scale == 0, which is not allowed by E.2.1".into(),
                ));
            }

            vui.timing_info = Some(TimingInfo {
                num_units_in_tick,
                time_scale,
                fixed_frame_rate_flag: r.read_bit()?,
            });
        }

        if r.read_bit()? {
            vui.nal_hrd_parameters = Some(Parser::parse_hrd(r)?);
        }

        if r.read_bit()? {
            vui.vcl_hrd_parameters = Some(Parser::parse_hrd(r)?);
        }

        if vui.nal_hrd_parameters.is_some() || vui.vcl_hrd_parameters.is_some() {
            vui.low_delay_hrd_flag = r.read_bit()?;
        }

        vui.pic_struct_present_flag = r.read_bit()?;

        if r.read_bit()? {
            vui.bitstream_restriction = Some(BitstreamRestriction {
                motion_vectors_over_pic_boundaries_flag: r.read_bit()?,
                max_bytes_per_pic_denom: r.read_ue_max(16)?,
                max_bits_per_mb_denom: r.read_ue_max(16)?,
                log2_max_mv_length_horizontal: r.read_ue_max(16)?,
                log2_max_mv_length_vertical: r.read_ue_max(16)?,
                max_num_reorder_frames: r.read_ue()?,
                max_dec_frame_buffering: r.read_ue()?,
            });
        }

        Ok(vui)
    }

    /// Reads seq_parameter_set_data(), shared by SPS and subset SPS units.
    /// Derived values are left for the caller to compute.
    fn parse_sps_data(r: &mut NaluReader) -> ParseResult<Sps> {
        let mut sps = Sps {
            profile_idc: r.read_bits(8)?,
            constraint_set0_flag: r.read_bit()?,
            constraint_set1_flag: r.read_bit()?,
            constraint_set2_flag: r.read_bit()?,
            constraint_set3_flag: r.read_bit()?,
            constraint_set4_flag: r.read_bit()?,
            constraint_set5_flag: r.read_bit()?,
            ..Default::default()
        };

        // skip reserved_zero_2bits
        r.skip_bits(2)?;

        sps.level_idc = Level::from_idc(r.read_bits(8)?)?;
        sps.seq_parameter_set_id = r.read_ue_max((MAX_SPS_COUNT - 1) as u32)?;

        if Profile::has_chroma_info(sps.profile_idc) {
            sps.chroma_format_idc = r.read_ue_max(3)?;
            if sps.chroma_format_idc == 3 {
                sps.separate_colour_plane_flag = r.read_bit()?;
            }

            sps.bit_depth_luma_minus8 = r.read_ue_max(6)?;
            sps.bit_depth_chroma_minus8 = r.read_ue_max(6)?;
            sps.qpprime_y_zero_transform_bypass_flag = r.read_bit()?;
            sps.seq_scaling_matrix_present_flag = r.read_bit()?;

            if sps.seq_scaling_matrix_present_flag {
                let num_8x8 = if sps.chroma_format_idc != 3 { 2 } else { 6 };
                // Table 7-2: Fallback rule A
                Parser::parse_scaling_matrix(
                    r,
                    num_8x8,
                    (&DEFAULT_4X4_INTRA, &DEFAULT_4X4_INTER),
                    (&DEFAULT_8X8_INTRA, &DEFAULT_8X8_INTER),
                    &mut sps.scaling_lists_4x4,
                    &mut sps.scaling_lists_8x8,
                )?;
            }
        }

        sps.log2_max_frame_num_minus4 = r.read_ue_max(12)?;

        sps.pic_order_cnt = match r.read_ue_max::<u8>(2)? {
            0 => PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4: r.read_ue_max(12)?,
            },
            1 => {
                let delta_pic_order_always_zero_flag = r.read_bit()?;
                let offset_for_non_ref_pic = r.read_se()?;
                let offset_for_top_to_bottom_field = r.read_se()?;
                let num_ref_frames_in_pic_order_cnt_cycle = r.read_ue_max::<usize>(255)?;

                let mut offset_for_ref_frame =
                    Vec::with_capacity(num_ref_frames_in_pic_order_cnt_cycle);
                let mut offset_acc = 0i32;
                for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
                    let offset = r.read_se()?;
                    // (7-12) in the spec.
                    offset_acc = offset_acc.checked_add(offset).ok_or_else(|| {
                        ParseError::BrokenData("ExpectedDeltaPerPicOrderCntCycle overflow".into())
                    })?;
                    offset_for_ref_frame.push(offset);
                }

                PicOrderCnt::Type1 {
                    delta_pic_order_always_zero_flag,
                    offset_for_non_ref_pic,
                    offset_for_top_to_bottom_field,
                    offset_for_ref_frame,
                    expected_delta_per_pic_order_cnt_cycle: offset_acc,
                }
            }
            _ => PicOrderCnt::Type2,
        };

        sps.max_num_ref_frames = r.read_ue_max(DPB_MAX_SIZE as u32)?;
        sps.gaps_in_frame_num_value_allowed_flag = r.read_bit()?;
        sps.pic_width_in_mbs_minus1 = r.read_ue_max(u16::MAX.into())?;
        sps.pic_height_in_map_units_minus1 = r.read_ue_max(u16::MAX.into())?;
        sps.frame_mbs_only_flag = r.read_bit()?;

        if !sps.frame_mbs_only_flag {
            sps.mb_adaptive_frame_field_flag = r.read_bit()?;
        }

        sps.direct_8x8_inference_flag = r.read_bit()?;

        if r.read_bit()? {
            sps.frame_cropping = Some(FrameCropping {
                frame_crop_left_offset: r.read_ue()?,
                frame_crop_right_offset: r.read_ue()?,
                frame_crop_top_offset: r.read_ue()?,
                frame_crop_bottom_offset: r.read_ue()?,
            });
        }

        if r.read_bit()? {
            sps.vui_parameters = Some(Parser::parse_vui(r)?);
        }

        Ok(sps)
    }

    fn read_view_ids(r: &mut NaluReader, count: u32) -> ParseResult<Vec<u16>> {
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ids.push(r.read_ue_max(1023)?);
        }

        Ok(ids)
    }

    /// seq_parameter_set_mvc_extension(), G.7.3.2.1.4.
    fn parse_mvc_extension(r: &mut NaluReader) -> ParseResult<MvcSpsExtension> {
        let num_views_minus1 = r.read_ue_max::<u32>(1023)?;

        let mut views = Vec::with_capacity(num_views_minus1 as usize + 1);
        for _ in 0..=num_views_minus1 {
            views.push(MvcView {
                view_id: r.read_ue_max(1023)?,
                ..Default::default()
            });
        }

        // The base view has no inter-view references.
        for view in views.iter_mut().skip(1) {
            let num_anchor_refs_l0 = r.read_ue_max(15)?;
            view.anchor_refs_l0 = Parser::read_view_ids(r, num_anchor_refs_l0)?;
            let num_anchor_refs_l1 = r.read_ue_max(15)?;
            view.anchor_refs_l1 = Parser::read_view_ids(r, num_anchor_refs_l1)?;
        }

        for view in views.iter_mut().skip(1) {
            let num_non_anchor_refs_l0 = r.read_ue_max(15)?;
            view.non_anchor_refs_l0 = Parser::read_view_ids(r, num_non_anchor_refs_l0)?;
            let num_non_anchor_refs_l1 = r.read_ue_max(15)?;
            view.non_anchor_refs_l1 = Parser::read_view_ids(r, num_non_anchor_refs_l1)?;
        }

        let num_level_values_signalled_minus1 = r.read_ue_max::<u32>(63)?;
        let mut level_values = Vec::with_capacity(num_level_values_signalled_minus1 as usize + 1);
        for _ in 0..=num_level_values_signalled_minus1 {
            let level_idc = r.read_bits(8)?;
            let num_applicable_ops_minus1 = r.read_ue_max::<u32>(1023)?;

            let mut applicable_ops = Vec::with_capacity(num_applicable_ops_minus1 as usize + 1);
            for _ in 0..=num_applicable_ops_minus1 {
                let temporal_id = r.read_bits(3)?;
                let num_target_views_minus1 = r.read_ue_max::<u32>(1023)?;
                let target_view_ids = Parser::read_view_ids(r, num_target_views_minus1 + 1)?;

                applicable_ops.push(MvcApplicableOp {
                    temporal_id,
                    target_view_ids,
                    num_views_minus1: r.read_ue_max(1023)?,
                });
            }

            level_values.push(MvcLevelValue {
                level_idc,
                applicable_ops,
            });
        }

        Ok(MvcSpsExtension {
            views,
            level_values,
        })
    }

    fn store_sps(&mut self, sps: Sps) -> &Rc<Sps> {
        let id = sps.seq_parameter_set_id;
        self.last_sps = Some(id);
        self.sps[usize::from(id)].insert(Rc::new(sps))
    }

    /// Parse a SPS and add it to the store, replacing any SPS with the same
    /// id.
    ///
    /// Returns a reference to the new SPS.
    pub fn parse_sps(&mut self, nalu: &Nalu) -> ParseResult<&Rc<Sps>> {
        Parser::check_type(nalu, NaluType::Sps)?;

        let mut r = NaluReader::new(nalu.payload(), true);
        let mut sps = Parser::parse_sps_data(&mut r)?;
        sps.compute_derived()?;

        Ok(self.store_sps(sps))
    }

    /// Parse a subset SPS and add it to the store. Subset SPSs share the id
    /// space of regular SPSs.
    ///
    /// The MVC extension is decoded for the Multiview High and Stereo High
    /// profiles. Other extensions are skipped.
    pub fn parse_subset_sps(&mut self, nalu: &Nalu) -> ParseResult<&Rc<Sps>> {
        Parser::check_type(nalu, NaluType::SubsetSps)?;

        let mut r = NaluReader::new(nalu.payload(), true);
        let mut sps = Parser::parse_sps_data(&mut r)?;

        match sps.profile() {
            Some(Profile::MultiviewHigh | Profile::StereoHigh) => {
                if !r.read_bit()? {
                    return Err(ParseError::BrokenData(
                        "bit_equal_to_one is 0 in subset SPS".into(),
                    ));
                }

                sps.extension = Some(SpsExtension::Mvc(Parser::parse_mvc_extension(&mut r)?));
                // mvc_vui_parameters_extension() is not decoded.
            }
            _ => log::debug!(
                "Skipping subset SPS extension of profile_idc {}",
                sps.profile_idc
            ),
        }

        sps.compute_derived()?;
        Ok(self.store_sps(sps))
    }

    fn parse_slice_groups(
        r: &mut NaluReader,
        num_slice_groups_minus1: u8,
        sps: &Sps,
    ) -> ParseResult<SliceGroups> {
        let num_slice_groups = usize::from(num_slice_groups_minus1) + 1;
        let pic_size_in_map_units = sps.pic_size_in_map_units();

        let map = match r.read_ue_max::<u8>(6)? {
            0 => {
                let mut run_length_minus1 = Vec::with_capacity(num_slice_groups);
                for _ in 0..num_slice_groups {
                    run_length_minus1.push(r.read_ue()?);
                }
                SliceGroupMap::Interleaved { run_length_minus1 }
            }
            1 => SliceGroupMap::Dispersed,
            2 => {
                let mut top_left = Vec::with_capacity(num_slice_groups - 1);
                let mut bottom_right = Vec::with_capacity(num_slice_groups - 1);
                for _ in 0..num_slice_groups - 1 {
                    top_left.push(r.read_ue()?);
                    bottom_right.push(r.read_ue()?);
                }
                SliceGroupMap::Foreground {
                    top_left,
                    bottom_right,
                }
            }
            map_type @ 3..=5 => {
                let change_type = SliceGroupChangeType::n(map_type).ok_or_else(|| {
                    ParseError::BrokenData(format!("invalid slice_group_map_type {map_type}"))
                })?;
                let slice_group_change_direction_flag = r.read_bit()?;
                let slice_group_change_rate_minus1 = r.read_ue()?;
                if u64::from(slice_group_change_rate_minus1) >= pic_size_in_map_units {
                    return Err(ParseError::BrokenData(format!(
                        "slice_group_change_rate_minus1 {slice_group_change_rate_minus1} exceeds the picture size"
                    )));
                }

                SliceGroupMap::Changing {
                    change_type,
                    slice_group_change_direction_flag,
                    slice_group_change_rate_minus1,
                }
            }
            _ => {
                let pic_size_in_map_units_minus1 = r.read_ue::<u32>()?;
                if u64::from(pic_size_in_map_units_minus1) >= pic_size_in_map_units {
                    return Err(ParseError::BrokenData(format!(
                        "pic_size_in_map_units_minus1 {pic_size_in_map_units_minus1} exceeds the picture size"
                    )));
                }

                // Ceil(Log2(num_slice_groups_minus1 + 1))
                let bits = (u32::BITS - u32::from(num_slice_groups_minus1).leading_zeros()) as usize;

                let mut slice_group_id = Vec::with_capacity(pic_size_in_map_units_minus1 as usize + 1);
                for _ in 0..=pic_size_in_map_units_minus1 {
                    let id = r.read_bits::<u8>(bits)?;
                    if id > num_slice_groups_minus1 {
                        return Err(ParseError::BrokenData(format!(
                            "slice_group_id {id} out of range"
                        )));
                    }
                    slice_group_id.push(id);
                }

                SliceGroupMap::Explicit { slice_group_id }
            }
        };

        Ok(SliceGroups {
            num_slice_groups_minus1,
            map,
        })
    }

    /// Reads pic_parameter_set_rbsp() after the two ids, which the caller
    /// has already resolved to `sps`.
    fn parse_pps_data(
        r: &mut NaluReader,
        pic_parameter_set_id: u8,
        sps: &Sps,
    ) -> ParseResult<Pps> {
        let mut pps = Pps {
            pic_parameter_set_id,
            seq_parameter_set_id: sps.seq_parameter_set_id,
            entropy_coding_mode_flag: r.read_bit()?,
            bottom_field_pic_order_in_frame_present_flag: r.read_bit()?,
            slice_groups: None,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            weighted_pred_flag: false,
            weighted_bipred_idc: 0,
            pic_init_qp_minus26: 0,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            deblocking_filter_control_present_flag: false,
            constrained_intra_pred_flag: false,
            redundant_pic_cnt_present_flag: false,
            transform_8x8_mode_flag: false,
            pic_scaling_matrix_present_flag: false,
            // If the picture matrix is absent, the scaling lists used for the
            // picture shall be inferred to be equal to those specified by the
            // sequence parameter set.
            scaling_lists_4x4: sps.scaling_lists_4x4,
            scaling_lists_8x8: sps.scaling_lists_8x8,
            second_chroma_qp_index_offset: 0,
        };

        let num_slice_groups_minus1 = r.read_ue_max::<u8>(7)?;
        if num_slice_groups_minus1 > 0 {
            pps.slice_groups = Some(Parser::parse_slice_groups(
                r,
                num_slice_groups_minus1,
                sps,
            )?);
        }

        pps.num_ref_idx_l0_default_active_minus1 = r.read_ue_max(31)?;
        pps.num_ref_idx_l1_default_active_minus1 = r.read_ue_max(31)?;

        pps.weighted_pred_flag = r.read_bit()?;
        pps.weighted_bipred_idc = r.read_bits(2)?;
        if pps.weighted_bipred_idc > 2 {
            return Err(ParseError::BrokenData("weighted_bipred_idc is 3".into()));
        }

        let qp_bd_offset_y = 6 * i32::from(sps.bit_depth_luma_minus8);
        pps.pic_init_qp_minus26 = r.read_se_bounded(-(26 + qp_bd_offset_y), 25)?;
        pps.pic_init_qs_minus26 = r.read_se_bounded(-26, 25)?;

        pps.chroma_qp_index_offset = r.read_se_bounded(-12, 12)?;

        // When second_chroma_qp_index_offset is not present, it shall be
        // inferred to be equal to chroma_qp_index_offset.
        pps.second_chroma_qp_index_offset = pps.chroma_qp_index_offset;

        pps.deblocking_filter_control_present_flag = r.read_bit()?;
        pps.constrained_intra_pred_flag = r.read_bit()?;
        pps.redundant_pic_cnt_present_flag = r.read_bit()?;

        if r.has_more_rsbp_data() {
            pps.transform_8x8_mode_flag = r.read_bit()?;
            pps.pic_scaling_matrix_present_flag = r.read_bit()?;

            if pps.pic_scaling_matrix_present_flag {
                let num_8x8 = match (pps.transform_8x8_mode_flag, sps.chroma_format_idc) {
                    (false, _) => 0,
                    (true, 3) => 6,
                    (true, _) => 2,
                };

                let (fallback_4x4, fallback_8x8) = if sps.seq_scaling_matrix_present_flag {
                    // Table 7-2: Fallback rule B
                    (
                        (&sps.scaling_lists_4x4[0], &sps.scaling_lists_4x4[3]),
                        (&sps.scaling_lists_8x8[0], &sps.scaling_lists_8x8[1]),
                    )
                } else {
                    // Table 7-2: Fallback rule A
                    (
                        (&DEFAULT_4X4_INTRA, &DEFAULT_4X4_INTER),
                        (&DEFAULT_8X8_INTRA, &DEFAULT_8X8_INTER),
                    )
                };

                Parser::parse_scaling_matrix(
                    r,
                    num_8x8,
                    fallback_4x4,
                    fallback_8x8,
                    &mut pps.scaling_lists_4x4,
                    &mut pps.scaling_lists_8x8,
                )?;
            }

            pps.second_chroma_qp_index_offset = r.read_se_bounded(-12, 12)?;
        }

        Ok(pps)
    }

    /// Parse a PPS and add it to the store, replacing any PPS with the same
    /// id. The SPS it refers to must already be in the store.
    pub fn parse_pps(&mut self, nalu: &Nalu) -> ParseResult<&Rc<Pps>> {
        Parser::check_type(nalu, NaluType::Pps)?;

        let mut r = NaluReader::new(nalu.payload(), true);
        let pic_parameter_set_id = r.read_ue_max((MAX_PPS_COUNT - 1) as u32)?;
        let seq_parameter_set_id = r.read_ue_max((MAX_SPS_COUNT - 1) as u32)?;

        let sps = self.get_sps(seq_parameter_set_id).ok_or_else(|| {
            ParseError::BrokenLink(format!(
                "PPS {pic_parameter_set_id} refers to SPS {seq_parameter_set_id}, which has not been parsed"
            ))
        })?;

        let pps = Parser::parse_pps_data(&mut r, pic_parameter_set_id, sps)?;

        self.last_pps = Some(pic_parameter_set_id);
        Ok(self.pps[usize::from(pic_parameter_set_id)].insert(Rc::new(pps)))
    }

    fn parse_ref_pic_list_modification(
        r: &mut NaluReader,
        mvc: bool,
    ) -> ParseResult<Vec<RefPicListModification>> {
        let max_idc = if mvc { 5 } else { 3 };
        let mut modifications = vec![];

        loop {
            let modification = match r.read_ue_max::<u8>(max_idc)? {
                0 => RefPicListModification::SubtractShortTerm {
                    abs_diff_pic_num_minus1: r.read_ue()?,
                },
                1 => RefPicListModification::AddShortTerm {
                    abs_diff_pic_num_minus1: r.read_ue()?,
                },
                2 => RefPicListModification::LongTerm {
                    long_term_pic_num: r.read_ue()?,
                },
                3 => break,
                4 => RefPicListModification::SubtractView {
                    abs_diff_view_idx_minus1: r.read_ue()?,
                },
                _ => RefPicListModification::AddView {
                    abs_diff_view_idx_minus1: r.read_ue()?,
                },
            };

            if modifications.len() == MAX_REF_PIC_LIST_MODIFICATIONS {
                return Err(ParseError::BrokenData(
                    "too many reference picture list modifications".into(),
                ));
            }

            modifications.push(modification);
        }

        Ok(modifications)
    }

    /// Reads the weights of one reference list. Entries without explicit
    /// weights get the inferred `1 << denom` weight and a zero offset.
    #[allow(clippy::too_many_arguments)]
    fn parse_weights(
        r: &mut NaluReader,
        num_ref_idx_active_minus1: u8,
        chroma: bool,
        (luma_denom, chroma_denom): (u8, u8),
        luma_weight: &mut [i16; 32],
        luma_offset: &mut [i8; 32],
        chroma_weight: &mut [[i16; 2]; 32],
        chroma_offset: &mut [[i8; 2]; 32],
    ) -> ParseResult<()> {
        for i in 0..=usize::from(num_ref_idx_active_minus1) {
            luma_weight[i] = 1 << luma_denom;
            if r.read_bit()? {
                luma_weight[i] = r.read_se_bounded(-128, 127)?;
                luma_offset[i] = r.read_se_bounded(-128, 127)?;
            }

            if chroma {
                chroma_weight[i] = [1 << chroma_denom; 2];
                if r.read_bit()? {
                    for j in 0..2 {
                        chroma_weight[i][j] = r.read_se_bounded(-128, 127)?;
                        chroma_offset[i][j] = r.read_se_bounded(-128, 127)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn parse_pred_weight_table(
        r: &mut NaluReader,
        sps: &Sps,
        hdr: &SliceHeader,
    ) -> ParseResult<PredWeightTable> {
        let chroma = sps.chroma_array_type != 0;

        let mut pwt = PredWeightTable {
            luma_log2_weight_denom: r.read_ue_max(7)?,
            ..Default::default()
        };

        if chroma {
            pwt.chroma_log2_weight_denom = r.read_ue_max(7)?;
        }

        let denoms = (pwt.luma_log2_weight_denom, pwt.chroma_log2_weight_denom);

        Parser::parse_weights(
            r,
            hdr.num_ref_idx_l0_active_minus1,
            chroma,
            denoms,
            &mut pwt.luma_weight_l0,
            &mut pwt.luma_offset_l0,
            &mut pwt.chroma_weight_l0,
            &mut pwt.chroma_offset_l0,
        )?;

        if hdr.slice_type.is_b() {
            Parser::parse_weights(
                r,
                hdr.num_ref_idx_l1_active_minus1,
                chroma,
                denoms,
                &mut pwt.luma_weight_l1,
                &mut pwt.luma_offset_l1,
                &mut pwt.chroma_weight_l1,
                &mut pwt.chroma_offset_l1,
            )?;
        }

        Ok(pwt)
    }

    fn parse_dec_ref_pic_marking(r: &mut NaluReader, idr: bool) -> ParseResult<DecRefPicMarking> {
        if idr {
            return Ok(DecRefPicMarking::Idr {
                no_output_of_prior_pics_flag: r.read_bit()?,
                long_term_reference_flag: r.read_bit()?,
            });
        }

        if !r.read_bit()? {
            return Ok(DecRefPicMarking::SlidingWindow);
        }

        let mut operations = vec![];
        loop {
            let operation = match r.read_ue_max::<u8>(6)? {
                0 => break,
                1 => MemoryManagementOperation::MarkShortTermUnused {
                    difference_of_pic_nums_minus1: r.read_ue()?,
                },
                2 => MemoryManagementOperation::MarkLongTermUnused {
                    long_term_pic_num: r.read_ue()?,
                },
                3 => MemoryManagementOperation::AssignLongTerm {
                    difference_of_pic_nums_minus1: r.read_ue()?,
                    long_term_frame_idx: r.read_ue()?,
                },
                4 => MemoryManagementOperation::SetMaxLongTermFrameIdx(
                    MaxLongTermFrameIdx::from_value_plus1(r.read_ue()?),
                ),
                5 => MemoryManagementOperation::MarkAllUnused,
                _ => MemoryManagementOperation::MarkCurrentLongTerm {
                    long_term_frame_idx: r.read_ue()?,
                },
            };

            if operations.len() == MAX_MMCO_COUNT {
                return Err(ParseError::BrokenData(
                    "too many memory management control operations".into(),
                ));
            }

            operations.push(operation);
        }

        Ok(DecRefPicMarking::Adaptive(operations))
    }

    /// Number of bits of slice_group_change_cycle,
    /// `Ceil(Log2(PicSizeInMapUnits / SliceGroupChangeRate + 1))`.
    fn slice_group_change_cycle_bits(pic_size_in_map_units: u64, change_rate: u64) -> usize {
        // Ceil(x / r + 1) without the division: the smallest n with
        // r * 2^n >= x + r.
        let target = pic_size_in_map_units + change_rate;
        let mut bits = 0;
        while (change_rate << bits) < target {
            bits += 1;
        }

        bits
    }

    /// Parses a slice header from a slice NAL unit. The PPS the slice refers
    /// to, and its SPS, must be in the store.
    pub fn parse_slice_header<'a>(&self, nalu: Nalu<'a>) -> ParseResult<Slice<'a>> {
        let mut mvc = false;
        match nalu.header.type_ {
            NaluType::Slice | NaluType::SliceDpa | NaluType::SliceIdr => (),
            NaluType::SliceExt => match nalu.header.extension {
                Some(NaluHeaderExtension::Mvc(_)) => mvc = true,
                _ => return Err(ParseError::Unsupported("SVC slice header extension")),
            },
            NaluType::SliceDpb | NaluType::SliceDpc => {
                return Err(ParseError::Unsupported("slice data partitions B and C"))
            }
            NaluType::SliceDepth => {
                return Err(ParseError::Unsupported("3D-AVC slice header extension"))
            }
            other => {
                return Err(ParseError::BrokenData(format!(
                    "{other:?} is not a slice NAL unit"
                )))
            }
        }

        let mut r = NaluReader::new(nalu.payload(), true);

        let mut header = SliceHeader {
            first_mb_in_slice: r.read_ue()?,
            ..Default::default()
        };

        let slice_type = r.read_ue_max::<u8>(9)? % 5;
        header.slice_type = SliceType::n(slice_type).ok_or_else(|| {
            ParseError::BrokenData(format!("invalid slice type {slice_type}"))
        })?;

        header.pic_parameter_set_id = r.read_ue_max((MAX_PPS_COUNT - 1) as u32)?;

        let pps = self.get_pps(header.pic_parameter_set_id).ok_or_else(|| {
            ParseError::BrokenLink(format!(
                "slice refers to PPS {}, which has not been parsed",
                header.pic_parameter_set_id
            ))
        })?;
        let sps = self.pps_sequence(pps)?;

        if sps.separate_colour_plane_flag {
            header.colour_plane_id = r.read_bits(2)?;
        }

        header.frame_num = r.read_bits(usize::from(sps.log2_max_frame_num_minus4) + 4)?;

        if !sps.frame_mbs_only_flag {
            header.field_pic_flag = r.read_bit()?;
            if header.field_pic_flag {
                header.bottom_field_flag = r.read_bit()?;
            }
        }

        header.max_pic_num = if header.field_pic_flag {
            2 * sps.max_frame_num
        } else {
            sps.max_frame_num
        };

        if nalu.header.idr_pic_flag {
            header.idr_pic_id = Some(r.read_ue_max(0xffff)?);
        }

        let pic_order_cnt_start = r.position();
        match &sps.pic_order_cnt {
            PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4,
            } => {
                header.pic_order_cnt_lsb =
                    r.read_bits(usize::from(*log2_max_pic_order_cnt_lsb_minus4) + 4)?;

                if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                    header.delta_pic_order_cnt_bottom = r.read_se()?;
                }
            }
            PicOrderCnt::Type1 {
                delta_pic_order_always_zero_flag: false,
                ..
            } => {
                header.delta_pic_order_cnt[0] = r.read_se()?;

                if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                    header.delta_pic_order_cnt[1] = r.read_se()?;
                }
            }
            _ => (),
        }
        header.pic_order_cnt_bit_size = (r.position() - pic_order_cnt_start) as usize;

        if pps.redundant_pic_cnt_present_flag {
            header.redundant_pic_cnt = r.read_ue_max(127)?;
        }

        if header.slice_type.is_b() {
            header.direct_spatial_mv_pred_flag = r.read_bit()?;
        }

        let inter = header.slice_type.is_p() || header.slice_type.is_sp() || header.slice_type.is_b();
        if inter {
            header.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
            if header.slice_type.is_b() {
                header.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
            }

            header.num_ref_idx_active_override_flag = r.read_bit()?;
            if header.num_ref_idx_active_override_flag {
                header.num_ref_idx_l0_active_minus1 = r.read_ue_max(31)?;
                if header.slice_type.is_b() {
                    header.num_ref_idx_l1_active_minus1 = r.read_ue_max(31)?;
                }
            }
        }

        // Frames address up to 16 references, fields up to 32. Lists the
        // slice type does not use stay at zero.
        let max_ref_idx = if header.field_pic_flag { 31 } else { 15 };
        if header.num_ref_idx_l0_active_minus1 > max_ref_idx
            || header.num_ref_idx_l1_active_minus1 > max_ref_idx
        {
            return Err(ParseError::BrokenData(format!(
                "num_ref_idx_active_minus1 above {max_ref_idx}"
            )));
        }

        if !header.slice_type.is_i() && !header.slice_type.is_si() && r.read_bit()? {
            header.ref_pic_list_modification_l0 =
                Some(Parser::parse_ref_pic_list_modification(&mut r, mvc)?);
        }

        if header.slice_type.is_b() && r.read_bit()? {
            header.ref_pic_list_modification_l1 =
                Some(Parser::parse_ref_pic_list_modification(&mut r, mvc)?);
        }

        if (pps.weighted_pred_flag && (header.slice_type.is_p() || header.slice_type.is_sp()))
            || (pps.weighted_bipred_idc == 1 && header.slice_type.is_b())
        {
            header.pred_weight_table = Some(Parser::parse_pred_weight_table(&mut r, sps, &header)?);
        }

        if nalu.header.ref_idc != 0 {
            let marking_start = r.position();
            header.dec_ref_pic_marking = Some(Parser::parse_dec_ref_pic_marking(
                &mut r,
                nalu.header.idr_pic_flag,
            )?);
            header.dec_ref_pic_marking_bit_size = (r.position() - marking_start) as usize;
        }

        if pps.entropy_coding_mode_flag && !header.slice_type.is_i() && !header.slice_type.is_si() {
            header.cabac_init_idc = r.read_ue_max(2)?;
        }

        let qp_bd_offset_y = 6 * i32::from(sps.bit_depth_luma_minus8);
        header.slice_qp_delta = r.read_se_bounded(-(26 + qp_bd_offset_y), 25)?;

        if header.slice_type.is_sp() || header.slice_type.is_si() {
            if header.slice_type.is_sp() {
                header.sp_for_switch_flag = r.read_bit()?;
            }

            header.slice_qs_delta = r.read_se_bounded(-26, 25)?;
        }

        if pps.deblocking_filter_control_present_flag {
            header.disable_deblocking_filter_idc = r.read_ue_max(2)?;

            if header.disable_deblocking_filter_idc != 1 {
                header.slice_alpha_c0_offset_div2 = r.read_se_bounded(-6, 6)?;
                header.slice_beta_offset_div2 = r.read_se_bounded(-6, 6)?;
            }
        }

        if let Some(SliceGroups {
            map:
                SliceGroupMap::Changing {
                    slice_group_change_rate_minus1,
                    ..
                },
            ..
        }) = &pps.slice_groups
        {
            let bits = Parser::slice_group_change_cycle_bits(
                sps.pic_size_in_map_units(),
                u64::from(*slice_group_change_rate_minus1) + 1,
            );
            header.slice_group_change_cycle = Some(r.read_bits(bits)?);
        }

        header.header_bit_size = r.position() as usize;
        header.n_emulation_prevention_bytes = r.num_epb();

        Ok(Slice { header, nalu })
    }

    /// Updates the store with a parameter set NAL unit. Other units are
    /// ignored.
    pub fn parse_nalu(&mut self, nalu: &Nalu) -> ParseResult<()> {
        match nalu.header.type_ {
            NaluType::Sps => self.parse_sps(nalu).map(|_| ()),
            NaluType::SubsetSps => self.parse_subset_sps(nalu).map(|_| ()),
            NaluType::Pps => self.parse_pps(nalu).map(|_| ()),
            _ => Ok(()),
        }
    }

    pub fn get_sps(&self, sps_id: u8) -> Option<&Rc<Sps>> {
        self.sps.get(usize::from(sps_id))?.as_ref()
    }

    pub fn get_pps(&self, pps_id: u8) -> Option<&Rc<Pps>> {
        self.pps.get(usize::from(pps_id))?.as_ref()
    }

    /// The SPS parsed, or selected by a buffering period SEI message, last.
    pub fn last_sps(&self) -> Option<&Rc<Sps>> {
        self.get_sps(self.last_sps?)
    }

    /// The PPS parsed last.
    pub fn last_pps(&self) -> Option<&Rc<Pps>> {
        self.get_pps(self.last_pps?)
    }

    /// Resolves the SPS a PPS refers to.
    pub fn pps_sequence(&self, pps: &Pps) -> ParseResult<&Rc<Sps>> {
        self.get_sps(pps.seq_parameter_set_id).ok_or_else(|| {
            ParseError::BrokenLink(format!(
                "PPS {} refers to SPS {}, which is no longer available",
                pps.pic_parameter_set_id, pps.seq_parameter_set_id
            ))
        })
    }

    pub(super) fn set_last_sps(&mut self, sps_id: u8) {
        self.last_sps = Some(sps_id);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::bitstream_utils::NalIterator;
    use crate::codec::h264::nalu::BufferKind;
    use crate::codec::h264::nalu_writer::se_bit_len;
    use crate::codec::h264::nalu_writer::NaluWriter;

    /// SPS, PPS 0, PPS 1 and an IDR I slice referring to PPS 1.
    const STREAM_BASELINE: [u8; 38] = [
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x1e, 0xed, 0x02, 0x83, 0xf2, //
        0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80, //
        0x00, 0x00, 0x00, 0x01, 0x68, 0x53, 0xdf, 0x20, //
        0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x41, 0x00, 0x2f, 0x80,
    ];

    /// An SPS whose cropping window is wider than the picture.
    const STREAM_SPS_INVALID_CROP: [u8; 13] = [
        0x00, 0x00, 0x01, 0x07, 0x00, 0x00, 0x0a, 0xfb, 0xb0, 0x32, 0xc0, 0xca, 0x80,
    ];

    type Writer<'a> = NaluWriter<&'a mut Vec<u8>>;

    /// Builds an Annex-B NAL unit. `body` writes the RBSP up to, but not
    /// including, the trailing bits.
    fn build_nalu(ref_idc: u8, type_: NaluType, body: impl FnOnce(&mut Writer)) -> Vec<u8> {
        let mut buf = vec![0x00, 0x00, 0x00, 0x01];
        {
            let mut w = NaluWriter::new(&mut buf, true);
            w.write_header(ref_idc, type_ as u8).unwrap();
            body(&mut w);
            w.write_f(1, true).unwrap();
            while !w.aligned() {
                w.write_f(1, false).unwrap();
            }
        }
        buf
    }

    fn nalu(buf: &[u8]) -> Nalu<'_> {
        Nalu::identify(buf, 0, BufferKind::Complete).unwrap()
    }

    /// Writes a 4:2:0 SPS of 20x15 macroblocks (320x240) at level 4.0.
    /// `scaling` writes seq_scaling_matrix_present_flag and what follows it,
    /// `poc` writes the picture order count fields and `tail` everything from
    /// frame_cropping_flag on.
    fn write_sps(
        w: &mut Writer,
        profile_idc: u8,
        sps_id: u32,
        scaling: impl FnOnce(&mut Writer),
        poc: impl FnOnce(&mut Writer),
        tail: impl FnOnce(&mut Writer),
    ) {
        w.write_u(8, profile_idc).unwrap();
        // constraint_set flags and reserved_zero_2bits
        w.write_u(8, 0u8).unwrap();
        w.write_u(8, 40u8).unwrap();
        w.write_ue(sps_id).unwrap();
        if Profile::has_chroma_info(profile_idc) {
            // chroma_format_idc, bit_depth_luma_minus8, bit_depth_chroma_minus8
            w.write_ue(1u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            // qpprime_y_zero_transform_bypass_flag
            w.write_f(1, false).unwrap();
            scaling(w);
        }
        // log2_max_frame_num_minus4
        w.write_ue(0u32).unwrap();
        poc(w);
        // max_num_ref_frames, gaps_in_frame_num_value_allowed_flag
        w.write_ue(4u32).unwrap();
        w.write_f(1, false).unwrap();
        w.write_ue(19u32).unwrap();
        w.write_ue(14u32).unwrap();
        // frame_mbs_only_flag, direct_8x8_inference_flag
        w.write_f(1, true).unwrap();
        w.write_f(1, true).unwrap();
        tail(w);
    }

    fn no_scaling(w: &mut Writer) {
        w.write_f(1, false).unwrap();
    }

    fn poc_type0(w: &mut Writer) {
        w.write_ue(0u32).unwrap();
        // log2_max_pic_order_cnt_lsb_minus4
        w.write_ue(2u32).unwrap();
    }

    fn no_tail(w: &mut Writer) {
        // frame_cropping_flag, vui_parameters_present_flag
        w.write_f(1, false).unwrap();
        w.write_f(1, false).unwrap();
    }

    fn simple_sps(sps_id: u32) -> Vec<u8> {
        build_nalu(3, NaluType::Sps, |w| {
            write_sps(w, 100, sps_id, no_scaling, poc_type0, no_tail)
        })
    }

    /// Writes a PPS. `slice_groups` writes num_slice_groups_minus1 and the
    /// map, `tail` everything after redundant_pic_cnt_present_flag.
    #[allow(clippy::too_many_arguments)]
    fn write_pps(
        w: &mut Writer,
        pps_id: u32,
        sps_id: u32,
        bottom_field_pic_order_in_frame_present: bool,
        slice_groups: impl FnOnce(&mut Writer),
        (num_ref_idx_l0_default, num_ref_idx_l1_default): (u32, u32),
        (weighted_pred, weighted_bipred_idc): (bool, u8),
        deblocking_filter_control_present: bool,
        tail: impl FnOnce(&mut Writer),
    ) {
        w.write_ue(pps_id).unwrap();
        w.write_ue(sps_id).unwrap();
        // entropy_coding_mode_flag
        w.write_f(1, false).unwrap();
        w.write_f(1, bottom_field_pic_order_in_frame_present).unwrap();
        slice_groups(w);
        w.write_ue(num_ref_idx_l0_default).unwrap();
        w.write_ue(num_ref_idx_l1_default).unwrap();
        w.write_f(1, weighted_pred).unwrap();
        w.write_u(2, weighted_bipred_idc).unwrap();
        // pic_init_qp_minus26, pic_init_qs_minus26, chroma_qp_index_offset
        w.write_se(-4).unwrap();
        w.write_se(0).unwrap();
        w.write_se(2).unwrap();
        w.write_f(1, deblocking_filter_control_present).unwrap();
        // constrained_intra_pred_flag, redundant_pic_cnt_present_flag
        w.write_f(1, false).unwrap();
        w.write_f(1, false).unwrap();
        tail(w);
    }

    fn one_slice_group(w: &mut Writer) {
        w.write_ue(0u32).unwrap();
    }

    fn simple_pps(pps_id: u32, sps_id: u32, weighted: (bool, u8)) -> Vec<u8> {
        build_nalu(3, NaluType::Pps, |w| {
            write_pps(w, pps_id, sps_id, false, one_slice_group, (0, 0), weighted, false, |_| ())
        })
    }

    #[test]
    fn parse_baseline_stream() {
        let mut parser = Parser::default();
        let mut slices = vec![];

        for nalu in NalIterator::new(&STREAM_BASELINE) {
            match nalu.header.type_ {
                NaluType::SliceIdr => slices.push(parser.parse_slice_header(nalu).unwrap()),
                _ => parser.parse_nalu(&nalu).unwrap(),
            }
        }

        let sps = parser.get_sps(0).unwrap();
        assert_eq!(sps.profile(), Some(Profile::Baseline));
        assert!(sps.constraint_set0_flag);
        assert!(sps.constraint_set1_flag);
        assert_eq!(sps.level_idc, Level::L3);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.log2_max_frame_num_minus4, 0);
        assert_eq!(sps.max_frame_num, 16);
        assert_eq!(
            sps.pic_order_cnt,
            PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4: 2
            }
        );
        assert_eq!(sps.max_num_ref_frames, 1);
        assert!(sps.frame_mbs_only_flag);
        assert!(sps.direct_8x8_inference_flag);
        assert_eq!((sps.width, sps.height), (320, 240));
        assert_eq!(sps.crop_rect.max, Point { x: 320, y: 240 });
        assert_eq!(sps.frame_cropping, None);
        assert_eq!(sps.vui_parameters, None);
        // Without a scaling matrix, lists are flat.
        assert_eq!(sps.scaling_lists_4x4, [[16; 16]; 6]);
        // Level 3.0 holds 8100 / 300 frames, capped at 16.
        assert_eq!(sps.max_dpb_frames(), 16);

        let pps0 = parser.get_pps(0).unwrap();
        assert!(pps0.deblocking_filter_control_present_flag);
        assert!(!pps0.weighted_pred_flag);
        assert_eq!(pps0.slice_groups, None);
        assert!(!pps0.transform_8x8_mode_flag);
        assert_eq!(pps0.scaling_lists_4x4, sps.scaling_lists_4x4);
        assert!(Rc::ptr_eq(parser.pps_sequence(pps0).unwrap(), sps));

        let pps1 = parser.get_pps(1).unwrap();
        assert!(pps1.weighted_pred_flag);
        assert_eq!(pps1.weighted_bipred_idc, 1);
        assert_eq!(parser.last_pps().unwrap().pic_parameter_set_id, 1);
        assert_eq!(parser.last_sps().unwrap().seq_parameter_set_id, 0);

        assert_eq!(slices.len(), 1);
        let hdr = &slices[0].header;
        // slice_type 7 is an I slice.
        assert_eq!(hdr.slice_type, SliceType::I);
        assert_eq!(hdr.pic_parameter_set_id, 1);
        assert_eq!(hdr.first_mb_in_slice, 0);
        assert_eq!(hdr.frame_num, 0);
        assert_eq!(hdr.idr_pic_id, Some(0));
        assert_eq!(hdr.pic_order_cnt_lsb, 0);
        assert_eq!(hdr.pic_order_cnt_bit_size, 6);
        // Weighted prediction is enabled in the PPS but I slices carry none.
        assert_eq!(hdr.ref_pic_list_modification_l0, None);
        assert_eq!(hdr.pred_weight_table, None);
        assert_eq!(
            hdr.dec_ref_pic_marking,
            Some(DecRefPicMarking::Idr {
                no_output_of_prior_pics_flag: false,
                long_term_reference_flag: false,
            })
        );
        assert_eq!(hdr.dec_ref_pic_marking_bit_size, 2);
        assert_eq!(hdr.slice_qp_delta, -2);
        assert_eq!(hdr.disable_deblocking_filter_idc, 0);
        assert_eq!(hdr.max_pic_num, 16);
        assert_eq!(hdr.header_bit_size, 32);
        assert_eq!(hdr.n_emulation_prevention_bytes, 0);
        assert_eq!(slices[0].nalu.header.type_, NaluType::SliceIdr);
    }

    #[test]
    fn pps_before_sps_is_broken_link() {
        let mut parser = Parser::default();
        let mut cursor = Cursor::new(&STREAM_BASELINE[..]);

        let sps = Nalu::next(&mut cursor).unwrap();
        assert_eq!(sps.header.type_, NaluType::Sps);
        cursor.set_position(sps.end() as u64);
        let pps = Nalu::next(&mut cursor).unwrap();

        assert!(matches!(
            parser.parse_pps(&pps),
            Err(ParseError::BrokenLink(_))
        ));
        assert!(parser.get_pps(0).is_none());
        assert!(parser.last_pps().is_none());

        parser.parse_sps(&sps).unwrap();
        parser.parse_pps(&pps).unwrap();
        assert!(parser.get_pps(0).is_some());
    }

    #[test]
    fn slice_without_pps_is_broken_link() {
        let mut parser = Parser::default();
        let nalus = NalIterator::new(&STREAM_BASELINE).collect::<Vec<_>>();
        parser.parse_sps(&nalus[0]).unwrap();

        let err = parser.parse_slice_header(nalus[3].clone()).err().unwrap();
        assert!(matches!(err, ParseError::BrokenLink(_)));
        assert!(parser.get_pps(1).is_none());
    }

    #[test]
    fn invalid_crop_is_rejected() {
        let mut parser = Parser::default();
        let nalu = nalu(&STREAM_SPS_INVALID_CROP);
        assert!(parser.parse_sps(&nalu).is_err());
        assert!(parser.get_sps(0).is_none());
        assert!(parser.last_sps().is_none());
    }

    #[test]
    fn wrong_nalu_types() {
        let mut parser = Parser::default();
        let nalus = NalIterator::new(&STREAM_BASELINE).collect::<Vec<_>>();

        assert!(matches!(
            parser.parse_pps(&nalus[0]),
            Err(ParseError::BrokenData(_))
        ));
        assert!(matches!(
            parser.parse_slice_header(nalus[0].clone()).err(),
            Some(ParseError::BrokenData(_))
        ));

        let partition = build_nalu(2, NaluType::SliceDpb, |w| w.write_ue(0u32).unwrap());
        assert!(matches!(
            parser.parse_slice_header(nalu(&partition)).err(),
            Some(ParseError::Unsupported(_))
        ));

        // svc_extension_flag set.
        let svc = build_nalu(2, NaluType::SliceExt, |w| {
            w.write_u(8, 0x80u8).unwrap();
            w.write_u(16, 0u16).unwrap();
            w.write_ue(0u32).unwrap();
        });
        assert!(matches!(
            parser.parse_slice_header(nalu(&svc)).err(),
            Some(ParseError::Unsupported(_))
        ));
    }

    /// Writes delta_scale values for a list whose coefficients are all
    /// `value`, stopping early through next_scale == 0.
    fn write_constant_list(w: &mut Writer, value: i32) {
        w.write_se(value - 8).unwrap();
        w.write_se(-value).unwrap();
    }

    #[test]
    fn sps_scaling_lists() {
        let buf = build_nalu(3, NaluType::Sps, |w| {
            write_sps(
                w,
                100,
                0,
                |w| {
                    w.write_f(1, true).unwrap();
                    // 4x4: 0 explicit, 1 and 2 absent, 3 default, 4 and 5 absent.
                    w.write_f(1, true).unwrap();
                    write_constant_list(w, 20);
                    w.write_f(1, false).unwrap();
                    w.write_f(1, false).unwrap();
                    w.write_f(1, true).unwrap();
                    w.write_se(-8).unwrap();
                    w.write_f(1, false).unwrap();
                    w.write_f(1, false).unwrap();
                    // 8x8: 0 explicit, 1 absent.
                    w.write_f(1, true).unwrap();
                    write_constant_list(w, 24);
                    w.write_f(1, false).unwrap();
                },
                poc_type0,
                no_tail,
            )
        });

        let mut parser = Parser::default();
        let sps = parser.parse_sps(&nalu(&buf)).unwrap();

        assert!(sps.seq_scaling_matrix_present_flag);
        assert_eq!(sps.scaling_lists_4x4[0], [20; 16]);
        assert_eq!(sps.scaling_lists_4x4[1], [20; 16]);
        assert_eq!(sps.scaling_lists_4x4[2], [20; 16]);
        assert_eq!(sps.scaling_lists_4x4[3], DEFAULT_4X4_INTER);
        assert_eq!(sps.scaling_lists_4x4[4], DEFAULT_4X4_INTER);
        assert_eq!(sps.scaling_lists_4x4[5], DEFAULT_4X4_INTER);
        assert_eq!(sps.scaling_lists_8x8[0], [24; 64]);
        assert_eq!(sps.scaling_lists_8x8[1], DEFAULT_8X8_INTER);
        // Unsignalled 4:4:4 lists chain from two lists before.
        assert_eq!(sps.scaling_lists_8x8[2], [24; 64]);
        assert_eq!(sps.scaling_lists_8x8[3], DEFAULT_8X8_INTER);
        assert_eq!(sps.scaling_lists_8x8[4], [24; 64]);
        assert_eq!(sps.scaling_lists_8x8[5], DEFAULT_8X8_INTER);

        // A PPS signalling a matrix without any list falls back to the SPS
        // lists (rule B).
        let pps = build_nalu(3, NaluType::Pps, |w| {
            write_pps(w, 0, 0, false, one_slice_group, (0, 0), (false, 0), false, |w| {
                // transform_8x8_mode_flag, pic_scaling_matrix_present_flag
                w.write_f(1, true).unwrap();
                w.write_f(1, true).unwrap();
                for _ in 0..8 {
                    w.write_f(1, false).unwrap();
                }
                w.write_se(-3).unwrap();
            })
        });
        let pps = parser.parse_pps(&nalu(&pps)).unwrap().clone();
        let sps = parser.get_sps(0).unwrap();

        assert!(pps.transform_8x8_mode_flag);
        assert!(pps.pic_scaling_matrix_present_flag);
        assert_eq!(pps.chroma_qp_index_offset, 2);
        assert_eq!(pps.second_chroma_qp_index_offset, -3);
        assert_eq!(pps.pic_init_qp_minus26, -4);
        assert_eq!(pps.scaling_lists_4x4[0..3], [sps.scaling_lists_4x4[0]; 3]);
        assert_eq!(pps.scaling_lists_4x4[3..6], [sps.scaling_lists_4x4[3]; 3]);
        assert_eq!(pps.scaling_lists_8x8[0], sps.scaling_lists_8x8[0]);
        assert_eq!(pps.scaling_lists_8x8[1], sps.scaling_lists_8x8[1]);
    }

    #[test]
    fn sps_scaling_matrix_without_lists() {
        let buf = build_nalu(3, NaluType::Sps, |w| {
            write_sps(
                w,
                100,
                0,
                |w| {
                    w.write_f(1, true).unwrap();
                    for _ in 0..8 {
                        w.write_f(1, false).unwrap();
                    }
                },
                poc_type0,
                no_tail,
            )
        });

        let mut parser = Parser::default();
        let sps = parser.parse_sps(&nalu(&buf)).unwrap();

        // Fallback rule A resolves every list to the Default tables.
        for (i, list) in sps.scaling_lists_8x8.iter().enumerate() {
            let default = if i % 2 == 0 {
                DEFAULT_8X8_INTRA
            } else {
                DEFAULT_8X8_INTER
            };
            assert_eq!(*list, default);
        }
        assert_eq!(sps.scaling_lists_4x4[0..3], [DEFAULT_4X4_INTRA; 3]);
        assert_eq!(sps.scaling_lists_4x4[3..6], [DEFAULT_4X4_INTER; 3]);

        // A PPS without a matrix inherits the SPS lists.
        let pps = simple_pps(0, 0, (false, 0));
        let pps = parser.parse_pps(&nalu(&pps)).unwrap().clone();
        let sps = parser.get_sps(0).unwrap();
        assert_eq!(pps.scaling_lists_4x4, sps.scaling_lists_4x4);
        assert_eq!(pps.scaling_lists_8x8, sps.scaling_lists_8x8);
        assert!(!pps.has_trailing_fields());
    }

    #[test]
    fn sps_vui_and_cropping() {
        let buf = build_nalu(3, NaluType::Sps, |w| {
            write_sps(w, 77, 3, no_scaling, poc_type0, |w| {
                // Crop 2 units left and 4 at the bottom.
                w.write_f(1, true).unwrap();
                w.write_ue(2u32).unwrap();
                w.write_ue(0u32).unwrap();
                w.write_ue(0u32).unwrap();
                w.write_ue(4u32).unwrap();

                w.write_f(1, true).unwrap();
                // aspect_ratio_info_present_flag, aspect_ratio_idc
                w.write_f(1, true).unwrap();
                w.write_u(8, AspectRatioInfo::EXTENDED_SAR).unwrap();
                w.write_u(16, 4u16).unwrap();
                w.write_u(16, 3u16).unwrap();
                // overscan_info_present_flag
                w.write_f(1, false).unwrap();
                // video_signal_type_present_flag
                w.write_f(1, true).unwrap();
                w.write_u(3, 5u8).unwrap();
                w.write_f(1, true).unwrap();
                w.write_f(1, true).unwrap();
                w.write_u(8, 1u8).unwrap();
                w.write_u(8, 16u8).unwrap();
                w.write_u(8, 9u8).unwrap();
                // chroma_loc_info_present_flag
                w.write_f(1, false).unwrap();
                // timing_info_present_flag
                w.write_f(1, true).unwrap();
                w.write_u(32, 1001u32).unwrap();
                w.write_u(32, 60000u32).unwrap();
                w.write_f(1, true).unwrap();
                // nal_hrd_parameters_present_flag
                w.write_f(1, true).unwrap();
                w.write_ue(0u32).unwrap();
                w.write_u(4, 4u8).unwrap();
                w.write_u(4, 6u8).unwrap();
                w.write_ue(1000u32).unwrap();
                w.write_ue(2000u32).unwrap();
                w.write_f(1, true).unwrap();
                w.write_u(5, 23u8).unwrap();
                w.write_u(5, 23u8).unwrap();
                w.write_u(5, 23u8).unwrap();
                w.write_u(5, 24u8).unwrap();
                // vcl_hrd_parameters_present_flag
                w.write_f(1, false).unwrap();
                // low_delay_hrd_flag, pic_struct_present_flag
                w.write_f(1, false).unwrap();
                w.write_f(1, true).unwrap();
                // bitstream_restriction_flag
                w.write_f(1, true).unwrap();
                w.write_f(1, true).unwrap();
                w.write_ue(2u32).unwrap();
                w.write_ue(1u32).unwrap();
                w.write_ue(16u32).unwrap();
                w.write_ue(16u32).unwrap();
                w.write_ue(2u32).unwrap();
                w.write_ue(4u32).unwrap();
            })
        });

        let mut parser = Parser::default();
        let sps = parser.parse_sps(&nalu(&buf)).unwrap();

        assert_eq!(sps.seq_parameter_set_id, 3);
        assert_eq!(sps.profile(), Some(Profile::Main));
        assert_eq!(
            sps.frame_cropping,
            Some(FrameCropping {
                frame_crop_left_offset: 2,
                frame_crop_right_offset: 0,
                frame_crop_top_offset: 0,
                frame_crop_bottom_offset: 4,
            })
        );
        // 4:2:0 crop units are two samples wide and high.
        assert_eq!(sps.crop_rect.min, Point { x: 4, y: 0 });
        assert_eq!(sps.crop_rect.max, Point { x: 320, y: 232 });

        let vui = sps.vui_parameters.as_ref().unwrap();
        assert_eq!(
            vui.aspect_ratio_info,
            Some(AspectRatioInfo {
                aspect_ratio_idc: AspectRatioInfo::EXTENDED_SAR,
                sar_width: 4,
                sar_height: 3,
            })
        );
        assert_eq!(vui.overscan_appropriate_flag, None);
        let signal = vui.video_signal_type.as_ref().unwrap();
        assert_eq!(signal.video_format, 5);
        assert!(signal.video_full_range_flag);
        assert_eq!(
            signal.colour_description,
            Some(ColourDescription {
                colour_primaries: 1,
                transfer_characteristics: 16,
                matrix_coefficients: 9,
            })
        );
        assert_eq!(vui.chroma_loc_info, None);
        assert!(vui.timing_info.as_ref().unwrap().fixed_frame_rate_flag);

        let hrd = vui.hrd_parameters().unwrap();
        assert_eq!(hrd.bit_rate_scale, 4);
        assert_eq!(hrd.cpb_size_scale, 6);
        assert_eq!(
            hrd.cpb_specs,
            vec![CpbSpec {
                bit_rate_value_minus1: 1000,
                cpb_size_value_minus1: 2000,
                cbr_flag: true,
            }]
        );
        assert_eq!(hrd.cpb_removal_delay_length_minus1, 23);
        assert_eq!(hrd.time_offset_length, 24);
        assert!(vui.vcl_hrd_parameters.is_none());
        assert!(vui.pic_struct_present_flag);

        let restriction = vui.bitstream_restriction.as_ref().unwrap();
        assert_eq!(restriction.max_bytes_per_pic_denom, 2);
        assert_eq!(sps.max_num_order_frames(), 2);
        assert_eq!(sps.max_dpb_frames(), 4);

        assert_eq!(sps.framerate(false, None), Some((60000, 2002)));
        assert_eq!(sps.framerate(true, None), Some((60000, 1001)));
        // Frame doubling lasts four field periods.
        assert_eq!(sps.framerate(false, Some(7)), Some((60000, 4004)));
        assert_eq!(sps.framerate(false, Some(9)), None);
    }

    #[test]
    fn zero_time_scale_is_rejected() {
        let buf = build_nalu(3, NaluType::Sps, |w| {
            write_sps(w, 66, 0, no_scaling, poc_type0, |w| {
                w.write_f(1, false).unwrap();
                w.write_f(1, true).unwrap();
                for _ in 0..4 {
                    w.write_f(1, false).unwrap();
                }
                w.write_f(1, true).unwrap();
                w.write_u(32, 1u32).unwrap();
                w.write_u(32, 0u32).unwrap();
            })
        });

        let mut parser = Parser::default();
        assert!(matches!(
            parser.parse_sps(&nalu(&buf)),
            Err(ParseError::BrokenData(_))
        ));
    }

    #[test]
    fn pps_slice_groups() {
        let mut parser = Parser::default();
        parser.parse_sps(&nalu(&simple_sps(0))).unwrap();

        let mut parse_groups = |groups: &dyn Fn(&mut Writer)| {
            let buf = build_nalu(3, NaluType::Pps, |w| {
                write_pps(w, 0, 0, false, groups, (0, 0), (false, 0), false, |_| ())
            });
            parser
                .parse_pps(&nalu(&buf))
                .map(|pps| pps.slice_groups.clone())
        };

        let interleaved = parse_groups(&|w: &mut Writer| {
            w.write_ue(1u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(9u32).unwrap();
            w.write_ue(19u32).unwrap();
        });
        assert_eq!(
            interleaved.unwrap(),
            Some(SliceGroups {
                num_slice_groups_minus1: 1,
                map: SliceGroupMap::Interleaved {
                    run_length_minus1: vec![9, 19]
                },
            })
        );

        let foreground = parse_groups(&|w: &mut Writer| {
            w.write_ue(2u32).unwrap();
            w.write_ue(2u32).unwrap();
            for value in [0u32, 20, 21, 41] {
                w.write_ue(value).unwrap();
            }
        });
        assert_eq!(
            foreground.unwrap().unwrap().map,
            SliceGroupMap::Foreground {
                top_left: vec![0, 21],
                bottom_right: vec![20, 41],
            }
        );

        let box_out = parse_groups(&|w: &mut Writer| {
            w.write_ue(1u32).unwrap();
            w.write_ue(3u32).unwrap();
            w.write_f(1, true).unwrap();
            w.write_ue(9u32).unwrap();
        });
        let box_out = box_out.unwrap().unwrap();
        assert_eq!(box_out.map.slice_group_map_type(), 3);
        assert_eq!(
            box_out.map,
            SliceGroupMap::Changing {
                change_type: SliceGroupChangeType::BoxOut,
                slice_group_change_direction_flag: true,
                slice_group_change_rate_minus1: 9,
            }
        );

        let explicit = parse_groups(&|w: &mut Writer| {
            w.write_ue(2u32).unwrap();
            w.write_ue(6u32).unwrap();
            w.write_ue(299u32).unwrap();
            // Three groups take two bits per map unit.
            for i in 0..300u32 {
                w.write_u(2, i % 3).unwrap();
            }
        });
        let explicit = explicit.unwrap().unwrap();
        let SliceGroupMap::Explicit { slice_group_id } = &explicit.map else {
            panic!("unexpected map {:?}", explicit.map);
        };
        assert_eq!(slice_group_id.len(), 300);
        assert_eq!(slice_group_id[0..4], [0, 1, 2, 0]);

        // More map units than the picture holds.
        let oversized = parse_groups(&|w: &mut Writer| {
            w.write_ue(1u32).unwrap();
            w.write_ue(6u32).unwrap();
            w.write_ue(300u32).unwrap();
        });
        assert!(matches!(oversized, Err(ParseError::BrokenData(_))));
    }

    #[test]
    fn slice_group_change_cycle() {
        assert_eq!(Parser::slice_group_change_cycle_bits(300, 10), 5);
        assert_eq!(Parser::slice_group_change_cycle_bits(300, 1), 9);
        assert_eq!(Parser::slice_group_change_cycle_bits(256, 1), 9);
        assert_eq!(Parser::slice_group_change_cycle_bits(16, 16), 1);

        let mut parser = Parser::default();
        parser.parse_sps(&nalu(&simple_sps(0))).unwrap();
        let pps = build_nalu(3, NaluType::Pps, |w| {
            write_pps(
                w,
                0,
                0,
                false,
                |w| {
                    w.write_ue(1u32).unwrap();
                    w.write_ue(4u32).unwrap();
                    w.write_f(1, false).unwrap();
                    w.write_ue(9u32).unwrap();
                },
                (0, 0),
                (false, 0),
                false,
                |_| (),
            )
        });
        parser.parse_pps(&nalu(&pps)).unwrap();

        let slice = build_nalu(0, NaluType::Slice, |w| {
            w.write_ue(0u32).unwrap();
            // I slice
            w.write_ue(2u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(4, 1u8).unwrap();
            w.write_u(6, 2u8).unwrap();
            w.write_se(0).unwrap();
            w.write_u(5, 17u8).unwrap();
        });
        let slice = parser.parse_slice_header(nalu(&slice)).unwrap();
        assert_eq!(slice.header.slice_group_change_cycle, Some(17));
        assert_eq!(slice.header.dec_ref_pic_marking, None);
        assert_eq!(slice.header.idr_pic_id, None);
        assert_eq!(slice.header.frame_num, 1);
        assert_eq!(slice.header.pic_order_cnt_lsb, 2);
    }

    #[test]
    fn p_slice_with_modifications_weights_and_mmco() {
        let mut parser = Parser::default();
        parser.parse_sps(&nalu(&simple_sps(0))).unwrap();
        parser
            .parse_pps(&nalu(&simple_pps(2, 0, (true, 0))))
            .unwrap();

        let mut end_bits = 0;
        let buf = build_nalu(2, NaluType::Slice, |w| {
            w.write_ue(10u32).unwrap();
            // P slice, all slices of the picture are P.
            w.write_ue(5u32).unwrap();
            w.write_ue(2u32).unwrap();
            w.write_u(4, 3u8).unwrap();
            w.write_u(6, 6u8).unwrap();
            // num_ref_idx_active_override_flag
            w.write_f(1, true).unwrap();
            w.write_ue(1u32).unwrap();

            // ref_pic_list_modification_flag_l0
            w.write_f(1, true).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(2u32).unwrap();
            w.write_ue(1u32).unwrap();
            w.write_ue(3u32).unwrap();

            // pred_weight_table: denominators 5 and 3.
            w.write_ue(5u32).unwrap();
            w.write_ue(3u32).unwrap();
            w.write_f(1, true).unwrap();
            w.write_se(40).unwrap();
            w.write_se(-3).unwrap();
            w.write_f(1, false).unwrap();
            w.write_f(1, false).unwrap();
            w.write_f(1, true).unwrap();
            for (weight, offset) in [(7, -1), (9, 2)] {
                w.write_se(weight).unwrap();
                w.write_se(offset).unwrap();
            }

            // adaptive_ref_pic_marking_mode_flag
            w.write_f(1, true).unwrap();
            for value in [1u32, 0, 3, 1, 0, 4, 2, 6, 1, 5, 0] {
                w.write_ue(value).unwrap();
            }

            w.write_se(3).unwrap();
            end_bits = w.position();
        });

        let slice = parser.parse_slice_header(nalu(&buf)).unwrap();
        let hdr = &slice.header;

        assert_eq!(hdr.first_mb_in_slice, 10);
        assert_eq!(hdr.slice_type, SliceType::P);
        assert_eq!(hdr.frame_num, 3);
        assert_eq!(hdr.pic_order_cnt_lsb, 6);
        assert!(hdr.num_ref_idx_active_override_flag);
        assert_eq!(hdr.num_ref_idx_l0_active_minus1, 1);

        assert_eq!(
            hdr.ref_pic_list_modification_l0,
            Some(vec![
                RefPicListModification::SubtractShortTerm {
                    abs_diff_pic_num_minus1: 0
                },
                RefPicListModification::LongTerm {
                    long_term_pic_num: 1
                },
            ])
        );
        assert_eq!(hdr.ref_pic_list_modification_l1, None);

        let pwt = hdr.pred_weight_table.as_ref().unwrap();
        assert_eq!(pwt.luma_log2_weight_denom, 5);
        assert_eq!(pwt.chroma_log2_weight_denom, 3);
        assert_eq!(pwt.luma_weight_l0[0..3], [40, 32, 0]);
        assert_eq!(pwt.luma_offset_l0[0..2], [-3, 0]);
        assert_eq!(pwt.chroma_weight_l0[0], [8, 8]);
        assert_eq!(pwt.chroma_weight_l0[1], [7, 9]);
        assert_eq!(pwt.chroma_offset_l0[1], [-1, 2]);

        let Some(DecRefPicMarking::Adaptive(ops)) = &hdr.dec_ref_pic_marking else {
            panic!("unexpected marking {:?}", hdr.dec_ref_pic_marking);
        };
        assert_eq!(
            ops,
            &vec![
                MemoryManagementOperation::MarkShortTermUnused {
                    difference_of_pic_nums_minus1: 0
                },
                MemoryManagementOperation::AssignLongTerm {
                    difference_of_pic_nums_minus1: 1,
                    long_term_frame_idx: 0,
                },
                MemoryManagementOperation::SetMaxLongTermFrameIdx(MaxLongTermFrameIdx::Idx(1)),
                MemoryManagementOperation::MarkCurrentLongTerm {
                    long_term_frame_idx: 1
                },
                MemoryManagementOperation::MarkAllUnused,
            ]
        );
        assert_eq!(
            ops.iter()
                .map(|op| op.memory_management_control_operation())
                .collect::<Vec<_>>(),
            vec![1, 3, 4, 6, 5]
        );
        assert_eq!(hdr.dec_ref_pic_marking_bit_size, 36);

        assert_eq!(hdr.slice_qp_delta, 3);
        assert_eq!(hdr.header_bit_size as u64, end_bits - 8);
        assert_eq!(hdr.pic_order_cnt_bit_size, 6);
    }

    #[test]
    fn too_many_modifications() {
        let mut parser = Parser::default();
        parser.parse_sps(&nalu(&simple_sps(0))).unwrap();
        parser
            .parse_pps(&nalu(&simple_pps(0, 0, (false, 0))))
            .unwrap();

        let buf = build_nalu(0, NaluType::Slice, |w| {
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(4, 0u8).unwrap();
            w.write_u(6, 0u8).unwrap();
            w.write_f(1, false).unwrap();
            w.write_f(1, true).unwrap();
            for _ in 0..=MAX_REF_PIC_LIST_MODIFICATIONS {
                w.write_ue(0u32).unwrap();
                w.write_ue(0u32).unwrap();
            }
            w.write_ue(3u32).unwrap();
            w.write_se(0).unwrap();
        });

        assert!(matches!(
            parser.parse_slice_header(nalu(&buf)).err(),
            Some(ParseError::BrokenData(_))
        ));
    }

    /// Writes PPS 0 of SPS 0 with the given reference index defaults.
    fn pps_with_ref_idx_defaults(l0: u32, l1: u32) -> Vec<u8> {
        build_nalu(3, NaluType::Pps, |w| {
            write_pps(w, 0, 0, false, one_slice_group, (l0, l1), (false, 0), false, |_| ())
        })
    }

    /// Writes a CAVLC slice of PPS 0 up to num_ref_idx_active_override_flag
    /// included, then no list modification, a sliding window marking and
    /// slice_qp_delta.
    fn ref_idx_slice(slice_type: u32, idr: bool, override_l0: Option<u32>) -> Vec<u8> {
        let type_ = if idr { NaluType::SliceIdr } else { NaluType::Slice };
        build_nalu(1, type_, |w| {
            w.write_ue(0u32).unwrap();
            w.write_ue(slice_type).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(4, 0u8).unwrap();
            if idr {
                // idr_pic_id
                w.write_ue(0u32).unwrap();
            }
            w.write_u(6, 0u8).unwrap();

            let inter = slice_type % 5 != 2;
            if inter {
                w.write_f(1, override_l0.is_some()).unwrap();
                if let Some(l0) = override_l0 {
                    w.write_ue(l0).unwrap();
                }
                // ref_pic_list_modification_flag_l0
                w.write_f(1, false).unwrap();
            }

            if idr {
                // no_output_of_prior_pics_flag, long_term_reference_flag
                w.write_f(1, false).unwrap();
                w.write_f(1, false).unwrap();
            } else {
                // adaptive_ref_pic_marking_mode_flag
                w.write_f(1, false).unwrap();
            }
            w.write_se(0).unwrap();
        })
    }

    #[test]
    fn ref_idx_defaults_of_unused_lists() {
        let mut parser = Parser::default();
        parser.parse_sps(&nalu(&simple_sps(0))).unwrap();

        // Both defaults above 15: an I slice uses neither.
        parser.parse_pps(&nalu(&pps_with_ref_idx_defaults(20, 31))).unwrap();
        let slice_buf = ref_idx_slice(7, true, None);
        let slice = parser
            .parse_slice_header(nalu(&slice_buf))
            .unwrap();
        assert_eq!(slice.header.slice_type, SliceType::I);
        assert_eq!(slice.header.num_ref_idx_l0_active_minus1, 0);
        assert_eq!(slice.header.num_ref_idx_l1_active_minus1, 0);

        // A P slice only uses the L0 default.
        parser.parse_pps(&nalu(&pps_with_ref_idx_defaults(3, 16))).unwrap();
        let slice_buf = ref_idx_slice(5, false, None);
        let slice = parser
            .parse_slice_header(nalu(&slice_buf))
            .unwrap();
        assert_eq!(slice.header.slice_type, SliceType::P);
        assert!(!slice.header.num_ref_idx_active_override_flag);
        assert_eq!(slice.header.num_ref_idx_l0_active_minus1, 3);
        assert_eq!(slice.header.num_ref_idx_l1_active_minus1, 0);
    }

    #[test]
    fn ref_idx_default_above_frame_limit() {
        let mut parser = Parser::default();
        parser.parse_sps(&nalu(&simple_sps(0))).unwrap();
        parser.parse_pps(&nalu(&pps_with_ref_idx_defaults(20, 0))).unwrap();

        // A frame P slice must override an L0 default above 15.
        assert!(matches!(
            parser.parse_slice_header(nalu(&ref_idx_slice(5, false, None))),
            Err(ParseError::BrokenData(_))
        ));

        let slice_buf = ref_idx_slice(5, false, Some(15));
        let slice = parser
            .parse_slice_header(nalu(&slice_buf))
            .unwrap();
        assert!(slice.header.num_ref_idx_active_override_flag);
        assert_eq!(slice.header.num_ref_idx_l0_active_minus1, 15);
    }

    #[test]
    fn pic_order_cnt_type1() {
        let buf = build_nalu(3, NaluType::Sps, |w| {
            write_sps(
                w,
                66,
                0,
                no_scaling,
                |w| {
                    w.write_ue(1u32).unwrap();
                    w.write_f(1, false).unwrap();
                    w.write_se(-2).unwrap();
                    w.write_se(1).unwrap();
                    w.write_ue(3u32).unwrap();
                    for offset in [4, -1, 6] {
                        w.write_se(offset).unwrap();
                    }
                },
                no_tail,
            )
        });

        let mut parser = Parser::default();
        let sps = parser.parse_sps(&nalu(&buf)).unwrap();
        assert_eq!(
            sps.pic_order_cnt,
            PicOrderCnt::Type1 {
                delta_pic_order_always_zero_flag: false,
                offset_for_non_ref_pic: -2,
                offset_for_top_to_bottom_field: 1,
                offset_for_ref_frame: vec![4, -1, 6],
                expected_delta_per_pic_order_cnt_cycle: 9,
            }
        );
        assert_eq!(sps.pic_order_cnt.pic_order_cnt_type(), 1);

        let pps = build_nalu(3, NaluType::Pps, |w| {
            write_pps(w, 0, 0, true, one_slice_group, (0, 0), (false, 0), true, |_| ())
        });
        parser.parse_pps(&nalu(&pps)).unwrap();

        let slice = build_nalu(0, NaluType::Slice, |w| {
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(4, 5u8).unwrap();
            w.write_se(-5).unwrap();
            w.write_se(3).unwrap();
            // num_ref_idx_active_override_flag, ref_pic_list_modification_flag_l0
            w.write_f(1, false).unwrap();
            w.write_f(1, false).unwrap();
            w.write_se(0).unwrap();
            // disable_deblocking_filter_idc 1 carries no offsets.
            w.write_ue(1u32).unwrap();
        });
        let slice = parser.parse_slice_header(nalu(&slice)).unwrap();
        assert_eq!(slice.header.delta_pic_order_cnt, [-5, 3]);
        assert_eq!(
            slice.header.pic_order_cnt_bit_size,
            se_bit_len(-5) + se_bit_len(3)
        );
        assert_eq!(slice.header.disable_deblocking_filter_idc, 1);
        assert_eq!(slice.header.ref_pic_list_modification_l0, None);
    }

    #[test]
    fn mvc_subset_sps_and_slice_extension() {
        let subset = build_nalu(3, NaluType::SubsetSps, |w| {
            write_sps(w, 118, 1, no_scaling, poc_type0, no_tail);
            // bit_equal_to_one
            w.write_f(1, true).unwrap();
            // Two views, view 1 predicted from view 0.
            w.write_ue(1u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(1u32).unwrap();
            for num_refs in [1u32, 0] {
                w.write_ue(num_refs).unwrap();
                if num_refs == 1 {
                    w.write_ue(0u32).unwrap();
                }
            }
            for num_refs in [1u32, 0] {
                w.write_ue(num_refs).unwrap();
                if num_refs == 1 {
                    w.write_ue(0u32).unwrap();
                }
            }
            // One level value with one operation point targeting both views.
            w.write_ue(0u32).unwrap();
            w.write_u(8, 40u8).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(3, 0u8).unwrap();
            w.write_ue(1u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(1u32).unwrap();
            w.write_ue(1u32).unwrap();
            // mvc_vui_parameters_present_flag, additional_extension2_flag
            w.write_f(1, false).unwrap();
            w.write_f(1, false).unwrap();
        });

        let mut parser = Parser::default();
        let sps = parser.parse_subset_sps(&nalu(&subset)).unwrap();
        assert_eq!(sps.seq_parameter_set_id, 1);
        assert_eq!(sps.profile(), Some(Profile::MultiviewHigh));

        let Some(SpsExtension::Mvc(mvc)) = &sps.extension else {
            panic!("missing MVC extension");
        };
        assert_eq!(mvc.views.len(), 2);
        assert_eq!(mvc.views[0], MvcView::default());
        assert_eq!(
            mvc.views[1],
            MvcView {
                view_id: 1,
                anchor_refs_l0: vec![0],
                anchor_refs_l1: vec![],
                non_anchor_refs_l0: vec![0],
                non_anchor_refs_l1: vec![],
            }
        );
        assert_eq!(
            mvc.level_values,
            vec![MvcLevelValue {
                level_idc: 40,
                applicable_ops: vec![MvcApplicableOp {
                    temporal_id: 0,
                    target_view_ids: vec![0, 1],
                    num_views_minus1: 1,
                }],
            }]
        );

        let pps = build_nalu(3, NaluType::Pps, |w| {
            write_pps(w, 4, 1, false, one_slice_group, (0, 0), (false, 2), false, |_| ())
        });
        parser.parse_pps(&nalu(&pps)).unwrap();

        let slice = build_nalu(0, NaluType::SliceExt, |w| {
            // svc_extension_flag 0, non_idr_flag 1, priority_id 0, view_id 1,
            // temporal_id 0, anchor_pic_flag 0, inter_view_flag 1,
            // reserved_one_bit.
            w.write_f(1, false).unwrap();
            w.write_f(1, true).unwrap();
            w.write_u(6, 0u8).unwrap();
            w.write_u(10, 1u16).unwrap();
            w.write_u(3, 0u8).unwrap();
            w.write_f(1, false).unwrap();
            w.write_f(1, true).unwrap();
            w.write_f(1, true).unwrap();

            w.write_ue(0u32).unwrap();
            // B slice
            w.write_ue(1u32).unwrap();
            w.write_ue(4u32).unwrap();
            w.write_u(4, 2u8).unwrap();
            w.write_u(6, 4u8).unwrap();
            w.write_f(1, true).unwrap();
            w.write_f(1, false).unwrap();
            w.write_f(1, true).unwrap();
            w.write_ue(4u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(3u32).unwrap();
            w.write_f(1, true).unwrap();
            w.write_ue(5u32).unwrap();
            w.write_ue(1u32).unwrap();
            w.write_ue(3u32).unwrap();
            w.write_se(-1).unwrap();
        });

        let slice = parser.parse_slice_header(nalu(&slice)).unwrap();
        let hdr = &slice.header;
        assert_eq!(hdr.slice_type, SliceType::B);
        assert!(hdr.direct_spatial_mv_pred_flag);
        assert_eq!(hdr.idr_pic_id, None);
        assert_eq!(
            hdr.ref_pic_list_modification_l0,
            Some(vec![RefPicListModification::SubtractView {
                abs_diff_view_idx_minus1: 0
            }])
        );
        assert_eq!(
            hdr.ref_pic_list_modification_l1.as_ref().unwrap()[0].modification_of_pic_nums_idc(),
            5
        );
        // Implicit bi-prediction has no table.
        assert_eq!(hdr.pred_weight_table, None);
        assert_eq!(hdr.slice_qp_delta, -1);
    }

    #[test]
    fn sps_replacement_keeps_last() {
        let mut parser = Parser::default();
        parser.parse_sps(&nalu(&simple_sps(0))).unwrap();
        parser.parse_sps(&nalu(&simple_sps(5))).unwrap();
        assert_eq!(parser.last_sps().unwrap().seq_parameter_set_id, 5);
        assert!(parser.get_sps(0).is_some());
        assert!(parser.get_sps(40).is_none());

        parser.set_last_sps(0);
        assert_eq!(parser.last_sps().unwrap().seq_parameter_set_id, 0);
    }

    #[test]
    fn builders_compute_derived_values() {
        let sps = SpsBuilder::new()
            .profile_idc(Profile::High)
            .level_idc(Level::L4)
            .resolution(1920, 1080)
            .max_num_ref_frames(2)
            .timing_info(1, 60, false)
            .build()
            .unwrap();

        assert_eq!((sps.width, sps.height), (1920, 1088));
        assert_eq!(sps.crop_rect.max, Point { x: 1920, y: 1080 });
        assert_eq!(sps.framerate(false, None), Some((60, 2)));
        // 32768 / 8160 macroblocks.
        assert_eq!(sps.max_dpb_frames(), 4);

        let pps = PpsBuilder::new(&sps)
            .pic_parameter_set_id(3)
            .chroma_qp_index_offsets(1, 1)
            .build();
        assert_eq!(pps.seq_parameter_set_id, sps.seq_parameter_set_id);
        assert!(!pps.has_trailing_fields());
    }

    #[test]
    fn zigzag_conversions() {
        let zigzag: [u8; 16] = std::array::from_fn(|i| i as u8);
        let raster = scaling_list_4x4_to_raster(&zigzag);
        assert_eq!(raster[0..5], [0, 1, 5, 6, 2]);
        assert_eq!(scaling_list_4x4_to_zigzag(&raster), zigzag);

        let zigzag: [u8; 64] = std::array::from_fn(|i| i as u8);
        let raster = scaling_list_8x8_to_raster(&zigzag);
        assert_eq!(raster[8], 2);
        assert_eq!(raster[63], 63);
        assert_eq!(scaling_list_8x8_to_zigzag(&raster), zigzag);
    }

    #[test]
    fn max_long_term_frame_idx() {
        assert_eq!(
            MaxLongTermFrameIdx::from_value_plus1(0),
            MaxLongTermFrameIdx::NoLongTermFrameIndices
        );
        assert_eq!(
            MaxLongTermFrameIdx::NoLongTermFrameIndices.to_value_plus1(),
            0
        );

        assert_eq!(
            MaxLongTermFrameIdx::from_value_plus1(25),
            MaxLongTermFrameIdx::Idx(24)
        );
        assert_eq!(MaxLongTermFrameIdx::Idx(24).to_value_plus1(), 25);

        let value = 23;
        assert_ne!(MaxLongTermFrameIdx::NoLongTermFrameIndices, value);
        assert!(MaxLongTermFrameIdx::NoLongTermFrameIndices < value);
        assert_eq!(MaxLongTermFrameIdx::Idx(value), value);
        assert!(MaxLongTermFrameIdx::Idx(value - 1) < value);
    }
}
