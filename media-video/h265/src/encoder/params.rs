use super::{
    bitstream::NalUnitType,
    config::H265RateControlConfig,
    context::{ConformanceWindow, EncoderContext},
    dpb::{RefList, ReferencePicture},
    rate_control::{SX_BITRATE, SX_CPB_SIZE},
    reorder::H265PictureType,
};
use crate::{H265Level, H265Profile, H265Tier};

/// Slice type as written into the slice segment header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H265SliceType {
    B,
    P,
    I,
}

impl H265SliceType {
    pub fn slice_type(self) -> u32 {
        match self {
            H265SliceType::B => 0,
            H265SliceType::P => 1,
            H265SliceType::I => 2,
        }
    }

    pub(crate) fn from_picture_type(picture_type: H265PictureType) -> Self {
        match picture_type {
            H265PictureType::I => H265SliceType::I,
            H265PictureType::P => H265SliceType::P,
            H265PictureType::B => H265SliceType::B,
        }
    }
}

/// Sequence level parameters, shared by the VPS and SPS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceParams {
    pub profile: H265Profile,
    pub tier: H265Tier,
    pub level: H265Level,

    pub intra_period: u32,
    pub intra_idr_period: u32,
    /// Distance between anchor (I/P) pictures, 0 for intra only streams
    pub ip_period: u32,
    /// HRD bitrate, 0 if the rate control doesn't target a bitrate
    pub bits_per_second: u32,

    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub conformance_window: Option<ConformanceWindow>,

    pub chroma_format_idc: u32,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,

    pub log2_max_pic_order_cnt_lsb_minus4: u32,
    pub max_dec_pic_buffering_minus1: u32,
    pub max_num_reorder_pics: u32,

    pub log2_min_luma_coding_block_size_minus3: u32,
    pub log2_diff_max_min_luma_coding_block_size: u32,
    pub log2_min_transform_block_size_minus2: u32,
    pub log2_diff_max_min_transform_block_size: u32,
    pub max_transform_hierarchy_depth_inter: u32,
    pub max_transform_hierarchy_depth_intra: u32,

    pub scaling_list_enabled_flag: bool,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub sps_temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,

    pub vui: VuiParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VuiParams {
    /// Sample aspect ratio, signaled with `aspect_ratio_idc = 255` (EXTENDED_SAR)
    pub sar_width: u16,
    pub sar_height: u16,

    pub num_units_in_tick: u32,
    pub time_scale: u32,

    pub hrd: Option<HrdParameters>,
}

/// NAL HRD parameters of the single sub-layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrdParameters {
    pub bit_rate_scale: u32,
    pub cpb_size_scale: u32,
    pub bit_rate_value_minus1: u32,
    pub cpb_size_value_minus1: u32,
    pub cbr_flag: bool,
}

impl SequenceParams {
    pub(crate) fn new(ctx: &EncoderContext) -> Self {
        let config = &ctx.config;

        let ip_period = if ctx.keyframe_period > 1 {
            1 + ctx.num_bframes
        } else {
            0
        };

        // Main profiles carry 8 bit samples only
        let bit_depth_minus8 = match ctx.capabilities.profile {
            H265Profile::Main | H265Profile::MainStillPicture => 0,
            _ => u32::from(config.bit_depth.saturating_sub(8)),
        };

        let hrd = (ctx.bitrate.bits_per_second > 0).then(|| HrdParameters {
            bit_rate_scale: SX_BITRATE - 6,
            cpb_size_scale: SX_CPB_SIZE - 4,
            bit_rate_value_minus1: (ctx.bitrate.bits_per_second >> SX_BITRATE).saturating_sub(1),
            cpb_size_value_minus1: (ctx.bitrate.cpb_size >> SX_CPB_SIZE).saturating_sub(1),
            cbr_flag: matches!(
                config.rate_control,
                H265RateControlConfig::ConstantBitRate { .. }
            ),
        });

        let (sar_width, sar_height) = config.pixel_aspect_ratio;

        Self {
            profile: ctx.capabilities.profile,
            tier: ctx.capabilities.tier,
            level: ctx.capabilities.level,
            intra_period: ctx.keyframe_period,
            intra_idr_period: ctx.idr_period,
            ip_period,
            bits_per_second: ctx.bitrate.bits_per_second,
            pic_width_in_luma_samples: ctx.luma_width,
            pic_height_in_luma_samples: ctx.luma_height,
            conformance_window: ctx.conformance_window,
            chroma_format_idc: u32::from(config.chroma_format.chroma_format_idc()),
            bit_depth_luma_minus8: bit_depth_minus8,
            bit_depth_chroma_minus8: bit_depth_minus8,
            log2_max_pic_order_cnt_lsb_minus4: ctx.log2_max_pic_order_cnt - 4,
            max_dec_pic_buffering_minus1: ctx.max_dec_pic_buffering - 1,
            max_num_reorder_pics: ctx.max_num_reorder_pics,
            log2_min_luma_coding_block_size_minus3: 0,
            // 8x8 minimum coding blocks up to the CTU size (32 or 64)
            log2_diff_max_min_luma_coding_block_size: if ctx.low_power() { 3 } else { 2 },
            log2_min_transform_block_size_minus2: 0,
            log2_diff_max_min_transform_block_size: 3,
            max_transform_hierarchy_depth_inter: 2,
            max_transform_hierarchy_depth_intra: 2,
            scaling_list_enabled_flag: false,
            amp_enabled_flag: true,
            sample_adaptive_offset_enabled_flag: false,
            pcm_enabled_flag: false,
            sps_temporal_mvp_enabled_flag: true,
            strong_intra_smoothing_enabled_flag: true,
            vui: VuiParams {
                sar_width: sar_width.max(1),
                sar_height: sar_height.max(1),
                num_units_in_tick: config.framerate.denom,
                time_scale: config.framerate.num,
                hrd,
            },
        }
    }

    pub fn log2_max_pic_order_cnt(&self) -> u32 {
        self.log2_max_pic_order_cnt_lsb_minus4 + 4
    }

    pub fn log2_ctb_size(&self) -> u32 {
        self.log2_min_luma_coding_block_size_minus3 + 3 + self.log2_diff_max_min_luma_coding_block_size
    }

    /// Number of CTUs in a picture (`PicSizeInCtbsY`)
    pub fn pic_size_in_ctbs(&self) -> u32 {
        let ctb_size = 1 << self.log2_ctb_size();

        self.pic_width_in_luma_samples.div_ceil(ctb_size)
            * self.pic_height_in_luma_samples.div_ceil(ctb_size)
    }
}

/// Picture level parameters, also the content of the PPS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureParams {
    pub poc: u32,
    pub picture_type: H265PictureType,
    pub nal_unit_type: NalUnitType,
    pub idr_pic_flag: bool,
    pub reference_pic_flag: bool,

    /// All pictures of the reference store, empty for I pictures
    pub reference_frames: RefList<ReferencePicture>,
    /// Index of the collocated picture in `reference_frames`, `0xFF` without temporal motion vector prediction
    pub collocated_ref_pic_index: u8,

    pub pic_init_qp: u8,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,

    pub sign_data_hiding_enabled_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: u32,

    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub num_tile_columns_minus1: u32,
    pub num_tile_rows_minus1: u32,
    pub loop_filter_across_tiles_enabled_flag: bool,
    pub pps_loop_filter_across_slices_enabled_flag: bool,

    /// Handed to the hardware, the slice header always writes 0
    pub no_output_of_prior_pics_flag: bool,
}

impl PictureParams {
    pub(crate) fn new(
        ctx: &EncoderContext,
        poc: u32,
        picture_type: H265PictureType,
        is_idr: bool,
        reference_frames: RefList<ReferencePicture>,
    ) -> Self {
        let nal_unit_type = NalUnitType::for_picture(picture_type, is_idr);

        let reference_frames = if picture_type == H265PictureType::I {
            RefList::new()
        } else {
            reference_frames
        };

        // Hardware only adjusts QPs with bitrate control or in low power mode if this is set
        let cu_qp_delta_enabled_flag =
            ctx.config.rate_control != H265RateControlConfig::ConstantQp || ctx.low_power();

        let diff_cu_qp_delta_depth = if ctx.low_power() && cu_qp_delta_enabled_flag {
            3
        } else {
            0
        };

        let tiles_enabled_flag = ctx.tiles_enabled();

        Self {
            poc,
            picture_type,
            nal_unit_type,
            idr_pic_flag: is_idr,
            reference_pic_flag: picture_type != H265PictureType::B,
            reference_frames,
            collocated_ref_pic_index: 0xFF,
            pic_init_qp: ctx.qp.init_qp,
            num_ref_idx_l0_default_active_minus1: ctx.max_reflist0_count.saturating_sub(1),
            num_ref_idx_l1_default_active_minus1: ctx.max_reflist1_count.saturating_sub(1),
            sign_data_hiding_enabled_flag: false,
            transform_skip_enabled_flag: true,
            cu_qp_delta_enabled_flag,
            diff_cu_qp_delta_depth,
            tiles_enabled_flag,
            entropy_coding_sync_enabled_flag: false,
            num_tile_columns_minus1: ctx.config.num_tile_columns - 1,
            num_tile_rows_minus1: ctx.config.num_tile_rows - 1,
            loop_filter_across_tiles_enabled_flag: tiles_enabled_flag,
            pps_loop_filter_across_slices_enabled_flag: true,
            no_output_of_prior_pics_flag: is_idr,
        }
    }
}

/// Parameters of a single slice segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceParams {
    pub slice_segment_address: u32,
    pub num_ctu_in_slice: u32,
    pub slice_type: H265SliceType,

    pub ref_pic_list0: RefList<ReferencePicture>,
    pub ref_pic_list1: RefList<ReferencePicture>,

    pub num_ref_idx_active_override_flag: bool,
    pub num_ref_idx_l0_active_minus1: u32,
    pub num_ref_idx_l1_active_minus1: u32,

    /// Temporal motion vectors are taken from the first picture of `ref_pic_list0`
    pub slice_temporal_mvp_enabled_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u32,

    pub max_num_merge_cand: u32,
    pub slice_qp_delta: i32,
    pub slice_loop_filter_across_slices_enabled_flag: bool,
    pub last_slice_of_pic_flag: bool,
}

impl SliceParams {
    pub fn first_slice_segment_in_pic_flag(&self) -> bool {
        self.slice_segment_address == 0
    }
}

/// Build the slices of a picture, each slice gets its own copy of the reference lists
pub(crate) fn build_slices(
    ctx: &EncoderContext,
    picture_type: H265PictureType,
    l0: &RefList<ReferencePicture>,
    l1: &RefList<ReferencePicture>,
) -> Vec<SliceParams> {
    let low_delay_p = picture_type == H265PictureType::P && ctx.config.low_delay_b;

    let mut slice_type = H265SliceType::from_picture_type(picture_type);
    if low_delay_p {
        slice_type = H265SliceType::B;
    }

    let (ref_pic_list0, ref_pic_list1) = match picture_type {
        H265PictureType::I => (RefList::new(), RefList::new()),
        H265PictureType::P if low_delay_p => (l0.clone(), l0.clone()),
        H265PictureType::P => (l0.clone(), RefList::new()),
        H265PictureType::B => (l0.clone(), l1.clone()),
    };

    let num_ref_idx_l0_active_minus1 = (ref_pic_list0.len() as u32).saturating_sub(1);
    let num_ref_idx_l1_active_minus1 = (ref_pic_list1.len() as u32).saturating_sub(1);

    let slice_qp_delta = slice_qp_delta(ctx, picture_type);

    let temporal_mvp = !ref_pic_list0.is_empty();

    let partitions = partition_slices(ctx.ctu_width, ctx.ctu_height, ctx.num_slices);
    let num_partitions = partitions.len();

    partitions
        .into_iter()
        .enumerate()
        .map(|(i, (slice_segment_address, num_ctu_in_slice))| SliceParams {
            slice_segment_address,
            num_ctu_in_slice,
            slice_type,
            ref_pic_list0: ref_pic_list0.clone(),
            ref_pic_list1: ref_pic_list1.clone(),
            num_ref_idx_active_override_flag: !ref_pic_list0.is_empty()
                || !ref_pic_list1.is_empty(),
            num_ref_idx_l0_active_minus1,
            num_ref_idx_l1_active_minus1,
            slice_temporal_mvp_enabled_flag: temporal_mvp,
            collocated_from_l0_flag: true,
            collocated_ref_idx: 0,
            max_num_merge_cand: 5,
            slice_qp_delta,
            slice_loop_filter_across_slices_enabled_flag: true,
            last_slice_of_pic_flag: i + 1 == num_partitions,
        })
        .collect()
}

/// Reference store index of the collocated picture of a picture's slices
pub(crate) fn collocated_ref_pic_index(slices: &[SliceParams]) -> u8 {
    slices
        .first()
        .filter(|slice| slice.slice_temporal_mvp_enabled_flag)
        .and_then(|slice| {
            let list = if slice.collocated_from_l0_flag {
                &slice.ref_pic_list0
            } else {
                &slice.ref_pic_list1
            };

            list.get(slice.collocated_ref_idx as usize)
        })
        .map_or(0xFF, |reference| reference.index)
}

/// Split the CTU grid into `(slice_segment_address, num_ctu_in_slice)` pairs
///
/// CTUs are distributed evenly with the remainder going to the first slices. Every slice except the last
/// ends on a CTU row boundary, which may produce fewer slices than requested.
pub(crate) fn partition_slices(ctu_width: u32, ctu_height: u32, num_slices: u32) -> Vec<(u32, u32)> {
    let total = ctu_width * ctu_height;
    let num_slices = num_slices.clamp(1, total.max(1));

    let base = total / num_slices;
    let remainder = total % num_slices;

    let mut slices = Vec::with_capacity(num_slices as usize);
    let mut address = 0;

    for i in 0..num_slices {
        if address >= total {
            break;
        }

        let mut count = base + u32::from(i < remainder);

        if i + 1 < num_slices {
            count = count.next_multiple_of(ctu_width);
        }

        let count = count.min(total - address);

        slices.push((address, count));
        address += count;
    }

    // the last slice takes whatever is left
    if address < total {
        if let Some((_, count)) = slices.last_mut() {
            *count += total - address;
        }
    }

    if slices.len() < num_slices as usize {
        log::warn!(
            "Using {} slices instead of {num_slices} to keep slices aligned to CTU rows",
            slices.len()
        );
    }

    slices
}

/// QP delta of a slice relative to `init_qp`
pub(crate) fn slice_qp_delta(ctx: &EncoderContext, picture_type: H265PictureType) -> i32 {
    let qp = &ctx.qp;

    // qp_i is the initial QP
    let mut delta = 0i32;

    if ctx.config.rate_control == H265RateControlConfig::ConstantQp {
        delta += match picture_type {
            H265PictureType::I => 0,
            H265PictureType::P => i32::from(qp.qp_ip),
            H265PictureType::B => i32::from(qp.qp_ib),
        };

        let init_qp = i32::from(qp.init_qp);

        delta = delta.clamp(
            i32::from(qp.min_qp) - init_qp,
            i32::from(qp.max_qp) - init_qp,
        );
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{
        config::{H265EncoderConfig, H265FramePattern, H265QpConfig},
        testing::FakeBackend,
    };

    fn context(config: H265EncoderConfig) -> EncoderContext {
        EncoderContext::new(&mut FakeBackend::default(), &config).unwrap()
    }

    fn refs(pocs: &[u32]) -> RefList<ReferencePicture> {
        pocs.iter()
            .enumerate()
            .map(|(index, &poc)| ReferencePicture {
                poc,
                index: index as u8,
            })
            .collect()
    }

    #[test]
    fn partition_full_hd_into_three_slices() {
        let slices = partition_slices(60, 34, 3);

        assert_eq!(slices, vec![(0, 720), (720, 720), (1440, 600)]);
        assert_eq!(slices.iter().map(|(_, n)| n).sum::<u32>(), 60 * 34);
    }

    #[test]
    fn partition_is_exhaustive() {
        for (w, h) in [(60, 34), (30, 17), (4, 4), (7, 3), (1, 1), (40, 23)] {
            for num_slices in 1..=20 {
                let slices = partition_slices(w, h, num_slices);

                let mut next = 0;
                for (address, count) in &slices {
                    assert_eq!(*address, next, "{w}x{h} / {num_slices}");
                    assert!(*count > 0);
                    next += count;
                }

                assert_eq!(next, w * h, "{w}x{h} / {num_slices}");
                assert_eq!(slices.iter().filter(|(a, _)| *a == 0).count(), 1);

                // every slice but the last ends on a row
                for (address, count) in &slices[..slices.len() - 1] {
                    assert_eq!((address + count) % w, 0);
                }
            }
        }
    }

    #[test]
    fn aligned_slices_are_not_grown() {
        // 4 rows of 10 CTUs split in 2 is already row aligned
        assert_eq!(partition_slices(10, 4, 2), vec![(0, 20), (20, 20)]);
    }

    #[test]
    fn slices_have_one_first_segment() {
        let ctx = context(H265EncoderConfig {
            num_slices: 3,
            ..Default::default()
        });

        let slices = build_slices(&ctx, H265PictureType::I, &RefList::new(), &RefList::new());

        assert_eq!(slices.len(), 3);
        assert_eq!(
            slices
                .iter()
                .filter(|s| s.first_slice_segment_in_pic_flag())
                .count(),
            1
        );
        assert!(slices[2].last_slice_of_pic_flag);
        assert!(!slices[0].last_slice_of_pic_flag);
        assert_eq!(
            slices.iter().map(|s| s.num_ctu_in_slice).sum::<u32>(),
            ctx.ctu_width * ctx.ctu_height
        );
    }

    #[test]
    fn cqp_slice_qp_delta_is_clamped() {
        let ctx = context(H265EncoderConfig {
            qp: H265QpConfig {
                init_qp: 30,
                min_qp: 25,
                max_qp: 33,
                qp_ip: 2,
                qp_ib: 10,
            },
            ..Default::default()
        });

        assert_eq!(slice_qp_delta(&ctx, H265PictureType::I), 0);
        assert_eq!(slice_qp_delta(&ctx, H265PictureType::P), 2);
        assert_eq!(slice_qp_delta(&ctx, H265PictureType::B), 3);

        let ctx = context(H265EncoderConfig {
            qp: H265QpConfig {
                init_qp: 30,
                min_qp: 25,
                max_qp: 33,
                qp_ip: -10,
                qp_ib: 0,
            },
            ..Default::default()
        });

        assert_eq!(slice_qp_delta(&ctx, H265PictureType::P), -5);
    }

    #[test]
    fn bitrate_modes_ignore_qp_offsets() {
        let ctx = context(H265EncoderConfig {
            rate_control: H265RateControlConfig::ConstantBitRate { bitrate: Some(4000) },
            qp: H265QpConfig {
                qp_ip: 3,
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(slice_qp_delta(&ctx, H265PictureType::P), 0);
    }

    #[test]
    fn low_delay_b_copies_l0() {
        let ctx = context(H265EncoderConfig {
            low_delay_b: true,
            num_ref_frames: 2,
            ..Default::default()
        });

        let l0 = refs(&[4, 3]);
        let slices = build_slices(&ctx, H265PictureType::P, &l0, &RefList::new());

        let slice = &slices[0];
        assert_eq!(slice.slice_type, H265SliceType::B);
        assert_eq!(slice.ref_pic_list1, l0);
        assert_eq!(slice.num_ref_idx_l0_active_minus1, 1);
        assert_eq!(slice.num_ref_idx_l1_active_minus1, 1);
        assert!(slice.num_ref_idx_active_override_flag);
    }

    #[test]
    fn i_slices_have_no_references() {
        let ctx = context(H265EncoderConfig::default());

        let slices = build_slices(&ctx, H265PictureType::I, &refs(&[1]), &refs(&[2]));

        assert_eq!(slices[0].slice_type, H265SliceType::I);
        assert!(slices[0].ref_pic_list0.is_empty());
        assert!(slices[0].ref_pic_list1.is_empty());
        assert!(!slices[0].num_ref_idx_active_override_flag);
    }

    #[test]
    fn sequence_params() {
        let ctx = context(H265EncoderConfig {
            rate_control: H265RateControlConfig::ConstantBitRate { bitrate: Some(4000) },
            frame_pattern: H265FramePattern {
                keyframe_period: 30,
                idr_period: 60,
                num_bframes: 2,
            },
            ..Default::default()
        });

        let seq = SequenceParams::new(&ctx);

        assert_eq!(seq.ip_period, 3);
        assert_eq!(seq.intra_idr_period, 60);
        assert_eq!(seq.pic_width_in_luma_samples, 1920);
        assert_eq!(seq.pic_height_in_luma_samples, 1088);
        assert_eq!(seq.log2_ctb_size(), 5);
        assert_eq!(seq.pic_size_in_ctbs(), 60 * 34);
        assert_eq!(seq.vui.time_scale, 30);
        assert_eq!(seq.vui.num_units_in_tick, 1);

        let hrd = seq.vui.hrd.unwrap();
        assert_eq!(hrd.bit_rate_value_minus1, 4_000_000 / 64 - 1);
        assert!(hrd.cbr_flag);
    }

    #[test]
    fn picture_params() {
        let ctx = context(H265EncoderConfig {
            rate_control: H265RateControlConfig::VariableBitRate { bitrate: Some(2000) },
            ..Default::default()
        });

        let pic = PictureParams::new(&ctx, 0, H265PictureType::I, true, refs(&[1]));
        assert_eq!(pic.nal_unit_type, NalUnitType::IdrWRadl);
        assert!(pic.reference_frames.is_empty());
        assert!(pic.reference_pic_flag);
        assert!(pic.cu_qp_delta_enabled_flag);
        assert_eq!(pic.diff_cu_qp_delta_depth, 0);

        let pic = PictureParams::new(&ctx, 3, H265PictureType::B, false, refs(&[0, 4]));
        assert_eq!(pic.nal_unit_type, NalUnitType::TrailN);
        assert_eq!(pic.reference_frames.len(), 2);
        assert!(!pic.reference_pic_flag);
    }

    #[test]
    fn collocated_picture_is_first_l0_reference() {
        let ctx = context(H265EncoderConfig::default());

        // store holds 0, 4, 8 with indices 0, 1, 2
        let l0 = RefList::from_iter([
            ReferencePicture { poc: 8, index: 2 },
            ReferencePicture { poc: 4, index: 1 },
        ]);

        let slices = build_slices(&ctx, H265PictureType::P, &l0, &RefList::new());
        assert!(slices[0].slice_temporal_mvp_enabled_flag);
        assert!(slices[0].collocated_from_l0_flag);
        assert_eq!(collocated_ref_pic_index(&slices), 2);

        let slices = build_slices(&ctx, H265PictureType::I, &RefList::new(), &RefList::new());
        assert!(!slices[0].slice_temporal_mvp_enabled_flag);
        assert_eq!(collocated_ref_pic_index(&slices), 0xFF);
    }
}
