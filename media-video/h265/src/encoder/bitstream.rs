use super::{
    context::header_size,
    dpb::{poc_distance, split_references},
    error::H265WriteError,
    params::{H265SliceType, PictureParams, SequenceParams, SliceParams},
    reorder::H265PictureType,
};
use bitstream_io::{BigEndian, BitWrite, BitWriter};
use bytes::Bytes;
use std::io;

/// NAL unit types produced by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    /// Non reference trailing picture (B pictures)
    TrailN,
    /// Reference trailing picture (P and non-IDR I pictures)
    TrailR,
    IdrWRadl,
    Vps,
    Sps,
    Pps,
}

impl NalUnitType {
    pub fn nal_unit_type(self) -> u8 {
        match self {
            NalUnitType::TrailN => 0,
            NalUnitType::TrailR => 1,
            NalUnitType::IdrWRadl => 19,
            NalUnitType::Vps => 32,
            NalUnitType::Sps => 33,
            NalUnitType::Pps => 34,
        }
    }

    pub(crate) fn for_picture(picture_type: H265PictureType, is_idr: bool) -> Self {
        match picture_type {
            H265PictureType::I if is_idr => NalUnitType::IdrWRadl,
            H265PictureType::I | H265PictureType::P => NalUnitType::TrailR,
            H265PictureType::B => NalUnitType::TrailN,
        }
    }
}

/// Byte sink with a fixed capacity, writing past it fails
struct HeaderBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl io::Write for HeaderBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.data.len() + buf.len() > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "header exceeds the buffer capacity",
            ));
        }

        self.data.extend_from_slice(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct H265BitStreamWriter {
    buf: BitWriter<HeaderBuffer, BigEndian>,
}

impl H265BitStreamWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BitWriter::new(HeaderBuffer {
                data: Vec::with_capacity(capacity),
                capacity,
            }),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.write_bytes(bytes)
    }

    fn write_bits<const BITS: u32>(&mut self, value: impl Into<u32>) -> io::Result<()> {
        self.buf.write::<BITS, u32>(value.into())
    }

    fn write_bits_var(&mut self, bits: u32, value: u32) -> io::Result<()> {
        if bits == 0 {
            return Ok(());
        }

        self.buf.write_var(bits, value)
    }

    fn write_flag(&mut self, flag: bool) -> io::Result<()> {
        self.buf.write_bit(flag)
    }

    // exponential golomb coding
    fn write_ue(&mut self, val: u32) -> io::Result<()> {
        let val = u64::from(val) + 1;
        let len = 64 - val.leading_zeros(); // bit length of code_num

        if len > 1 {
            self.buf.write_var(len - 1, 0u32)?;
        }

        self.buf.write_var(len, val)
    }

    fn write_se(&mut self, val: i32) -> io::Result<()> {
        let val = if val <= 0 {
            -2 * i64::from(val)
        } else {
            2 * i64::from(val) - 1
        };

        self.write_ue(u32::try_from(val).unwrap_or(u32::MAX))
    }

    fn write_nal_start_code_prefix(&mut self) -> io::Result<()> {
        self.write_bytes(&[0, 0, 0, 1])
    }

    fn write_nal_header(&mut self, nal_unit_type: NalUnitType) -> io::Result<()> {
        // forbidden_zero_bit
        self.write_bits::<1>(0u8)?;
        self.write_bits::<6>(nal_unit_type.nal_unit_type())?;
        // nuh_layer_id
        self.write_bits::<6>(0u8)?;
        // nuh_temporal_id_plus1
        self.write_bits::<3>(1u8)
    }

    fn rbsp_trailing_bits(&mut self) -> io::Result<()> {
        self.write_bits::<1>(1u8)?;
        self.buf.byte_align()
    }

    fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf.into_writer().data)
    }
}

/// Write a complete NAL unit with start code and header into a buffer of `capacity` bytes
fn write_nal(
    nal_unit_type: NalUnitType,
    capacity: usize,
    rbsp: impl FnOnce(&mut H265BitStreamWriter) -> io::Result<()>,
) -> Result<Bytes, H265WriteError> {
    let mut writer = H265BitStreamWriter::with_capacity(capacity);

    writer
        .write_nal_start_code_prefix()
        .and_then(|_| writer.write_nal_header(nal_unit_type))
        .and_then(|_| rbsp(&mut writer))
        .map_err(|source| H265WriteError {
            nal_unit_type,
            source,
        })?;

    debug_assert!(writer.buf.byte_aligned());

    Ok(writer.into_bytes())
}

pub(crate) fn write_vps(seq: &SequenceParams) -> Result<Bytes, H265WriteError> {
    write_nal(NalUnitType::Vps, header_size::VPS, |writer| {
        write_vps_rbsp(writer, seq)
    })
}

pub(crate) fn write_sps(seq: &SequenceParams) -> Result<Bytes, H265WriteError> {
    write_nal(NalUnitType::Sps, header_size::SPS, |writer| {
        write_sps_rbsp(writer, seq)
    })
}

pub(crate) fn write_pps(pic: &PictureParams) -> Result<Bytes, H265WriteError> {
    write_nal(NalUnitType::Pps, header_size::PPS, |writer| {
        write_pps_rbsp(writer, pic)
    })
}

pub(crate) fn write_slice_header(
    seq: &SequenceParams,
    pic: &PictureParams,
    slice: &SliceParams,
) -> Result<Bytes, H265WriteError> {
    write_nal(pic.nal_unit_type, header_size::SLICE, |writer| {
        write_slice_header_rbsp(writer, seq, pic, slice)
    })
}

fn write_profile_tier_level(writer: &mut H265BitStreamWriter, seq: &SequenceParams) -> io::Result<()> {
    // general_profile_space
    writer.write_bits::<2>(0u8)?;
    writer.write_flag(seq.tier.tier_flag())?;
    writer.write_bits::<5>(seq.profile.profile_idc())?;
    writer.write_bits::<32>(seq.profile.compatibility_flags())?;

    // source flags, range extension constraints, reserved bits and general_inbld_flag
    writer.buf.write::<48, u64>(seq.profile.constraint_indicator_flags())?;

    writer.write_bits::<8>(seq.level.level_idc())
}

fn write_vps_rbsp(writer: &mut H265BitStreamWriter, seq: &SequenceParams) -> io::Result<()> {
    // vps_video_parameter_set_id
    writer.write_bits::<4>(0u8)?;
    // vps_base_layer_internal_flag
    writer.write_flag(true)?;
    // vps_base_layer_available_flag
    writer.write_flag(true)?;
    // vps_max_layers_minus1
    writer.write_bits::<6>(0u8)?;
    // vps_max_sub_layers_minus1
    writer.write_bits::<3>(0u8)?;
    // vps_temporal_id_nesting_flag
    writer.write_flag(true)?;
    // vps_reserved_0xffff_16bits
    writer.write_bits::<16>(0xFFFFu16)?;

    write_profile_tier_level(writer, seq)?;

    // vps_sub_layer_ordering_info_present_flag
    writer.write_flag(false)?;
    writer.write_ue(seq.max_dec_pic_buffering_minus1)?;
    writer.write_ue(seq.max_num_reorder_pics)?;
    // vps_max_latency_increase_plus1
    writer.write_ue(0)?;

    // vps_max_layer_id
    writer.write_bits::<6>(0u8)?;
    // vps_num_layer_sets_minus1
    writer.write_ue(0)?;
    // vps_timing_info_present_flag
    writer.write_flag(false)?;
    // vps_extension_flag
    writer.write_flag(false)?;

    writer.rbsp_trailing_bits()
}

fn write_sps_rbsp(writer: &mut H265BitStreamWriter, seq: &SequenceParams) -> io::Result<()> {
    // sps_video_parameter_set_id
    writer.write_bits::<4>(0u8)?;
    // sps_max_sub_layers_minus1
    writer.write_bits::<3>(0u8)?;
    // sps_temporal_id_nesting_flag
    writer.write_flag(true)?;

    write_profile_tier_level(writer, seq)?;

    // sps_seq_parameter_set_id
    writer.write_ue(0)?;
    writer.write_ue(seq.chroma_format_idc)?;

    if seq.chroma_format_idc == 3 {
        // separate_colour_plane_flag
        writer.write_flag(false)?;
    }

    writer.write_ue(seq.pic_width_in_luma_samples)?;
    writer.write_ue(seq.pic_height_in_luma_samples)?;

    writer.write_flag(seq.conformance_window.is_some())?;
    if let Some(window) = &seq.conformance_window {
        writer.write_ue(window.left_offset)?;
        writer.write_ue(window.right_offset)?;
        writer.write_ue(window.top_offset)?;
        writer.write_ue(window.bottom_offset)?;
    }

    writer.write_ue(seq.bit_depth_luma_minus8)?;
    writer.write_ue(seq.bit_depth_chroma_minus8)?;
    writer.write_ue(seq.log2_max_pic_order_cnt_lsb_minus4)?;

    // sps_sub_layer_ordering_info_present_flag
    writer.write_flag(false)?;
    writer.write_ue(seq.max_dec_pic_buffering_minus1)?;
    writer.write_ue(seq.max_num_reorder_pics)?;
    // sps_max_latency_increase_plus1
    writer.write_ue(0)?;

    writer.write_ue(seq.log2_min_luma_coding_block_size_minus3)?;
    writer.write_ue(seq.log2_diff_max_min_luma_coding_block_size)?;
    writer.write_ue(seq.log2_min_transform_block_size_minus2)?;
    writer.write_ue(seq.log2_diff_max_min_transform_block_size)?;
    writer.write_ue(seq.max_transform_hierarchy_depth_inter)?;
    writer.write_ue(seq.max_transform_hierarchy_depth_intra)?;

    writer.write_flag(seq.scaling_list_enabled_flag)?;
    writer.write_flag(seq.amp_enabled_flag)?;
    writer.write_flag(seq.sample_adaptive_offset_enabled_flag)?;
    writer.write_flag(seq.pcm_enabled_flag)?;

    // num_short_term_ref_pic_sets, the sets are sent in the slice headers
    writer.write_ue(0)?;
    // long_term_ref_pics_present_flag
    writer.write_flag(false)?;

    writer.write_flag(seq.sps_temporal_mvp_enabled_flag)?;
    writer.write_flag(seq.strong_intra_smoothing_enabled_flag)?;

    // vui_parameters_present_flag
    writer.write_flag(true)?;
    write_vui(writer, seq)?;

    // sps_extension_present_flag
    writer.write_flag(false)?;

    writer.rbsp_trailing_bits()
}

fn write_vui(writer: &mut H265BitStreamWriter, seq: &SequenceParams) -> io::Result<()> {
    let vui = &seq.vui;

    // aspect_ratio_info_present_flag
    writer.write_flag(true)?;
    // aspect_ratio_idc = EXTENDED_SAR
    writer.write_bits::<8>(255u8)?;
    writer.write_bits::<16>(vui.sar_width)?;
    writer.write_bits::<16>(vui.sar_height)?;

    // overscan_info_present_flag
    writer.write_flag(false)?;
    // video_signal_type_present_flag
    writer.write_flag(false)?;
    // chroma_loc_info_present_flag
    writer.write_flag(false)?;
    // neutral_chroma_indication_flag
    writer.write_flag(false)?;
    // field_seq_flag
    writer.write_flag(false)?;
    // frame_field_info_present_flag
    writer.write_flag(false)?;
    // default_display_window_flag
    writer.write_flag(false)?;

    // vui_timing_info_present_flag
    writer.write_flag(true)?;
    writer.write_bits::<32>(vui.num_units_in_tick)?;
    writer.write_bits::<32>(vui.time_scale)?;
    // vui_poc_proportional_to_timing_flag
    writer.write_flag(false)?;

    writer.write_flag(vui.hrd.is_some())?;
    if let Some(hrd) = &vui.hrd {
        // nal_hrd_parameters_present_flag
        writer.write_flag(true)?;
        // vcl_hrd_parameters_present_flag
        writer.write_flag(false)?;

        // sub_pic_hrd_params_present_flag
        writer.write_flag(false)?;
        writer.write_bits::<4>(hrd.bit_rate_scale)?;
        writer.write_bits::<4>(hrd.cpb_size_scale)?;
        // initial_cpb_removal_delay_length_minus1
        writer.write_bits::<5>(23u8)?;
        // au_cpb_removal_delay_length_minus1
        writer.write_bits::<5>(23u8)?;
        // dpb_output_delay_length_minus1
        writer.write_bits::<5>(23u8)?;

        // fixed_pic_rate_general_flag
        writer.write_flag(false)?;
        // fixed_pic_rate_within_cvs_flag
        writer.write_flag(false)?;
        // low_delay_hrd_flag
        writer.write_flag(true)?;

        // sub_layer_hrd_parameters of the single CPB
        writer.write_ue(hrd.bit_rate_value_minus1)?;
        writer.write_ue(hrd.cpb_size_value_minus1)?;
        writer.write_flag(hrd.cbr_flag)?;
    }

    // bitstream_restriction_flag
    writer.write_flag(false)
}

fn write_pps_rbsp(writer: &mut H265BitStreamWriter, pic: &PictureParams) -> io::Result<()> {
    // pps_pic_parameter_set_id
    writer.write_ue(0)?;
    // pps_seq_parameter_set_id
    writer.write_ue(0)?;
    // dependent_slice_segments_enabled_flag
    writer.write_flag(false)?;
    // output_flag_present_flag
    writer.write_flag(false)?;
    // num_extra_slice_header_bits
    writer.write_bits::<3>(0u8)?;
    writer.write_flag(pic.sign_data_hiding_enabled_flag)?;
    // cabac_init_present_flag
    writer.write_flag(false)?;

    writer.write_ue(pic.num_ref_idx_l0_default_active_minus1)?;
    writer.write_ue(pic.num_ref_idx_l1_default_active_minus1)?;

    // init_qp_minus26
    writer.write_se(i32::from(pic.pic_init_qp) - 26)?;
    // constrained_intra_pred_flag
    writer.write_flag(false)?;
    writer.write_flag(pic.transform_skip_enabled_flag)?;

    writer.write_flag(pic.cu_qp_delta_enabled_flag)?;
    if pic.cu_qp_delta_enabled_flag {
        writer.write_ue(pic.diff_cu_qp_delta_depth)?;
    }

    // pps_cb_qp_offset
    writer.write_se(0)?;
    // pps_cr_qp_offset
    writer.write_se(0)?;
    // pps_slice_chroma_qp_offsets_present_flag
    writer.write_flag(false)?;
    // weighted_pred_flag
    writer.write_flag(false)?;
    // weighted_bipred_flag
    writer.write_flag(false)?;
    // transquant_bypass_enabled_flag
    writer.write_flag(false)?;

    writer.write_flag(pic.tiles_enabled_flag)?;
    writer.write_flag(pic.entropy_coding_sync_enabled_flag)?;

    if pic.tiles_enabled_flag {
        writer.write_ue(pic.num_tile_columns_minus1)?;
        writer.write_ue(pic.num_tile_rows_minus1)?;
        // uniform_spacing_flag
        writer.write_flag(true)?;
        writer.write_flag(pic.loop_filter_across_tiles_enabled_flag)?;
    }

    writer.write_flag(pic.pps_loop_filter_across_slices_enabled_flag)?;
    // deblocking_filter_control_present_flag
    writer.write_flag(false)?;
    // pps_scaling_list_data_present_flag
    writer.write_flag(false)?;
    // lists_modification_present_flag
    writer.write_flag(false)?;
    // log2_parallel_merge_level_minus2
    writer.write_ue(0)?;
    // slice_segment_header_extension_present_flag
    writer.write_flag(false)?;
    // pps_extension_present_flag
    writer.write_flag(false)?;

    writer.rbsp_trailing_bits()
}

fn write_slice_header_rbsp(
    writer: &mut H265BitStreamWriter,
    seq: &SequenceParams,
    pic: &PictureParams,
    slice: &SliceParams,
) -> io::Result<()> {
    let first_slice_segment_in_pic_flag = slice.first_slice_segment_in_pic_flag();

    writer.write_flag(first_slice_segment_in_pic_flag)?;

    if pic.idr_pic_flag {
        // no_output_of_prior_pics_flag
        writer.write_flag(false)?;
    }

    // slice_pic_parameter_set_id
    writer.write_ue(0)?;

    if !first_slice_segment_in_pic_flag {
        let address_bits = u32::BITS - (seq.pic_size_in_ctbs() - 1).leading_zeros();
        writer.write_bits_var(address_bits, slice.slice_segment_address)?;
    }

    writer.write_ue(slice.slice_type.slice_type())?;

    if !pic.idr_pic_flag {
        let log2_max_poc = seq.log2_max_pic_order_cnt();
        let max_poc = 1 << log2_max_poc;

        writer.write_bits_var(log2_max_poc, pic.poc & (max_poc - 1))?;

        // short_term_ref_pic_set_sps_flag
        writer.write_flag(false)?;

        // st_ref_pic_set(num_short_term_ref_pic_sets), all pictures of the reference store are kept in the DPB
        let (negative, positive) = split_references(&pic.reference_frames, pic.poc, max_poc);

        let used_by_curr_pic = |poc: u32| {
            slice
                .ref_pic_list0
                .iter()
                .chain(slice.ref_pic_list1.iter())
                .any(|reference| reference.poc == poc)
        };

        writer.write_ue(negative.len() as u32)?;
        writer.write_ue(positive.len() as u32)?;

        let mut prev = pic.poc;
        for reference in &negative {
            // delta_poc_s0_minus1
            writer.write_ue(poc_distance(prev, reference.poc, max_poc) - 1)?;
            writer.write_flag(used_by_curr_pic(reference.poc))?;
            prev = reference.poc;
        }

        let mut prev = pic.poc;
        for reference in &positive {
            // delta_poc_s1_minus1
            writer.write_ue(poc_distance(reference.poc, prev, max_poc) - 1)?;
            writer.write_flag(used_by_curr_pic(reference.poc))?;
            prev = reference.poc;
        }

        if seq.sps_temporal_mvp_enabled_flag {
            writer.write_flag(slice.slice_temporal_mvp_enabled_flag)?;
        }
    }

    if seq.sample_adaptive_offset_enabled_flag {
        // slice_sao_luma_flag
        writer.write_flag(false)?;
        // slice_sao_chroma_flag
        writer.write_flag(false)?;
    }

    if slice.slice_type != H265SliceType::I {
        writer.write_flag(slice.num_ref_idx_active_override_flag)?;

        if slice.num_ref_idx_active_override_flag {
            writer.write_ue(slice.num_ref_idx_l0_active_minus1)?;

            if slice.slice_type == H265SliceType::B {
                writer.write_ue(slice.num_ref_idx_l1_active_minus1)?;
            }
        }

        if slice.slice_type == H265SliceType::B {
            // mvd_l1_zero_flag
            writer.write_flag(false)?;
        }

        if seq.sps_temporal_mvp_enabled_flag && slice.slice_temporal_mvp_enabled_flag {
            if slice.slice_type == H265SliceType::B {
                writer.write_flag(slice.collocated_from_l0_flag)?;
            }

            let num_ref_idx_active_minus1 = if slice.collocated_from_l0_flag {
                slice.num_ref_idx_l0_active_minus1
            } else {
                slice.num_ref_idx_l1_active_minus1
            };

            if num_ref_idx_active_minus1 > 0 {
                writer.write_ue(slice.collocated_ref_idx)?;
            }
        }

        // five_minus_max_num_merge_cand
        writer.write_ue(5 - slice.max_num_merge_cand)?;
    }

    writer.write_se(slice.slice_qp_delta)?;

    // deblocking is never disabled, so the flag is present whenever the PPS enables it
    if pic.pps_loop_filter_across_slices_enabled_flag {
        writer.write_flag(slice.slice_loop_filter_across_slices_enabled_flag)?;
    }

    if pic.tiles_enabled_flag || pic.entropy_coding_sync_enabled_flag {
        // num_entry_point_offsets
        writer.write_ue(0)?;
    }

    // byte_alignment()
    writer.rbsp_trailing_bits()
}
