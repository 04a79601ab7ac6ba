use super::{
    backend::{H265EncoderBackend, H265Entrypoint},
    capabilities::{self, CapabilityRequest, H265ResolvedCapabilities},
    config::{H265EncoderConfig, H265QpConfig, H265Tune},
    dpb::MAX_REFERENCES,
    error::H265ConfigurationError,
    rate_control::{BitrateBudget, RateControlParams},
};
use std::time::Duration;

/// Upper bounds of the header sizes in bits, used to size the header buffers
pub(crate) mod header_size {
    pub(crate) const MAX_PROFILE_TIER_LEVEL_SIZE: usize = 684;
    pub(crate) const MAX_VPS_HDR_SIZE: usize = 13781;
    pub(crate) const MAX_SPS_HDR_SIZE: usize = 615;
    pub(crate) const MAX_SHORT_TERM_REFPICSET_SIZE: usize = 55;
    pub(crate) const MAX_VUI_PARAMS_SIZE: usize = 267;
    pub(crate) const MAX_HRD_PARAMS_SIZE: usize = 8196;
    pub(crate) const MAX_PPS_HDR_SIZE: usize = 274;
    pub(crate) const MAX_SLICE_HDR_SIZE: usize = 33660;

    /// Bytes required for a NAL unit with an RBSP of `bits` bits, including the start code
    pub(crate) const fn nal_bytes(bits: usize) -> usize {
        4 + bits.div_ceil(8)
    }

    pub(crate) const VPS: usize =
        nal_bytes(MAX_VPS_HDR_SIZE + MAX_PROFILE_TIER_LEVEL_SIZE + MAX_HRD_PARAMS_SIZE);
    pub(crate) const SPS: usize = nal_bytes(
        MAX_SPS_HDR_SIZE
            + MAX_PROFILE_TIER_LEVEL_SIZE
            + 64 * MAX_SHORT_TERM_REFPICSET_SIZE
            + MAX_VUI_PARAMS_SIZE
            + MAX_HRD_PARAMS_SIZE,
    );
    pub(crate) const PPS: usize = nal_bytes(MAX_PPS_HDR_SIZE);
    pub(crate) const SLICE: usize = nal_bytes(MAX_SLICE_HDR_SIZE + MAX_SHORT_TERM_REFPICSET_SIZE);
}

/// Cropping applied to the 16 aligned coded picture, in chroma sample units
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConformanceWindow {
    pub left_offset: u32,
    pub right_offset: u32,
    pub top_offset: u32,
    pub bottom_offset: u32,
}

/// Session state derived from the configuration and the hardware capabilities
///
/// Only changes when the encoder is reconfigured.
#[derive(Debug, Clone)]
pub(crate) struct EncoderContext {
    pub(crate) config: H265EncoderConfig,
    pub(crate) capabilities: H265ResolvedCapabilities,

    pub(crate) luma_width: u32,
    pub(crate) luma_height: u32,
    pub(crate) conformance_window: Option<ConformanceWindow>,

    /// Size of a CTU in luma samples
    pub(crate) ctu_size: u32,
    pub(crate) ctu_width: u32,
    pub(crate) ctu_height: u32,

    pub(crate) keyframe_period: u32,
    pub(crate) idr_period: u32,
    pub(crate) num_bframes: u32,
    pub(crate) num_ref_frames: u32,
    pub(crate) num_slices: u32,

    pub(crate) log2_max_pic_order_cnt: u32,
    pub(crate) max_dec_pic_buffering: u32,
    pub(crate) max_num_reorder_pics: u32,
    pub(crate) max_reflist0_count: u32,
    pub(crate) max_reflist1_count: u32,

    pub(crate) qp: H265QpConfig,
    pub(crate) bitrate: BitrateBudget,
    pub(crate) rate_control: RateControlParams,

    /// Presentation to composition time offset introduced by B-Frames
    pub(crate) cts_offset: Duration,
}

impl EncoderContext {
    pub(crate) fn new<B: H265EncoderBackend>(
        backend: &mut B,
        config: &H265EncoderConfig,
    ) -> Result<Self, H265ConfigurationError<B::Error>> {
        let (width, height) = config.resolution;

        if width == 0 || height == 0 {
            return Err(H265ConfigurationError::InvalidConfig("empty resolution"));
        }

        if config.framerate.num == 0 || config.framerate.denom == 0 {
            return Err(H265ConfigurationError::InvalidConfig("invalid framerate"));
        }

        if config.frame_pattern.keyframe_period == 0 {
            return Err(H265ConfigurationError::InvalidConfig(
                "keyframe period must not be zero",
            ));
        }

        let num_tile_columns = config.num_tile_columns.max(1);
        let num_tile_rows = config.num_tile_rows.max(1);

        if num_tile_columns.checked_mul(num_tile_rows).is_none() {
            return Err(H265ConfigurationError::InvalidConfig("too many tiles"));
        }

        let luma_width = width.next_multiple_of(16);
        let luma_height = height.next_multiple_of(16);

        let conformance_window = (luma_width != width || luma_height != height).then(|| {
            ConformanceWindow {
                left_offset: 0,
                right_offset: (luma_width - width) / config.chroma_format.sub_width_c(),
                top_offset: 0,
                bottom_offset: (luma_height - height) / config.chroma_format.sub_height_c(),
            }
        });

        let bitrate = BitrateBudget::new(
            &config.rate_control,
            (luma_width, luma_height),
            config.framerate,
            config.cpb_length,
        );

        let capabilities = capabilities::resolve(
            backend,
            &CapabilityRequest {
                chroma_format: config.chroma_format,
                bit_depth: config.bit_depth,
                max_profile: config.max_profile,
                low_power: config.low_power,
                luma_size: (luma_width, luma_height),
                framerate: config.framerate,
                tiles: (num_tile_columns, num_tile_rows),
                bitrate: bitrate.kbps,
            },
        )?;

        let ctu_size = match capabilities.entrypoint {
            H265Entrypoint::EncodeSlice => 32,
            H265Entrypoint::EncodeSliceLowPower => 64,
        };

        let ctu_width = luma_width.div_ceil(ctu_size);
        let ctu_height = luma_height.div_ceil(ctu_size);

        // Tiles must be at least 256 luma samples wide and 64 high (A.3), uniform spacing rounds down
        let min_tile_width = (ctu_width / num_tile_columns) * ctu_size;
        let min_tile_height = (ctu_height / num_tile_rows) * ctu_size;

        let tiles_enabled = num_tile_columns > 1 || num_tile_rows > 1;

        if tiles_enabled && (min_tile_width < 256 || min_tile_height < 64) {
            log::error!(
                "{num_tile_columns}x{num_tile_rows} tiles don't fit into {ctu_width}x{ctu_height} CTUs of {ctu_size}"
            );

            return Err(H265ConfigurationError::InvalidConfig(
                "tiles are smaller than 256x64 luma samples",
            ));
        }

        let keyframe_period = config.frame_pattern.keyframe_period;
        let idr_period = config.frame_pattern.idr_period.max(keyframe_period);

        let mut qp = config.qp;
        qp.init_qp = qp.init_qp.min(51);
        qp.min_qp = qp.min_qp.min(qp.init_qp);
        qp.max_qp = qp.max_qp.clamp(qp.init_qp, 51);

        let hardware = &capabilities.hardware;

        let ctu_count = ctu_width * ctu_height;
        let mut max_slices = ctu_count.div_ceil(2).max(1);
        if hardware.max_slices > 0 {
            max_slices = max_slices.min(hardware.max_slices);
        }

        let num_slices = config.num_slices.clamp(1, max_slices);
        if num_slices != config.num_slices {
            log::warn!(
                "Using {num_slices} slices instead of the requested {}",
                config.num_slices
            );
        }

        let mut num_bframes = config.frame_pattern.num_bframes;
        if config.tune == H265Tune::HighCompression && num_bframes == 0 {
            log::debug!("Enabling 3 B-Frames for high compression tuning");
            num_bframes = 3;
        }

        if num_bframes > 0 && hardware.max_l1_references < 1 {
            log::warn!("Disabling B-Frames since the hardware doesn't support them");
            num_bframes = 0;
        }

        let mut max_ref_frames = MAX_REFERENCES as u32 - u32::from(num_bframes > 0);
        if hardware.max_l0_references > 0 {
            max_ref_frames = max_ref_frames.min(hardware.max_l0_references);
        }

        let num_ref_frames = config.num_ref_frames.clamp(1, max_ref_frames);
        if num_ref_frames != config.num_ref_frames {
            log::warn!(
                "Using {num_ref_frames} reference frames instead of the requested {}",
                config.num_ref_frames
            );
        }

        num_bframes = num_bframes.min(keyframe_period.div_ceil(2));

        let cts_offset = if num_bframes > 0 {
            Duration::from_secs(u64::from(config.framerate.denom))
                / config.framerate.num
        } else {
            Duration::ZERO
        };

        let log2_max_pic_order_cnt = (u32::BITS - idr_period.leading_zeros()).clamp(4, 16);

        let (max_dec_pic_buffering, max_num_reorder_pics) = if num_bframes > 0 {
            (num_ref_frames + 2, 1)
        } else {
            (num_ref_frames + 1, 0)
        };

        let rate_control = RateControlParams::new(
            &config.rate_control,
            &bitrate,
            &qp,
            config.cpb_length,
            config.mb_rate_control,
        );

        let mut config = *config;
        config.num_tile_columns = num_tile_columns;
        config.num_tile_rows = num_tile_rows;

        Ok(Self {
            config,
            capabilities,
            luma_width,
            luma_height,
            conformance_window,
            ctu_size,
            ctu_width,
            ctu_height,
            keyframe_period,
            idr_period,
            num_bframes,
            num_ref_frames,
            num_slices,
            log2_max_pic_order_cnt,
            max_dec_pic_buffering,
            max_num_reorder_pics,
            max_reflist0_count: num_ref_frames,
            max_reflist1_count: u32::from(num_bframes > 0),
            qp,
            bitrate,
            rate_control,
            cts_offset,
        })
    }

    pub(crate) fn max_pic_order_cnt(&self) -> u32 {
        1 << self.log2_max_pic_order_cnt
    }

    pub(crate) fn low_power(&self) -> bool {
        self.capabilities.entrypoint == H265Entrypoint::EncodeSliceLowPower
    }

    pub(crate) fn tiles_enabled(&self) -> bool {
        self.config.num_tile_columns * self.config.num_tile_rows > 1
    }

    /// Upper bound of the coded data of a single picture including all headers
    pub(crate) fn coded_buffer_size(&self) -> usize {
        header_size::VPS
            + header_size::SPS
            + header_size::PPS
            + self.num_slices as usize * header_size::SLICE
            + self.luma_width as usize * self.luma_height as usize * 3 / 2
    }
}
