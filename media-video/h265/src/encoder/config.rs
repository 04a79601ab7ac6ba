use crate::{H265ChromaFormat, H265Profile};

/// Generic H.265 encoder config
#[derive(Debug, Clone, Copy)]
pub struct H265EncoderConfig {
    /// Width & height of the images to be encoded
    pub resolution: (u32, u32),

    /// Framerate of the video stream, written into the VUI timing info and used for level selection
    pub framerate: H265Framerate,

    /// Sample aspect ratio (width, height) signaled in the VUI
    pub pixel_aspect_ratio: (u16, u16),

    /// Chroma subsampling of the input images
    pub chroma_format: H265ChromaFormat,

    /// Bit depth of the input images (8 or 10)
    pub bit_depth: u8,

    /// Highest profile the encoder is allowed to use.
    ///
    /// If the input format requires a profile above it, the encoder falls back to Main.
    pub max_profile: Option<H265Profile>,

    /// Use the low power encode entrypoint of the hardware
    pub low_power: bool,

    /// Pattern of frames to emit
    pub frame_pattern: H265FramePattern,

    /// Number of reference frames a P picture may use
    pub num_ref_frames: u32,

    /// Number of slices each picture is split into
    pub num_slices: u32,

    /// Number of tile columns, 1 disables tiling
    pub num_tile_columns: u32,

    /// Number of tile rows, 1 disables tiling
    pub num_tile_rows: u32,

    /// Code P pictures as B slices with identical reference lists
    pub low_delay_b: bool,

    /// Rate control configuration
    pub rate_control: H265RateControlConfig,

    /// Quantizer configuration
    pub qp: H265QpConfig,

    /// Size of the coded picture buffer in milliseconds
    pub cpb_length: u32,

    /// Macroblock level bitrate control
    pub mb_rate_control: H265MbRateControl,

    /// Encoder tuning preset
    pub tune: H265Tune,
}

impl Default for H265EncoderConfig {
    fn default() -> Self {
        Self {
            resolution: (1920, 1080),
            framerate: H265Framerate::from_fps(30),
            pixel_aspect_ratio: (1, 1),
            chroma_format: H265ChromaFormat::Yuv420,
            bit_depth: 8,
            max_profile: None,
            low_power: false,
            frame_pattern: H265FramePattern::default(),
            num_ref_frames: 1,
            num_slices: 1,
            num_tile_columns: 1,
            num_tile_rows: 1,
            low_delay_b: false,
            rate_control: H265RateControlConfig::ConstantQp,
            qp: H265QpConfig::default(),
            cpb_length: 1500,
            mb_rate_control: H265MbRateControl::Auto,
            tune: H265Tune::None,
        }
    }
}

/// Describes the pattern in which frames are created
///
/// Frames on a keyframe boundary become I pictures, or IDR pictures every `idr_period` frames.
/// Between keyframes up to `num_bframes` frames are coded as B pictures after the following P picture.
#[derive(Debug, Clone, Copy)]
pub struct H265FramePattern {
    /// Period in which to create I-Frames
    pub keyframe_period: u32,

    /// Period in which to create IDR-Frames
    ///
    /// Values smaller than `keyframe_period` (including 0) are raised to it
    pub idr_period: u32,

    /// Maximum number of consecutive B-Frames
    pub num_bframes: u32,
}

impl Default for H265FramePattern {
    fn default() -> Self {
        Self {
            keyframe_period: 30,
            idr_period: 0,
            num_bframes: 0,
        }
    }
}

/// Rate control mode and its parameters
///
/// Bitrates are given in kbit/s, `None` lets the encoder estimate one from resolution and framerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H265RateControlConfig {
    /// CQP (Constant QP), uses `H265QpConfig::init_qp` and the P/B offsets
    ConstantQp,

    /// CBR (Constant Bit Rate)
    ConstantBitRate { bitrate: Option<u32> },

    /// VBR (Variable Bit Rate)
    VariableBitRate { bitrate: Option<u32> },

    /// ICQ (Intelligent Constant Quality)
    IntelligentConstantQuality { quality_factor: u32 },

    /// QVBR (Quality defined Variable Bit Rate)
    QualityVariableBitRate {
        bitrate: Option<u32>,
        quality_factor: u32,
    },
}

impl H265RateControlConfig {
    pub(crate) fn requested_bitrate(&self) -> Option<Option<u32>> {
        match *self {
            H265RateControlConfig::ConstantBitRate { bitrate }
            | H265RateControlConfig::VariableBitRate { bitrate }
            | H265RateControlConfig::QualityVariableBitRate { bitrate, .. } => Some(bitrate),
            H265RateControlConfig::ConstantQp
            | H265RateControlConfig::IntelligentConstantQuality { .. } => None,
        }
    }
}

/// Range and offsets of the quantizer
///
/// Allowed values range from 0 to 51, where 0 is the best quality and 51 the worst with the most compression.
#[derive(Debug, Clone, Copy)]
pub struct H265QpConfig {
    /// QP of I pictures and initial QP of the rate control
    pub init_qp: u8,
    pub min_qp: u8,
    pub max_qp: u8,

    /// QP difference of P pictures relative to I pictures (CQP only)
    pub qp_ip: i8,

    /// QP difference of B pictures relative to I pictures (CQP only)
    pub qp_ib: i8,
}

impl Default for H265QpConfig {
    fn default() -> Self {
        Self {
            init_qp: 26,
            min_qp: 1,
            max_qp: 51,
            qp_ip: 0,
            qp_ib: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum H265MbRateControl {
    /// Let the hardware decide
    #[default]
    Auto,
    Enabled,
    Disabled,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum H265Tune {
    #[default]
    None,

    /// Trade latency for compression, enables 3 B-Frames unless B-Frames are configured
    HighCompression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H265Framerate {
    pub num: u32,
    pub denom: u32,
}

impl H265Framerate {
    pub const fn from_fps(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }
}
