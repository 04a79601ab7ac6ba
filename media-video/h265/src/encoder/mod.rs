//! Control logic of a stateless H.265 hardware encoder
//!
//! [`H265Encoder`] decides the picture types and references of every frame and synthesizes the parameter sets
//! and slice headers around the coded data the hardware produces.

mod backend;
mod bitstream;
mod capabilities;
mod codec_config;
mod config;
mod context;
mod dpb;
mod error;
mod params;
mod rate_control;
mod reorder;
mod stateless;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    H265EncodeJob, H265EncoderBackend, H265EncoderCapabilities, H265Entrypoint, H265PackedHeader,
    H265PackedHeaders,
};
pub use bitstream::NalUnitType;
pub use capabilities::H265ResolvedCapabilities;
pub use codec_config::insert_emulation_prevention;
pub use config::{
    H265EncoderConfig, H265FramePattern, H265Framerate, H265MbRateControl, H265QpConfig,
    H265RateControlConfig, H265Tune,
};
pub use context::ConformanceWindow;
pub use dpb::{MAX_REFERENCES, RefList, ReferencePicture};
pub use error::{H265ConfigurationError, H265EncodeError, H265WriteError};
pub use params::{
    H265SliceType, HrdParameters, PictureParams, SequenceParams, SliceParams, VuiParams,
};
pub use rate_control::{BitrateControlMode, BitrateControlParams, HrdParams, RateControlParams};
pub use reorder::H265PictureType;
pub use stateless::H265Encoder;
