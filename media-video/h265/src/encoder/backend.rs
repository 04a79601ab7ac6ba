use super::{
    bitstream::NalUnitType,
    params::{PictureParams, SequenceParams, SliceParams},
    rate_control::RateControlParams,
};
use crate::{H265LevelLimits, H265Profile};
use bytes::Bytes;
use std::error::Error;

/// Encode entrypoint offered by the hardware for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum H265Entrypoint {
    /// Full featured slice encoder
    EncodeSlice,
    /// Low power (fixed function) slice encoder, uses 64x64 CTUs
    EncodeSliceLowPower,
}

bitflags::bitflags! {
    /// Headers the hardware accepts from the encoder instead of generating them itself
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct H265PackedHeaders: u32 {
        /// VPS & SPS
        const SEQUENCE = 1 << 0;
        /// PPS
        const PICTURE = 1 << 1;
        /// Slice segment headers
        const SLICE = 1 << 2;
    }
}

/// Limits of the hardware for a profile & entrypoint
#[derive(Debug, Clone, Copy)]
pub struct H265EncoderCapabilities {
    /// Max number of L0 references, 0 if unknown
    pub max_l0_references: u32,
    /// Max number of L1 references, 0 if B-Frames are not supported
    pub max_l1_references: u32,
    /// Max number of slices per picture, 0 if unknown
    pub max_slices: u32,
    pub packed_headers: H265PackedHeaders,
}

/// A header NAL unit synthesized by the encoder
///
/// `data` contains the Annex-B start code, NAL header and RBSP. Emulation prevention bytes are not inserted.
#[derive(Debug, Clone)]
pub struct H265PackedHeader {
    pub nal_unit_type: NalUnitType,
    pub data: Bytes,
}

/// Everything the hardware needs to encode one picture
pub struct H265EncodeJob<'a, F, S> {
    /// Source frame in display order
    pub frame: &'a F,

    /// Set for the first I picture after a configuration change
    pub sequence: Option<&'a SequenceParams>,
    pub picture: &'a PictureParams,
    pub slices: &'a [SliceParams],
    pub rate_control: &'a RateControlParams,

    /// Headers to insert in front of the coded slice data, in bitstream order
    pub packed_headers: &'a [H265PackedHeader],

    /// Surface receiving the reconstructed picture
    pub reconstructed: &'a S,

    /// Reconstructed surfaces of the reference pictures, indexed by `ReferencePicture::index`
    pub references: &'a [&'a S],
}

/// Hardware encoder the control logic in this crate is driving
///
/// Covers the capability query, the surface pool of reconstructed pictures and the actual encode call.
pub trait H265EncoderBackend {
    /// Source frame handed through to [`H265EncoderBackend::encode_picture`]
    type Frame;

    /// Reconstructed picture surface
    type Surface;

    type Error: Error + 'static;

    /// Profiles the hardware can encode
    fn profiles(&mut self) -> Result<Vec<H265Profile>, Self::Error>;

    /// Encode entrypoints available for `profile`
    fn entrypoints(&mut self, profile: H265Profile) -> Result<Vec<H265Entrypoint>, Self::Error>;

    fn capabilities(
        &mut self,
        profile: H265Profile,
        entrypoint: H265Entrypoint,
    ) -> Result<H265EncoderCapabilities, Self::Error>;

    /// Level limits used for level & tier selection
    fn level_limits(&self) -> &[H265LevelLimits] {
        H265LevelLimits::table()
    }

    fn create_reconstructed_surface(&mut self) -> Result<Self::Surface, Self::Error>;

    fn release_surface(&mut self, surface: Self::Surface);

    /// Encode a single picture and return the coded data
    fn encode_picture(
        &mut self,
        job: H265EncodeJob<'_, Self::Frame, Self::Surface>,
    ) -> Result<Bytes, Self::Error>;
}
