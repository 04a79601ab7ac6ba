use super::bitstream::NalUnitType;
use crate::H265Profile;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum H265ConfigurationError<E> {
    #[error("Profile {0:?} is not supported by the hardware")]
    UnsupportedProfile(H265Profile),
    #[error("No encode entrypoint for profile {0:?}")]
    NoEntrypoint(H265Profile),
    #[error(
        "No level supports {width}x{height} @ {framerate} fps with {tile_columns}x{tile_rows} tiles"
    )]
    UnsupportedLevel {
        width: u32,
        height: u32,
        framerate: f64,
        tile_columns: u32,
        tile_rows: u32,
    },
    #[error("Invalid encoder configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Failed to query hardware capabilities")]
    Backend(#[source] E),
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to write {nal_unit_type:?} NAL unit")]
pub struct H265WriteError {
    pub nal_unit_type: NalUnitType,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum H265EncodeError<E> {
    #[error(transparent)]
    Configuration(#[from] H265ConfigurationError<E>),
    #[error("Encoder has no valid configuration, reconfigure it first")]
    NotConfigured,
    #[error("Reconfiguration requires the encoder to be flushed first")]
    NotFlushed,
    #[error(transparent)]
    Write(#[from] H265WriteError),
    #[error("Failed to create reconstructed surface")]
    Allocation(#[source] E),
    #[error("Hardware failed to encode picture")]
    Backend(#[source] E),
}
