use super::{
    backend::{H265EncoderBackend, H265EncoderCapabilities, H265Entrypoint},
    config::H265Framerate,
    error::H265ConfigurationError,
};
use crate::{H265ChromaFormat, H265Level, H265LevelLimits, H265Profile, H265Tier};

/// Input of the capability resolution
#[derive(Debug, Clone, Copy)]
pub(crate) struct CapabilityRequest {
    pub(crate) chroma_format: H265ChromaFormat,
    pub(crate) bit_depth: u8,
    pub(crate) max_profile: Option<H265Profile>,
    pub(crate) low_power: bool,
    /// Coded luma size (aligned to 16)
    pub(crate) luma_size: (u32, u32),
    pub(crate) framerate: H265Framerate,
    pub(crate) tiles: (u32, u32),
    /// Target bitrate in kbit/s
    pub(crate) bitrate: u32,
}

/// Profile, tier & level the encoder runs with
#[derive(Debug, Clone, Copy)]
pub struct H265ResolvedCapabilities {
    /// Profile signaled in the bitstream
    pub profile: H265Profile,
    /// Profile the hardware context is created with
    pub hw_profile: H265Profile,
    pub entrypoint: H265Entrypoint,
    pub tier: H265Tier,
    pub level: H265Level,
    pub hardware: H265EncoderCapabilities,
}

pub(crate) fn resolve<B: H265EncoderBackend>(
    backend: &mut B,
    request: &CapabilityRequest,
) -> Result<H265ResolvedCapabilities, H265ConfigurationError<B::Error>> {
    let mut profile = H265Profile::from_format(request.chroma_format, request.bit_depth)
        .ok_or(H265ConfigurationError::InvalidConfig("unsupported bit depth"))?;

    if let Some(max_profile) = request.max_profile {
        if profile.profile_idc() > max_profile.profile_idc() {
            log::warn!(
                "Profile {profile:?} exceeds the allowed maximum {max_profile:?}, lowering coding tools to Main"
            );
            profile = H265Profile::Main;
        }
    }

    let supported = backend
        .profiles()
        .map_err(H265ConfigurationError::Backend)?;

    let hw_max_profile_idc = supported
        .iter()
        .map(|p| p.profile_idc())
        .max()
        .unwrap_or(0);

    if profile.profile_idc() > hw_max_profile_idc {
        return Err(H265ConfigurationError::UnsupportedProfile(profile));
    }

    let mut any_supported = false;
    let mut selected = None;

    for candidate in profile.hardware_candidates() {
        if !supported.contains(&candidate) {
            continue;
        }

        any_supported = true;

        let entrypoints = backend
            .entrypoints(candidate)
            .map_err(H265ConfigurationError::Backend)?;

        if let Some(entrypoint) = select_entrypoint(&entrypoints, request.low_power) {
            selected = Some((candidate, entrypoint));
            break;
        }
    }

    let Some((hw_profile, entrypoint)) = selected else {
        return Err(if any_supported {
            H265ConfigurationError::NoEntrypoint(profile)
        } else {
            H265ConfigurationError::UnsupportedProfile(profile)
        });
    };

    let hardware = backend
        .capabilities(hw_profile, entrypoint)
        .map_err(H265ConfigurationError::Backend)?;

    let limits = find_level(
        backend.level_limits(),
        request.luma_size,
        request.framerate,
        request.tiles,
    )
    .ok_or(H265ConfigurationError::UnsupportedLevel {
        width: request.luma_size.0,
        height: request.luma_size.1,
        framerate: f64::from(request.framerate.num) / f64::from(request.framerate.denom.max(1)),
        tile_columns: request.tiles.0,
        tile_rows: request.tiles.1,
    })?;

    let tier = select_tier(&limits, request.bitrate);

    log::debug!(
        "Selected profile {profile:?} (hardware {hw_profile:?}, {entrypoint:?}) at tier {tier:?} and level {:?}",
        limits.level
    );

    Ok(H265ResolvedCapabilities {
        profile,
        hw_profile,
        entrypoint,
        tier,
        level: limits.level,
        hardware,
    })
}

fn select_entrypoint(entrypoints: &[H265Entrypoint], low_power: bool) -> Option<H265Entrypoint> {
    let preference: &[H265Entrypoint] = if low_power {
        &[H265Entrypoint::EncodeSliceLowPower]
    } else {
        &[
            H265Entrypoint::EncodeSlice,
            H265Entrypoint::EncodeSliceLowPower,
        ]
    };

    preference
        .iter()
        .find(|entrypoint| entrypoints.contains(entrypoint))
        .copied()
}

/// Find the first level which satisfies the picture size & sample rate, and the tile layout if tiling is enabled
pub(crate) fn find_level(
    table: &[H265LevelLimits],
    (luma_width, luma_height): (u32, u32),
    framerate: H265Framerate,
    (tile_columns, tile_rows): (u32, u32),
) -> Option<H265LevelLimits> {
    let pic_size = u64::from(luma_width) * u64::from(luma_height);
    let luma_sr = pic_size * u64::from(framerate.num) / u64::from(framerate.denom.max(1));

    let start = table
        .iter()
        .position(|limits| pic_size <= u64::from(limits.max_luma_ps) && luma_sr <= limits.max_luma_sr)?;

    if tile_columns <= 1 && tile_rows <= 1 {
        return Some(table[start]);
    }

    // Promote the level until it allows the tile layout
    let limits = table[start..].iter().find(|limits| {
        tile_columns <= limits.max_tile_columns && tile_rows <= limits.max_tile_rows
    });

    if limits.is_none() {
        log::error!("No level allows {tile_columns} tile columns and {tile_rows} tile rows");
    }

    limits.copied()
}

pub(crate) fn select_tier(limits: &H265LevelLimits, bitrate: u32) -> H265Tier {
    if bitrate <= limits.max_br_tier_main {
        return H265Tier::Main;
    }

    if bitrate > limits.max_br_tier_high {
        log::warn!(
            "Bitrate of {bitrate} kbps exceeds the maximum of {} kbps of level {:?} high tier, the stream may not conform",
            limits.max_br_tier_high,
            limits.level
        );
    }

    H265Tier::High
}
