//! `HEVCDecoderConfigurationRecord` (ISO/IEC 14496-15, 8.3.3) for container formats

use super::{bitstream::NalUnitType, params::SequenceParams};
use bytes::{BufMut, Bytes, BytesMut};

const ANNEX_B_START_CODE: &[u8] = &[0, 0, 0, 1];

/// Build the codec configuration record from the parameter sets of the current sequence
///
/// The NAL units are expected in Annex-B form as produced by the header writer.
pub(crate) fn build_codec_config(seq: &SequenceParams, vps: &[u8], sps: &[u8], pps: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(23 + 3 * 5 + vps.len() + sps.len() + pps.len());

    // configurationVersion
    buf.put_u8(1);
    // general_profile_space, general_tier_flag, general_profile_idc
    buf.put_u8((u8::from(seq.tier.tier_flag()) << 5) | seq.profile.profile_idc());
    buf.put_u32(seq.profile.compatibility_flags());
    buf.put_uint(seq.profile.constraint_indicator_flags(), 6);
    buf.put_u8(seq.level.level_idc());

    // reserved 1111, min_spatial_segmentation_idc = 0
    buf.put_u16(0xF000);
    // reserved 111111, parallelismType = 0 (unknown)
    buf.put_u8(0xFC);
    // reserved 111111, chromaFormat
    buf.put_u8(0xFC | (seq.chroma_format_idc as u8 & 0x03));
    // reserved 11111, bitDepthLumaMinus8
    buf.put_u8(0xF8 | (seq.bit_depth_luma_minus8 as u8 & 0x07));
    // reserved 11111, bitDepthChromaMinus8
    buf.put_u8(0xF8 | (seq.bit_depth_chroma_minus8 as u8 & 0x07));
    // avgFrameRate, unspecified
    buf.put_u16(0);

    // constantFrameRate = 0, numTemporalLayers = 1, temporalIdNested = 1, lengthSizeMinusOne = 3
    buf.put_u8((1 << 3) | (1 << 2) | 3);

    let arrays = [
        (NalUnitType::Vps, vps),
        (NalUnitType::Sps, sps),
        (NalUnitType::Pps, pps),
    ];

    // numOfArrays
    buf.put_u8(arrays.len() as u8);

    for (nal_unit_type, nal) in arrays {
        let nal = insert_emulation_prevention(strip_start_code(nal));

        // array_completeness = 1, reserved = 0, NAL_unit_type
        buf.put_u8(0x80 | nal_unit_type.nal_unit_type());
        // numNalus
        buf.put_u16(1);
        buf.put_u16(nal.len() as u16);
        buf.put_slice(&nal);
    }

    buf.freeze()
}

fn strip_start_code(nal: &[u8]) -> &[u8] {
    nal.strip_prefix(ANNEX_B_START_CODE).unwrap_or(nal)
}

/// Insert `emulation_prevention_three_byte`s so no start code prefix appears inside the NAL unit
pub fn insert_emulation_prevention(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len() + nal.len() / 64);
    let mut zeros = 0;

    for &byte in nal {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }

        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }

        out.push(byte);
    }

    out
}
