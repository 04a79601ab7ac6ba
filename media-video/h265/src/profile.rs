use smallvec::SmallVec;

/// H.265 encoding profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum H265Profile {
    Main,
    Main10,
    MainStillPicture,
    Main422_10,
    Main444,
    Main444_10,
}

impl H265Profile {
    pub fn profile_idc(self) -> u8 {
        match self {
            H265Profile::Main => 1,
            H265Profile::Main10 => 2,
            H265Profile::MainStillPicture => 3,
            H265Profile::Main422_10 | H265Profile::Main444 | H265Profile::Main444_10 => 4,
        }
    }

    /// Smallest profile able to carry the given input format
    ///
    /// Returns `None` for bit depths above 10.
    pub fn from_format(chroma_format: H265ChromaFormat, bit_depth: u8) -> Option<Self> {
        let profile = match (chroma_format, bit_depth) {
            (H265ChromaFormat::Yuv420, 0..=8) => H265Profile::Main,
            (H265ChromaFormat::Yuv420, 9..=10) => H265Profile::Main10,
            (H265ChromaFormat::Yuv422, 0..=10) => H265Profile::Main422_10,
            (H265ChromaFormat::Yuv444, 0..=8) => H265Profile::Main444,
            (H265ChromaFormat::Yuv444, 9..=10) => H265Profile::Main444_10,
            _ => return None,
        };

        Some(profile)
    }

    /// `general_profile_compatibility_flag[j]`, flag `j` is stored in bit `31 - j`
    pub(crate) fn compatibility_flags(self) -> u32 {
        let idc = self.profile_idc();

        let mut flags = 0u32;
        let mut set = |j: u32, value: bool| {
            if value {
                flags |= 1 << (31 - j);
            }
        };

        // A.3.2: Main10 decoders can decode Main and still picture streams, and so on
        set(1, idc == 1 || idc == 3);
        set(2, idc == 1 || idc == 2 || idc == 3);
        set(3, idc == 3);
        set(4, idc == 4);

        flags
    }

    /// Format range extensions constraint flags (A.3.5, Table A.2), in bitstream order:
    ///
    /// max_12bit, max_10bit, max_8bit, max_422chroma, max_420chroma,
    /// max_monochrome, intra, one_picture_only, lower_bit_rate
    ///
    /// Returns `None` for profiles that are not part of the range extensions.
    pub(crate) fn range_extension_flags(self) -> Option<[bool; 9]> {
        match self {
            H265Profile::Main | H265Profile::Main10 | H265Profile::MainStillPicture => None,
            H265Profile::Main444 => Some([
                true, true, true, false, false, false, false, false, true,
            ]),
            H265Profile::Main444_10 => Some([
                true, true, false, false, false, false, false, false, true,
            ]),
            H265Profile::Main422_10 => Some([
                true, true, false, true, false, false, false, false, true,
            ]),
        }
    }

    /// The 48 `general_constraint_indicator_flags` bits of the profile_tier_level, right aligned
    ///
    /// Progressive source and frame only are always signaled.
    pub(crate) fn constraint_indicator_flags(self) -> u64 {
        // progressive_source, interlaced_source, non_packed_constraint, frame_only_constraint
        let mut flags: u64 = 0b1001 << 44;

        if let Some(range_extension_flags) = self.range_extension_flags() {
            for (i, flag) in range_extension_flags.into_iter().enumerate() {
                flags |= u64::from(flag) << (43 - i);
            }
        }

        flags
    }

    /// Profiles to try when opening the hardware context, best match first
    pub(crate) fn hardware_candidates(self) -> SmallVec<[H265Profile; 3]> {
        let mut candidates = SmallVec::new();
        candidates.push(self);

        if self == H265Profile::MainStillPicture {
            candidates.push(H265Profile::Main);
        }

        if matches!(self, H265Profile::Main | H265Profile::MainStillPicture) {
            candidates.push(H265Profile::Main10);
        }

        candidates
    }
}

/// Chroma subsampling of the input pictures
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum H265ChromaFormat {
    #[default]
    Yuv420,
    Yuv422,
    Yuv444,
}

impl H265ChromaFormat {
    pub fn chroma_format_idc(self) -> u8 {
        match self {
            H265ChromaFormat::Yuv420 => 1,
            H265ChromaFormat::Yuv422 => 2,
            H265ChromaFormat::Yuv444 => 3,
        }
    }

    /// SubWidthC from Table 6-1
    pub(crate) fn sub_width_c(self) -> u32 {
        match self {
            H265ChromaFormat::Yuv420 | H265ChromaFormat::Yuv422 => 2,
            H265ChromaFormat::Yuv444 => 1,
        }
    }

    /// SubHeightC from Table 6-1
    pub(crate) fn sub_height_c(self) -> u32 {
        match self {
            H265ChromaFormat::Yuv420 => 2,
            H265ChromaFormat::Yuv422 | H265ChromaFormat::Yuv444 => 1,
        }
    }
}
