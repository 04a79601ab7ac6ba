/// H.265 levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(non_camel_case_types)]
pub enum H265Level {
    /// Level 1: 176x144, 128 kbps
    Level_1_0,

    /// Level 2: 352x288 @ 30 fps, 1.5 Mbps
    Level_2_0,
    /// Level 2.1: 640x360 @ 30 fps, 3 Mbps
    Level_2_1,

    /// Level 3: 960x540 @ 30 fps, 6 Mbps
    Level_3_0,
    /// Level 3.1: 1280x720 @ 30 fps, 10 Mbps
    Level_3_1,

    /// Level 4: 1920x1080 @ 30 fps, 12 Mbps (Main), 30 Mbps (High)
    Level_4_0,
    /// Level 4.1: 1920x1080 @ 60 fps, 20 Mbps (Main), 50 Mbps (High)
    Level_4_1,

    /// Level 5: 3840x2160 @ 30 fps, 25 Mbps (Main), 100 Mbps (High)
    Level_5_0,
    /// Level 5.1: 3840x2160 @ 60 fps, 40 Mbps (Main), 160 Mbps (High)
    Level_5_1,
    /// Level 5.2: 3840x2160 @ 120 fps, 60 Mbps (Main), 240 Mbps (High)
    Level_5_2,

    /// Level 6: 7680x4320 @ 30 fps, 60 Mbps (Main), 240 Mbps (High)
    Level_6_0,
    /// Level 6.1: 7680x4320 @ 60 fps, 120 Mbps (Main), 480 Mbps (High)
    Level_6_1,
    /// Level 6.2: 7680x4320 @ 120 fps, 240 Mbps (Main), 800 Mbps (High)
    Level_6_2,
}

impl H265Level {
    /// All levels, smallest first
    pub const ALL: [H265Level; 13] = [
        H265Level::Level_1_0,
        H265Level::Level_2_0,
        H265Level::Level_2_1,
        H265Level::Level_3_0,
        H265Level::Level_3_1,
        H265Level::Level_4_0,
        H265Level::Level_4_1,
        H265Level::Level_5_0,
        H265Level::Level_5_1,
        H265Level::Level_5_2,
        H265Level::Level_6_0,
        H265Level::Level_6_1,
        H265Level::Level_6_2,
    ];

    /// Returns the `general_level_idc` for this level, which is 30 times the level number
    pub fn level_idc(self) -> u8 {
        match self {
            H265Level::Level_1_0 => 30,
            H265Level::Level_2_0 => 60,
            H265Level::Level_2_1 => 63,
            H265Level::Level_3_0 => 90,
            H265Level::Level_3_1 => 93,
            H265Level::Level_4_0 => 120,
            H265Level::Level_4_1 => 123,
            H265Level::Level_5_0 => 150,
            H265Level::Level_5_1 => 153,
            H265Level::Level_5_2 => 156,
            H265Level::Level_6_0 => 180,
            H265Level::Level_6_1 => 183,
            H265Level::Level_6_2 => 186,
        }
    }

    pub fn limits(self) -> H265LevelLimits {
        let (
            max_luma_ps,
            max_cpb_tier_main,
            max_cpb_tier_high,
            max_slice_segments_per_picture,
            max_tile_rows,
            max_tile_columns,
            max_luma_sr,
            max_br_tier_main,
            max_br_tier_high,
            min_cr,
        ) = match self {
            H265Level::Level_1_0 => (36864, 350, 0, 16, 1, 1, 552960, 128, 0, 2),
            H265Level::Level_2_0 => (122880, 1500, 0, 16, 1, 1, 3686400, 1500, 0, 2),
            H265Level::Level_2_1 => (245760, 3000, 0, 20, 1, 1, 7372800, 3000, 0, 2),
            H265Level::Level_3_0 => (552960, 6000, 0, 30, 2, 2, 16588800, 6000, 0, 2),
            H265Level::Level_3_1 => (983040, 10000, 0, 40, 3, 3, 33177600, 10000, 0, 2),
            H265Level::Level_4_0 => (2228224, 12000, 30000, 75, 5, 5, 66846720, 12000, 30000, 4),
            H265Level::Level_4_1 => (2228224, 20000, 50000, 75, 5, 5, 133693440, 20000, 50000, 4),
            H265Level::Level_5_0 => (8912896, 25000, 100000, 200, 11, 10, 267386880, 25000, 100000, 6),
            H265Level::Level_5_1 => (8912896, 40000, 160000, 200, 11, 10, 534773760, 40000, 160000, 8),
            H265Level::Level_5_2 => (8912896, 60000, 240000, 200, 11, 10, 1069547520, 60000, 240000, 8),
            H265Level::Level_6_0 => (35651584, 60000, 240000, 600, 22, 20, 1069547520, 60000, 240000, 8),
            H265Level::Level_6_1 => (35651584, 120000, 480000, 600, 22, 20, 2139095040, 120000, 480000, 8),
            H265Level::Level_6_2 => (35651584, 240000, 800000, 600, 22, 20, 4278190080, 240000, 800000, 6),
        };

        H265LevelLimits {
            level: self,
            max_luma_ps,
            max_cpb_tier_main,
            max_cpb_tier_high,
            max_slice_segments_per_picture,
            max_tile_rows,
            max_tile_columns,
            max_luma_sr,
            max_br_tier_main,
            max_br_tier_high,
            min_cr,
        }
    }
}

/// ITU-T H.265 Table A.8 & A.9 level limits
///
/// CPB sizes are in units of 1000 bits, bit rates in units of 1000 bits/s.
/// Tier High limits are 0 for levels that only define the Main tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H265LevelLimits {
    pub level: H265Level,
    /// Max luma picture size MaxLumaPs (samples)
    pub max_luma_ps: u32,
    /// Max CPB size MaxCPB, Main tier
    pub max_cpb_tier_main: u32,
    /// Max CPB size MaxCPB, High tier
    pub max_cpb_tier_high: u32,
    pub max_slice_segments_per_picture: u32,
    pub max_tile_rows: u32,
    pub max_tile_columns: u32,
    /// Max luma sample rate MaxLumaSr (samples/s)
    pub max_luma_sr: u64,
    /// Max bit rate MaxBR, Main tier
    pub max_br_tier_main: u32,
    /// Max bit rate MaxBR, High tier
    pub max_br_tier_high: u32,
    /// Min compression ratio MinCr
    pub min_cr: u32,
}

impl H265LevelLimits {
    /// Limits of all levels, smallest level first
    pub fn table() -> &'static [H265LevelLimits] {
        static TABLE: std::sync::OnceLock<[H265LevelLimits; 13]> = std::sync::OnceLock::new();

        TABLE.get_or_init(|| H265Level::ALL.map(H265Level::limits))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum H265Tier {
    #[default]
    Main,
    High,
}

impl H265Tier {
    pub fn tier_flag(self) -> bool {
        self == H265Tier::High
    }
}
