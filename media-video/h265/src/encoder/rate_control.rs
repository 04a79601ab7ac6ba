use super::config::{H265Framerate, H265MbRateControl, H265QpConfig, H265RateControlConfig};

/// Scale of `bit_rate_value_minus1` in the HRD parameters (`bit_rate_scale + 6`)
pub(crate) const SX_BITRATE: u32 = 6;
/// Scale of `cpb_size_value_minus1` in the HRD parameters (`cpb_size_scale + 4`)
pub(crate) const SX_CPB_SIZE: u32 = 4;

/// Bitrate related values derived from the configuration
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BitrateBudget {
    /// Target bitrate in kbit/s, 0 if the rate control mode doesn't target a bitrate
    pub(crate) kbps: u32,
    /// HRD bitrate, rounded down to a multiple of `1 << SX_BITRATE`
    pub(crate) bits_per_second: u32,
    /// HRD CPB size, rounded down to a multiple of `1 << SX_CPB_SIZE`
    pub(crate) cpb_size: u32,
}

impl BitrateBudget {
    pub(crate) fn new(
        rate_control: &H265RateControlConfig,
        (luma_width, luma_height): (u32, u32),
        framerate: H265Framerate,
        cpb_length: u32,
    ) -> Self {
        let kbps = match rate_control.requested_bitrate() {
            Some(Some(kbps)) => kbps,
            Some(None) => {
                // 12 bits per pixel (4:2:0) with a compression ratio of 1/6
                let factor = u64::from(luma_width) * u64::from(luma_height) * 12 / 6;
                let kbps = factor * u64::from(framerate.num)
                    / u64::from(framerate.denom.max(1))
                    / 1000;
                let kbps = u32::try_from(kbps).unwrap_or(u32::MAX);

                log::info!("Target bitrate computed to {kbps} kbps");

                kbps
            }
            None => 0,
        };

        if kbps == 0 {
            return Self::default();
        }

        let bits_per_second = (u64::from(kbps) * 1000).min(u64::from(u32::MAX)) as u32
            & !((1 << SX_BITRATE) - 1);

        let cpb_size = (u64::from(bits_per_second) * u64::from(cpb_length) / 1000)
            .min(u64::from(u32::MAX)) as u32
            & !((1 << SX_CPB_SIZE) - 1);

        log::debug!("HRD bitrate: {bits_per_second} bits/sec, CPB size: {cpb_size} bits");

        Self {
            kbps,
            bits_per_second,
            cpb_size,
        }
    }
}

/// HRD buffer model handed to the hardware
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HrdParams {
    /// Size of the CPB in bits
    pub buffer_size: u32,
    pub initial_buffer_fullness: u32,
}

/// Rate control parameters for the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControlParams {
    /// QPs are defined by the picture & slice parameters
    ConstantQp,

    IntelligentConstantQuality { quality_factor: u32 },

    Bitrate(BitrateControlParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateControlMode {
    ConstantBitRate,
    VariableBitRate,
    QualityVariableBitRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateControlParams {
    pub mode: BitrateControlMode,
    pub bits_per_second: u32,
    /// Window in milliseconds the bitrate is measured over (the CPB length)
    pub window_size: u32,
    pub initial_qp: u8,
    pub min_qp: u8,
    pub max_qp: u8,
    /// Only used by [`BitrateControlMode::QualityVariableBitRate`]
    pub quality_factor: u32,
    pub mb_rate_control: H265MbRateControl,
    pub hrd: HrdParams,
}

impl RateControlParams {
    pub(crate) fn new(
        rate_control: &H265RateControlConfig,
        budget: &BitrateBudget,
        qp: &H265QpConfig,
        cpb_length: u32,
        mb_rate_control: H265MbRateControl,
    ) -> Self {
        let (mode, quality_factor) = match *rate_control {
            H265RateControlConfig::ConstantQp => return RateControlParams::ConstantQp,
            H265RateControlConfig::IntelligentConstantQuality { quality_factor } => {
                return RateControlParams::IntelligentConstantQuality { quality_factor };
            }
            H265RateControlConfig::ConstantBitRate { .. } => (BitrateControlMode::ConstantBitRate, 0),
            H265RateControlConfig::VariableBitRate { .. } => (BitrateControlMode::VariableBitRate, 0),
            H265RateControlConfig::QualityVariableBitRate { quality_factor, .. } => {
                (BitrateControlMode::QualityVariableBitRate, quality_factor)
            }
        };

        let hrd = if budget.bits_per_second > 0 {
            HrdParams {
                buffer_size: budget.cpb_size,
                initial_buffer_fullness: budget.cpb_size / 2,
            }
        } else {
            HrdParams::default()
        };

        RateControlParams::Bitrate(BitrateControlParams {
            mode,
            bits_per_second: budget.bits_per_second,
            window_size: cpb_length,
            initial_qp: qp.init_qp,
            min_qp: qp.min_qp,
            max_qp: qp.max_qp,
            quality_factor,
            mb_rate_control,
            hrd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrd_rounding() {
        let budget = BitrateBudget::new(
            &H265RateControlConfig::ConstantBitRate { bitrate: Some(2001) },
            (1920, 1088),
            H265Framerate::from_fps(30),
            1500,
        );

        assert_eq!(budget.kbps, 2001);
        assert_eq!(budget.bits_per_second, 2_001_000 & !63);
        assert_eq!(budget.bits_per_second % 64, 0);
        assert_eq!(budget.cpb_size, (budget.bits_per_second * 3 / 2) & !15);
    }

    #[test]
    fn bitrate_is_estimated() {
        let budget = BitrateBudget::new(
            &H265RateControlConfig::VariableBitRate { bitrate: None },
            (1280, 720),
            H265Framerate::from_fps(30),
            1000,
        );

        assert_eq!(budget.kbps, 1280 * 720 * 2 * 30 / 1000);
    }

    #[test]
    fn quantizer_modes_have_no_bitrate() {
        for rate_control in [
            H265RateControlConfig::ConstantQp,
            H265RateControlConfig::IntelligentConstantQuality { quality_factor: 25 },
        ] {
            let budget = BitrateBudget::new(
                &rate_control,
                (1280, 720),
                H265Framerate::from_fps(30),
                1000,
            );

            assert_eq!(budget, BitrateBudget::default());
        }
    }

    #[test]
    fn rate_control_params() {
        let qp = H265QpConfig::default();

        let params = RateControlParams::new(
            &H265RateControlConfig::IntelligentConstantQuality { quality_factor: 20 },
            &BitrateBudget::default(),
            &qp,
            1500,
            H265MbRateControl::Auto,
        );
        assert_eq!(
            params,
            RateControlParams::IntelligentConstantQuality { quality_factor: 20 }
        );

        let rate_control = H265RateControlConfig::ConstantBitRate { bitrate: Some(4000) };
        let budget = BitrateBudget::new(&rate_control, (1280, 720), H265Framerate::from_fps(30), 1000);
        let RateControlParams::Bitrate(params) =
            RateControlParams::new(&rate_control, &budget, &qp, 1000, H265MbRateControl::Enabled)
        else {
            panic!("expected bitrate params");
        };

        assert_eq!(params.mode, BitrateControlMode::ConstantBitRate);
        assert_eq!(params.bits_per_second, 4_000_000);
        assert_eq!(params.hrd.buffer_size, 4_000_000);
        assert_eq!(params.hrd.initial_buffer_fullness, 2_000_000);
        assert_eq!(params.window_size, 1000);
    }
}
