//!# Bit timing
//!
//! Timing is given in time quanta, the register encoding stores every value minus one.
//!
//!```
//!# use mcp2517fd::bittiming::{BitTiming, NOMINAL};
//! // 500 kbit/s at 40 MHz, 80% sample point
//! let timing = BitTiming::calculate(40_000_000, 500_000, 800, &NOMINAL).unwrap();
//! assert_eq!(500_000, timing.bitrate(40_000_000));
//! assert_eq!(800, timing.sample_point());
//!```
use crate::config::ConfigError;
use crate::registers::{dbtcfg, nbtcfg, tdc};
use serde::{Deserialize, Serialize};

/// Timing limits of one phase, reported to the host
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BitTimingConst {
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

/// Arbitration phase limits
pub const NOMINAL: BitTimingConst = BitTimingConst {
    tseg1_min: 2,
    tseg1_max: 256,
    tseg2_min: 1,
    tseg2_max: 128,
    sjw_max: 128,
    brp_min: 1,
    brp_max: 256,
    brp_inc: 1,
};

/// Data phase limits
pub const DATA: BitTimingConst = BitTimingConst {
    tseg1_min: 1,
    tseg1_max: 32,
    tseg2_min: 1,
    tseg2_max: 16,
    sjw_max: 16,
    brp_min: 1,
    brp_max: 256,
    brp_inc: 1,
};

/// Highest transmitter delay compensation offset
const TDCO_MAX: u32 = 63;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitTiming {
    /// Baud rate prescaler
    pub brp: u32,
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    /// Synchronization jump width
    pub sjw: u32,
}

impl BitTiming {
    /// Time segment before the sample point, excluding the sync segment
    pub fn tseg1(&self) -> u32 {
        self.prop_seg + self.phase_seg1
    }

    pub fn tseg2(&self) -> u32 {
        self.phase_seg2
    }

    /// Number of time quanta per bit
    pub fn quanta(&self) -> u32 {
        1 + self.tseg1() + self.tseg2()
    }

    pub fn bitrate(&self, clock_hz: u32) -> u32 {
        let divisor = self.brp * self.quanta();
        if divisor == 0 {
            return 0;
        }

        clock_hz / divisor
    }

    /// Sample point in tenths of a percent
    pub fn sample_point(&self) -> u32 {
        let quanta = self.quanta();
        1000 * (1 + self.tseg1()) / quanta
    }

    /// Checks the timing against the given limits
    pub fn validate(&self, limits: &BitTimingConst) -> Result<(), ConfigError> {
        let tseg1 = self.tseg1();
        let tseg2 = self.tseg2();

        let valid = (limits.tseg1_min..=limits.tseg1_max).contains(&tseg1)
            && (limits.tseg2_min..=limits.tseg2_max).contains(&tseg2)
            && (1..=limits.sjw_max).contains(&self.sjw)
            && self.sjw <= tseg2
            && (limits.brp_min..=limits.brp_max).contains(&self.brp);

        if !valid {
            return Err(ConfigError::InvalidBitTiming);
        }

        Ok(())
    }

    /// Finds the timing with the most time quanta per bit for the requested bitrate.
    /// `sample_point` is given in tenths of a percent.
    pub fn calculate(
        clock_hz: u32,
        bitrate: u32,
        sample_point: u32,
        limits: &BitTimingConst,
    ) -> Result<Self, ConfigError> {
        if bitrate == 0 || sample_point == 0 || sample_point >= 1000 {
            return Err(ConfigError::InvalidBitTiming);
        }

        let mut brp = limits.brp_min;
        while brp <= limits.brp_max {
            // larger prescalers overflow as well
            let Some(divisor) = brp.checked_mul(bitrate) else {
                break;
            };

            if clock_hz % divisor == 0 {
                if let Some(timing) = Self::split(brp, clock_hz / divisor, sample_point, limits) {
                    return Ok(timing);
                }
            }

            brp += limits.brp_inc;
        }

        Err(ConfigError::InvalidBitTiming)
    }

    /// Splits the given number of quanta around the sample point
    fn split(brp: u32, quanta: u32, sample_point: u32, limits: &BitTimingConst) -> Option<Self> {
        if quanta < 1 + limits.tseg1_min + limits.tseg2_min || quanta > 1 + limits.tseg1_max + limits.tseg2_max {
            return None;
        }

        // quanta up to and including the sample point, sync segment included
        let before = (quanta * sample_point + 500) / 1000;
        let tseg1 = before.checked_sub(1)?.clamp(limits.tseg1_min, limits.tseg1_max);
        let tseg2 = quanta.checked_sub(1 + tseg1)?;

        let prop_seg = tseg1 / 2;
        let timing = Self {
            brp,
            prop_seg,
            phase_seg1: tseg1 - prop_seg,
            phase_seg2: tseg2,
            sjw: tseg2.min(limits.sjw_max),
        };

        timing.validate(limits).ok().map(|_| timing)
    }

    /// NBTCFG register value
    pub(crate) fn as_nominal_register(&self) -> u32 {
        nbtcfg::BRP.pack(self.brp - 1)
            | nbtcfg::TSEG1.pack(self.tseg1() - 1)
            | nbtcfg::TSEG2.pack(self.tseg2() - 1)
            | nbtcfg::SJW.pack(self.sjw - 1)
    }

    /// DBTCFG register value
    pub(crate) fn as_data_register(&self) -> u32 {
        dbtcfg::BRP.pack(self.brp - 1)
            | dbtcfg::TSEG1.pack(self.tseg1() - 1)
            | dbtcfg::TSEG2.pack(self.tseg2() - 1)
            | dbtcfg::SJW.pack(self.sjw - 1)
    }

    /// TDC register value, automatic measurement with an offset at the data sample point
    pub(crate) fn as_tdc_register(&self) -> u32 {
        let offset = (self.brp * self.tseg1()).min(TDCO_MAX);

        tdc::TDCMOD.pack(tdc::MODE_AUTO) | tdc::TDCO.pack(offset)
    }
}

/// Nominal and data phase timing
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitTimings {
    pub nominal: BitTiming,
    pub data: BitTiming,
}

impl BitTimings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.nominal.validate(&NOMINAL)?;
        self.data.validate(&DATA)
    }
}

impl Default for BitTimings {
    /// 500 kbit/s nominal, 2 Mbit/s data at 40 MHz, both sampling at 80%
    fn default() -> Self {
        Self {
            nominal: BitTiming {
                brp: 1,
                prop_seg: 31,
                phase_seg1: 32,
                phase_seg2: 16,
                sjw: 16,
            },
            data: BitTiming {
                brp: 1,
                prop_seg: 7,
                phase_seg1: 8,
                phase_seg2: 4,
                sjw: 4,
            },
        }
    }
}
