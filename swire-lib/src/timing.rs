use tracing::warn;

use crate::bits::BitValue;
use crate::error::ProtocolError;
use crate::{Error, Result};

/// Derives protocol unit timing from the bit and sample rates and classifies measured
/// LOW/HIGH durations.
///
/// Every bit is 5 units long:
///
/// | bit | LOW     | HIGH    |
/// |-----|---------|---------|
/// | 0   | 1 unit  | 4 units |
/// | 1   | 4 units | 1 unit  |
///
/// Durations are compared to whole units with a tolerance of half a unit either side,
/// bounds inclusive. A LOW of 2.5 units is therefore neither a short nor a long LOW.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitTimer {
    unit: f64,
}

impl UnitTimer {
    pub const UNITS_PER_BIT: u32 = 5;
    /// Below this many samples per unit 1 and 4 unit durations can no longer be told
    /// apart reliably.
    pub const MIN_SAMPLES_PER_UNIT: f64 = 4.0;
    const TOLERANCE: f64 = 0.5;

    /// Create a timer for a capture taken at `sample_rate` Hz of a bus running at
    /// `bit_rate` bits/s.
    ///
    /// # Errors
    /// [Error::Config] if either rate is zero.
    pub fn new(sample_rate: u64, bit_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::Config("cannot decode without sample rate".to_string()));
        }
        if bit_rate == 0 {
            return Err(Error::Config("bit rate must be > 0".to_string()));
        }
        let unit = sample_rate as f64 / (f64::from(bit_rate) * f64::from(Self::UNITS_PER_BIT));
        if unit < Self::MIN_SAMPLES_PER_UNIT {
            warn!(
                samples_per_unit = unit,
                "sample rate too low for reliable decoding; need at least {} samples per unit",
                Self::MIN_SAMPLES_PER_UNIT
            );
        }
        Ok(UnitTimer { unit })
    }

    /// Length of one protocol unit in samples.
    #[must_use]
    pub fn unit_samples(&self) -> f64 {
        self.unit
    }

    /// Duration of `units` protocol units in whole samples.
    #[must_use]
    pub fn samples(&self, units: u32) -> u64 {
        (f64::from(units) * self.unit).round() as u64
    }

    /// Duration of one full bit in whole samples.
    #[must_use]
    pub fn bit_samples(&self) -> u64 {
        self.samples(Self::UNITS_PER_BIT)
    }

    /// `samples` expressed in (fractional) units.
    #[must_use]
    pub fn units(&self, samples: u64) -> f64 {
        samples as f64 / self.unit
    }

    /// `samples` rounded to the nearest whole number of units.
    #[must_use]
    pub fn rounded_units(&self, samples: u64) -> u64 {
        self.units(samples).round() as u64
    }

    fn near(&self, samples: u64, units: f64) -> bool {
        (self.units(samples) - units).abs() <= Self::TOLERANCE
    }

    fn at_least(&self, samples: u64, units: f64) -> bool {
        self.units(samples) >= units - Self::TOLERANCE
    }

    /// LOW of about 1 unit; bit 0, or a read trigger.
    #[must_use]
    pub fn is_short_low(&self, low: u64) -> bool {
        self.near(low, 1.0)
    }

    /// LOW of about 4 units; bit 1.
    #[must_use]
    pub fn is_long_low(&self, low: u64) -> bool {
        self.near(low, 4.0)
    }

    /// A well formed LOW whose HIGH phase is shorter than the rest of its bit, e.g., the
    /// last bit of a capture cut short.
    #[must_use]
    pub fn is_incomplete(&self, low: u64, high: u64) -> bool {
        (self.is_short_low(low) && !self.at_least(high, 4.0))
            || (self.is_long_low(low) && !self.at_least(high, 1.0))
    }

    /// Classify a pulse of `low` samples followed by `high` samples.
    ///
    /// The HIGH part only has to cover the rest of the bit, anything beyond that is idle
    /// time before the next bit.
    ///
    /// # Errors
    /// [ProtocolError::InvalidBitEncoding] if the pulse matches neither waveform.
    pub fn classify(&self, low: u64, high: u64) -> std::result::Result<BitValue, ProtocolError> {
        if self.is_short_low(low) && self.at_least(high, 4.0) {
            Ok(BitValue::Zero)
        } else if self.is_long_low(low) && self.at_least(high, 1.0) {
            Ok(BitValue::One)
        } else {
            Err(ProtocolError::InvalidBitEncoding)
        }
    }
}
