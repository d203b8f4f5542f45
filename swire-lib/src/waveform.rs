//! Synthesizes SWire captures.
//!
//! Useful to exercise the decoder without hardware. Durations are given in protocol units
//! and the unit length is a whole number of samples, so generated captures are exact.
//!
//! ```
//! use swire::waveform::Waveform;
//!
//! // 24MHz capture of a 960kbit/s bus is 5 samples per unit
//! let mut wave = Waveform::new(5);
//! wave.idle(4).bit(true).bit(false);
//! assert_eq!(wave.len(), 70);
//! ```
use crate::signal::{Edge, Level};

/// A capture of the line, one level per sample, built front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waveform {
    unit: u64,
    levels: Vec<bool>,
}

impl Waveform {
    /// Creates an empty capture with `unit_samples` samples per protocol unit.
    ///
    /// # Panics
    /// If `unit_samples` is 0.
    #[must_use]
    pub fn new(unit_samples: u64) -> Self {
        assert!(unit_samples > 0, "unit must be at least one sample");
        Waveform {
            unit: unit_samples,
            levels: Vec::new(),
        }
    }

    #[must_use]
    pub fn unit_samples(&self) -> u64 {
        self.unit
    }

    /// Number of samples so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.levels.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Line level of every sample, true being HIGH.
    #[must_use]
    pub fn levels(&self) -> &[bool] {
        &self.levels
    }

    fn hold(&mut self, high: bool, units: u64) -> &mut Self {
        let num = usize::try_from(units * self.unit).unwrap_or(usize::MAX);
        self.levels.extend(std::iter::repeat(high).take(num));
        self
    }

    /// Line held HIGH for `units`.
    pub fn idle(&mut self, units: u64) -> &mut Self {
        self.hold(true, units)
    }

    /// Line held LOW for `units`.
    pub fn low(&mut self, units: u64) -> &mut Self {
        self.hold(false, units)
    }

    /// LOW for `low` units followed by HIGH for `high` units.
    pub fn pulse(&mut self, low: u64, high: u64) -> &mut Self {
        self.hold(false, low).hold(true, high)
    }

    pub fn bit(&mut self, one: bool) -> &mut Self {
        if one {
            self.pulse(4, 1)
        } else {
            self.pulse(1, 4)
        }
    }

    fn data_bits(&mut self, value: u8) -> &mut Self {
        for idx in (0..8).rev() {
            self.bit(value & (1 << idx) != 0);
        }
        self
    }

    /// CMD bit, `value` MSB first and a framing bit of 1.
    pub fn master_byte(&mut self, cmd: bool, value: u8) -> &mut Self {
        self.bit(cmd).data_bits(value).bit(true)
    }

    /// `value` MSB first and a framing bit of 1.
    pub fn slave_byte(&mut self, value: u8) -> &mut Self {
        self.data_bits(value).bit(true)
    }

    /// Read trigger; 1 unit LOW, 1 unit HIGH.
    pub fn trigger(&mut self) -> &mut Self {
        self.pulse(1, 1)
    }

    pub fn start(&mut self) -> &mut Self {
        self.master_byte(true, crate::transaction::START)
    }

    pub fn end(&mut self) -> &mut Self {
        self.master_byte(true, crate::transaction::END)
    }

    fn header(&mut self, address: &[u8], rw_id: u8) -> &mut Self {
        self.start();
        for b in address {
            self.master_byte(false, *b);
        }
        self.master_byte(false, rw_id)
    }

    /// Complete write of `data` to `slave_id` at `address`, given MSB byte first.
    pub fn write(&mut self, address: &[u8], slave_id: u8, data: &[u8]) -> &mut Self {
        self.header(address, slave_id & 0x7f);
        for b in data {
            self.master_byte(false, *b);
        }
        self.end()
    }

    /// Complete read where the slave answers each trigger with the next byte of `data`.
    pub fn read(&mut self, address: &[u8], slave_id: u8, data: &[u8]) -> &mut Self {
        self.header(address, 0x80 | (slave_id & 0x7f));
        for b in data {
            self.trigger().slave_byte(*b);
        }
        self.end()
    }

    /// The capture as raw samples with the line on bit `channel` of each byte and all
    /// other bits clear.
    ///
    /// # Panics
    /// If `channel` is greater than 7.
    #[must_use]
    pub fn to_samples(&self, channel: u8) -> Vec<u8> {
        assert!(channel < 8, "channel must be 0-7, got {channel}");
        let mask = 1u8 << channel;
        self.levels
            .iter()
            .map(|high| if *high { mask } else { 0 })
            .collect()
    }

    /// Transitions of the line. The first sample sets the initial level and is not an
    /// edge.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        self.levels
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] != pair[1])
            .map(|(idx, pair)| Edge {
                sample: idx as u64 + 1,
                level: Level::from(pair[1]),
            })
            .collect()
    }
}
