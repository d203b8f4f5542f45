#![allow(dead_code)]

use rand::{rngs::StdRng, Rng};
use swire::waveform::Waveform;
use swire::{decode_samples, AddressWidth, Collector, Config, Direction, Row, Transaction};

/// 24MHz at 960kbit/s
pub const SAMPLE_RATE: u64 = 24_000_000;
pub const UNIT: u64 = 5;
pub const BIT: u64 = 5 * UNIT;
pub const MASTER_BYTE: u64 = 10 * BIT;

pub fn config(width: AddressWidth) -> Config {
    Config::builder()
        .sample_rate(SAMPLE_RATE)
        .address_width(width)
        .build()
}

pub fn decode(width: AddressWidth, wave: &Waveform) -> Collector {
    decode_samples(config(width), &wave.to_samples(0), 0).expect("config is valid")
}

/// A transaction as the master intends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub address: Vec<u8>,
    pub slave_id: u8,
    pub direction: Direction,
    pub data: Vec<u8>,
}

impl Exchange {
    pub fn random(rng: &mut StdRng, width: AddressWidth) -> Self {
        let num_data = rng.gen_range(0..=8);
        Exchange {
            address: (0..width.bytes()).map(|_| rng.gen()).collect(),
            slave_id: rng.gen_range(0..0x80),
            direction: if rng.gen_bool(0.5) {
                Direction::Read
            } else {
                Direction::Write
            },
            data: (0..num_data).map(|_| rng.gen()).collect(),
        }
    }

    pub fn encode(&self, wave: &mut Waveform) {
        match self.direction {
            Direction::Read => wave.read(&self.address, self.slave_id, &self.data),
            Direction::Write => wave.write(&self.address, self.slave_id, &self.data),
        };
    }

    pub fn address_value(&self) -> u32 {
        self.address
            .iter()
            .fold(0, |acc, b| (acc << 8) | u32::from(*b))
    }

    pub fn assert_decoded(&self, txn: &Transaction) {
        assert!(txn.is_ok(), "expected ok, got {:?} for {self:?}", txn.outcome);
        assert_eq!(txn.address_value(), Some(self.address_value()), "{self:?}");
        assert_eq!(txn.slave_id(), Some(self.slave_id), "{self:?}");
        assert_eq!(txn.direction, Some(self.direction), "{self:?}");
        assert_eq!(txn.data_values(), self.data, "{self:?}");
    }
}

/// Spans within each row must be well formed, in order and never overlap.
pub fn assert_rows_ordered(zult: &Collector) {
    for row in Row::ALL {
        let mut last_end = 0;
        for ann in zult.row(row) {
            assert!(ann.start <= ann.end, "inverted span: {ann}");
            assert!(
                ann.start >= last_end,
                "{ann} overlaps previous span ending at {last_end}"
            );
            last_end = ann.end;
        }
    }
}
