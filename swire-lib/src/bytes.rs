#[cfg(feature = "serde")]
use serde::Serialize;

use crate::annotation::Class;
use crate::bits::{Bit, BitValue};

/// Byte layout on the wire. Master bytes carry a leading CMD bit, slave bytes do not;
/// both end with a framing bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Shape {
    /// CMD + 8 data bits + framing bit
    Master,
    /// 8 data bits + framing bit
    Slave,
}

impl Shape {
    #[must_use]
    pub const fn bit_count(self) -> usize {
        match self {
            Shape::Master => 10,
            Shape::Slave => 9,
        }
    }

    #[must_use]
    pub const fn has_cmd(self) -> bool {
        matches!(self, Shape::Master)
    }
}

/// Position of a bit within its byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitRole {
    Cmd,
    /// Data bit, 0 being the most significant
    Data(u8),
    Framing,
}

impl BitRole {
    /// Annotation class for a bit in this position.
    #[must_use]
    pub fn class(self) -> Class {
        match self {
            BitRole::Cmd => Class::CmdBit,
            BitRole::Data(_) | BitRole::Framing => Class::Bit,
        }
    }
}

/// A complete byte as transmitted by either side.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Byte {
    pub shape: Shape,
    /// Data value, most significant bit first on the wire
    pub value: u8,
    /// CMD bit, present for [Shape::Master] only
    pub cmd: Option<Bit>,
    /// The 8 data bits in wire order
    pub bits: Vec<Bit>,
    pub framing: Bit,
    /// False if the framing bit did not have the expected value
    pub framing_ok: bool,
    pub start: u64,
    pub end: u64,
}

impl Byte {
    /// Expected value of the trailing framing bit. The line idles high, so does the
    /// framing bit.
    pub const FRAMING_SENTINEL: BitValue = BitValue::One;

    #[must_use]
    pub fn has_cmd_bit(&self) -> bool {
        self.cmd.is_some()
    }

    #[must_use]
    pub fn cmd_value(&self) -> Option<u8> {
        self.cmd.map(|b| b.value.as_u8())
    }

    /// Master byte with CMD=1, i.e., START, END or a framing violation.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.cmd_value() == Some(1)
    }
}

/// Accumulates [Bit]s into [Byte]s of the selected [Shape].
#[derive(Debug, Clone)]
pub struct ByteAssembler {
    shape: Shape,
    bits: Vec<Bit>,
}

impl ByteAssembler {
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        ByteAssembler {
            shape,
            bits: Vec::with_capacity(Shape::Master.bit_count()),
        }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Drop any partial byte and start a new byte of `shape`.
    pub fn reset(&mut self, shape: Shape) {
        self.bits.clear();
        self.shape = shape;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Start of the partial byte, if any bits have been collected.
    #[must_use]
    pub fn start(&self) -> Option<u64> {
        self.bits.first().map(|b| b.start)
    }

    /// Role the next pushed bit will have.
    #[must_use]
    pub fn next_role(&self) -> BitRole {
        let idx = self.bits.len();
        let offset = usize::from(self.shape.has_cmd());
        if idx + 1 >= self.shape.bit_count() {
            BitRole::Framing
        } else if idx < offset {
            BitRole::Cmd
        } else {
            BitRole::Data(u8::try_from(idx - offset).unwrap_or(u8::MAX))
        }
    }

    /// Add the next bit, returning the byte it completes.
    pub fn push(&mut self, bit: Bit) -> Option<Byte> {
        self.bits.push(bit);
        if self.bits.len() < self.shape.bit_count() {
            return None;
        }

        let mut bits = std::mem::take(&mut self.bits);
        let framing = bits.pop()?;
        let cmd = if self.shape.has_cmd() {
            Some(bits.remove(0))
        } else {
            None
        };
        let value = bits
            .iter()
            .fold(0u8, |acc, b| (acc << 1) | b.value.as_u8());
        let start = cmd.map_or_else(|| bits.first().map_or(framing.start, |b| b.start), |c| c.start);

        Some(Byte {
            shape: self.shape,
            value,
            cmd,
            bits,
            framing,
            framing_ok: framing.value == Byte::FRAMING_SENTINEL,
            start,
            end: framing.end,
        })
    }

    /// Drop the partial byte, returning the span of the dropped bits.
    pub fn discard(&mut self) -> Option<(u64, u64)> {
        let span = match (self.bits.first(), self.bits.last()) {
            (Some(first), Some(last)) => Some((first.start, last.end)),
            _ => None,
        };
        self.bits.clear();
        span
    }
}
