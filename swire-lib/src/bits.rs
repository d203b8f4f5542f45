#[cfg(feature = "serde")]
use serde::Serialize;

use crate::annotation::{Annotation, AnnotationSink, Emitter, Row};
use crate::error::ProtocolError;
use crate::signal::{Edge, Level};
use crate::timing::UnitTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum BitValue {
    Zero,
    One,
}

impl BitValue {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            BitValue::Zero => 0,
            BitValue::One => 1,
        }
    }
}

impl From<BitValue> for u8 {
    fn from(value: BitValue) -> Self {
        value.as_u8()
    }
}

/// A decoded protocol bit and the samples it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Bit {
    pub value: BitValue,
    pub start: u64,
    pub end: u64,
}

/// A LOW phase and the HIGH phase that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    /// Falling edge starting the pulse.
    pub fall: u64,
    /// Rising edge ending the LOW phase.
    pub rise: u64,
    /// Next falling edge, or the end of the capture if `closed` is false.
    pub end: u64,
    /// True when `end` is a falling edge rather than the end of the capture.
    pub closed: bool,
}

impl Pulse {
    #[must_use]
    pub fn low(&self) -> u64 {
        self.rise.saturating_sub(self.fall)
    }

    #[must_use]
    pub fn high(&self) -> u64 {
        self.end.saturating_sub(self.rise)
    }
}

/// What was left on the line when the capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    /// Nothing pending.
    Idle,
    /// A pulse whose HIGH phase runs to the end of the capture.
    Pulse(Pulse),
    /// The capture ended while the line was LOW.
    Low { fall: u64 },
}

/// Pairs falling and rising edges into [Pulse]s and decodes them into [Bit]s.
///
/// A pulse is only complete once the *next* falling edge is seen since the HIGH
/// duration is part of the bit encoding, so pulses are produced one edge late.
#[derive(Debug, Clone)]
pub struct BitDecoder {
    timer: UnitTimer,
    // Falling edge of the LOW phase in progress
    fall: Option<u64>,
    // (fall, rise) of the pulse waiting for its HIGH phase to end
    open: Option<(u64, u64)>,
}

impl BitDecoder {
    #[must_use]
    pub fn new(timer: UnitTimer) -> Self {
        BitDecoder {
            timer,
            fall: None,
            open: None,
        }
    }

    #[must_use]
    pub fn timer(&self) -> &UnitTimer {
        &self.timer
    }

    /// Feed the next edge; returns the pulse completed by it, if any.
    pub fn edge(&mut self, edge: Edge) -> Option<Pulse> {
        match edge.level {
            Level::Low => {
                if self.fall.is_some() {
                    // already low, nothing changed
                    return None;
                }
                self.fall = Some(edge.sample);
                self.open.take().map(|(fall, rise)| Pulse {
                    fall,
                    rise,
                    end: edge.sample,
                    closed: true,
                })
            }
            Level::High => {
                // A rise without a fall is the capture starting mid-pulse
                if let Some(fall) = self.fall.take() {
                    self.open = Some((fall, edge.sample));
                }
                None
            }
        }
    }

    /// Flush any pending pulse at the end of the capture and reset.
    pub fn finish(&mut self, end: u64) -> Tail {
        if let Some(fall) = self.fall.take() {
            self.open = None;
            return Tail::Low { fall };
        }
        match self.open.take() {
            Some((fall, rise)) => Tail::Pulse(Pulse {
                fall,
                rise,
                end: end.max(rise),
                closed: false,
            }),
            None => Tail::Idle,
        }
    }

    /// Last sample covered by a bit starting with `pulse`. Nominally one bit period,
    /// but never past the next falling edge.
    #[must_use]
    pub fn span_end(&self, pulse: &Pulse) -> u64 {
        (pulse.fall + self.timer.bit_samples()).min(pulse.end)
    }

    /// Decode `pulse` into a bit, emitting a Bits row error annotation over the pulse if
    /// it is not a valid encoding.
    ///
    /// # Errors
    /// [ProtocolError::InvalidBitEncoding] if the pulse matches neither waveform.
    pub fn decode<S>(
        &self,
        pulse: &Pulse,
        out: &mut Emitter<'_, S>,
    ) -> std::result::Result<Bit, ProtocolError>
    where
        S: AnnotationSink + ?Sized,
    {
        let end = self.span_end(pulse);
        match self.timer.classify(pulse.low(), pulse.high()) {
            Ok(value) => Ok(Bit {
                value,
                start: pulse.fall,
                end,
            }),
            Err(err) => {
                out.emit(
                    Annotation::error(err, pulse.fall, end).on_row(Row::Bits),
                );
                Err(err)
            }
        }
    }

    /// Whether `pulse` is shaped like a read trigger, i.e., a 1 unit LOW. The HIGH phase
    /// after a trigger belongs to the slave and is not constrained.
    #[must_use]
    pub fn is_trigger(&self, pulse: &Pulse) -> bool {
        self.timer.is_short_low(pulse.low())
    }
}
