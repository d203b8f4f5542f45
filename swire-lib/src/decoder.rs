use std::io::{ErrorKind, Read};

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, span, trace, Level};
use typed_builder::TypedBuilder;

use crate::annotation::{Annotation, AnnotationSink, Class, Collector, Emitter, Row, RowCursor};
use crate::bits::{BitDecoder, Pulse, Tail};
use crate::bytes::{BitRole, Byte, ByteAssembler, Shape};
use crate::error::ProtocolError;
use crate::signal::{Edge, EdgeSource, SampleEdges};
use crate::timing::UnitTimer;
use crate::transaction::{AddressWidth, Expect, State, TransactionStateMachine};
use crate::{Error, Result};

/// Size of the reads done by [decode_reader].
const CHUNK_SIZE: usize = 64 * 1024;

/// Decoder configuration.
///
/// ```
/// use swire::{AddressWidth, Config};
///
/// let config = Config::builder()
///     .sample_rate(24_000_000)
///     .address_width(AddressWidth::Two)
///     .build();
/// assert_eq!(config.bit_rate, Config::DEFAULT_BIT_RATE);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Config {
    /// Capture sample rate in Hz. There is no sensible default, the host must supply it.
    pub sample_rate: u64,
    /// Bus bit rate in bits/s.
    #[builder(default = Config::DEFAULT_BIT_RATE)]
    pub bit_rate: u32,
    #[builder(default)]
    pub address_width: AddressWidth,
    /// How long to wait for a read trigger, in bit periods from the end of the last byte,
    /// before giving up with [ProtocolError::MissingTrigger].
    #[builder(default = 10)]
    pub trigger_timeout_bits: u32,
    /// Longest HIGH stretch, in units, allowed between two bits of the same byte, and
    /// between a trigger and the slave's first bit. Exceeding it is a
    /// [ProtocolError::FrameGap].
    #[builder(default = 10)]
    pub max_bit_gap_units: u32,
}

impl Config {
    pub const DEFAULT_BIT_RATE: u32 = 960_000;

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// [Error::Config] for zero rates or timeouts, or a bit gap not larger than the 4 units
    /// a zero bit already stays HIGH for.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("cannot decode without sample rate".to_string()));
        }
        if self.bit_rate == 0 {
            return Err(Error::Config("bit rate must be > 0".to_string()));
        }
        if self.trigger_timeout_bits == 0 {
            return Err(Error::Config("trigger timeout must be > 0".to_string()));
        }
        if self.max_bit_gap_units <= 4 {
            return Err(Error::Config(format!(
                "max bit gap must be more than 4 units, got {}",
                self.max_bit_gap_units
            )));
        }
        Ok(())
    }
}

/// Streaming SWire decoder.
///
/// Feed it edges with [Decoder::advance] as they become available, then call
/// [Decoder::finish] once the capture is exhausted. Annotations and finalized transactions
/// are handed to the sink as soon as they are known.
///
/// ```
/// use swire::{Collector, Config, Decoder};
/// use swire::waveform::Waveform;
///
/// let mut wave = Waveform::new(5);
/// wave.idle(10).write(&[0x12, 0x34, 0x56], 0x05, &[0xaa]).idle(10);
///
/// let mut decoder = Decoder::new(Config::builder().sample_rate(24_000_000).build()).unwrap();
/// let mut sink = Collector::default();
/// decoder.advance(&mut wave.edges().into_iter(), &mut sink);
/// decoder.finish(wave.len(), &mut sink);
///
/// assert_eq!(sink.transactions.len(), 1);
/// assert_eq!(sink.transactions[0].data_values(), vec![0xaa]);
/// ```
#[derive(Debug, Clone)]
pub struct Decoder {
    config: Config,
    bits: BitDecoder,
    assembler: ByteAssembler,
    machine: TransactionStateMachine,
    cursor: RowCursor,
    // Rising edge of the previous pulse
    last_rise: Option<u64>,
    max_gap: u64,
    max_wait: u64,
}

impl Decoder {
    /// Creates a new decoder.
    ///
    /// # Errors
    /// [Error::Config] if `config` does not validate.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let timer = UnitTimer::new(config.sample_rate, config.bit_rate)?;
        let max_gap = timer.samples(config.max_bit_gap_units);
        let max_wait = u64::from(config.trigger_timeout_bits).saturating_mul(timer.bit_samples());
        debug!(
            unit = timer.unit_samples(),
            address_width = %config.address_width,
            max_gap,
            max_wait,
            "decoder configured"
        );

        Ok(Decoder {
            machine: TransactionStateMachine::new(config.address_width),
            config,
            bits: BitDecoder::new(timer),
            assembler: ByteAssembler::new(Shape::Master),
            cursor: RowCursor::default(),
            last_rise: None,
            max_gap,
            max_wait,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current transaction state.
    #[must_use]
    pub fn state(&self) -> State {
        self.machine.state()
    }

    /// Consume all edges currently available from `source`.
    pub fn advance<E, S>(&mut self, source: &mut E, sink: &mut S)
    where
        E: EdgeSource + ?Sized,
        S: AnnotationSink + ?Sized,
    {
        let mut cursor = self.cursor;
        let mut out = Emitter::new(sink, &mut cursor);
        while let Some(edge) = source.next_edge() {
            if let Some(pulse) = self.bits.edge(edge) {
                self.on_pulse(pulse, &mut out);
            }
        }
        self.cursor = cursor;
    }

    /// Flush everything pending at the end of the capture, `end_sample` being the index
    /// one past its last sample, and reset for a new capture.
    ///
    /// A partially received bit or byte is reported once as
    /// [ProtocolError::PrematureEndOfStream]; a transaction still open without one is
    /// closed the same way, or with [ProtocolError::MissingTrigger] if it was waiting for a
    /// trigger longer than the timeout.
    pub fn finish<S>(&mut self, end_sample: u64, sink: &mut S)
    where
        S: AnnotationSink + ?Sized,
    {
        let span = span!(Level::DEBUG, "finish", end_sample);
        let _guard = span.enter();

        let mut cursor = self.cursor;
        let mut out = Emitter::new(sink, &mut cursor);

        let pending_bit = match self.bits.finish(end_sample) {
            Tail::Idle => None,
            Tail::Low { fall } => Some(fall),
            Tail::Pulse(pulse) => {
                // a trigger's HIGH belongs to the slave, a cut one is still a trigger
                let trigger = self.assembler.is_empty()
                    && self.machine.expect() == Expect::Trigger
                    && self.bits.is_trigger(&pulse);
                if !trigger && self.bits.timer().is_incomplete(pulse.low(), pulse.high())
                {
                    Some(pulse.fall)
                } else {
                    self.on_pulse(pulse, &mut out);
                    None
                }
            }
        };

        if let Some(fall) = pending_bit {
            self.fail_overdue_trigger(fall, &mut out);
        }

        if pending_bit.is_some() || !self.assembler.is_empty() {
            let start = self
                .assembler
                .start()
                .or(pending_bit)
                .unwrap_or(end_sample);
            self.assembler.discard();
            self.machine.fail(
                ProtocolError::PrematureEndOfStream,
                start,
                end_sample.max(start),
                &mut out,
            );
        } else if let Some(since) = self.machine.last_end() {
            let err = if self.machine.expect() == Expect::Trigger
                && end_sample.saturating_sub(since) > self.max_wait
            {
                ProtocolError::MissingTrigger
            } else {
                ProtocolError::PrematureEndOfStream
            };
            self.machine.fail(err, since, end_sample.max(since), &mut out);
        }

        self.reset();
    }

    fn reset(&mut self) {
        self.assembler.reset(Shape::Master);
        self.machine.reset();
        self.cursor = RowCursor::default();
        self.last_rise = None;
    }

    /// Fail with [ProtocolError::MissingTrigger] if a trigger is due and the line has been
    /// quiet longer than the timeout when it falls at `at`.
    fn fail_overdue_trigger<S>(&mut self, at: u64, out: &mut Emitter<'_, S>) -> bool
    where
        S: AnnotationSink + ?Sized,
    {
        if !self.assembler.is_empty() || self.machine.expect() != Expect::Trigger {
            return false;
        }
        let since = self.machine.last_end().unwrap_or(at);
        if at.saturating_sub(since) <= self.max_wait {
            return false;
        }
        self.machine.fail(ProtocolError::MissingTrigger, since, at, out);
        true
    }

    fn on_pulse<S>(&mut self, pulse: Pulse, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        trace!(
            fall = pulse.fall,
            low = pulse.low(),
            high = pulse.high(),
            "pulse"
        );

        if let Some(rise) = self.last_rise.replace(pulse.rise) {
            let mid_byte =
                !self.assembler.is_empty() || self.machine.state() == State::ReadingData;
            if mid_byte && pulse.fall.saturating_sub(rise) > self.max_gap {
                self.assembler.discard();
                self.machine
                    .fail(ProtocolError::FrameGap, rise, pulse.fall, out);
            }
        }

        if self.assembler.is_empty() {
            if self.machine.expect() == Expect::Trigger
                && !self.fail_overdue_trigger(pulse.fall, out)
            {
                if self.bits.is_trigger(&pulse) {
                    self.machine.on_trigger(pulse.fall, pulse.rise, out);
                    return;
                } else {
                    self.machine.on_master_reasserted();
                }
            }
            let shape = match self.machine.expect() {
                Expect::Byte(shape) => shape,
                Expect::Trigger => Shape::Master,
            };
            self.assembler.reset(shape);
        }

        let bit = match self.bits.decode(&pulse, out) {
            Ok(bit) => bit,
            Err(err) => {
                let partial = self.assembler.discard();
                if self.machine.in_transaction() {
                    let start = partial.map_or(pulse.fall, |(start, _)| start);
                    let end = self.bits.span_end(&pulse);
                    self.machine.fail(err, start, end, out);
                }
                return;
            }
        };

        let role = self.assembler.next_role();
        let bit_text = bit.value.as_u8().to_string();
        if role == BitRole::Framing && bit.value != Byte::FRAMING_SENTINEL {
            out.emit(
                Annotation::new(
                    Class::Error,
                    bit.start,
                    bit.end,
                    [format!("Framing bit: {bit_text}"), "F".to_string()],
                )
                .on_row(Row::Bits),
            );
        } else {
            out.emit(Annotation::new(role.class(), bit.start, bit.end, [bit_text]));
        }

        if let Some(byte) = self.assembler.push(bit) {
            out.emit(Annotation::new(
                Class::Byte,
                byte.start,
                byte.end,
                [format!("0x{:02X}", byte.value), format!("{:02X}", byte.value)],
            ));
            self.machine.on_byte(byte, out);
        }
    }
}

/// Decode a complete capture given as edges. `end_sample` is one past the last sample.
///
/// # Errors
/// [Error::Config] if `config` does not validate.
pub fn decode_edges<I>(config: Config, edges: I, end_sample: u64) -> Result<Collector>
where
    I: IntoIterator<Item = Edge>,
{
    let mut decoder = Decoder::new(config)?;
    let mut out = Collector::default();
    decoder.advance(&mut edges.into_iter(), &mut out);
    decoder.finish(end_sample, &mut out);
    Ok(out)
}

fn channel_edges(channel: u8) -> Result<SampleEdges> {
    if channel > 7 {
        return Err(Error::Config(format!("channel must be 0-7, got {channel}")));
    }
    Ok(SampleEdges::new(channel))
}

/// Decode a capture stored one byte per sample, the line being bit `channel` of each
/// sample.
///
/// # Errors
/// [Error::Config] if `config` does not validate or `channel` is not 0-7.
pub fn decode_samples(config: Config, samples: &[u8], channel: u8) -> Result<Collector> {
    let mut edges = channel_edges(channel)?;
    let mut decoder = Decoder::new(config)?;
    let mut out = Collector::default();
    decoder.advance(&mut edges.edges(samples), &mut out);
    decoder.finish(edges.position(), &mut out);
    Ok(out)
}

/// Like [decode_samples], reading the capture from `reader` in chunks.
///
/// # Errors
/// [Error::Config] as for [decode_samples], [Error::Io] if reading fails.
pub fn decode_reader<R>(config: Config, mut reader: R, channel: u8) -> Result<Collector>
where
    R: Read,
{
    let mut edges = channel_edges(channel)?;
    let mut decoder = Decoder::new(config)?;
    let mut out = Collector::default();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let num = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(num) => num,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        decoder.advance(&mut edges.edges(&buf[..num]), &mut out);
    }
    debug!(samples = edges.position(), "capture exhausted");
    decoder.finish(edges.position(), &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Direction, Outcome};
    use crate::waveform::Waveform;

    fn config() -> Config {
        Config::builder().sample_rate(24_000_000).build()
    }

    fn decode(wave: &Waveform) -> Collector {
        decode_edges(config(), wave.edges(), wave.len()).unwrap()
    }

    fn classes(sink: &Collector, row: Row) -> Vec<Class> {
        sink.row(row).map(|a| a.class).collect()
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.bit_rate, 960_000);
        assert_eq!(config.address_width, AddressWidth::Three);
        assert_eq!(config.trigger_timeout_bits, 10);
        assert_eq!(config.max_bit_gap_units, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_configs() {
        let zero_rate = Config::builder().sample_rate(0).build();
        assert!(matches!(Decoder::new(zero_rate), Err(Error::Config(_))));
        let zero_timeout = Config::builder()
            .sample_rate(24_000_000)
            .trigger_timeout_bits(0)
            .build();
        assert!(matches!(zero_timeout.validate(), Err(Error::Config(_))));
        let small_gap = Config::builder()
            .sample_rate(24_000_000)
            .max_bit_gap_units(4)
            .build();
        assert!(matches!(small_gap.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn extreme_timeouts_saturate() {
        let config = Config::builder()
            .sample_rate(u64::MAX)
            .bit_rate(1)
            .trigger_timeout_bits(u32::MAX)
            .build();
        let decoder = Decoder::new(config).unwrap();
        assert_eq!(decoder.max_wait, u64::MAX);
    }

    #[test]
    fn write_transaction_annotations() {
        let mut wave = Waveform::new(5);
        wave.idle(10).write(&[0x12, 0x34, 0x56], 0x05, &[0xaa]).idle(10);
        let sink = decode(&wave);

        assert_eq!(
            classes(&sink, Row::Master),
            vec![
                Class::Start,
                Class::Address,
                Class::ReadWrite,
                Class::MasterData,
                Class::End
            ]
        );
        // START, 3 address, RW_ID, data, END
        assert_eq!(sink.row(Row::Bytes).count(), 7);
        assert_eq!(sink.row(Row::Bits).count(), 70);
        assert_eq!(sink.class(Class::CmdBit).count(), 7);
        assert!(sink.row(Row::Slave).next().is_none());

        let start = sink.class(Class::Start).next().unwrap();
        assert_eq!(start.texts, vec!["START", "S"]);
        // 10 units of idle, 10 bits of 25 samples
        assert_eq!((start.start, start.end), (50, 300));

        let txn = &sink.transactions[0];
        assert_eq!(txn.outcome, Outcome::Ok);
        assert_eq!(txn.direction, Some(Direction::Write));
    }

    #[test]
    fn read_transaction_annotations() {
        let mut wave = Waveform::new(5);
        wave.idle(10).read(&[0x12, 0x34, 0x56], 0x03, &[0x42, 0x43]).idle(10);
        let sink = decode(&wave);

        assert_eq!(
            classes(&sink, Row::Master),
            vec![
                Class::Start,
                Class::Address,
                Class::ReadWrite,
                Class::Trigger,
                Class::Trigger,
                Class::End
            ]
        );
        let slave: Vec<&str> = sink.row(Row::Slave).map(Annotation::text).collect();
        assert_eq!(slave, vec!["0x42", "0x43"]);
        let txn = &sink.transactions[0];
        assert!(txn.is_ok());
        assert_eq!(txn.data_values(), vec![0x42, 0x43]);
    }

    #[test]
    fn chunked_advance_matches_single_pass() {
        let mut wave = Waveform::new(5);
        wave.idle(10)
            .write(&[0x00, 0x01, 0x02], 0x01, &[0x10, 0x20])
            .idle(20)
            .read(&[0x00, 0x01, 0x02], 0x01, &[0x30])
            .idle(10);
        let expected = decode(&wave);

        let samples = wave.to_samples(0);
        let mut edges = SampleEdges::new(0);
        let mut decoder = Decoder::new(config()).unwrap();
        let mut sink = Collector::default();
        for chunk in samples.chunks(7) {
            decoder.advance(&mut edges.edges(chunk), &mut sink);
        }
        decoder.finish(edges.position(), &mut sink);

        assert_eq!(sink.annotations, expected.annotations);
        assert_eq!(sink.transactions, expected.transactions);
    }

    #[test]
    fn truncated_capture_reports_once() {
        let mut wave = Waveform::new(5);
        wave.idle(10).start().master_byte(false, 0x12).bit(false).bit(true);
        let sink = decode(&wave);

        let errors: Vec<&Annotation> = sink.class(Class::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text(), "Premature end of stream");
        assert_eq!(errors[0].row, Row::Master);
        assert_eq!(errors[0].end, wave.len());
        assert_eq!(
            sink.transactions[0].outcome,
            Outcome::Error(ProtocolError::PrematureEndOfStream)
        );
    }

    #[test]
    fn finish_resets_decoder() {
        let mut wave = Waveform::new(5);
        wave.idle(10).start();
        let mut decoder = Decoder::new(config()).unwrap();
        let mut sink = Collector::default();
        decoder.advance(&mut wave.edges().into_iter(), &mut sink);
        assert_eq!(decoder.state(), State::ReadingAddress);
        decoder.finish(wave.len(), &mut sink);
        assert_eq!(decoder.state(), State::Idle);
        assert_eq!(sink.transactions.len(), 1);
    }

    #[test]
    fn missing_trigger_then_next_transaction() {
        let mut wave = Waveform::new(5);
        wave.idle(10)
            .start()
            .master_byte(false, 0x00)
            .master_byte(false, 0x01)
            .master_byte(false, 0x02)
            .master_byte(false, 0x83)
            .idle(100)
            .write(&[0x00, 0x01, 0x02], 0x03, &[0x99])
            .idle(10);
        let sink = decode(&wave);

        assert_eq!(sink.transactions.len(), 2);
        assert_eq!(
            sink.transactions[0].outcome,
            Outcome::Error(ProtocolError::MissingTrigger)
        );
        assert_eq!(sink.transactions[0].state, State::AwaitingTrigger);
        assert!(sink.transactions[1].is_ok());
        assert_eq!(sink.transactions[1].data_values(), vec![0x99]);
    }

    #[test]
    fn framing_bit_zero_is_flagged() {
        let mut wave = Waveform::new(5);
        wave.idle(10).start();
        // address byte with a bad framing bit
        wave.bit(false);
        for _ in 0..8 {
            wave.bit(false);
        }
        wave.bit(false).idle(10);
        let sink = decode(&wave);

        let flagged: Vec<&Annotation> = sink.row(Row::Bits).filter(|a| a.class == Class::Error).collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].texts, vec!["Framing bit: 0", "F"]);
        // the byte itself still decodes
        assert_eq!(sink.row(Row::Bytes).count(), 2);
    }

    #[test]
    fn bad_channel_is_config_error() {
        assert!(matches!(
            decode_samples(config(), &[0xff], 8),
            Err(Error::Config(_))
        ));
    }
}
