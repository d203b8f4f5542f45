//! Transaction level decoding.
//!
//! A transaction on the wire is
//!
//! ```text
//! START  ADDR[2|3]  RW_ID  DATA...  END
//! ```
//!
//! where START is the master byte CMD=1/0x5A, END is CMD=1/0xFF and all other master
//! bytes have CMD=0. Bit 7 of RW_ID selects a read (1) or write (0), bits 6-0 are the
//! slave ID. Write data is sent by the master. For reads the master issues a 1 unit
//! LOW trigger pulse before each byte the slave answers with.
use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, trace};

use crate::annotation::{Annotation, AnnotationSink, Class, Emitter};
use crate::bytes::{Byte, Shape};
use crate::error::ProtocolError;
use crate::Error;

/// Data value of the CMD=1 byte opening a transaction.
pub const START: u8 = 0x5a;
/// Data value of the CMD=1 byte closing a transaction.
pub const END: u8 = 0xff;

/// Width of the address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AddressWidth {
    Two,
    #[default]
    Three,
}

impl AddressWidth {
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            AddressWidth::Two => 2,
            AddressWidth::Three => 3,
        }
    }
}

impl TryFrom<u8> for AddressWidth {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(AddressWidth::Two),
            3 => Ok(AddressWidth::Three),
            _ => Err(Error::Config(format!(
                "address width must be 2 or 3 bytes, got {value}"
            ))),
        }
    }
}

impl Display for AddressWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum State {
    /// Nothing seen yet, or the last transaction completed.
    Idle,
    /// Ignoring traffic until the next START.
    SeekingStart,
    ReadingAddress,
    ReadingRwId,
    WritingData,
    AwaitingTrigger,
    ReadingData,
    SeekingEnd,
    /// The last transaction failed. Left at the next byte boundary.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn abbrev(self) -> &'static str {
        match self {
            Direction::Read => "R",
            Direction::Write => "W",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Outcome {
    Ok,
    Error(ProtocolError),
}

/// One START ... END exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Transaction {
    /// Phase the transaction had reached when it was finalized.
    pub state: State,
    pub address: Vec<Byte>,
    pub rw_id: Option<Byte>,
    pub direction: Option<Direction>,
    pub data: Vec<Byte>,
    /// The closing CMD=1 byte, kept when it was not a valid END for diagnostics.
    pub end_marker: Option<Byte>,
    pub start: u64,
    pub end: u64,
    pub outcome: Outcome,
}

impl Transaction {
    fn open(start: &Byte) -> Self {
        Transaction {
            state: State::ReadingAddress,
            address: Vec::new(),
            rw_id: None,
            direction: None,
            data: Vec::new(),
            end_marker: None,
            start: start.start,
            end: start.end,
            outcome: Outcome::Ok,
        }
    }

    /// Address bytes concatenated, most significant byte first.
    #[must_use]
    pub fn address_value(&self) -> Option<u32> {
        if self.address.is_empty() {
            return None;
        }
        Some(
            self.address
                .iter()
                .fold(0u32, |acc, b| (acc << 8) | u32::from(b.value)),
        )
    }

    #[must_use]
    pub fn slave_id(&self) -> Option<u8> {
        self.rw_id.as_ref().map(|b| b.value & 0x7f)
    }

    #[must_use]
    pub fn data_values(&self) -> Vec<u8> {
        self.data.iter().map(|b| b.value).collect()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// What the decoder should look for next on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A byte of the given shape.
    Byte(Shape),
    /// A read trigger, or the CMD=1 bit of the master's closing byte.
    Trigger,
}

/// Classifies the byte stream into [Transaction]s.
///
/// Faults close the current transaction with [Outcome::Error] and put the machine in
/// [State::Error], from where it scans for the next START like [State::SeekingStart].
#[derive(Debug, Clone)]
pub struct TransactionStateMachine {
    address_width: AddressWidth,
    state: State,
    current: Option<Transaction>,
}

impl TransactionStateMachine {
    #[must_use]
    pub fn new(address_width: AddressWidth) -> Self {
        TransactionStateMachine {
            address_width,
            state: State::Idle,
            current: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The transaction in progress, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Transaction> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    /// End of the last element of the transaction in progress.
    #[must_use]
    pub fn last_end(&self) -> Option<u64> {
        self.current.as_ref().map(|t| t.end)
    }

    #[must_use]
    pub fn expect(&self) -> Expect {
        match self.state {
            State::AwaitingTrigger => Expect::Trigger,
            State::ReadingData => Expect::Byte(Shape::Slave),
            _ => Expect::Byte(Shape::Master),
        }
    }

    /// Drop any transaction in progress without reporting it.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.current = None;
    }

    /// Consume the next complete byte.
    pub fn on_byte<S>(&mut self, byte: Byte, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        match self.state {
            State::Idle | State::SeekingStart | State::Error => self.seek_start(byte, out),
            State::ReadingAddress => self.read_address(byte, out),
            State::ReadingRwId => self.read_rw_id(byte, out),
            State::WritingData | State::AwaitingTrigger | State::SeekingEnd
                if byte.is_control() && byte.value == START =>
            {
                self.restart(byte, out);
            }
            State::WritingData => {
                if byte.is_control() {
                    self.state = State::SeekingEnd;
                    self.close_with(byte, out);
                } else {
                    out.emit(data_annotation(Class::MasterData, &byte));
                    self.push_data(byte);
                }
            }
            State::ReadingData => {
                out.emit(data_annotation(Class::SlaveData, &byte));
                self.push_data(byte);
                self.state = State::AwaitingTrigger;
            }
            State::AwaitingTrigger | State::SeekingEnd => {
                self.state = State::SeekingEnd;
                self.close_with(byte, out);
            }
        }
    }

    /// A read trigger pulse spanning `start..end` was seen.
    pub fn on_trigger<S>(&mut self, start: u64, end: u64, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        out.emit(Annotation::new(Class::Trigger, start, end, ["Trigger", "T", ">"]));
        if let Some(txn) = self.current.as_mut() {
            txn.end = end;
        }
        self.state = State::ReadingData;
    }

    /// The master took the line back during a read; the byte that follows must be END.
    pub fn on_master_reasserted(&mut self) {
        if self.state == State::AwaitingTrigger {
            self.state = State::SeekingEnd;
        }
    }

    /// Report `err` over `start..end`, close any transaction in progress with it, and
    /// resynchronize.
    pub fn fail<S>(&mut self, err: ProtocolError, start: u64, end: u64, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        out.emit(Annotation::error(err, start, end));
        self.abort(err, end, out);
    }

    /// Close any transaction in progress with `err` without emitting another annotation;
    /// used when the fault has already been reported.
    pub fn abort<S>(&mut self, err: ProtocolError, end: u64, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        debug!(state = ?self.state, "{err}; resynchronizing");
        if let Some(mut txn) = self.current.take() {
            txn.state = self.state;
            txn.end = txn.end.max(end);
            txn.outcome = Outcome::Error(err);
            out.transaction(txn);
        }
        self.state = State::Error;
    }

    fn seek_start<S>(&mut self, byte: Byte, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        if byte.is_control() && byte.value == START {
            out.emit(Annotation::new(Class::Start, byte.start, byte.end, ["START", "S"]));
            trace!(sample = byte.start, "transaction start");
            self.current = Some(Transaction::open(&byte));
            self.state = State::ReadingAddress;
        } else {
            trace!(sample = byte.start, value = byte.value, "ignoring byte outside transaction");
            self.state = State::SeekingStart;
        }
    }

    /// Close the transaction left waiting for END and open a new one on `byte`.
    fn restart<S>(&mut self, byte: Byte, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        // error covers the idle line where END was due, START keeps its own span
        let since = self.last_end().unwrap_or(byte.start).min(byte.start);
        self.fail(ProtocolError::UnexpectedStart, since, byte.start, out);
        self.seek_start(byte, out);
    }

    fn read_address<S>(&mut self, byte: Byte, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        let width = self.address_width.bytes();
        let Some(txn) = self.current.as_mut() else {
            self.state = State::SeekingStart;
            return;
        };
        if byte.is_control() {
            let start = txn.address.first().map_or(byte.start, |b| b.start);
            let err = ProtocolError::UnexpectedControlByte { value: byte.value };
            self.fail(err, start, byte.end, out);
            return;
        }

        txn.end = byte.end;
        txn.address.push(byte);
        if txn.address.len() < width {
            return;
        }

        let value = txn.address_value().unwrap_or_default();
        let start = txn.address.first().map_or(txn.end, |b| b.start);
        let addr = format!("0x{value:0digits$X}", digits = width * 2);
        out.emit(Annotation::new(
            Class::Address,
            start,
            txn.end,
            [format!("ADDR: {addr}"), addr],
        ));
        txn.state = State::ReadingRwId;
        self.state = State::ReadingRwId;
    }

    fn read_rw_id<S>(&mut self, byte: Byte, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        let Some(txn) = self.current.as_mut() else {
            self.state = State::SeekingStart;
            return;
        };
        if byte.is_control() {
            let err = ProtocolError::UnexpectedControlByte { value: byte.value };
            self.fail(err, byte.start, byte.end, out);
            return;
        }

        let direction = if byte.value & 0x80 != 0 {
            Direction::Read
        } else {
            Direction::Write
        };
        let rw = direction.abbrev();
        let slave_id = byte.value & 0x7f;
        out.emit(Annotation::new(
            Class::ReadWrite,
            byte.start,
            byte.end,
            [format!("{rw} ID:{slave_id}"), rw.to_string()],
        ));
        debug!(address = ?txn.address_value(), ?direction, slave_id, "transaction header");

        txn.end = byte.end;
        txn.rw_id = Some(byte);
        txn.direction = Some(direction);
        self.state = match direction {
            Direction::Read => State::AwaitingTrigger,
            Direction::Write => State::WritingData,
        };
        txn.state = self.state;
    }

    fn push_data(&mut self, byte: Byte) {
        if let Some(txn) = self.current.as_mut() {
            txn.end = byte.end;
            txn.data.push(byte);
            txn.state = self.state;
        }
    }

    /// Handle the byte expected to be END.
    fn close_with<S>(&mut self, byte: Byte, out: &mut Emitter<'_, S>)
    where
        S: AnnotationSink + ?Sized,
    {
        let (start, end, value) = (byte.start, byte.end, byte.value);
        let valid = byte.is_control() && value == END;
        if let Some(txn) = self.current.as_mut() {
            txn.end = end;
            if !valid {
                txn.end_marker = Some(byte);
            }
        }

        if !valid {
            self.fail(ProtocolError::MalformedEndMarker { value }, start, end, out);
            return;
        }

        out.emit(Annotation::new(Class::End, start, end, ["END", "E"]));
        if let Some(mut txn) = self.current.take() {
            txn.state = State::SeekingEnd;
            txn.outcome = Outcome::Ok;
            debug!(
                address = ?txn.address_value(),
                direction = ?txn.direction,
                len = txn.data.len(),
                "transaction complete"
            );
            out.transaction(txn);
        }
        self.state = State::Idle;
    }
}

fn data_annotation(class: Class, byte: &Byte) -> Annotation {
    Annotation::new(
        class,
        byte.start,
        byte.end,
        [format!("0x{:02X}", byte.value), format!("{:02X}", byte.value)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Collector, Row, RowCursor};
    use crate::bits::{Bit, BitValue};

    const BYTE_LEN: u64 = 250;

    // Bytes are laid out back to back, `idx` selects the slot
    fn master(idx: u64, cmd: u8, value: u8) -> Byte {
        make(idx, Some(cmd), value)
    }

    fn slave(idx: u64, value: u8) -> Byte {
        make(idx, None, value)
    }

    fn make(idx: u64, cmd: Option<u8>, value: u8) -> Byte {
        let start = idx * BYTE_LEN;
        let bit = |v: u8, at: u64| Bit {
            value: if v == 0 { BitValue::Zero } else { BitValue::One },
            start: at,
            end: at + 25,
        };
        let offset = u64::from(cmd.is_some());
        Byte {
            shape: if cmd.is_some() {
                Shape::Master
            } else {
                Shape::Slave
            },
            value,
            cmd: cmd.map(|c| bit(c, start)),
            bits: (0..8u64)
                .map(|i| bit((value >> (7 - i)) & 1, start + (i + offset) * 25))
                .collect(),
            framing: bit(1, start + (8 + offset) * 25),
            framing_ok: true,
            start,
            end: start + (9 + offset) * 25,
        }
    }

    struct Harness {
        machine: TransactionStateMachine,
        sink: Collector,
        cursor: RowCursor,
    }

    impl Harness {
        fn new(width: AddressWidth) -> Self {
            Harness {
                machine: TransactionStateMachine::new(width),
                sink: Collector::default(),
                cursor: RowCursor::default(),
            }
        }

        fn byte(&mut self, byte: Byte) {
            let mut out = Emitter::new(&mut self.sink, &mut self.cursor);
            self.machine.on_byte(byte, &mut out);
        }

        fn trigger(&mut self, start: u64, end: u64) {
            let mut out = Emitter::new(&mut self.sink, &mut self.cursor);
            self.machine.on_trigger(start, end, &mut out);
        }

        fn texts(&self, class: Class) -> Vec<String> {
            self.sink.class(class).map(|a| a.text().to_string()).collect()
        }
    }

    #[test]
    fn write_transaction() {
        let mut h = Harness::new(AddressWidth::Three);
        h.byte(master(0, 1, START));
        assert_eq!(h.machine.state(), State::ReadingAddress);
        h.byte(master(1, 0, 0x12));
        h.byte(master(2, 0, 0x34));
        h.byte(master(3, 0, 0x56));
        assert_eq!(h.machine.state(), State::ReadingRwId);
        h.byte(master(4, 0, 0x05));
        assert_eq!(h.machine.state(), State::WritingData);
        h.byte(master(5, 0, 0xaa));
        h.byte(master(6, 0, 0xbb));
        h.byte(master(7, 1, END));
        assert_eq!(h.machine.state(), State::Idle);

        assert_eq!(h.texts(Class::Address), vec!["ADDR: 0x123456"]);
        assert_eq!(h.texts(Class::ReadWrite), vec!["W ID:5"]);
        assert_eq!(h.texts(Class::MasterData), vec!["0xAA", "0xBB"]);
        assert_eq!(h.texts(Class::End), vec!["END"]);

        assert_eq!(h.sink.transactions.len(), 1);
        let txn = &h.sink.transactions[0];
        assert!(txn.is_ok());
        assert_eq!(txn.address_value(), Some(0x12_3456));
        assert_eq!(txn.direction, Some(Direction::Write));
        assert_eq!(txn.slave_id(), Some(5));
        assert_eq!(txn.data_values(), vec![0xaa, 0xbb]);
        assert_eq!((txn.start, txn.end), (0, 8 * BYTE_LEN));
        assert_eq!(txn.state, State::SeekingEnd);
    }

    #[test]
    fn read_transaction_with_triggers() {
        let mut h = Harness::new(AddressWidth::Two);
        h.byte(master(0, 1, START));
        h.byte(master(1, 0, 0x00));
        h.byte(master(2, 0, 0x7e));
        h.byte(master(3, 0, 0x83));
        assert_eq!(h.machine.state(), State::AwaitingTrigger);
        assert_eq!(h.machine.expect(), Expect::Trigger);
        assert_eq!(h.texts(Class::ReadWrite), vec!["R ID:3"]);

        h.trigger(1000, 1005);
        assert_eq!(h.machine.expect(), Expect::Byte(Shape::Slave));
        h.byte(slave(5, 0x42));
        assert_eq!(h.machine.state(), State::AwaitingTrigger);

        h.machine.on_master_reasserted();
        assert_eq!(h.machine.expect(), Expect::Byte(Shape::Master));
        h.byte(master(7, 1, END));

        assert_eq!(h.texts(Class::Address), vec!["ADDR: 0x007E"]);
        assert_eq!(h.texts(Class::SlaveData), vec!["0x42"]);
        assert_eq!(h.sink.row(Row::Slave).count(), 1);
        let txn = &h.sink.transactions[0];
        assert!(txn.is_ok());
        assert_eq!(txn.direction, Some(Direction::Read));
        assert_eq!(txn.data_values(), vec![0x42]);
    }

    #[test]
    fn traffic_before_start_is_ignored() {
        let mut h = Harness::new(AddressWidth::Three);
        h.byte(master(0, 0, 0x5a));
        h.byte(master(1, 1, 0x12));
        assert_eq!(h.machine.state(), State::SeekingStart);
        assert!(h.sink.annotations.is_empty());
        assert!(!h.machine.in_transaction());
    }

    #[test]
    fn start_while_reading_address_is_unexpected() {
        let mut h = Harness::new(AddressWidth::Three);
        h.byte(master(0, 1, START));
        h.byte(master(1, 0, 0x12));
        h.byte(master(2, 1, START));
        assert_eq!(h.machine.state(), State::Error);
        assert!(!h.machine.in_transaction(), "START is not re-read");

        let errors: Vec<&Annotation> = h.sink.class(Class::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text(), "Unexpected CMD byte: 0x5A");
        assert_eq!((errors[0].start, errors[0].end), (BYTE_LEN, 3 * BYTE_LEN));

        let txn = &h.sink.transactions[0];
        assert_eq!(
            txn.outcome,
            Outcome::Error(ProtocolError::UnexpectedControlByte { value: START })
        );
        assert_eq!(txn.state, State::ReadingAddress);

        // the next START opens a new transaction
        h.byte(master(3, 1, START));
        assert_eq!(h.machine.state(), State::ReadingAddress);
    }

    #[test]
    fn control_byte_as_rw_id() {
        let mut h = Harness::new(AddressWidth::Two);
        h.byte(master(0, 1, START));
        h.byte(master(1, 0, 0x00));
        h.byte(master(2, 0, 0x01));
        h.byte(master(3, 1, 0x80));
        assert_eq!(
            h.sink.transactions[0].outcome,
            Outcome::Error(ProtocolError::UnexpectedControlByte { value: 0x80 })
        );
    }

    #[test]
    fn malformed_end_marker() {
        let mut h = Harness::new(AddressWidth::Two);
        h.byte(master(0, 1, START));
        h.byte(master(1, 0, 0x00));
        h.byte(master(2, 0, 0x01));
        h.byte(master(3, 0, 0x00));
        h.byte(master(4, 1, 0xfe));

        assert_eq!(h.machine.state(), State::Error);
        assert_eq!(h.texts(Class::Error), vec!["Invalid END: 0xFE"]);
        let txn = &h.sink.transactions[0];
        assert_eq!(
            txn.outcome,
            Outcome::Error(ProtocolError::MalformedEndMarker { value: 0xfe })
        );
        assert_eq!(txn.end_marker.as_ref().map(|b| b.value), Some(0xfe));
        assert!(txn.data.is_empty());
    }

    #[test]
    fn start_while_waiting_for_end_restarts() {
        let mut h = Harness::new(AddressWidth::Two);
        h.byte(master(0, 1, START));
        h.byte(master(1, 0, 0x00));
        h.byte(master(2, 0, 0x01));
        h.byte(master(3, 0, 0x05));
        // END lost its CMD bit and reads as data
        h.byte(master(4, 0, END));
        h.byte(master(6, 1, START));
        assert_eq!(h.machine.state(), State::ReadingAddress);
        assert!(h.machine.in_transaction());

        let errors: Vec<&Annotation> = h.sink.class(Class::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text(), "Unexpected START");
        assert_eq!((errors[0].start, errors[0].end), (5 * BYTE_LEN, 6 * BYTE_LEN));
        assert_eq!(h.texts(Class::Start), vec!["START", "START"]);

        let txn = &h.sink.transactions[0];
        assert_eq!(txn.outcome, Outcome::Error(ProtocolError::UnexpectedStart));
        assert_eq!(txn.state, State::WritingData);
        assert_eq!(txn.data_values(), vec![END]);
        assert!(txn.end_marker.is_none());
    }

    #[test]
    fn start_after_master_reasserted_restarts() {
        let mut h = Harness::new(AddressWidth::Two);
        h.byte(master(0, 1, START));
        h.byte(master(1, 0, 0x00));
        h.byte(master(2, 0, 0x01));
        h.byte(master(3, 0, 0x85));
        h.machine.on_master_reasserted();
        h.byte(master(4, 1, START));

        assert_eq!(h.machine.state(), State::ReadingAddress);
        assert_eq!(h.texts(Class::Error), vec!["Unexpected START"]);
        let txn = &h.sink.transactions[0];
        assert_eq!(txn.outcome, Outcome::Error(ProtocolError::UnexpectedStart));
        assert_eq!(txn.direction, Some(Direction::Read));
    }

    #[test]
    fn fail_without_transaction_only_annotates() {
        let mut h = Harness::new(AddressWidth::Three);
        let mut out = Emitter::new(&mut h.sink, &mut h.cursor);
        h.machine.fail(ProtocolError::FrameGap, 10, 200, &mut out);
        assert_eq!(h.sink.annotations.len(), 1);
        assert!(h.sink.transactions.is_empty());
        assert_eq!(h.machine.state(), State::Error);
    }

    #[test]
    fn address_width_from_u8() {
        assert_eq!(AddressWidth::try_from(2).unwrap(), AddressWidth::Two);
        assert_eq!(AddressWidth::try_from(3).unwrap(), AddressWidth::Three);
        assert!(AddressWidth::try_from(4).is_err());
        assert_eq!(AddressWidth::default().bytes(), 3);
    }
}
