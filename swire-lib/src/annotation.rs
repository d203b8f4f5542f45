//! Decoder output.
//!
//! Everything the decoder finds is reported as an [Annotation] on one of four rows, as a
//! logic analyzer front-end would display them:
//!
//! | Row    | Classes                                             |
//! |--------|-----------------------------------------------------|
//! | Bits   | `bit`, `cmd-bit` (and `error` for bad bits)         |
//! | Bytes  | `byte`                                              |
//! | Master | `start`, `addr`, `rw`, `data-m`, `end`, `trig`, `error` |
//! | Slave  | `data-s`                                            |
//!
//! Annotations are handed to an [AnnotationSink] as soon as they are known; the decoder
//! does not keep them.
use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::warn;

use crate::error::ProtocolError;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Row {
    Bits,
    Bytes,
    Master,
    Slave,
}

impl Row {
    pub const ALL: [Row; 4] = [Row::Bits, Row::Bytes, Row::Master, Row::Slave];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Row::Bits => "bits",
            Row::Bytes => "bytes",
            Row::Master => "master",
            Row::Slave => "slave",
        }
    }

    fn index(self) -> usize {
        match self {
            Row::Bits => 0,
            Row::Bytes => 1,
            Row::Master => 2,
            Row::Slave => 3,
        }
    }
}

impl Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum Class {
    #[cfg_attr(feature = "serde", serde(rename = "bit"))]
    Bit,
    #[cfg_attr(feature = "serde", serde(rename = "cmd-bit"))]
    CmdBit,
    #[cfg_attr(feature = "serde", serde(rename = "byte"))]
    Byte,
    #[cfg_attr(feature = "serde", serde(rename = "start"))]
    Start,
    #[cfg_attr(feature = "serde", serde(rename = "addr"))]
    Address,
    #[cfg_attr(feature = "serde", serde(rename = "rw"))]
    ReadWrite,
    #[cfg_attr(feature = "serde", serde(rename = "data-m"))]
    MasterData,
    #[cfg_attr(feature = "serde", serde(rename = "data-s"))]
    SlaveData,
    #[cfg_attr(feature = "serde", serde(rename = "end"))]
    End,
    #[cfg_attr(feature = "serde", serde(rename = "trig"))]
    Trigger,
    #[cfg_attr(feature = "serde", serde(rename = "error"))]
    Error,
}

impl Class {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Class::Bit => "bit",
            Class::CmdBit => "cmd-bit",
            Class::Byte => "byte",
            Class::Start => "start",
            Class::Address => "addr",
            Class::ReadWrite => "rw",
            Class::MasterData => "data-m",
            Class::SlaveData => "data-s",
            Class::End => "end",
            Class::Trigger => "trig",
            Class::Error => "error",
        }
    }

    /// Row annotations of this class are placed on unless explicitly moved.
    #[must_use]
    pub fn row(self) -> Row {
        match self {
            Class::Bit | Class::CmdBit => Row::Bits,
            Class::Byte => Row::Bytes,
            Class::SlaveData => Row::Slave,
            Class::Start
            | Class::Address
            | Class::ReadWrite
            | Class::MasterData
            | Class::End
            | Class::Trigger
            | Class::Error => Row::Master,
        }
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A labeled sample span.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Annotation {
    pub row: Row,
    pub class: Class,
    /// Alternative texts, longest first.
    pub texts: Vec<String>,
    pub start: u64,
    pub end: u64,
}

impl Annotation {
    pub fn new<T, I>(class: Class, start: u64, end: u64, texts: I) -> Self
    where
        T: Into<String>,
        I: IntoIterator<Item = T>,
    {
        Annotation {
            row: class.row(),
            class,
            texts: texts.into_iter().map(Into::into).collect(),
            start,
            end,
        }
    }

    /// Error annotation describing `err`.
    #[must_use]
    pub fn error(err: ProtocolError, start: u64, end: u64) -> Self {
        Annotation::new(Class::Error, start, end, [err.to_string(), err.short().to_string()])
    }

    /// Move this annotation to `row`.
    #[must_use]
    pub fn on_row(mut self, row: Row) -> Self {
        self.row = row;
        self
    }

    /// The primary (longest) text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.texts.first().map_or("", String::as_str)
    }
}

impl Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{} {} {}: {}",
            self.start,
            self.end,
            self.row,
            self.class,
            self.text()
        )
    }
}

/// Receives decoder output.
pub trait AnnotationSink {
    fn annotate(&mut self, annotation: Annotation);

    /// Called once per transaction when it is finalized, after its last annotation.
    fn transaction(&mut self, _transaction: Transaction) {}
}

impl AnnotationSink for Vec<Annotation> {
    fn annotate(&mut self, annotation: Annotation) {
        self.push(annotation);
    }
}

/// Sink that keeps everything.
#[derive(Debug, Default, Clone)]
pub struct Collector {
    pub annotations: Vec<Annotation>,
    pub transactions: Vec<Transaction>,
}

impl Collector {
    /// Annotations placed on `row`, in emission order.
    pub fn row(&self, row: Row) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.row == row)
    }

    /// Annotations of `class` on any row.
    pub fn class(&self, class: Class) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.class == class)
    }
}

impl AnnotationSink for Collector {
    fn annotate(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    fn transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }
}

/// End of the last span emitted on each row.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowCursor {
    last_end: [u64; 4],
}

impl RowCursor {
    #[must_use]
    pub fn last_end(&self, row: Row) -> u64 {
        self.last_end[row.index()]
    }
}

/// Forwards decoder output to a sink while tracking per-row span order.
pub struct Emitter<'a, S>
where
    S: AnnotationSink + ?Sized,
{
    sink: &'a mut S,
    cursor: &'a mut RowCursor,
}

impl<'a, S> Emitter<'a, S>
where
    S: AnnotationSink + ?Sized,
{
    pub fn new(sink: &'a mut S, cursor: &'a mut RowCursor) -> Self {
        Emitter { sink, cursor }
    }

    pub fn emit(&mut self, annotation: Annotation) {
        let idx = annotation.row.index();
        if annotation.start < self.cursor.last_end[idx] {
            warn!(
                row = %annotation.row,
                last_end = self.cursor.last_end[idx],
                "annotation overlaps previous span: {annotation}"
            );
        }
        self.cursor.last_end[idx] = self.cursor.last_end[idx].max(annotation.end);
        self.sink.annotate(annotation);
    }

    pub fn transaction(&mut self, transaction: Transaction) {
        self.sink.transaction(transaction);
    }
}
