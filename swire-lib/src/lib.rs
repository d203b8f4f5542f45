#![doc = include_str!("../README.md")]

mod decoder;
mod error;

pub mod annotation;
pub mod bits;
pub mod bytes;
pub mod signal;
pub mod timing;
pub mod transaction;
pub mod waveform;

pub use annotation::{Annotation, AnnotationSink, Class, Collector, Row};
pub use decoder::{decode_edges, decode_reader, decode_samples, Config, Decoder};
pub use error::{Error, ProtocolError, Result};
pub use signal::{Edge, EdgeSource, Level, SampleEdges};
pub use transaction::{AddressWidth, Direction, Outcome, State, Transaction};
