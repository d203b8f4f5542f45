//! Signal transitions on the SWire line.
//!
//! The decoder only ever looks at transitions. Anything able to produce [Edge]s in
//! sample order is an [EdgeSource]; [SampleEdges] derives them from raw logic captures
//! stored one byte per sample.
#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// A transition of the line to `level` at `sample`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Edge {
    /// Index of the first sample at the new level.
    pub sample: u64,
    pub level: Level,
}

impl Edge {
    #[must_use]
    pub fn falling(sample: u64) -> Self {
        Edge {
            sample,
            level: Level::Low,
        }
    }

    #[must_use]
    pub fn rising(sample: u64) -> Self {
        Edge {
            sample,
            level: Level::High,
        }
    }
}

/// Supplies the next transition on the line.
///
/// Returning `None` means no more transitions are available *right now*. A host feeding
/// a capture in chunks hands the decoder a fresh source for every chunk.
pub trait EdgeSource {
    fn next_edge(&mut self) -> Option<Edge>;
}

impl<I> EdgeSource for I
where
    I: Iterator<Item = Edge>,
{
    fn next_edge(&mut self) -> Option<Edge> {
        self.next()
    }
}

/// Extracts edges from raw captures where each byte is one sample and each bit of the
/// byte is one logic channel.
///
/// State carries over between chunks, so a capture may be fed in pieces of any size.
/// The first sample only establishes the initial level and never produces an edge.
#[derive(Debug, Clone)]
pub struct SampleEdges {
    mask: u8,
    level: Option<Level>,
    position: u64,
}

impl SampleEdges {
    /// Creates a new extractor for bit `channel` (0-7) of each sample.
    ///
    /// # Panics
    /// If `channel` is greater than 7.
    #[must_use]
    pub fn new(channel: u8) -> Self {
        assert!(channel < 8, "channel must be 0-7, got {channel}");
        SampleEdges {
            mask: 1 << channel,
            level: None,
            position: 0,
        }
    }

    /// Number of samples consumed so far, i.e., the index of the next sample.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate the edges contained in `chunk`, which directly follows any chunk
    /// previously given.
    pub fn edges<'a>(&'a mut self, chunk: &'a [u8]) -> impl Iterator<Item = Edge> + 'a {
        chunk.iter().filter_map(move |sample| {
            let sample_idx = self.position;
            self.position += 1;
            let level = Level::from(sample & self.mask != 0);
            match self.level.replace(level) {
                Some(prev) if prev != level => Some(Edge {
                    sample: sample_idx,
                    level,
                }),
                _ => None,
            }
        })
    }
}
