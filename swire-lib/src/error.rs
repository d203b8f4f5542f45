#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid decoder config: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Protocol level faults found in a capture.
///
/// These never stop a decode. They are reported as error annotations and as the
/// [Outcome](crate::transaction::Outcome) of the transaction they occurred in, after
/// which the decoder resynchronizes on the next START.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum ProtocolError {
    /// LOW/HIGH ratio of a pulse matches neither the 0 nor the 1 waveform.
    #[error("Invalid bit encoding")]
    InvalidBitEncoding,
    /// Capture ended in the middle of a bit, byte or transaction.
    #[error("Premature end of stream")]
    PrematureEndOfStream,
    /// CMD=1 byte where only CMD=0 bytes are valid.
    #[error("Unexpected CMD byte: 0x{value:02X}")]
    UnexpectedControlByte { value: u8 },
    /// Closing CMD=1 byte was not 0xFF.
    #[error("Invalid END: 0x{value:02X}")]
    MalformedEndMarker { value: u8 },
    /// START arrived while the open transaction was still waiting for its END.
    #[error("Unexpected START")]
    UnexpectedStart,
    /// No trigger pulse before the next slave byte within the configured wait.
    #[error("Missing read trigger")]
    MissingTrigger,
    /// Line idled between two bits of the same byte.
    #[error("Frame gap")]
    FrameGap,
}

impl ProtocolError {
    /// Compact tag for narrow annotation rendering.
    #[must_use]
    pub fn short(&self) -> &'static str {
        match self {
            Self::InvalidBitEncoding => "TIME",
            Self::PrematureEndOfStream => "EOS",
            Self::UnexpectedControlByte { .. } => "BAD CMD",
            Self::MalformedEndMarker { .. } => "BAD END",
            Self::UnexpectedStart => "RESYNC",
            Self::MissingTrigger => "NO TRIG",
            Self::FrameGap => "GAP",
        }
    }
}
