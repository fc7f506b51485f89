//! Error types for talking to the bias supply.

use thiserror::Error;

use crate::response::Measurement;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Everything that can go wrong between a caller and the instrument.
///
/// `I` is the error type of the underlying byte stream.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Transport error while sending {command:?}: {inner:?}")]
    Transport { command: String, inner: I },
    #[error("Transport reached end of stream while waiting for the reply to {command:?}")]
    Eof { command: String },
    #[error("Reply does not fit in the receive buffer")]
    BufferOverflow,
    #[error("Protocol mismatch: {0}")]
    Protocol(#[from] ParseError),
    #[error("Instrument reported an error after {command:?}: {message}")]
    Device { message: String, command: String },
    #[error("Instrument reported a warning after {command:?}: {message}")]
    DeviceWarning { message: String, command: String },
    #[error("Requested {quantity} {requested} exceeds the limit of {limit}")]
    OutOfRange {
        quantity: &'static str,
        requested: String,
        limit: String,
    },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    RangeLookup(#[from] RangeLookupError),
    #[error("Compliance tripped while ramping: {0:?}")]
    ComplianceTripped(Measurement),
    #[error("Could not start the monitoring thread: {0}")]
    Spawn(std::io::Error),
}

/// A reply that does not follow the instrument's grammar.
///
/// The reply stream position is indeterminate after any of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("received {received:?}, expected one of {accepted:?}")]
    Prefix {
        received: String,
        accepted: &'static [&'static str],
    },
    #[error("expected separator {expected:?} at {received:?}")]
    Separator {
        expected: &'static str,
        received: String,
    },
    #[error("malformed number at {received:?}")]
    Number { received: String },
    #[error("bit mask needs {expected} digits, got {received:?}")]
    BitMask { expected: usize, received: String },
    #[error("trailing characters {received:?}")]
    Trailing { received: String },
}

/// No entry of a [`RangeTable`](crate::range::RangeTable) matches the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No {table} entry for {requested}\n{table_dump}")]
pub struct RangeLookupError {
    pub table: &'static str,
    pub requested: String,
    pub table_dump: String,
}

/// Failure to load settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed settings: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    RangeLookup(#[from] RangeLookupError),
}
