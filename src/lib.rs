//! This crate provides an interface for driving a Keithley 237 source-measure unit as a voltage bias supply.
//!
//! It talks the instrument's device-dependent command language over any byte
//! stream implementing [embedded_io::Read] & [embedded_io::Write], and is
//! built in layers:
//!
//! * [smu::Keithley237] runs single transactions. Every state changing command
//!   is followed by an error and a warning status query, and fails unless both
//!   come back clean.
//! * [source::ThreadSafeSource] serialises access from several threads, skips
//!   redundant sets and ramps the output in steps.
//! * [controller::BiasController] ramps to a configured operating point and
//!   watches for compliance from a background thread.
//!
//! Supported magnitudes (ranges, filter, integration times) live in the
//! [range] tables; anything else is rejected before it reaches the wire.
//!
//! With the `serial` feature, [transport::SerialTransport] connects over a
//! serial port or a USB-GPIB adapter presenting itself as one.

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod range;
pub mod response;
pub mod smu;
pub mod source;
pub mod status;
pub mod transport;
pub mod units;

#[cfg(test)]
mod mock_serial;

pub use config::{BiasSettings, Configuration, ConfigurationBuilder, Settings};
pub use controller::{BiasController, ControllerState};
pub use error::{Error, Result};
pub use response::Measurement;
pub use smu::Keithley237;
pub use source::{RampOutcome, SourceGuard, ThreadSafeSource, Value};
pub use transport::Transport;
pub use units::{Amperes, Millis, Volts};
