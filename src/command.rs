//! Device-dependent command strings.
//!
//! A command is a one letter name followed by up to three comma separated
//! parameters, e.g. `B1.200000e+01,4,0`. Encoding never touches the transport.

use core::fmt::{self, Write};

use crate::range::ModeId;
use crate::units::{Amperes, Millis, Quantity, Volts};

/// Token that makes the instrument execute everything received since the last one.
pub const EXECUTE: &str = "X";

/// Most parameters any command of the protocol takes.
pub const MAX_PARAMS: usize = 3;

/// A single rendered parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    /// Magnitude in SI base units, rendered in scientific notation.
    Quantity(f64),
    /// Enumerated setting, rendered as its integer code.
    Enum(u8),
    /// Plain decimal integer.
    Int(i64),
}

impl Param {
    pub fn quantity(value: impl Quantity) -> Self {
        Param::Quantity(value.to_base())
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Param::Quantity(value) => write_scientific(f, value),
            Param::Enum(code) => write!(f, "{code}"),
            Param::Int(value) => write!(f, "{value}"),
        }
    }
}

/// Write `value` as `d.dddddde+XX`, the exponent always signed and at least two digits.
fn write_scientific(f: &mut impl Write, value: f64) -> fmt::Result {
    let rendered = format!("{value:.6e}");
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().map_err(|_| fmt::Error)?;
            let sign = if exponent < 0 { '-' } else { '+' };
            write!(f, "{mantissa}e{sign}{:02}", exponent.unsigned_abs())
        }
        // inf and NaN have no exponent
        None => f.write_str(&rendered),
    }
}

/// Source and function selection for the `F` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceMode {
    Voltage = 0,
    Current = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceFunction {
    Dc = 0,
    Sweep = 1,
}

/// Operate (`N1`) puts the bias on the output terminals, standby (`N0`) removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperateMode {
    Standby = 0,
    Operate = 1,
}

impl From<bool> for OperateMode {
    fn from(value: bool) -> Self {
        match value {
            true => OperateMode::Operate,
            false => OperateMode::Standby,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Trigger {
    Immediate = 0,
}

/// Which status word a `U` query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusQuery {
    ErrorStatus = 1,
    MachineStatus = 3,
    ComplianceValue = 5,
    WarningStatus = 9,
}

/// Items included in each reading for the `G` command (bit flags).
pub mod output_items {
    pub const SOURCE: u8 = 1;
    pub const MEASURE: u8 = 4;
}

/// A command name plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: &'static str,
    params: heapless::Vec<Param, MAX_PARAMS>,
}

impl Command {
    /// Build a command from raw parts.
    ///
    /// Panics if more than [`MAX_PARAMS`] parameters are given; every
    /// constructor below uses a fixed arity within that bound.
    pub fn new(name: &'static str, params: &[Param]) -> Self {
        let params = heapless::Vec::from_slice(params)
            .unwrap_or_else(|_| panic!("command {name} takes at most {MAX_PARAMS} parameters"));
        Self { name, params }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Render the command text, without the execute token.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// `F<source>,<function>`
    pub fn source_function(source: SourceMode, function: SourceFunction) -> Self {
        Self::new(
            "F",
            &[Param::Enum(source as u8), Param::Enum(function as u8)],
        )
    }

    /// `L<compliance>,<range>`
    pub fn compliance(level: Amperes, range: ModeId) -> Self {
        Self::new("L", &[Param::quantity(level), Param::Enum(range)])
    }

    /// `B<level>,<range>,<delay ms>`
    pub fn bias(level: Volts, range: ModeId, delay: Millis) -> Self {
        Self::new(
            "B",
            &[
                Param::quantity(level),
                Param::Enum(range),
                Param::Int(delay.to_millis() as i64),
            ],
        )
    }

    /// `N<mode>`
    pub fn operate(mode: OperateMode) -> Self {
        Self::new("N", &[Param::Enum(mode as u8)])
    }

    /// `H<trigger>`
    pub fn trigger(trigger: Trigger) -> Self {
        Self::new("H", &[Param::Enum(trigger as u8)])
    }

    /// `U<status>`
    pub fn status(query: StatusQuery) -> Self {
        Self::new("U", &[Param::Enum(query as u8)])
    }

    /// `G<items>,<format>,<lines>`
    pub fn output_format(items: u8, format: u8, lines: u8) -> Self {
        Self::new(
            "G",
            &[Param::Int(items as i64), Param::Enum(format), Param::Enum(lines)],
        )
    }

    /// `P<filter mode>`
    pub fn filter(mode: ModeId) -> Self {
        Self::new("P", &[Param::Enum(mode)])
    }

    /// `S<integration time mode>`
    pub fn integration_time(mode: ModeId) -> Self {
        Self::new("S", &[Param::Enum(mode)])
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_char(',')?;
            }
            write!(f, "{param}")?;
        }
        Ok(())
    }
}
