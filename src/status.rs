//! Status words reported by the instrument.
//!
//! * `U1` returns `ERS` followed by 26 `'0'`/`'1'` error flags.
//! * `U9` returns `WRS` followed by 10 warning flags.
//! * `U3` returns `MST` followed by the full machine configuration.

use modular_bitfield::prelude::*;
use strum::{EnumMessage, IntoEnumIterator};
use strum_macros::{EnumCount as EnumCountMacro, EnumIter, EnumMessage as EnumMessageMacro};

use crate::command::OperateMode;
use crate::error::ParseError;
use crate::range::ModeId;
use crate::response::{Reader, Response};

/// Error conditions in the order they are transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCountMacro, EnumMessageMacro)]
#[repr(u8)]
pub enum ErrorCondition {
    #[strum(message = "Trigger overrun")]
    TriggerOverrun = 0,
    #[strum(message = "Illegal device dependent command")]
    IllegalCommand = 1,
    #[strum(message = "Illegal device dependent command option")]
    IllegalCommandOption = 2,
    #[strum(message = "Interlock present")]
    InterlockPresent = 3,
    #[strum(message = "Illegal measure range")]
    IllegalMeasureRange = 4,
    #[strum(message = "Illegal source range")]
    IllegalSourceRange = 5,
    #[strum(message = "Invalid sweep mix")]
    InvalidSweepMix = 6,
    #[strum(message = "Log cannot cross zero")]
    LogCannotCrossZero = 7,
    #[strum(message = "Autoranging source with pulse sweep")]
    AutorangingPulseSweep = 8,
    #[strum(message = "In calibration")]
    InCalibration = 9,
    #[strum(message = "In standby")]
    InStandby = 10,
    #[strum(message = "Unit is a 236")]
    UnitIs236 = 11,
    #[strum(message = "IOU DPRAM failed")]
    IouDpramFailed = 12,
    #[strum(message = "IOU EEROM failed")]
    IouEeromFailed = 13,
    #[strum(message = "IOU calibration checksum error")]
    IouCalChecksum = 14,
    #[strum(message = "DPRAM lockup")]
    DpramLockup = 15,
    #[strum(message = "DPRAM link error")]
    DpramLink = 16,
    #[strum(message = "Calibration ADC zero error")]
    CalAdcZero = 17,
    #[strum(message = "Calibration ADC gain error")]
    CalAdcGain = 18,
    #[strum(message = "Calibration source zero error")]
    CalSourceZero = 19,
    #[strum(message = "Calibration source gain error")]
    CalSourceGain = 20,
    #[strum(message = "Calibration common mode error")]
    CalCommonMode = 21,
    #[strum(message = "Calibration compliance error")]
    CalCompliance = 22,
    #[strum(message = "Calibration value error")]
    CalValue = 23,
    #[strum(message = "Calibration constants error")]
    CalConstants = 24,
    #[strum(message = "Calibration invalid error")]
    CalInvalid = 25,
}

/// Warning conditions in the order they are transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCountMacro, EnumMessageMacro)]
#[repr(u8)]
pub enum WarningCondition {
    #[strum(message = "Uncalibrated")]
    Uncalibrated = 0,
    #[strum(message = "Temporary calibration")]
    TemporaryCal = 1,
    #[strum(message = "Value out of range")]
    ValueOutOfRange = 2,
    #[strum(message = "Sweep buffer filled")]
    SweepBufferFilled = 3,
    #[strum(message = "No sweep points, must create")]
    NoSweepPoints = 4,
    #[strum(message = "Pulse times not met")]
    PulseTimesNotMet = 5,
    #[strum(message = "Not in remote")]
    NotInRemote = 6,
    #[strum(message = "Measure range changed")]
    MeasureRangeChanged = 7,
    #[strum(message = "Measurement overflow or sweep aborted")]
    MeasurementOverflow = 8,
    #[strum(message = "Pending trigger")]
    PendingTrigger = 9,
}

impl ErrorCondition {
    pub fn message(self) -> &'static str {
        self.get_message().unwrap_or("Unknown error")
    }
}

impl WarningCondition {
    pub fn message(self) -> &'static str {
        self.get_message().unwrap_or("Unknown warning")
    }

    /// Informational conditions that do not indicate a misconfigured output.
    pub fn is_advisory(self) -> bool {
        matches!(
            self,
            WarningCondition::TemporaryCal
                | WarningCondition::MeasureRangeChanged
                | WarningCondition::PendingTrigger
        )
    }
}

/// Error status word, one flag per [`ErrorCondition`].
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStatus {
    pub trigger_overrun: bool,
    pub illegal_command: bool,
    pub illegal_command_option: bool,
    pub interlock_present: bool,
    pub illegal_measure_range: bool,
    pub illegal_source_range: bool,
    pub invalid_sweep_mix: bool,
    pub log_cannot_cross_zero: bool,
    pub autoranging_pulse_sweep: bool,
    pub in_calibration: bool,
    pub in_standby: bool,
    pub unit_is_236: bool,
    pub iou_dpram_failed: bool,
    pub iou_eerom_failed: bool,
    pub iou_cal_checksum: bool,
    pub dpram_lockup: bool,
    pub dpram_link: bool,
    pub cal_adc_zero: bool,
    pub cal_adc_gain: bool,
    pub cal_source_zero: bool,
    pub cal_source_gain: bool,
    pub cal_common_mode: bool,
    pub cal_compliance: bool,
    pub cal_value: bool,
    pub cal_constants: bool,
    pub cal_invalid: bool,
    #[skip]
    __: B6,
}

/// Warning status word, one flag per [`WarningCondition`].
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningStatus {
    pub uncalibrated: bool,
    pub temporary_cal: bool,
    pub value_out_of_range: bool,
    pub sweep_buffer_filled: bool,
    pub no_sweep_points: bool,
    pub pulse_times_not_met: bool,
    pub not_in_remote: bool,
    pub measure_range_changed: bool,
    pub measurement_overflow: bool,
    pub pending_trigger: bool,
    #[skip]
    __: B6,
}

fn active<C: IntoEnumIterator + Copy>(mask: u32, bit: fn(C) -> u8) -> impl Iterator<Item = C> {
    C::iter().filter(move |&condition| mask & (1 << bit(condition)) != 0)
}

impl ErrorStatus {
    pub const BITS: usize = 26;

    pub fn from_mask(mask: u32) -> Self {
        Self::from_bytes(mask.to_le_bytes())
    }

    pub fn mask(&self) -> u32 {
        u32::from_le_bytes(self.into_bytes())
    }

    pub fn has_errors(&self) -> bool {
        self.mask() != 0
    }

    pub fn contains(&self, condition: ErrorCondition) -> bool {
        self.mask() & (1 << condition as u8) != 0
    }

    pub fn conditions(&self) -> impl Iterator<Item = ErrorCondition> {
        active(self.mask(), |c: ErrorCondition| c as u8)
    }

    /// All active conditions joined into one line.
    pub fn message(&self) -> String {
        self.conditions()
            .map(ErrorCondition::message)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Response for ErrorStatus {
    const PREFIXES: &'static [&'static str] = &["ERS"];

    fn parse_fields(_variant: usize, reader: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self::from_mask(reader.bits(Self::BITS)?))
    }
}

impl WarningStatus {
    pub const BITS: usize = 10;

    pub fn from_mask(mask: u16) -> Self {
        Self::from_bytes(mask.to_le_bytes())
    }

    pub fn mask(&self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }

    pub fn has_warnings(&self) -> bool {
        self.mask() != 0
    }

    pub fn contains(&self, condition: WarningCondition) -> bool {
        self.mask() & (1 << condition as u8) != 0
    }

    pub fn conditions(&self) -> impl Iterator<Item = WarningCondition> {
        active(u32::from(self.mask()), |c: WarningCondition| c as u8)
    }

    /// True when every active warning is informational.
    pub fn is_advisory_only(&self) -> bool {
        self.conditions().all(WarningCondition::is_advisory)
    }

    pub fn message(&self) -> String {
        self.conditions()
            .map(WarningCondition::message)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Response for WarningStatus {
    const PREFIXES: &'static [&'static str] = &["WRS"];

    fn parse_fields(_variant: usize, reader: &mut Reader<'_>) -> Result<Self, ParseError> {
        let mask = reader.bits(Self::BITS)?;
        // At most 10 bits were read.
        Ok(Self::from_mask(mask as u16))
    }
}

/// `G<items>,<format>,<lines>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub items: u8,
    pub format: u8,
    pub lines: u8,
}

/// `T<origin>,<in>,<out>,<end>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    pub origin: u8,
    pub input: u8,
    pub output: u8,
    pub end: u8,
}

/// Decoded machine status word.
///
/// The driver only relies on [`MachineStatus::operate`], the rest is kept for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineStatus {
    pub output_format: OutputFormat,
    pub self_test: u8,
    pub eoi_bus_hold: u8,
    pub srq_mask: u8,
    pub compliance_select: u8,
    pub operate: OperateMode,
    pub sense: u8,
    pub filter: ModeId,
    pub trigger_enabled: bool,
    pub integration_time: ModeId,
    pub trigger: TriggerConfig,
    pub high_voltage_range: bool,
    pub default_delay: bool,
    pub terminator: u8,
    pub suppression: bool,
}

fn field(reader: &mut Reader<'_>, tag: &'static str) -> Result<u8, ParseError> {
    reader.separator(tag)?;
    small(reader)
}

fn small(reader: &mut Reader<'_>) -> Result<u8, ParseError> {
    let received = reader.remaining().to_string();
    let value = reader.integer()?;
    u8::try_from(value).map_err(|_| ParseError::Number { received })
}

fn flag(reader: &mut Reader<'_>, tag: &'static str) -> Result<bool, ParseError> {
    let received = reader.remaining().to_string();
    match field(reader, tag)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ParseError::Number { received }),
    }
}

impl Response for MachineStatus {
    const PREFIXES: &'static [&'static str] = &["MST"];

    fn parse_fields(_variant: usize, reader: &mut Reader<'_>) -> Result<Self, ParseError> {
        let output_format = OutputFormat {
            items: field(reader, "G")?,
            format: field(reader, ",")?,
            lines: field(reader, ",")?,
        };
        let self_test = field(reader, "J")?;
        let eoi_bus_hold = field(reader, "K")?;
        let srq_mask = field(reader, "M")?;
        let compliance_select = field(reader, ",")?;
        let operate = OperateMode::from(flag(reader, "N")?);
        let sense = field(reader, "O")?;
        let filter = field(reader, "P")?;
        let trigger_enabled = flag(reader, "R")?;
        let integration_time = field(reader, "S")?;
        let trigger = TriggerConfig {
            origin: field(reader, "T")?,
            input: field(reader, ",")?,
            output: field(reader, ",")?,
            end: field(reader, ",")?,
        };
        let high_voltage_range = flag(reader, "V")?;
        let default_delay = flag(reader, "W")?;
        let terminator = field(reader, "Y")?;
        let suppression = flag(reader, "Z")?;

        Ok(MachineStatus {
            output_format,
            self_test,
            eoi_bus_hold,
            srq_mask,
            compliance_select,
            operate,
            sense,
            filter,
            trigger_enabled,
            integration_time,
            trigger,
            high_voltage_range,
            default_delay,
            terminator,
            suppression,
        })
    }
}
