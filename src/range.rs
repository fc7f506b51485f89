//! Bidirectional lookup between physical magnitudes and instrument mode ids.
//!
//! Each table stores its magnitudes as integers in a fixed decimal unit
//! (`10^exponent` of the base unit), so lookups compare integers only.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::LazyLock;

use crate::error::RangeLookupError;
use crate::units::{Amperes, Micros, Quantity, Readings, Volts};

/// Integer code the instrument uses to select a range or mode.
pub type ModeId = u8;

/// Relative slack for binary floating point noise when scaling to the table unit.
const REPRESENTATION_SLACK: f64 = 1e-9;

pub struct RangeTable<Q: Quantity> {
    name: &'static str,
    exponent: i32,
    /// Entries in ascending magnitude order.
    entries: Vec<(ModeId, i64)>,
    by_mode: HashMap<ModeId, i64>,
    by_value: HashMap<i64, ModeId>,
    autorange: Option<ModeId>,
    _quantity: PhantomData<Q>,
}

impl<Q: Quantity> RangeTable<Q> {
    /// Build a table whose stored integers are in units of `10^exponent` base units.
    ///
    /// Tables are process-wide constants; an empty table is a programming error.
    pub fn new(
        name: &'static str,
        exponent: i32,
        entries: &[(ModeId, i64)],
        autorange: Option<ModeId>,
    ) -> Self {
        assert!(!entries.is_empty(), "range table {name} has no entries");

        let mut sorted = entries.to_vec();
        sorted.sort_by_key(|&(_, value)| value);

        let by_mode = sorted.iter().copied().collect();
        let by_value = sorted.iter().map(|&(mode, value)| (value, mode)).collect();

        Self {
            name,
            exponent,
            entries: sorted,
            by_mode,
            by_value,
            autorange,
            _quantity: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up the mode whose magnitude equals `magnitude` exactly.
    pub fn find_mode(&self, magnitude: Q) -> Result<ModeId, RangeLookupError> {
        self.to_scaled(magnitude)
            .and_then(|scaled| self.by_value.get(&scaled).copied())
            .ok_or_else(|| self.lookup_error(format!("{} {}", magnitude.to_base(), Q::SYMBOL)))
    }

    /// Magnitude selected by `mode`.
    pub fn value(&self, mode: ModeId) -> Result<Q, RangeLookupError> {
        self.by_mode
            .get(&mode)
            .map(|&scaled| self.from_scaled(scaled))
            .ok_or_else(|| self.lookup_error(format!("mode {mode}")))
    }

    pub fn first_mode(&self) -> ModeId {
        self.entries[0].0
    }

    pub fn last_mode(&self) -> ModeId {
        self.entries[self.entries.len() - 1].0
    }

    pub fn first_value(&self) -> Q {
        self.from_scaled(self.entries[0].1)
    }

    pub fn last_value(&self) -> Q {
        self.from_scaled(self.entries[self.entries.len() - 1].1)
    }

    /// Mode id that lets the instrument pick the range itself, if it has one.
    pub fn autorange_mode(&self) -> Option<ModeId> {
        self.autorange
    }

    /// Iterate the table in ascending magnitude order.
    pub fn iter(&self) -> impl Iterator<Item = (ModeId, Q)> + '_ {
        self.entries
            .iter()
            .map(|&(mode, scaled)| (mode, self.from_scaled(scaled)))
    }

    fn to_scaled(&self, magnitude: Q) -> Option<i64> {
        let base = magnitude.to_base();
        let scaled = if self.exponent < 0 {
            base * 10f64.powi(-self.exponent)
        } else {
            base / 10f64.powi(self.exponent)
        };
        let rounded = scaled.round();
        if !rounded.is_finite() {
            return None;
        }
        if (scaled - rounded).abs() > REPRESENTATION_SLACK * rounded.abs().max(1.0) {
            return None;
        }
        Some(rounded as i64)
    }

    fn from_scaled(&self, scaled: i64) -> Q {
        // Dividing by an exact power of ten keeps e.g. 1 nA bit-identical to `1e-9`.
        let base = if self.exponent < 0 {
            scaled as f64 / 10f64.powi(-self.exponent)
        } else {
            scaled as f64 * 10f64.powi(self.exponent)
        };
        Q::from_base(base)
    }

    fn lookup_error(&self, requested: String) -> RangeLookupError {
        RangeLookupError {
            table: self.name,
            requested,
            table_dump: self.to_string(),
        }
    }
}

impl<Q: Quantity> fmt::Display for RangeTable<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        if let Some(auto) = self.autorange {
            writeln!(f, "  {auto:>3} => autorange")?;
        }
        for (mode, value) in self.iter() {
            writeln!(f, "  {mode:>3} => {} {}", value.to_base(), Q::SYMBOL)?;
        }
        Ok(())
    }
}

/// Current measurement/compliance ranges, 1 nA to 100 mA.
pub static CURRENT_RANGES: LazyLock<RangeTable<Amperes>> = LazyLock::new(|| {
    RangeTable::new(
        "current range",
        -9,
        &[
            (1, 1),
            (2, 10),
            (3, 100),
            (4, 1_000),
            (5, 10_000),
            (6, 100_000),
            (7, 1_000_000),
            (8, 10_000_000),
            (9, 100_000_000),
        ],
        Some(0),
    )
});

/// Voltage source ranges, 1.1 V to 1100 V.
pub static VOLTAGE_RANGES: LazyLock<RangeTable<Volts>> = LazyLock::new(|| {
    RangeTable::new(
        "voltage range",
        -1,
        &[(1, 11), (2, 110), (3, 1_100), (4, 11_000)],
        Some(0),
    )
});

/// Reading filter: number of readings averaged per measurement.
pub static FILTER_MODES: LazyLock<RangeTable<Readings>> = LazyLock::new(|| {
    RangeTable::new(
        "filter",
        0,
        &[(0, 1), (1, 2), (2, 4), (3, 8), (4, 16), (5, 32)],
        None,
    )
});

/// A/D integration time.
pub static INTEGRATION_TIMES: LazyLock<RangeTable<Micros>> = LazyLock::new(|| {
    RangeTable::new(
        "integration time",
        -6,
        &[(0, 416), (1, 4_000), (2, 16_667), (3, 20_000)],
        None,
    )
});
