//! Typed physical quantities used throughout the crate.
//!
//! Everything is stored in SI base units as `f64`. The newtypes exist so a
//! compliance current can never be passed where a bias voltage is expected.

use core::fmt;
use core::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Integration and settling times at microsecond resolution.
pub type Micros = fugit::MicrosDurationU32;

/// Delays and poll intervals at millisecond resolution.
pub type Millis = fugit::MillisDurationU32;

/// A quantity with a magnitude expressible in SI base units.
pub trait Quantity: Copy {
    /// Unit symbol used in diagnostics.
    const SYMBOL: &'static str;

    /// Magnitude in SI base units.
    fn to_base(self) -> f64;

    /// Build the quantity back from a magnitude in SI base units.
    fn from_base(value: f64) -> Self;
}

macro_rules! si_quantity {
    ($(#[$meta:meta])* $name:ident, $symbol:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub f64);

        impl $name {
            pub const ZERO: Self = Self(0.0);

            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            pub fn from_milli(value: f64) -> Self {
                Self(value / 1e3)
            }

            pub fn from_micro(value: f64) -> Self {
                Self(value / 1e6)
            }

            pub fn from_nano(value: f64) -> Self {
                Self(value / 1e9)
            }

            pub const fn value(self) -> f64 {
                self.0
            }

            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            pub fn signum(self) -> f64 {
                self.0.signum()
            }

            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }

            /// Bitwise equality, `-0.0` and `0.0` are different values here.
            pub fn bit_eq(self, other: Self) -> bool {
                self.0.to_bits() == other.0.to_bits()
            }
        }

        impl Quantity for $name {
            const SYMBOL: &'static str = $symbol;

            fn to_base(self) -> f64 {
                self.0
            }

            fn from_base(value: f64) -> Self {
                Self(value)
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = Self;

            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = Self;

            fn mul(self, rhs: f64) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", self.0, $symbol)
            }
        }
    };
}

si_quantity!(
    /// Electric potential in volts.
    Volts,
    "V"
);

si_quantity!(
    /// Electric current in amperes.
    Amperes,
    "A"
);

/// Number of readings averaged by the instrument filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Readings(pub u32);

impl Quantity for Readings {
    const SYMBOL: &'static str = "readings";

    fn to_base(self) -> f64 {
        self.0 as f64
    }

    fn from_base(value: f64) -> Self {
        Self(value.round() as u32)
    }
}

impl fmt::Display for Readings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} readings", self.0)
    }
}

impl Quantity for Micros {
    const SYMBOL: &'static str = "s";

    fn to_base(self) -> f64 {
        self.ticks() as f64 / 1e6
    }

    fn from_base(value: f64) -> Self {
        Micros::from_ticks((value * 1e6).round() as u32)
    }
}

/// Convert a millisecond duration into a std duration for sleeping and waiting.
pub fn to_std(duration: Millis) -> std::time::Duration {
    std::time::Duration::from_millis(duration.to_millis() as u64)
}
