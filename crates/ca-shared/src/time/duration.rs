//! A [`Duration`] that reads and prints as a compact human-readable string.
//!
//! The textual form is a sequence of `<integer><unit>` fragments with units
//! in descending order, for example `90d`, `96h` or `1h30m`. Supported units
//! are listed in [`Unit`]. This is the format used for every duration in the
//! CA configuration.

use std::{
    fmt,
    num::ParseIntError,
    ops::{Add, Deref, Sub},
    str::FromStr,
    time::SystemTime,
};

use snafu::{OptionExt, ResultExt, Snafu};
use strum::IntoEnumIterator;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ParseDurationError {
    #[snafu(display("duration must not be empty"))]
    Empty,

    #[snafu(display("unexpected character {chr:?} at position {position}"))]
    UnexpectedCharacter { chr: char, position: usize },

    #[snafu(display("value {value} is missing a unit"))]
    MissingUnit { value: String },

    #[snafu(display("unknown unit {unit:?}"))]
    UnknownUnit { unit: String },

    #[snafu(display("unit {unit} must not follow {after}"))]
    UnitOutOfOrder { unit: Unit, after: Unit },

    #[snafu(display("failed to parse value {value:?}"))]
    ParseValue {
        source: ParseIntError,
        value: String,
    },

    #[snafu(display("duration is too large"))]
    Overflow,
}

/// Units accepted in duration strings, largest first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumIter, strum::EnumString,
)]
pub enum Unit {
    #[strum(serialize = "d")]
    Days,

    #[strum(serialize = "h")]
    Hours,

    #[strum(serialize = "m")]
    Minutes,

    #[strum(serialize = "s")]
    Seconds,

    #[strum(serialize = "ms")]
    Milliseconds,
}

impl Unit {
    const fn millis(self) -> u64 {
        match self {
            Self::Days => 86_400_000,
            Self::Hours => 3_600_000,
            Self::Minutes => 60_000,
            Self::Seconds => 1_000,
            Self::Milliseconds => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const ZERO: Self = Self(std::time::Duration::ZERO);

    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(std::time::Duration::from_millis(millis))
    }

    /// Panics on overflow, so only use this for constants.
    pub const fn from_minutes_unchecked(minutes: u64) -> Self {
        Self::from_millis(minutes * Unit::Minutes.millis())
    }

    /// Panics on overflow, so only use this for constants.
    pub const fn from_hours_unchecked(hours: u64) -> Self {
        Self::from_millis(hours * Unit::Hours.millis())
    }

    /// Panics on overflow, so only use this for constants.
    pub const fn from_days_unchecked(days: u64) -> Self {
        Self::from_millis(days * Unit::Days.millis())
    }
}

impl FromStr for Duration {
    type Err = ParseDurationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return EmptySnafu.fail();
        }

        let mut rest = input;
        let mut total: u64 = 0;
        let mut previous: Option<Unit> = None;

        while !rest.is_empty() {
            let position = input.len() - rest.len();

            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if digits_end == 0 {
                let chr = rest.chars().next().unwrap_or_default();
                return UnexpectedCharacterSnafu { chr, position }.fail();
            }
            let (value, after_value) = rest.split_at(digits_end);

            let unit_end = after_value
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(after_value.len());
            let (unit, after_unit) = after_value.split_at(unit_end);
            if unit.is_empty() {
                return MissingUnitSnafu { value }.fail();
            }

            let unit = unit
                .parse::<Unit>()
                .ok()
                .context(UnknownUnitSnafu { unit })?;
            if let Some(after) = previous {
                // Units are declared largest first.
                if unit as u8 <= after as u8 {
                    return UnitOutOfOrderSnafu { unit, after }.fail();
                }
            }

            let value = value.parse::<u64>().context(ParseValueSnafu { value })?;
            total = value
                .checked_mul(unit.millis())
                .and_then(|millis| total.checked_add(millis))
                .context(OverflowSnafu)?;

            previous = Some(unit);
            rest = after_unit;
        }

        Ok(Self::from_millis(total))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remaining = self.0.as_millis();
        if remaining == 0 {
            return write!(f, "0{}", Unit::Seconds);
        }

        for unit in Unit::iter() {
            let size = u128::from(unit.millis());
            if remaining >= size {
                write!(f, "{}{unit}", remaining / size)?;
                remaining %= size;
            }
        }

        Ok(())
    }
}

impl Deref for Duration {
    type Target = std::time::Duration;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for SystemTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        self + rhs.0
    }
}

impl Sub<Duration> for SystemTime {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        self - rhs.0
    }
}
