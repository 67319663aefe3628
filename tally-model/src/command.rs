//! Commands embedded in transactions
//!
//! A command pairs a structured instruction with the set of public keys whose
//! signatures it requires. Time visible to contracts comes exclusively from a
//! [`TimestampCommand`]; the platform supplies no other clock.

use crate::types::PubKey;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// Errors from command construction and parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("a command requires at least one signer")]
    NoSigners,

    #[error("timestamp command requires at least one bound")]
    EmptyWindow,

    #[error("timestamp window is inverted: after {after_ms} > before {before_ms}")]
    InvertedWindow { after_ms: u64, before_ms: u64 },

    #[error("invalid tenor {0:?}: expected <n>D, <n>M or <n>Y")]
    InvalidTenor(String),

    #[error("invalid decimal rate {0:?}")]
    InvalidRate(String),
}

/// A time window asserted by a transaction, witnessed by a timestamping
/// authority whose signature the command requires.
///
/// At least one bound is present; a missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCommand {
    after_ms: Option<u64>,
    before_ms: Option<u64>,
}

impl TimestampCommand {
    /// Build a window, validating that it is non-empty and not inverted.
    pub fn new(after_ms: Option<u64>, before_ms: Option<u64>) -> Result<Self, CommandError> {
        match (after_ms, before_ms) {
            (None, None) => Err(CommandError::EmptyWindow),
            (Some(a), Some(b)) if a > b => {
                Err(CommandError::InvertedWindow { after_ms: a, before_ms: b })
            }
            _ => Ok(Self { after_ms, before_ms }),
        }
    }

    /// A window of `±slack_ms` around `now_ms`.
    pub fn around(now_ms: u64, slack_ms: u64) -> Self {
        Self {
            after_ms: Some(now_ms.saturating_sub(slack_ms)),
            before_ms: Some(now_ms + slack_ms),
        }
    }

    pub fn after_ms(&self) -> Option<u64> {
        self.after_ms
    }

    pub fn before_ms(&self) -> Option<u64> {
        self.before_ms
    }

    /// Whether `t_ms` falls inside the window, treating missing bounds as
    /// −∞ / +∞.
    pub fn brackets(&self, t_ms: u64) -> bool {
        self.after_ms.map_or(true, |a| a <= t_ms) && self.before_ms.map_or(true, |b| t_ms <= b)
    }
}

/// A rate-fix period: `<n>D`, `<n>M` or `<n>Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tenor {
    Days(u32),
    Months(u32),
    Years(u32),
}

impl std::str::FromStr for Tenor {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CommandError::InvalidTenor(s.to_string());
        if s.len() < 2 {
            return Err(err());
        }
        let (num, unit) = s.split_at(s.len() - 1);
        let n: u32 = num.parse().map_err(|_| err())?;
        match unit {
            "D" => Ok(Tenor::Days(n)),
            "M" => Ok(Tenor::Months(n)),
            "Y" => Ok(Tenor::Years(n)),
            _ => Err(err()),
        }
    }
}

impl fmt::Display for Tenor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tenor::Days(n) => write!(f, "{}D", n),
            Tenor::Months(n) => write!(f, "{}M", n),
            Tenor::Years(n) => write!(f, "{}Y", n),
        }
    }
}

/// A decimal rate as a scaled integer: `mantissa / 10^scale`.
///
/// Floats are forbidden in contract-visible fields, so rates keep their
/// exact decimal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateDecimal {
    pub mantissa: i64,
    pub scale: u32,
}

impl RateDecimal {
    pub fn new(mantissa: i64, scale: u32) -> Self {
        Self { mantissa, scale }
    }
}

impl std::str::FromStr for RateDecimal {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CommandError::InvalidRate(s.to_string());
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if frac_part.contains('-') || frac_part.contains('+') {
            return Err(err());
        }
        let digits = format!("{}{}", int_part, frac_part);
        let mantissa: i64 = digits.parse().map_err(|_| err())?;
        Ok(Self { mantissa, scale: frac_part.len() as u32 })
    }
}

impl fmt::Display for RateDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let abs = self.mantissa.unsigned_abs();
        let pow = 10u64.pow(self.scale);
        write!(f, "{}{}.{:0width$}", sign, abs / pow, abs % pow, width = self.scale as usize)
    }
}

/// Identifies one rate observation: which index, over which tenor, on which day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FixId {
    pub index: String,
    pub tenor: Tenor,
    pub date: NaiveDate,
}

impl fmt::Display for FixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.index, self.date, self.tenor)
    }
}

/// An observed rate, as asserted inside a transaction and attested by an
/// oracle's signature on the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixCommand {
    pub id: FixId,
    pub rate: RateDecimal,
}

/// Command payload: a tagged sum with one variant per concrete command.
///
/// The canonical serializer preserves the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandData {
    Issue,
    Move,
    Timestamp(TimestampCommand),
    Fix(FixCommand),
}

/// A command plus the keys whose signatures it requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub data: CommandData,
    pub signers: Vec<PubKey>,
}

impl Command {
    /// Build a command; the signer set must be non-empty.
    pub fn new(data: CommandData, signers: Vec<PubKey>) -> Result<Self, CommandError> {
        if signers.is_empty() {
            return Err(CommandError::NoSigners);
        }
        Ok(Self { data, signers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_window_bounds() {
        assert_eq!(TimestampCommand::new(None, None), Err(CommandError::EmptyWindow));
        assert!(matches!(
            TimestampCommand::new(Some(10), Some(5)),
            Err(CommandError::InvertedWindow { .. })
        ));

        let after_only = TimestampCommand::new(Some(100), None).unwrap();
        assert!(after_only.brackets(100));
        assert!(after_only.brackets(u64::MAX));
        assert!(!after_only.brackets(99));

        let before_only = TimestampCommand::new(None, Some(100)).unwrap();
        assert!(before_only.brackets(0));
        assert!(!before_only.brackets(101));

        let window = TimestampCommand::new(Some(50), Some(100)).unwrap();
        assert!(window.brackets(50));
        assert!(window.brackets(100));
        assert!(!window.brackets(49));
        assert!(!window.brackets(101));
    }

    #[test]
    fn tenor_parse_and_display() {
        assert_eq!("1M".parse::<Tenor>().unwrap(), Tenor::Months(1));
        assert_eq!("90D".parse::<Tenor>().unwrap(), Tenor::Days(90));
        assert_eq!("10Y".parse::<Tenor>().unwrap(), Tenor::Years(10));
        assert_eq!(Tenor::Months(3).to_string(), "3M");
        assert!("M".parse::<Tenor>().is_err());
        assert!("3W".parse::<Tenor>().is_err());
        assert!("".parse::<Tenor>().is_err());
    }

    #[test]
    fn rate_parse_and_display() {
        let r: RateDecimal = "0.678".parse().unwrap();
        assert_eq!(r, RateDecimal::new(678, 3));
        assert_eq!(r.to_string(), "0.678");

        let neg: RateDecimal = "-1.25".parse().unwrap();
        assert_eq!(neg, RateDecimal::new(-125, 2));
        assert_eq!(neg.to_string(), "-1.25");

        let whole: RateDecimal = "2".parse().unwrap();
        assert_eq!(whole, RateDecimal::new(2, 0));
        assert_eq!(whole.to_string(), "2");

        assert!("0.6.8".parse::<RateDecimal>().is_err());
        assert!("abc".parse::<RateDecimal>().is_err());
        assert!("1.-5".parse::<RateDecimal>().is_err());
    }

    #[test]
    fn command_requires_signers() {
        assert_eq!(
            Command::new(CommandData::Move, vec![]),
            Err(CommandError::NoSigners)
        );
    }
}
