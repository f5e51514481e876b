use std::fmt::Display;

use chrono::{Months, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

/// A PostgreSQL-style interval: months, days and microseconds are kept
/// apart because their lengths vary with the calendar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, micros: i64) -> Self {
        Self {
            months,
            days,
            micros,
        }
    }

    /// Length normalized with 30-day months, used only for ordering.
    pub fn total_micros(&self) -> i128 {
        (self.months as i128 * 30 + self.days as i128) * MICROS_PER_DAY as i128
            + self.micros as i128
    }

    /// Parses `'1 year 2 mons 3 days 04:05:06'`, `'90 minutes'`, `'-2 days'`
    /// and similar forms. Amounts that overflow a field are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::Validation(format!("invalid input syntax for type interval: \"{}\"", input));
        let out_of_range = || Error::Validation(format!("interval field value out of range: \"{}\"", input));
        let mut interval = Interval::default();
        let mut parts = input.split_whitespace().peekable();
        if parts.peek().is_none() {
            return Err(invalid());
        }
        while let Some(part) = parts.next() {
            let delta = if part.contains(':') {
                let micros = Self::parse_clock(part).ok_or_else(invalid)?;
                Interval::new(0, 0, micros.ok_or_else(out_of_range)?)
            } else {
                let amount: f64 = part.parse().map_err(|_| invalid())?;
                if !amount.is_finite() {
                    return Err(invalid());
                }
                let unit = parts.next().ok_or_else(invalid)?.to_lowercase();
                let unit = unit.trim_end_matches(',');
                let (months, days, micros) = match unit {
                    "year" | "years" | "yr" | "yrs" | "y" => (amount * 12.0, 0.0, 0.0),
                    "month" | "months" | "mon" | "mons" => (amount, 0.0, 0.0),
                    "week" | "weeks" | "w" => (0.0, amount * 7.0, 0.0),
                    "day" | "days" | "d" => (0.0, amount, 0.0),
                    "hour" | "hours" | "hr" | "hrs" | "h" => (0.0, 0.0, amount * MICROS_PER_HOUR as f64),
                    "minute" | "minutes" | "min" | "mins" | "m" => {
                        (0.0, 0.0, amount * MICROS_PER_MINUTE as f64)
                    }
                    "second" | "seconds" | "sec" | "secs" | "s" => {
                        (0.0, 0.0, amount * MICROS_PER_SECOND as f64)
                    }
                    "millisecond" | "milliseconds" | "ms" => (0.0, 0.0, amount * 1000.0),
                    "microsecond" | "microseconds" | "us" => (0.0, 0.0, amount),
                    _ => return Err(invalid()),
                };
                Interval::new(
                    whole_i32(months).ok_or_else(out_of_range)?,
                    whole_i32(days).ok_or_else(out_of_range)?,
                    whole_i64(micros).ok_or_else(out_of_range)?,
                )
            };
            interval = interval.checked_add(&delta).ok_or_else(out_of_range)?;
        }
        Ok(interval)
    }

    /// `[-]hh:mm[:ss[.ffffff]]` to microseconds. The outer None is malformed
    /// input, the inner one a value too large for the field.
    fn parse_clock(part: &str) -> Option<Option<i64>> {
        let (negative, body) = match part.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, part),
        };
        let mut fields = body.split(':');
        let hours: i64 = fields.next()?.parse().ok()?;
        let minutes: i64 = fields.next()?.parse().ok()?;
        let seconds: f64 = match fields.next() {
            Some(s) => s.parse().ok()?,
            None => 0.0,
        };
        if fields.next().is_some() {
            return None;
        }
        let micros = || -> Option<i64> {
            let micros = hours
                .checked_mul(MICROS_PER_HOUR)?
                .checked_add(minutes.checked_mul(MICROS_PER_MINUTE)?)?
                .checked_add(whole_i64((seconds * MICROS_PER_SECOND as f64).round())?)?;
            if negative { micros.checked_neg() } else { Some(micros) }
        };
        Some(micros())
    }

    pub fn checked_add(&self, other: &Interval) -> Option<Interval> {
        Some(Interval {
            months: self.months.checked_add(other.months)?,
            days: self.days.checked_add(other.days)?,
            micros: self.micros.checked_add(other.micros)?,
        })
    }

    pub fn checked_neg(&self) -> Option<Interval> {
        Some(Interval {
            months: self.months.checked_neg()?,
            days: self.days.checked_neg()?,
            micros: self.micros.checked_neg()?,
        })
    }

    pub fn checked_mul(&self, factor: i64) -> Option<Interval> {
        let factor32 = i32::try_from(factor).ok()?;
        Some(Interval {
            months: self.months.checked_mul(factor32)?,
            days: self.days.checked_mul(factor32)?,
            micros: self.micros.checked_mul(factor)?,
        })
    }

    /// Shifts a timestamp by this interval: months first, then days, then
    /// the clock part.
    pub fn add_to(&self, ts: NaiveDateTime) -> Result<NaiveDateTime> {
        let overflow = || Error::Execution("timestamp out of range".into());
        let shifted = if self.months >= 0 {
            ts.checked_add_months(Months::new(self.months as u32))
        } else {
            ts.checked_sub_months(Months::new(self.months.unsigned_abs()))
        }
        .ok_or_else(overflow)?;
        let shifted = shifted
            .checked_add_signed(TimeDelta::try_days(self.days as i64).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
        shifted
            .checked_add_signed(TimeDelta::microseconds(self.micros))
            .ok_or_else(overflow)
    }

    /// The interval between two timestamps, expressed in days and clock time
    pub fn between(later: NaiveDateTime, earlier: NaiveDateTime) -> Result<Interval> {
        let micros = later
            .signed_duration_since(earlier)
            .num_microseconds()
            .ok_or_else(|| Error::Execution("interval out of range".into()))?;
        Ok(Interval {
            months: 0,
            days: (micros / MICROS_PER_DAY) as i32,
            micros: micros % MICROS_PER_DAY,
        })
    }
}

/// Truncates a finite float to an i32, None when it does not fit
fn whole_i32(v: f64) -> Option<i32> {
    let v = v.trunc();
    (v.is_finite() && v >= i32::MIN as f64 && v <= i32::MAX as f64).then_some(v as i32)
}

/// Truncates a finite float to an i64, None when it does not fit
fn whole_i64(v: f64) -> Option<i64> {
    let v = v.trunc();
    // i64::MAX as f64 rounds up to 2^63, which does not fit
    (v.is_finite() && v >= i64::MIN as f64 && v < i64::MAX as f64).then_some(v as i64)
}

impl Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plural = |n: i64, unit: &str| {
            if n.abs() == 1 {
                format!("{} {}", n, unit)
            } else {
                format!("{} {}s", n, unit)
            }
        };
        let mut parts = Vec::new();
        let (years, months) = (self.months / 12, self.months % 12);
        if years != 0 {
            parts.push(plural(years as i64, "year"));
        }
        if months != 0 {
            parts.push(plural(months as i64, "mon"));
        }
        if self.days != 0 {
            parts.push(plural(self.days as i64, "day"));
        }
        if self.micros != 0 || parts.is_empty() {
            let sign = if self.micros < 0 { "-" } else { "" };
            let total = self.micros.unsigned_abs();
            let hours = total / MICROS_PER_HOUR as u64;
            let minutes = (total % MICROS_PER_HOUR as u64) / MICROS_PER_MINUTE as u64;
            let seconds = (total % MICROS_PER_MINUTE as u64) / MICROS_PER_SECOND as u64;
            let fraction = total % MICROS_PER_SECOND as u64;
            let mut clock = format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds);
            if fraction != 0 {
                clock.push_str(&format!(".{:06}", fraction).trim_end_matches('0').to_string());
            }
            parts.push(clock);
        }
        f.write_str(&parts.join(" "))
    }
}
