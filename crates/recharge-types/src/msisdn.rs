//! Subscriber phone numbers.
//!
//! An [`Msisdn`] is always stored in E.164 digits-only form (no leading
//! `+`), e.g. `2348031234562`. Draw eligibility is decided on its last
//! decimal digit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

/// Minimum E.164 length we accept (country code + subscriber number).
pub const MIN_DIGITS: usize = 8;

/// Maximum E.164 length.
pub const MAX_DIGITS: usize = 15;

/// A normalized E.164 MSISDN.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Msisdn(String);

impl Msisdn {
    /// Parse an already-international number.
    ///
    /// Accepts an optional leading `+` and ignores spaces and dashes.
    pub fn parse(raw: &str) -> Result<Self> {
        let digits = strip_separators(raw)?;
        Self::validate(raw, digits)
    }

    /// Normalize a number that may be written in national form.
    ///
    /// A national number (one leading `0`, no `+`) has the `0` replaced by
    /// `country_code`, so `08031234562` with `234` becomes `2348031234562`.
    /// A leading `00` is the international call prefix and is dropped
    /// without adding `country_code`.
    pub fn normalize(raw: &str, country_code: &str) -> Result<Self> {
        let digits = strip_separators(raw)?;
        if raw.trim_start().starts_with('+') {
            return Self::validate(raw, digits);
        }
        if let Some(rest) = digits.strip_prefix("00") {
            return Self::validate(raw, rest.to_string());
        }
        if let Some(national) = digits.strip_prefix('0') {
            return Self::validate(raw, format!("{country_code}{national}"));
        }
        Self::validate(raw, digits)
    }

    fn validate(raw: &str, digits: String) -> Result<Self> {
        if digits.len() < MIN_DIGITS {
            return Err(malformed(raw, "too short"));
        }
        if digits.len() > MAX_DIGITS {
            return Err(malformed(raw, "too long"));
        }
        if digits.starts_with('0') {
            return Err(malformed(raw, "country code cannot start with 0"));
        }
        Ok(Self(digits))
    }

    /// The E.164 digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing decimal digit, the value draws filter on.
    pub fn last_digit(&self) -> u8 {
        // Validation guarantees a non-empty all-ASCII-digit string.
        self.0.bytes().last().map(|b| b - b'0').unwrap_or(0)
    }
}

fn strip_separators(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut digits = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' => {}
            _ => return Err(malformed(raw, "unexpected character")),
        }
    }
    Ok(digits)
}

fn malformed(raw: &str, reason: &'static str) -> TypesError {
    TypesError::MalformedMsisdn {
        raw: raw.to_string(),
        reason,
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Msisdn {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Msisdn> for String {
    fn from(value: Msisdn) -> Self {
        value.0
    }
}
