//! Human-readable size formatting and parsing utilities

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const KIB: u64 = 1024;
const UNITS: &[(&str, u64)] = &[
    ("TB", KIB * KIB * KIB * KIB),
    ("GB", KIB * KIB * KIB),
    ("MB", KIB * KIB),
    ("KB", KIB),
];

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Invalid size format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

/// Byte count that parses from `"1.5MB"`, `"512k"`, or a plain integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// One decimal place at most, trailing `.0` dropped
    pub fn to_human_readable(&self) -> String {
        for &(unit, divisor) in UNITS {
            if self.0 >= divisor {
                let tenths = self.0 * 10 / divisor;
                return if tenths % 10 == 0 {
                    format!("{}{}", tenths / 10, unit)
                } else {
                    format!("{}.{}{}", tenths / 10, tenths % 10, unit)
                };
            }
        }
        format!("{}B", self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g., \"5MB\", \"1.5GB\") or integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size cannot be negative: {v}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// `deserialize_with` helper for plain `u64` byte fields
pub fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    ByteSize::deserialize(deserializer).map(|size| size.0)
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        if s.is_empty() {
            return Err(ParseError::InvalidFormat(s));
        }

        if let Ok(num) = s.parse::<u64>() {
            return Ok(ByteSize(num));
        }

        let pos = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| ParseError::InvalidFormat(s.clone()))?;
        let (num_str, unit) = s.split_at(pos);
        if num_str.is_empty() {
            return Err(ParseError::InvalidFormat(s.clone()));
        }

        let multiplier = match unit.trim() {
            "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => KIB * KIB,
            "G" | "GB" | "GIB" => KIB * KIB * KIB,
            "T" | "TB" | "TIB" => KIB * KIB * KIB * KIB,
            other => return Err(ParseError::InvalidUnit(other.to_string())),
        };

        if let Ok(whole) = num_str.parse::<u64>() {
            return whole
                .checked_mul(multiplier)
                .map(ByteSize)
                .ok_or_else(|| ParseError::InvalidNumber(num_str.to_string()));
        }

        let value: f64 = num_str
            .parse()
            .map_err(|_| ParseError::InvalidNumber(num_str.to_string()))?;
        let bytes = (value * multiplier as f64).round();
        if !bytes.is_finite() || bytes > u64::MAX as f64 {
            return Err(ParseError::InvalidNumber(num_str.to_string()));
        }
        Ok(ByteSize(bytes as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}
