//! Reading and probe types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// One of the two sensors of the key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    /// Sensor inside the key body
    Inner,
    /// Sensor on the external cable
    Outer,
}

impl Probe {
    /// Both probes, inner first
    pub const ALL: [Probe; 2] = [Probe::Inner, Probe::Outer];

    /// Parse the single-letter form used by the device test tools ('i' / 'o')
    pub fn from_letter(letter: char) -> Result<Self, ProtocolError> {
        match letter {
            'i' => Ok(Probe::Inner),
            'o' => Ok(Probe::Outer),
            other => Err(ProtocolError::UnknownProbe(other.to_string())),
        }
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            Probe::Inner => "Inner",
            Probe::Outer => "Outer",
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Probe {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "i" | "in" | "inner" => Ok(Probe::Inner),
            "o" | "out" | "outer" => Ok(Probe::Outer),
            _ => Err(ProtocolError::UnknownProbe(s.to_string())),
        }
    }
}

/// A pair of temperatures in milli-degrees Celsius
///
/// `Reading::UNAVAILABLE` (both values `-1`) means the session has never
/// completed a measurement, or the last reply could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reading {
    pub inner_milli_c: i32,
    pub outer_milli_c: i32,
}

impl Reading {
    /// Failure sentinel
    pub const UNAVAILABLE: Reading = Reading {
        inner_milli_c: -1,
        outer_milli_c: -1,
    };

    pub const fn new(inner_milli_c: i32, outer_milli_c: i32) -> Self {
        Self {
            inner_milli_c,
            outer_milli_c,
        }
    }

    /// Value of a single probe
    pub fn get(&self, probe: Probe) -> i32 {
        match probe {
            Probe::Inner => self.inner_milli_c,
            Probe::Outer => self.outer_milli_c,
        }
    }

    /// `(inner, outer)` pair
    pub fn as_pair(&self) -> (i32, i32) {
        (self.inner_milli_c, self.outer_milli_c)
    }

    pub fn is_unavailable(&self) -> bool {
        *self == Self::UNAVAILABLE
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

impl From<Reading> for (i32, i32) {
    fn from(reading: Reading) -> Self {
        reading.as_pair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sentinel() {
        let reading = Reading::default();
        assert!(reading.is_unavailable());
        assert_eq!(reading.as_pair(), (-1, -1));
    }

    #[test]
    fn test_get_probe() {
        let reading = Reading::new(21_000, 18_500);
        assert_eq!(reading.get(Probe::Inner), 21_000);
        assert_eq!(reading.get(Probe::Outer), 18_500);
        assert!(!reading.is_unavailable());
    }

    #[test]
    fn test_probe_parsing() {
        assert_eq!("i".parse::<Probe>().unwrap(), Probe::Inner);
        assert_eq!("Outer".parse::<Probe>().unwrap(), Probe::Outer);
        assert_eq!(Probe::from_letter('o').unwrap(), Probe::Outer);
        assert!(Probe::from_letter('x').is_err());
        assert!("middle".parse::<Probe>().is_err());
    }
}
