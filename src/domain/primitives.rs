//! Domain primitives: TimeMs, Addr, Side.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current time in milliseconds since Unix epoch.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }
}

/// Wallet address, held in canonical lowercase hex form.
///
/// Trader queries are case-insensitive, so the address is lowercased on
/// construction and stored that way.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Addr(String);

impl Addr {
    /// Create an Addr from a string, lowercasing it.
    pub fn new(addr: &str) -> Self {
        Addr(addr.to_ascii_lowercase())
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if every hex digit is zero (the chain's "no owner" value).
    pub fn is_zero(&self) -> bool {
        self.0
            .strip_prefix("0x")
            .map(|h| !h.is_empty() && h.bytes().all(|b| b == b'0'))
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Addr {
    type Err = AddrParseError;

    /// Parse an address from a string.
    ///
    /// Requires exactly 42 characters: "0x" prefix + 40 hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 42 {
            return Err(AddrParseError::InvalidLength(s.len()));
        }
        if !s.starts_with("0x") {
            return Err(AddrParseError::MissingPrefix);
        }
        let hex_part = &s[2..];
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddrParseError::InvalidHex);
        }
        Ok(Addr::new(s))
    }
}

/// Errors that can occur when parsing an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    /// Address must be exactly 42 characters (0x + 40 hex digits).
    InvalidLength(usize),
    /// Address must start with "0x".
    MissingPrefix,
    /// Address must contain only hex digits after the "0x" prefix.
    InvalidHex,
}

impl std::fmt::Display for AddrParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddrParseError::InvalidLength(len) => {
                write!(f, "address must be 42 characters, got {}", len)
            }
            AddrParseError::MissingPrefix => {
                write!(f, "address must start with '0x'")
            }
            AddrParseError::InvalidHex => {
                write!(f, "address must contain only hex digits")
            }
        }
    }
}

impl std::error::Error for AddrParseError {}

/// Position direction: Long or Short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Long side.
    Long,
    /// Short side.
    Short,
}

impl Side {
    /// Build a Side from the chain's boolean long flag.
    pub fn from_long_flag(long_side: bool) -> Self {
        if long_side {
            Side::Long
        } else {
            Side::Short
        }
    }

    /// The chain's boolean representation: true = long.
    pub fn as_bool(&self) -> bool {
        matches!(self, Side::Long)
    }

    /// The side that trades into this one. Stops are indexed on it.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_lowercases() {
        let addr = Addr::new("0xAABBccDD00112233445566778899aabbCCDDeeff");
        assert_eq!(addr.as_str(), "0xaabbccdd00112233445566778899aabbccddeeff");
    }

    #[test]
    fn test_addr_from_str_validates() {
        assert!(Addr::from_str("0xaabbccdd00112233445566778899aabbccddeeff").is_ok());
        assert_eq!(
            Addr::from_str("0xabc"),
            Err(AddrParseError::InvalidLength(5))
        );
        assert_eq!(
            Addr::from_str("00aabbccdd00112233445566778899aabbccddeeff"),
            Err(AddrParseError::MissingPrefix)
        );
        assert_eq!(
            Addr::from_str("0xzzbbccdd00112233445566778899aabbccddeeff"),
            Err(AddrParseError::InvalidHex)
        );
    }

    #[test]
    fn test_addr_is_zero() {
        assert!(Addr::new("0x0000000000000000000000000000000000000000").is_zero());
        assert!(!Addr::new("0x0000000000000000000000000000000000000001").is_zero());
        assert!(!Addr::new("not-an-address").is_zero());
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
        assert!(Side::from_long_flag(true).as_bool());
        assert!(!Side::from_long_flag(false).as_bool());
    }
}
