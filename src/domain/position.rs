//! Position lifecycle types and the asset metadata record.

use serde::{Deserialize, Serialize};

use super::primitives::{Addr, Side, TimeMs};

/// Per-asset static metadata. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: u32,
    pub symbol: String,
    /// Minimal price increment, ×10⁶. Always positive.
    pub tick_x6: i64,
    pub lot_num: i64,
    pub lot_den: i64,
}

/// Lifecycle state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionState {
    Order,
    Open,
    Closed,
    Cancelled,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Order => "ORDER",
            PositionState::Open => "OPEN",
            PositionState::Closed => "CLOSED",
            PositionState::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ORDER" => Some(PositionState::Order),
            "OPEN" => Some(PositionState::Open),
            "CLOSED" => Some(PositionState::Closed),
            "CANCELLED" => Some(PositionState::Cancelled),
            _ => None,
        }
    }

    /// The chain's `stateOf` mapping: 0=ORDER, 1=OPEN, 2=CLOSED, 3=CANCELLED.
    pub fn from_chain(v: u8) -> Option<Self> {
        match v {
            0 => Some(PositionState::Order),
            1 => Some(PositionState::Open),
            2 => Some(PositionState::Closed),
            3 => Some(PositionState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Closed | PositionState::Cancelled)
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a position left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloseReason {
    Cancelled,
    Market,
    Sl,
    Tp,
    Liq,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Cancelled => "CANCELLED",
            CloseReason::Market => "MARKET",
            CloseReason::Sl => "SL",
            CloseReason::Tp => "TP",
            CloseReason::Liq => "LIQ",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CANCELLED" => Some(CloseReason::Cancelled),
            "MARKET" => Some(CloseReason::Market),
            "SL" => Some(CloseReason::Sl),
            "TP" => Some(CloseReason::Tp),
            "LIQ" => Some(CloseReason::Liq),
            _ => None,
        }
    }

    /// The chain's `Removed.reason` mapping. Unknown values are rejected.
    pub fn from_chain(v: u8) -> Option<Self> {
        match v {
            0 => Some(CloseReason::Cancelled),
            1 => Some(CloseReason::Market),
            2 => Some(CloseReason::Sl),
            3 => Some(CloseReason::Tp),
            4 => Some(CloseReason::Liq),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stop price kinds, as persisted in `stop_buckets.stop_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopKind {
    Sl,
    Tp,
    Liq,
}

impl StopKind {
    pub fn stop_type(&self) -> i64 {
        match self {
            StopKind::Sl => 1,
            StopKind::Tp => 2,
            StopKind::Liq => 3,
        }
    }

    pub fn from_stop_type(v: i64) -> Option<Self> {
        match v {
            1 => Some(StopKind::Sl),
            2 => Some(StopKind::Tp),
            3 => Some(StopKind::Liq),
            _ => None,
        }
    }
}

/// One position row of the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: u32,
    pub owner: Addr,
    pub asset_id: u32,
    pub state: PositionState,
    pub side: Side,
    pub lots: i64,
    pub leverage_x: i64,
    pub notional_usd6: i64,
    pub margin_usd6: i64,
    pub entry_x6: i64,
    pub target_x6: i64,
    pub sl_x6: i64,
    pub tp_x6: i64,
    pub liq_x6: i64,
    pub exec_x6: i64,
    pub pnl_usd6: i64,
    pub opened_at: TimeMs,
    pub executed_at: Option<TimeMs>,
    pub closed_at: Option<TimeMs>,
    pub cancelled_at: Option<TimeMs>,
    pub close_reason: Option<CloseReason>,
    pub last_tx_hash: Option<String>,
    pub last_block_num: Option<i64>,
    pub target_bucket: Option<i64>,
    pub sl_bucket: Option<i64>,
    pub tp_bucket: Option<i64>,
    pub liq_bucket: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_chain_mapping() {
        assert_eq!(PositionState::from_chain(0), Some(PositionState::Order));
        assert_eq!(PositionState::from_chain(1), Some(PositionState::Open));
        assert_eq!(PositionState::from_chain(2), Some(PositionState::Closed));
        assert_eq!(PositionState::from_chain(3), Some(PositionState::Cancelled));
        assert_eq!(PositionState::from_chain(4), None);
    }

    #[test]
    fn test_state_str_round_trip() {
        for s in [
            PositionState::Order,
            PositionState::Open,
            PositionState::Closed,
            PositionState::Cancelled,
        ] {
            assert_eq!(PositionState::from_str(s.as_str()), Some(s));
        }
        assert_eq!(PositionState::from_str("PENDING"), None);
    }

    #[test]
    fn test_reason_chain_mapping_rejects_unknown() {
        assert_eq!(CloseReason::from_chain(0), Some(CloseReason::Cancelled));
        assert_eq!(CloseReason::from_chain(4), Some(CloseReason::Liq));
        assert_eq!(CloseReason::from_chain(5), None);
    }

    #[test]
    fn test_stop_kind_codes() {
        assert_eq!(StopKind::Sl.stop_type(), 1);
        assert_eq!(StopKind::Tp.stop_type(), 2);
        assert_eq!(StopKind::Liq.stop_type(), 3);
        assert_eq!(StopKind::from_stop_type(2), Some(StopKind::Tp));
        assert_eq!(StopKind::from_stop_type(9), None);
    }
}
