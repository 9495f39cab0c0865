//! Typed chain events and their delivery metadata.

use serde::{Deserialize, Serialize};

use super::position::{CloseReason, PositionState};
use super::primitives::Addr;

/// Where an event was observed on chain. Drives cross-restart deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

impl EventMeta {
    /// Idempotency key for the per-process seen set.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.block_number, self.tx_hash, self.log_index)
    }
}

/// A position was created, either as a resting order or directly open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedEvent {
    pub id: u32,
    /// ORDER or OPEN only; the decoder rejects other values.
    pub initial_state: PositionState,
    pub asset_id: u32,
    pub long_side: bool,
    pub lots: u16,
    pub leverage_x: u16,
    /// Target price for ORDER, entry price for OPEN.
    pub entry_or_target_x6: i64,
    pub sl_x6: i64,
    pub tp_x6: i64,
    pub liq_x6: i64,
    pub trader: Addr,
}

/// A resting order was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedEvent {
    pub id: u32,
    pub entry_x6: i64,
}

/// SL/TP were changed. LIQ moves on no event and is never touched here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopsUpdatedEvent {
    pub id: u32,
    pub sl_x6: i64,
    pub tp_x6: i64,
}

/// A position left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEvent {
    pub id: u32,
    pub reason: CloseReason,
    pub exec_x6: i64,
    pub pnl_usd6: i64,
}

/// One decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    Opened(OpenedEvent),
    Executed(ExecutedEvent),
    StopsUpdated(StopsUpdatedEvent),
    Removed(RemovedEvent),
}

impl ChainEvent {
    /// The position id the event refers to.
    pub fn position_id(&self) -> u32 {
        match self {
            ChainEvent::Opened(e) => e.id,
            ChainEvent::Executed(e) => e.id,
            ChainEvent::StopsUpdated(e) => e.id,
            ChainEvent::Removed(e) => e.id,
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::Opened(_) => "opened",
            ChainEvent::Executed(_) => "executed",
            ChainEvent::StopsUpdated(_) => "stops_updated",
            ChainEvent::Removed(_) => "removed",
        }
    }
}

/// A decoded event together with its chain location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub event: ChainEvent,
    pub meta: EventMeta,
}
