//! Chain access: event subscriptions, read calls, and the ABI codec.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Addr, Envelope};

pub mod codec;
pub mod gateway;
pub mod mock;
pub mod rpc;

pub use gateway::{EventGateway, EventSubscription, Topic};
pub use mock::{MockChain, MockEvents};
pub use rpc::RpcClient;

/// Errors from chain transport and decoding.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Connection-level failure: disconnect, timeout, 5xx.
    #[error("chain transport error: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// Malformed log or call result.
    #[error("decode error: {0}")]
    Decode(String),
    /// The subscription stream ended.
    #[error("subscription closed")]
    SubscriptionClosed,
    /// No event arrived within the watchdog window.
    #[error("watchdog expired after {0:?}")]
    Watchdog(Duration),
}

impl ChainError {
    /// Transient errors warrant a restart; permanent ones mean the payload
    /// itself is bad and retrying cannot help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Transport(_) | ChainError::SubscriptionClosed | ChainError::Watchdog(_)
        )
    }
}

/// `getTrade` result. All-zero fields with a zero owner mean "no such trade".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub owner: Addr,
    pub asset_id: u32,
    /// Bit 0 encodes the long side.
    pub flags: u8,
    pub lots: u16,
    pub leverage_x: u16,
    pub state: u8,
    pub entry_x6: i64,
    pub target_x6: i64,
    pub sl_x6: i64,
    pub tp_x6: i64,
    pub liq_x6: i64,
}

impl Trade {
    /// A zero owner with every numeric field zero is the contract's
    /// "no such trade" value.
    pub fn is_empty(&self) -> bool {
        self.owner.is_zero()
            && self.asset_id == 0
            && self.flags == 0
            && self.lots == 0
            && self.leverage_x == 0
            && self.state == 0
            && self.entry_x6 == 0
            && self.target_x6 == 0
            && self.sl_x6 == 0
            && self.tp_x6 == 0
            && self.liq_x6 == 0
    }

    pub fn long_side(&self) -> bool {
        self.flags & 1 == 1
    }
}

/// Authoritative read access to the contract.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_trade(&self, id: u32) -> Result<Trade, ChainError>;
    async fn state_of(&self, id: u32) -> Result<u8, ChainError>;
    async fn next_id(&self) -> Result<u32, ChainError>;
}

/// A lazy, per-topic sequence of decoded events.
///
/// The stream is at-least-once: consumers must deduplicate and every
/// projection transition must be idempotent.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Envelope, ChainError>;
}
