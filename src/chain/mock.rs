//! In-memory chain doubles for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::{Addr, Envelope};

use super::{ChainError, ChainReader, EventSource, Trade};

/// A `ChainReader` over a scripted id → trade map.
#[derive(Debug, Default)]
pub struct MockChain {
    trades: Mutex<HashMap<u32, Trade>>,
    failing: Mutex<HashSet<u32>>,
    next_id: Mutex<u32>,
    pub calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a trade; `next_id` grows to cover it.
    pub fn with_trade(self, id: u32, trade: Trade) -> Self {
        self.put_trade(id, trade);
        self
    }

    pub fn put_trade(&self, id: u32, trade: Trade) {
        self.trades
            .lock()
            .expect("mock chain poisoned")
            .insert(id, trade);
        let mut next = self.next_id.lock().expect("mock chain poisoned");
        if *next <= id {
            *next = id.saturating_add(1);
        }
    }

    /// Make reads for an id fail with a transient transport error.
    pub fn fail_id(&self, id: u32) {
        self.failing.lock().expect("mock chain poisoned").insert(id);
    }

    pub fn set_next_id(&self, next: u32) {
        *self.next_id.lock().expect("mock chain poisoned") = next;
    }

    fn check_failure(&self, id: u32) -> Result<(), ChainError> {
        if self.failing.lock().expect("mock chain poisoned").contains(&id) {
            return Err(ChainError::Transport(format!("scripted failure for {}", id)));
        }
        Ok(())
    }

    /// The all-zero trade the contract returns for unknown ids.
    pub fn empty_trade() -> Trade {
        Trade {
            owner: Addr::new("0x0000000000000000000000000000000000000000"),
            asset_id: 0,
            flags: 0,
            lots: 0,
            leverage_x: 0,
            state: 0,
            entry_x6: 0,
            target_x6: 0,
            sl_x6: 0,
            tp_x6: 0,
            liq_x6: 0,
        }
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn get_trade(&self, id: u32) -> Result<Trade, ChainError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure(id)?;
        Ok(self
            .trades
            .lock()
            .expect("mock chain poisoned")
            .get(&id)
            .cloned()
            .unwrap_or_else(Self::empty_trade))
    }

    async fn state_of(&self, id: u32) -> Result<u8, ChainError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.check_failure(id)?;
        Ok(self
            .trades
            .lock()
            .expect("mock chain poisoned")
            .get(&id)
            .map(|t| t.state)
            .unwrap_or(0))
    }

    async fn next_id(&self) -> Result<u32, ChainError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(*self.next_id.lock().expect("mock chain poisoned"))
    }
}

/// An `EventSource` that replays a scripted envelope list, then reports the
/// subscription closed.
#[derive(Debug)]
pub struct MockEvents {
    queue: VecDeque<Result<Envelope, ChainError>>,
}

impl MockEvents {
    pub fn new(envelopes: Vec<Envelope>) -> Self {
        Self {
            queue: envelopes.into_iter().map(Ok).collect(),
        }
    }

    /// Push an error into the script (e.g. a watchdog expiry).
    pub fn then_error(mut self, error: ChainError) -> Self {
        self.queue.push_back(Err(error));
        self
    }
}

#[async_trait]
impl EventSource for MockEvents {
    async fn next_event(&mut self) -> Result<Envelope, ChainError> {
        match self.queue.pop_front() {
            Some(item) => item,
            None => Err(ChainError::SubscriptionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_chain_scripting() {
        let chain = MockChain::new().with_trade(
            5,
            Trade {
                state: 1,
                ..MockChain::empty_trade()
            },
        );
        assert_eq!(chain.state_of(5).await.unwrap(), 1);
        assert_eq!(chain.next_id().await.unwrap(), 6);
        assert!(chain.get_trade(99).await.unwrap().is_empty());

        chain.fail_id(5);
        assert!(matches!(
            chain.get_trade(5).await,
            Err(ChainError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_events_drain_and_close() {
        let mut source = MockEvents::new(vec![]);
        assert!(matches!(
            source.next_event().await,
            Err(ChainError::SubscriptionClosed)
        ));
    }
}
