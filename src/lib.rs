pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod reconcile;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Addr, Asset, ChainEvent, CloseReason, Envelope, EventMeta, Position, PositionState, Side,
    TimeMs,
};
pub use error::ApiError;
